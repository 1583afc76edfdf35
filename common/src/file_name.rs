//! Run identity, as encoded in the directory layout of a capture:
//! `.../RUN000123/PMT0456/<test>/wave_0.dat`.
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};
use thiserror::Error;
use tracing::warn;

/// Longest permitted FileId, in bytes.
pub const MAX_FILE_ID_LEN: usize = 127;

const RUN_MARKER: &str = "/RUN";
const PMT_MARKER: &str = "/PMT0";
const LOCATION_MARKER: &str = "wave_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FileNameError {
    #[error("Path is not valid unicode")]
    NonUnicode,
    #[error("Marker \"{0}\" not found in path")]
    MissingMarker(&'static str),
    #[error("Cannot read a number from \"{text}\" after \"{marker}\"")]
    InvalidNumber { marker: &'static str, text: String },
    #[error("No test name follows the PMT directory")]
    MissingTest,
}

/// Identifier used to name every artifact of a run.
/// Values longer than [MAX_FILE_ID_LEN] bytes are truncated at a char boundary.
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        let mut id = id.into();
        if id.len() > MAX_FILE_ID_LEN {
            let mut end = MAX_FILE_ID_LEN;
            while !id.is_char_boundary(end) {
                end -= 1;
            }
            warn!("FileId \"{id}\" exceeds {MAX_FILE_ID_LEN} bytes, truncating.");
            id.truncate(end);
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<FileId> for String {
    fn from(value: FileId) -> Self {
        value.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub run: i32,
    pub pmt: i32,
    pub location: i32,
    /// Test letter, `G` for a gain scan.
    pub test: char,
    /// HV step of a gain scan, 0 for other tests.
    pub hv_step: i32,
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self {
            run: 0,
            pmt: 0,
            location: -1,
            test: 'A',
            hv_step: -1,
        }
    }
}

impl RunIdentity {
    pub fn from_path(path: &Path) -> Result<Self, FileNameError> {
        let path = path.to_str().ok_or(FileNameError::NonUnicode)?;

        let run = parse_leading_int(RUN_MARKER, take_chars(after(path, RUN_MARKER, 4)?, 6))?;
        let pmt = parse_leading_int(PMT_MARKER, take_chars(after(path, PMT_MARKER, 4)?, 4))?;
        let location = parse_leading_int(LOCATION_MARKER, after(path, LOCATION_MARKER, 5)?)?;

        let test = after(path, PMT_MARKER, 9)
            .ok()
            .and_then(|rest| rest.chars().next())
            .filter(|c| *c != '/')
            .ok_or(FileNameError::MissingTest)?;

        let (test, hv_step) = match test {
            '1'..='5' => ('G', test.to_digit(10).map_or(0, |d| d as i32)),
            other => (other, 0),
        };

        Ok(Self {
            run,
            pmt,
            location,
            test,
            hv_step,
        })
    }

    /// Parses the identity of a capture. If the path does not follow the capture layout
    /// the default identity is used, and the FileId is taken from the name of the
    /// capture's directory and its file stem, as captures share their file names.
    pub fn identify(path: &Path) -> (Self, FileId) {
        match Self::from_path(path) {
            Ok(identity) => {
                let file_id = identity.file_id();
                (identity, file_id)
            }
            Err(e) => {
                let stem = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "unknown".to_owned());
                let file_id = match path.parent().and_then(Path::file_name) {
                    Some(parent) => format!("{}_{stem}", parent.to_string_lossy()),
                    None => stem,
                };
                warn!("Cannot identify run from {}: {e}. Using FileId \"{file_id}\".", path.display());
                (Self::default(), FileId::new(file_id))
            }
        }
    }

    pub fn is_gain_scan(&self) -> bool {
        self.test == 'G'
    }

    pub fn file_id(&self) -> FileId {
        FileId::new(format!(
            "Run_{}_PMT_{}_Loc_{}_Test_{}",
            self.run, self.pmt, self.location, self.test
        ))
    }
}

fn after<'a>(path: &'a str, marker: &'static str, offset: usize) -> Result<&'a str, FileNameError> {
    path.find(marker)
        .and_then(|pos| path.get(pos + offset..))
        .ok_or(FileNameError::MissingMarker(marker))
}

fn take_chars(text: &str, count: usize) -> &str {
    text.char_indices()
        .nth(count)
        .map_or(text, |(end, _)| &text[..end])
}

/// Reads the integer at the start of `text`, ignoring anything after it.
fn parse_leading_int(marker: &'static str, text: &str) -> Result<i32, FileNameError> {
    let end = text
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(text.len(), |(i, _)| i);
    text[..end]
        .parse()
        .map_err(|_| FileNameError::InvalidNumber {
            marker,
            text: text.to_owned(),
        })
}
