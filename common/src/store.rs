//! On-disk layout of a run. Every artifact of a run lives in one directory and is
//! named after its [FileId]:
//! - `{file_id}.raw`, validated frames in the digitiser's wire format,
//! - `{file_id}.raw.json`, a [RawRunSummary] of the decoding,
//! - `{file_id}.meta.json`, the [RunMetadata],
//! - `{file_id}.cooked.jsonl`, one [CookedEvent] per line.
use crate::{
    EventCounter,
    cooked::CookedEvent,
    file_name::{FileId, RunIdentity},
    frame::{FrameAnomalies, FrameError, FrameReader},
    metadata::RunMetadata,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const RAW_SUFFIX: &str = ".raw";
pub const RAW_SUMMARY_SUFFIX: &str = ".raw.json";
pub const METADATA_SUFFIX: &str = ".meta.json";
pub const COOKED_SUFFIX: &str = ".cooked.jsonl";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO Error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("JSON Error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("JSON Error in {path} at line {line}: {source}")]
    JsonLine {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error("Frame Error in {path}: {source}")]
    Frame { path: PathBuf, source: FrameError },
    #[error("Path {0} does not name a run store file")]
    UnrecognisedPath(PathBuf),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    |source| StoreError::Io {
        path: path.to_owned(),
        source,
    }
}

fn json_error(path: &Path) -> impl FnOnce(serde_json::Error) -> StoreError + '_ {
    |source| StoreError::Json {
        path: path.to_owned(),
        source,
    }
}

/// Summary of the decoding of one capture.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRunSummary {
    pub file_id: FileId,
    pub identity: RunIdentity,
    pub source: PathBuf,
    pub num_events: usize,
    pub num_samples: Option<usize>,
    pub first_counter: Option<EventCounter>,
    pub last_counter: Option<EventCounter>,
    pub anomalies: FrameAnomalies,
    pub suspect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStore {
    dir: PathBuf,
    file_id: FileId,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>, file_id: FileId) -> Self {
        Self {
            dir: dir.into(),
            file_id,
        }
    }

    /// Finds the store which owns the given file, from any of the store's file names.
    pub fn locate(path: &Path) -> StoreResult<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StoreError::UnrecognisedPath(path.to_owned()))?;
        // longer suffixes first, as ".raw" is a prefix of ".raw.json"
        let file_id = [RAW_SUMMARY_SUFFIX, METADATA_SUFFIX, COOKED_SUFFIX, RAW_SUFFIX]
            .into_iter()
            .find_map(|suffix| name.strip_suffix(suffix))
            .filter(|file_id| !file_id.is_empty())
            .ok_or_else(|| StoreError::UnrecognisedPath(path.to_owned()))?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::new(dir, FileId::new(file_id)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    fn path_with(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{suffix}", self.file_id))
    }

    pub fn raw_path(&self) -> PathBuf {
        self.path_with(RAW_SUFFIX)
    }

    pub fn raw_summary_path(&self) -> PathBuf {
        self.path_with(RAW_SUMMARY_SUFFIX)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.path_with(METADATA_SUFFIX)
    }

    pub fn cooked_path(&self) -> PathBuf {
        self.path_with(COOKED_SUFFIX)
    }

    pub fn create_dir(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))
    }

    pub fn raw_writer(&self) -> StoreResult<BufWriter<File>> {
        let path = self.raw_path();
        File::create(&path)
            .map(BufWriter::new)
            .map_err(io_error(&path))
    }

    pub fn raw_reader(&self) -> StoreResult<FrameReader<BufReader<File>>> {
        let path = self.raw_path();
        File::open(&path)
            .map(|file| FrameReader::new(BufReader::new(file)))
            .map_err(io_error(&path))
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
        let mut writer = BufWriter::new(File::create(path).map_err(io_error(path))?);
        serde_json::to_writer_pretty(&mut writer, value).map_err(json_error(path))?;
        writer.flush().map_err(io_error(path))
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
        let reader = BufReader::new(File::open(path).map_err(io_error(path))?);
        serde_json::from_reader(reader).map_err(json_error(path))
    }

    pub fn write_raw_summary(&self, summary: &RawRunSummary) -> StoreResult<()> {
        Self::write_json(&self.raw_summary_path(), summary)
    }

    pub fn read_raw_summary(&self) -> StoreResult<RawRunSummary> {
        Self::read_json(&self.raw_summary_path())
    }

    pub fn write_metadata(&self, metadata: &RunMetadata) -> StoreResult<()> {
        Self::write_json(&self.metadata_path(), metadata)
    }

    pub fn read_metadata(&self) -> StoreResult<RunMetadata> {
        Self::read_json(&self.metadata_path())
    }

    pub fn cooked_writer(&self) -> StoreResult<CookedWriter> {
        let path = self.cooked_path();
        let file = File::create(&path).map_err(io_error(&path))?;
        Ok(CookedWriter {
            writer: BufWriter::new(file),
            path,
            num_events: 0,
        })
    }

    pub fn read_cooked(&self) -> StoreResult<Vec<CookedEvent>> {
        let path = self.cooked_path();
        let reader = BufReader::new(File::open(&path).map_err(io_error(&path))?);
        reader
            .lines()
            .enumerate()
            .filter(|(_, line)| line.as_ref().map_or(true, |line| !line.trim().is_empty()))
            .map(|(index, line)| {
                let line = line.map_err(io_error(&path))?;
                serde_json::from_str(&line).map_err(|source| StoreError::JsonLine {
                    path: path.clone(),
                    line: index + 1,
                    source,
                })
            })
            .collect()
    }
}

/// Appends cooked events to a store, one JSON object per line.
pub struct CookedWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    num_events: usize,
}

impl CookedWriter {
    pub fn append(&mut self, event: &CookedEvent) -> StoreResult<()> {
        serde_json::to_writer(&mut self.writer, event).map_err(json_error(&self.path))?;
        self.writer.write_all(b"\n").map_err(io_error(&self.path))?;
        self.num_events += 1;
        Ok(())
    }

    /// Flushes the store, returning the number of events written.
    pub fn finish(mut self) -> StoreResult<usize> {
        self.writer.flush().map_err(io_error(&self.path))?;
        Ok(self.num_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::{EventHeader, RawEvent},
        metadata::AcquisitionSettings,
    };
    use std::env;

    fn temp_store(name: &str) -> RunStore {
        let dir = env::temp_dir().join(format!("pmt-store-{name}-{}", std::process::id()));
        let store = RunStore::new(dir, FileId::new("Run_1_PMT_2_Loc_3_Test_D"));
        store.create_dir().unwrap();
        store
    }

    #[test]
    fn locate_from_any_file() {
        for name in [
            "Run_1_PMT_2_Loc_3_Test_D.raw",
            "Run_1_PMT_2_Loc_3_Test_D.raw.json",
            "Run_1_PMT_2_Loc_3_Test_D.meta.json",
            "Run_1_PMT_2_Loc_3_Test_D.cooked.jsonl",
        ] {
            let store = RunStore::locate(&Path::new("/data/out").join(name)).unwrap();
            assert_eq!(store.file_id().as_str(), "Run_1_PMT_2_Loc_3_Test_D");
            assert_eq!(store.dir(), Path::new("/data/out"));
        }
        assert!(matches!(
            RunStore::locate(Path::new("/data/out/wave_0.dat")),
            Err(StoreError::UnrecognisedPath(_))
        ));
        assert!(RunStore::locate(Path::new("/data/out/.raw")).is_err());
    }

    #[test]
    fn raw_frames_and_summary() {
        let store = temp_store("raw");
        let events: Vec<_> = (1..=3)
            .map(|counter| {
                RawEvent::new(
                    EventHeader {
                        event_counter: counter,
                        trigger_time_tag: counter * 1000,
                        ..Default::default()
                    },
                    vec![counter as i16; 4],
                )
            })
            .collect();
        let mut writer = store.raw_writer().unwrap();
        for event in &events {
            event.encode(&mut writer).unwrap();
        }
        writer.flush().unwrap();
        drop(writer);

        let summary = RawRunSummary {
            file_id: store.file_id().clone(),
            num_events: 3,
            num_samples: Some(4),
            first_counter: Some(1),
            last_counter: Some(3),
            ..Default::default()
        };
        store.write_raw_summary(&summary).unwrap();

        let decoded = store
            .raw_reader()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded, events);
        assert_eq!(store.read_raw_summary().unwrap(), summary);
        fs::remove_dir_all(store.dir()).unwrap();
    }

    #[test]
    fn metadata_and_cooked_events() {
        let store = temp_store("cooked");
        let metadata = RunMetadata::new(
            &AcquisitionSettings::default(),
            4,
            RunIdentity::default(),
            store.file_id().clone(),
        );
        store.write_metadata(&metadata).unwrap();
        assert_eq!(store.read_metadata().unwrap(), metadata);

        let events = vec![
            CookedEvent {
                adc: vec![8192, 8200, 8300, 8192],
                peak_mv: 13.5,
                peak_sample: 2,
                min_mv: -0.5,
                mean_mv: 3.0,
                base_mv: 0.25,
                start_s: 0.0,
                wave_mv: None,
            },
            CookedEvent {
                peak_sample: 1,
                start_s: 1.5e-3,
                wave_mv: Some(vec![0.0, 1.0, 0.5, 0.0]),
                ..Default::default()
            },
        ];
        let mut writer = store.cooked_writer().unwrap();
        for event in &events {
            writer.append(event).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 2);
        assert_eq!(store.read_cooked().unwrap(), events);

        let first_line = fs::read_to_string(store.cooked_path()).unwrap();
        assert!(!first_line.lines().next().unwrap().contains("wave_mv"));
        fs::remove_dir_all(store.dir()).unwrap();
    }

    #[test]
    fn missing_store_is_io_error() {
        let store = RunStore::new(env::temp_dir().join("pmt-store-missing"), FileId::new("none"));
        assert!(matches!(store.read_metadata(), Err(StoreError::Io { .. })));
        assert!(matches!(store.read_cooked(), Err(StoreError::Io { .. })));
    }
}
