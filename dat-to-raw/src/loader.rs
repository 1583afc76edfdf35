use pmt_common::{
    FileId, FrameReader, RawRunSummary, RunIdentity, RunStore,
    store::{StoreError, StoreResult},
};
use std::{
    collections::HashSet,
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};
use tracing::{Span, field, info, instrument, warn};

/// Progress is reported after this many events.
const PROGRESS_INTERVAL: usize = 500_000;

/// A capture file and the run it holds.
#[derive(Debug)]
pub(crate) struct Capture {
    pub(crate) path: PathBuf,
    pub(crate) identity: RunIdentity,
    pub(crate) file_id: FileId,
}

impl Capture {
    pub(crate) fn identify(path: &Path) -> Self {
        let (identity, file_id) = RunIdentity::identify(path);
        Self {
            path: path.to_owned(),
            identity,
            file_id,
        }
    }

    /// The raw run store, in `output_dir` or else beside the capture.
    pub(crate) fn store(&self, output_dir: Option<&Path>) -> RunStore {
        let dir = output_dir
            .or_else(|| self.path.parent())
            .unwrap_or_else(|| Path::new("."));
        RunStore::new(dir, self.file_id.clone())
    }
}

/// Splits `captures` into those with a raw run store of their own, and those which
/// would write to the same store as an earlier capture.
pub(crate) fn distinct_stores(
    captures: Vec<Capture>,
    output_dir: Option<&Path>,
) -> (Vec<Capture>, Vec<Capture>) {
    let mut raw_paths = HashSet::new();
    captures
        .into_iter()
        .partition(|capture| raw_paths.insert(capture.store(output_dir).raw_path()))
}

/// Decodes one capture, writing the validated frames and a summary to its raw run store.
#[instrument(skip_all, fields(path = %capture.path.display(), file_id = %capture.file_id, num_events = field::Empty))]
pub(crate) fn convert_capture(
    capture: &Capture,
    output_dir: Option<&Path>,
) -> StoreResult<RawRunSummary> {
    let path = capture.path.as_path();
    let file = File::open(path).map_err(|source| StoreError::Io {
        path: path.to_owned(),
        source,
    })?;

    let store = capture.store(output_dir);
    store.create_dir()?;

    let raw_path = store.raw_path();
    let io_error = |source: std::io::Error| StoreError::Io {
        path: raw_path.clone(),
        source,
    };

    let mut writer = store.raw_writer()?;
    let mut reader = FrameReader::new(BufReader::new(file));
    let mut summary = RawRunSummary {
        file_id: capture.file_id.clone(),
        identity: capture.identity.clone(),
        source: path.to_owned(),
        ..Default::default()
    };

    for event in reader.by_ref() {
        let event = event.map_err(|source| StoreError::Frame {
            path: path.to_owned(),
            source,
        })?;
        summary.first_counter.get_or_insert(event.header.event_counter);
        summary.last_counter = Some(event.header.event_counter);
        summary.num_events += 1;
        if summary.num_events % PROGRESS_INTERVAL == 0 {
            info!("Entry {}", summary.num_events);
        }
        event.encode(&mut writer).map_err(io_error)?;
    }
    writer.flush().map_err(io_error)?;

    summary.num_samples = reader.num_samples();
    summary.anomalies = reader.anomalies().clone();
    summary.suspect = summary.anomalies.is_suspect();
    Span::current().record("num_events", summary.num_events);

    if summary.num_events == 0 {
        warn!("No events decoded from {}", path.display());
    }
    if summary.suspect {
        warn!("Run flagged as suspect: {:?}", summary.anomalies);
    }

    store.write_raw_summary(&summary)?;
    info!(
        "{} events of {} samples written to {}",
        summary.num_events,
        summary.num_samples.unwrap_or_default(),
        raw_path.display()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmt_common::{EventHeader, RawEvent};
    use std::{env, fs};

    fn capture(counters: &[u32], samples: usize) -> Vec<u8> {
        counters
            .iter()
            .flat_map(|&counter| {
                RawEvent::new(
                    EventHeader {
                        event_counter: counter,
                        trigger_time_tag: counter * 125,
                        ..Default::default()
                    },
                    (0..samples).map(|s| 8192 + s as i16).collect(),
                )
                .to_bytes()
            })
            .collect()
    }

    #[test]
    fn convert_with_trailing_duplicate() {
        let root = env::temp_dir().join(format!("dat-to-raw-{}", std::process::id()));
        let capture_dir = root.join("RUN000042/PMT0107/Dark");
        fs::create_dir_all(&capture_dir).unwrap();
        let capture_path = capture_dir.join("wave_0.dat");
        fs::write(&capture_path, capture(&[1, 2, 3, 3], 4)).unwrap();

        let output = root.join("raw");
        let summary =
            convert_capture(&Capture::identify(&capture_path), Some(output.as_path())).unwrap();
        assert_eq!(summary.file_id.as_str(), "Run_42_PMT_107_Loc_0_Test_D");
        assert_eq!(summary.num_events, 3);
        assert_eq!(summary.num_samples, Some(4));
        assert_eq!(summary.first_counter, Some(1));
        assert_eq!(summary.last_counter, Some(3));
        assert!(summary.anomalies.duplicate_trailing_frame);
        assert!(!summary.suspect);

        let store = RunStore::new(&output, summary.file_id.clone());
        assert_eq!(store.read_raw_summary().unwrap(), summary);
        let events = store
            .raw_reader()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(fs::metadata(store.raw_path()).unwrap().len(), 3 * 32);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn missing_capture_is_an_error() {
        let path = env::temp_dir().join("dat-to-raw-missing/wave_0.dat");
        assert!(matches!(
            convert_capture(&Capture::identify(&path), None),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn clashing_stores_are_held_back() {
        let captures = ["/data/a/wave_0.dat", "/data/b/wave_0.dat", "/other/a/wave_0.dat"]
            .map(|path| Capture::identify(Path::new(path)))
            .into();

        let (distinct, clashes) = distinct_stores(captures, Some(Path::new("/out")));
        let paths = |captures: &[Capture]| {
            captures
                .iter()
                .map(|capture| capture.path.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(
            paths(&distinct),
            [
                PathBuf::from("/data/a/wave_0.dat"),
                PathBuf::from("/data/b/wave_0.dat")
            ]
        );
        assert_eq!(paths(&clashes), [PathBuf::from("/other/a/wave_0.dat")]);
    }

    #[test]
    fn stores_beside_captures_do_not_clash() {
        let captures = ["/data/a/wave_0.dat", "/other/a/wave_0.dat"]
            .map(|path| Capture::identify(Path::new(path)))
            .into();
        let (distinct, clashes) = distinct_stores(captures, None);
        assert_eq!(distinct.len(), 2);
        assert!(clashes.is_empty());
    }
}
