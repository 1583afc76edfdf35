use crate::{
    daq::DaqMonitor, features::FeatureExtractor, parameters::CookOptions, timestamp::ElapsedTime,
};
use pmt_common::{
    RunContext, RunMetadata, RunStore,
    frame::FrameError,
    store::{StoreError, StoreResult},
};
use std::path::Path;
use tracing::{Span, debug, field, info, instrument, warn};

/// Progress is reported after this many events.
const PROGRESS_INTERVAL: usize = 50_000;

/// Cooks every event of one raw run store, writing the run's metadata and cooked store.
/// Events are processed strictly in order, as elapsed time depends on every earlier event.
#[instrument(skip_all, fields(path = %path.display(), file_id = field::Empty, num_events = field::Empty))]
pub(crate) fn cook_run(path: &Path, options: &CookOptions) -> StoreResult<RunMetadata> {
    let raw_store = RunStore::locate(path)?;
    Span::current().record("file_id", raw_store.file_id().as_str());
    let summary = raw_store.read_raw_summary()?;

    let cooked_store = RunStore::new(
        options
            .output_dir
            .as_deref()
            .unwrap_or_else(|| raw_store.dir()),
        raw_store.file_id().clone(),
    );
    cooked_store.create_dir()?;

    let frame_error = |source: FrameError| StoreError::Frame {
        path: raw_store.raw_path(),
        source,
    };
    let mut reader = raw_store.raw_reader()?;
    let first = reader.next().transpose().map_err(frame_error)?;

    let num_samples = first
        .as_ref()
        .map(|event| event.num_samples())
        .or(summary.num_samples)
        .unwrap_or_default();
    let mut metadata = RunMetadata::new(
        &options.settings,
        num_samples,
        summary.identity.clone(),
        summary.file_id.clone(),
    );
    metadata.frame_anomalies = summary.anomalies.clone();
    metadata.log_constants();

    let limit = match options.max_events {
        Some(max_events) if max_events > summary.num_events => {
            warn!(
                "Requested {max_events} events, but the run has only {}.",
                summary.num_events
            );
            summary.num_events
        }
        Some(max_events) => max_events,
        None => usize::MAX,
    };

    let context = RunContext::new(metadata);
    let extractor = FeatureExtractor::new(&context, options.save_waveforms);
    let mut elapsed = ElapsedTime::default();
    let mut daq = DaqMonitor::default();
    let mut empty_baseline_window = false;
    let mut writer = cooked_store.cooked_writer()?;

    let events = first.into_iter().map(Ok).chain(reader.by_ref()).take(limit);
    for (entry, event) in events.enumerate() {
        let event = event.map_err(frame_error)?;
        if entry % PROGRESS_INTERVAL == 0 {
            debug!("Entry {entry}");
        }

        let time_s = elapsed.next(event.header.trigger_time_tag);
        daq.record(event.header.event_counter, time_s);

        let extracted = extractor.cook(&event.samples, time_s as f32);
        if extracted.empty_baseline_window && !empty_baseline_window {
            warn!("Entry {entry} has no samples in the baseline window, using a baseline of 0 mV.");
            empty_baseline_window = true;
        }
        writer.append(&extracted.event)?;
    }
    let num_events = writer.finish()?;
    Span::current().record("num_events", num_events);

    let mut metadata = context.metadata;
    metadata.empty_baseline_window = empty_baseline_window;
    let daq = daq.summary(elapsed.wrap_count());
    info!(
        "{num_events} events cooked over {:.3} s: {} missed, {} wraps, mean trigger rate {:.3} kHz",
        daq.elapsed_s, daq.missed_events, daq.wrap_count, daq.mean_trigger_frequency_khz
    );
    metadata.daq = Some(daq);
    if metadata.is_suspect() {
        warn!("Run {} is flagged as suspect", metadata.file_id);
    }

    cooked_store.write_metadata(&metadata)?;
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use pmt_common::{
        AcquisitionSettings, EventHeader, FileId, Polarity, RawEvent, RawRunSummary,
    };
    use std::{env, fs, io::Write};

    const MV_PER_BIN: f32 = 2000.0 / 16384.0;

    fn raw_store(name: &str, events: &[RawEvent]) -> RunStore {
        let dir = env::temp_dir().join(format!("cook-raw-{name}-{}", std::process::id()));
        let store = RunStore::new(&dir, FileId::new("Run_1_PMT_1_Loc_0_Test_D"));
        store.create_dir().unwrap();
        let mut writer = store.raw_writer().unwrap();
        for event in events {
            event.encode(&mut writer).unwrap();
        }
        writer.flush().unwrap();
        store
            .write_raw_summary(&RawRunSummary {
                file_id: store.file_id().clone(),
                num_events: events.len(),
                num_samples: events.first().map(RawEvent::num_samples),
                ..Default::default()
            })
            .unwrap();
        store
    }

    fn event(counter: u32, time_tag: u32, samples: Vec<i16>) -> RawEvent {
        RawEvent::new(
            EventHeader {
                event_counter: counter,
                trigger_time_tag: time_tag,
                ..Default::default()
            },
            samples,
        )
    }

    fn options(polarity: Polarity, max_events: Option<usize>) -> CookOptions {
        CookOptions {
            settings: AcquisitionSettings {
                polarity,
                ..Default::default()
            },
            output_dir: None,
            save_waveforms: false,
            max_events,
        }
    }

    #[test]
    fn two_event_run() {
        let events = vec![
            event(1, 1000, vec![8192, 8274, 8356, 8192]),
            event(2, 1125, vec![8200, 8200, 8200, 8200]),
            // repeated counter, as left by reading past the end of a capture
            event(2, 1125, vec![8200, 8200, 8200, 8200]),
        ];
        assert_eq!(events[0].header.event_size, 32);
        let store = raw_store("two-events", &events);

        let metadata = cook_run(&store.raw_path(), &options(Polarity::Positive, None)).unwrap();
        assert_eq!(metadata.num_samples, 4);
        assert!(!metadata.is_suspect());

        let cooked = store.read_cooked().unwrap();
        assert_eq!(cooked.len(), 2);
        let base = (82.0 + 164.0) * MV_PER_BIN / 4.0;
        assert_approx_eq!(cooked[0].base_mv, base, 1e-4);
        assert_approx_eq!(cooked[0].peak_mv, 164.0 * MV_PER_BIN - base, 1e-4);
        assert_eq!(cooked[0].peak_sample, 2);
        assert_approx_eq!(cooked[0].start_s, 0.0, 1e-12);
        assert_approx_eq!(cooked[1].base_mv, 8.0 * MV_PER_BIN, 1e-4);
        assert_approx_eq!(cooked[1].start_s, 1e-6, 1e-9);
        assert_eq!(cooked[1].peak_sample, 3);

        let daq = store.read_metadata().unwrap().daq.unwrap();
        assert_eq!(daq.missed_events, 0);
        assert_approx_eq!(daq.mean_trigger_frequency_khz, 1000.0, 1e-6);

        fs::remove_dir_all(store.dir()).unwrap();
    }

    #[test]
    fn max_events_limits_and_clamps() {
        let events: Vec<_> = (1..=5)
            .map(|counter| event(counter, counter * 10, vec![8192; 8]))
            .collect();
        let store = raw_store("max-events", &events);

        cook_run(&store.raw_path(), &options(Polarity::Negative, Some(3))).unwrap();
        assert_eq!(store.read_cooked().unwrap().len(), 3);

        cook_run(&store.cooked_path(), &options(Polarity::Negative, Some(50))).unwrap();
        assert_eq!(store.read_cooked().unwrap().len(), 5);

        fs::remove_dir_all(store.dir()).unwrap();
    }

    #[test]
    fn empty_run() {
        let store = raw_store("empty", &[]);
        let metadata = cook_run(&store.raw_path(), &options(Polarity::Negative, None)).unwrap();
        assert_eq!(metadata.num_samples, 0);
        assert!(store.read_cooked().unwrap().is_empty());
        fs::remove_dir_all(store.dir()).unwrap();
    }

    #[test]
    fn missing_store() {
        let path = env::temp_dir().join("cook-raw-missing/Run_0_PMT_0_Loc_0_Test_A.raw");
        assert!(matches!(
            cook_run(&path, &options(Polarity::Negative, None)),
            Err(StoreError::Io { .. })
        ));
    }
}
