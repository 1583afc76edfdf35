use pmt_common::{DaqSummary, EventCounter, Real};
use tracing::{debug, warn};

/// Tracks gaps in the event counter and the trigger rate over a run.
#[derive(Default, Debug)]
pub(crate) struct DaqMonitor {
    previous_counter: Option<EventCounter>,
    previous_time_s: Option<Real>,
    missed_events: u64,
    counter_regressions: u64,
    frequency_sum_khz: Real,
    num_intervals: usize,
    elapsed_s: Real,
}

impl DaqMonitor {
    pub(crate) fn record(&mut self, counter: EventCounter, time_s: Real) {
        if let Some(previous) = self.previous_counter {
            let delta = i64::from(counter) - i64::from(previous);
            if delta > 1 {
                self.missed_events += (delta - 1) as u64;
                debug!("{} missed events", self.missed_events);
            } else if delta < 1 {
                self.counter_regressions += 1;
                warn!("Event counter went from {previous} to {counter}");
            }
        }
        if let Some(previous_s) = self.previous_time_s {
            let interval_s = time_s - previous_s;
            if interval_s > 0.0 {
                self.frequency_sum_khz += 1.0 / interval_s / 1000.0;
                self.num_intervals += 1;
            }
        }
        self.previous_counter = Some(counter);
        self.previous_time_s = Some(time_s);
        self.elapsed_s = time_s;
    }

    pub(crate) fn summary(&self, wrap_count: u32) -> DaqSummary {
        DaqSummary {
            missed_events: self.missed_events,
            counter_regressions: self.counter_regressions,
            wrap_count,
            elapsed_s: self.elapsed_s,
            mean_trigger_frequency_khz: if self.num_intervals == 0 {
                0.0
            } else {
                self.frequency_sum_khz / self.num_intervals as Real
            },
        }
    }
}
