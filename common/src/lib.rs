pub mod calibration;
pub mod cooked;
pub mod file_name;
pub mod frame;
pub mod metadata;
pub mod store;
pub mod tracer;

/// A raw digitiser reading, as stored in the wire format.
pub type Adc = i16;
/// Index of a sample within one waveform.
pub type SampleIndex = usize;
/// The digitiser's event counter (header word 4).
pub type EventCounter = u32;
/// Voltage, in millivolts, as stored in cooked records.
pub type Millivolts = f32;
/// Working precision of the numerical routines.
pub type Real = f64;

/// The duration of the window at the start of each waveform used to estimate the baseline.
pub const BASELINE_WINDOW_NS: Real = 50.0;

pub use calibration::{Calibration, Polarity};
pub use cooked::CookedEvent;
pub use file_name::{FileId, RunIdentity};
pub use frame::{EventHeader, FrameAnomalies, FrameReader, RawEvent};
pub use metadata::{AcquisitionSettings, DaqSummary, Digitiser, RunContext, RunMetadata};
pub use store::{RawRunSummary, RunStore, StoreError};
