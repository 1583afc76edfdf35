//! Framing of the digitiser's binary event stream.
//!
//! Each frame is a header of six little-endian `u32` words followed by
//! `(event_size - 24) / 2` little-endian `i16` samples.
use crate::{Adc, EventCounter};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::{debug, warn};

pub const HEADER_WORDS: usize = 6;
pub const HEADER_BYTES: usize = HEADER_WORDS * size_of::<u32>();
const SAMPLE_BYTES: usize = size_of::<Adc>();

/// Upper bound on the buffer reserved ahead of a read, the buffer grows past this only as bytes arrive.
const MAX_PREALLOCATION: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub event_size: u32,
    pub board_id: u32,
    pub pattern: u32,
    pub channel: u32,
    pub event_counter: EventCounter,
    pub trigger_time_tag: u32,
}

impl EventHeader {
    fn from_words(words: [u32; HEADER_WORDS]) -> Self {
        let [
            event_size,
            board_id,
            pattern,
            channel,
            event_counter,
            trigger_time_tag,
        ] = words;
        Self {
            event_size,
            board_id,
            pattern,
            channel,
            event_counter,
            trigger_time_tag,
        }
    }

    fn to_words(self) -> [u32; HEADER_WORDS] {
        [
            self.event_size,
            self.board_id,
            self.pattern,
            self.channel,
            self.event_counter,
            self.trigger_time_tag,
        ]
    }

    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut words = [0u32; HEADER_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(size_of::<u32>())) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self::from_words(words)
    }

    /// The number of samples declared by this header.
    /// Returns `None` if the declared size cannot describe a whole frame.
    pub fn num_samples(&self) -> Option<usize> {
        let size = self.event_size as usize;
        let payload = size.checked_sub(HEADER_BYTES)?;
        (payload % SAMPLE_BYTES == 0).then_some(payload / SAMPLE_BYTES)
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub header: EventHeader,
    pub samples: Vec<Adc>,
}

impl RawEvent {
    /// Creates an event whose header size field agrees with the number of samples.
    pub fn new(header: EventHeader, samples: Vec<Adc>) -> Self {
        let event_size = (HEADER_BYTES + SAMPLE_BYTES * samples.len()) as u32;
        Self {
            header: EventHeader {
                event_size,
                ..header
            },
            samples,
        }
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<(), io::Error> {
        for word in self.header.to_words() {
            writer.write_all(&word.to_le_bytes())?;
        }
        for sample in &self.samples {
            writer.write_all(&sample.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_BYTES + SAMPLE_BYTES * self.samples.len());
        for word in self.header.to_words() {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// Problems found while reading a stream which did not stop the reader.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameAnomalies {
    /// Frames whose sample count differed from the first frame's, these are discarded.
    pub sample_count_mismatches: usize,
    pub truncated_trailing_frame: bool,
    pub invalid_frame_size: bool,
    /// The final frame repeated the previous event counter and was discarded.
    pub duplicate_trailing_frame: bool,
}

impl FrameAnomalies {
    /// A duplicate trailing frame is the normal signature of reading past the end of a capture,
    /// so it alone does not make a run suspect.
    pub fn is_suspect(&self) -> bool {
        self.sample_count_mismatches > 0 || self.truncated_trailing_frame || self.invalid_frame_size
    }
}

/// Lazily decodes frames from a byte stream.
///
/// The first frame fixes the number of samples for the run. The reader stops at the end
/// of the stream, or when a frame repeats the previous frame's event counter.
pub struct FrameReader<R> {
    reader: R,
    num_samples: Option<usize>,
    previous_counter: Option<EventCounter>,
    anomalies: FrameAnomalies,
    frames_read: usize,
    finished: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            num_samples: None,
            previous_counter: None,
            anomalies: Default::default(),
            frames_read: 0,
            finished: false,
        }
    }

    /// The number of samples per event, once the first frame has been read.
    pub fn num_samples(&self) -> Option<usize> {
        self.num_samples
    }

    pub fn anomalies(&self) -> &FrameAnomalies {
        &self.anomalies
    }

    /// Total number of complete frames read, including discarded ones.
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    fn load_bytes(&mut self, len: usize) -> Result<Vec<u8>, io::Error> {
        let mut bytes = Vec::with_capacity(len.min(MAX_PREALLOCATION));
        self.reader
            .by_ref()
            .take(len as u64)
            .read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn read_frame(&mut self) -> Result<Option<RawEvent>, FrameError> {
        loop {
            let header_bytes = self.load_bytes(HEADER_BYTES)?;
            if header_bytes.is_empty() {
                return Ok(None);
            }
            if header_bytes.len() < HEADER_BYTES {
                warn!(
                    "Truncated header after frame {}: expected {HEADER_BYTES} bytes, got {}.",
                    self.frames_read,
                    header_bytes.len()
                );
                self.anomalies.truncated_trailing_frame = true;
                return Ok(None);
            }
            let header = EventHeader::from_le_bytes(&header_bytes);

            let Some(num_samples) = header.num_samples() else {
                warn!(
                    "Invalid event size {} after frame {}, stopping.",
                    header.event_size, self.frames_read
                );
                self.anomalies.invalid_frame_size = true;
                return Ok(None);
            };

            let expected_bytes = num_samples * SAMPLE_BYTES;
            let sample_bytes = self.load_bytes(expected_bytes)?;
            if sample_bytes.len() < expected_bytes {
                warn!(
                    "Truncated frame after frame {}: expected {expected_bytes} sample bytes, got {}.",
                    self.frames_read,
                    sample_bytes.len()
                );
                self.anomalies.truncated_trailing_frame = true;
                return Ok(None);
            }
            self.frames_read += 1;

            if self.previous_counter == Some(header.event_counter) {
                debug!(
                    "Event counter {} repeated, discarding trailing frame.",
                    header.event_counter
                );
                self.anomalies.duplicate_trailing_frame = true;
                return Ok(None);
            }

            let expected_samples = *self.num_samples.get_or_insert(num_samples);
            if num_samples != expected_samples {
                warn!(
                    "Event {} has {num_samples} samples, expected {expected_samples}. Frame discarded.",
                    header.event_counter
                );
                self.anomalies.sample_count_mismatches += 1;
                continue;
            }

            self.previous_counter = Some(header.event_counter);
            let samples = sample_bytes
                .chunks_exact(SAMPLE_BYTES)
                .map(|chunk| Adc::from_le_bytes([chunk[0], chunk[1]]))
                .collect();
            return Ok(Some(RawEvent { header, samples }));
        }
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<RawEvent, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_frame() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(counter: EventCounter, time_tag: u32, samples: Vec<Adc>) -> RawEvent {
        RawEvent::new(
            EventHeader {
                board_id: 1,
                pattern: 0,
                channel: 0,
                event_counter: counter,
                trigger_time_tag: time_tag,
                ..Default::default()
            },
            samples,
        )
    }

    fn stream(events: &[RawEvent]) -> Vec<u8> {
        events.iter().flat_map(RawEvent::to_bytes).collect()
    }

    fn read_all(bytes: &[u8]) -> (Vec<RawEvent>, FrameAnomalies) {
        let mut reader = FrameReader::new(bytes);
        let events = reader
            .by_ref()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        (events, reader.anomalies().clone())
    }

    #[test]
    fn header_size_matches_samples() {
        let event = event(1, 0, vec![1, 2, 3, 4]);
        assert_eq!(event.header.event_size, 32);
        assert_eq!(event.header.num_samples(), Some(4));
    }

    #[test]
    fn invalid_sizes() {
        let mut header = EventHeader::default();
        header.event_size = 23;
        assert_eq!(header.num_samples(), None);
        header.event_size = 27;
        assert_eq!(header.num_samples(), None);
        header.event_size = 24;
        assert_eq!(header.num_samples(), Some(0));
    }

    #[test]
    fn encode_then_decode() {
        let events = vec![
            event(1, 100, vec![-3, 0, 16383, i16::MIN]),
            event(2, 200, vec![7, 8, 9, i16::MAX]),
        ];
        let mut bytes = Vec::new();
        for event in &events {
            event.encode(&mut bytes).unwrap();
        }
        assert_eq!(bytes, stream(&events));

        let (decoded, anomalies) = read_all(&bytes);
        assert_eq!(decoded, events);
        assert!(!anomalies.is_suspect());
    }

    #[test]
    fn empty_stream() {
        let (decoded, anomalies) = read_all(&[]);
        assert!(decoded.is_empty());
        assert_eq!(anomalies, FrameAnomalies::default());
    }

    #[test]
    fn duplicate_trailing_frame_discarded() {
        let events = vec![
            event(1, 100, vec![1, 2, 3, 4]),
            event(2, 200, vec![5, 6, 7, 8]),
            event(2, 200, vec![5, 6, 7, 8]),
        ];
        let (decoded, anomalies) = read_all(&stream(&events));
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].header.event_counter, 2);
        assert!(anomalies.duplicate_trailing_frame);
        assert!(!anomalies.is_suspect());
    }

    #[test]
    fn reader_stops_at_duplicate() {
        let events = vec![
            event(1, 100, vec![1, 2]),
            event(1, 100, vec![1, 2]),
            event(2, 200, vec![3, 4]),
        ];
        let (decoded, _) = read_all(&stream(&events));
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn sample_count_change_is_flagged() {
        let events = vec![
            event(1, 100, vec![1, 2, 3, 4]),
            event(2, 200, vec![1, 2, 3, 4, 5, 6]),
            event(3, 300, vec![5, 6, 7, 8]),
        ];
        let bytes = stream(&events);
        let mut reader = FrameReader::new(bytes.as_slice());
        let decoded = reader.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].header.event_counter, 3);
        assert!(decoded.iter().all(|e| e.num_samples() == 4));
        assert_eq!(reader.num_samples(), Some(4));
        assert_eq!(reader.frames_read(), 3);
        assert_eq!(reader.anomalies().sample_count_mismatches, 1);
        assert!(reader.anomalies().is_suspect());
    }

    #[test]
    fn truncated_trailing_frame() {
        let mut bytes = stream(&[event(1, 100, vec![1, 2, 3, 4]), event(2, 200, vec![5, 6, 7, 8])]);
        bytes.truncate(bytes.len() - 3);
        let (decoded, anomalies) = read_all(&bytes);
        assert_eq!(decoded.len(), 1);
        assert!(anomalies.truncated_trailing_frame);
        assert!(anomalies.is_suspect());

        bytes.truncate(32 + 10);
        let (decoded, anomalies) = read_all(&bytes);
        assert_eq!(decoded.len(), 1);
        assert!(anomalies.truncated_trailing_frame);
    }

    #[test]
    fn invalid_size_stops_reader() {
        let mut bytes = stream(&[event(1, 100, vec![1, 2])]);
        let mut bad = event(2, 200, vec![3, 4]).to_bytes();
        bad[0] = 25;
        bytes.extend(bad);
        let (decoded, anomalies) = read_all(&bytes);
        assert_eq!(decoded.len(), 1);
        assert!(anomalies.invalid_frame_size);
    }
}
