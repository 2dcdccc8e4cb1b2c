use std::mem;

use crate::samples::LogEntry;

/// Samples accumulated between flush events.
///
/// Bounded in time rather than size: the uploader drains it once per interval,
/// so it never grows past one interval's worth of motion samples. The owning
/// runtime serializes appends and drains behind its own mutex, which makes a
/// plain swap a complete flush: either a sample was appended before the drain
/// and is captured, or it lands in the fresh buffer.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    entries: Vec<LogEntry>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Capture the current contents and leave the buffer empty.
    pub fn drain_all(&mut self) -> Vec<LogEntry> {
        mem::take(&mut self.entries)
    }

    /// Drop buffered samples without flushing them (pause semantics).
    pub fn discard(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(y: f64) -> LogEntry {
        LogEntry {
            x: 0.0,
            y,
            z: 9.8,
            timestamp: 0,
            latitude: 0.0,
            longitude: 0.0,
            speed: 20.0,
            vehicle_type: "car".to_string(),
        }
    }

    #[test]
    fn test_drain_all_empties_buffer() {
        let mut buffer = SampleBuffer::new();
        buffer.append(entry(1.0));
        buffer.append(entry(2.0));
        buffer.append(entry(3.0));

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].y, 1.0);
        assert_eq!(drained[2].y, 3.0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_empty_is_empty() {
        let mut buffer = SampleBuffer::new();
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn test_discard_drops_contents() {
        let mut buffer = SampleBuffer::new();
        buffer.append(entry(1.0));
        buffer.discard();
        assert!(buffer.is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn test_append_after_drain() {
        let mut buffer = SampleBuffer::new();
        buffer.append(entry(1.0));
        buffer.drain_all();
        buffer.append(entry(2.0));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.drain_all()[0].y, 2.0);
    }
}
