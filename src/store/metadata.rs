//! Per-fragment frame metadata.
//!
//! The feeder records every frame it hands to the encoder, and the store
//! takes everything recorded so far each time a fragment lands on disk. The
//! two sides share one record behind a mutex; the drain keeps a second
//! record and swaps it in, so the lock is held only for a pointer swap and
//! serialization happens outside it.

use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;
use std::time::Duration;

/// Frames fed since the previous flush, in feed order.
///
/// Serializes as a JSON object mapping elapsed seconds (6 decimals) to the
/// frame id, e.g. `{"0.033333": "b.png"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    entries: Vec<(Duration, String)>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, elapsed: Duration, id: impl Into<String>) {
        self.entries.push((elapsed, id.into()));
    }

    pub fn entries(&self) -> &[(Duration, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// JSON bytes as written to the sidecar.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl Serialize for MetadataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (elapsed, id) in &self.entries {
            map.serialize_entry(&format_seconds(*elapsed), id)?;
        }
        map.end()
    }
}

fn format_seconds(elapsed: Duration) -> String {
    format!("{:.6}", elapsed.as_secs_f64())
}

/// Create a connected recorder/drain pair.
pub fn ledger() -> (FrameRecorder, FrameDrain) {
    let active = Arc::new(Mutex::new(MetadataRecord::new()));
    (
        FrameRecorder {
            active: Arc::clone(&active),
        },
        FrameDrain {
            active,
            flushing: MetadataRecord::new(),
        },
    )
}

/// Write side of the ledger, owned by the feeder.
#[derive(Debug)]
pub struct FrameRecorder {
    active: Arc<Mutex<MetadataRecord>>,
}

impl FrameRecorder {
    pub fn record(&self, elapsed: Duration, id: &str) {
        self.active.lock().push(elapsed, id);
    }
}

/// Read side of the ledger, owned by the chunk store.
#[derive(Debug)]
pub struct FrameDrain {
    active: Arc<Mutex<MetadataRecord>>,
    flushing: MetadataRecord,
}

impl FrameDrain {
    /// Take everything recorded since the previous drain.
    ///
    /// The returned record stays valid until the next call.
    pub fn drain(&mut self) -> &MetadataRecord {
        self.flushing.clear();
        std::mem::swap(&mut *self.active.lock(), &mut self.flushing);
        &self.flushing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keys_are_seconds() {
        let mut record = MetadataRecord::new();
        record.push(Duration::ZERO, "a.png");
        record.push(Duration::from_micros(33_333), "b.png");
        record.push(Duration::from_millis(1500), "c.png");

        let json: serde_json::Value = serde_json::from_slice(&record.to_json().unwrap()).unwrap();
        assert_eq!(json["0.000000"], "a.png");
        assert_eq!(json["0.033333"], "b.png");
        assert_eq!(json["1.500000"], "c.png");
    }

    #[test]
    fn test_json_preserves_feed_order() {
        let mut record = MetadataRecord::new();
        record.push(Duration::from_secs(10), "x.png");
        record.push(Duration::from_secs(11), "y.png");

        let text = String::from_utf8(record.to_json().unwrap()).unwrap();
        assert_eq!(text, r#"{"10.000000":"x.png","11.000000":"y.png"}"#);
    }

    #[test]
    fn test_empty_record_is_empty_object() {
        assert_eq!(MetadataRecord::new().to_json().unwrap(), b"{}");
    }

    #[test]
    fn test_drain_takes_and_resets() {
        let (recorder, mut drain) = ledger();
        recorder.record(Duration::ZERO, "a.png");
        recorder.record(Duration::from_millis(33), "b.png");

        let first = drain.drain().clone();
        assert_eq!(first.len(), 2);
        assert_eq!(first.entries()[1].1, "b.png");

        recorder.record(Duration::from_millis(66), "c.png");
        let second = drain.drain();
        assert_eq!(second.len(), 1);
        assert_eq!(second.entries()[0].1, "c.png");

        assert!(drain.drain().is_empty());
    }

    #[test]
    fn test_recorder_on_another_thread() {
        let (recorder, mut drain) = ledger();
        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                recorder.record(Duration::from_millis(i), "f.png");
            }
        });
        handle.join().unwrap();

        assert_eq!(drain.drain().len(), 100);
    }
}
