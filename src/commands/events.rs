//! Events streamed from the batch worker to whoever is watching it
//!
//! Events carry paths and counters only, never sample data.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProcessingEvent {
    /// A file is about to be processed
    Started { path: PathBuf },
    /// `index` of `total` files have been attempted
    Progress { index: usize, total: usize },
    /// A file failed and was skipped
    Error { path: PathBuf, message: String },
    /// The worker has exited
    Finished {
        processed: usize,
        total: usize,
        cancelled: bool,
    },
}

/// Destination for events emitted by a run
pub trait EventSink {
    fn emit(&self, event: ProcessingEvent);
}

impl EventSink for Sender<ProcessingEvent> {
    fn emit(&self, event: ProcessingEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_with_type_tag() {
        let json = serde_json::to_value(ProcessingEvent::Progress { index: 3, total: 10 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "progress", "index": 3, "total": 10}));

        let json = serde_json::to_value(ProcessingEvent::Error {
            path: PathBuf::from("in/a.wav"),
            message: "Error processing a.wav: Decode error: bad".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["path"], "in/a.wav");

        let json = serde_json::to_value(ProcessingEvent::Finished {
            processed: 2,
            total: 2,
            cancelled: false,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "finished", "processed": 2, "total": 2, "cancelled": false})
        );
    }
}
