//! Newline-delimited JSON ingestion.
//!
//! Each line is one event:
//!
//! ```text
//! {"type":"frame","frame_id":1,"width":1920,"height":1080}
//! {"type":"detection","track_id":1,"frame_id":1,"class_name":"car","confidence":0.7,"xmin":100,"ymin":100,"xmax":300,"ymax":300}
//! ```
//!
//! Frames are registered synchronously, detections are queued.

use serde::{Deserialize, Serialize};
use std::io::BufRead;
use thiserror::Error;

use crate::model::Detection;
use crate::storage::{DetectionStore, StoreError};

/// One input line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestEvent {
    Frame { frame_id: i64, width: u32, height: u32 },
    Detection(Detection),
}

/// What an ingestion pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub frames: u64,
    pub detections: u64,
    /// Frames the store refused (e.g. duplicates).
    pub rejected_frames: u64,
    /// Lines that were not valid events.
    pub malformed: u64,
}

/// Error type for ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read events from `reader` until EOF and apply them to `store`.
///
/// Malformed lines and refused frames are logged and counted. Stops with an
/// error when the input fails or the store is closed.
pub fn ingest<R: BufRead>(store: &DetectionStore, reader: R) -> Result<IngestSummary, IngestError> {
    let mut summary = IngestSummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<IngestEvent>(line) {
            Ok(IngestEvent::Frame {
                frame_id,
                width,
                height,
            }) => match store.record_frame(frame_id, width, height) {
                Ok(()) => summary.frames += 1,
                Err(e @ StoreError::Registration { .. }) => {
                    tracing::warn!(line = index + 1, error = %e, "Frame rejected");
                    summary.rejected_frames += 1;
                }
                Err(e) => return Err(e.into()),
            },
            Ok(IngestEvent::Detection(detection)) => {
                store.enqueue_detection(detection)?;
                summary.detections += 1;
            }
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping malformed event");
                summary.malformed += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_parse_events() {
        let frame: IngestEvent =
            serde_json::from_str(r#"{"type":"frame","frame_id":3,"width":640,"height":480}"#)
                .unwrap();
        assert_eq!(
            frame,
            IngestEvent::Frame {
                frame_id: 3,
                width: 640,
                height: 480
            }
        );

        let detection: IngestEvent = serde_json::from_str(
            r#"{"type":"detection","track_id":4,"frame_id":3,"class_name":"bus",
                "confidence":0.25,"xmin":1,"ymin":2,"xmax":3.5,"ymax":4}"#,
        )
        .unwrap();
        match detection {
            IngestEvent::Detection(d) => {
                assert_eq!(d.track_id, 4);
                assert_eq!(d.class_name, "bus");
                assert_eq!(d.xmax, 3.5);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_ingest_counts_and_skips() {
        let temp_dir = TempDir::new().unwrap();
        let store = DetectionStore::open_path(temp_dir.path().join("ingest.db")).unwrap();

        let input = r#"
{"type":"frame","frame_id":1,"width":1920,"height":1080}
{"type":"detection","track_id":1,"frame_id":1,"class_name":"car","confidence":0.7,"xmin":100,"ymin":100,"xmax":300,"ymax":300}
not json
{"type":"frame","frame_id":1,"width":1920,"height":1080}
{"type":"detection","track_id":2,"frame_id":1,"class_name":"person","confidence":0.9,"xmin":10,"ymin":10,"xmax":20,"ymax":40}
"#;
        let summary = ingest(&store, Cursor::new(input)).unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                frames: 1,
                detections: 2,
                rejected_frames: 1,
                malformed: 1,
            }
        );

        let stats = store.close().unwrap();
        assert_eq!(stats.rows_committed, 2);
    }

    #[test]
    fn test_ingest_after_close_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = DetectionStore::open_path(temp_dir.path().join("ingest.db")).unwrap();
        store.close().unwrap();

        let input = r#"{"type":"frame","frame_id":1,"width":1,"height":1}"#;
        let err = ingest(&store, Cursor::new(input)).unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::Closed)));
    }
}
