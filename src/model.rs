//! Row types shared by the write pipeline and the read side.

use serde::{Deserialize, Serialize};

/// One bounding box for one tracked object in one frame.
///
/// Coordinates are frame pixels. The producer is trusted to supply
/// `xmin < xmax` and `ymin < ymax`; storage does not check it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub track_id: i64,
    pub frame_id: i64,
    pub class_name: String,
    pub confidence: f64,
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// A run as seen by readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: i64,
    pub started_at: String,
    pub frame_width: Option<i64>,
    pub frame_height: Option<i64>,
}

/// Distinct track ids observed in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackIds {
    pub run_id: i64,
    pub track_ids: Vec<i64>,
}

/// One box of a track, keyed by frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub frame_id: i64,
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Frame size a track's coordinates refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub w: Option<i64>,
    pub h: Option<i64>,
}

/// A track's boxes in frame order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub run_id: i64,
    pub track_id: i64,
    pub image: ImageSize,
    pub points: Vec<TrackPoint>,
}
