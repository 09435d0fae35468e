//! Video fragment model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A contiguous run of frames carrying exactly one watermark key.
///
/// Frame range is half-open: `[start_frame, end_frame)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VideoFragment {
    /// Dense 0-based fragment index
    pub index: usize,
    /// First frame (inclusive)
    pub start_frame: u64,
    /// Last frame (exclusive)
    pub end_frame: u64,
    /// Position of the assigned key in the job's key list
    pub key_index: usize,
    /// Assigned key value
    pub assigned_key: i64,
}

impl VideoFragment {
    /// Number of frames in this fragment.
    pub fn frame_count(&self) -> u64 {
        self.end_frame - self.start_frame
    }

    /// Whether `frame` falls inside this fragment.
    pub fn contains(&self, frame: u64) -> bool {
        frame >= self.start_frame && frame < self.end_frame
    }
}
