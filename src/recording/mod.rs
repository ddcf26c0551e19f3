// Recording modules

pub mod clip;
pub mod preroll;
pub mod session;
pub mod storage;

pub use clip::{ClipError, ClipRequest, ClipWriter, GstClipWriter, SavedClip};
pub use preroll::FramePrerollBuffer;
pub use session::{FinishReason, FinishedSession, RecordingStateMachine, Transition};
pub use storage::{ArtifactPaths, ClipStorage};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Whether a camera currently has an open session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Idle,
    Recording,
}

/// What happened to a finished session
#[derive(Debug)]
pub enum SessionOutcome {
    /// Snapshot and clip were written
    Saved {
        clip: SavedClip,
        frames: usize,
        duration: Duration,
    },
    /// Confirmation was required and never happened
    Discarded { frames: usize, duration: Duration },
    /// Writing failed; nothing usable was kept
    Failed {
        error: ClipError,
        frames: usize,
        duration: Duration,
    },
}

/// Write a finished session, or drop it if it was never confirmed
pub fn persist(
    finished: &FinishedSession,
    writer: &mut dyn ClipWriter,
    snapshot_index: usize,
) -> SessionOutcome {
    let frames = finished.frames.len();
    let duration = finished.duration;

    if !finished.keep {
        return SessionOutcome::Discarded { frames, duration };
    }

    let request = ClipRequest {
        frames: &finished.frames,
        snapshot_index,
        started_at: finished.started_wall,
        duration,
    };

    match writer.write(&request) {
        Ok(clip) => SessionOutcome::Saved {
            clip,
            frames,
            duration,
        },
        Err(error) => SessionOutcome::Failed {
            error,
            frames,
            duration,
        },
    }
}
