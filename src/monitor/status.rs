// Per-camera counters and status snapshots
//
// Written by the receiver and processor threads, read by the status reporter.
// Values are advisory; nothing in the pipeline makes decisions from them.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;

/// Connection state of a camera pipeline
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Pipeline created, threads not yet running
    Starting,
    /// Opening the HTTPS stream
    Connecting,
    /// Receiving parts
    Streaming,
    /// Waiting out the backoff after a disconnect
    Reconnecting,
    /// Last connection attempt failed
    Failed,
    /// Stream ended with a read error
    Error,
    /// Pipeline shut down
    Stopped,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Live counters for one camera
pub struct CameraStats {
    name: String,
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
    last_motion: Mutex<Option<(Instant, DateTime<Local>)>>,
    recording: AtomicBool,
    chunks_received: AtomicU64,
    chunks_dropped: AtomicU64,
    frames_decoded: AtomicU64,
    decode_failures: AtomicU64,
    clips_saved: AtomicU64,
    clips_discarded: AtomicU64,
    clips_failed: AtomicU64,
    reconnects: AtomicU64,
}

impl CameraStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ConnectionState::Starting),
            last_error: Mutex::new(None),
            last_motion: Mutex::new(None),
            recording: AtomicBool::new(false),
            chunks_received: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            clips_saved: AtomicU64::new(0),
            clips_discarded: AtomicU64::new(0),
            clips_failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set_error(&self, error: impl Into<String>) {
        *self.last_error.lock() = Some(error.into());
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::Relaxed);
    }

    pub fn mark_motion(&self) {
        *self.last_motion.lock() = Some((Instant::now(), Local::now()));
    }

    pub fn chunk_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clip_saved(&self) {
        self.clips_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clip_discarded(&self) {
        self.clips_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clip_failed(&self) {
        self.clips_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let last_motion = *self.last_motion.lock();
        StatusSnapshot {
            camera: self.name.clone(),
            state: self.state(),
            recording: self.recording.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            clips_saved: self.clips_saved.load(Ordering::Relaxed),
            clips_discarded: self.clips_discarded.load(Ordering::Relaxed),
            clips_failed: self.clips_failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            last_motion_at: last_motion.map(|(_, wall)| wall),
            since_last_motion: last_motion.map(|(at, _)| at.elapsed()),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Point-in-time view of one camera
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub camera: String,
    pub state: ConnectionState,
    pub recording: bool,
    pub chunks_received: u64,
    pub chunks_dropped: u64,
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub clips_saved: u64,
    pub clips_discarded: u64,
    pub clips_failed: u64,
    pub reconnects: u64,
    pub last_motion_at: Option<DateTime<Local>>,
    pub since_last_motion: Option<Duration>,
    pub last_error: Option<String>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}{} | chunks={} dropped={} decoded={} decode_failures={} | clips saved={} discarded={} failed={}",
            self.camera,
            self.state,
            if self.recording { " (recording)" } else { "" },
            self.chunks_received,
            self.chunks_dropped,
            self.frames_decoded,
            self.decode_failures,
            self.clips_saved,
            self.clips_discarded,
            self.clips_failed,
        )?;
        match self.since_last_motion {
            Some(elapsed) => write!(f, " | last motion {}s ago", elapsed.as_secs()),
            None => write!(f, " | no motion yet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = CameraStats::new("front");
        stats.set_state(ConnectionState::Streaming);
        stats.chunk_received();
        stats.chunk_received();
        stats.chunk_dropped();
        stats.clip_saved();
        stats.set_recording(true);

        let snap = stats.snapshot();
        assert_eq!(snap.state, ConnectionState::Streaming);
        assert_eq!(snap.chunks_received, 2);
        assert_eq!(snap.chunks_dropped, 1);
        assert_eq!(snap.clips_saved, 1);
        assert!(snap.recording);
        assert!(snap.since_last_motion.is_none());

        let line = snap.to_string();
        assert!(line.starts_with("[front] streaming (recording)"));
        assert!(line.ends_with("no motion yet"));
    }

    #[test]
    fn motion_time_is_tracked() {
        let stats = CameraStats::new("yard");
        stats.mark_motion();
        let snap = stats.snapshot();
        assert!(snap.last_motion_at.is_some());
        assert!(snap.since_last_motion.unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn state_names_are_lowercase() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Stopped.to_string(), "stopped");
    }
}
