// Recording state machine
//
// IDLE → RECORDING when motion appears; RECORDING appends every decoded frame
// until no motion has been seen for the post-record window, then finalizes.
// Finalization also happens when frames stop arriving altogether (stall).
//
// Time is passed in explicitly so transitions are deterministic under test.

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use super::preroll::FramePrerollBuffer;
use crate::detection::{ConfirmationFilter, MotionSample};
use crate::video::DecodedFrame;

/// An open motion event
pub struct RecordingSession {
    frames: Vec<DecodedFrame>,
    started_at: Instant,
    started_wall: DateTime<Local>,
    last_motion: Instant,
    confirmed: bool,
}

impl RecordingSession {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Post-roll window elapsed while frames kept arriving
    PostRoll,
    /// No frames arrived for the post-roll window
    Stall,
}

/// A closed session waiting to be written or dropped
pub struct FinishedSession {
    pub frames: Vec<DecodedFrame>,
    pub started_wall: DateTime<Local>,
    /// Wall-clock length of the event, independent of frame count
    pub duration: Duration,
    pub confirmed: bool,
    /// False when confirmation was required and never happened
    pub keep: bool,
    pub reason: FinishReason,
}

/// What a step did
pub enum Transition {
    /// No session open, none started
    Idle,
    /// Motion opened a session seeded with `preroll` buffered frames
    Started { preroll: usize },
    /// Frame appended to the open session
    Continued,
    /// The open session closed
    Finished(FinishedSession),
}

/// Ring buffer plus at most one open session
pub struct RecordingStateMachine {
    camera: String,
    ring: FramePrerollBuffer,
    session: Option<RecordingSession>,
    post_record: Duration,
    require_confirmation: bool,
    confirmation: ConfirmationFilter,
}

impl RecordingStateMachine {
    pub fn new(
        camera: impl Into<String>,
        ring_capacity: usize,
        post_record: Duration,
        require_confirmation: bool,
        confirmation: ConfirmationFilter,
    ) -> Self {
        Self {
            camera: camera.into(),
            ring: FramePrerollBuffer::new(ring_capacity),
            session: None,
            post_record,
            require_confirmation,
            confirmation,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn ring(&self) -> &FramePrerollBuffer {
        &self.ring
    }

    /// Feed one decoded frame with its motion result
    pub fn step(&mut self, frame: DecodedFrame, motion: MotionSample, now: Instant) -> Transition {
        let transition = match self.session.as_mut() {
            None if motion.is_motion => {
                let mut frames = self.ring.snapshot();
                let preroll = frames.len();
                frames.push(frame.clone());

                log::info!(
                    "[{}] Motion detected (area={:.0}), recording with {} pre-roll frames",
                    self.camera,
                    motion.area,
                    preroll
                );

                let mut session = RecordingSession {
                    frames,
                    started_at: now,
                    started_wall: Local::now(),
                    last_motion: now,
                    confirmed: false,
                };
                confirm_session(
                    &mut self.confirmation,
                    self.require_confirmation,
                    &self.camera,
                    &mut session,
                    &frame,
                );
                self.session = Some(session);
                Transition::Started { preroll }
            }
            None => Transition::Idle,
            Some(session) => {
                session.frames.push(frame.clone());
                if motion.is_motion {
                    session.last_motion = now;
                    confirm_session(
                        &mut self.confirmation,
                        self.require_confirmation,
                        &self.camera,
                        session,
                        &frame,
                    );
                    Transition::Continued
                } else if now.saturating_duration_since(session.last_motion) >= self.post_record {
                    self.finish(now, FinishReason::PostRoll)
                } else {
                    Transition::Continued
                }
            }
        };

        self.ring.push(frame);
        transition
    }

    /// Check for a stalled session when no frame is available.
    /// Returns the finished session if the post-roll window has elapsed.
    pub fn check_stall(&mut self, now: Instant) -> Option<FinishedSession> {
        let session = self.session.as_ref()?;
        if now.saturating_duration_since(session.last_motion) < self.post_record {
            return None;
        }
        match self.finish(now, FinishReason::Stall) {
            Transition::Finished(finished) => Some(finished),
            _ => None,
        }
    }

    /// Drop any open session without finalizing it
    pub fn abandon(&mut self) -> Option<usize> {
        self.session.take().map(|s| s.frames.len())
    }

    fn finish(&mut self, now: Instant, reason: FinishReason) -> Transition {
        let Some(session) = self.session.take() else {
            return Transition::Idle;
        };

        let keep = !self.require_confirmation || session.confirmed;
        Transition::Finished(FinishedSession {
            duration: now.saturating_duration_since(session.started_at),
            frames: session.frames,
            started_wall: session.started_wall,
            confirmed: session.confirmed,
            keep,
            reason,
        })
    }
}

/// Query the filter for a motion frame of an unconfirmed session.
/// Confirmation is sticky: a confirmed session is never queried again.
fn confirm_session(
    filter: &mut ConfirmationFilter,
    required: bool,
    camera: &str,
    session: &mut RecordingSession,
    frame: &DecodedFrame,
) {
    if !required || session.confirmed {
        return;
    }
    let result = filter.check(&frame.image);
    if !result.found {
        return;
    }
    session.confirmed = true;
    match result.label.as_deref() {
        Some(label) => log::info!("[{}] Confirmed: found {} ({:.2})", camera, label, result.confidence),
        None => log::info!("[{}] Confirmed (no classifier filtering)", camera),
    }
}
