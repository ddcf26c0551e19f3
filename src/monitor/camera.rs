// Per-camera capture pipeline
//
// receiver thread: HTTPS stream → multipart demuxer → bounded queue
// processor thread: queue → decoder adapter → motion detector → state machine → clip writer
//
// The receiver never waits on the processor for longer than the enqueue
// timeout. A chunk that cannot be queued in time is dropped and counted.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use super::status::{CameraStats, ConnectionState};
use crate::config::{Config, RecordingConfig};
use crate::detection::{ConfirmationFilter, MotionDetector, ObjectClassifier};
use crate::recording::{self, ClipWriter, RecordingStateMachine, SessionOutcome, Transition};
use crate::stream::{MultipartDemuxer, RawFrameChunk, StreamSource};
use crate::video::{DecodedFrame, DecoderAdapter, FrameDecoder};

/// Granularity of interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Collaborators a pipeline is built from
pub struct PipelineComponents {
    pub source: Box<dyn StreamSource>,
    pub decoder: Box<dyn FrameDecoder>,
    pub classifier: Option<Box<dyn ObjectClassifier>>,
    pub writer: Box<dyn ClipWriter>,
}

// ============================================================================
// Processor
// ============================================================================

/// Everything the processor thread owns: decode window, motion state,
/// pre-roll ring and the open session
pub struct FrameProcessor {
    name: String,
    decoder: DecoderAdapter,
    motion: MotionDetector,
    recorder: RecordingStateMachine,
    writer: Box<dyn ClipWriter>,
    recording: RecordingConfig,
    stats: Arc<CameraStats>,
}

impl FrameProcessor {
    pub fn new(
        name: impl Into<String>,
        config: &Config,
        decoder: Box<dyn FrameDecoder>,
        classifier: Option<Box<dyn ObjectClassifier>>,
        writer: Box<dyn ClipWriter>,
        stats: Arc<CameraStats>,
    ) -> Self {
        let name = name.into();
        let recording = config.recording.clone();
        let confirmation = ConfirmationFilter::new(classifier, &config.confirmation);
        if passes_unfiltered(config.confirmation.enabled, &confirmation) {
            log::warn!(
                "[{}] Confirmation enabled but no object classifier available, motion clips will not be filtered",
                name
            );
        }
        let recorder = RecordingStateMachine::new(
            name.clone(),
            recording.ring_capacity(),
            recording.post_record(),
            config.confirmation.enabled,
            confirmation,
        );

        Self {
            decoder: DecoderAdapter::new(decoder, recording.decode_interval, recording.idle_reset_chunks),
            motion: MotionDetector::new(&config.motion),
            recorder,
            writer,
            recording,
            stats,
            name,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn ring_len(&self) -> usize {
        self.recorder.ring().len()
    }

    pub fn handle_chunk(&mut self, chunk: &RawFrameChunk) -> Option<SessionOutcome> {
        self.handle_chunk_at(&chunk.data, Instant::now())
    }

    /// Accumulate one chunk and, when a decode is due, run detection and the
    /// state machine on the resulting frame
    pub fn handle_chunk_at(&mut self, data: &[u8], now: Instant) -> Option<SessionOutcome> {
        if !self.decoder.push(data, self.recorder.is_recording()) {
            return None;
        }

        let image = match self.decoder.decode() {
            Ok(Some(image)) => image,
            Ok(None) => {
                self.stats.decode_failed();
                return None;
            }
            Err(e) => {
                self.stats.decode_failed();
                log::debug!("[{}] Decode failed: {}", self.name, e);
                return None;
            }
        };
        self.stats.frame_decoded();

        let frame = DecodedFrame::new(image, now);
        let sample = self.motion.detect(&frame.image);
        if sample.is_motion {
            self.stats.mark_motion();
        }

        match self.recorder.step(frame, sample, now) {
            Transition::Started { .. } => {
                self.stats.set_recording(true);
                None
            }
            Transition::Finished(finished) => Some(self.finalize(finished)),
            Transition::Idle | Transition::Continued => None,
        }
    }

    /// Called when no chunk arrived within the dequeue timeout
    pub fn handle_idle(&mut self, now: Instant) -> Option<SessionOutcome> {
        let finished = self.recorder.check_stall(now)?;
        log::info!("[{}] Stream stalled, closing recording", self.name);
        Some(self.finalize(finished))
    }

    /// Drop any open session without writing it
    pub fn abandon(&mut self) -> Option<usize> {
        let frames = self.recorder.abandon();
        self.stats.set_recording(false);
        frames
    }

    fn finalize(&mut self, finished: recording::FinishedSession) -> SessionOutcome {
        let index = self.recording.snapshot_index(finished.frames.len());
        let outcome = recording::persist(&finished, self.writer.as_mut(), index);

        self.decoder.reset();
        self.stats.set_recording(false);

        match &outcome {
            SessionOutcome::Saved {
                clip,
                frames,
                duration,
            } => {
                self.stats.clip_saved();
                log::info!(
                    "[{}] Saved {:.1}s clip ({} frames): {}",
                    self.name,
                    duration.as_secs_f64(),
                    frames,
                    clip.clip.display()
                );
            }
            SessionOutcome::Discarded { frames, duration } => {
                self.stats.clip_discarded();
                log::info!(
                    "[{}] Discarded unconfirmed {:.1}s event ({} frames)",
                    self.name,
                    duration.as_secs_f64(),
                    frames
                );
            }
            SessionOutcome::Failed { error, frames, .. } => {
                self.stats.clip_failed();
                self.stats.set_error(error.to_string());
                log::warn!("[{}] Failed to write clip ({} frames): {}", self.name, frames, error);
            }
        }

        outcome
    }
}

// ============================================================================
// Pipeline threads
// ============================================================================

/// Running receiver and processor threads for one camera
pub struct CameraPipeline {
    name: String,
    stats: Arc<CameraStats>,
    running: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
    processor: Option<JoinHandle<()>>,
}

impl CameraPipeline {
    /// Spawn the receiver and processor threads
    pub fn start(
        name: impl Into<String>,
        config: &Config,
        components: PipelineComponents,
        stats: Arc<CameraStats>,
    ) -> std::io::Result<Self> {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = bounded::<RawFrameChunk>(config.runtime.queue_capacity.max(1));

        let processor = FrameProcessor::new(
            name.clone(),
            config,
            components.decoder,
            components.classifier,
            components.writer,
            stats.clone(),
        );

        let processor_handle = {
            let running = running.clone();
            let name = name.clone();
            let dequeue_timeout = config.runtime.dequeue_timeout();
            let error_pause = config.runtime.error_pause();
            std::thread::Builder::new()
                .name(format!("camwatch-proc-{}", name))
                .spawn(move || run_processor(&name, processor, rx, running, dequeue_timeout, error_pause))?
        };

        let receiver_handle = {
            let settings = ReceiverSettings {
                boundary: config.stream.boundary.clone().into_bytes(),
                enqueue_timeout: config.runtime.enqueue_timeout(),
                backoff: config.runtime.reconnect_backoff(),
            };
            let running = running.clone();
            let stats = stats.clone();
            let name = name.clone();
            let source = components.source;
            std::thread::Builder::new()
                .name(format!("camwatch-rx-{}", name))
                .spawn(move || run_receiver(&name, source, settings, tx, running, stats))
        };

        let receiver_handle = match receiver_handle {
            Ok(handle) => handle,
            Err(e) => {
                // The processor exits once its queue sender is gone
                let _ = processor_handle.join();
                return Err(e);
            }
        };

        log::info!("[{}] Pipeline started", name);

        Ok(Self {
            name,
            stats,
            running,
            receiver: Some(receiver_handle),
            processor: Some(processor_handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the running flag and wait for both threads to exit
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Clear the running flag without waiting
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for both threads to exit
    pub fn join(&mut self) {
        for handle in [self.receiver.take(), self.processor.take()].into_iter().flatten() {
            if handle.join().is_err() {
                log::error!("[{}] Pipeline thread panicked", self.name);
            }
        }
        self.stats.set_state(ConnectionState::Stopped);
    }
}

impl Drop for CameraPipeline {
    fn drop(&mut self) {
        if self.receiver.is_some() || self.processor.is_some() {
            self.stop();
        }
    }
}

struct ReceiverSettings {
    boundary: Vec<u8>,
    enqueue_timeout: Duration,
    backoff: Duration,
}

fn run_receiver(
    name: &str,
    source: Box<dyn StreamSource>,
    settings: ReceiverSettings,
    tx: Sender<RawFrameChunk>,
    running: Arc<AtomicBool>,
    stats: Arc<CameraStats>,
) {
    while running.load(Ordering::SeqCst) {
        stats.set_state(ConnectionState::Connecting);
        log::info!("[{}] Connecting to {}", name, source.describe());

        match source.open() {
            Ok(reader) => {
                stats.set_state(ConnectionState::Streaming);
                log::info!("[{}] Connected, streaming", name);

                let mut demuxer = MultipartDemuxer::new(reader, &settings.boundary);
                while running.load(Ordering::SeqCst) {
                    match demuxer.next() {
                        Some(Ok(chunk)) => {
                            stats.chunk_received();
                            match tx.send_timeout(chunk, settings.enqueue_timeout) {
                                Ok(()) => {}
                                Err(SendTimeoutError::Timeout(_)) => {
                                    stats.chunk_dropped();
                                    log::debug!("[{}] Frame queue full, dropped chunk", name);
                                }
                                Err(SendTimeoutError::Disconnected(_)) => {
                                    log::warn!("[{}] Processor gone, receiver exiting", name);
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            stats.set_state(ConnectionState::Error);
                            stats.set_error(e.to_string());
                            log::warn!("[{}] Stream error: {}", name, e);
                            break;
                        }
                        None => {
                            log::warn!("[{}] Stream ended", name);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                stats.set_state(ConnectionState::Failed);
                stats.set_error(e.to_string());
                log::warn!("[{}] Connection failed: {}", name, e);
            }
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }

        stats.reconnected();
        stats.set_state(ConnectionState::Reconnecting);
        log::info!("[{}] Reconnecting in {}s", name, settings.backoff.as_secs());
        sleep_while_running(&running, settings.backoff);
    }

    log::debug!("[{}] Receiver stopped", name);
}

fn run_processor(
    name: &str,
    mut processor: FrameProcessor,
    rx: Receiver<RawFrameChunk>,
    running: Arc<AtomicBool>,
    dequeue_timeout: Duration,
    error_pause: Duration,
) {
    while running.load(Ordering::SeqCst) {
        let step = panic::catch_unwind(AssertUnwindSafe(|| match rx.recv_timeout(dequeue_timeout) {
            Ok(chunk) => {
                processor.handle_chunk(&chunk);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                processor.handle_idle(Instant::now());
                true
            }
            Err(RecvTimeoutError::Disconnected) => false,
        }));

        match step {
            Ok(true) => {}
            Ok(false) => break,
            Err(payload) => {
                log::error!("[{}] Processor error: {}", name, panic_message(&payload));
                sleep_while_running(&running, error_pause);
            }
        }
    }

    if let Some(frames) = processor.abandon() {
        log::info!("[{}] Abandoned open recording ({} frames)", name, frames);
    }
    log::debug!("[{}] Processor stopped", name);
}

/// Confirmation is requested but every event will pass
fn passes_unfiltered(enabled: bool, filter: &ConfirmationFilter) -> bool {
    enabled && !filter.has_classifier()
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Sleep for `duration`, waking early once `running` is cleared
pub fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
