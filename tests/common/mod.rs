// Shared stubs for integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use parking_lot::Mutex;

use camwatch_lib::config::{CameraConfig, Config};
use camwatch_lib::detection::{ClassifierError, ObjectClassifier, Prediction};
use camwatch_lib::recording::{ClipError, ClipRequest, ClipWriter, SavedClip};
use camwatch_lib::stream::{StreamError, StreamSource};
use camwatch_lib::video::{self, FrameDecoder};

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;
pub const SQUARE: u32 = 80;

/// Config tuned for scripted tests: every chunk is decoded, one decoded
/// frame per second, 3s post-roll
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.cameras = vec![CameraConfig::new("10.0.0.1")];
    config.recording.decode_interval = 1;
    config.recording.source_fps = 1.0;
    config.recording.pre_record_secs = 5.0;
    config.recording.post_record_secs = 3.0;
    config.confirmation.enabled = false;
    config
}

pub fn background() -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([30, 30, 30]))
}

/// Background with a bright square whose left edge is at `x`
pub fn square_at(x: u32) -> RgbImage {
    let mut img = background();
    for py in 200..200 + SQUARE {
        for px in x..x + SQUARE {
            img.put_pixel(px, py, Rgb([235, 235, 235]));
        }
    }
    img
}

/// A minimal H.264-looking access unit
pub fn chunk() -> Vec<u8> {
    vec![0, 0, 0, 1, 0x41, 0x9A, 0x02]
}

/// Returns queued images in order, one per decode call
pub struct ScriptedDecoder {
    frames: Arc<Mutex<VecDeque<RgbImage>>>,
}

impl ScriptedDecoder {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: Arc::new(Mutex::new(frames.into())),
        }
    }
}

impl FrameDecoder for ScriptedDecoder {
    fn decode_latest(&mut self, _data: &[u8]) -> video::Result<Option<RgbImage>> {
        Ok(self.frames.lock().pop_front())
    }
}

/// SPS and PPS as an Annex-B byte stream
pub fn parameter_sets() -> Vec<u8> {
    vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F, 0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80]
}

/// A key frame access unit carrying its parameter sets
pub fn key_chunk() -> Vec<u8> {
    let mut data = parameter_sets();
    data.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88, 0x84]);
    data
}

/// Scripted frames, recording the size of every window it is given
pub struct WindowDecoder {
    inner: ScriptedDecoder,
    pub windows: Arc<Mutex<Vec<usize>>>,
}

impl WindowDecoder {
    pub fn new(frames: Vec<RgbImage>) -> (Self, Arc<Mutex<Vec<usize>>>) {
        let windows = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner: ScriptedDecoder::new(frames),
                windows: windows.clone(),
            },
            windows,
        )
    }
}

impl FrameDecoder for WindowDecoder {
    fn decode_latest(&mut self, data: &[u8]) -> video::Result<Option<RgbImage>> {
        self.windows.lock().push(data.len());
        self.inner.decode_latest(data)
    }
}

/// Blocks every decode until `open` is set (or ten seconds pass)
pub struct GatedDecoder {
    pub open: Arc<AtomicBool>,
}

impl GatedDecoder {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let open = Arc::new(AtomicBool::new(false));
        (Self { open: open.clone() }, open)
    }
}

impl FrameDecoder for GatedDecoder {
    fn decode_latest(&mut self, _data: &[u8]) -> video::Result<Option<RgbImage>> {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !self.open.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(Some(RgbImage::new(32, 24)))
    }
}

/// Always decodes the same still frame
pub struct StillDecoder;

impl FrameDecoder for StillDecoder {
    fn decode_latest(&mut self, _data: &[u8]) -> video::Result<Option<RgbImage>> {
        Ok(Some(RgbImage::new(32, 24)))
    }
}

/// What a `MemoryWriter` was asked to write
#[derive(Debug, Clone)]
pub struct WrittenClip {
    pub frames: usize,
    pub snapshot_index: usize,
    pub duration: Duration,
}

/// Records clip requests instead of encoding them
#[derive(Clone, Default)]
pub struct MemoryWriter {
    pub written: Arc<Mutex<Vec<WrittenClip>>>,
    pub fail: bool,
}

impl MemoryWriter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.written.lock().len()
    }
}

impl ClipWriter for MemoryWriter {
    fn write(&mut self, request: &ClipRequest<'_>) -> Result<SavedClip, ClipError> {
        if self.fail {
            return Err(ClipError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only output",
            )));
        }
        self.written.lock().push(WrittenClip {
            frames: request.frames.len(),
            snapshot_index: request.snapshot_index,
            duration: request.duration,
        });
        Ok(SavedClip {
            snapshot: PathBuf::from("motion.jpg"),
            clip: PathBuf::from("clip.mkv"),
            frames_written: request.frames.len(),
        })
    }
}

/// Confirms a person from the `confirm_at`-th call on (1-based)
pub struct CountingClassifier {
    pub confirm_at: usize,
    pub calls: Arc<AtomicUsize>,
}

impl CountingClassifier {
    pub fn new(confirm_at: usize) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                confirm_at,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl ObjectClassifier for CountingClassifier {
    fn classify(&mut self, _frame: &RgbImage) -> Result<Vec<Prediction>, ClassifierError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.confirm_at {
            Ok(vec![Prediction::new("car", 0.99), Prediction::new("person", 0.8)])
        } else {
            Ok(vec![Prediction::new("person", 0.2)])
        }
    }
}

/// Serves one in-memory multipart body, then refuses further connections
pub struct MemorySource {
    body: Mutex<Option<Vec<u8>>>,
    pub opens: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Mutex::new(Some(body)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A camera that rejects every connection
    pub fn refusing() -> Self {
        Self {
            body: Mutex::new(None),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl StreamSource for MemorySource {
    fn open(&self) -> Result<Box<dyn Read + Send>, StreamError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.body.lock().take() {
            Some(body) => Ok(Box::new(Cursor::new(body))),
            None => Err(StreamError::Status(503)),
        }
    }

    fn describe(&self) -> String {
        "memory://camera".to_string()
    }
}

/// Multipart body with `count` video parts interleaved with audio parts
pub fn multipart_body(boundary: &str, count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..count {
        for (content_type, body) in [("video/mp2t", chunk()), ("audio/g711", vec![i as u8; 16])] {
            out.extend_from_slice(boundary.as_bytes());
            out.extend_from_slice(
                format!(
                    "\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
                    content_type,
                    body.len()
                )
                .as_bytes(),
            );
            out.extend_from_slice(&body);
            out.extend_from_slice(b"\r\n");
        }
    }
    out
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
