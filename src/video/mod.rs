// Video decoding
//
// Raw H.264 access units are accumulated (`accumulator`) and periodically
// decoded to a raster frame (`decoder`). Only the most recent decodable frame
// of the accumulated window is ever used.

pub mod accumulator;
pub mod decoder;

pub use accumulator::DecodeAccumulator;
pub use decoder::{DecoderAdapter, FrameDecoder, GstH264Decoder};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use gstreamer as gst;
use image::RgbImage;

/// Error type for decode operations
#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("GStreamer error: {0}")]
    Gst(String),

    #[error("State change failed: {0}")]
    StateChange(#[from] gst::StateChangeError),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VideoError>;

/// A decoded raster frame and the time it was produced.
///
/// The image is shared: the same frame sits in the pre-roll ring and in the
/// active session without being copied.
#[derive(Clone)]
pub struct DecodedFrame {
    pub image: Arc<RgbImage>,
    pub captured_at: Instant,
}

impl DecodedFrame {
    pub fn new(image: RgbImage, captured_at: Instant) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}
