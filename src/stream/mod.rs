// Camera stream ingestion
//
// The camera answers a single long-lived HTTPS request with a multipart body.
// `client` opens that request; `multipart` splits the body into H.264 access units.

pub mod client;
pub mod multipart;

pub use client::CameraClient;
pub use multipart::{MultipartDemuxer, MultipartParser};

use std::io::Read;
use std::time::Instant;

/// Error type for stream connection and reading
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Camera returned HTTP {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// One H.264 access unit as delivered by the camera
#[derive(Debug, Clone)]
pub struct RawFrameChunk {
    /// Payload bytes of the multipart part (Annex-B NAL units)
    pub data: Vec<u8>,
    /// When the part was fully received
    pub received_at: Instant,
}

impl RawFrameChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            received_at: Instant::now(),
        }
    }
}

/// Something that can open a fresh byte stream from a camera.
///
/// The receiver calls `open` on every (re)connect attempt.
pub trait StreamSource: Send + Sync {
    /// Open the stream. Connection, TLS, auth and status failures are errors.
    fn open(&self) -> Result<Box<dyn Read + Send>>;

    /// Human-readable endpoint for logs
    fn describe(&self) -> String;
}
