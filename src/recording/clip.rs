// Clip writer
//
// A finished session becomes two files: a JPEG snapshot of one representative
// frame and an MKV clip of every frame.
//
// Clip pipeline: appsrc (raw RGB) → videoconvert → jpegenc → matroskamux → filesink

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use super::storage::{ArtifactPaths, ClipStorage};
use crate::video::DecodedFrame;

/// Error type for clip writing
#[derive(Debug, thiserror::Error)]
pub enum ClipError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("GStreamer error: {0}")]
    Gst(String),

    #[error("State change failed: {0}")]
    StateChange(#[from] gst::StateChangeError),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Session has no frames")]
    Empty,
}

pub type Result<T> = std::result::Result<T, ClipError>;

/// Everything needed to persist one session
pub struct ClipRequest<'a> {
    pub frames: &'a [DecodedFrame],
    /// Index into `frames` of the snapshot frame
    pub snapshot_index: usize,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
}

/// Files produced for a saved session
#[derive(Debug, Clone)]
pub struct SavedClip {
    pub snapshot: PathBuf,
    pub clip: PathBuf,
    pub frames_written: usize,
}

/// Persists finished sessions
pub trait ClipWriter: Send {
    fn write(&mut self, request: &ClipRequest<'_>) -> Result<SavedClip>;
}

/// Writes JPEG snapshots with `image` and MKV clips with GStreamer
pub struct GstClipWriter {
    storage: ClipStorage,
    fps: f64,
    quality: u8,
}

impl GstClipWriter {
    pub fn new(storage: ClipStorage, fps: f64, quality: u8) -> Self {
        Self {
            storage,
            fps: if fps > 0.0 { fps } else { 1.0 },
            quality: quality.clamp(1, 100),
        }
    }
}

impl ClipWriter for GstClipWriter {
    fn write(&mut self, request: &ClipRequest<'_>) -> Result<SavedClip> {
        let last = request.frames.len().checked_sub(1).ok_or(ClipError::Empty)?;
        let paths = self.storage.prepare(&request.started_at)?;

        let snapshot_frame = &request.frames[request.snapshot_index.min(last)];
        let (fps, quality) = (self.fps, self.quality);
        let frames_written = write_artifacts(&paths, &snapshot_frame.image, quality, |clip| {
            write_clip(request.frames, clip, fps, quality)
        })?;

        Ok(SavedClip {
            snapshot: paths.snapshot,
            clip: paths.clip,
            frames_written,
        })
    }
}

/// Write the snapshot, then the clip. On any failure both files are removed
/// so a failed session leaves nothing behind.
fn write_artifacts<F>(paths: &ArtifactPaths, snapshot: &RgbImage, quality: u8, encode_clip: F) -> Result<usize>
where
    F: FnOnce(&Path) -> Result<usize>,
{
    let result = write_snapshot(snapshot, &paths.snapshot, quality).and_then(|_| encode_clip(&paths.clip));
    if result.is_err() {
        for path in [&paths.snapshot, &paths.clip] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    log::warn!("Failed to remove partial artifact {}: {}", path.display(), e);
                }
            }
        }
    }
    result
}

/// Encode one frame as JPEG
pub fn write_snapshot(image: &RgbImage, path: &Path, quality: u8) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    JpegEncoder::new_with_quality(&mut writer, quality).encode_image(image)?;
    Ok(())
}

/// Approximate a frame rate as a GStreamer fraction
fn fps_fraction(fps: f64) -> gst::Fraction {
    let numer = (fps * 1000.0).round().max(1.0) as i32;
    gst::Fraction::new(numer, 1000)
}

/// Encode frames into an MKV file. Frames whose size differs from the first
/// frame are skipped. Returns the number of frames written.
fn write_clip(frames: &[DecodedFrame], path: &Path, fps: f64, quality: u8) -> Result<usize> {
    let first = frames.first().ok_or(ClipError::Empty)?;
    let (width, height) = (first.width(), first.height());

    let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
        .fps(fps_fraction(fps))
        .build()
        .map_err(|e| ClipError::Gst(format!("Invalid video info: {}", e)))?;
    let caps = info
        .to_caps()
        .map_err(|e| ClipError::Gst(format!("Failed to build caps: {}", e)))?;

    let pipeline = gst::Pipeline::new();

    let appsrc = gst_app::AppSrc::builder()
        .caps(&caps)
        .format(gst::Format::Time)
        .build();
    let convert = make_element("videoconvert")?;
    let encoder = make_element("jpegenc")?;
    encoder.set_property("quality", quality as i32);
    let muxer = make_element("matroskamux")?;
    muxer.set_property("writing-app", "camwatch");
    let filesink = gst::ElementFactory::make("filesink")
        .property("location", path.to_string_lossy().to_string())
        .property("async", false)
        .build()
        .map_err(|e| ClipError::Pipeline(format!("Failed to create filesink: {}", e)))?;

    pipeline
        .add_many([appsrc.upcast_ref(), &convert, &encoder, &muxer, &filesink])
        .map_err(|e| ClipError::Pipeline(format!("Failed to add elements: {}", e)))?;
    gst::Element::link_many([appsrc.upcast_ref(), &convert, &encoder, &muxer, &filesink])
        .map_err(|e| ClipError::Pipeline(format!("Failed to link elements: {}", e)))?;

    pipeline.set_state(gst::State::Playing)?;

    let result = push_frames(&appsrc, &info, frames, fps).and_then(|written| {
        wait_for_eos(&pipeline)?;
        Ok(written)
    });

    // Always set pipeline to NULL before dropping
    let _ = pipeline.set_state(gst::State::Null);
    result
}

fn push_frames(
    appsrc: &gst_app::AppSrc,
    info: &gst_video::VideoInfo,
    frames: &[DecodedFrame],
    fps: f64,
) -> Result<usize> {
    let frame_ns = (1_000_000_000.0 / fps) as u64;
    let stride = info.stride()[0] as usize;
    let offset = info.offset()[0];
    let row_bytes = info.width() as usize * 3;
    let mut written = 0usize;

    for frame in frames {
        if frame.width() != info.width() || frame.height() != info.height() {
            log::debug!(
                "Skipping {}x{} frame in {}x{} clip",
                frame.width(),
                frame.height(),
                info.width(),
                info.height()
            );
            continue;
        }

        // GStreamer rows are padded to its default stride
        let mut data = vec![0u8; info.size()];
        for (row, line) in frame.image.as_raw().chunks_exact(row_bytes).enumerate() {
            let start = offset + row * stride;
            data[start..start + row_bytes].copy_from_slice(line);
        }

        let mut buffer = gst::Buffer::from_mut_slice(data);
        {
            let buffer_ref = buffer
                .get_mut()
                .ok_or_else(|| ClipError::Gst("Buffer is not writable".into()))?;
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(written as u64 * frame_ns));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
        }

        appsrc
            .push_buffer(buffer)
            .map_err(|e| ClipError::Pipeline(format!("Failed to push buffer: {:?}", e)))?;
        written += 1;
    }

    appsrc
        .end_of_stream()
        .map_err(|e| ClipError::Pipeline(format!("Failed to send EOS: {:?}", e)))?;

    Ok(written)
}

fn wait_for_eos(pipeline: &gst::Pipeline) -> Result<()> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| ClipError::Gst("Failed to get pipeline bus".into()))?;

    for msg in bus.iter_timed(gst::ClockTime::from_seconds(30)) {
        match msg.view() {
            gst::MessageView::Eos(..) => return Ok(()),
            gst::MessageView::Error(err) => {
                return Err(ClipError::Pipeline(format!(
                    "Pipeline error: {} ({:?})",
                    err.error(),
                    err.debug()
                )));
            }
            _ => {}
        }
    }

    Err(ClipError::Pipeline("Timed out waiting for EOS".into()))
}

fn make_element(name: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| ClipError::Pipeline(format!("Failed to create {}: {}", name, e)))
}
