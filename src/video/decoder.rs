// H.264 frame decoding
//
// GStreamer pipeline per decode attempt:
//   appsrc (video/x-h264 byte-stream) → h264parse → avdec_h264 → videoconvert → appsink (RGB)
//
// The whole accumulated window is pushed as one buffer followed by EOS, and
// only the last frame the decoder emits is kept.

use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;

use super::accumulator::DecodeAccumulator;
use super::{Result, VideoError};

/// H.264 decoders to try, in order of preference
const DECODER_ELEMENTS: &[&str] = &["avdec_h264", "openh264dec"];

/// Upper bound on a single decode attempt
const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_secs(5);

/// Decodes an accumulated H.264 byte stream to its most recent frame.
///
/// Implementations must treat every call independently: corrupt or partial
/// input on one call must not affect the next.
pub trait FrameDecoder: Send {
    /// Decode `data` and return the last frame it produced, if any
    fn decode_latest(&mut self, data: &[u8]) -> Result<Option<RgbImage>>;
}

/// GStreamer-backed H.264 decoder
pub struct GstH264Decoder {
    decoder_element: &'static str,
    timeout: Duration,
}

impl GstH264Decoder {
    /// Pick the first available H.264 decoder element
    pub fn new() -> Result<Self> {
        let decoder_element = DECODER_ELEMENTS
            .iter()
            .copied()
            .find(|name| gst::ElementFactory::find(name).is_some())
            .ok_or_else(|| {
                VideoError::Pipeline(format!(
                    "No H.264 decoder available (tried {})",
                    DECODER_ELEMENTS.join(", ")
                ))
            })?;

        log::info!("Using H.264 decoder: {}", decoder_element);

        Ok(Self {
            decoder_element,
            timeout: DEFAULT_DECODE_TIMEOUT,
        })
    }

    fn build_pipeline(&self) -> Result<(gst::Pipeline, gst_app::AppSrc, gst_app::AppSink)> {
        let pipeline = gst::Pipeline::new();

        let src_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .build();
        let appsrc = gst_app::AppSrc::builder()
            .caps(&src_caps)
            .format(gst::Format::Bytes)
            .build();

        let parser = make_element("h264parse")?;
        let decoder = make_element(self.decoder_element)?;
        let convert = make_element("videoconvert")?;

        let sink_caps = gst_video::VideoCapsBuilder::new()
            .format(gst_video::VideoFormat::Rgb)
            .build();
        let appsink = gst_app::AppSink::builder()
            .caps(&sink_caps)
            .sync(false)
            .build();

        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &parser,
                &decoder,
                &convert,
                appsink.upcast_ref(),
            ])
            .map_err(|e| VideoError::Gst(format!("Failed to add elements: {}", e)))?;

        gst::Element::link_many([
            appsrc.upcast_ref(),
            &parser,
            &decoder,
            &convert,
            appsink.upcast_ref(),
        ])
        .map_err(|e| VideoError::Gst(format!("Failed to link decode pipeline: {}", e)))?;

        Ok((pipeline, appsrc, appsink))
    }

    fn run(
        &self,
        pipeline: &gst::Pipeline,
        appsrc: &gst_app::AppSrc,
        appsink: &gst_app::AppSink,
        data: &[u8],
    ) -> Result<Option<RgbImage>> {
        pipeline.set_state(gst::State::Playing)?;

        appsrc
            .push_buffer(gst::Buffer::from_slice(data.to_vec()))
            .map_err(|e| VideoError::Pipeline(format!("Failed to push buffer: {:?}", e)))?;
        appsrc
            .end_of_stream()
            .map_err(|e| VideoError::Pipeline(format!("Failed to send EOS: {:?}", e)))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| VideoError::Gst("Failed to get pipeline bus".into()))?;

        let deadline = Instant::now() + self.timeout;
        let mut latest: Option<gst::Sample> = None;

        loop {
            if let Some(sample) = appsink.try_pull_sample(gst::ClockTime::from_mseconds(50)) {
                latest = Some(sample);
                continue;
            }

            if appsink.is_eos() {
                break;
            }

            if let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
                if let gst::MessageView::Error(err) = msg.view() {
                    // Frames decoded before the corrupt part are still usable
                    if latest.is_none() {
                        return Err(VideoError::Pipeline(format!(
                            "Decode error: {} ({:?})",
                            err.error(),
                            err.debug()
                        )));
                    }
                    log::debug!("Decoder stopped early: {}", err.error());
                    break;
                }
            }

            if Instant::now() >= deadline {
                log::debug!("Decode timed out after {:?}", self.timeout);
                break;
            }
        }

        latest.map(|sample| sample_to_image(&sample)).transpose()
    }
}

impl FrameDecoder for GstH264Decoder {
    fn decode_latest(&mut self, data: &[u8]) -> Result<Option<RgbImage>> {
        if data.is_empty() {
            return Ok(None);
        }

        let (pipeline, appsrc, appsink) = self.build_pipeline()?;
        let result = self.run(&pipeline, &appsrc, &appsink, data);
        let _ = pipeline.set_state(gst::State::Null);
        result
    }
}

fn make_element(name: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| VideoError::Gst(format!("Failed to create {}: {}", name, e)))
}

/// Copy a packed RGB sample into an image, honoring row stride
fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage> {
    let caps = sample
        .caps()
        .ok_or_else(|| VideoError::Image("Sample has no caps".into()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| VideoError::Image(format!("Invalid caps: {}", e)))?;
    let buffer = sample
        .buffer()
        .ok_or_else(|| VideoError::Image("No buffer in sample".into()))?;
    let map = buffer
        .map_readable()
        .map_err(|e| VideoError::Image(format!("Failed to map buffer: {}", e)))?;

    let width = info.width();
    let height = info.height();
    let stride = info.stride()[0] as usize;
    let offset = info.offset()[0];
    let row_bytes = width as usize * 3;
    let data = map.as_slice();

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = offset + row * stride;
        let line = data
            .get(start..start + row_bytes)
            .ok_or_else(|| VideoError::Image("Buffer shorter than frame".into()))?;
        pixels.extend_from_slice(line);
    }

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| VideoError::Image("Frame size mismatch".into()))
}

// ============================================================================
// Decoder adapter
// ============================================================================

/// Accumulates raw chunks and decodes on a fixed cadence.
///
/// A decode is due on every `decode_interval`-th chunk since the last reset.
/// While no session is recording, the window is cut back to the parameter
/// sets once it grows past `idle_reset_chunks`.
pub struct DecoderAdapter {
    accumulator: DecodeAccumulator,
    decoder: Box<dyn FrameDecoder>,
    decode_interval: u32,
    idle_reset_chunks: u32,
}

impl DecoderAdapter {
    pub fn new(decoder: Box<dyn FrameDecoder>, decode_interval: u32, idle_reset_chunks: u32) -> Self {
        Self {
            accumulator: DecodeAccumulator::new(),
            decoder,
            decode_interval: decode_interval.max(1),
            idle_reset_chunks,
        }
    }

    /// Add a chunk. Returns true when a decode is due.
    pub fn push(&mut self, chunk: &[u8], recording: bool) -> bool {
        if !recording && self.accumulator.chunk_count() >= self.idle_reset_chunks {
            self.accumulator.reset();
        }
        self.accumulator.push(chunk);
        self.accumulator.chunk_count() % self.decode_interval == 0
    }

    /// Decode the most recent frame of the current window
    pub fn decode(&mut self) -> Result<Option<RgbImage>> {
        self.decoder.decode_latest(self.accumulator.data())
    }

    /// Cut the window back to the cached parameter sets
    pub fn reset(&mut self) {
        self.accumulator.reset();
    }

    pub fn chunk_count(&self) -> u32 {
        self.accumulator.chunk_count()
    }

    pub fn accumulator(&self) -> &DecodeAccumulator {
        &self.accumulator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records the length of every window it is asked to decode
    struct RecordingDecoder {
        calls: Arc<Mutex<Vec<usize>>>,
    }

    impl FrameDecoder for RecordingDecoder {
        fn decode_latest(&mut self, data: &[u8]) -> Result<Option<RgbImage>> {
            self.calls.lock().unwrap().push(data.len());
            Ok(Some(RgbImage::new(4, 4)))
        }
    }

    fn adapter(interval: u32, idle_reset: u32) -> (DecoderAdapter, Arc<Mutex<Vec<usize>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let decoder = RecordingDecoder {
            calls: calls.clone(),
        };
        (DecoderAdapter::new(Box::new(decoder), interval, idle_reset), calls)
    }

    #[test]
    fn decode_is_due_every_interval() {
        let (mut adapter, _) = adapter(15, 300);
        let due: Vec<usize> = (1..=45)
            .filter(|_| adapter.push(&[0, 0, 0, 1, 0x41, 0x00], false))
            .collect();
        assert_eq!(due, vec![15, 30, 45]);
        assert_eq!(adapter.chunk_count(), 45);
    }

    #[test]
    fn idle_window_is_cut_back() {
        let (mut adapter, _) = adapter(1, 5);
        let sps_pps = [0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE];
        adapter.push(&sps_pps, false);
        for _ in 0..4 {
            adapter.push(&[0, 0, 0, 1, 0x41, 0x9A], false);
        }
        assert_eq!(adapter.chunk_count(), 5);

        adapter.push(&[0, 0, 0, 1, 0x41, 0x9B], false);
        assert_eq!(adapter.chunk_count(), 1);
        let mut expected = sps_pps.to_vec();
        expected.extend_from_slice(&[0, 0, 0, 1, 0x41, 0x9B]);
        assert_eq!(adapter.accumulator().data(), expected.as_slice());
    }

    #[test]
    fn recording_window_keeps_growing() {
        let (mut adapter, _) = adapter(1, 5);
        for _ in 0..20 {
            adapter.push(&[0, 0, 0, 1, 0x41, 0x9A], true);
        }
        assert_eq!(adapter.chunk_count(), 20);
    }

    #[test]
    fn decode_sees_accumulated_window() {
        let (mut adapter, calls) = adapter(2, 300);
        assert!(!adapter.push(&[1, 2, 3], false));
        assert!(adapter.push(&[4, 5], false));
        assert!(adapter.decode().unwrap().is_some());
        adapter.reset();
        adapter.decode().unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![5, 0]);
    }
}
