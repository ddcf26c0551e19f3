// Processor scenarios driven with scripted frames and explicit timestamps

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use camwatch_lib::config::Config;
use camwatch_lib::detection::ObjectClassifier;
use camwatch_lib::monitor::{CameraStats, FrameProcessor};
use camwatch_lib::recording::SessionOutcome;

use common::*;

fn processor(
    config: &Config,
    frames: Vec<image::RgbImage>,
    classifier: Option<Box<dyn ObjectClassifier>>,
    writer: MemoryWriter,
) -> (FrameProcessor, Arc<CameraStats>) {
    let stats = Arc::new(CameraStats::new("test-cam"));
    let processor = FrameProcessor::new(
        "test-cam",
        config,
        Box::new(ScriptedDecoder::new(frames)),
        classifier,
        Box::new(writer),
        stats.clone(),
    );
    (processor, stats)
}

fn at(base: Instant, secs: u64) -> Instant {
    base + Duration::from_secs(secs)
}

/// Frames 1-2 static, 3-6 a square moving right, 7-10 the square parked
fn motion_script() -> Vec<image::RgbImage> {
    let mut frames = vec![background(), background()];
    for x in [20, 140, 260, 380] {
        frames.push(square_at(x));
    }
    for _ in 0..4 {
        frames.push(square_at(380));
    }
    frames
}

#[test]
fn motion_event_produces_one_clip_with_preroll_and_postroll() {
    let config = test_config();
    let writer = MemoryWriter::default();
    let (mut processor, stats) = processor(&config, motion_script(), None, writer.clone());
    let base = Instant::now();

    let mut outcomes = Vec::new();
    for i in 1..=10u64 {
        if let Some(outcome) = processor.handle_chunk_at(&chunk(), at(base, i)) {
            outcomes.push((i, outcome));
        }
        if i == 3 {
            assert!(processor.is_recording(), "frame 3 should start recording");
        }
    }

    assert_eq!(outcomes.len(), 1);
    let (finalized_at, outcome) = &outcomes[0];
    assert_eq!(*finalized_at, 9);
    match outcome {
        SessionOutcome::Saved { frames, duration, .. } => {
            // Ring [1, 2] plus frames 3..=9
            assert_eq!(*frames, 9);
            assert_eq!(*duration, Duration::from_secs(6));
        }
        other => panic!("expected saved clip, got {:?}", other),
    }

    assert!(!processor.is_recording());
    let written = writer.written.lock().clone();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].frames, 9);
    // decoded_fps 1 * pre-roll 5s
    assert_eq!(written[0].snapshot_index, 5);

    let snap = stats.snapshot();
    assert_eq!(snap.frames_decoded, 10);
    assert_eq!(snap.clips_saved, 1);
    assert!(!snap.recording);
    assert!(snap.last_motion_at.is_some());
}

#[test]
fn stalled_stream_finalizes_with_wall_clock_duration() {
    let config = test_config();
    let writer = MemoryWriter::default();
    let frames = vec![background(), background(), square_at(100)];
    let (mut processor, _) = processor(&config, frames, None, writer.clone());
    let base = Instant::now();

    for i in 1..=3 {
        assert!(processor.handle_chunk_at(&chunk(), at(base, i)).is_none());
    }
    assert!(processor.is_recording());

    assert!(processor.handle_idle(at(base, 5)).is_none());

    let stalled = at(base, 3) + Duration::from_millis(3_500);
    match processor.handle_idle(stalled) {
        Some(SessionOutcome::Saved { frames, duration, .. }) => {
            assert_eq!(frames, 3);
            assert_eq!(duration, Duration::from_millis(3_500));
        }
        other => panic!("expected stall finalize, got {:?}", other),
    }
    assert!(!processor.is_recording());
    assert_eq!(writer.count(), 1);
}

#[test]
fn unconfirmed_event_writes_nothing() {
    let mut config = test_config();
    config.confirmation.enabled = true;
    let writer = MemoryWriter::default();
    let (classifier, calls) = CountingClassifier::new(usize::MAX);
    let (mut processor, stats) = processor(&config, motion_script(), Some(Box::new(classifier)), writer.clone());
    let base = Instant::now();

    let outcomes: Vec<SessionOutcome> = (1..=10)
        .filter_map(|i| processor.handle_chunk_at(&chunk(), at(base, i)))
        .collect();

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], SessionOutcome::Discarded { frames: 9, .. }));
    assert_eq!(writer.count(), 0);
    // One query per motion frame: 3, 4, 5 and 6
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 4);
    assert_eq!(stats.snapshot().clips_discarded, 1);
}

#[test]
fn event_confirmed_on_third_frame_is_written_once() {
    let mut config = test_config();
    config.confirmation.enabled = true;
    let writer = MemoryWriter::default();
    let (classifier, calls) = CountingClassifier::new(3);
    let (mut processor, _) = processor(&config, motion_script(), Some(Box::new(classifier)), writer.clone());
    let base = Instant::now();

    for i in 1..=10 {
        processor.handle_chunk_at(&chunk(), at(base, i));
    }

    assert_eq!(writer.count(), 1);
    // Sticky after the third query
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[test]
fn missing_classifier_keeps_every_event() {
    let mut config = test_config();
    config.confirmation.enabled = true;
    let writer = MemoryWriter::default();
    let (mut processor, _) = processor(&config, motion_script(), None, writer.clone());
    let base = Instant::now();

    for i in 1..=10 {
        processor.handle_chunk_at(&chunk(), at(base, i));
    }
    assert_eq!(writer.count(), 1);
}

#[test]
fn write_failure_is_counted_and_pipeline_continues() {
    let config = test_config();
    let mut frames = motion_script();
    // A second event after the first one closes
    frames.push(square_at(20));
    let (mut processor, stats) = processor(&config, frames, None, MemoryWriter::failing());
    let base = Instant::now();

    let mut failed = 0;
    for i in 1..=11 {
        if let Some(SessionOutcome::Failed { .. }) = processor.handle_chunk_at(&chunk(), at(base, i)) {
            failed += 1;
        }
    }

    assert_eq!(failed, 1);
    assert!(processor.is_recording(), "new motion should open a fresh session");
    let snap = stats.snapshot();
    assert_eq!(snap.clips_failed, 1);
    assert!(snap.last_error.is_some());
}

#[test]
fn finalize_cuts_decode_window_back_to_parameter_sets() {
    let config = test_config();
    let stats = Arc::new(CameraStats::new("test-cam"));
    let (decoder, windows) = WindowDecoder::new(motion_script());
    let mut processor = FrameProcessor::new(
        "test-cam",
        &config,
        Box::new(decoder),
        None,
        Box::new(MemoryWriter::default()),
        stats,
    );
    let base = Instant::now();

    let mut finalized_at = None;
    for i in 1..=10u64 {
        let data = if i == 1 { key_chunk() } else { chunk() };
        if processor.handle_chunk_at(&data, at(base, i)).is_some() {
            finalized_at = Some(i);
        }
    }
    assert_eq!(finalized_at, Some(9));

    let windows = windows.lock().clone();
    assert_eq!(windows.len(), 10);
    // The window grows by one chunk per decode up to the finalize
    for i in 1..9 {
        assert_eq!(windows[i], windows[i - 1] + chunk().len());
    }
    assert_eq!(windows[0], key_chunk().len());
    // First decode after the finalize: cached SPS/PPS plus the new chunk only
    assert_eq!(windows[9], parameter_sets().len() + chunk().len());
}

#[test]
fn decode_cadence_follows_interval() {
    let mut config = test_config();
    config.recording.decode_interval = 15;
    let (mut processor, stats) = processor(&config, vec![background(); 4], None, MemoryWriter::default());
    let base = Instant::now();

    for i in 0..60 {
        processor.handle_chunk_at(&chunk(), base + Duration::from_millis(i * 33));
    }
    assert_eq!(stats.snapshot().frames_decoded, 4);
    assert_eq!(processor.ring_len(), 4);
}
