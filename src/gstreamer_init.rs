// GStreamer initialization
//
// GStreamer must be initialized once per process before any element is created.

use std::sync::Once;

static GSTREAMER_INIT: Once = Once::new();

/// Elements the decode and clip pipelines are built from
pub const REQUIRED_ELEMENTS: &[&str] = &[
    "appsrc",
    "appsink",
    "h264parse",
    "videoconvert",
    "jpegenc",
    "matroskamux",
    "filesink",
];

/// Initialize GStreamer. Safe to call more than once.
pub fn init_gstreamer() -> Result<(), String> {
    if let Err(e) = gstreamer::init() {
        log::error!("Failed to initialize GStreamer: {}", e);
        return Err(e.to_string());
    }

    GSTREAMER_INIT.call_once(|| {
        log::info!("GStreamer initialized successfully");
        log_gstreamer_version();
    });
    Ok(())
}

/// Names of required elements that are not installed
pub fn missing_elements() -> Vec<&'static str> {
    REQUIRED_ELEMENTS
        .iter()
        .copied()
        .filter(|name| gstreamer::ElementFactory::find(name).is_none())
        .collect()
}

fn log_gstreamer_version() {
    let (major, minor, micro, nano) = gstreamer::version();
    log::info!("GStreamer version: {}.{}.{}.{}", major, minor, micro, nano);
}
