// Camwatch - motion-triggered clip capture for H.264 network cameras
// Main library entry point

pub mod config;
pub mod detection;
pub mod gstreamer_init;
pub mod monitor;
pub mod recording;
pub mod stream;
pub mod video;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;

use config::Config;
use monitor::{GstPipelineFactory, Supervisor};

/// Load the config at `config_path` and monitor every camera until Ctrl-C
pub fn run(config_path: &Path) -> anyhow::Result<()> {
    if !config_path.exists() {
        Config::default()
            .save(config_path)
            .with_context(|| format!("Failed to write default config to {}", config_path.display()))?;
        log::info!(
            "Wrote default config to {}. Add your cameras and credentials, then run again.",
            config_path.display()
        );
        return Ok(());
    }

    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    config.validate().context("Invalid configuration")?;

    gstreamer_init::init_gstreamer().map_err(anyhow::Error::msg)?;
    let missing = gstreamer_init::missing_elements();
    if !missing.is_empty() {
        anyhow::bail!("Missing GStreamer elements: {}", missing.join(", "));
    }

    std::fs::create_dir_all(&config.recording.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.recording.output_dir.display()
        )
    })?;

    log::info!(
        "Decoding every {} chunks (~{:.1} fps), pre-roll {}s / post-roll {}s, output {}",
        config.recording.decode_interval,
        config.recording.decoded_fps(),
        config.recording.pre_record_secs,
        config.recording.post_record_secs,
        config.recording.output_dir.display()
    );

    let mut supervisor = Supervisor::new(config, Box::new(GstPipelineFactory));

    let shutdown = supervisor.shutdown_flag();
    ctrlc::set_handler(move || {
        log::info!("Shutdown requested");
        shutdown.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    supervisor.start()?;

    while supervisor.is_running() {
        std::thread::sleep(Duration::from_millis(200));
    }

    supervisor.stop();
    Ok(())
}
