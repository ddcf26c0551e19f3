// Supervisor: owns one capture pipeline per configured camera
//
// Pipelines are started a few seconds apart and never share mutable state.
// A status reporter thread logs a snapshot of every camera periodically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::camera::{sleep_while_running, CameraPipeline, PipelineComponents};
use super::status::{CameraStats, ConnectionState, StatusSnapshot};
use crate::config::{CameraConfig, Config};
use crate::recording::{ClipStorage, GstClipWriter};
use crate::stream::{CameraClient, StreamError};
use crate::video::{GstH264Decoder, VideoError};

/// Error type for pipeline construction
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Stream setup failed: {0}")]
    Stream(#[from] StreamError),

    #[error("Decoder setup failed: {0}")]
    Video(#[from] VideoError),

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("No camera pipeline could be started")]
    NoPipelines,
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Builds the collaborators of one camera's pipeline
pub trait PipelineFactory: Send + Sync {
    fn build(&self, camera: &CameraConfig, config: &Config) -> Result<PipelineComponents>;
}

/// HTTPS client, GStreamer decoder and clip writer; no object classifier
pub struct GstPipelineFactory;

impl PipelineFactory for GstPipelineFactory {
    fn build(&self, camera: &CameraConfig, config: &Config) -> Result<PipelineComponents> {
        let source = CameraClient::new(camera, &config.stream)?;
        let decoder = GstH264Decoder::new()?;
        let storage = ClipStorage::new(&config.recording.output_dir, &camera.dir_name());
        let writer = GstClipWriter::new(
            storage,
            config.recording.decoded_fps(),
            config.recording.snapshot_quality,
        );

        Ok(PipelineComponents {
            source: Box::new(source),
            decoder: Box::new(decoder),
            classifier: None,
            writer: Box::new(writer),
        })
    }
}

pub struct Supervisor {
    config: Arc<Config>,
    factory: Box<dyn PipelineFactory>,
    running: Arc<AtomicBool>,
    pipelines: Vec<CameraPipeline>,
    stats: Vec<Arc<CameraStats>>,
    reporter: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(config: Config, factory: Box<dyn PipelineFactory>) -> Self {
        Self {
            config: Arc::new(config),
            factory,
            running: Arc::new(AtomicBool::new(true)),
            pipelines: Vec::new(),
            stats: Vec::new(),
            reporter: None,
        }
    }

    /// Start every camera and the status reporter.
    ///
    /// A camera whose pipeline cannot be built is reported as failed and
    /// skipped; the others still start. Errors only if none started.
    pub fn start(&mut self) -> Result<usize> {
        let stagger = self.config.runtime.camera_start_stagger();

        let cameras = self.config.cameras.clone();
        for (index, camera) in cameras.iter().enumerate() {
            if index > 0 {
                sleep_while_running(&self.running, stagger);
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let name = camera.display_name();
            let stats = Arc::new(CameraStats::new(name.clone()));
            self.stats.push(stats.clone());

            match self.start_camera(camera, &name, stats.clone()) {
                Ok(pipeline) => self.pipelines.push(pipeline),
                Err(e) => {
                    stats.set_state(ConnectionState::Failed);
                    stats.set_error(e.to_string());
                    log::error!("[{}] Failed to start pipeline: {}", name, e);
                }
            }
        }

        if self.pipelines.is_empty() {
            return Err(SupervisorError::NoPipelines);
        }

        self.start_reporter()?;
        log::info!("Monitoring {} camera(s)", self.pipelines.len());
        Ok(self.pipelines.len())
    }

    fn start_camera(
        &self,
        camera: &CameraConfig,
        name: &str,
        stats: Arc<CameraStats>,
    ) -> Result<CameraPipeline> {
        let components = self.factory.build(camera, &self.config)?;
        Ok(CameraPipeline::start(name, &self.config, components, stats)?)
    }

    fn start_reporter(&mut self) -> Result<()> {
        let running = self.running.clone();
        let stats = self.stats.clone();
        let interval = self.config.runtime.status_interval();

        let handle = std::thread::Builder::new()
            .name("camwatch-status".into())
            .spawn(move || loop {
                sleep_while_running(&running, interval);
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                for camera in &stats {
                    log::info!("{}", camera.snapshot());
                }
            })?;

        self.reporter = Some(handle);
        Ok(())
    }

    /// Flag shared with signal handlers; clearing it asks the supervisor to stop
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> Vec<StatusSnapshot> {
        self.stats.iter().map(|s| s.snapshot()).collect()
    }

    /// Stop all pipelines and the reporter, waiting for their threads
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        for pipeline in &self.pipelines {
            pipeline.request_stop();
        }
        for pipeline in &mut self.pipelines {
            pipeline.join();
        }
        self.pipelines.clear();

        if let Some(handle) = self.reporter.take() {
            let _ = handle.join();
        }

        log::info!("All camera pipelines stopped");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if !self.pipelines.is_empty() || self.reporter.is_some() {
            self.stop();
        }
    }
}
