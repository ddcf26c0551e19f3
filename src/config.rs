// Configuration management for Camwatch
//
// A single immutable `Config` value is loaded once at startup and shared
// (by reference or `Arc`) with every camera pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `stream.username`
pub const USERNAME_ENV: &str = "CAMWATCH_USERNAME";
/// Environment variable overriding `stream.password`
pub const PASSWORD_ENV: &str = "CAMWATCH_PASSWORD";

/// Error type for configuration loading and validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cameras to monitor, one pipeline each
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,

    /// Connection settings shared by all cameras
    #[serde(default)]
    pub stream: StreamConfig,

    /// Frame-differencing sensitivity
    #[serde(default)]
    pub motion: MotionConfig,

    /// Pre-roll, post-roll, decode sampling and output location
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Optional object confirmation gate
    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    /// Queue sizes, timeouts and supervisor timing
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// One network camera
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraConfig {
    /// Host name or IP address
    pub address: String,

    /// HTTPS streaming port
    #[serde(default = "default_camera_port")]
    pub port: u16,

    /// Display name used in logs and as the output folder name.
    /// Derived from the address when not set.
    #[serde(default)]
    pub name: Option<String>,
}

impl CameraConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: default_camera_port(),
            name: None,
        }
    }

    /// Name shown in log prefixes and status reports
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.address.clone())
    }

    /// Filesystem-safe folder name for this camera's clips
    pub fn dir_name(&self) -> String {
        let raw = self.name.as_deref().unwrap_or(&self.address);
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

/// HTTPS multipart stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Request path (with query) of the vendor streaming endpoint
    #[serde(default = "default_stream_path")]
    pub path: String,

    /// Multipart boundary token separating parts in the response body
    #[serde(default = "default_boundary")]
    pub boundary: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Per-read timeout on the response body
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    /// Skip certificate verification. Cameras ship self-signed certificates
    /// with legacy ciphers, so this defaults to true.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            path: default_stream_path(),
            boundary: default_boundary(),
            connect_timeout_secs: default_connect_timeout_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            accept_invalid_certs: true,
        }
    }
}

/// Motion detector parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Per-pixel intensity difference (0-255) counted as change
    #[serde(default = "default_threshold")]
    pub threshold: u8,

    /// Minimum region area in pixels for a region to count as motion
    #[serde(default = "default_min_area")]
    pub min_area: f64,

    /// Gaussian blur sigma applied before differencing
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,

    /// Number of 3x3 dilation passes over the threshold mask
    #[serde(default = "default_dilate_iterations")]
    pub dilate_iterations: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_area: default_min_area(),
            blur_sigma: default_blur_sigma(),
            dilate_iterations: default_dilate_iterations(),
        }
    }
}

/// Recording behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Root folder for clips; each camera gets a subfolder
    #[serde(default = "get_default_output_dir")]
    pub output_dir: PathBuf,

    /// Decode one frame every N received access units
    #[serde(default = "default_decode_interval")]
    pub decode_interval: u32,

    /// Nominal camera frame rate, used to derive the decoded rate
    #[serde(default = "default_source_fps")]
    pub source_fps: f64,

    /// Seconds of footage kept before the first motion frame
    #[serde(default = "default_pre_record_secs")]
    pub pre_record_secs: f64,

    /// Seconds of quiet after the last motion frame before the clip closes
    #[serde(default = "default_post_record_secs")]
    pub post_record_secs: f64,

    /// Accepted for compatibility with existing config files.
    /// Not consulted by any recording transition.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,

    /// While idle, the decode buffer is trimmed back to the parameter sets
    /// once it holds more than this many access units
    #[serde(default = "default_idle_reset_chunks")]
    pub idle_reset_chunks: u32,

    /// JPEG quality (1-100) of the clip snapshot
    #[serde(default = "default_snapshot_quality")]
    pub snapshot_quality: u8,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: get_default_output_dir(),
            decode_interval: default_decode_interval(),
            source_fps: default_source_fps(),
            pre_record_secs: default_pre_record_secs(),
            post_record_secs: default_post_record_secs(),
            cooldown_secs: default_cooldown_secs(),
            idle_reset_chunks: default_idle_reset_chunks(),
            snapshot_quality: default_snapshot_quality(),
        }
    }
}

impl RecordingConfig {
    /// Effective rate of decoded frames
    pub fn decoded_fps(&self) -> f64 {
        (self.source_fps / self.decode_interval.max(1) as f64).max(1.0)
    }

    /// Pre-roll ring capacity, fixed for the lifetime of a pipeline
    pub fn ring_capacity(&self) -> usize {
        let frames = (self.decoded_fps() * self.pre_record_secs).ceil();
        (frames.max(0.0) as usize).max(10)
    }

    /// Index of the frame used as the clip snapshot (the trigger frame
    /// when the pre-roll was full)
    pub fn snapshot_index(&self, frame_count: usize) -> usize {
        let preroll = (self.decoded_fps() * self.pre_record_secs).max(0.0) as usize;
        preroll.min(frame_count.saturating_sub(1))
    }

    pub fn post_record(&self) -> Duration {
        Duration::from_secs_f64(self.post_record_secs.max(0.0))
    }
}

/// Object confirmation gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Discard clips in which no allowed object was ever seen
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum classifier confidence for a positive
    #[serde(default = "default_confirm_threshold")]
    pub threshold: f32,

    /// Labels that count as a positive
    #[serde(default = "default_confirm_labels")]
    pub labels: Vec<String>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_confirm_threshold(),
            labels: default_confirm_labels(),
        }
    }
}

/// Threading, queueing and supervisor timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Capacity of the receiver -> processor queue (access units)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long the receiver waits on a full queue before dropping the chunk
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// Processor wait per queue read; also the stall-check tick
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,

    /// Wait between reconnect attempts
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,

    /// Interval of the periodic status report
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// Delay between starting consecutive cameras
    #[serde(default = "default_camera_start_stagger_ms")]
    pub camera_start_stagger_ms: u64,

    /// Pause after an unexpected processor error
    #[serde(default = "default_error_pause_ms")]
    pub error_pause_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            status_interval_secs: default_status_interval_secs(),
            camera_start_stagger_ms: default_camera_start_stagger_ms(),
            error_pause_ms: default_error_pause_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn error_pause(&self) -> Duration {
        Duration::from_millis(self.error_pause_ms)
    }

    pub fn camera_start_stagger(&self) -> Duration {
        Duration::from_millis(self.camera_start_stagger_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            stream: StreamConfig::default(),
            motion: MotionConfig::default(),
            recording: RecordingConfig::default(),
            confirmation: ConfirmationConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file and apply credential overrides from the environment
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var(USERNAME_ENV) {
            self.stream.username = username;
        }
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            self.stream.password = password;
        }
    }

    /// Reject values that would make a pipeline misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.is_empty() {
            return Err(ConfigError::Invalid("no cameras configured".into()));
        }
        if let Some(camera) = self.cameras.iter().find(|c| c.address.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "camera with empty address (name: {:?})",
                camera.name
            )));
        }
        if self.recording.decode_interval == 0 {
            return Err(ConfigError::Invalid("recording.decode_interval must be at least 1".into()));
        }
        if self.recording.idle_reset_chunks < self.recording.decode_interval {
            return Err(ConfigError::Invalid(
                "recording.idle_reset_chunks must be at least recording.decode_interval".into(),
            ));
        }
        if !(self.recording.source_fps.is_finite() && self.recording.source_fps > 0.0) {
            return Err(ConfigError::Invalid("recording.source_fps must be positive and finite".into()));
        }
        let durations = [self.recording.pre_record_secs, self.recording.post_record_secs];
        if durations.iter().any(|secs| !secs.is_finite() || *secs < 0.0) {
            return Err(ConfigError::Invalid(
                "pre/post record durations must be finite and not negative".into(),
            ));
        }
        if self.runtime.queue_capacity == 0 {
            return Err(ConfigError::Invalid("runtime.queue_capacity must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.confirmation.threshold) {
            return Err(ConfigError::Invalid("confirmation.threshold must be within 0..=1".into()));
        }
        Ok(())
    }
}

/// Get the default output path for clips
fn get_default_output_dir() -> PathBuf {
    dirs::video_dir()
        .map(|d| d.join("camwatch"))
        .unwrap_or_else(|| PathBuf::from("motion_clips"))
}

fn default_camera_port() -> u16 {
    19443
}

fn default_stream_path() -> String {
    "/https/stream/mixed?video=h264&audio=g711&resolution=hd".to_string()
}

fn default_boundary() -> String {
    "--data-boundary--".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_read_timeout_secs() -> u64 {
    15
}

fn default_threshold() -> u8 {
    35
}

fn default_min_area() -> f64 {
    5000.0
}

fn default_blur_sigma() -> f32 {
    // Matches a 21x21 Gaussian kernel
    3.5
}

fn default_dilate_iterations() -> u32 {
    2
}

fn default_decode_interval() -> u32 {
    15
}

fn default_source_fps() -> f64 {
    30.0
}

fn default_pre_record_secs() -> f64 {
    5.0
}

fn default_post_record_secs() -> f64 {
    3.0
}

fn default_cooldown_secs() -> f64 {
    5.0
}

fn default_idle_reset_chunks() -> u32 {
    300
}

fn default_snapshot_quality() -> u8 {
    90
}

fn default_confirm_threshold() -> f32 {
    0.45
}

fn default_confirm_labels() -> Vec<String> {
    vec!["person".to_string(), "cat".to_string(), "dog".to_string()]
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_enqueue_timeout_ms() -> u64 {
    100
}

fn default_dequeue_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_backoff_secs() -> u64 {
    10
}

fn default_status_interval_secs() -> u64 {
    60
}

fn default_camera_start_stagger_ms() -> u64 {
    2000
}

fn default_error_pause_ms() -> u64 {
    1000
}

/// Default true value (for serde)
fn default_true() -> bool {
    true
}
