// Camera monitoring
//
// `camera` runs one capture pipeline, `supervisor` owns all of them and
// `status` holds the counters both report through.

pub mod camera;
pub mod status;
pub mod supervisor;

pub use camera::{CameraPipeline, FrameProcessor, PipelineComponents};
pub use status::{CameraStats, ConnectionState, StatusSnapshot};
pub use supervisor::{GstPipelineFactory, PipelineFactory, Supervisor, SupervisorError};
