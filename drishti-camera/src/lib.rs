//! drishti-camera: Camera Obstacle Perception Pipeline
//!
//! The per-frame orchestration core of the drishti vision stack: obstacle
//! detection, tracking, 2D-to-3D transformation, lane detection, and online
//! camera calibration, wired together as replaceable stages behind a plugin
//! registry.
//!
//! Hosts build an [`ObstaclePerception`] once from a [`PerceptionConfig`],
//! then feed it one [`CameraFrame`] at a time.

pub mod config;
pub mod debug;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod plugins;
pub mod registry;
pub mod stages;
pub mod templates;

pub use config::{PerceptionConfig, PerceptionInitOptions};
pub use error::{PerceptionError, Result};
pub use frame::{CameraFrame, SensorImage};
pub use pipeline::ObstaclePerception;
pub use registry::StageRegistry;
