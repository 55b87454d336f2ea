//! Built-in stage implementations
//!
//! One reference implementation per stage kind, registered by
//! [`crate::registry::StageRegistry::with_builtins`]. They are deliberately
//! self-contained: no model weights, no device state, nothing that cannot run
//! in a test.

pub mod calibration;
pub mod detector;
pub mod feature;
pub mod lane;
pub mod postprocessor;
pub mod tracker;
pub mod transformer;

pub use calibration::OnlineCalibrationService;
pub use detector::ReplayDetector;
pub use feature::IntensityFeatureExtractor;
pub use lane::{PolyfitLanePostprocessor, ScanlineLaneDetector};
pub use postprocessor::GroundRefinePostprocessor;
pub use tracker::IouObstacleTracker;
pub use transformer::GroundPlaneTransformer;
