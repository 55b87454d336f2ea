//! Stage interfaces
//!
//! Each trait covers one capability slot of the pipeline. Implementations are
//! selected by name through the [`crate::registry::StageRegistry`], receive
//! their options once at init, and are then driven with `&mut CameraFrame`
//! for every frame. All stages except the calibration service are owned by a
//! single pipeline instance; the calibration service is the one object shared
//! across frames and threads, so it synchronizes internally and is driven
//! through `&self`.

use crate::error::Result;
use crate::frame::CameraFrame;
use crate::templates::ObjectTemplateManager;
use drishti_core::PinholeCamera;
use nalgebra::Matrix3;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Plugin locations common to every stage kind.
#[derive(Debug, Clone, Default)]
pub struct PluginInitOptions {
    /// Asset directory, already resolved against the work root.
    pub root_dir: PathBuf,
    /// Plugin-private config file under `root_dir`.
    pub conf_file: PathBuf,
    /// GPU ordinal; stages without device state ignore it.
    pub gpu_id: i32,
}

#[derive(Debug, Clone)]
pub struct DetectorInitOptions {
    pub plugin: PluginInitOptions,
    /// Model of the sensor this detector is bound to.
    pub camera: PinholeCamera,
}

#[derive(Debug, Clone)]
pub struct TrackerInitOptions {
    pub plugin: PluginInitOptions,
    pub image_width: u32,
    pub image_height: u32,
}

#[derive(Clone)]
pub struct TransformerInitOptions {
    pub plugin: PluginInitOptions,
    /// Per-class size templates, shared with the postprocessor.
    pub templates: Option<Arc<ObjectTemplateManager>>,
}

#[derive(Clone)]
pub struct PostprocessorInitOptions {
    pub plugin: PluginInitOptions,
    pub templates: Option<Arc<ObjectTemplateManager>>,
}

#[derive(Debug, Clone)]
pub struct FeatureExtractorInitOptions {
    pub plugin: PluginInitOptions,
}

#[derive(Debug, Clone)]
pub struct LaneDetectorInitOptions {
    pub plugin: PluginInitOptions,
    /// Model of the lane calibration working sensor.
    pub camera: PinholeCamera,
}

#[derive(Debug, Clone)]
pub struct LanePostprocessorInitOptions {
    pub plugin: PluginInitOptions,
    /// Root directory of the lane detector's configuration, so the
    /// postprocessor can stay consistent with whatever the detector emits.
    pub detect_config_root: PathBuf,
    /// Config file name of the lane detector.
    pub detect_config_name: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CalibrationServiceInitOptions {
    /// Sensor whose lane observations produce fresh calibration estimates.
    pub working_sensor_name: String,
    /// Intrinsics for every configured sensor.
    pub name_intrinsic_map: HashMap<String, Matrix3<f32>>,
    /// Estimation method identifier from the configuration.
    pub calibrator_method: String,
    pub image_width: u32,
    pub image_height: u32,
}

/// Per-frame options for obstacle postprocessing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostprocessorOptions {
    /// Refine 3D positions against the calibration service's ground geometry.
    pub do_refinement_with_calibration_service: bool,
}

/// Produces 2D obstacle detections for one sensor.
pub trait ObstacleDetector: Send {
    fn init(&mut self, options: DetectorInitOptions) -> Result<()>;
    /// Fills `frame.detected_objects`.
    fn detect(&mut self, frame: &mut CameraFrame) -> Result<()>;
    fn name(&self) -> &str;
}

impl std::fmt::Debug for dyn ObstacleDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObstacleDetector({})", self.name())
    }
}

/// Maintains obstacle identity across frames.
///
/// The four phases are called in a fixed order within one frame: `predict`
/// before detection, `associate_2d` after features, `associate_3d` after the
/// transformer, and `track` last. The tracker owns whatever state it needs
/// between phases and between frames.
pub trait ObstacleTracker: Send {
    fn init(&mut self, options: TrackerInitOptions) -> Result<()>;
    fn predict(&mut self, frame: &mut CameraFrame) -> Result<()>;
    fn associate_2d(&mut self, frame: &mut CameraFrame) -> Result<()>;
    fn associate_3d(&mut self, frame: &mut CameraFrame) -> Result<()>;
    /// Confirms tracks and fills `frame.tracked_objects`.
    fn track(&mut self, frame: &mut CameraFrame) -> Result<()>;
    fn name(&self) -> &str;
}

/// Lifts 2D detections into the vehicle frame.
pub trait ObstacleTransformer: Send {
    fn init(&mut self, options: TransformerInitOptions) -> Result<()>;
    fn transform(&mut self, frame: &mut CameraFrame) -> Result<()>;
    fn name(&self) -> &str;
}

/// Refines 3D obstacles after the transformer.
pub trait ObstaclePostprocessor: Send {
    fn init(&mut self, options: PostprocessorInitOptions) -> Result<()>;
    fn process(&mut self, options: &PostprocessorOptions, frame: &mut CameraFrame) -> Result<()>;
    fn name(&self) -> &str;
}

/// Computes appearance features for detected obstacles. Optional stage.
pub trait FeatureExtractor: Send {
    fn init(&mut self, options: FeatureExtractorInitOptions) -> Result<()>;
    fn extract(&mut self, frame: &mut CameraFrame) -> Result<()>;
    fn name(&self) -> &str;
}

/// Detects lane lines on the working sensor's imagery.
pub trait LaneDetector: Send {
    fn init(&mut self, options: LaneDetectorInitOptions) -> Result<()>;
    /// Fills `frame.lane_objects` with raw image-space observations.
    fn detect(&mut self, frame: &mut CameraFrame) -> Result<()>;
    fn name(&self) -> &str;
}

/// Refines lane lines in two phases around the calibration update.
pub trait LanePostprocessor: Send {
    fn init(&mut self, options: LanePostprocessorInitOptions) -> Result<()>;
    /// Fits image-space curves and assigns ego/adjacent positions.
    fn process_2d(&mut self, frame: &mut CameraFrame) -> Result<()>;
    /// Projects lanes onto the ground using the frame's calibration fields,
    /// so it must run after the calibration update.
    fn process_3d(&mut self, frame: &mut CameraFrame) -> Result<()>;
    fn name(&self) -> &str;
}

/// Cross-frame calibration state.
///
/// Shared by the pipeline, every frame, and external correction callers, so
/// every method takes `&self` and implementations guard their state with an
/// internal lock.
pub trait CalibrationService: Send + Sync {
    fn init(&mut self, options: CalibrationServiceInitOptions) -> Result<()>;

    /// Updates the service from `frame` and writes the current ground height
    /// and pitch for the frame's sensor into the frame.
    ///
    /// Frames from the working sensor contribute fresh estimates from their
    /// lane observations; frames from any other sensor only receive the
    /// current state and never influence it.
    fn update(&self, frame: &mut CameraFrame) -> Result<()>;

    /// Applies externally supplied corrections. Entries with non-finite or
    /// otherwise unusable values are ignored. Calling twice with the same
    /// arguments leaves the same state.
    fn set_camera_height_and_pitch(
        &self,
        name_camera_ground_height_map: &HashMap<String, f32>,
        name_camera_pitch_angle_diff_map: &HashMap<String, f32>,
        pitch_angle_master_sensor: f32,
    );

    /// Current ground height and effective pitch for `sensor_name`, or `None`
    /// for sensors the service was not initialized with.
    fn query_camera_to_ground_height_and_pitch(&self, sensor_name: &str) -> Option<(f32, f32)>;

    fn name(&self) -> &str;
}
