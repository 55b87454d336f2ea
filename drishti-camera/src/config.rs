//! Pipeline configuration tree
//!
//! The host deserializes this from whatever source it keeps configuration in
//! and hands it to [`crate::ObstaclePerception::initialize`] already parsed.
//! `validate` is called there before any stage is constructed, so a bad tree
//! never brings up a partial pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Selects one plugin and locates its private configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginParam {
    /// Registered plugin name, e.g. "ReplayDetector".
    pub name: String,
    /// Directory the plugin reads its assets from, relative to the work root
    /// unless absolute.
    #[serde(default)]
    pub root_dir: PathBuf,
    /// Plugin-private config file under `root_dir`.
    #[serde(default)]
    pub config_file: PathBuf,
}

/// One obstacle detector bound to one sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorParam {
    pub sensor_name: String,
    pub plugin: PluginParam,
}

/// Lane stage pair. The postprocessor is handed the detector's config
/// location at init so the two stay consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneParam {
    pub lane_detector: PluginParam,
    pub lane_postprocessor: PluginParam,
}

/// Calibration service selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationServiceParam {
    pub plugin: PluginParam,
    /// Estimation method identifier passed through to the service.
    #[serde(default)]
    pub calibrator_method: String,
}

/// Debug output locations. Every field is optional; unset sinks are skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugParam {
    /// Append-mode stream of tracked obstacles, one line per obstacle.
    #[serde(default)]
    pub track_out_file: Option<PathBuf>,
    /// Append-mode stream of camera-to-world poses, one line per frame.
    #[serde(default)]
    pub camera2world_out_file: Option<PathBuf>,
    /// Per-frame lane line dumps, `<dir>/<frame_id>.txt`.
    #[serde(default)]
    pub lane_out_dir: Option<PathBuf>,
    /// Per-frame calibration dumps.
    #[serde(default)]
    pub calibration_out_dir: Option<PathBuf>,
    /// Per-frame raw detection dumps.
    #[serde(default)]
    pub detection_out_dir: Option<PathBuf>,
    /// Per-frame detection dumps including appearance features.
    #[serde(default)]
    pub detect_feature_dir: Option<PathBuf>,
    /// Per-frame tracked obstacle dumps.
    #[serde(default)]
    pub tracked_detection_out_dir: Option<PathBuf>,
}

/// Size template for one obstacle class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateParam {
    /// Class name as produced by `ObjectType::as_str`.
    pub object_type: String,
    /// Minimum length/width/height in meters.
    pub min: [f32; 3],
    /// Typical dimensions assigned to fresh detections.
    pub mid: [f32; 3],
    /// Maximum dimensions.
    pub max: [f32; 3],
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// GPU ordinal handed to every stage; stages without device state ignore it.
    #[serde(default)]
    pub gpu_id: i32,
    /// One detector per sensor, at least one entry.
    pub detector_params: Vec<DetectorParam>,
    pub tracker_param: Option<PluginParam>,
    pub transformer_param: Option<PluginParam>,
    pub postprocessor_param: Option<PluginParam>,
    /// Optional appearance feature extractor; `None` skips the stage.
    #[serde(default)]
    pub feature_param: Option<PluginParam>,
    pub lane_param: Option<LaneParam>,
    pub calibration_service_param: Option<CalibrationServiceParam>,
    #[serde(default)]
    pub debug_param: Option<DebugParam>,
    /// Per-class size templates; absent means stages fall back to built-in
    /// defaults.
    #[serde(default)]
    pub object_template_param: Option<Vec<TemplateParam>>,
}

impl PerceptionConfig {
    /// Validates structural requirements before the pipeline consumes the tree.
    pub fn validate(&self) -> Result<(), String> {
        if self.detector_params.is_empty() {
            return Err("at least one detector_params entry is required".to_string());
        }

        let mut seen = HashSet::new();
        for param in &self.detector_params {
            if param.sensor_name.is_empty() {
                return Err("detector_params entry has an empty sensor_name".to_string());
            }
            if param.plugin.name.is_empty() {
                return Err(format!(
                    "detector for sensor '{}' has an empty plugin name",
                    param.sensor_name
                ));
            }
            if !seen.insert(param.sensor_name.as_str()) {
                return Err(format!(
                    "duplicate detector entry for sensor '{}'",
                    param.sensor_name
                ));
            }
        }

        let tracker = self
            .tracker_param
            .as_ref()
            .ok_or_else(|| "tracker_param block is required".to_string())?;
        if tracker.name.is_empty() {
            return Err("tracker_param has an empty plugin name".to_string());
        }

        let transformer = self
            .transformer_param
            .as_ref()
            .ok_or_else(|| "transformer_param block is required".to_string())?;
        if transformer.name.is_empty() {
            return Err("transformer_param has an empty plugin name".to_string());
        }

        let postprocessor = self
            .postprocessor_param
            .as_ref()
            .ok_or_else(|| "postprocessor_param block is required".to_string())?;
        if postprocessor.name.is_empty() {
            return Err("postprocessor_param has an empty plugin name".to_string());
        }

        if let Some(feature) = &self.feature_param {
            if feature.name.is_empty() {
                return Err("feature_param has an empty plugin name".to_string());
            }
        }

        let lane = self
            .lane_param
            .as_ref()
            .ok_or_else(|| "lane_param block is required".to_string())?;
        if lane.lane_detector.name.is_empty() {
            return Err("lane_param.lane_detector has an empty plugin name".to_string());
        }
        if lane.lane_postprocessor.name.is_empty() {
            return Err("lane_param.lane_postprocessor has an empty plugin name".to_string());
        }

        let calibration = self
            .calibration_service_param
            .as_ref()
            .ok_or_else(|| "calibration_service_param block is required".to_string())?;
        if calibration.plugin.name.is_empty() {
            return Err("calibration_service_param has an empty plugin name".to_string());
        }

        if let Some(templates) = &self.object_template_param {
            if templates.is_empty() {
                return Err("object_template_param is present but empty".to_string());
            }
        }

        Ok(())
    }
}

/// Options the host supplies alongside the parsed configuration.
#[derive(Debug, Clone)]
pub struct PerceptionInitOptions {
    /// Base directory plugin-relative paths resolve against.
    pub work_root: PathBuf,
    /// Sensor whose lane observations drive online calibration.
    pub lane_calibration_working_sensor: String,
}

impl Default for PerceptionInitOptions {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("."),
            lane_calibration_working_sensor: String::new(),
        }
    }
}

/// Resolves `path` against `work_root` unless it is already absolute.
pub(crate) fn resolve_under(work_root: &Path, path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() || path.is_absolute() {
        path.to_path_buf()
    } else {
        work_root.join(path)
    }
}
