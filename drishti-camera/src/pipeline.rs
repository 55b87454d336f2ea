//! Obstacle perception pipeline
//!
//! [`ObstaclePerception::initialize`] resolves every configured stage through
//! the registry and fails fast on the first problem; a pipeline either comes
//! up complete or not at all. [`ObstaclePerception::process`] then drives one
//! frame through the fixed stage order, aborting on the first stage failure.
//! One frame is in flight per pipeline instance; the calibration service is
//! the only state shared beyond that.

use crate::config::{resolve_under, PerceptionConfig, PerceptionInitOptions, PluginParam};
use crate::debug::DebugSinks;
use crate::error::{PerceptionError, Result};
use crate::frame::CameraFrame;
use crate::registry::StageRegistry;
use crate::stages::{
    CalibrationService, CalibrationServiceInitOptions, DetectorInitOptions, FeatureExtractor,
    FeatureExtractorInitOptions, LaneDetector, LaneDetectorInitOptions, LanePostprocessor,
    LanePostprocessorInitOptions, ObstacleDetector, ObstaclePostprocessor, ObstacleTracker,
    ObstacleTransformer, PluginInitOptions, PostprocessorInitOptions, PostprocessorOptions,
    TrackerInitOptions, TransformerInitOptions,
};
use crate::templates::ObjectTemplateManager;
use drishti_core::{CameraModelProvider, PinholeCamera};
use nalgebra::Matrix3;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct ObstaclePerception {
    name_intrinsic_map: HashMap<String, Matrix3<f32>>,
    name_detector_map: HashMap<String, Box<dyn ObstacleDetector>>,
    tracker: Box<dyn ObstacleTracker>,
    transformer: Box<dyn ObstacleTransformer>,
    postprocessor: Box<dyn ObstaclePostprocessor>,
    feature_extractor: Option<Box<dyn FeatureExtractor>>,
    lane_detector: Box<dyn LaneDetector>,
    lane_postprocessor: Box<dyn LanePostprocessor>,
    calibration_service: Arc<dyn CalibrationService>,
    working_sensor: String,
    debug: DebugSinks,
}

impl ObstaclePerception {
    /// Builds every configured stage. Any failure is fatal and nothing of the
    /// partially built pipeline survives.
    pub fn initialize(
        options: PerceptionInitOptions,
        config: PerceptionConfig,
        provider: &dyn CameraModelProvider,
        registry: &StageRegistry,
    ) -> Result<Self> {
        config.validate().map_err(PerceptionError::Config)?;

        let work_root = options.work_root.as_path();
        info!(
            work_root = %work_root.display(),
            working_sensor = %options.lane_calibration_working_sensor,
            "Initializing obstacle perception pipeline"
        );

        let templates = match &config.object_template_param {
            Some(params) => Some(Arc::new(ObjectTemplateManager::from_params(params)?)),
            None => None,
        };

        let mut name_intrinsic_map = HashMap::new();
        let mut name_detector_map = HashMap::new();
        let mut last_model: Option<PinholeCamera> = None;
        let mut working_model: Option<PinholeCamera> = None;

        for param in &config.detector_params {
            let model = provider.model(&param.sensor_name).ok_or_else(|| {
                PerceptionError::CameraModel(format!(
                    "no camera model for sensor '{}'",
                    param.sensor_name
                ))
            })?;
            name_intrinsic_map.insert(param.sensor_name.clone(), model.intrinsics());
            if param.sensor_name == options.lane_calibration_working_sensor {
                working_model = Some(model.clone());
            }

            let mut detector = registry.detectors.create(&param.plugin.name)?;
            detector
                .init(DetectorInitOptions {
                    plugin: plugin_options(work_root, &param.plugin, config.gpu_id),
                    camera: model.clone(),
                })
                .map_err(|e| stage_init("detector", &param.plugin.name, e))?;
            info!(
                sensor = %param.sensor_name,
                plugin = %param.plugin.name,
                "Detector initialized"
            );
            name_detector_map.insert(param.sensor_name.clone(), detector);
            last_model = Some(model);
        }

        // validate() guarantees at least one detector entry.
        let reference_model = last_model.ok_or_else(|| {
            PerceptionError::Config("detector_params must not be empty".to_string())
        })?;

        let tracker_param = required(&config.tracker_param, "tracker_param")?;
        let mut tracker = registry.trackers.create(&tracker_param.name)?;
        tracker
            .init(TrackerInitOptions {
                plugin: plugin_options(work_root, tracker_param, config.gpu_id),
                image_width: reference_model.width(),
                image_height: reference_model.height(),
            })
            .map_err(|e| stage_init("tracker", &tracker_param.name, e))?;

        let transformer_param = required(&config.transformer_param, "transformer_param")?;
        let mut transformer = registry.transformers.create(&transformer_param.name)?;
        transformer
            .init(TransformerInitOptions {
                plugin: plugin_options(work_root, transformer_param, config.gpu_id),
                templates: templates.clone(),
            })
            .map_err(|e| stage_init("transformer", &transformer_param.name, e))?;

        let postprocessor_param = required(&config.postprocessor_param, "postprocessor_param")?;
        let mut postprocessor = registry.postprocessors.create(&postprocessor_param.name)?;
        postprocessor
            .init(PostprocessorInitOptions {
                plugin: plugin_options(work_root, postprocessor_param, config.gpu_id),
                templates: templates.clone(),
            })
            .map_err(|e| stage_init("postprocessor", &postprocessor_param.name, e))?;

        let feature_extractor = match &config.feature_param {
            Some(param) => {
                let mut extractor = registry.feature_extractors.create(&param.name)?;
                extractor
                    .init(FeatureExtractorInitOptions {
                        plugin: plugin_options(work_root, param, config.gpu_id),
                    })
                    .map_err(|e| stage_init("feature extractor", &param.name, e))?;
                Some(extractor)
            }
            None => {
                info!("No feature extractor configured, skipping the stage");
                None
            }
        };

        let lane_param = config
            .lane_param
            .as_ref()
            .ok_or_else(|| PerceptionError::Config("lane_param block is required".to_string()))?;
        // Lane stages only ever see working-sensor frames.
        let lane_model = working_model.unwrap_or_else(|| reference_model.clone());
        let mut lane_detector = registry.lane_detectors.create(&lane_param.lane_detector.name)?;
        let lane_detector_options = plugin_options(work_root, &lane_param.lane_detector, config.gpu_id);
        let detect_config_root = lane_detector_options.root_dir.clone();
        let detect_config_name = lane_detector_options.conf_file.clone();
        lane_detector
            .init(LaneDetectorInitOptions {
                plugin: lane_detector_options,
                camera: lane_model,
            })
            .map_err(|e| stage_init("lane detector", &lane_param.lane_detector.name, e))?;

        let mut lane_postprocessor = registry
            .lane_postprocessors
            .create(&lane_param.lane_postprocessor.name)?;
        lane_postprocessor
            .init(LanePostprocessorInitOptions {
                plugin: plugin_options(work_root, &lane_param.lane_postprocessor, config.gpu_id),
                detect_config_root,
                detect_config_name,
            })
            .map_err(|e| stage_init("lane postprocessor", &lane_param.lane_postprocessor.name, e))?;

        let calibration_param = config.calibration_service_param.as_ref().ok_or_else(|| {
            PerceptionError::Config("calibration_service_param block is required".to_string())
        })?;
        let mut calibration = registry
            .calibration_services
            .create(&calibration_param.plugin.name)?;
        calibration
            .init(CalibrationServiceInitOptions {
                working_sensor_name: options.lane_calibration_working_sensor.clone(),
                name_intrinsic_map: name_intrinsic_map.clone(),
                calibrator_method: calibration_param.calibrator_method.clone(),
                image_width: reference_model.width(),
                image_height: reference_model.height(),
            })
            .map_err(|e| stage_init("calibration service", &calibration_param.plugin.name, e))?;
        let calibration_service: Arc<dyn CalibrationService> = Arc::from(calibration);

        let debug = DebugSinks::open(config.debug_param.as_ref(), work_root);

        info!(
            sensors = name_detector_map.len(),
            "Obstacle perception pipeline initialized"
        );

        Ok(Self {
            name_intrinsic_map,
            name_detector_map,
            tracker,
            transformer,
            postprocessor,
            feature_extractor,
            lane_detector,
            lane_postprocessor,
            calibration_service,
            working_sensor: options.lane_calibration_working_sensor,
            debug,
        })
    }

    /// Runs one frame through the full stage order. The first stage failure
    /// aborts the frame; debug emission never does.
    pub fn process(&mut self, frame: &mut CameraFrame) -> Result<()> {
        let sensor_name = frame.sensor_name.clone();

        let Some(k) = self.name_intrinsic_map.get(&sensor_name).copied() else {
            error!(sensor = %sensor_name, "No intrinsics registered for sensor");
            return Err(PerceptionError::UnknownSensor(sensor_name));
        };
        frame.camera_k_matrix = k;

        let Some(calibration) = frame.calibration_service.clone() else {
            error!(
                sensor = %sensor_name,
                frame_id = frame.frame_id,
                "Frame arrived without a calibration service"
            );
            return Err(PerceptionError::MissingCalibrationService);
        };

        if sensor_name == self.working_sensor {
            if let Err(e) = self.lane_detector.detect(frame) {
                error!(frame_id = frame.frame_id, "Failed to detect lane lines: {e}");
                return Err(e);
            }
            if let Err(e) = self.lane_postprocessor.process_2d(frame) {
                error!(
                    frame_id = frame.frame_id,
                    "Failed to postprocess lane lines in 2D: {e}"
                );
                return Err(e);
            }
            if let Err(e) = calibration.update(frame) {
                error!(
                    frame_id = frame.frame_id,
                    "Failed to update calibration from working sensor: {e}"
                );
                return Err(e);
            }
            if let Err(e) = self.lane_postprocessor.process_3d(frame) {
                error!(
                    frame_id = frame.frame_id,
                    "Failed to postprocess lane lines in 3D: {e}"
                );
                return Err(e);
            }
            self.debug.write_lanelines(frame);
        } else {
            info!(
                sensor = %sensor_name,
                "Skipping lane detection, syncing calibration from the working sensor estimate"
            );
            if let Err(e) = calibration.update(frame) {
                error!(frame_id = frame.frame_id, "Failed to refresh calibration: {e}");
                return Err(e);
            }
        }

        self.debug.write_calibration(frame);

        if let Err(e) = self.tracker.predict(frame) {
            error!(frame_id = frame.frame_id, "Failed to predict tracks: {e}");
            return Err(e);
        }

        let Some(detector) = self.name_detector_map.get_mut(&sensor_name) else {
            error!(sensor = %sensor_name, "No detector bound to sensor");
            return Err(PerceptionError::UnknownSensor(sensor_name));
        };
        if let Err(e) = detector.detect(frame) {
            error!(frame_id = frame.frame_id, "Failed to detect obstacles: {e}");
            return Err(e);
        }
        self.debug.write_detections(frame);

        if let Some(extractor) = self.feature_extractor.as_mut() {
            if let Err(e) = extractor.extract(frame) {
                error!(frame_id = frame.frame_id, "Failed to extract features: {e}");
                return Err(e);
            }
        }
        self.debug.write_detect_features(frame);

        // Every detection carries its producing sensor from here on, so
        // identity survives tracking across cameras.
        for obj in &mut frame.detected_objects {
            obj.camera_supplement.sensor_name = sensor_name.clone();
        }

        if let Err(e) = self.tracker.associate_2d(frame) {
            error!(frame_id = frame.frame_id, "Failed to associate tracks in 2D: {e}");
            return Err(e);
        }
        if let Err(e) = self.transformer.transform(frame) {
            error!(frame_id = frame.frame_id, "Failed to transform obstacles to 3D: {e}");
            return Err(e);
        }

        let postprocessor_options = PostprocessorOptions {
            do_refinement_with_calibration_service: frame.calibration_service.is_some(),
        };
        if let Err(e) = self.postprocessor.process(&postprocessor_options, frame) {
            error!(frame_id = frame.frame_id, "Failed to postprocess obstacles: {e}");
            return Err(e);
        }

        if let Err(e) = self.tracker.associate_3d(frame) {
            error!(frame_id = frame.frame_id, "Failed to associate tracks in 3D: {e}");
            return Err(e);
        }
        if let Err(e) = self.tracker.track(frame) {
            error!(frame_id = frame.frame_id, "Failed to update tracks: {e}");
            return Err(e);
        }

        self.debug.write_pose(frame);
        self.debug.write_tracking(frame);
        self.debug.write_tracked_detections(frame);

        for obj in &mut frame.tracked_objects {
            obj.fill_polygon_from_bbox3d();
            obj.anchor_point = obj.center;
        }

        debug!(
            sensor = %sensor_name,
            frame_id = frame.frame_id,
            detected = frame.detected_objects.len(),
            tracked = frame.tracked_objects.len(),
            "Frame processed"
        );
        Ok(())
    }

    /// The shared calibration service. Hosts stamp this onto every frame and
    /// may hold it for external corrections and queries.
    pub fn calibration_service(&self) -> Arc<dyn CalibrationService> {
        Arc::clone(&self.calibration_service)
    }

    /// Forwards externally measured corrections to the calibration service.
    pub fn set_camera_height_and_pitch(
        &self,
        name_camera_ground_height_map: &HashMap<String, f32>,
        name_camera_pitch_angle_diff_map: &HashMap<String, f32>,
        pitch_angle_master_sensor: f32,
    ) {
        self.calibration_service.set_camera_height_and_pitch(
            name_camera_ground_height_map,
            name_camera_pitch_angle_diff_map,
            pitch_angle_master_sensor,
        );
    }

    pub fn working_sensor(&self) -> &str {
        &self.working_sensor
    }

    /// Configured sensors, sorted by name.
    pub fn sensor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.name_intrinsic_map.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn intrinsics(&self, sensor_name: &str) -> Option<Matrix3<f32>> {
        self.name_intrinsic_map.get(sensor_name).copied()
    }
}

impl std::fmt::Debug for ObstaclePerception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObstaclePerception")
            .field("working_sensor", &self.working_sensor)
            .finish_non_exhaustive()
    }
}

fn plugin_options(work_root: &Path, param: &PluginParam, gpu_id: i32) -> PluginInitOptions {
    PluginInitOptions {
        root_dir: resolve_under(work_root, &param.root_dir),
        conf_file: param.config_file.clone(),
        gpu_id,
    }
}

fn required<'a>(param: &'a Option<PluginParam>, block: &str) -> Result<&'a PluginParam> {
    param
        .as_ref()
        .ok_or_else(|| PerceptionError::Config(format!("{block} block is required")))
}

fn stage_init(stage: &'static str, name: &str, source: PerceptionError) -> PerceptionError {
    PerceptionError::StageInit {
        stage,
        name: name.to_string(),
        reason: source.to_string(),
    }
}
