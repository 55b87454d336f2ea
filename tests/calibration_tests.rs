//! Calibration service behavior through the shared pipeline handle
//!
//! The calibration service is the only pipeline state visible to other
//! threads: per-frame updates, external corrections and queries may all race.
//! These tests drive it through the `Arc` the pipeline hands out, the way a
//! host would.

use drishti_camera::config::{
    CalibrationServiceParam, DetectorParam, LaneParam, PerceptionConfig, PerceptionInitOptions,
    PluginParam,
};
use drishti_camera::stages::CalibrationService;
use drishti_camera::{CameraFrame, ObstaclePerception, StageRegistry};
use drishti_core::{ImageCurve, LaneLine, LanePosition, PinholeCamera, StaticCameraModelProvider};
use nalgebra::Matrix3;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn intrinsics() -> Matrix3<f32> {
    Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0)
}

fn plugin(name: &str, root: &str) -> PluginParam {
    PluginParam {
        name: name.to_string(),
        root_dir: PathBuf::from(root),
        config_file: PathBuf::new(),
    }
}

fn two_sensor_config() -> PerceptionConfig {
    PerceptionConfig {
        gpu_id: 0,
        detector_params: ["front_6mm", "front_12mm"]
            .iter()
            .map(|sensor| DetectorParam {
                sensor_name: sensor.to_string(),
                plugin: plugin("ReplayDetector", "replay"),
            })
            .collect(),
        tracker_param: Some(plugin("IouObstacleTracker", "")),
        transformer_param: Some(plugin("GroundPlaneTransformer", "")),
        postprocessor_param: Some(plugin("GroundRefinePostprocessor", "")),
        feature_param: None,
        lane_param: Some(LaneParam {
            lane_detector: plugin("ScanlineLaneDetector", ""),
            lane_postprocessor: plugin("PolyfitLanePostprocessor", ""),
        }),
        calibration_service_param: Some(CalibrationServiceParam {
            plugin: plugin("OnlineCalibrationService", ""),
            calibrator_method: "LaneLineCalibrator".to_string(),
        }),
        debug_param: None,
        object_template_param: None,
    }
}

fn shared_calibration(work_root: &TempDir) -> Arc<dyn CalibrationService> {
    let mut provider = StaticCameraModelProvider::new();
    provider.insert("front_6mm", PinholeCamera::new(640, 480, intrinsics()).unwrap());
    provider.insert("front_12mm", PinholeCamera::new(640, 480, intrinsics()).unwrap());

    let options = PerceptionInitOptions {
        work_root: work_root.path().to_path_buf(),
        lane_calibration_working_sensor: "front_6mm".to_string(),
    };
    let pipeline = ObstaclePerception::initialize(
        options,
        two_sensor_config(),
        &provider,
        &StageRegistry::with_builtins(),
    )
    .unwrap();
    pipeline.calibration_service()
}

/// Ego lane pair whose image-space secants meet at row `v0`, column 320.
fn converging_lanes(v0: f32) -> Vec<LaneLine> {
    let mut lanes = Vec::new();
    for (position, slope) in [(LanePosition::EgoLeft, -1.5), (LanePosition::EgoRight, 1.5)] {
        let mut lane = LaneLine::new(position);
        lane.image_curve = Some(ImageCurve {
            a: 0.0,
            b: slope,
            c: 320.0 - slope * v0,
            v_start: 300.0,
            v_end: 460.0,
        });
        lanes.push(lane);
    }
    lanes
}

#[test]
fn test_corrections_race_with_refresh_updates() {
    let work_root = TempDir::new().unwrap();
    let calibration = shared_calibration(&work_root);

    let heights = HashMap::from([
        ("front_6mm".to_string(), 1.6_f32),
        ("front_12mm".to_string(), 1.62_f32),
    ]);
    let diffs = HashMap::from([("front_12mm".to_string(), 0.01_f32)]);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..100 {
                    calibration.set_camera_height_and_pitch(&heights, &diffs, 0.04);
                }
            });
        }
        s.spawn(|| {
            for i in 0..100u64 {
                let mut frame = CameraFrame::new("front_12mm", i, i as f64 * 0.066);
                calibration.update(&mut frame).unwrap();
                // Either the initial default or the corrected value, never
                // anything else.
                assert!(frame.camera_ground_height == 1.5 || frame.camera_ground_height == 1.62);
                assert!(frame.camera_pitch_angle.is_finite());
            }
        });
    });

    let (h6, p6) = calibration
        .query_camera_to_ground_height_and_pitch("front_6mm")
        .unwrap();
    assert_eq!(h6, 1.6);
    assert!((p6 - 0.04).abs() < 1e-6);

    let (h12, p12) = calibration
        .query_camera_to_ground_height_and_pitch("front_12mm")
        .unwrap();
    assert_eq!(h12, 1.62);
    assert!((p12 - 0.05).abs() < 1e-6);
}

#[test]
fn test_working_updates_race_with_corrections() {
    let work_root = TempDir::new().unwrap();
    let calibration = shared_calibration(&work_root);

    // Lane evidence implying roughly 0.04 rad of downward pitch.
    let v0 = 240.0 - 500.0 * 0.04_f32.tan();
    let heights = HashMap::from([("front_6mm".to_string(), 1.7_f32)]);
    let diffs = HashMap::new();

    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..200 {
                calibration.set_camera_height_and_pitch(&heights, &diffs, 0.02);
            }
        });
        s.spawn(|| {
            for i in 0..200u64 {
                let mut frame = CameraFrame::new("front_6mm", i, i as f64 * 0.066);
                frame.lane_objects = converging_lanes(v0);
                calibration.update(&mut frame).unwrap();
            }
        });
    });

    // The last writer wins, but the state is always one of the two values.
    let (height, pitch) = calibration
        .query_camera_to_ground_height_and_pitch("front_6mm")
        .unwrap();
    assert_eq!(height, 1.7);
    assert!((pitch - 0.02).abs() < 1e-4 || (pitch - 0.04).abs() < 1e-3);
}

#[test]
fn test_refresh_updates_never_mutate_state() {
    let work_root = TempDir::new().unwrap();
    let calibration = shared_calibration(&work_root);

    let before = calibration
        .query_camera_to_ground_height_and_pitch("front_6mm")
        .unwrap();

    // Non-working frames carrying lane evidence that would imply a large
    // pitch if it were ever consumed.
    for i in 0..50u64 {
        let mut frame = CameraFrame::new("front_12mm", i, i as f64 * 0.066);
        frame.lane_objects = converging_lanes(100.0);
        calibration.update(&mut frame).unwrap();
    }

    let after = calibration
        .query_camera_to_ground_height_and_pitch("front_6mm")
        .unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_corrections_are_idempotent() {
    let work_root = TempDir::new().unwrap();
    let calibration = shared_calibration(&work_root);

    let heights = HashMap::from([("front_12mm".to_string(), 1.58_f32)]);
    let diffs = HashMap::from([("front_12mm".to_string(), -0.015_f32)]);

    calibration.set_camera_height_and_pitch(&heights, &diffs, 0.03);
    let first = calibration
        .query_camera_to_ground_height_and_pitch("front_12mm")
        .unwrap();
    calibration.set_camera_height_and_pitch(&heights, &diffs, 0.03);
    let second = calibration
        .query_camera_to_ground_height_and_pitch("front_12mm")
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.0, 1.58);
    assert!((first.1 - 0.015).abs() < 1e-6);
}

#[test]
fn test_unusable_corrections_ignored() {
    let work_root = TempDir::new().unwrap();
    let calibration = shared_calibration(&work_root);

    let baseline = calibration
        .query_camera_to_ground_height_and_pitch("front_6mm")
        .unwrap();

    // Negative height, NaN diff, master pitch beyond the outlier bound.
    let heights = HashMap::from([("front_6mm".to_string(), -2.0_f32)]);
    let diffs = HashMap::from([("front_6mm".to_string(), f32::NAN)]);
    calibration.set_camera_height_and_pitch(&heights, &diffs, 0.9);

    let after = calibration
        .query_camera_to_ground_height_and_pitch("front_6mm")
        .unwrap();
    assert_eq!(baseline, after);

    // Sensors outside the configured set stay unknown.
    assert!(calibration
        .query_camera_to_ground_height_and_pitch("rear_6mm")
        .is_none());
}
