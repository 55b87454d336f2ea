//! Two-camera replay walkthrough
//!
//! Builds a pipeline over front_6mm (the lane calibration working sensor) and
//! front_12mm, feeds it synthetic imagery and recorded detections, and prints
//! what the tracker and the calibration service make of them.

use bytes::Bytes;
use drishti_camera::config::{
    CalibrationServiceParam, DebugParam, DetectorParam, LaneParam, PerceptionConfig,
    PerceptionInitOptions, PluginParam, TemplateParam,
};
use drishti_camera::{CameraFrame, ObstaclePerception, SensorImage, StageRegistry};
use drishti_core::{PinholeCamera, StaticCameraModelProvider};
use nalgebra::Matrix3;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const FRAMES: u64 = 5;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let work_root = tempfile::tempdir()?;
    info!(work_root = %work_root.path().display(), "Demo work root");

    write_replay_data(work_root.path().join("replay"))?;

    // Both sensors share the same optics in this demo.
    let k = Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
    let mut provider = StaticCameraModelProvider::new();
    provider.insert("front_6mm", PinholeCamera::new(WIDTH, HEIGHT, k)?);
    provider.insert("front_12mm", PinholeCamera::new(WIDTH, HEIGHT, k)?);

    let options = PerceptionInitOptions {
        work_root: work_root.path().to_path_buf(),
        lane_calibration_working_sensor: "front_6mm".to_string(),
    };
    let mut pipeline = ObstaclePerception::initialize(
        options,
        demo_config(),
        &provider,
        &StageRegistry::with_builtins(),
    )?;
    let calibration = pipeline.calibration_service();

    // The working sensor sees a road with two lane lines converging toward a
    // vanishing point slightly above the optical center, so online
    // calibration can estimate a small downward pitch.
    let road = road_image()?;

    for frame_id in 0..FRAMES {
        for sensor in ["front_6mm", "front_12mm"] {
            let mut frame = CameraFrame::new(sensor, frame_id, frame_id as f64 * 0.066);
            frame.calibration_service = Some(calibration.clone());
            if sensor == "front_6mm" {
                frame.image = Some(road.clone());
            }
            pipeline.process(&mut frame)?;

            println!(
                "frame {frame_id} {sensor}: {} lanes, {} tracked",
                frame.lane_objects.len(),
                frame.tracked_objects.len()
            );
            for obj in &frame.tracked_objects {
                println!(
                    "  track {} {:?} at ({:.1} m ahead, {:.1} m left)",
                    obj.track_id, obj.object_type, obj.center.x, obj.center.y
                );
            }
        }
    }

    for sensor in ["front_6mm", "front_12mm"] {
        if let Some((height, pitch)) = calibration.query_camera_to_ground_height_and_pitch(sensor) {
            println!("{sensor}: height {height:.2} m, pitch {pitch:.4} rad");
        }
    }

    // An offline extrinsics measurement arrives for front_12mm.
    let heights = HashMap::from([("front_12mm".to_string(), 1.62_f32)]);
    let diffs = HashMap::from([("front_12mm".to_string(), 0.01_f32)]);
    pipeline.set_camera_height_and_pitch(&heights, &diffs, 0.04);
    if let Some((height, pitch)) =
        calibration.query_camera_to_ground_height_and_pitch("front_12mm")
    {
        println!("front_12mm after correction: height {height:.2} m, pitch {pitch:.4} rad");
    }

    println!(
        "debug dumps under {}",
        work_root.path().join("debug").display()
    );
    Ok(())
}

/// Recorded detections: a vehicle drifting right in front_6mm and a
/// pedestrian holding still in front_12mm.
fn write_replay_data(root: PathBuf) -> anyhow::Result<()> {
    for frame_id in 0..FRAMES {
        let shift = frame_id as f32 * 4.0;
        let vehicle = format!(
            "{{\"type\":\"vehicle\",\"confidence\":0.92,\"bbox\":[{},260.0,{},340.0]}}\n",
            260.0 + shift,
            380.0 + shift
        );
        let dir = root.join("front_6mm");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(format!("{frame_id}.txt")), vehicle)?;

        let pedestrian =
            "{\"type\":\"pedestrian\",\"confidence\":0.80,\"bbox\":[500.0,250.0,530.0,330.0]}\n";
        let dir = root.join("front_12mm");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(format!("{frame_id}.txt")), pedestrian)?;
    }
    Ok(())
}

/// Dark road surface with two bright lane lines meeting at (320, 220).
fn road_image() -> anyhow::Result<SensorImage> {
    let mut data = vec![40u8; (WIDTH * HEIGHT) as usize];
    let (vp_u, vp_v) = (320.0_f32, 220.0_f32);
    for bottom_u in [200.0_f32, 440.0] {
        let slope = (bottom_u - vp_u) / (HEIGHT as f32 - vp_v);
        for v in (vp_v as u32)..HEIGHT {
            let u_center = vp_u + slope * (v as f32 - vp_v);
            let lo = (u_center - 5.0).max(0.0) as u32;
            let hi = ((u_center + 5.0) as u32).min(WIDTH - 1);
            for u in lo..=hi {
                data[(v * WIDTH + u) as usize] = 230;
            }
        }
    }
    Ok(SensorImage::new(WIDTH, HEIGHT, Bytes::from(data))?)
}

fn plugin(name: &str, root: &str) -> PluginParam {
    PluginParam {
        name: name.to_string(),
        root_dir: PathBuf::from(root),
        config_file: PathBuf::new(),
    }
}

fn demo_config() -> PerceptionConfig {
    PerceptionConfig {
        gpu_id: 0,
        detector_params: vec![
            DetectorParam {
                sensor_name: "front_6mm".to_string(),
                plugin: plugin("ReplayDetector", "replay"),
            },
            DetectorParam {
                sensor_name: "front_12mm".to_string(),
                plugin: plugin("ReplayDetector", "replay"),
            },
        ],
        tracker_param: Some(plugin("IouObstacleTracker", "")),
        transformer_param: Some(plugin("GroundPlaneTransformer", "")),
        postprocessor_param: Some(plugin("GroundRefinePostprocessor", "")),
        feature_param: Some(plugin("IntensityFeatureExtractor", "")),
        lane_param: Some(LaneParam {
            lane_detector: plugin("ScanlineLaneDetector", ""),
            lane_postprocessor: plugin("PolyfitLanePostprocessor", ""),
        }),
        calibration_service_param: Some(CalibrationServiceParam {
            plugin: plugin("OnlineCalibrationService", ""),
            calibrator_method: "LaneLineCalibrator".to_string(),
        }),
        debug_param: Some(DebugParam {
            track_out_file: Some(PathBuf::from("debug/tracks.jsonl")),
            camera2world_out_file: Some(PathBuf::from("debug/poses.jsonl")),
            lane_out_dir: Some(PathBuf::from("debug/lanes")),
            calibration_out_dir: Some(PathBuf::from("debug/calibration")),
            detection_out_dir: Some(PathBuf::from("debug/detections")),
            detect_feature_dir: Some(PathBuf::from("debug/features")),
            tracked_detection_out_dir: Some(PathBuf::from("debug/tracked")),
        }),
        object_template_param: Some(vec![
            TemplateParam {
                object_type: "vehicle".to_string(),
                min: [3.2, 1.4, 1.2],
                mid: [4.5, 1.8, 1.6],
                max: [12.0, 2.6, 4.0],
            },
            TemplateParam {
                object_type: "pedestrian".to_string(),
                min: [0.3, 0.3, 1.2],
                mid: [0.5, 0.5, 1.7],
                max: [1.0, 1.0, 2.2],
            },
        ]),
    }
}
