//! Best-effort debug sinks
//!
//! Every sink is optional and every write failure is logged at warn level and
//! swallowed. Debug output never decides whether a frame succeeds.
//!
//! Per-frame artifacts land in `<dir>/<frame_id>.txt` as one JSON object per
//! line; tracks and poses go to append-mode streams. The detection dumps use
//! the same record layout the `ReplayDetector` consumes, so one run's output
//! can drive the next run's input.

use crate::config::{resolve_under, DebugParam};
use crate::frame::CameraFrame;
use drishti_core::Object;
use serde_json::json;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct DebugSinks {
    lane_out_dir: Option<PathBuf>,
    calibration_out_dir: Option<PathBuf>,
    detection_out_dir: Option<PathBuf>,
    detect_feature_dir: Option<PathBuf>,
    tracked_detection_out_dir: Option<PathBuf>,
    track_out: Option<BufWriter<File>>,
    pose_out: Option<BufWriter<File>>,
}

impl DebugSinks {
    /// Sinks with every output disabled.
    pub fn disabled() -> Self {
        Self {
            lane_out_dir: None,
            calibration_out_dir: None,
            detection_out_dir: None,
            detect_feature_dir: None,
            tracked_detection_out_dir: None,
            track_out: None,
            pose_out: None,
        }
    }

    /// Opens the configured sinks. Failures disable the affected sink with a
    /// warning instead of failing pipeline init.
    pub fn open(param: Option<&DebugParam>, work_root: &Path) -> Self {
        let Some(param) = param else {
            return Self::disabled();
        };

        Self {
            lane_out_dir: prepare_dir(param.lane_out_dir.as_deref(), work_root),
            calibration_out_dir: prepare_dir(param.calibration_out_dir.as_deref(), work_root),
            detection_out_dir: prepare_dir(param.detection_out_dir.as_deref(), work_root),
            detect_feature_dir: prepare_dir(param.detect_feature_dir.as_deref(), work_root),
            tracked_detection_out_dir: prepare_dir(
                param.tracked_detection_out_dir.as_deref(),
                work_root,
            ),
            track_out: open_stream(param.track_out_file.as_deref(), work_root),
            pose_out: open_stream(param.camera2world_out_file.as_deref(), work_root),
        }
    }

    pub fn write_lanelines(&self, frame: &CameraFrame) {
        let Some(dir) = &self.lane_out_dir else { return };
        let result = (|| -> std::io::Result<()> {
            let mut out = BufWriter::new(File::create(frame_path(dir, frame.frame_id))?);
            for lane in &frame.lane_objects {
                let curve = lane.image_curve.map(|c| {
                    json!({
                        "a": c.a,
                        "b": c.b,
                        "c": c.c,
                        "v_start": c.v_start,
                        "v_end": c.v_end,
                    })
                });
                let record = json!({
                    "position": lane.position.as_str(),
                    "confidence": lane.confidence,
                    "curve": curve,
                    "num_image_points": lane.image_points.len(),
                    "num_ground_points": lane.ground_points.len(),
                });
                writeln!(out, "{record}")?;
            }
            out.flush()
        })();
        if let Err(e) = result {
            warn!(frame_id = frame.frame_id, "Failed to write lane debug output: {e}");
        }
    }

    pub fn write_calibration(&self, frame: &CameraFrame) {
        let Some(dir) = &self.calibration_out_dir else { return };
        let record = json!({
            "frame_id": frame.frame_id,
            "sensor": frame.sensor_name,
            "camera_ground_height": frame.camera_ground_height,
            "camera_pitch_angle": frame.camera_pitch_angle,
        });
        if let Err(e) = write_single(dir, frame.frame_id, &record) {
            warn!(
                frame_id = frame.frame_id,
                "Failed to write calibration debug output: {e}"
            );
        }
    }

    pub fn write_detections(&self, frame: &CameraFrame) {
        let Some(dir) = &self.detection_out_dir else { return };
        if let Err(e) = write_objects(dir, frame.frame_id, &frame.detected_objects, false) {
            warn!(
                frame_id = frame.frame_id,
                "Failed to write detection debug output: {e}"
            );
        }
    }

    pub fn write_detect_features(&self, frame: &CameraFrame) {
        let Some(dir) = &self.detect_feature_dir else { return };
        if let Err(e) = write_objects(dir, frame.frame_id, &frame.detected_objects, true) {
            warn!(
                frame_id = frame.frame_id,
                "Failed to write detection feature debug output: {e}"
            );
        }
    }

    pub fn write_tracked_detections(&self, frame: &CameraFrame) {
        let Some(dir) = &self.tracked_detection_out_dir else { return };
        if let Err(e) = write_objects(dir, frame.frame_id, &frame.tracked_objects, false) {
            warn!(
                frame_id = frame.frame_id,
                "Failed to write tracked detection debug output: {e}"
            );
        }
    }

    pub fn write_tracking(&mut self, frame: &CameraFrame) {
        let Some(out) = &mut self.track_out else { return };
        let result = (|| -> std::io::Result<()> {
            for obj in &frame.tracked_objects {
                let record = json!({
                    "frame_id": frame.frame_id,
                    "timestamp": frame.timestamp,
                    "track_id": obj.track_id,
                    "type": obj.object_type.as_str(),
                    "center": [obj.center.x, obj.center.y, obj.center.z],
                    "theta": obj.theta,
                    "velocity": [obj.velocity.x, obj.velocity.y, obj.velocity.z],
                });
                writeln!(out, "{record}")?;
            }
            out.flush()
        })();
        if let Err(e) = result {
            warn!(frame_id = frame.frame_id, "Failed to write track stream: {e}");
        }
    }

    pub fn write_pose(&mut self, frame: &CameraFrame) {
        let Some(out) = &mut self.pose_out else { return };
        let t = frame.camera2world_pose.translation.vector;
        let (roll, pitch, yaw) = frame.camera2world_pose.rotation.euler_angles();
        let record = json!({
            "frame_id": frame.frame_id,
            "timestamp": frame.timestamp,
            "translation": [t.x, t.y, t.z],
            "euler": [roll, pitch, yaw],
        });
        let result = writeln!(out, "{record}").and_then(|_| out.flush());
        if let Err(e) = result {
            warn!(frame_id = frame.frame_id, "Failed to write pose stream: {e}");
        }
    }
}

fn frame_path(dir: &Path, frame_id: u64) -> PathBuf {
    dir.join(format!("{frame_id}.txt"))
}

fn prepare_dir(dir: Option<&Path>, work_root: &Path) -> Option<PathBuf> {
    let dir = resolve_under(work_root, dir?);
    match create_dir_all(&dir) {
        Ok(()) => Some(dir),
        Err(e) => {
            warn!("Failed to create debug directory {}: {e}", dir.display());
            None
        }
    }
}

fn open_stream(path: Option<&Path>, work_root: &Path) -> Option<BufWriter<File>> {
    let path = resolve_under(work_root, path?);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = create_dir_all(parent) {
                warn!("Failed to create debug directory {}: {e}", parent.display());
                return None;
            }
        }
    }
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            warn!("Failed to open debug stream {}: {e}", path.display());
            None
        }
    }
}

fn object_record(obj: &Object, with_features: bool) -> serde_json::Value {
    let mut record = json!({
        "type": obj.object_type.as_str(),
        "confidence": obj.confidence,
        "bbox": [obj.bbox.xmin, obj.bbox.ymin, obj.bbox.xmax, obj.bbox.ymax],
        "center": [obj.center.x, obj.center.y, obj.center.z],
        "size": [obj.size.x, obj.size.y, obj.size.z],
        "theta": obj.theta,
        "track_id": obj.track_id,
        "sensor": obj.camera_supplement.sensor_name,
    });
    if with_features {
        record["features"] = json!(obj.camera_supplement.features);
    }
    record
}

fn write_objects(
    dir: &Path,
    frame_id: u64,
    objects: &[Object],
    with_features: bool,
) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(frame_path(dir, frame_id))?);
    for obj in objects {
        writeln!(out, "{}", object_record(obj, with_features))?;
    }
    out.flush()
}

fn write_single(dir: &Path, frame_id: u64, record: &serde_json::Value) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(frame_path(dir, frame_id))?);
    writeln!(out, "{record}")?;
    out.flush()
}
