//! Replay detector
//!
//! Reads pre-recorded detections from `<root_dir>/<sensor_name>/<frame_id>.txt`,
//! one JSON record per line, the same layout the detection debug sink writes.
//! A missing file means the frame simply has no obstacles; a malformed file is
//! a stage failure.

use crate::error::{PerceptionError, Result};
use crate::frame::CameraFrame;
use crate::stages::{DetectorInitOptions, ObstacleDetector};
use drishti_core::{BBox2D, Object, ObjectType};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    #[serde(rename = "type")]
    object_type: String,
    confidence: f32,
    bbox: [f32; 4],
}

/// Detector stage backed by recorded detections.
#[derive(Debug, Default)]
pub struct ReplayDetector {
    root_dir: PathBuf,
    initialized: bool,
}

impl ReplayDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_line(&self, line: &str) -> Result<Object> {
        let record: ReplayRecord = serde_json::from_str(line).map_err(|e| {
            PerceptionError::stage("detector", format!("malformed replay record: {e}"))
        })?;
        let object_type = ObjectType::from_name(&record.object_type).ok_or_else(|| {
            PerceptionError::stage(
                "detector",
                format!("replay record names unknown class '{}'", record.object_type),
            )
        })?;
        let [xmin, ymin, xmax, ymax] = record.bbox;
        let bbox = BBox2D::new(xmin, ymin, xmax, ymax);
        if !bbox.is_valid() {
            return Err(PerceptionError::stage(
                "detector",
                format!("replay record carries a degenerate box {bbox:?}"),
            ));
        }
        Ok(Object::new(object_type, record.confidence, bbox))
    }
}

impl ObstacleDetector for ReplayDetector {
    fn init(&mut self, options: DetectorInitOptions) -> Result<()> {
        if options.plugin.root_dir.as_os_str().is_empty() {
            return Err(PerceptionError::Config(
                "ReplayDetector requires a root_dir".to_string(),
            ));
        }
        self.root_dir = options.plugin.root_dir;
        self.initialized = true;
        Ok(())
    }

    fn detect(&mut self, frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("detector", "not initialized"));
        }

        frame.detected_objects.clear();
        let path = self
            .root_dir
            .join(&frame.sensor_name)
            .join(format!("{}.txt", frame.frame_id));

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    sensor = %frame.sensor_name,
                    frame_id = frame.frame_id,
                    "No replay record, emitting empty detection set"
                );
                return Ok(());
            }
            Err(e) => {
                return Err(PerceptionError::stage(
                    "detector",
                    format!("failed to read {}: {e}", path.display()),
                ))
            }
        };

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            frame.detected_objects.push(self.parse_line(line)?);
        }

        debug!(
            sensor = %frame.sensor_name,
            frame_id = frame.frame_id,
            count = frame.detected_objects.len(),
            "Replayed detections"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "ReplayDetector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::PluginInitOptions;
    use drishti_core::PinholeCamera;
    use nalgebra::Matrix3;
    use tempfile::tempdir;

    fn init_options(root: PathBuf) -> DetectorInitOptions {
        let k = Matrix3::new(1000.0, 0.0, 960.0, 0.0, 1000.0, 540.0, 0.0, 0.0, 1.0);
        DetectorInitOptions {
            plugin: PluginInitOptions {
                root_dir: root,
                conf_file: PathBuf::new(),
                gpu_id: 0,
            },
            camera: PinholeCamera::new(1920, 1080, k).unwrap(),
        }
    }

    #[test]
    fn test_init_requires_root_dir() {
        let mut detector = ReplayDetector::new();
        assert!(detector.init(init_options(PathBuf::new())).is_err());
    }

    #[test]
    fn test_replays_recorded_detections() {
        let dir = tempdir().unwrap();
        let sensor_dir = dir.path().join("front_6mm");
        std::fs::create_dir_all(&sensor_dir).unwrap();
        std::fs::write(
            sensor_dir.join("3.txt"),
            concat!(
                "{\"type\":\"vehicle\",\"confidence\":0.9,\"bbox\":[100.0,200.0,300.0,400.0]}\n",
                "{\"type\":\"pedestrian\",\"confidence\":0.7,\"bbox\":[10.0,20.0,30.0,80.0]}\n",
            ),
        )
        .unwrap();

        let mut detector = ReplayDetector::new();
        detector.init(init_options(dir.path().to_path_buf())).unwrap();

        let mut frame = CameraFrame::new("front_6mm", 3, 0.1);
        detector.detect(&mut frame).unwrap();

        assert_eq!(frame.detected_objects.len(), 2);
        assert_eq!(frame.detected_objects[0].object_type, ObjectType::Vehicle);
        assert_eq!(frame.detected_objects[0].track_id, -1);
        assert_eq!(frame.detected_objects[1].bbox.ymax, 80.0);
    }

    #[test]
    fn test_missing_file_yields_empty_frame() {
        let dir = tempdir().unwrap();
        let mut detector = ReplayDetector::new();
        detector.init(init_options(dir.path().to_path_buf())).unwrap();

        let mut frame = CameraFrame::new("front_6mm", 99, 0.1);
        frame.detected_objects.push(Object::new(
            ObjectType::Vehicle,
            0.5,
            BBox2D::new(0.0, 0.0, 1.0, 1.0),
        ));
        detector.detect(&mut frame).unwrap();
        assert!(frame.detected_objects.is_empty());
    }

    #[test]
    fn test_malformed_record_is_stage_failure() {
        let dir = tempdir().unwrap();
        let sensor_dir = dir.path().join("front_6mm");
        std::fs::create_dir_all(&sensor_dir).unwrap();
        std::fs::write(sensor_dir.join("1.txt"), "not json\n").unwrap();

        let mut detector = ReplayDetector::new();
        detector.init(init_options(dir.path().to_path_buf())).unwrap();

        let mut frame = CameraFrame::new("front_6mm", 1, 0.1);
        assert!(detector.detect(&mut frame).is_err());
    }

    #[test]
    fn test_degenerate_box_rejected() {
        let dir = tempdir().unwrap();
        let sensor_dir = dir.path().join("front_6mm");
        std::fs::create_dir_all(&sensor_dir).unwrap();
        std::fs::write(
            sensor_dir.join("1.txt"),
            "{\"type\":\"vehicle\",\"confidence\":0.9,\"bbox\":[300.0,400.0,100.0,200.0]}\n",
        )
        .unwrap();

        let mut detector = ReplayDetector::new();
        detector.init(init_options(dir.path().to_path_buf())).unwrap();

        let mut frame = CameraFrame::new("front_6mm", 1, 0.1);
        assert!(detector.detect(&mut frame).is_err());
    }
}
