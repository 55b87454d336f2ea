//! Ground plane transformer
//!
//! Lifts each detection into the vehicle frame by intersecting the viewing
//! ray of its box footpoint with the ground plane, using the height and pitch
//! the calibration update wrote into the frame earlier in the same pass.

use crate::error::{PerceptionError, Result};
use crate::frame::CameraFrame;
use crate::stages::{ObstacleTransformer, TransformerInitOptions};
use crate::templates::ObjectTemplateManager;
use drishti_core::{ground_point_from_pixel, ObjectType};
use nalgebra::{Point3, Vector3};
use std::sync::Arc;
use tracing::debug;

/// Distance assigned to footpoints at or above the horizon.
const FALLBACK_DEPTH: f32 = 200.0;

/// Typical sizes used when no template is configured, meters.
fn default_size(object_type: ObjectType) -> Vector3<f32> {
    match object_type {
        ObjectType::Vehicle => Vector3::new(4.6, 1.8, 1.6),
        ObjectType::Pedestrian => Vector3::new(0.5, 0.5, 1.7),
        ObjectType::Bicycle => Vector3::new(1.8, 0.6, 1.5),
        ObjectType::Unknown => Vector3::new(1.0, 1.0, 1.0),
    }
}

#[derive(Default)]
pub struct GroundPlaneTransformer {
    templates: Option<Arc<ObjectTemplateManager>>,
    initialized: bool,
}

impl GroundPlaneTransformer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObstacleTransformer for GroundPlaneTransformer {
    fn init(&mut self, options: TransformerInitOptions) -> Result<()> {
        self.templates = options.templates;
        self.initialized = true;
        Ok(())
    }

    fn transform(&mut self, frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("transformer", "not initialized"));
        }
        let k = frame.camera_k_matrix;
        let fx = k[(0, 0)];
        let fy = k[(1, 1)];
        if !(fx > f32::EPSILON && fy > f32::EPSILON) {
            return Err(PerceptionError::stage(
                "transformer",
                format!("degenerate intrinsics fx={fx} fy={fy}"),
            ));
        }
        if frame.camera_ground_height <= 0.0 {
            return Err(PerceptionError::stage(
                "transformer",
                "ground geometry not established before transform",
            ));
        }

        let height = frame.camera_ground_height;
        let pitch = frame.camera_pitch_angle;

        for obj in &mut frame.detected_objects {
            let size = match &self.templates {
                Some(templates) => templates
                    .template(obj.object_type)
                    .map(|t| t.mid)
                    .unwrap_or_else(|| default_size(obj.object_type)),
                None => default_size(obj.object_type),
            };
            obj.size = size;
            obj.theta = 0.0;

            let u = obj.bbox.center_x();
            let v = obj.bbox.ymax;
            let ground = match ground_point_from_pixel(&k, height, pitch, u, v) {
                Some(p) => p,
                None => {
                    // Footpoint at or above the horizon: pin the obstacle at a
                    // far nominal depth along its azimuth instead of failing
                    // the whole frame.
                    debug!(
                        frame_id = frame.frame_id,
                        u, v, "Footpoint above horizon, using fallback depth"
                    );
                    let lateral = -(u - k[(0, 2)]) / fx * FALLBACK_DEPTH;
                    Point3::new(FALLBACK_DEPTH, lateral, -height)
                }
            };
            obj.center = Point3::new(ground.x, ground.y, ground.z + size.z * 0.5);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "GroundPlaneTransformer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::PluginInitOptions;
    use crate::config::TemplateParam;
    use drishti_core::{BBox2D, Object};
    use nalgebra::Matrix3;

    fn make_transformer(templates: Option<Arc<ObjectTemplateManager>>) -> GroundPlaneTransformer {
        let mut transformer = GroundPlaneTransformer::new();
        transformer
            .init(TransformerInitOptions {
                plugin: PluginInitOptions::default(),
                templates,
            })
            .unwrap();
        transformer
    }

    fn calibrated_frame() -> CameraFrame {
        let mut frame = CameraFrame::new("front_6mm", 0, 0.0);
        frame.camera_k_matrix =
            Matrix3::new(1000.0, 0.0, 960.0, 0.0, 1000.0, 540.0, 0.0, 0.0, 1.0);
        frame.camera_ground_height = 1.5;
        frame.camera_pitch_angle = 0.0;
        frame
    }

    #[test]
    fn test_footpoint_projects_to_expected_depth() {
        let mut transformer = make_transformer(None);
        let mut frame = calibrated_frame();
        // Box bottom 100 rows below the optical center, centered laterally:
        // depth = h * fy / (v - cy) = 1.5 * 1000 / 100 = 15 m.
        frame.detected_objects.push(Object::new(
            ObjectType::Vehicle,
            0.9,
            BBox2D::new(910.0, 440.0, 1010.0, 640.0),
        ));
        transformer.transform(&mut frame).unwrap();

        let obj = &frame.detected_objects[0];
        assert!((obj.center.x - 15.0).abs() < 1e-3);
        assert!(obj.center.y.abs() < 1e-3);
        // Box bottom rests on the ground plane.
        assert!((obj.center.z - (-1.5 + obj.size.z * 0.5)).abs() < 1e-4);
        assert_eq!(obj.size, default_size(ObjectType::Vehicle));
    }

    #[test]
    fn test_template_mid_size_applied() {
        let params = [TemplateParam {
            object_type: "vehicle".to_string(),
            min: [3.0, 1.4, 1.2],
            mid: [5.0, 2.0, 1.8],
            max: [12.0, 2.6, 4.0],
        }];
        let templates = Arc::new(ObjectTemplateManager::from_params(&params).unwrap());
        let mut transformer = make_transformer(Some(templates));

        let mut frame = calibrated_frame();
        frame.detected_objects.push(Object::new(
            ObjectType::Vehicle,
            0.9,
            BBox2D::new(910.0, 440.0, 1010.0, 640.0),
        ));
        transformer.transform(&mut frame).unwrap();
        assert_eq!(frame.detected_objects[0].size, Vector3::new(5.0, 2.0, 1.8));
    }

    #[test]
    fn test_above_horizon_uses_fallback_depth() {
        let mut transformer = make_transformer(None);
        let mut frame = calibrated_frame();
        // Box bottom above the optical center on a level camera.
        frame.detected_objects.push(Object::new(
            ObjectType::Vehicle,
            0.9,
            BBox2D::new(910.0, 300.0, 1010.0, 500.0),
        ));
        transformer.transform(&mut frame).unwrap();
        assert!((frame.detected_objects[0].center.x - FALLBACK_DEPTH).abs() < 1e-3);
    }

    #[test]
    fn test_missing_calibration_is_stage_failure() {
        let mut transformer = make_transformer(None);
        let mut frame = calibrated_frame();
        frame.camera_ground_height = 0.0;
        frame.detected_objects.push(Object::new(
            ObjectType::Vehicle,
            0.9,
            BBox2D::new(910.0, 440.0, 1010.0, 640.0),
        ));
        assert!(transformer.transform(&mut frame).is_err());
    }

    #[test]
    fn test_degenerate_intrinsics_rejected() {
        let mut transformer = make_transformer(None);
        let mut frame = calibrated_frame();
        frame.camera_k_matrix = Matrix3::identity();
        frame.camera_k_matrix[(1, 1)] = 0.0;
        frame.detected_objects.push(Object::new(
            ObjectType::Vehicle,
            0.9,
            BBox2D::new(910.0, 440.0, 1010.0, 640.0),
        ));
        assert!(transformer.transform(&mut frame).is_err());
    }
}
