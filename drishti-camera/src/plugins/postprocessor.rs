//! Ground refine postprocessor
//!
//! Clamps 3D sizes into per-class template bounds and, when refinement
//! against the calibration service is requested, re-seats each box on the
//! ground plane the service established for this frame.

use crate::error::{PerceptionError, Result};
use crate::frame::CameraFrame;
use crate::stages::{ObstaclePostprocessor, PostprocessorInitOptions, PostprocessorOptions};
use crate::templates::ObjectTemplateManager;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct GroundRefinePostprocessor {
    templates: Option<Arc<ObjectTemplateManager>>,
    initialized: bool,
}

impl GroundRefinePostprocessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObstaclePostprocessor for GroundRefinePostprocessor {
    fn init(&mut self, options: PostprocessorInitOptions) -> Result<()> {
        self.templates = options.templates;
        self.initialized = true;
        Ok(())
    }

    fn process(&mut self, options: &PostprocessorOptions, frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("postprocessor", "not initialized"));
        }

        let refine = options.do_refinement_with_calibration_service
            && frame.camera_ground_height > 0.0;
        for obj in &mut frame.detected_objects {
            if let Some(templates) = &self.templates {
                obj.size = templates.clamp(obj.object_type, obj.size);
            }
            if refine {
                // Re-seat the box bottom on the calibrated ground plane after
                // any size change moved its center.
                obj.center.z = obj.size.z * 0.5 - frame.camera_ground_height;
            }
        }

        let before = frame.detected_objects.len();
        frame.detected_objects.retain(|obj| {
            obj.center.x.is_finite() && obj.center.y.is_finite() && obj.center.z.is_finite()
        });
        let dropped = before - frame.detected_objects.len();
        if dropped > 0 {
            debug!(
                frame_id = frame.frame_id,
                dropped, "Dropped obstacles with non-finite positions"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "GroundRefinePostprocessor"
    }
}
