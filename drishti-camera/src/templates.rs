//! Per-class 3D size templates
//!
//! Templates give the transformer a typical size for fresh detections and
//! give the postprocessor bounds to clamp against. They are built once at
//! pipeline init from configuration and shared read-only afterwards.

use crate::config::TemplateParam;
use crate::error::{PerceptionError, Result};
use drishti_core::ObjectType;
use nalgebra::Vector3;
use std::collections::HashMap;

/// Size bounds for one obstacle class, meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeTemplate {
    pub min: Vector3<f32>,
    pub mid: Vector3<f32>,
    pub max: Vector3<f32>,
}

/// Lookup table from obstacle class to size template.
#[derive(Debug, Default)]
pub struct ObjectTemplateManager {
    templates: HashMap<ObjectType, SizeTemplate>,
}

impl ObjectTemplateManager {
    /// Builds the table from configuration, rejecting malformed entries.
    pub fn from_params(params: &[TemplateParam]) -> Result<Self> {
        let mut templates = HashMap::new();
        for param in params {
            let object_type = ObjectType::from_name(&param.object_type).ok_or_else(|| {
                PerceptionError::Config(format!(
                    "object_template_param names unknown class '{}'",
                    param.object_type
                ))
            })?;

            let min = Vector3::from_row_slice(&param.min);
            let mid = Vector3::from_row_slice(&param.mid);
            let max = Vector3::from_row_slice(&param.max);
            for dim in 0..3 {
                let ordered = 0.0 < min[dim] && min[dim] <= mid[dim] && mid[dim] <= max[dim];
                if !ordered || !max[dim].is_finite() {
                    return Err(PerceptionError::Config(format!(
                        "size template for '{}' must satisfy 0 < min <= mid <= max per dimension",
                        param.object_type
                    )));
                }
            }

            if templates
                .insert(object_type, SizeTemplate { min, mid, max })
                .is_some()
            {
                return Err(PerceptionError::Config(format!(
                    "duplicate size template for '{}'",
                    param.object_type
                )));
            }
        }
        Ok(Self { templates })
    }

    pub fn template(&self, object_type: ObjectType) -> Option<&SizeTemplate> {
        self.templates.get(&object_type)
    }

    /// Clamps `size` into the class bounds; classes without a template pass
    /// through unchanged.
    pub fn clamp(&self, object_type: ObjectType, size: Vector3<f32>) -> Vector3<f32> {
        match self.templates.get(&object_type) {
            Some(t) => Vector3::new(
                size.x.clamp(t.min.x, t.max.x),
                size.y.clamp(t.min.y, t.max.y),
                size.z.clamp(t.min.z, t.max.z),
            ),
            None => size,
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
