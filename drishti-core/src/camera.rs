//! Camera models and ground-plane geometry
//!
//! Coordinate conventions used across the stack:
//! - Image frame: `u` grows right, `v` grows down, origin at the top-left pixel.
//! - Intrinsic matrix `K = [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
//! - Vehicle frame: `x` forward, `y` left, `z` up, origin at the camera's
//!   optical center. The ground plane sits at `z = -camera_height`.
//! - `pitch` is positive when the camera is tilted down toward the ground.

use crate::error::{Error, Result};
use nalgebra::{Matrix3, Point3};
use std::collections::HashMap;

/// Pinhole camera model with fixed image dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
    width: u32,
    height: u32,
    intrinsics: Matrix3<f32>,
}

impl PinholeCamera {
    /// Creates a camera model, validating dimensions and focal lengths.
    pub fn new(width: u32, height: u32, intrinsics: Matrix3<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidCameraModel(format!(
                "image dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let fx = intrinsics[(0, 0)];
        let fy = intrinsics[(1, 1)];
        if !(fx.is_finite() && fy.is_finite() && fx > 0.0 && fy > 0.0) {
            return Err(Error::InvalidCameraModel(format!(
                "focal lengths must be finite and positive, got fx={} fy={}",
                fx, fy
            )));
        }
        Ok(Self {
            width,
            height,
            intrinsics,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn intrinsics(&self) -> Matrix3<f32> {
        self.intrinsics
    }

    pub fn fx(&self) -> f32 {
        self.intrinsics[(0, 0)]
    }

    pub fn fy(&self) -> f32 {
        self.intrinsics[(1, 1)]
    }

    pub fn cx(&self) -> f32 {
        self.intrinsics[(0, 2)]
    }

    pub fn cy(&self) -> f32 {
        self.intrinsics[(1, 2)]
    }
}

/// Source of camera models, keyed by sensor name.
///
/// Hosts implement this against whatever holds their calibration data; the
/// pipeline initializer resolves every configured sensor through it exactly
/// once and treats a miss as fatal.
pub trait CameraModelProvider {
    /// Returns the model for `sensor_name`, or `None` if the sensor is unknown.
    fn model(&self, sensor_name: &str) -> Option<PinholeCamera>;
}

/// In-memory provider backed by a name -> model map.
#[derive(Debug, Clone, Default)]
pub struct StaticCameraModelProvider {
    models: HashMap<String, PinholeCamera>,
}

impl StaticCameraModelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sensor_name: impl Into<String>, model: PinholeCamera) {
        self.models.insert(sensor_name.into(), model);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl CameraModelProvider for StaticCameraModelProvider {
    fn model(&self, sensor_name: &str) -> Option<PinholeCamera> {
        self.models.get(sensor_name).cloned()
    }
}

/// Intersects the viewing ray of pixel `(u, v)` with the ground plane.
///
/// The camera sits `camera_height` meters above flat ground and is pitched
/// down by `pitch` radians. Returns the intersection in the vehicle frame,
/// or `None` when the ray points at or above the horizon (or the inputs are
/// degenerate).
pub fn ground_point_from_pixel(
    k: &Matrix3<f32>,
    camera_height: f32,
    pitch: f32,
    u: f32,
    v: f32,
) -> Option<Point3<f32>> {
    let fx = k[(0, 0)];
    let fy = k[(1, 1)];
    let cx = k[(0, 2)];
    let cy = k[(1, 2)];
    if !(fx > f32::EPSILON && fy > f32::EPSILON) || !camera_height.is_finite() {
        return None;
    }
    if camera_height <= 0.0 || !(u.is_finite() && v.is_finite() && pitch.is_finite()) {
        return None;
    }

    // Normalized ray in the camera frame (x right, y down, z forward).
    let rx = (u - cx) / fx;
    let ry = (v - cy) / fy;
    let (sp, cp) = pitch.sin_cos();

    // Rotate the ray into the level frame; `down` is the component toward the
    // ground, `forward` the horizontal component along the optical azimuth.
    let down = ry * cp + sp;
    let forward = cp - ry * sp;
    if down <= 1e-6 {
        // Ray at or above the horizon never meets the ground.
        return None;
    }

    let t = camera_height / down;
    let x = t * forward;
    if x <= 0.0 {
        return None;
    }
    let y = -t * rx;
    Some(Point3::new(x, y, -camera_height))
}
