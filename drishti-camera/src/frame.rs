//! Per-frame working set passed through the pipeline
//!
//! A [`CameraFrame`] is owned by exactly one caller at a time; the pipeline
//! borrows it mutably for the duration of one `process` call and every stage
//! reads and writes it in turn. The only shared state it references is the
//! calibration service.

use crate::error::{PerceptionError, Result};
use crate::stages::CalibrationService;
use bytes::Bytes;
use drishti_core::{LaneLine, Object};
use nalgebra::{Isometry3, Matrix3};
use std::sync::Arc;

/// 8-bit grayscale image, row-major.
#[derive(Debug, Clone)]
pub struct SensorImage {
    width: u32,
    height: u32,
    data: Bytes,
}

impl SensorImage {
    /// Wraps a pixel buffer, checking that it matches the declared dimensions.
    pub fn new(width: u32, height: u32, data: Bytes) -> Result<Self> {
        let expected = width as usize * height as usize;
        if expected == 0 {
            return Err(PerceptionError::Config(format!(
                "image dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        if data.len() != expected {
            return Err(PerceptionError::Config(format!(
                "image buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel intensity at `(x, y)`, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x < self.width && y < self.height {
            Some(self.data[y as usize * self.width as usize + x as usize])
        } else {
            None
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Everything the pipeline knows about one camera frame.
pub struct CameraFrame {
    /// Sensor that captured this frame; selects the detector and intrinsics.
    pub sensor_name: String,
    /// Monotonically increasing identifier assigned by the host.
    pub frame_id: u64,
    /// Capture time in seconds.
    pub timestamp: f64,
    /// Pixel data; replay-style hosts may process frames without imagery.
    pub image: Option<SensorImage>,
    /// Intrinsics of `sensor_name`, stamped by the pipeline at step one.
    pub camera_k_matrix: Matrix3<f32>,
    /// Camera pose in the world frame, supplied by the host.
    pub camera2world_pose: Isometry3<f64>,
    /// Camera height above ground in meters, written by calibration update.
    pub camera_ground_height: f32,
    /// Downward camera pitch in radians, written by calibration update.
    pub camera_pitch_angle: f32,
    pub lane_objects: Vec<LaneLine>,
    pub detected_objects: Vec<Object>,
    pub tracked_objects: Vec<Object>,
    /// Shared calibration state; the host stamps this before every call.
    pub calibration_service: Option<Arc<dyn CalibrationService>>,
}

impl CameraFrame {
    pub fn new(sensor_name: impl Into<String>, frame_id: u64, timestamp: f64) -> Self {
        Self {
            sensor_name: sensor_name.into(),
            frame_id,
            timestamp,
            image: None,
            camera_k_matrix: Matrix3::identity(),
            camera2world_pose: Isometry3::identity(),
            camera_ground_height: 0.0,
            camera_pitch_angle: 0.0,
            lane_objects: Vec::new(),
            detected_objects: Vec::new(),
            tracked_objects: Vec::new(),
            calibration_service: None,
        }
    }
}
