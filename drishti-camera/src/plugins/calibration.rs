//! Online calibration service
//!
//! Cross-frame estimate of each camera's height above ground and downward
//! pitch. Frames from the working sensor refine the pitch estimate from the
//! vanishing row of their ego lane pair; frames from every other sensor only
//! read the current state. All state sits behind one mutex so per-frame
//! updates and external corrections can arrive from different threads.

use crate::error::{PerceptionError, Result};
use crate::frame::CameraFrame;
use crate::stages::{CalibrationService, CalibrationServiceInitOptions};
use drishti_core::{LaneLine, LanePosition};
use nalgebra::Matrix3;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Camera height assumed until a correction arrives, meters.
const DEFAULT_CAMERA_HEIGHT: f32 = 1.5;
/// Estimates beyond this magnitude are treated as outliers, radians.
const MAX_PITCH: f32 = 0.35;
/// Minimum row span before a lane secant is trusted.
const MIN_SECANT_SPAN: f32 = 1.0;

#[derive(Debug, Default)]
struct Inner {
    initialized: bool,
    working_sensor: String,
    calibrator_method: String,
    image_height: u32,
    intrinsics: HashMap<String, Matrix3<f32>>,
    ground_heights: HashMap<String, f32>,
    pitch_diffs: HashMap<String, f32>,
    /// Current pitch estimate of the working sensor, radians.
    working_pitch: f32,
}

impl Inner {
    /// Pitch from the vanishing row of the ego lane pair, if the frame's lane
    /// observations support one.
    fn estimate_pitch(&self, lanes: &[LaneLine]) -> Option<f32> {
        let k = self.intrinsics.get(&self.working_sensor)?;
        let left = secant(find_lane(lanes, LanePosition::EgoLeft)?)?;
        let right = secant(find_lane(lanes, LanePosition::EgoRight)?)?;

        let (u_l, v_l, m_l) = left;
        let (u_r, v_r, m_r) = right;
        let denominator = m_l - m_r;
        if denominator.abs() < 1e-4 {
            return None;
        }
        let v0 = (u_r - u_l + m_l * v_l - m_r * v_r) / denominator;
        if !v0.is_finite() || v0 >= self.image_height as f32 {
            return None;
        }

        let fy = k[(1, 1)];
        let cy = k[(1, 2)];
        let pitch = (cy - v0).atan2(fy);
        if pitch.is_finite() && pitch.abs() <= MAX_PITCH {
            Some(pitch)
        } else {
            None
        }
    }

    fn stamp(&self, frame: &mut CameraFrame) {
        let height = self
            .ground_heights
            .get(&frame.sensor_name)
            .copied()
            .unwrap_or(DEFAULT_CAMERA_HEIGHT);
        let diff = self
            .pitch_diffs
            .get(&frame.sensor_name)
            .copied()
            .unwrap_or(0.0);
        frame.camera_ground_height = height;
        frame.camera_pitch_angle = self.working_pitch + diff;
    }
}

fn find_lane(lanes: &[LaneLine], position: LanePosition) -> Option<&LaneLine> {
    lanes.iter().find(|l| l.position == position)
}

/// Anchor point and slope of the straight line through a curve's endpoints,
/// as `(u_start, v_start, du/dv)`.
fn secant(lane: &LaneLine) -> Option<(f32, f32, f32)> {
    let curve = lane.image_curve?;
    let span = curve.v_end - curve.v_start;
    if span.abs() < MIN_SECANT_SPAN {
        return None;
    }
    let u_start = curve.u_at(curve.v_start);
    let u_end = curve.u_at(curve.v_end);
    let slope = (u_end - u_start) / span;
    if u_start.is_finite() && slope.is_finite() {
        Some((u_start, curve.v_start, slope))
    } else {
        None
    }
}

/// Calibration state shared across frames, sensors and threads.
#[derive(Debug, Default)]
pub struct OnlineCalibrationService {
    inner: Mutex<Inner>,
}

impl OnlineCalibrationService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CalibrationService for OnlineCalibrationService {
    fn init(&mut self, options: CalibrationServiceInitOptions) -> Result<()> {
        if options.name_intrinsic_map.is_empty() {
            return Err(PerceptionError::Config(
                "calibration service requires at least one sensor".to_string(),
            ));
        }
        if !options
            .name_intrinsic_map
            .contains_key(&options.working_sensor_name)
        {
            return Err(PerceptionError::Config(format!(
                "working sensor '{}' is missing from the intrinsics map",
                options.working_sensor_name
            )));
        }

        let inner = self.inner.get_mut();
        inner.working_sensor = options.working_sensor_name;
        inner.calibrator_method = options.calibrator_method;
        inner.image_height = options.image_height;
        inner.ground_heights = options
            .name_intrinsic_map
            .keys()
            .map(|name| (name.clone(), DEFAULT_CAMERA_HEIGHT))
            .collect();
        inner.pitch_diffs = options
            .name_intrinsic_map
            .keys()
            .map(|name| (name.clone(), 0.0))
            .collect();
        inner.intrinsics = options.name_intrinsic_map;
        inner.working_pitch = 0.0;
        inner.initialized = true;

        debug!(
            working_sensor = %inner.working_sensor,
            method = %inner.calibrator_method,
            sensors = inner.intrinsics.len(),
            "Calibration service initialized"
        );
        Ok(())
    }

    fn update(&self, frame: &mut CameraFrame) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.initialized {
            return Err(PerceptionError::stage(
                "calibration service",
                "not initialized",
            ));
        }

        if frame.sensor_name == inner.working_sensor {
            // Fresh estimate from this frame's lane observations; unusable
            // evidence keeps the previous estimate.
            if let Some(pitch) = inner.estimate_pitch(&frame.lane_objects) {
                debug!(
                    frame_id = frame.frame_id,
                    pitch, "Updated working sensor pitch from lane geometry"
                );
                inner.working_pitch = pitch;
            }
        }

        // Refresh path: copy current state into the frame. Frames from
        // non-working sensors never influence the state.
        inner.stamp(frame);
        Ok(())
    }

    fn set_camera_height_and_pitch(
        &self,
        name_camera_ground_height_map: &HashMap<String, f32>,
        name_camera_pitch_angle_diff_map: &HashMap<String, f32>,
        pitch_angle_master_sensor: f32,
    ) {
        let mut inner = self.inner.lock();

        for (name, &height) in name_camera_ground_height_map {
            if !height.is_finite() || height <= 0.0 {
                debug!(sensor = %name, height, "Ignoring unusable ground height");
                continue;
            }
            if let Some(slot) = inner.ground_heights.get_mut(name) {
                *slot = height;
            } else {
                debug!(sensor = %name, "Ignoring ground height for unknown sensor");
            }
        }

        for (name, &diff) in name_camera_pitch_angle_diff_map {
            if !diff.is_finite() {
                debug!(sensor = %name, "Ignoring non-finite pitch diff");
                continue;
            }
            if let Some(slot) = inner.pitch_diffs.get_mut(name) {
                *slot = diff;
            } else {
                debug!(sensor = %name, "Ignoring pitch diff for unknown sensor");
            }
        }

        if pitch_angle_master_sensor.is_finite()
            && pitch_angle_master_sensor.abs() <= MAX_PITCH
        {
            inner.working_pitch = pitch_angle_master_sensor;
        } else {
            debug!(
                pitch = pitch_angle_master_sensor,
                "Ignoring unusable master pitch"
            );
        }
    }

    fn query_camera_to_ground_height_and_pitch(&self, sensor_name: &str) -> Option<(f32, f32)> {
        let inner = self.inner.lock();
        let height = *inner.ground_heights.get(sensor_name)?;
        let diff = *inner.pitch_diffs.get(sensor_name)?;
        Some((height, inner.working_pitch + diff))
    }

    fn name(&self) -> &str {
        "OnlineCalibrationService"
    }
}
