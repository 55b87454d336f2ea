//! Lane line geometry in image and vehicle coordinates

use nalgebra::{Point2, Point3};

/// Position of a lane line relative to the ego vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanePosition {
    EgoLeft,
    EgoRight,
    AdjacentLeft,
    AdjacentRight,
    #[default]
    Other,
}

impl LanePosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanePosition::EgoLeft => "ego_left",
            LanePosition::EgoRight => "ego_right",
            LanePosition::AdjacentLeft => "adjacent_left",
            LanePosition::AdjacentRight => "adjacent_right",
            LanePosition::Other => "other",
        }
    }
}

/// Quadratic image-space curve `u = a*v^2 + b*v + c`, valid on `[v_start, v_end]`.
///
/// Lane lines are close to vertical in the image, so `u` is parameterized by
/// the row `v` rather than the other way around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageCurve {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub v_start: f32,
    pub v_end: f32,
}

impl ImageCurve {
    pub fn u_at(&self, v: f32) -> f32 {
        (self.a * v + self.b) * v + self.c
    }
}

/// A single lane line observation within one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneLine {
    pub position: LanePosition,
    pub confidence: f32,
    /// Raw detection points in image coordinates.
    pub image_points: Vec<Point2<f32>>,
    /// Fitted image-space curve, `None` until 2D postprocessing runs.
    pub image_curve: Option<ImageCurve>,
    /// Projection onto the ground plane, empty until 3D postprocessing runs.
    pub ground_points: Vec<Point3<f32>>,
}

impl LaneLine {
    pub fn new(position: LanePosition) -> Self {
        Self {
            position,
            confidence: 0.0,
            image_points: Vec::new(),
            image_curve: None,
            ground_points: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_evaluation() {
        let curve = ImageCurve {
            a: 2.0,
            b: -3.0,
            c: 5.0,
            v_start: 0.0,
            v_end: 100.0,
        };
        // 2*16 - 3*4 + 5 = 25
        assert!((curve.u_at(4.0) - 25.0).abs() < 1e-6);
        assert!((curve.u_at(0.0) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_new_lane_is_empty() {
        let lane = LaneLine::new(LanePosition::EgoLeft);
        assert_eq!(lane.position, LanePosition::EgoLeft);
        assert!(lane.image_points.is_empty());
        assert!(lane.image_curve.is_none());
        assert!(lane.ground_points.is_empty());
    }

    #[test]
    fn test_position_names() {
        assert_eq!(LanePosition::EgoLeft.as_str(), "ego_left");
        assert_eq!(LanePosition::Other.as_str(), "other");
    }
}
