//! Obstacle representation shared by detection, tracking and transform stages

use nalgebra::{Point3, Vector3};

/// Coarse obstacle classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ObjectType {
    #[default]
    Unknown,
    Pedestrian,
    Bicycle,
    Vehicle,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Unknown => "unknown",
            ObjectType::Pedestrian => "pedestrian",
            ObjectType::Bicycle => "bicycle",
            ObjectType::Vehicle => "vehicle",
        }
    }

    /// Parses the lowercase names produced by `as_str`.
    pub fn from_name(name: &str) -> Option<ObjectType> {
        match name {
            "unknown" => Some(ObjectType::Unknown),
            "pedestrian" => Some(ObjectType::Pedestrian),
            "bicycle" => Some(ObjectType::Bicycle),
            "vehicle" => Some(ObjectType::Vehicle),
            _ => None,
        }
    }
}

/// Axis-aligned 2D bounding box in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox2D {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BBox2D {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_x(&self) -> f32 {
        (self.xmin + self.xmax) * 0.5
    }

    pub fn center_y(&self) -> f32 {
        (self.ymin + self.ymax) * 0.5
    }

    pub fn is_valid(&self) -> bool {
        self.xmin.is_finite()
            && self.ymin.is_finite()
            && self.xmax.is_finite()
            && self.ymax.is_finite()
            && self.xmax > self.xmin
            && self.ymax > self.ymin
    }

    /// Intersection-over-union with another box.
    ///
    /// Non-finite or degenerate boxes score 0 rather than poisoning the
    /// association step with NaN.
    pub fn iou(&self, other: &BBox2D) -> f32 {
        if !self.is_valid() || !other.is_valid() {
            return 0.0;
        }

        let ix_min = self.xmin.max(other.xmin);
        let iy_min = self.ymin.max(other.ymin);
        let ix_max = self.xmax.min(other.xmax);
        let iy_max = self.ymax.min(other.ymax);

        let iw = (ix_max - ix_min).max(0.0);
        let ih = (iy_max - iy_min).max(0.0);
        let intersection = iw * ih;

        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

/// Camera-specific annotations attached to an obstacle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraSupplement {
    /// Name of the sensor whose detector produced this obstacle.
    pub sensor_name: String,
    /// Appearance feature vector, empty until a feature extractor runs.
    pub features: Vec<f32>,
}

/// A detected or tracked obstacle.
///
/// Detectors fill the 2D fields, the transformer lifts the obstacle to the
/// vehicle frame, and the tracker stamps `track_id`. `polygon` and
/// `anchor_point` are derived from the 3D box as the final step of every
/// frame, so downstream consumers can rely on them being populated for every
/// tracked obstacle.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// Stable track identifier, -1 until the tracker assigns one.
    pub track_id: i64,
    pub object_type: ObjectType,
    pub confidence: f32,
    /// 2D box in image coordinates of the producing sensor.
    pub bbox: BBox2D,
    /// Center of the 3D box in the vehicle frame.
    pub center: Point3<f32>,
    /// 3D box dimensions: length (x), width (y), height (z).
    pub size: Vector3<f32>,
    /// Heading around the vehicle-frame z axis, radians.
    pub theta: f32,
    /// Ground footprint corners derived from the 3D box.
    pub polygon: Vec<Point3<f32>>,
    /// Reference point consumers should treat as the obstacle position.
    pub anchor_point: Point3<f32>,
    pub velocity: Vector3<f32>,
    pub camera_supplement: CameraSupplement,
}

impl Object {
    /// Creates a freshly detected obstacle with empty 3D state.
    pub fn new(object_type: ObjectType, confidence: f32, bbox: BBox2D) -> Self {
        Self {
            track_id: -1,
            object_type,
            confidence,
            bbox,
            center: Point3::origin(),
            size: Vector3::zeros(),
            theta: 0.0,
            polygon: Vec::new(),
            anchor_point: Point3::origin(),
            velocity: Vector3::zeros(),
            camera_supplement: CameraSupplement::default(),
        }
    }

    /// Rebuilds `polygon` as the four ground-level corners of the 3D box.
    pub fn fill_polygon_from_bbox3d(&mut self) {
        let half_l = self.size.x * 0.5;
        let half_w = self.size.y * 0.5;
        let ground_z = self.center.z - self.size.z * 0.5;
        let (sin_t, cos_t) = self.theta.sin_cos();

        let corners = [
            (half_l, half_w),
            (half_l, -half_w),
            (-half_l, -half_w),
            (-half_l, half_w),
        ];
        self.polygon = corners
            .iter()
            .map(|&(dx, dy)| {
                Point3::new(
                    self.center.x + dx * cos_t - dy * sin_t,
                    self.center.y + dx * sin_t + dy * cos_t,
                    ground_z,
                )
            })
            .collect();
    }
}
