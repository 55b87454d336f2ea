//! Lane detection and postprocessing
//!
//! `ScanlineLaneDetector` finds bright lane-paint runs on the lower image
//! rows and clusters them into per-line point sets. `PolyfitLanePostprocessor`
//! fits image-space quadratics, assigns ego/adjacent positions around the
//! optical center, and after the calibration update projects each line onto
//! the ground plane.

use crate::error::{PerceptionError, Result};
use crate::frame::CameraFrame;
use crate::stages::{
    LaneDetector, LaneDetectorInitOptions, LanePostprocessor, LanePostprocessorInitOptions,
};
use drishti_core::{ground_point_from_pixel, ImageCurve, LaneLine, LanePosition, PinholeCamera};
use nalgebra::{DMatrix, DVector, Point2, Point3};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_INTENSITY_THRESHOLD: u8 = 180;
const DEFAULT_ROW_STEP: u32 = 4;
const DEFAULT_MIN_POINTS: usize = 5;
/// Widest pixel run still considered lane paint rather than a bright patch.
const MAX_RUN_WIDTH: u32 = 60;
/// Column tolerance when chaining run centers into one line.
const MAX_CLUSTER_GAP: f32 = 40.0;
/// Fraction of the image height where the scan band starts.
const SCAN_BAND_TOP: f32 = 0.55;

struct ClusterBuilder {
    points: Vec<Point2<f32>>,
    last_u: f32,
    last_v: f32,
}

/// Lane detector scanning for bright paint runs.
pub struct ScanlineLaneDetector {
    camera: Option<PinholeCamera>,
    intensity_threshold: u8,
    row_step: u32,
    min_points: usize,
}

impl ScanlineLaneDetector {
    pub fn new() -> Self {
        Self {
            camera: None,
            intensity_threshold: DEFAULT_INTENSITY_THRESHOLD,
            row_step: DEFAULT_ROW_STEP,
            min_points: DEFAULT_MIN_POINTS,
        }
    }
}

impl Default for ScanlineLaneDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl LaneDetector for ScanlineLaneDetector {
    fn init(&mut self, options: LaneDetectorInitOptions) -> Result<()> {
        self.camera = Some(options.camera);
        Ok(())
    }

    fn detect(&mut self, frame: &mut CameraFrame) -> Result<()> {
        let Some(camera) = &self.camera else {
            return Err(PerceptionError::stage("lane detector", "not initialized"));
        };
        let Some(image) = &frame.image else {
            return Err(PerceptionError::stage(
                "lane detector",
                "frame carries no image data",
            ));
        };
        if image.width() != camera.width() || image.height() != camera.height() {
            return Err(PerceptionError::stage(
                "lane detector",
                format!(
                    "image is {}x{} but the working sensor model is {}x{}",
                    image.width(),
                    image.height(),
                    camera.width(),
                    camera.height()
                ),
            ));
        }

        let width = image.width();
        let height = image.height();
        let start_row = (height as f32 * SCAN_BAND_TOP) as u32;

        let mut clusters: Vec<ClusterBuilder> = Vec::new();
        let mut rows_scanned = 0u32;

        let mut v = start_row;
        while v < height {
            rows_scanned += 1;
            let mut run_start: Option<u32> = None;
            for x in 0..=width {
                let bright = x < width
                    && image
                        .pixel(x, v)
                        .map_or(false, |p| p >= self.intensity_threshold);
                match (bright, run_start) {
                    (true, None) => run_start = Some(x),
                    (false, Some(start)) => {
                        run_start = None;
                        let run_width = x - start;
                        if run_width == 0 || run_width > MAX_RUN_WIDTH {
                            continue;
                        }
                        let u = (start + x - 1) as f32 * 0.5;
                        attach_point(&mut clusters, u, v as f32);
                    }
                    _ => {}
                }
            }
            v += self.row_step;
        }

        frame.lane_objects = clusters
            .into_iter()
            .filter(|c| c.points.len() >= self.min_points)
            .map(|c| {
                let mut lane = LaneLine::new(LanePosition::Other);
                lane.confidence = (c.points.len() as f32 / rows_scanned.max(1) as f32).min(1.0);
                lane.image_points = c.points;
                lane
            })
            .collect();

        // Stable left-to-right order for downstream stages.
        frame.lane_objects.sort_by(|a, b| {
            let mean = |l: &LaneLine| {
                l.image_points.iter().map(|p| p.x).sum::<f32>() / l.image_points.len() as f32
            };
            mean(a).total_cmp(&mean(b))
        });

        debug!(
            frame_id = frame.frame_id,
            lanes = frame.lane_objects.len(),
            "Scanline lane detection complete"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "ScanlineLaneDetector"
    }
}

fn attach_point(clusters: &mut Vec<ClusterBuilder>, u: f32, v: f32) {
    let mut best: Option<(usize, f32)> = None;
    for (idx, cluster) in clusters.iter().enumerate() {
        // One point per row per cluster keeps parallel lines separate.
        if cluster.last_v >= v {
            continue;
        }
        let gap = (cluster.last_u - u).abs();
        if gap <= MAX_CLUSTER_GAP && best.map_or(true, |(_, g)| gap < g) {
            best = Some((idx, gap));
        }
    }
    match best {
        Some((idx, _)) => {
            let cluster = &mut clusters[idx];
            cluster.points.push(Point2::new(u, v));
            cluster.last_u = u;
            cluster.last_v = v;
        }
        None => clusters.push(ClusterBuilder {
            points: vec![Point2::new(u, v)],
            last_u: u,
            last_v: v,
        }),
    }
}

/// Number of samples taken along each curve when projecting to the ground.
const GROUND_SAMPLES: usize = 10;

/// Lane postprocessor fitting quadratics and projecting to the ground plane.
pub struct PolyfitLanePostprocessor {
    detect_config_root: PathBuf,
    detect_config_name: PathBuf,
    initialized: bool,
}

impl PolyfitLanePostprocessor {
    pub fn new() -> Self {
        Self {
            detect_config_root: PathBuf::new(),
            detect_config_name: PathBuf::new(),
            initialized: false,
        }
    }

    fn fit_quadratic(points: &[Point2<f32>]) -> Result<ImageCurve> {
        let n = points.len();
        let design = DMatrix::from_fn(n, 3, |r, c| {
            let v = points[r].y as f64;
            match c {
                0 => v * v,
                1 => v,
                _ => 1.0,
            }
        });
        let rhs = DVector::from_iterator(n, points.iter().map(|p| p.x as f64));
        let coeffs = design
            .svd(true, true)
            .solve(&rhs, 1e-12)
            .map_err(|e| PerceptionError::stage("lane postprocessor", e))?;

        let v_start = points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        let v_end = points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
        Ok(ImageCurve {
            a: coeffs[0] as f32,
            b: coeffs[1] as f32,
            c: coeffs[2] as f32,
            v_start,
            v_end,
        })
    }
}

impl Default for PolyfitLanePostprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl LanePostprocessor for PolyfitLanePostprocessor {
    fn init(&mut self, options: LanePostprocessorInitOptions) -> Result<()> {
        self.detect_config_root = options.detect_config_root;
        self.detect_config_name = options.detect_config_name;
        debug!(
            root = %self.detect_config_root.display(),
            config = %self.detect_config_name.display(),
            "Lane postprocessor aligned with lane detector configuration"
        );
        self.initialized = true;
        Ok(())
    }

    fn process_2d(&mut self, frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("lane postprocessor", "not initialized"));
        }

        for lane in &mut frame.lane_objects {
            if lane.image_points.len() < 3 {
                continue;
            }
            lane.image_curve = Some(Self::fit_quadratic(&lane.image_points)?);
        }

        // Split fitted lanes around the optical center and pick the nearest
        // on each side as the ego pair.
        let cx = frame.camera_k_matrix[(0, 2)];
        let mut left: Vec<(usize, f32)> = Vec::new();
        let mut right: Vec<(usize, f32)> = Vec::new();
        for (idx, lane) in frame.lane_objects.iter().enumerate() {
            let Some(curve) = lane.image_curve else { continue };
            let u_ref = curve.u_at(curve.v_end);
            if u_ref < cx {
                left.push((idx, u_ref));
            } else {
                right.push((idx, u_ref));
            }
        }
        for (idx, u_ref) in &left {
            let is_ego = left.iter().all(|(_, other)| other <= u_ref);
            frame.lane_objects[*idx].position = if is_ego {
                LanePosition::EgoLeft
            } else {
                LanePosition::AdjacentLeft
            };
        }
        for (idx, u_ref) in &right {
            let is_ego = right.iter().all(|(_, other)| other >= u_ref);
            frame.lane_objects[*idx].position = if is_ego {
                LanePosition::EgoRight
            } else {
                LanePosition::AdjacentRight
            };
        }
        Ok(())
    }

    fn process_3d(&mut self, frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("lane postprocessor", "not initialized"));
        }
        if frame.camera_ground_height <= 0.0 {
            return Err(PerceptionError::stage(
                "lane postprocessor",
                "ground geometry not established before 3D lane projection",
            ));
        }

        let k = frame.camera_k_matrix;
        let height = frame.camera_ground_height;
        let pitch = frame.camera_pitch_angle;

        for lane in &mut frame.lane_objects {
            let Some(curve) = lane.image_curve else { continue };
            let mut ground: Vec<Point3<f32>> = Vec::with_capacity(GROUND_SAMPLES);
            for i in 0..GROUND_SAMPLES {
                let t = i as f32 / (GROUND_SAMPLES - 1) as f32;
                let v = curve.v_start + (curve.v_end - curve.v_start) * t;
                let u = curve.u_at(v);
                if let Some(p) = ground_point_from_pixel(&k, height, pitch, u, v) {
                    ground.push(p);
                }
            }
            // Nearest point first.
            ground.reverse();
            lane.ground_points = ground;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "PolyfitLanePostprocessor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SensorImage;
    use crate::stages::PluginInitOptions;
    use bytes::Bytes;
    use nalgebra::Matrix3;

    fn test_intrinsics() -> Matrix3<f32> {
        Matrix3::new(100.0, 0.0, 32.0, 0.0, 100.0, 32.0, 0.0, 0.0, 1.0)
    }

    fn make_detector() -> ScanlineLaneDetector {
        let mut detector = ScanlineLaneDetector::new();
        detector
            .init(LaneDetectorInitOptions {
                plugin: PluginInitOptions::default(),
                camera: PinholeCamera::new(64, 64, test_intrinsics()).unwrap(),
            })
            .unwrap();
        detector
    }

    fn make_postprocessor() -> PolyfitLanePostprocessor {
        let mut postprocessor = PolyfitLanePostprocessor::new();
        postprocessor
            .init(LanePostprocessorInitOptions {
                plugin: PluginInitOptions::default(),
                detect_config_root: PathBuf::from("lane"),
                detect_config_name: PathBuf::from("detector.json"),
            })
            .unwrap();
        postprocessor
    }

    /// 64x64 image with two bright 3px vertical stripes at the given columns.
    fn striped_image(columns: &[u32]) -> SensorImage {
        let mut pixels = vec![0u8; 64 * 64];
        for v in 32..64u32 {
            for &c in columns {
                for x in c.saturating_sub(1)..=(c + 1).min(63) {
                    pixels[(v * 64 + x) as usize] = 255;
                }
            }
        }
        SensorImage::new(64, 64, Bytes::from(pixels)).unwrap()
    }

    #[test]
    fn test_detector_finds_stripes() {
        let mut frame = CameraFrame::new("front_6mm", 0, 0.0);
        frame.image = Some(striped_image(&[20, 44]));

        make_detector().detect(&mut frame).unwrap();

        assert_eq!(frame.lane_objects.len(), 2);
        // Sorted left to right.
        let u0 = frame.lane_objects[0].image_points[0].x;
        let u1 = frame.lane_objects[1].image_points[0].x;
        assert!((u0 - 20.0).abs() < 1.0);
        assert!((u1 - 44.0).abs() < 1.0);
        assert!(frame.lane_objects[0].confidence > 0.5);
        assert!(frame
            .lane_objects
            .iter()
            .all(|l| l.position == LanePosition::Other));
    }

    #[test]
    fn test_detector_requires_image() {
        let mut frame = CameraFrame::new("front_6mm", 0, 0.0);
        assert!(make_detector().detect(&mut frame).is_err());
    }

    #[test]
    fn test_dark_image_yields_no_lanes() {
        let mut frame = CameraFrame::new("front_6mm", 0, 0.0);
        frame.image = Some(SensorImage::new(64, 64, Bytes::from(vec![10u8; 64 * 64])).unwrap());
        make_detector().detect(&mut frame).unwrap();
        assert!(frame.lane_objects.is_empty());
    }

    #[test]
    fn test_quadratic_fit_recovers_coefficients() {
        // Coefficients chosen so every sample is exact in f32.
        let points: Vec<Point2<f32>> = (40..=60)
            .map(|v| {
                let v = v as f32;
                Point2::new(v * v / 64.0 - 0.5 * v + 300.0, v)
            })
            .collect();
        let curve = PolyfitLanePostprocessor::fit_quadratic(&points).unwrap();
        assert!((curve.a - 1.0 / 64.0).abs() < 1e-6);
        assert!((curve.b + 0.5).abs() < 1e-5);
        assert!((curve.c - 300.0).abs() < 1e-3);
        assert_eq!(curve.v_start, 40.0);
        assert_eq!(curve.v_end, 60.0);
    }

    #[test]
    fn test_positions_assigned_around_optical_center() {
        let mut frame = CameraFrame::new("front_6mm", 0, 0.0);
        frame.camera_k_matrix = test_intrinsics();
        frame.image = Some(striped_image(&[10, 24, 44, 58]));

        make_detector().detect(&mut frame).unwrap();
        make_postprocessor().process_2d(&mut frame).unwrap();

        let positions: Vec<LanePosition> =
            frame.lane_objects.iter().map(|l| l.position).collect();
        assert_eq!(
            positions,
            vec![
                LanePosition::AdjacentLeft,
                LanePosition::EgoLeft,
                LanePosition::EgoRight,
                LanePosition::AdjacentRight,
            ]
        );
    }

    #[test]
    fn test_ground_projection_lands_on_plane() {
        let mut frame = CameraFrame::new("front_6mm", 0, 0.0);
        frame.camera_k_matrix = test_intrinsics();
        frame.image = Some(striped_image(&[20, 44]));
        frame.camera_ground_height = 1.5;
        frame.camera_pitch_angle = 0.0;

        let mut postprocessor = make_postprocessor();
        make_detector().detect(&mut frame).unwrap();
        postprocessor.process_2d(&mut frame).unwrap();
        postprocessor.process_3d(&mut frame).unwrap();

        for lane in &frame.lane_objects {
            assert!(!lane.ground_points.is_empty());
            for p in &lane.ground_points {
                assert!((p.z + 1.5).abs() < 1e-5);
                assert!(p.x > 0.0);
            }
            // Nearest point first.
            let first = lane.ground_points.first().unwrap();
            let last = lane.ground_points.last().unwrap();
            assert!(first.x <= last.x);
        }
    }

    #[test]
    fn test_ground_projection_requires_calibration() {
        let mut frame = CameraFrame::new("front_6mm", 0, 0.0);
        frame.camera_k_matrix = test_intrinsics();
        assert!(make_postprocessor().process_3d(&mut frame).is_err());
    }
}
