//! IoU obstacle tracker
//!
//! Greedy 2D association against per-track motion-compensated boxes, a 3D
//! distance gate after the transformer has run, and age-based retirement.
//! Track identity is carried on the detections themselves via `track_id`, so
//! the phases stay correct even if a stage between them reorders or drops
//! detections.

use crate::error::{PerceptionError, Result};
use crate::frame::CameraFrame;
use crate::stages::{ObstacleTracker, TrackerInitOptions};
use drishti_core::{BBox2D, Object};
use nalgebra::Vector3;
use tracing::debug;

const DEFAULT_IOU_THRESHOLD: f32 = 0.3;
const DEFAULT_MAX_AGE: u32 = 10;
const DEFAULT_GATE_DISTANCE: f32 = 10.0;
const MAX_TRACKS: usize = 256;

#[derive(Debug, Clone)]
struct Track {
    id: i64,
    object: Object,
    predicted_bbox: BBox2D,
    /// Image-space center drift per frame step.
    bbox_velocity: (f32, f32),
    /// Frames since the last matched detection.
    age: u32,
    hits: u32,
    last_timestamp: f64,
}

/// Tracker stage matching detections to tracks by bounding-box overlap.
#[derive(Debug)]
pub struct IouObstacleTracker {
    tracks: Vec<Track>,
    next_id: i64,
    iou_threshold: f32,
    max_age: u32,
    gate_distance: f32,
    image_width: u32,
    image_height: u32,
    initialized: bool,
}

impl IouObstacleTracker {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 0,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_age: DEFAULT_MAX_AGE,
            gate_distance: DEFAULT_GATE_DISTANCE,
            image_width: 0,
            image_height: 0,
            initialized: false,
        }
    }

    /// Tracker with explicit association parameters.
    pub fn with_params(iou_threshold: f32, max_age: u32, gate_distance: f32) -> Self {
        Self {
            iou_threshold,
            max_age,
            gate_distance,
            ..Self::new()
        }
    }

    fn track_index(&self, id: i64) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }
}

impl Default for IouObstacleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ObstacleTracker for IouObstacleTracker {
    fn init(&mut self, options: TrackerInitOptions) -> Result<()> {
        if options.image_width == 0 || options.image_height == 0 {
            return Err(PerceptionError::Config(format!(
                "tracker requires non-zero image dimensions, got {}x{}",
                options.image_width, options.image_height
            )));
        }
        self.image_width = options.image_width;
        self.image_height = options.image_height;
        self.initialized = true;
        Ok(())
    }

    fn predict(&mut self, _frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("tracker", "not initialized"));
        }
        for track in &mut self.tracks {
            let (du, dv) = track.bbox_velocity;
            track.predicted_bbox = BBox2D::new(
                track.object.bbox.xmin + du,
                track.object.bbox.ymin + dv,
                track.object.bbox.xmax + du,
                track.object.bbox.ymax + dv,
            );
        }
        Ok(())
    }

    fn associate_2d(&mut self, frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("tracker", "not initialized"));
        }

        let mut claimed = vec![false; self.tracks.len()];
        for detection in &mut frame.detected_objects {
            detection.track_id = -1;
            let mut best: Option<(usize, f32)> = None;
            for (idx, track) in self.tracks.iter().enumerate() {
                if claimed[idx] {
                    continue;
                }
                let iou = track.predicted_bbox.iou(&detection.bbox);
                if iou >= self.iou_threshold && best.map_or(true, |(_, b)| iou > b) {
                    best = Some((idx, iou));
                }
            }
            if let Some((idx, _)) = best {
                claimed[idx] = true;
                detection.track_id = self.tracks[idx].id;
            }
        }
        Ok(())
    }

    fn associate_3d(&mut self, frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("tracker", "not initialized"));
        }

        for detection in &mut frame.detected_objects {
            if detection.track_id < 0 {
                continue;
            }
            let Some(idx) = self.track_index(detection.track_id) else {
                detection.track_id = -1;
                continue;
            };
            let track = &self.tracks[idx];
            let distance = (detection.center - track.object.center).norm();
            if !distance.is_finite() || distance > self.gate_distance {
                debug!(
                    track_id = detection.track_id,
                    distance, "2D match rejected by 3D gate"
                );
                detection.track_id = -1;
            }
        }
        Ok(())
    }

    fn track(&mut self, frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("tracker", "not initialized"));
        }

        let mut updated = vec![false; self.tracks.len()];

        for detection in &mut frame.detected_objects {
            if detection.track_id >= 0 {
                if let Some(idx) = self.track_index(detection.track_id) {
                    let track = &mut self.tracks[idx];
                    let dt = frame.timestamp - track.last_timestamp;
                    if dt > f64::EPSILON {
                        detection.velocity =
                            (detection.center - track.object.center) / dt as f32;
                    } else {
                        detection.velocity = Vector3::zeros();
                    }
                    track.bbox_velocity = (
                        detection.bbox.center_x() - track.object.bbox.center_x(),
                        detection.bbox.center_y() - track.object.bbox.center_y(),
                    );
                    track.object = detection.clone();
                    track.predicted_bbox = detection.bbox;
                    track.age = 0;
                    track.hits += 1;
                    track.last_timestamp = frame.timestamp;
                    updated[idx] = true;
                    continue;
                }
                detection.track_id = -1;
            }

            // Unmatched detection starts a new track.
            let id = self.next_id;
            self.next_id += 1;
            detection.track_id = id;
            detection.velocity = Vector3::zeros();
            self.tracks.push(Track {
                id,
                object: detection.clone(),
                predicted_bbox: detection.bbox,
                bbox_velocity: (0.0, 0.0),
                age: 0,
                hits: 1,
                last_timestamp: frame.timestamp,
            });
            updated.push(true);
        }

        for (idx, track) in self.tracks.iter_mut().enumerate() {
            if !updated[idx] {
                track.age += 1;
            }
        }
        let max_age = self.max_age;
        self.tracks.retain(|t| t.age <= max_age);

        if self.tracks.len() > MAX_TRACKS {
            // Shed stale and poorly established tracks first.
            self.tracks
                .sort_by_key(|t| (t.age, std::cmp::Reverse(t.hits), std::cmp::Reverse(t.id)));
            self.tracks.truncate(MAX_TRACKS);
        }

        frame.tracked_objects = self
            .tracks
            .iter()
            .filter(|t| t.age == 0)
            .map(|t| t.object.clone())
            .collect();

        debug!(
            frame_id = frame.frame_id,
            live_tracks = self.tracks.len(),
            emitted = frame.tracked_objects.len(),
            "Track update complete"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "IouObstacleTracker"
    }
}
