//! Intensity histogram feature extractor
//!
//! Fills each detection's appearance feature with an L1-normalized grayscale
//! histogram of its box crop. Frames without imagery pass through with empty
//! features; replay-driven hosts routinely run that way.

use crate::error::{PerceptionError, Result};
use crate::frame::CameraFrame;
use crate::stages::{FeatureExtractor, FeatureExtractorInitOptions};
use tracing::debug;

const HISTOGRAM_BINS: usize = 16;

#[derive(Debug, Default)]
pub struct IntensityFeatureExtractor {
    initialized: bool,
}

impl IntensityFeatureExtractor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureExtractor for IntensityFeatureExtractor {
    fn init(&mut self, _options: FeatureExtractorInitOptions) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn extract(&mut self, frame: &mut CameraFrame) -> Result<()> {
        if !self.initialized {
            return Err(PerceptionError::stage("feature extractor", "not initialized"));
        }
        let Some(image) = &frame.image else {
            debug!(
                frame_id = frame.frame_id,
                "Frame carries no image, skipping feature extraction"
            );
            return Ok(());
        };

        let width = image.width() as f32;
        let height = image.height() as f32;
        for obj in &mut frame.detected_objects {
            let x0 = obj.bbox.xmin.clamp(0.0, width) as u32;
            let x1 = obj.bbox.xmax.clamp(0.0, width) as u32;
            let y0 = obj.bbox.ymin.clamp(0.0, height) as u32;
            let y1 = obj.bbox.ymax.clamp(0.0, height) as u32;

            let mut histogram = [0u32; HISTOGRAM_BINS];
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    if let Some(value) = image.pixel(x, y) {
                        histogram[value as usize * HISTOGRAM_BINS / 256] += 1;
                        count += 1;
                    }
                }
            }

            obj.camera_supplement.features = if count == 0 {
                vec![0.0; HISTOGRAM_BINS]
            } else {
                histogram
                    .iter()
                    .map(|&bin| bin as f32 / count as f32)
                    .collect()
            };
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "IntensityFeatureExtractor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SensorImage;
    use crate::stages::PluginInitOptions;
    use bytes::Bytes;
    use drishti_core::{BBox2D, Object, ObjectType};

    fn make_extractor() -> IntensityFeatureExtractor {
        let mut extractor = IntensityFeatureExtractor::new();
        extractor
            .init(FeatureExtractorInitOptions {
                plugin: PluginInitOptions::default(),
            })
            .unwrap();
        extractor
    }

    fn frame_with_image(pixels: Vec<u8>, width: u32, height: u32) -> CameraFrame {
        let mut frame = CameraFrame::new("front_6mm", 0, 0.0);
        frame.image = Some(SensorImage::new(width, height, Bytes::from(pixels)).unwrap());
        frame
    }

    #[test]
    fn test_histogram_is_normalized() {
        // 8x8 image, half black, half white.
        let mut pixels = vec![0u8; 64];
        pixels[32..].fill(255);
        let mut frame = frame_with_image(pixels, 8, 8);
        frame.detected_objects.push(Object::new(
            ObjectType::Vehicle,
            0.9,
            BBox2D::new(0.0, 0.0, 8.0, 8.0),
        ));

        make_extractor().extract(&mut frame).unwrap();

        let features = &frame.detected_objects[0].camera_supplement.features;
        assert_eq!(features.len(), HISTOGRAM_BINS);
        let sum: f32 = features.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((features[0] - 0.5).abs() < 1e-5);
        assert!((features[HISTOGRAM_BINS - 1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_box_outside_image_gets_zero_features() {
        let mut frame = frame_with_image(vec![128u8; 64], 8, 8);
        frame.detected_objects.push(Object::new(
            ObjectType::Vehicle,
            0.9,
            BBox2D::new(100.0, 100.0, 200.0, 200.0),
        ));

        make_extractor().extract(&mut frame).unwrap();

        let features = &frame.detected_objects[0].camera_supplement.features;
        assert_eq!(features.len(), HISTOGRAM_BINS);
        assert!(features.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_missing_image_is_not_an_error() {
        let mut frame = CameraFrame::new("front_6mm", 0, 0.0);
        frame.detected_objects.push(Object::new(
            ObjectType::Vehicle,
            0.9,
            BBox2D::new(0.0, 0.0, 8.0, 8.0),
        ));
        make_extractor().extract(&mut frame).unwrap();
        assert!(frame.detected_objects[0]
            .camera_supplement
            .features
            .is_empty());
    }
}
