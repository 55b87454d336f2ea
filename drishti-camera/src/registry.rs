//! Plugin registry
//!
//! Stages are constructed by name through plain function-pointer factories.
//! The full set of factories is established before pipeline initialization;
//! nothing registers at runtime, so lookups need no synchronization and a
//! missing name is a configuration mistake, not a race.

use crate::error::{PerceptionError, Result};
use crate::plugins;
use crate::stages::{
    CalibrationService, FeatureExtractor, LaneDetector, LanePostprocessor, ObstacleDetector,
    ObstaclePostprocessor, ObstacleTracker, ObstacleTransformer,
};
use std::collections::HashMap;

/// Factory table for one stage kind.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    factories: HashMap<&'static str, fn() -> Box<T>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: HashMap::new(),
        }
    }

    /// Registers a factory. Re-registering a name replaces the previous
    /// factory, which lets hosts shadow a built-in.
    pub fn register(&mut self, name: &'static str, factory: fn() -> Box<T>) {
        self.factories.insert(name, factory);
    }

    /// Instantiates the plugin registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<T>> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(PerceptionError::PluginNotFound {
                kind: self.kind,
                name: name.to_string(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted for stable diagnostics.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// One registry per stage kind.
pub struct StageRegistry {
    pub detectors: Registry<dyn ObstacleDetector>,
    pub trackers: Registry<dyn ObstacleTracker>,
    pub transformers: Registry<dyn ObstacleTransformer>,
    pub postprocessors: Registry<dyn ObstaclePostprocessor>,
    pub feature_extractors: Registry<dyn FeatureExtractor>,
    pub lane_detectors: Registry<dyn LaneDetector>,
    pub lane_postprocessors: Registry<dyn LanePostprocessor>,
    pub calibration_services: Registry<dyn CalibrationService>,
}

impl StageRegistry {
    /// A registry with no factories; hosts register everything themselves.
    pub fn empty() -> Self {
        Self {
            detectors: Registry::new("detector"),
            trackers: Registry::new("tracker"),
            transformers: Registry::new("transformer"),
            postprocessors: Registry::new("postprocessor"),
            feature_extractors: Registry::new("feature extractor"),
            lane_detectors: Registry::new("lane detector"),
            lane_postprocessors: Registry::new("lane postprocessor"),
            calibration_services: Registry::new("calibration service"),
        }
    }

    /// A registry pre-populated with every built-in stage.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry
            .detectors
            .register("ReplayDetector", || Box::new(plugins::ReplayDetector::new()));
        registry.trackers.register("IouObstacleTracker", || {
            Box::new(plugins::IouObstacleTracker::new())
        });
        registry.transformers.register("GroundPlaneTransformer", || {
            Box::new(plugins::GroundPlaneTransformer::new())
        });
        registry
            .postprocessors
            .register("GroundRefinePostprocessor", || {
                Box::new(plugins::GroundRefinePostprocessor::new())
            });
        registry
            .feature_extractors
            .register("IntensityFeatureExtractor", || {
                Box::new(plugins::IntensityFeatureExtractor::new())
            });
        registry.lane_detectors.register("ScanlineLaneDetector", || {
            Box::new(plugins::ScanlineLaneDetector::new())
        });
        registry
            .lane_postprocessors
            .register("PolyfitLanePostprocessor", || {
                Box::new(plugins::PolyfitLanePostprocessor::new())
            });
        registry
            .calibration_services
            .register("OnlineCalibrationService", || {
                Box::new(plugins::OnlineCalibrationService::new())
            });

        registry
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
