//! Drishti Core - shared data model for the camera perception stack
//!
//! This crate carries the types that cross stage boundaries: camera models
//! and intrinsics, detected/tracked obstacles, and lane geometry. It has no
//! pipeline logic of its own; `drishti-camera` builds the per-frame
//! orchestration on top of these types.

pub mod camera;
pub mod error;
pub mod lane;
pub mod object;

pub use camera::{
    ground_point_from_pixel, CameraModelProvider, PinholeCamera, StaticCameraModelProvider,
};
pub use error::{Error, Result};
pub use lane::{ImageCurve, LaneLine, LanePosition};
pub use object::{BBox2D, CameraSupplement, Object, ObjectType};
