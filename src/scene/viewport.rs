//! Viewport collaborator seam
//!
//! The scene consumes the camera through this narrow interface; the actual
//! camera/frustum implementation lives with the renderer.

use crate::core::types::Vec3;
use crate::math::Aabb;

/// What the LOD cascade needs to know about the active view
pub trait Viewport {
    /// World-space camera position
    fn camera_position(&self) -> Vec3;

    /// Whether a bounds is within the view volume
    fn visible(&self, bounds: &Aabb) -> bool;

    /// Detail bias: each +1 halves effective LOD distances
    fn lod_bias(&self) -> f32;
}

/// Minimal concrete viewport for hosts without a frustum and for tests
#[derive(Clone, Copy, Debug)]
pub struct BasicViewport {
    pub camera_pos: Vec3,
    pub lod_bias: f32,
}

impl BasicViewport {
    pub fn new(camera_pos: Vec3) -> Self {
        Self {
            camera_pos,
            lod_bias: 0.0,
        }
    }
}

impl Viewport for BasicViewport {
    fn camera_position(&self) -> Vec3 {
        self.camera_pos
    }

    fn visible(&self, _bounds: &Aabb) -> bool {
        true
    }

    fn lod_bias(&self) -> f32 {
        self.lod_bias
    }
}
