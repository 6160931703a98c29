//! Distance-based LOD visibility classification
//!
//! Each LOD group owns an activation distance band and a reference volume.
//! Classification yields one of three ordered states; the Prestream band
//! around the visible range gives streaming a head start and keeps objects
//! from flickering at the exact boundary.

use serde::{Deserialize, Serialize};

use crate::core::types::Vec3;
use crate::math::Aabb;
use super::viewport::Viewport;

/// Visibility state of a scene node, ordered.
///
/// The cascade invariant is `visibility(child) <= visibility(parent)` under
/// this ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LodVisibility {
    /// Not drawn, not in the spatial index
    #[default]
    Hidden,
    /// Not drawn yet, but resources may begin streaming
    Prestream,
    /// Drawn at full participation
    Visible,
}

impl LodVisibility {
    /// True for any state that puts the node in the spatial index
    pub fn in_world(&self) -> bool {
        *self >= LodVisibility::Prestream
    }
}

/// Tuning for the visibility cascade
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LodCascadeConfig {
    /// Width of the hysteresis band around the visible range, world units
    pub prestream_distance: f32,
}

impl Default for LodCascadeConfig {
    fn default() -> Self {
        Self {
            prestream_distance: 10.0,
        }
    }
}

/// Distance-band activation parameters for one detail level
#[derive(Clone, Debug)]
pub struct LodGroup {
    /// Activation band lower edge; 0 disables the near cutoff
    pub min_distance: f32,
    /// Activation band upper edge; 0 together with min 0 means always visible
    pub max_distance: f32,
    /// If false, distances are in object-local units and camera distance is
    /// divided by `unit_scale` before comparison
    pub world_units: bool,
    /// Object scale used when `world_units` is false
    pub unit_scale: f32,
    /// Reference volume for nearest-point distance computation
    pub reference: Aabb,
}

impl LodGroup {
    /// Group with a world-unit activation band over `reference`
    pub fn new(min_distance: f32, max_distance: f32, reference: Aabb) -> Self {
        Self {
            min_distance,
            max_distance,
            world_units: true,
            unit_scale: 1.0,
            reference,
        }
    }

    /// Classify visibility from the viewport's camera position.
    ///
    /// Both distances zero means always Visible. Otherwise the squared
    /// distance from the camera to the nearest point of the reference volume,
    /// scaled by `2^(-lod_bias)` squared, is compared against the band:
    /// inside `[min, max]` is Visible, inside the band widened by the
    /// prestream distance is Prestream, anything further is Hidden.
    pub fn calc_lod_visibility(
        &self,
        viewport: &dyn Viewport,
        config: &LodCascadeConfig,
    ) -> LodVisibility {
        if self.min_distance == 0.0 && self.max_distance == 0.0 {
            return LodVisibility::Visible;
        }

        let bias_scale = 2f32.powf(-viewport.lod_bias());
        let mut dist_sq = self.reference.distance_squared(viewport.camera_position())
            * bias_scale * bias_scale;
        if !self.world_units && self.unit_scale > 0.0 {
            dist_sq /= self.unit_scale * self.unit_scale;
        }

        let min_sq = self.min_distance * self.min_distance;
        let max_sq = self.max_distance * self.max_distance;
        if dist_sq >= min_sq && dist_sq <= max_sq {
            return LodVisibility::Visible;
        }

        let band = config.prestream_distance;
        let pre_min = (self.min_distance - band).max(0.0);
        let pre_max = self.max_distance + band;
        if dist_sq >= pre_min * pre_min && dist_sq <= pre_max * pre_max {
            return LodVisibility::Prestream;
        }

        LodVisibility::Hidden
    }

    /// Distance classification against an explicit camera position,
    /// bypassing bias. Convenience for tests and tools.
    pub fn classify_at(&self, camera: Vec3, config: &LodCascadeConfig) -> LodVisibility {
        struct Fixed(Vec3);
        impl Viewport for Fixed {
            fn camera_position(&self) -> Vec3 { self.0 }
            fn visible(&self, _bounds: &Aabb) -> bool { true }
            fn lod_bias(&self) -> f32 { 0.0 }
        }
        self.calc_lod_visibility(&Fixed(camera), config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_0_50() -> LodGroup {
        LodGroup::new(0.0, 50.0, Aabb::new(Vec3::ZERO, Vec3::ZERO))
    }

    #[test]
    fn test_visibility_ordering() {
        assert!(LodVisibility::Hidden < LodVisibility::Prestream);
        assert!(LodVisibility::Prestream < LodVisibility::Visible);
        assert!(!LodVisibility::Hidden.in_world());
        assert!(LodVisibility::Prestream.in_world());
        assert!(LodVisibility::Visible.in_world());
    }

    #[test]
    fn test_zero_band_always_visible() {
        let group = LodGroup::new(0.0, 0.0, Aabb::new(Vec3::ZERO, Vec3::ONE));
        let config = LodCascadeConfig::default();
        assert_eq!(
            group.classify_at(Vec3::splat(1e6), &config),
            LodVisibility::Visible
        );
    }

    #[test]
    fn test_distance_bands() {
        // min 0, max 50, prestream band 10
        let group = group_0_50();
        let config = LodCascadeConfig { prestream_distance: 10.0 };

        // 45 units away: inside the visible band
        assert_eq!(
            group.classify_at(Vec3::new(45.0, 0.0, 0.0), &config),
            LodVisibility::Visible
        );
        // 55 units away: in the hysteresis band
        assert_eq!(
            group.classify_at(Vec3::new(55.0, 0.0, 0.0), &config),
            LodVisibility::Prestream
        );
        // 65 units away: hidden
        assert_eq!(
            group.classify_at(Vec3::new(65.0, 0.0, 0.0), &config),
            LodVisibility::Hidden
        );
    }

    #[test]
    fn test_near_cutoff_prestream() {
        let group = LodGroup::new(100.0, 200.0, Aabb::new(Vec3::ZERO, Vec3::ZERO));
        let config = LodCascadeConfig { prestream_distance: 10.0 };

        assert_eq!(group.classify_at(Vec3::new(150.0, 0.0, 0.0), &config), LodVisibility::Visible);
        // Just inside the widened band on the near side
        assert_eq!(group.classify_at(Vec3::new(95.0, 0.0, 0.0), &config), LodVisibility::Prestream);
        assert_eq!(group.classify_at(Vec3::new(50.0, 0.0, 0.0), &config), LodVisibility::Hidden);
    }

    #[test]
    fn test_nearest_point_uses_volume() {
        // A 10-unit box: distance is measured to its surface, not its center
        let group = LodGroup::new(0.0, 50.0, Aabb::new(Vec3::ZERO, Vec3::splat(10.0)));
        let config = LodCascadeConfig { prestream_distance: 10.0 };

        // 58 from origin but only 48 from the box face: visible
        assert_eq!(
            group.classify_at(Vec3::new(58.0, 5.0, 5.0), &config),
            LodVisibility::Visible
        );
    }

    #[test]
    fn test_lod_bias_scales_distance() {
        let group = group_0_50();
        let config = LodCascadeConfig { prestream_distance: 0.0 };

        struct Biased(f32);
        impl Viewport for Biased {
            fn camera_position(&self) -> Vec3 { Vec3::new(80.0, 0.0, 0.0) }
            fn visible(&self, _bounds: &Aabb) -> bool { true }
            fn lod_bias(&self) -> f32 { self.0 }
        }

        // 80 units: hidden at bias 0, visible at bias 1 (effective distance 40)
        assert_eq!(group.calc_lod_visibility(&Biased(0.0), &config), LodVisibility::Hidden);
        assert_eq!(group.calc_lod_visibility(&Biased(1.0), &config), LodVisibility::Visible);
    }

    #[test]
    fn test_local_units() {
        let mut group = group_0_50();
        group.world_units = false;
        group.unit_scale = 2.0;
        let config = LodCascadeConfig { prestream_distance: 0.0 };

        // 80 world units is 40 object units at scale 2: visible
        assert_eq!(
            group.classify_at(Vec3::new(80.0, 0.0, 0.0), &config),
            LodVisibility::Visible
        );
    }
}
