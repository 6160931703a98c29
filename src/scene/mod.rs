//! Scene management: spatial index, node hierarchy, LOD visibility.
//!
//! The [`Scene`] facade owns the graph and the octree and keeps them
//! consistent: visibility transitions out of Hidden insert a node into the
//! spatial index, transitions into Hidden remove it. All of this is
//! main-thread-only by contract; the streaming side only ever sees
//! priority snapshots.

pub mod graph;
pub mod lod;
pub mod octree;
pub mod viewport;

pub use graph::{SceneGraph, SceneNode, SceneNodeId, VisibilityChange};
pub use lod::{LodCascadeConfig, LodGroup, LodVisibility};
pub use octree::{CastHit, CellId, Octree};
pub use viewport::{BasicViewport, Viewport};

use crate::core::types::Vec3;
use crate::math::Aabb;

/// Owns the scene graph and its spatial index.
pub struct Scene {
    graph: SceneGraph,
    octree: Octree,
    lod_config: LodCascadeConfig,
    frame: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::with_config(LodCascadeConfig::default())
    }

    pub fn with_config(lod_config: LodCascadeConfig) -> Self {
        Self {
            graph: SceneGraph::new(),
            octree: Octree::new(),
            lod_config,
            frame: 0,
        }
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn octree(&self) -> &Octree {
        &self.octree
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Add an object under `parent` and index it if it is currently in the
    /// world.
    pub fn add_object(
        &mut self,
        parent: SceneNodeId,
        name: impl Into<String>,
        bounds: Aabb,
        layers: u32,
    ) -> SceneNodeId {
        let id = self.graph.add_child(parent, name, bounds, layers);
        if let Some(node) = self.graph.node(id)
            && node.effective_visibility().in_world()
        {
            self.octree.add(id, bounds, layers);
        }
        id
    }

    /// Attach LOD activation parameters to a node.
    pub fn set_lod_group(&mut self, id: SceneNodeId, group: LodGroup) {
        self.graph.set_lod_group(id, group);
    }

    /// Move/resize an object, refreshing its index placement.
    pub fn set_bounds(&mut self, id: SceneNodeId, bounds: Aabb) {
        self.graph.set_bounds(id, bounds);
        if let Some(node) = self.graph.node(id)
            && node.effective_visibility().in_world()
        {
            let layers = node.layers;
            self.octree.update(id, bounds, layers);
        }
    }

    /// Remove an object and its subtree from the graph and the index.
    pub fn remove_object(&mut self, id: SceneNodeId) {
        for removed in self.graph.remove(id) {
            self.octree.remove(removed);
        }
    }

    /// Set a node's visibility and apply the resulting index changes.
    pub fn set_visibility(&mut self, id: SceneNodeId, visibility: LodVisibility) {
        let changes = self.graph.set_visibility(id, visibility);
        self.apply_changes(&changes);
    }

    /// Per-frame update: advance the frame counter and run the LOD cascade.
    pub fn update(&mut self, viewport: &dyn Viewport) -> Vec<VisibilityChange> {
        self.frame += 1;
        let changes = self.graph.update_lod_visibility(viewport, &self.lod_config);
        self.apply_changes(&changes);
        changes
    }

    fn apply_changes(&mut self, changes: &[VisibilityChange]) {
        for change in changes {
            if change.entered_world() {
                if let Some(node) = self.graph.node(change.id) {
                    self.octree.add(change.id, node.bounds, node.layers);
                }
                log::trace!("scene node {:?} entered world", change.id);
            } else if change.left_world() {
                self.octree.remove(change.id);
                log::trace!("scene node {:?} left world", change.id);
            }
        }
    }

    pub fn ray_cast(&self, origin: Vec3, direction: Vec3, max_t: f32, mask: u32) -> Option<CastHit> {
        self.octree.ray_cast(origin, direction, max_t, mask)
    }

    pub fn line_cast(&self, a: Vec3, b: Vec3, mask: u32) -> Option<CastHit> {
        self.octree.line_cast(a, b, mask)
    }

    pub fn sphere_cast(&self, a: Vec3, b: Vec3, radius: f32, mask: u32) -> Option<CastHit> {
        self.octree.sphere_cast(a, b, radius, mask)
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}
