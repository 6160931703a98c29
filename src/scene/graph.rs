//! Scene graph — CPU-side hierarchy of nodes with LOD visibility cascade.
//!
//! Each node carries a locally computed visibility and an effective
//! visibility clamped by its parent: `effective = min(local, parent
//! effective)`. Any visibility write cascades monotonically down the tree,
//! and the transitions it produces drive spatial-index insertion/removal in
//! the owning [`Scene`](super::Scene).

use std::collections::HashMap;

use crate::math::Aabb;
use super::lod::{LodCascadeConfig, LodGroup, LodVisibility};
use super::viewport::Viewport;

/// Unique identifier for a scene graph node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SceneNodeId(pub u64);

/// One effective-visibility transition produced by a cascade.
#[derive(Clone, Copy, Debug)]
pub struct VisibilityChange {
    pub id: SceneNodeId,
    pub from: LodVisibility,
    pub to: LodVisibility,
}

impl VisibilityChange {
    /// Node became spatially present (Hidden to Prestream or above)
    pub fn entered_world(&self) -> bool {
        !self.from.in_world() && self.to.in_world()
    }

    /// Node left the spatial index (dropped to Hidden)
    pub fn left_world(&self) -> bool {
        self.from.in_world() && !self.to.in_world()
    }
}

/// A single node in the scene graph.
#[derive(Clone, Debug)]
pub struct SceneNode {
    pub id: SceneNodeId,
    pub name: String,
    pub parent: Option<SceneNodeId>,
    pub children: Vec<SceneNodeId>,
    /// World bounds; ZERO means not spatially present, INFINITE is tracked
    /// in the octree's outer set
    pub bounds: Aabb,
    /// Layer mask for cast filtering
    pub layers: u32,
    /// Distance-band activation; nodes without a group follow their parent
    pub lod: Option<LodGroup>,
    local_visibility: LodVisibility,
    effective_visibility: LodVisibility,
}

impl SceneNode {
    fn new(id: SceneNodeId, name: impl Into<String>, bounds: Aabb, layers: u32) -> Self {
        Self {
            id,
            name: name.into(),
            parent: None,
            children: Vec::new(),
            bounds,
            layers,
            lod: None,
            local_visibility: LodVisibility::Visible,
            effective_visibility: LodVisibility::Visible,
        }
    }

    /// Visibility last computed or assigned for this node alone
    pub fn local_visibility(&self) -> LodVisibility {
        self.local_visibility
    }

    /// Visibility after clamping by every ancestor
    pub fn effective_visibility(&self) -> LodVisibility {
        self.effective_visibility
    }
}

/// CPU-side scene hierarchy.
pub struct SceneGraph {
    nodes: HashMap<SceneNodeId, SceneNode>,
    root: SceneNodeId,
    next_id: u64,
}

impl SceneGraph {
    /// Create a new scene graph with a root group node.
    pub fn new() -> Self {
        let root_id = SceneNodeId(0);
        let root_node = SceneNode::new(root_id, "root", Aabb::ZERO, u32::MAX);

        let mut nodes = HashMap::new();
        nodes.insert(root_id, root_node);

        Self {
            nodes,
            root: root_id,
            next_id: 1,
        }
    }

    /// Get the root node ID.
    pub fn root(&self) -> SceneNodeId {
        self.root
    }

    /// Allocate a fresh node ID.
    fn alloc_id(&mut self) -> SceneNodeId {
        let id = SceneNodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Look up a node.
    pub fn node(&self, id: SceneNodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Add a child node under `parent`. Returns the new node's ID.
    pub fn add_child(
        &mut self,
        parent: SceneNodeId,
        name: impl Into<String>,
        bounds: Aabb,
        layers: u32,
    ) -> SceneNodeId {
        let id = self.alloc_id();
        let mut node = SceneNode::new(id, name, bounds, layers);
        node.parent = Some(parent);

        let parent_eff = self
            .nodes
            .get(&parent)
            .map(|p| p.effective_visibility)
            .unwrap_or(LodVisibility::Visible);
        node.effective_visibility = node.local_visibility.min(parent_eff);

        self.nodes.insert(id, node);
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.push(id);
        }
        id
    }

    /// Attach a LOD group to a node. Siblings that carry groups form a LOD
    /// set under their shared parent.
    pub fn set_lod_group(&mut self, id: SceneNodeId, group: LodGroup) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.lod = Some(group);
        }
    }

    /// Update a node's bounds. The octree placement is refreshed by the
    /// owning scene, not here.
    pub fn set_bounds(&mut self, id: SceneNodeId, bounds: Aabb) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.bounds = bounds;
        }
    }

    /// Detach a node and its whole subtree. Returns the removed ids so the
    /// caller can evict them from the spatial index.
    pub fn remove(&mut self, id: SceneNodeId) -> Vec<SceneNodeId> {
        if id == self.root {
            return Vec::new();
        }
        let Some(parent) = self.nodes.get(&id).and_then(|n| n.parent) else {
            return Vec::new();
        };
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != id);
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
                removed.push(current);
            }
        }
        removed
    }

    /// Set a node's local visibility and cascade the effective value to all
    /// descendants. Returns every node whose effective visibility changed.
    pub fn set_visibility(&mut self, id: SceneNodeId, visibility: LodVisibility) -> Vec<VisibilityChange> {
        let Some(node) = self.nodes.get_mut(&id) else {
            return Vec::new();
        };
        node.local_visibility = visibility;

        let parent_eff = node
            .parent
            .and_then(|p| self.nodes.get(&p))
            .map(|p| p.effective_visibility)
            .unwrap_or(LodVisibility::Visible);

        let mut changes = Vec::new();
        self.propagate(id, parent_eff, &mut changes);
        changes
    }

    /// Recompute `effective = min(local, parent effective)` down from `id`.
    fn propagate(
        &mut self,
        id: SceneNodeId,
        parent_eff: LodVisibility,
        changes: &mut Vec<VisibilityChange>,
    ) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let new_eff = node.local_visibility.min(parent_eff);
        if new_eff != node.effective_visibility {
            changes.push(VisibilityChange {
                id,
                from: node.effective_visibility,
                to: new_eff,
            });
            node.effective_visibility = new_eff;
        }
        let children = node.children.clone();
        for child in children {
            self.propagate(child, new_eff, changes);
        }
    }

    /// Per-frame LOD pass: classify every LOD group from the viewport and
    /// cascade. Among sibling groups under one parent at most one keeps the
    /// full Visible promotion; later Visible candidates are capped at
    /// Prestream so two detail levels are never fully resident at once.
    pub fn update_lod_visibility(
        &mut self,
        viewport: &dyn Viewport,
        config: &LodCascadeConfig,
    ) -> Vec<VisibilityChange> {
        let mut changes = Vec::new();
        self.update_rec(self.root, LodVisibility::Visible, viewport, config, &mut changes);
        changes
    }

    fn update_rec(
        &mut self,
        id: SceneNodeId,
        parent_eff: LodVisibility,
        viewport: &dyn Viewport,
        config: &LodCascadeConfig,
        changes: &mut Vec<VisibilityChange>,
    ) {
        let (eff, children) = {
            let Some(node) = self.nodes.get_mut(&id) else {
                return;
            };
            let eff = node.local_visibility.min(parent_eff);
            if eff != node.effective_visibility {
                changes.push(VisibilityChange {
                    id,
                    from: node.effective_visibility,
                    to: eff,
                });
                node.effective_visibility = eff;
            }
            (eff, node.children.clone())
        };

        // Classify the LOD set formed by this node's group-carrying children
        let mut active_seen = false;
        for &child in &children {
            let Some(group) = self.nodes.get(&child).and_then(|n| n.lod.clone()) else {
                continue;
            };
            let mut v = group.calc_lod_visibility(viewport, config);
            if v == LodVisibility::Visible {
                if active_seen {
                    v = LodVisibility::Prestream;
                } else {
                    active_seen = true;
                }
            }
            if let Some(node) = self.nodes.get_mut(&child) {
                node.local_visibility = v;
            }
        }

        for child in children {
            self.update_rec(child, eff, viewport, config, changes);
        }
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::scene::viewport::BasicViewport;

    fn unit_bounds() -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::ONE)
    }

    #[test]
    fn test_add_and_lookup() {
        let mut graph = SceneGraph::new();
        let a = graph.add_child(graph.root(), "a", unit_bounds(), 1);
        assert_eq!(graph.node(a).unwrap().name, "a");
        assert_eq!(graph.node(a).unwrap().parent, Some(graph.root()));
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_remove_subtree() {
        let mut graph = SceneGraph::new();
        let a = graph.add_child(graph.root(), "a", unit_bounds(), 1);
        let b = graph.add_child(a, "b", unit_bounds(), 1);
        let c = graph.add_child(b, "c", unit_bounds(), 1);

        let removed = graph.remove(a);
        assert_eq!(removed.len(), 3);
        assert!(graph.node(a).is_none());
        assert!(graph.node(b).is_none());
        assert!(graph.node(c).is_none());
        assert!(graph.node(graph.root()).unwrap().children.is_empty());
    }

    #[test]
    fn test_cascade_clamps_children() {
        let mut graph = SceneGraph::new();
        let a = graph.add_child(graph.root(), "a", unit_bounds(), 1);
        let b = graph.add_child(a, "b", unit_bounds(), 1);

        let changes = graph.set_visibility(a, LodVisibility::Prestream);
        // Both a and b dropped from Visible to Prestream
        assert_eq!(changes.len(), 2);
        assert_eq!(graph.node(a).unwrap().effective_visibility(), LodVisibility::Prestream);
        assert_eq!(graph.node(b).unwrap().effective_visibility(), LodVisibility::Prestream);

        // Child cannot raise itself above the parent
        graph.set_visibility(b, LodVisibility::Visible);
        assert_eq!(graph.node(b).unwrap().effective_visibility(), LodVisibility::Prestream);
    }

    #[test]
    fn test_invariant_child_le_parent() {
        let mut graph = SceneGraph::new();
        let a = graph.add_child(graph.root(), "a", unit_bounds(), 1);
        let b = graph.add_child(a, "b", unit_bounds(), 1);
        let c = graph.add_child(b, "c", unit_bounds(), 1);

        for v in [LodVisibility::Hidden, LodVisibility::Visible, LodVisibility::Prestream] {
            graph.set_visibility(b, v);
            let ea = graph.node(a).unwrap().effective_visibility();
            let eb = graph.node(b).unwrap().effective_visibility();
            let ec = graph.node(c).unwrap().effective_visibility();
            assert!(eb <= ea);
            assert!(ec <= eb);
        }
    }

    #[test]
    fn test_world_transitions() {
        let mut graph = SceneGraph::new();
        let a = graph.add_child(graph.root(), "a", unit_bounds(), 1);

        let changes = graph.set_visibility(a, LodVisibility::Hidden);
        assert!(changes.iter().any(|c| c.id == a && c.left_world()));

        let changes = graph.set_visibility(a, LodVisibility::Prestream);
        assert!(changes.iter().any(|c| c.id == a && c.entered_world()));
    }

    #[test]
    fn test_lod_set_single_active() {
        let mut graph = SceneGraph::new();
        let parent = graph.add_child(graph.root(), "model", unit_bounds(), 1);

        // Two detail levels with overlapping bands; both classify Visible at
        // distance 25
        let near = graph.add_child(parent, "lod0", unit_bounds(), 1);
        let far = graph.add_child(parent, "lod1", unit_bounds(), 1);
        let reference = Aabb::new(Vec3::ZERO, Vec3::ZERO);
        graph.set_lod_group(near, LodGroup::new(0.0, 30.0, reference));
        graph.set_lod_group(far, LodGroup::new(20.0, 100.0, reference));

        let viewport = BasicViewport::new(Vec3::new(25.0, 0.0, 0.0));
        graph.update_lod_visibility(&viewport, &LodCascadeConfig::default());

        assert_eq!(graph.node(near).unwrap().effective_visibility(), LodVisibility::Visible);
        // Second Visible candidate in the set is capped at Prestream
        assert_eq!(graph.node(far).unwrap().effective_visibility(), LodVisibility::Prestream);
    }

    #[test]
    fn test_update_respects_parent_cap() {
        let mut graph = SceneGraph::new();
        let parent = graph.add_child(graph.root(), "model", unit_bounds(), 1);
        let lod0 = graph.add_child(parent, "lod0", unit_bounds(), 1);
        graph.set_lod_group(lod0, LodGroup::new(0.0, 0.0, unit_bounds()));

        graph.set_visibility(parent, LodVisibility::Hidden);
        let viewport = BasicViewport::new(Vec3::ZERO);
        graph.update_lod_visibility(&viewport, &LodCascadeConfig::default());

        // Group computes Visible but the hidden parent clamps it
        assert_eq!(graph.node(lod0).unwrap().local_visibility(), LodVisibility::Visible);
        assert_eq!(graph.node(lod0).unwrap().effective_visibility(), LodVisibility::Hidden);
    }
}
