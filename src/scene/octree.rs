//! Octree spatial index over scene nodes.
//!
//! Cells live in a flat arena with index-based parent/child links and an
//! explicit free list; the root is replaced, never mutated, when the tree
//! grows or shrinks, so root identity changes across frames. Objects with
//! ZERO bounds are not indexed at all and objects with INFINITE bounds are
//! held in a separate outer set that callers visit unconditionally.
//!
//! All mutation is main-thread-only by contract; the owning thread is
//! captured at construction and checked in debug builds.

use std::collections::{HashMap, HashSet};
use std::thread::ThreadId;

use crate::core::types::Vec3;
use crate::math::{Aabb, Ray};
use super::graph::SceneNodeId;

/// Cells beyond this depth stop subdividing; tiny or point-sized bounds
/// would otherwise split until float precision collapses.
const MAX_DEPTH: u32 = 32;

/// Arena index of an octree cell. Stale ids are possible after trim/shrink;
/// holders must not cache them across mutations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellId(u32);

/// One cell of the spatial tree.
#[derive(Clone, Debug)]
pub struct Cell {
    bounds: Aabb,
    parent: Option<CellId>,
    children: [Option<CellId>; 8],
    objects: Vec<SceneNodeId>,
    /// Occlusion-query scratch: frame this cell last passed a visibility test
    last_visible_frame: u64,
}

impl Cell {
    fn new(bounds: Aabb, parent: Option<CellId>) -> Self {
        Self {
            bounds,
            parent,
            children: [None; 8],
            objects: Vec::new(),
            last_visible_frame: 0,
        }
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn parent(&self) -> Option<CellId> {
        self.parent
    }

    pub fn children(&self) -> &[Option<CellId>; 8] {
        &self.children
    }

    /// Scene nodes held directly at this cell (they fit here but in no
    /// single child octant)
    pub fn objects(&self) -> &[SceneNodeId] {
        &self.objects
    }

    pub fn last_visible_frame(&self) -> u64 {
        self.last_visible_frame
    }

    fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.children.iter().all(|c| c.is_none())
    }
}

/// Where an object currently sits in the index.
#[derive(Clone, Debug)]
struct Placement {
    bounds: Aabb,
    layers: u32,
    /// Back-references to holding cells; removal erases directly without
    /// re-descending
    cells: Vec<CellId>,
}

/// Result of a ray/line/sphere cast.
#[derive(Clone, Copy, Debug)]
pub struct CastHit {
    pub node: SceneNodeId,
    /// Distance along the cast at the entry point
    pub t: f32,
    pub point: Vec3,
}

/// Live spatial index of scene objects.
pub struct Octree {
    cells: Vec<Cell>,
    free: Vec<CellId>,
    root: Option<CellId>,
    /// Infinite-bounds objects, excluded from all spatial pruning
    outer: HashSet<SceneNodeId>,
    placements: HashMap<SceneNodeId, Placement>,
    owner: ThreadId,
}

impl Octree {
    /// Create an empty octree owned by the calling thread.
    pub fn new() -> Self {
        Self {
            cells: Vec::new(),
            free: Vec::new(),
            root: None,
            outer: HashSet::new(),
            placements: HashMap::new(),
            owner: std::thread::current().id(),
        }
    }

    /// Single-writer contract check. Mutating the octree from any thread
    /// other than the owner is a bug in the caller, not a runtime condition.
    #[inline]
    fn assert_owner(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.owner,
            "octree mutated off its owning thread"
        );
    }

    fn alloc_cell(&mut self, bounds: Aabb, parent: Option<CellId>) -> CellId {
        if let Some(id) = self.free.pop() {
            self.cells[id.0 as usize] = Cell::new(bounds, parent);
            id
        } else {
            let id = CellId(self.cells.len() as u32);
            self.cells.push(Cell::new(bounds, parent));
            id
        }
    }

    fn free_cell(&mut self, id: CellId) {
        self.cells[id.0 as usize].objects.clear();
        self.cells[id.0 as usize].children = [None; 8];
        self.free.push(id);
    }

    fn cell_ref(&self, id: CellId) -> &Cell {
        &self.cells[id.0 as usize]
    }

    fn cell_mut(&mut self, id: CellId) -> &mut Cell {
        &mut self.cells[id.0 as usize]
    }

    /// Current root cell, if any objects are indexed.
    pub fn root_cell(&self) -> Option<CellId> {
        self.root
    }

    /// Bounds of the current root.
    pub fn root_bounds(&self) -> Option<Aabb> {
        self.root.map(|id| self.cell_ref(id).bounds)
    }

    /// Look up a cell for traversal.
    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        let cell = self.cells.get(id.0 as usize)?;
        if self.free.contains(&id) { None } else { Some(cell) }
    }

    /// Infinite-bounds objects; callers visit these unconditionally since
    /// they never participate in spatial pruning.
    pub fn outer_nodes(&self) -> impl Iterator<Item = SceneNodeId> + '_ {
        self.outer.iter().copied()
    }

    /// Whether an object is currently indexed (finite or outer).
    pub fn contains(&self, id: SceneNodeId) -> bool {
        self.placements.contains_key(&id)
    }

    /// Number of indexed objects.
    pub fn object_count(&self) -> usize {
        self.placements.len()
    }

    /// Number of live cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len() - self.free.len()
    }

    /// Record a passed occlusion/visibility test for a cell.
    pub fn note_cell_visible(&mut self, id: CellId, frame: u64) {
        self.assert_owner();
        if (id.0 as usize) < self.cells.len() {
            self.cells[id.0 as usize].last_visible_frame = frame;
        }
    }

    /// Index an object. ZERO bounds are not indexed, INFINITE bounds go to
    /// the outer set, anything else descends into the tree, growing the root
    /// first if the bounds does not fit.
    pub fn add(&mut self, id: SceneNodeId, bounds: Aabb, layers: u32) {
        self.assert_owner();
        // Re-adding is an update
        self.remove(id);

        if bounds.is_zero() {
            return;
        }
        if bounds.is_infinite() {
            self.outer.insert(id);
            self.placements.insert(id, Placement {
                bounds,
                layers,
                cells: Vec::new(),
            });
            return;
        }

        let root = match self.root {
            None => {
                let root = self.alloc_cell(Self::root_sized_for(bounds), None);
                self.root = Some(root);
                root
            }
            Some(root) => root,
        };
        let root = self.grow_to_contain(root, bounds);
        let cell = self.descend(root, bounds);

        self.cell_mut(cell).objects.push(id);
        self.placements.insert(id, Placement {
            bounds,
            layers,
            cells: vec![cell],
        });
    }

    /// Remove an object. Unknown ids are a no-op. Vacated cells are trimmed
    /// upward and the root shrinks while it has nothing of its own and at
    /// most one child.
    pub fn remove(&mut self, id: SceneNodeId) {
        self.assert_owner();
        let Some(placement) = self.placements.remove(&id) else {
            return;
        };
        if placement.bounds.is_infinite() {
            self.outer.remove(&id);
            return;
        }

        for cell_id in placement.cells {
            let cell = self.cell_mut(cell_id);
            if let Some(pos) = cell.objects.iter().position(|o| *o == id) {
                cell.objects.swap_remove(pos);
            }
            self.trim(cell_id);
        }
        self.shrink();
    }

    /// Reinsert an object with fresh bounds; defined as remove + add.
    pub fn update(&mut self, id: SceneNodeId, bounds: Aabb, layers: u32) {
        self.add(id, bounds, layers);
    }

    /// First-object root: sized exactly to the object, with degenerate axes
    /// padded so that doubling growth can make progress.
    fn root_sized_for(bounds: Aabb) -> Aabb {
        const MIN_EXTENT: f32 = 1e-3;
        let mut max = bounds.max;
        if max.x - bounds.min.x < MIN_EXTENT { max.x = bounds.min.x + MIN_EXTENT; }
        if max.y - bounds.min.y < MIN_EXTENT { max.y = bounds.min.y + MIN_EXTENT; }
        if max.z - bounds.min.z < MIN_EXTENT { max.z = bounds.min.z + MIN_EXTENT; }
        Aabb::new(bounds.min, max)
    }

    /// Replace the root with double-sized wrappers until `bounds` fits.
    /// Growth direction per axis is chosen so the old root lands on the
    /// correct child octant of the new one.
    fn grow_to_contain(&mut self, mut root: CellId, bounds: Aabb) -> CellId {
        while !self.cell_ref(root).bounds.contains_aabb(&bounds) {
            let old = self.cell_ref(root).bounds;
            let size = old.size();

            let mut min = old.min;
            let mut max = old.max;
            let mut octant = 0u8;
            // Expanding toward min puts the old root in the upper half
            if bounds.min.x < old.min.x { min.x -= size.x; octant |= 1; } else { max.x += size.x; }
            if bounds.min.y < old.min.y { min.y -= size.y; octant |= 2; } else { max.y += size.y; }
            if bounds.min.z < old.min.z { min.z -= size.z; octant |= 4; } else { max.z += size.z; }

            let new_root = self.alloc_cell(Aabb::new(min, max), None);
            self.cell_mut(new_root).children[octant as usize] = Some(root);
            self.cell_mut(root).parent = Some(new_root);
            self.root = Some(new_root);
            root = new_root;
        }
        root
    }

    /// Walk down from `cell`, following the child octant that fully contains
    /// `bounds`. When no single octant does (straddling the split planes or
    /// float edge cases), the object stays at the current, coarser cell.
    fn descend(&mut self, mut cell: CellId, bounds: Aabb) -> CellId {
        for _ in 0..MAX_DEPTH {
            let cell_bounds = self.cell_ref(cell).bounds;
            let octant = cell_bounds.octant_of_point(bounds.center());
            let child_bounds = cell_bounds.child_octant(octant);
            if !child_bounds.contains_aabb(&bounds) {
                break;
            }
            cell = match self.cell_ref(cell).children[octant as usize] {
                Some(child) => child,
                None => {
                    let child = self.alloc_cell(child_bounds, Some(cell));
                    self.cell_mut(cell).children[octant as usize] = Some(child);
                    child
                }
            };
        }
        cell
    }

    /// Drop `cell` and its ancestors while they hold nothing. The root is
    /// left for `shrink` to handle.
    fn trim(&mut self, mut cell: CellId) {
        while self.cell_ref(cell).is_empty() {
            let Some(parent) = self.cell_ref(cell).parent else {
                break;
            };
            let slot = self
                .cell_ref(parent)
                .children
                .iter()
                .position(|c| *c == Some(cell));
            if let Some(slot) = slot {
                self.cell_mut(parent).children[slot] = None;
            }
            self.free_cell(cell);
            cell = parent;
        }
    }

    /// While the root holds no objects of its own and has at most one child,
    /// promote that child (or drop the root entirely).
    fn shrink(&mut self) {
        while let Some(root) = self.root {
            if !self.cell_ref(root).objects.is_empty() {
                break;
            }
            let children: Vec<CellId> = self
                .cell_ref(root)
                .children
                .iter()
                .flatten()
                .copied()
                .collect();
            match children.len() {
                0 => {
                    self.free_cell(root);
                    self.root = None;
                }
                1 => {
                    let child = children[0];
                    self.cell_mut(child).parent = None;
                    self.free_cell(root);
                    self.root = Some(child);
                }
                _ => break,
            }
        }
    }

    /// Closest hit along a ray. Cells whose bounds the ray misses are pruned
    /// and the search segment tightens after every hit.
    pub fn ray_cast(&self, origin: Vec3, direction: Vec3, max_t: f32, mask: u32) -> Option<CastHit> {
        let ray = Ray::new(origin, direction);
        self.cast(&ray, max_t, 0.0, mask)
    }

    /// Closest hit along the segment from `a` to `b`.
    pub fn line_cast(&self, a: Vec3, b: Vec3, mask: u32) -> Option<CastHit> {
        let (ray, length) = Ray::between(a, b);
        self.cast(&ray, length, 0.0, mask)
    }

    /// Closest hit of a sphere swept from `a` to `b`.
    pub fn sphere_cast(&self, a: Vec3, b: Vec3, radius: f32, mask: u32) -> Option<CastHit> {
        let (ray, length) = Ray::between(a, b);
        self.cast(&ray, length, radius, mask)
    }

    fn cast(&self, ray: &Ray, max_t: f32, radius: f32, mask: u32) -> Option<CastHit> {
        let root = self.root?;
        let mut best: Option<CastHit> = None;
        let mut limit = max_t;
        self.cast_cell(root, ray, radius, mask, &mut limit, &mut best);
        best
    }

    fn cast_cell(
        &self,
        cell_id: CellId,
        ray: &Ray,
        radius: f32,
        mask: u32,
        limit: &mut f32,
        best: &mut Option<CastHit>,
    ) {
        let cell = self.cell_ref(cell_id);
        match ray.intersects_aabb_inflated(&cell.bounds, radius) {
            Some((t_near, _)) if t_near <= *limit => {}
            _ => return,
        }

        for &id in &cell.objects {
            let Some(placement) = self.placements.get(&id) else {
                continue;
            };
            if placement.layers & mask == 0 {
                continue;
            }
            if let Some((t, _)) = ray.intersects_aabb_inflated(&placement.bounds, radius)
                && t <= *limit
            {
                *best = Some(CastHit {
                    node: id,
                    t,
                    point: ray.at(t),
                });
                // Tighten the segment for all later pruning
                *limit = t;
            }
        }

        for &child in &cell.children {
            if let Some(child) = child {
                self.cast_cell(child, ray, radius, mask, limit, best);
            }
        }
    }
}

impl Default for Octree {
    fn default() -> Self {
        Self::new()
    }
}
