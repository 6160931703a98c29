//! Streamed resource interface and residency registry.
//!
//! Streamed resources (textures, meshes) expose a discrete ladder of LOD
//! levels with a byte cost per level. The registry tracks which resources
//! are active, with last-used frame and a computed priority weight, and
//! produces the priority-sorted snapshot the balancer consumes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::core::types::Result;

/// Resource class, weighted differently in the priority product.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Texture,
    Mesh,
}

impl ResourceKind {
    /// Type weight in the priority product. Meshes pop harder than textures
    /// when underdetailed, so they rank slightly above.
    pub fn weight(&self) -> f32 {
        match self {
            ResourceKind::Texture => 1.0,
            ResourceKind::Mesh => 1.5,
        }
    }
}

/// Residency state machine for one resource.
///
/// `Resident(level)` -> resize request -> `Resizing` -> upload complete ->
/// `Resident(new level)`. On upload failure the resource stays at the prior
/// resident level and only its own reservation is rolled back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResidencyState {
    Resident(usize),
    Resizing { from: usize, to: usize },
}

/// The narrow interface a streamed GPU resource exposes to the balancer.
///
/// Levels are indices into the resource's discrete LOD ladder, ordered from
/// coarsest (`min_level`) to finest (`max_level`).
///
/// `resize` must only perform GPU work on a thread the underlying API
/// permits; implementations for APIs with thread affinity should enqueue a
/// deferred command instead, and must insert a synchronization barrier
/// before the resized resource's new handle is published to the render
/// thread.
pub trait Streamable: Send {
    /// Stable identity of the resource
    fn name(&self) -> &str;

    fn kind(&self) -> ResourceKind;

    /// Number of discrete LOD levels
    fn level_count(&self) -> usize;

    /// Coarsest level the resource may be resized down to
    fn min_level(&self) -> usize {
        0
    }

    /// Finest level the resource can reach
    fn max_level(&self) -> usize {
        self.level_count().saturating_sub(1)
    }

    /// Bytes of memory the resource occupies when resident at `level`
    fn mem_required(&self, level: usize) -> usize;

    /// Currently resident level
    fn current_level(&self) -> usize;

    /// Perform the resize/upload to `level`. Failure is non-fatal: the
    /// resource stays at its prior level.
    fn resize(&mut self, level: usize) -> Result<()>;

    /// Frame number this resource was last referenced
    fn last_frame_used(&self) -> u64;

    /// Base streaming priority assigned by the resource's owner
    fn stream_priority(&self) -> f32;
}

/// Shared handle to a streamed resource; resize runs on the streamer thread.
pub type StreamHandle = Arc<Mutex<dyn Streamable>>;

/// One entry in the per-frame balancing snapshot.
///
/// Level metadata and per-level costs are cached at snapshot time so the
/// balancer only locks the handle to execute a resize.
#[derive(Clone)]
pub struct StreamCandidate {
    pub handle: StreamHandle,
    pub name: String,
    pub priority: f32,
    /// Resident level at snapshot time; updated as resizes execute
    pub resident: usize,
    pub min_level: usize,
    pub max_level: usize,
    /// Byte cost per level index
    pub costs: Vec<usize>,
    /// Level the balancer wants this resource at, set during balancing
    pub target: usize,
    pub state: ResidencyState,
    /// Bytes moved for this resource this frame
    pub bytes_transferred: usize,
}

impl StreamCandidate {
    pub fn cost(&self, level: usize) -> usize {
        self.costs.get(level).copied().unwrap_or(0)
    }
}

/// Registry tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Drop resources unused for this many frames
    pub stale_frames: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { stale_frames: 120 }
    }
}

struct Entry {
    handle: StreamHandle,
    last_used_frame: u64,
    /// On-screen coverage estimate recorded at mark_used
    coverage: f32,
}

/// Tracks the set of resources referenced recently, with priority weights.
pub struct ResidencyRegistry {
    entries: HashMap<String, Entry>,
    config: RegistryConfig,
    frame: u64,
}

impl ResidencyRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            frame: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RegistryConfig::default())
    }

    /// Begin a frame: advance the frame counter and drop stale entries.
    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
        let stale = self.config.stale_frames;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.last_used_frame + stale >= frame);
        let dropped = before - self.entries.len();
        if dropped > 0 {
            log::debug!("residency registry dropped {dropped} stale resources");
        }
    }

    /// Record that a resource was referenced this frame.
    ///
    /// `coverage` is the approximate fraction of the screen the resource
    /// affects, used as the first factor of the priority product.
    pub fn mark_used(&mut self, handle: StreamHandle, coverage: f32) {
        let name = {
            let guard = match handle.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.name().to_owned()
        };
        let frame = self.frame;
        self.entries
            .entry(name)
            .and_modify(|e| {
                e.last_used_frame = frame;
                e.coverage = coverage;
            })
            .or_insert(Entry {
                handle,
                last_used_frame: frame,
                coverage,
            });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the priority-descending snapshot for this frame's balancing
    /// pass. Priority is screen coverage x type weight x base stream
    /// priority x recency falloff.
    pub fn snapshot(&self) -> Vec<StreamCandidate> {
        let mut candidates: Vec<StreamCandidate> = self
            .entries
            .values()
            .map(|entry| {
                let guard = match entry.handle.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let frames_idle = self.frame.saturating_sub(entry.last_used_frame);
                let recency = 1.0 / (1.0 + frames_idle as f32);
                let priority =
                    entry.coverage * guard.kind().weight() * guard.stream_priority() * recency;
                let costs: Vec<usize> = (0..guard.level_count())
                    .map(|l| guard.mem_required(l))
                    .collect();
                let resident = guard.current_level();
                StreamCandidate {
                    name: guard.name().to_owned(),
                    priority,
                    resident,
                    min_level: guard.min_level(),
                    max_level: guard.max_level(),
                    costs,
                    target: guard.min_level(),
                    state: ResidencyState::Resident(resident),
                    bytes_transferred: 0,
                    handle: Arc::clone(&entry.handle),
                }
            })
            .collect();

        // total_cmp handles NaN/infinity deterministically
        candidates.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.name.cmp(&b.name))
        });
        candidates
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Simple in-memory resource for balancer and streamer tests.
    pub struct FakeResource {
        pub name: String,
        pub kind: ResourceKind,
        pub costs: Vec<usize>,
        pub level: usize,
        pub priority: f32,
        pub last_used: u64,
        /// When set, resize calls fail
        pub fail_resizes: bool,
        pub resize_calls: usize,
    }

    impl FakeResource {
        pub fn new(name: &str, costs: Vec<usize>, priority: f32) -> Self {
            Self {
                name: name.to_owned(),
                kind: ResourceKind::Texture,
                costs,
                level: 0,
                priority,
                last_used: 0,
                fail_resizes: false,
                resize_calls: 0,
            }
        }

        pub fn handle(self) -> StreamHandle {
            Arc::new(Mutex::new(self))
        }
    }

    impl Streamable for FakeResource {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ResourceKind {
            self.kind
        }

        fn level_count(&self) -> usize {
            self.costs.len()
        }

        fn mem_required(&self, level: usize) -> usize {
            self.costs.get(level).copied().unwrap_or(0)
        }

        fn current_level(&self) -> usize {
            self.level
        }

        fn resize(&mut self, level: usize) -> Result<()> {
            self.resize_calls += 1;
            if self.fail_resizes {
                return Err(crate::core::Error::Resize {
                    name: self.name.clone(),
                    reason: "simulated allocation failure".into(),
                });
            }
            self.level = level;
            Ok(())
        }

        fn last_frame_used(&self) -> u64 {
            self.last_used
        }

        fn stream_priority(&self) -> f32 {
            self.priority
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeResource;
    use super::*;

    #[test]
    fn test_mark_used_and_snapshot_order() {
        let mut registry = ResidencyRegistry::with_defaults();
        registry.begin_frame(1);

        registry.mark_used(FakeResource::new("low", vec![100, 1000], 1.0).handle(), 1.0);
        registry.mark_used(FakeResource::new("high", vec![100, 1000], 10.0).handle(), 1.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "high");
        assert_eq!(snapshot[1].name, "low");
        assert!(snapshot[0].priority > snapshot[1].priority);
    }

    #[test]
    fn test_snapshot_caches_costs() {
        let mut registry = ResidencyRegistry::with_defaults();
        registry.begin_frame(1);
        registry.mark_used(FakeResource::new("tex", vec![16, 64, 256], 1.0).handle(), 1.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].costs, vec![16, 64, 256]);
        assert_eq!(snapshot[0].min_level, 0);
        assert_eq!(snapshot[0].max_level, 2);
        assert_eq!(snapshot[0].state, ResidencyState::Resident(0));
    }

    #[test]
    fn test_recency_decays_priority() {
        let mut registry = ResidencyRegistry::with_defaults();
        registry.begin_frame(1);
        registry.mark_used(FakeResource::new("old", vec![16], 1.0).handle(), 1.0);

        registry.begin_frame(10);
        registry.mark_used(FakeResource::new("fresh", vec![16], 1.0).handle(), 1.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].name, "fresh");
        assert!(snapshot[0].priority > snapshot[1].priority);
    }

    #[test]
    fn test_mesh_outranks_texture_at_same_coverage() {
        let mut registry = ResidencyRegistry::with_defaults();
        registry.begin_frame(1);

        let mut mesh = FakeResource::new("mesh", vec![16], 1.0);
        mesh.kind = ResourceKind::Mesh;
        registry.mark_used(mesh.handle(), 1.0);
        registry.mark_used(FakeResource::new("tex", vec![16], 1.0).handle(), 1.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].name, "mesh");
    }

    #[test]
    fn test_stale_entries_dropped() {
        let mut registry = ResidencyRegistry::new(RegistryConfig { stale_frames: 5 });
        registry.begin_frame(1);
        registry.mark_used(FakeResource::new("tex", vec![16], 1.0).handle(), 1.0);
        assert_eq!(registry.len(), 1);

        registry.begin_frame(3);
        assert_eq!(registry.len(), 1);

        registry.begin_frame(10);
        assert_eq!(registry.len(), 0);
    }
}
