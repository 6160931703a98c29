//! Kestrel — scene spatial indexing and adaptive LOD resource streaming.
//!
//! Three cooperating subsystems:
//! - [`scene::Octree`]: an arena-backed dynamic octree over object AABBs,
//!   with ray, line, and sphere casts.
//! - [`scene::SceneGraph`]: a node hierarchy whose LOD visibility cascades
//!   parent-to-child and drives octree membership.
//! - [`streaming`]: a priority-ordered, budget-constrained balancer that
//!   resizes streamed resources on a worker thread.

pub mod core;
pub mod math;
pub mod scene;
pub mod streaming;
