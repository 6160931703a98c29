//! Adaptive resource streaming: residency tracking, budget balancing, and
//! the background worker that executes resizes.
//!
//! Per frame, the main thread marks the resources it referenced in the
//! [`ResidencyRegistry`], snapshots it, and submits the snapshot with the
//! current budgets to the [`StreamerThread`]. The worker runs the
//! [`StreamingBalancer`] passes and resizes resources through their shared
//! handles.

pub mod balancer;
pub mod resource;
pub mod streamer;

pub use balancer::{BalancerConfig, StreamingBalancer, StreamingStats};
pub use resource::{
    RegistryConfig, ResidencyRegistry, ResidencyState, ResourceKind, StreamCandidate,
    StreamHandle, Streamable,
};
pub use streamer::{StreamResult, StreamerThread};
