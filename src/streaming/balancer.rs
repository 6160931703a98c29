//! Adaptive streaming balancer.
//!
//! Once per frame the balancer receives the priority-sorted snapshot of
//! active resources plus two byte budgets: `memory_remaining` (global
//! ceiling minus already-committed bytes) and `memory_remaining_this_frame`
//! (transfer-throughput ceiling). It assigns every resource a target
//! resident level and issues at most one resize per resource per frame.
//!
//! This is a greedy proportional-fair heuristic, not a global optimum:
//! O(n log n) per frame, with a one-or-two-level step cap so a resource
//! never snaps from coarsest to finest in a single frame even when memory
//! would briefly permit it.

use serde::{Deserialize, Serialize};

use crate::core::types::Result;
use crate::core::Error;
use super::resource::{ResidencyState, StreamCandidate};

/// Tuning for the balancing passes.
///
/// The tier schedule and step caps are empirically tuned values, exposed as
/// configuration rather than hard-coded invariants.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Growth memory is released in successive tiers, each a fraction of
    /// the bytes not yet released. High-priority resources draw from the
    /// generous early tiers.
    pub tier_fractions: Vec<f32>,
    /// Levels a resource may climb per frame
    pub max_step: usize,
    /// Step used instead when the resource lags far behind its target
    pub catchup_step: usize,
    /// Lag (in levels) beyond which the catchup step applies
    pub catchup_gap: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            tier_fractions: vec![0.75, 0.75, 0.5, 0.5, 0.5],
            max_step: 1,
            catchup_step: 2,
            catchup_gap: 2,
        }
    }
}

impl BalancerConfig {
    /// Load tuning from a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Counters from one balancing pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    /// Resources considered this pass
    pub balanced: usize,
    pub resizes_up: usize,
    pub resizes_down: usize,
    pub resizes_failed: usize,
    /// Bytes charged against the frame transfer budget
    pub bytes_transferred: usize,
    /// Steps pushed to a future frame by budget exhaustion
    pub deferred: usize,
}

/// Priority-ordered, budget-constrained residency balancer.
pub struct StreamingBalancer {
    config: BalancerConfig,
}

impl StreamingBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(BalancerConfig::default())
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Run one balancing pass over a priority-descending snapshot.
    ///
    /// Both budgets are mutated in place to report consumption. Budget
    /// exhaustion is not an error; resources just stay below target until
    /// memory frees up.
    pub fn do_streaming(
        &self,
        candidates: &mut [StreamCandidate],
        memory_remaining: &mut usize,
        memory_remaining_this_frame: &mut usize,
    ) -> StreamingStats {
        let mut stats = StreamingStats {
            balanced: candidates.len(),
            ..Default::default()
        };

        self.floor_pass(candidates, memory_remaining, memory_remaining_this_frame, &mut stats);
        let growth_total = *memory_remaining;
        self.assign_targets(candidates, memory_remaining);
        self.growth_pass(
            candidates,
            growth_total,
            memory_remaining,
            memory_remaining_this_frame,
            &mut stats,
        );

        log::debug!(
            "streaming pass: {} resources, {} up, {} down, {} failed, {} deferred, {} bytes",
            stats.balanced,
            stats.resizes_up,
            stats.resizes_down,
            stats.resizes_failed,
            stats.deferred,
            stats.bytes_transferred,
        );
        stats
    }

    /// Reserve every resource's minimum footprint. A resource resident above
    /// its minimum whose current level no longer fits the remaining budget
    /// is dropped to minimum immediately, charged against the frame budget.
    fn floor_pass(
        &self,
        candidates: &mut [StreamCandidate],
        memory_remaining: &mut usize,
        memory_remaining_this_frame: &mut usize,
        stats: &mut StreamingStats,
    ) {
        for cand in candidates.iter_mut() {
            let floor = cand.cost(cand.min_level);
            let current = cand.cost(cand.resident);

            if cand.resident > cand.min_level {
                if *memory_remaining >= current {
                    // Current residency still fits; keep it reserved
                    *memory_remaining -= current;
                    continue;
                }
                // Over budget: fall back to the floor. The down-resize
                // re-uploads the coarse levels, so it costs the floor bytes.
                let min_level = cand.min_level;
                let can_transfer = *memory_remaining_this_frame >= floor;
                if can_transfer && execute_resize(cand, min_level) {
                    *memory_remaining_this_frame -= floor;
                    *memory_remaining = memory_remaining.saturating_sub(floor);
                    cand.bytes_transferred += floor;
                    stats.resizes_down += 1;
                    stats.bytes_transferred += floor;
                } else {
                    // The old levels stay resident and reserved until a
                    // later frame
                    if can_transfer {
                        stats.resizes_failed += 1;
                    } else {
                        stats.deferred += 1;
                    }
                    *memory_remaining = memory_remaining.saturating_sub(current);
                }
            } else {
                *memory_remaining = memory_remaining.saturating_sub(floor.max(current));
            }
        }
    }

    /// Walk candidates in priority order raising each target toward its max
    /// level while the global budget covers the cost delta.
    fn assign_targets(&self, candidates: &mut [StreamCandidate], memory_remaining: &mut usize) {
        for cand in candidates.iter_mut() {
            let mut level = cand.resident.max(cand.min_level);
            while level < cand.max_level {
                let delta = cand.cost(level + 1).saturating_sub(cand.cost(level));
                if *memory_remaining < delta {
                    break;
                }
                *memory_remaining -= delta;
                level += 1;
            }
            cand.target = level;
        }
    }

    /// Step resources toward their targets, at most one resize per resource
    /// per frame, pacing growth through the tier schedule and the frame
    /// transfer budget.
    fn growth_pass(
        &self,
        candidates: &mut [StreamCandidate],
        growth_total: usize,
        memory_remaining: &mut usize,
        memory_remaining_this_frame: &mut usize,
        stats: &mut StreamingStats,
    ) {
        let mut released = 0usize;
        let mut spent = 0usize;
        let mut tier = 0usize;

        for index in 0..candidates.len() {
            let cand = &mut candidates[index];
            if cand.target <= cand.resident || cand.bytes_transferred > 0 {
                continue;
            }

            let gap = cand.target - cand.resident;
            let step = if gap > self.config.catchup_gap {
                self.config.catchup_step
            } else {
                self.config.max_step
            };
            let next = (cand.resident + step).min(cand.target);
            let delta = cand.cost(next).saturating_sub(cand.cost(cand.resident));

            // Open tiers until the step fits or the schedule runs out
            while released.saturating_sub(spent) < delta && tier < self.config.tier_fractions.len() {
                let unreleased = growth_total.saturating_sub(released);
                released += (self.config.tier_fractions[tier] * unreleased as f32) as usize;
                tier += 1;
            }

            if released.saturating_sub(spent) < delta || *memory_remaining_this_frame < delta {
                // This step and every lower-priority one waits for a future
                // frame
                stats.deferred += candidates[index..]
                    .iter()
                    .filter(|c| c.target > c.resident)
                    .count();
                break;
            }

            let cand = &mut candidates[index];
            if execute_resize(cand, next) {
                spent += delta;
                *memory_remaining_this_frame -= delta;
                cand.bytes_transferred += delta;
                stats.resizes_up += 1;
                stats.bytes_transferred += delta;
            } else {
                // Upload failure: roll back this resource's reservation only
                let refund = cand.cost(cand.target).saturating_sub(cand.cost(cand.resident));
                *memory_remaining += refund;
                cand.target = cand.resident;
                stats.resizes_failed += 1;
            }
        }
    }
}

/// Drive one resource through the Resident -> Resizing -> Resident cycle.
/// Returns false (leaving the resource at its prior level) on failure.
fn execute_resize(cand: &mut StreamCandidate, level: usize) -> bool {
    cand.state = ResidencyState::Resizing {
        from: cand.resident,
        to: level,
    };
    let result = {
        let mut guard = match cand.handle.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.resize(level)
    };
    match result {
        Ok(()) => {
            cand.state = ResidencyState::Resident(level);
            cand.resident = level;
            true
        }
        Err(e) => {
            log::warn!("resize of '{}' to level {} failed: {}", cand.name, level, e);
            cand.state = ResidencyState::Resident(cand.resident);
            false
        }
    }
}
