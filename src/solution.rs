//! Allocation tables and the statistics derived from them.
//!
//! A [`Solution`] freezes one allocator's answer: per time slot, how many
//! VMs of each class serve each app and how many requests each source
//! region sends to each class. Cost, response time averages, and the
//! deadline-miss ratio are computed from these tables on demand; nothing
//! here is ever mutated after assembly.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lp::Model;
use crate::model::{AppId, IcId, Problem, RegionId};
use crate::{Error, Result};

/// How fractional VM counts reported by the solver become whole VMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmRounding {
    /// Round to the nearest integer. CBC returns integral values for
    /// integer variables up to float noise, so this is the default.
    Nearest,
    /// Round up, the conservative choice for continuous relaxations.
    Ceiling,
}

impl Default for VmRounding {
    fn default() -> Self {
        VmRounding::Nearest
    }
}

/// Outcome quality of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// The solver proved the assignment optimal.
    Optimal,
    /// A feasible assignment without a proof of optimality: an incumbent
    /// from a stopped solver run, or the greedy heuristic's answer.
    Feasible,
}

/// Timings and outcome of one allocator invocation. The two-phase
/// allocators report the summed times of both phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolvingStats {
    /// Outcome quality.
    pub status: SolveStatus,
    /// Time spent building the constraint system.
    pub creation_time: Duration,
    /// Time spent inside the solver (or the heuristic).
    pub solving_time: Duration,
}

/// Allocation of one time slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotAllocation {
    /// VM counts per (app, instance class); absent means zero.
    pub vms: HashMap<(AppId, IcId), u32>,
    /// Requests routed per (app, source region, instance class); absent
    /// means zero.
    pub requests: HashMap<(AppId, RegionId, IcId), f64>,
}

/// One allocator's frozen answer for a whole problem.
#[derive(Debug, Clone)]
pub struct Solution {
    problem: Problem,
    slots: Vec<SlotAllocation>,
    stats: SolvingStats,
}

impl Solution {
    pub(crate) fn new(problem: Problem, slots: Vec<SlotAllocation>, stats: SolvingStats) -> Self {
        Self {
            problem,
            slots,
            stats,
        }
    }

    /// Adds an earlier phase's timings to this solution's stats.
    pub(crate) fn absorb_phase(mut self, earlier: &SolvingStats) -> Self {
        self.stats.creation_time += earlier.creation_time;
        self.stats.solving_time += earlier.solving_time;
        self
    }

    /// The problem this solution answers.
    #[must_use]
    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    /// Per-slot allocation tables.
    #[must_use]
    pub fn slots(&self) -> &[SlotAllocation] {
        &self.slots
    }

    /// Timings and outcome of the solve.
    #[must_use]
    pub fn stats(&self) -> &SolvingStats {
        &self.stats
    }

    /// Total cost of all provisioned VMs across all slots.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        let slot_secs = self.problem.slot_length().as_secs_f64();
        self.slots
            .iter()
            .flat_map(|slot| slot.vms.iter())
            .map(|(&(_, ic), &count)| {
                f64::from(count) * self.problem.system().ic(ic).price * slot_secs
            })
            .sum()
    }

    /// Request-weighted average response time over all served requests,
    /// one global average across apps, regions, and slots. Zero when
    /// nothing is served.
    #[must_use]
    pub fn avg_response_time(&self) -> Duration {
        self.weighted_response_time(|_| true)
    }

    /// Request-weighted average response time of one app's served
    /// requests. Zero when the app serves nothing.
    #[must_use]
    pub fn app_avg_response_time(&self, app: AppId) -> Duration {
        self.weighted_response_time(|a| a == app)
    }

    /// Fraction of the total request volume that misses its deadline:
    /// served requests whose route's response time exceeds the app's
    /// deadline, plus all requests that were never routed.
    #[must_use]
    pub fn deadline_miss_ratio(&self) -> f64 {
        let total = self.problem.total_requests();
        if total <= 0.0 {
            return 0.0;
        }
        let system = self.problem.system();
        let mut missed = self.unserved_requests();
        for ((app, region, ic), reqs) in self.served() {
            match system.response_time(app, region, ic) {
                Some(resp_time) if resp_time <= system.app(app).max_resp_time => {}
                // Routed over a route with no defined response time, or a
                // route slower than the deadline: both count as misses.
                _ => missed += reqs,
            }
        }
        missed / total
    }

    /// Request volume that no instance class served.
    #[must_use]
    pub fn unserved_requests(&self) -> f64 {
        let served: f64 = self.served().map(|(_, reqs)| reqs).sum();
        (self.problem.total_requests() - served).max(0.0)
    }

    fn served(&self) -> impl Iterator<Item = ((AppId, RegionId, IcId), f64)> + '_ {
        self.slots
            .iter()
            .flat_map(|slot| slot.requests.iter().map(|(&key, &reqs)| (key, reqs)))
    }

    fn weighted_response_time(&self, keep: impl Fn(AppId) -> bool) -> Duration {
        let system = self.problem.system();
        let mut total_time = 0.0;
        let mut total_reqs = 0.0;
        for ((app, region, ic), reqs) in self.served() {
            if !keep(app) {
                continue;
            }
            // Requests routed over an undefined route contribute to the
            // miss ratio instead of the averages.
            if let Some(resp_time) = system.response_time(app, region, ic) {
                total_time += reqs * resp_time.as_secs_f64();
                total_reqs += reqs;
            }
        }
        if total_reqs <= 0.0 {
            Duration::default()
        } else {
            Duration::from_secs_f64(total_time / total_reqs)
        }
    }
}

/// Turns a raw solver assignment into the allocation tables.
///
/// Variables missing from the value map are zero (CBC prints only nonzero
/// variables). Near-zero noise is clamped; materially negative values are
/// rejected.
pub(crate) fn assemble(
    problem: &Problem,
    model: &Model,
    values: &HashMap<String, f32>,
    rounding: VmRounding,
    stats: SolvingStats,
) -> Result<Solution> {
    let mut slots = vec![SlotAllocation::default(); problem.slots()];
    for x in &model.x {
        let raw = f64::from(values.get(&x.name).copied().unwrap_or(0.0));
        let count = round_vms(raw, rounding, &x.name)?;
        if count > 0 {
            slots[x.slot].vms.insert((x.app, x.ic), count);
        }
    }
    for y in &model.y {
        let raw = f64::from(values.get(&y.name).copied().unwrap_or(0.0));
        let reqs = clean_requests(raw, &y.name)?;
        if reqs > 0.0 {
            slots[y.slot].requests.insert((y.app, y.region, y.ic), reqs);
        }
    }
    Ok(Solution::new(problem.clone(), slots, stats))
}

fn round_vms(value: f64, rounding: VmRounding, name: &str) -> Result<u32> {
    if value < -1e-6 {
        return Err(Error::InvalidAssignment {
            name: name.to_string(),
            value,
        });
    }
    let value = value.max(0.0);
    let rounded = match rounding {
        VmRounding::Nearest => value.round(),
        VmRounding::Ceiling => (value - 1e-6).ceil().max(0.0),
    };
    Ok(rounded as u32)
}

fn clean_requests(value: f64, name: &str) -> Result<f64> {
    if value.abs() < 1e-6 {
        Ok(0.0)
    } else if value < 0.0 {
        Err(Error::InvalidAssignment {
            name: name.to_string(),
            value,
        })
    } else {
        Ok(value)
    }
}
