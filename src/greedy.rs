//! Heuristic allocator that needs no external solver.
//!
//! Used as a fast approximate baseline, a sanity check against the exact
//! allocators, and a fallback when they are too slow or infeasible. It
//! guarantees neither cost optimality nor the deadline bound: demand that
//! no eligible route can serve is left unrouted and shows up in the
//! deadline-miss statistic instead of failing the allocation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use itertools::Itertools;
use log::warn;
use ordered_float::OrderedFloat;

use crate::allocator::Allocator;
use crate::model::{AppId, IcId, Problem, RegionId};
use crate::routes::RouteIndex;
use crate::solution::{SlotAllocation, SolveStatus, SolvingStats, Solution};
use crate::Result;

/// Rank-and-saturate heuristic.
///
/// Per time slot and per application, candidate routes are consumed in
/// ascending order of response time (ties broken by price, then class id).
/// Each route first soaks up spare capacity of VMs already allocated to
/// its class, then provisions additional whole VMs until the source
/// region's workload is fully routed or no candidate remains.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyAllocator;

impl GreedyAllocator {
    /// Creates the allocator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Allocator for GreedyAllocator {
    fn allocate(&self, problem: &Problem) -> Result<Solution> {
        let started = Instant::now();
        let routes = RouteIndex::new(problem);
        let mut slots = Vec::with_capacity(problem.slots());
        for slot in 0..problem.slots() {
            slots.push(allocate_slot(problem, &routes, slot));
        }
        let stats = SolvingStats {
            status: SolveStatus::Feasible,
            creation_time: Duration::default(),
            solving_time: started.elapsed(),
        };
        Ok(Solution::new(problem.clone(), slots, stats))
    }
}

fn allocate_slot(problem: &Problem, routes: &RouteIndex, slot: usize) -> SlotAllocation {
    let system = problem.system();
    let slot_secs = problem.slot_length().as_secs_f64();
    let mut alloc = SlotAllocation::default();
    // Capacity already promised to routed requests, per (app, class).
    let mut used: HashMap<(AppId, IcId), f64> = HashMap::new();

    for app_index in 0..system.apps().len() {
        let app = AppId::from(app_index);
        let sources: Vec<RegionId> = problem
            .workloads()
            .keys()
            .filter(|&&(a, _)| a == app)
            .map(|&(_, region)| region)
            .sorted()
            .collect();

        let mut remaining: HashMap<RegionId, f64> = sources
            .iter()
            .map(|&region| (region, problem.workload(app, region, slot)))
            .collect();

        // The ranked candidate stream: every (source, class) route of this
        // app, fastest first.
        let ranked = sources
            .iter()
            .flat_map(|&region| {
                routes
                    .get(app, region)
                    .iter()
                    .map(move |&route| (region, route))
            })
            .sorted_by_key(|(region, route)| {
                (
                    route.resp_time,
                    OrderedFloat(route.price),
                    route.ic,
                    *region,
                )
            });

        for (region, route) in ranked {
            let left = remaining[&region];
            if left <= 0.0 {
                continue;
            }
            let capacity = route.throughput * slot_secs;
            let key = (app, route.ic);
            let vms = f64::from(alloc.vms.get(&key).copied().unwrap_or(0));
            let spare = (vms * capacity - used.get(&key).copied().unwrap_or(0.0)).max(0.0);
            let extra = ((left - spare).max(0.0) / capacity).ceil() as u32;
            if extra > 0 {
                *alloc.vms.entry(key).or_insert(0) += extra;
            }
            *alloc.requests.entry((app, region, route.ic)).or_insert(0.0) += left;
            *used.entry(key).or_insert(0.0) += left;
            remaining.insert(region, 0.0);
        }

        for (&region, &left) in remaining.iter().sorted_by_key(|(&region, _)| region) {
            if left > 0.0 {
                warn!(
                    "no eligible route for app {} from region {}; {} requests left unserved in slot {}",
                    system.app(app).name,
                    system.region(region).name,
                    left,
                    slot
                );
            }
        }
    }
    alloc
}
