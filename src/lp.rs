//! Decision variables, shared constraints, and objective strategies for
//! the MILP allocators.
//!
//! Every allocator invocation builds a fresh [`Model`] from the problem
//! and its route index: integer `x` variables count VMs per (slot, app,
//! instance class), continuous `y` variables carry the request volume per
//! (slot, app, source region, instance class) route. Only structurally
//! feasible routes get a `y` variable, and only classes reachable from at
//! least one source get `x` variables, so the model size is proportional
//! to the eligible routes rather than the dense cross product.

use std::collections::HashMap;

use itertools::Itertools;
use log::debug;
use lp_modeler::dsl::{
    lp_sum, BoundableLp, LpContinuous, LpInteger, LpObjective, LpOperations, LpProblem,
};

use crate::model::{AppId, IcId, Problem, RegionId};
use crate::routes::RouteIndex;
use crate::Phase;

/// Number of VMs of one instance class serving one app during one slot.
pub(crate) struct XVar {
    pub name: String,
    pub app: AppId,
    pub ic: IcId,
    pub slot: usize,
    /// Cost of keeping one VM up for the whole slot.
    pub price_per_slot: f64,
    /// Requests one VM serves during the whole slot.
    pub capacity_per_slot: f64,
    pub var: LpInteger,
}

/// Requests of one app routed from one region to one instance class
/// during one slot.
pub(crate) struct YVar {
    pub name: String,
    pub app: AppId,
    pub region: RegionId,
    pub ic: IcId,
    pub slot: usize,
    /// End-to-end response time of the route, in seconds.
    pub resp_time_secs: f64,
    pub var: LpContinuous,
}

/// A fully constructed MILP: the `lp_modeler` problem plus the variable
/// tables needed to interpret the solver's assignment.
pub(crate) struct Model {
    pub problem: LpProblem,
    pub x: Vec<XVar>,
    pub y: Vec<YVar>,
    pub total_requests: f64,
}

/// Bounds applied on top of the shared constraint set: the problem's own
/// global bounds, or the cap a lexicographic second pass inherits from
/// its first pass.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Caps {
    pub max_cost: Option<f64>,
    pub max_avg_resp_time_secs: Option<f64>,
}

/// An objective function to minimize over the shared variable space.
pub(crate) trait Objective {
    /// Which optimization pass this objective represents, for error
    /// reporting.
    fn phase(&self) -> Phase;

    /// Sets the objective expression on the model's problem.
    fn apply(&self, model: &mut Model);
}

/// Minimizes the total VM cost across all slots.
pub(crate) struct TotalCost;

impl Objective for TotalCost {
    fn phase(&self) -> Phase {
        Phase::Cost
    }

    fn apply(&self, model: &mut Model) {
        let terms: Vec<_> = model
            .x
            .iter()
            .map(|x| x.price_per_slot as f32 * &x.var)
            .collect();
        model.problem += lp_sum(&terms);
    }
}

/// Minimizes the request-weighted average response time of all served
/// requests, one global average across apps, regions, and slots.
pub(crate) struct AvgResponseTime;

impl Objective for AvgResponseTime {
    fn phase(&self) -> Phase {
        Phase::ResponseTime
    }

    fn apply(&self, model: &mut Model) {
        let total = model.total_requests.max(1.0);
        let terms: Vec<_> = model
            .y
            .iter()
            .map(|y| (y.resp_time_secs / total) as f32 * &y.var)
            .collect();
        model.problem += lp_sum(&terms);
    }
}

/// Builds the model for `problem`: variables, the objective, demand
/// conservation and capacity constraints, and the optional global bounds.
pub(crate) fn build(
    problem: &Problem,
    routes: &RouteIndex,
    objective: &dyn Objective,
    caps: Caps,
) -> Model {
    let system = problem.system();
    let slots = problem.slots();
    let slot_secs = problem.slot_length().as_secs_f64();

    let mut x = Vec::new();
    for &(app, ic) in system
        .performances()
        .keys()
        .filter(|&&(app, ic)| routes.serves(app, ic))
        .sorted()
    {
        let class = system.ic(ic);
        let perf = &system.performances()[&(app, ic)];
        for slot in 0..slots {
            let name = format!("x_{}_{}_{}", app, ic, slot);
            x.push(XVar {
                var: LpInteger::new(&name).lower_bound(0.0),
                name,
                app,
                ic,
                slot,
                price_per_slot: class.price * slot_secs,
                capacity_per_slot: perf.throughput * slot_secs,
            });
        }
    }

    let mut y = Vec::new();
    let mut y_by_source: HashMap<(AppId, RegionId, usize), Vec<usize>> = HashMap::new();
    let mut y_by_class: HashMap<(AppId, IcId, usize), Vec<usize>> = HashMap::new();
    for &(app, region) in problem.workloads().keys().sorted() {
        for route in routes.get(app, region) {
            for slot in 0..slots {
                let name = format!("y_{}_{}_{}_{}", app, region, route.ic, slot);
                y_by_source
                    .entry((app, region, slot))
                    .or_insert_with(Vec::new)
                    .push(y.len());
                y_by_class
                    .entry((app, route.ic, slot))
                    .or_insert_with(Vec::new)
                    .push(y.len());
                y.push(YVar {
                    var: LpContinuous::new(&name).lower_bound(0.0),
                    name,
                    app,
                    region,
                    ic: route.ic,
                    slot,
                    resp_time_secs: route.resp_time.as_secs_f64(),
                });
            }
        }
    }
    debug!(
        "built {} vm variables and {} routing variables over {} slots",
        x.len(),
        y.len(),
        slots
    );

    let mut model = Model {
        problem: LpProblem::new("edgeplan", LpObjective::Minimize),
        x,
        y,
        total_requests: problem.total_requests(),
    };
    objective.apply(&mut model);

    // Demand conservation: everything a region sends must be served.
    for &(app, region) in problem.workloads().keys().sorted() {
        for slot in 0..slots {
            let indices = match y_by_source.get(&(app, region, slot)) {
                Some(indices) => indices,
                None => continue,
            };
            let vars: Vec<_> = indices.iter().map(|&i| &model.y[i].var).collect();
            let demand = problem.workload(app, region, slot) as f32;
            model.problem += lp_sum(&vars).equal(demand);
        }
    }

    // Capacity: a class cannot serve more than its provisioned VMs allow.
    for x in &model.x {
        let indices = match y_by_class.get(&(x.app, x.ic, x.slot)) {
            Some(indices) => indices,
            None => continue,
        };
        let vars: Vec<_> = indices.iter().map(|&i| &model.y[i].var).collect();
        model.problem += lp_sum(&vars).le(x.capacity_per_slot as f32 * &x.var);
    }

    if let Some(max_cost) = caps.max_cost {
        let terms: Vec<_> = model
            .x
            .iter()
            .map(|x| x.price_per_slot as f32 * &x.var)
            .collect();
        model.problem += lp_sum(&terms).le(max_cost as f32);
    }

    if let Some(bound_secs) = caps.max_avg_resp_time_secs {
        let terms: Vec<_> = model
            .y
            .iter()
            .map(|y| y.resp_time_secs as f32 * &y.var)
            .collect();
        model.problem += lp_sum(&terms).le((bound_secs * model.total_requests) as f32);
    }

    model
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{App, InstanceClass, Performance, System, Workload};
    use std::time::Duration;

    fn problem() -> Problem {
        let apps = vec![App {
            name: "a0".into(),
            max_resp_time: Duration::from_millis(100),
        }];
        let regions = vec![
            crate::model::Region { name: "eu".into() },
            crate::model::Region { name: "us".into() },
        ];
        let ics = vec![
            InstanceClass {
                name: "eu.m".into(),
                region: RegionId::from(0),
                price: 0.2,
            },
            InstanceClass {
                name: "us.m".into(),
                region: RegionId::from(1),
                price: 0.1,
            },
        ];
        let mut perfs = HashMap::new();
        for ic in 0..2 {
            perfs.insert(
                (AppId::from(0), IcId::from(ic)),
                Performance {
                    throughput: 100.0,
                    slo: Duration::from_millis(20),
                },
            );
        }
        // One-directional link: eu reaches us, not the other way round.
        let mut latencies = HashMap::new();
        latencies.insert(
            (RegionId::from(0), RegionId::from(1)),
            Duration::from_millis(40),
        );
        let mut workloads = HashMap::new();
        workloads.insert(
            (AppId::from(0), RegionId::from(0)),
            Workload::new(vec![50.0, 80.0]),
        );
        workloads.insert(
            (AppId::from(0), RegionId::from(1)),
            Workload::new(vec![10.0, 0.0]),
        );
        Problem::new(System::new(apps, regions, ics, perfs, latencies).unwrap(), workloads, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_variable_sparsity() {
        let problem = problem();
        let routes = RouteIndex::new(&problem);
        let model = build(&problem, &routes, &TotalCost, Caps::default());
        // Both classes serve some region, two slots each.
        assert_eq!(model.x.len(), 4);
        // eu routes to both classes, us only to its own: 3 routes x 2 slots.
        assert_eq!(model.y.len(), 6);
        // The us -> eu.m route is unreachable and must not exist.
        assert!(!model
            .y
            .iter()
            .any(|y| y.region == RegionId::from(1) && y.ic == IcId::from(0)));
    }

    #[test]
    fn test_per_slot_coefficients() {
        let problem = problem();
        let routes = RouteIndex::new(&problem);
        let model = build(&problem, &routes, &TotalCost, Caps::default());
        let x = model
            .x
            .iter()
            .find(|x| x.ic == IcId::from(1) && x.slot == 0)
            .unwrap();
        // 0.1 per second over a one-second slot, 100 req/s throughput.
        assert!((x.price_per_slot - 0.1).abs() < 1e-9);
        assert!((x.capacity_per_slot - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_route_response_times() {
        let problem = problem();
        let routes = RouteIndex::new(&problem);
        let model = build(&problem, &routes, &AvgResponseTime, Caps::default());
        let cross = model
            .y
            .iter()
            .find(|y| y.region == RegionId::from(0) && y.ic == IcId::from(1))
            .unwrap();
        assert!((cross.resp_time_secs - 0.06).abs() < 1e-9);
        let local = model
            .y
            .iter()
            .find(|y| y.region == RegionId::from(0) && y.ic == IcId::from(0))
            .unwrap();
        assert!((local.resp_time_secs - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_unserved_class_gets_no_x() {
        // Remove the eu -> us link: us.m still serves the us region, but if
        // the us region had no workload the class would disappear.
        let apps = vec![App {
            name: "a0".into(),
            max_resp_time: Duration::from_millis(100),
        }];
        let regions = vec![
            crate::model::Region { name: "eu".into() },
            crate::model::Region { name: "us".into() },
        ];
        let ics = vec![
            InstanceClass {
                name: "eu.m".into(),
                region: RegionId::from(0),
                price: 0.2,
            },
            InstanceClass {
                name: "us.m".into(),
                region: RegionId::from(1),
                price: 0.1,
            },
        ];
        let mut perfs = HashMap::new();
        for ic in 0..2 {
            perfs.insert(
                (AppId::from(0), IcId::from(ic)),
                Performance {
                    throughput: 100.0,
                    slo: Duration::from_millis(20),
                },
            );
        }
        let mut workloads = HashMap::new();
        workloads.insert(
            (AppId::from(0), RegionId::from(0)),
            Workload::new(vec![50.0]),
        );
        let problem = Problem::new(
            System::new(apps, regions, ics, perfs, HashMap::new()).unwrap(),
            workloads,
            Duration::from_secs(1),
        )
        .unwrap();
        let routes = RouteIndex::new(&problem);
        let model = build(&problem, &routes, &TotalCost, Caps::default());
        assert_eq!(model.x.len(), 1);
        assert!(model.x.iter().all(|x| x.ic == IcId::from(0)));
    }
}
