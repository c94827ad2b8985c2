//! Sparse index of eligible routes.
//!
//! A route is one way of serving an application from a source region: an
//! instance class that can run the app, is reachable from the region, has
//! positive throughput, and whose end-to-end response time fits within the
//! app's deadline. Combinations failing any of these are structurally
//! infeasible and are never materialized, neither here nor as solver
//! variables.

use std::collections::HashMap;
use std::time::Duration;

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::model::{AppId, IcId, Problem, RegionId};
use crate::{Error, Result};

/// One eligible way of serving an app from a source region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route {
    /// The serving instance class.
    pub ic: IcId,
    /// Network latency plus the class's service time.
    pub resp_time: Duration,
    /// Price rate of the class, used for ranking ties.
    pub price: f64,
    /// Requests one VM of the class serves per second.
    pub throughput: f64,
}

/// Eligible routes for every `(app, source region)` pair with a workload
/// entry, sorted by ascending response time, then price, then class id.
///
/// The ordering makes the per-pair route list directly consumable as the
/// greedy allocator's ranked candidate stream.
#[derive(Debug, Clone)]
pub struct RouteIndex {
    routes: HashMap<(AppId, RegionId), Vec<Route>>,
}

impl RouteIndex {
    /// Builds the index for all workload sources of `problem`.
    #[must_use]
    pub fn new(problem: &Problem) -> Self {
        let system = problem.system();
        let mut routes = HashMap::new();
        for &(app, region) in problem.workloads().keys() {
            let deadline = system.app(app).max_resp_time;
            let mut eligible: Vec<Route> = system
                .ics()
                .iter()
                .enumerate()
                .filter_map(|(index, class)| {
                    let ic = IcId::from(index);
                    let perf = system.performance(app, ic)?;
                    if perf.throughput <= 0.0 {
                        return None;
                    }
                    let resp_time = system.response_time(app, region, ic)?;
                    if resp_time > deadline {
                        return None;
                    }
                    Some(Route {
                        ic,
                        resp_time,
                        price: class.price,
                        throughput: perf.throughput,
                    })
                })
                .collect();
            eligible.sort_by_key(|route| (route.resp_time, OrderedFloat(route.price), route.ic));
            routes.insert((app, region), eligible);
        }
        Self { routes }
    }

    /// Checks that every workload source has at least one route.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoFeasibleRoute`] naming the first (in id order)
    /// unservable `(app, region)` pair. The MILP allocators call this
    /// before invoking any solver; the greedy allocator instead records
    /// unserved demand.
    pub fn ensure_feasible(&self, problem: &Problem) -> Result<()> {
        for (&(app, region), routes) in self.routes.iter().sorted_by_key(|(&key, _)| key) {
            if routes.is_empty() {
                return Err(Error::NoFeasibleRoute {
                    app: problem.system().app(app).name.clone(),
                    region: problem.system().region(region).name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Ranked routes for one workload source; empty when the pair has no
    /// workload entry or no eligible class.
    #[must_use]
    pub fn get(&self, app: AppId, region: RegionId) -> &[Route] {
        self.routes
            .get(&(app, region))
            .map_or(&[], Vec::as_slice)
    }

    /// Iterates over all `(app, region)` pairs and their routes.
    pub fn iter(&self) -> impl Iterator<Item = (&(AppId, RegionId), &Vec<Route>)> {
        self.routes.iter()
    }

    /// True if `ic` serves `app` from at least one source region.
    #[must_use]
    pub fn serves(&self, app: AppId, ic: IcId) -> bool {
        self.routes
            .iter()
            .any(|(&(a, _), routes)| a == app && routes.iter().any(|r| r.ic == ic))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{App, InstanceClass, Performance, System, Workload};

    fn system(slo_ms: u64) -> System {
        let apps = vec![App {
            name: "a0".into(),
            max_resp_time: Duration::from_millis(100),
        }];
        let regions = vec![
            crate::model::Region { name: "eu".into() },
            crate::model::Region { name: "us".into() },
            crate::model::Region { name: "ap".into() },
        ];
        let ics = vec![
            InstanceClass {
                name: "eu.m".into(),
                region: RegionId::from(0),
                price: 0.3,
            },
            InstanceClass {
                name: "us.m".into(),
                region: RegionId::from(1),
                price: 0.1,
            },
        ];
        let mut perfs = HashMap::new();
        perfs.insert(
            (AppId::from(0), IcId::from(0)),
            Performance {
                throughput: 10.0,
                slo: Duration::from_millis(slo_ms),
            },
        );
        perfs.insert(
            (AppId::from(0), IcId::from(1)),
            Performance {
                throughput: 10.0,
                slo: Duration::from_millis(slo_ms),
            },
        );
        let mut latencies = HashMap::new();
        latencies.insert(
            (RegionId::from(0), RegionId::from(1)),
            Duration::from_millis(40),
        );
        // The ap region reaches nothing, and nothing reaches it.
        System::new(apps, regions, ics, perfs, latencies).unwrap()
    }

    fn problem(slo_ms: u64, sources: &[usize]) -> Problem {
        let mut workloads = HashMap::new();
        for &source in sources {
            workloads.insert(
                (AppId::from(0), RegionId::from(source)),
                Workload::new(vec![10.0]),
            );
        }
        Problem::new(system(slo_ms), workloads, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_reachability_filter() {
        let problem = problem(20, &[0]);
        let index = RouteIndex::new(&problem);
        let routes = index.get(AppId::from(0), RegionId::from(0));
        // Same-region eu.m plus the 40 ms link to us.m.
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].ic, IcId::from(0));
        assert_eq!(routes[0].resp_time, Duration::from_millis(20));
        assert_eq!(routes[1].ic, IcId::from(1));
        assert_eq!(routes[1].resp_time, Duration::from_millis(60));
    }

    #[test]
    fn test_deadline_filter() {
        // 70 ms service time: eu.m alone stays within the 100 ms deadline,
        // the 40 ms hop to us.m does not.
        let problem = problem(70, &[0]);
        let index = RouteIndex::new(&problem);
        let routes = index.get(AppId::from(0), RegionId::from(0));
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].ic, IcId::from(0));
        assert!(index.ensure_feasible(&problem).is_ok());
    }

    #[test]
    fn test_unreachable_source_is_structurally_infeasible() {
        let problem = problem(20, &[0, 2]);
        let index = RouteIndex::new(&problem);
        assert!(index.get(AppId::from(0), RegionId::from(2)).is_empty());
        let err = index.ensure_feasible(&problem).unwrap_err();
        match err {
            Error::NoFeasibleRoute { app, region } => {
                assert_eq!(app, "a0");
                assert_eq!(region, "ap");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_price_breaks_response_time_ties() {
        // From us, both classes are out of reach except its own; extend the
        // system with a same-region latency pair to make a tie instead.
        let apps = vec![App {
            name: "a0".into(),
            max_resp_time: Duration::from_millis(100),
        }];
        let regions = vec![crate::model::Region { name: "eu".into() }];
        let ics = vec![
            InstanceClass {
                name: "eu.pricy".into(),
                region: RegionId::from(0),
                price: 0.5,
            },
            InstanceClass {
                name: "eu.cheap".into(),
                region: RegionId::from(0),
                price: 0.2,
            },
        ];
        let mut perfs = HashMap::new();
        for ic in 0..2 {
            perfs.insert(
                (AppId::from(0), IcId::from(ic)),
                Performance {
                    throughput: 10.0,
                    slo: Duration::from_millis(30),
                },
            );
        }
        let system = System::new(apps, regions, ics, perfs, HashMap::new()).unwrap();
        let mut workloads = HashMap::new();
        workloads.insert((AppId::from(0), RegionId::from(0)), Workload::new(vec![1.0]));
        let problem = Problem::new(system, workloads, Duration::from_secs(1)).unwrap();
        let index = RouteIndex::new(&problem);
        let routes = index.get(AppId::from(0), RegionId::from(0));
        assert_eq!(routes[0].ic, IcId::from(1));
        assert_eq!(routes[1].ic, IcId::from(0));
    }

    #[test]
    fn test_serves() {
        let problem = problem(20, &[0]);
        let index = RouteIndex::new(&problem);
        assert!(index.serves(AppId::from(0), IcId::from(0)));
        assert!(index.serves(AppId::from(0), IcId::from(1)));
        assert!(!index.serves(AppId::from(1), IcId::from(0)));
    }
}
