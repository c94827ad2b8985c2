//! Domain model: regions, instance classes, applications, workloads, and
//! their aggregation into a [`System`] and a [`Problem`].
//!
//! All of these are plain value types constructed once by the caller and
//! immutable afterwards. Apps, regions, and instance classes are referred
//! to by index ids into the system's vectors; the constructors validate
//! that every id used by a map key is in range and that names are unique.

use std::collections::HashMap;
use std::time::Duration;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// App id.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
)]
pub struct AppId(usize);

/// Region id.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
)]
pub struct RegionId(usize);

/// Instance class id.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
)]
pub struct IcId(usize);

/// A geographic region, edge or cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Region name, unique within a system.
    pub name: String,
}

/// An application with an end-to-end response time deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// App name, unique within a system.
    pub name: String,
    /// Deadline that network latency plus service time must not exceed.
    pub max_resp_time: Duration,
}

/// A category of VM with a fixed location and price rate.
///
/// Instances of a class never move between regions; distinct classes may
/// share a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceClass {
    /// Class name, unique within a system.
    pub name: String,
    /// Region the VMs of this class run in.
    pub region: RegionId,
    /// Price rate in currency units per second of VM uptime.
    pub price: f64,
}

/// How one VM of an instance class serves one app.
///
/// A missing performance entry means the class cannot run the app at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    /// Requests served per second by a single VM.
    pub throughput: f64,
    /// Per-request service time at this class.
    pub slo: Duration,
}

/// Request counts of one app from one region, one value per time slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Requests arriving during each slot.
    pub values: Vec<f64>,
}

impl Workload {
    /// Constructs a workload from per-slot request counts.
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
        }
    }
}

/// The static infrastructure description: apps, regions, instance classes,
/// per-(app, class) performance, and directed inter-region latencies.
#[derive(Debug, Clone)]
pub struct System {
    apps: Vec<App>,
    regions: Vec<Region>,
    ics: Vec<InstanceClass>,
    perfs: HashMap<(AppId, IcId), Performance>,
    latencies: HashMap<(RegionId, RegionId), Duration>,
}

impl System {
    /// Validates and constructs a system.
    ///
    /// # Errors
    ///
    /// Returns an error if names repeat within apps, regions, or instance
    /// classes, or if any id used by `ics`, `perfs`, or `latencies` is out
    /// of range.
    pub fn new(
        apps: Vec<App>,
        regions: Vec<Region>,
        ics: Vec<InstanceClass>,
        perfs: HashMap<(AppId, IcId), Performance>,
        latencies: HashMap<(RegionId, RegionId), Duration>,
    ) -> Result<Self> {
        check_unique_names(apps.iter().map(|a| a.name.as_str()), "apps")?;
        check_unique_names(regions.iter().map(|r| r.name.as_str()), "regions")?;
        check_unique_names(ics.iter().map(|i| i.name.as_str()), "instance classes")?;
        let system = Self {
            apps,
            regions,
            ics,
            perfs,
            latencies,
        };
        for ic in &system.ics {
            system.check_region(ic.region)?;
        }
        for &(app, ic) in system.perfs.keys() {
            system.check_app(app)?;
            system.check_ic(ic)?;
        }
        for &(src, dst) in system.latencies.keys() {
            system.check_region(src)?;
            system.check_region(dst)?;
        }
        Ok(system)
    }

    /// All apps, indexable by [`AppId`].
    #[must_use]
    pub fn apps(&self) -> &[App] {
        &self.apps
    }

    /// All regions, indexable by [`RegionId`].
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// All instance classes, indexable by [`IcId`].
    #[must_use]
    pub fn ics(&self) -> &[InstanceClass] {
        &self.ics
    }

    /// Returns the app with the given valid id.
    #[must_use]
    pub fn app(&self, id: AppId) -> &App {
        &self.apps[id.0]
    }

    /// Returns the region with the given valid id.
    #[must_use]
    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.0]
    }

    /// Returns the instance class with the given valid id.
    #[must_use]
    pub fn ic(&self, id: IcId) -> &InstanceClass {
        &self.ics[id.0]
    }

    /// Performance of `ic` serving `app`, if the class can run the app.
    #[must_use]
    pub fn performance(&self, app: AppId, ic: IcId) -> Option<&Performance> {
        self.perfs.get(&(app, ic))
    }

    /// The full performance mapping.
    #[must_use]
    pub fn performances(&self) -> &HashMap<(AppId, IcId), Performance> {
        &self.perfs
    }

    /// Network latency from `src` to `dst`.
    ///
    /// Latencies are directed and need not be symmetric or transitive.
    /// `None` means the pair is unreachable, except that a region always
    /// reaches itself with zero latency when no explicit entry overrides
    /// that.
    #[must_use]
    pub fn latency(&self, src: RegionId, dst: RegionId) -> Option<Duration> {
        self.latencies.get(&(src, dst)).copied().or_else(|| {
            if src == dst {
                Some(Duration::default())
            } else {
                None
            }
        })
    }

    /// End-to-end response time for `app` requests from `src` served by
    /// `ic`: network latency plus the class's service time. `None` if the
    /// class cannot run the app or the region cannot reach it.
    #[must_use]
    pub fn response_time(&self, app: AppId, src: RegionId, ic: IcId) -> Option<Duration> {
        let perf = self.performance(app, ic)?;
        let latency = self.latency(src, self.ic(ic).region)?;
        Some(latency + perf.slo)
    }

    fn check_app(&self, id: AppId) -> Result<()> {
        if id.0 < self.apps.len() {
            Ok(())
        } else {
            Err(Error::UnknownApp(id.0))
        }
    }

    fn check_region(&self, id: RegionId) -> Result<()> {
        if id.0 < self.regions.len() {
            Ok(())
        } else {
            Err(Error::UnknownRegion(id.0))
        }
    }

    fn check_ic(&self, id: IcId) -> Result<()> {
        if id.0 < self.ics.len() {
            Ok(())
        } else {
            Err(Error::UnknownInstanceClass(id.0))
        }
    }
}

fn check_unique_names<'a>(names: impl Iterator<Item = &'a str>, kind: &'static str) -> Result<()> {
    let mut seen = Vec::new();
    for name in names {
        if seen.contains(&name) {
            return Err(Error::RepeatedName {
                name: name.to_string(),
                kind,
            });
        }
        seen.push(name);
    }
    Ok(())
}

/// A system together with its workloads and optional global bounds; the
/// input consumed by every allocator.
#[derive(Debug, Clone)]
pub struct Problem {
    system: System,
    workloads: HashMap<(AppId, RegionId), Workload>,
    slot_length: Duration,
    max_cost: Option<f64>,
    max_avg_resp_time: Option<Duration>,
}

impl Problem {
    /// Validates and constructs a problem.
    ///
    /// The number of time slots is the (common) length of the workload
    /// series; `slot_length` is the uniform duration of each slot.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no workloads, if their lengths differ,
    /// if the slot length is zero, or if a workload key references an
    /// unknown app or region.
    pub fn new(
        system: System,
        workloads: HashMap<(AppId, RegionId), Workload>,
        slot_length: Duration,
    ) -> Result<Self> {
        if workloads.is_empty() {
            return Err(Error::NoWorkloads);
        }
        if slot_length == Duration::default() {
            return Err(Error::ZeroSlotLength);
        }
        let mut lengths = workloads.values().map(|w| w.values.len());
        let first = lengths.next().unwrap_or(0);
        if lengths.any(|l| l != first) {
            return Err(Error::UnevenWorkloads);
        }
        for &(app, region) in workloads.keys() {
            system.check_app(app)?;
            system.check_region(region)?;
        }
        Ok(Self {
            system,
            workloads,
            slot_length,
            max_cost: None,
            max_avg_resp_time: None,
        })
    }

    /// Bounds the total cost across all slots.
    #[must_use]
    pub fn with_max_cost(mut self, bound: f64) -> Self {
        self.max_cost = Some(bound);
        self
    }

    /// Bounds the request-weighted average response time.
    #[must_use]
    pub fn with_max_avg_resp_time(mut self, bound: Duration) -> Self {
        self.max_avg_resp_time = Some(bound);
        self
    }

    /// The infrastructure description.
    #[must_use]
    pub fn system(&self) -> &System {
        &self.system
    }

    /// The workload mapping.
    #[must_use]
    pub fn workloads(&self) -> &HashMap<(AppId, RegionId), Workload> {
        &self.workloads
    }

    /// Number of time slots.
    #[must_use]
    pub fn slots(&self) -> usize {
        self.workloads
            .values()
            .next()
            .map_or(0, |w| w.values.len())
    }

    /// Uniform duration of one time slot.
    #[must_use]
    pub fn slot_length(&self) -> Duration {
        self.slot_length
    }

    /// Requests of `app` from `region` during `slot`; zero when no
    /// workload entry exists.
    #[must_use]
    pub fn workload(&self, app: AppId, region: RegionId, slot: usize) -> f64 {
        self.workloads
            .get(&(app, region))
            .and_then(|w| w.values.get(slot))
            .copied()
            .unwrap_or(0.0)
    }

    /// Total request volume over all apps, regions, and slots.
    #[must_use]
    pub fn total_requests(&self) -> f64 {
        self.workloads
            .values()
            .map(|w| w.values.iter().sum::<f64>())
            .sum()
    }

    /// Optional upper bound on total cost.
    #[must_use]
    pub fn max_cost(&self) -> Option<f64> {
        self.max_cost
    }

    /// Optional upper bound on average response time.
    #[must_use]
    pub fn max_avg_resp_time(&self) -> Option<Duration> {
        self.max_avg_resp_time
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn region(name: &str) -> Region {
        Region { name: name.into() }
    }

    fn two_region_system() -> System {
        let apps = vec![App {
            name: "a0".into(),
            max_resp_time: Duration::from_millis(200),
        }];
        let regions = vec![region("edge"), region("cloud")];
        let ics = vec![
            InstanceClass {
                name: "edge.small".into(),
                region: RegionId(0),
                price: 0.2,
            },
            InstanceClass {
                name: "cloud.large".into(),
                region: RegionId(1),
                price: 0.1,
            },
        ];
        let mut perfs = HashMap::new();
        perfs.insert(
            (AppId(0), IcId(0)),
            Performance {
                throughput: 10.0,
                slo: Duration::from_millis(20),
            },
        );
        perfs.insert(
            (AppId(0), IcId(1)),
            Performance {
                throughput: 100.0,
                slo: Duration::from_millis(50),
            },
        );
        let mut latencies = HashMap::new();
        latencies.insert((RegionId(0), RegionId(1)), Duration::from_millis(70));
        System::new(apps, regions, ics, perfs, latencies).unwrap()
    }

    #[test]
    fn test_repeated_app_name() {
        let apps = vec![
            App {
                name: "a0".into(),
                max_resp_time: Duration::from_millis(100),
            },
            App {
                name: "a0".into(),
                max_resp_time: Duration::from_millis(200),
            },
        ];
        let err = System::new(apps, vec![region("r")], vec![], HashMap::new(), HashMap::new())
            .unwrap_err();
        assert!(matches!(err, Error::RepeatedName { kind: "apps", .. }));
    }

    #[test]
    fn test_perf_references_unknown_ic() {
        let apps = vec![App {
            name: "a0".into(),
            max_resp_time: Duration::from_millis(100),
        }];
        let mut perfs = HashMap::new();
        perfs.insert(
            (AppId(0), IcId(7)),
            Performance {
                throughput: 1.0,
                slo: Duration::from_millis(1),
            },
        );
        let err =
            System::new(apps, vec![region("r")], vec![], perfs, HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownInstanceClass(7)));
    }

    #[test]
    fn test_same_region_latency_defaults_to_zero() {
        let system = two_region_system();
        assert_eq!(
            system.latency(RegionId(0), RegionId(0)),
            Some(Duration::default())
        );
        assert_eq!(system.latency(RegionId(1), RegionId(0)), None);
    }

    #[test]
    fn test_explicit_same_region_latency_wins() {
        let apps = vec![];
        let regions = vec![region("r")];
        let mut latencies = HashMap::new();
        latencies.insert((RegionId(0), RegionId(0)), Duration::from_millis(5));
        let system = System::new(apps, regions, vec![], HashMap::new(), latencies).unwrap();
        assert_eq!(
            system.latency(RegionId(0), RegionId(0)),
            Some(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_response_time_adds_latency_and_slo() {
        let system = two_region_system();
        // 70 ms latency to the cloud region plus its 50 ms service time.
        assert_eq!(
            system.response_time(AppId(0), RegionId(0), IcId(1)),
            Some(Duration::from_millis(120))
        );
        // Same-region service falls back to zero latency.
        assert_eq!(
            system.response_time(AppId(0), RegionId(0), IcId(0)),
            Some(Duration::from_millis(20))
        );
        // No route back from the cloud region to the edge class.
        assert_eq!(system.response_time(AppId(0), RegionId(1), IcId(0)), None);
    }

    #[test]
    fn test_uneven_workloads_rejected() {
        let system = two_region_system();
        let mut workloads = HashMap::new();
        workloads.insert((AppId(0), RegionId(0)), Workload::new(vec![1.0, 2.0]));
        workloads.insert((AppId(0), RegionId(1)), Workload::new(vec![1.0]));
        let err = Problem::new(system, workloads, Duration::from_secs(3600)).unwrap_err();
        assert!(matches!(err, Error::UnevenWorkloads));
    }

    #[test]
    fn test_empty_workloads_rejected() {
        let system = two_region_system();
        let err = Problem::new(system, HashMap::new(), Duration::from_secs(3600)).unwrap_err();
        assert!(matches!(err, Error::NoWorkloads));
    }

    #[test]
    fn test_total_requests() {
        let system = two_region_system();
        let mut workloads = HashMap::new();
        workloads.insert((AppId(0), RegionId(0)), Workload::new(vec![10.0, 20.0]));
        workloads.insert((AppId(0), RegionId(1)), Workload::new(vec![5.0, 0.0]));
        let problem = Problem::new(system, workloads, Duration::from_secs(3600)).unwrap();
        assert_eq!(problem.slots(), 2);
        assert!((problem.total_requests() - 35.0).abs() < f64::EPSILON);
        assert!((problem.workload(AppId(0), RegionId(1), 0) - 5.0).abs() < f64::EPSILON);
        assert!(problem.workload(AppId(0), RegionId(0), 5).abs() < f64::EPSILON);
    }
}
