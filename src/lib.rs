//! Offline allocation of application workloads across regional VM fleets.
//!
//! Given a set of applications with response-time deadlines, a catalog of
//! VM instance classes spread over edge and cloud regions, and per-region
//! request workloads divided into fixed-length time slots, this crate
//! decides how many VMs of each class to run for each application and how
//! to route every region's requests onto them. The exact allocators encode
//! the decision as a mixed-integer program solved by CBC; the greedy
//! allocator produces a fast approximate answer without any solver.

#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
#![deny(unsafe_code)]

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

mod allocator;
mod greedy;
mod lp;
mod model;
mod routes;
mod solution;
mod solver;

pub use allocator::{
    Allocator, CostAllocator, CostResponseAllocator, ResponseCostAllocator, ResponseTimeAllocator,
};
pub use greedy::GreedyAllocator;
pub use model::{
    App, AppId, IcId, InstanceClass, Performance, Problem, Region, RegionId, System, Workload,
};
pub use routes::{Route, RouteIndex};
pub use solution::{SlotAllocation, SolveStatus, SolvingStats, Solution, VmRounding};
pub use solver::{Cbc, CbcTimeout, Solver};

/// Optimization pass reported together with solver infeasibility, so that
/// callers of the two-phase allocators can tell which bound failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Total cost minimization.
    Cost,
    /// Average response time minimization.
    ResponseTime,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Cost => write!(f, "cost"),
            Phase::ResponseTime => write!(f, "response time"),
        }
    }
}

/// Error type encompassing all allocation errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two distinct model elements share a name.
    #[error("repeated name {name:?} among {kind}")]
    RepeatedName {
        /// The offending name.
        name: String,
        /// Which collection contained the repetition.
        kind: &'static str,
    },
    /// An app id does not refer to any app in the system.
    #[error("app id {0} out of range")]
    UnknownApp(usize),
    /// A region id does not refer to any region in the system.
    #[error("region id {0} out of range")]
    UnknownRegion(usize),
    /// An instance class id does not refer to any class in the system.
    #[error("instance class id {0} out of range")]
    UnknownInstanceClass(usize),
    /// A problem was constructed without any workload.
    #[error("the problem has no workloads")]
    NoWorkloads,
    /// Workload series of different lengths were given.
    #[error("not all workloads span the same number of time slots")]
    UnevenWorkloads,
    /// The time slot length is zero.
    #[error("the time slot length must be positive")]
    ZeroSlotLength,
    /// Some workload source has no eligible instance class at all; detected
    /// before any solver is invoked.
    #[error("app {app} cannot be served from region {region} by any instance class")]
    NoFeasibleRoute {
        /// Name of the unservable app.
        app: String,
        /// Name of the source region.
        region: String,
    },
    /// The solver proved the constraint system infeasible.
    #[error("the {phase} optimization pass is infeasible")]
    Infeasible {
        /// Which optimization pass failed.
        phase: Phase,
    },
    /// The solver exceeded its configured time budget.
    #[error("the solver timed out after {0:?}")]
    Timeout(Duration),
    /// The model file could not be written for the solver.
    #[error("could not write the model to {file:?}: {source}")]
    WriteModel {
        /// Underlying I/O error.
        source: std::io::Error,
        /// Path of the model file.
        file: PathBuf,
    },
    /// Executing the solver or reading its output failed.
    #[error("solver failure: {0}")]
    Solver(String),
    /// The solver reported a materially negative variable value.
    #[error("the solver assigned {value} to {name}")]
    InvalidAssignment {
        /// Variable name.
        name: String,
        /// The offending value.
        value: f64,
    },
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
