//! Exact MILP allocators.
//!
//! All of them share the same variable space and constraint set and differ
//! only in the objective and, for the two-phase ones, an extra bound that
//! carries the first phase's optimum into the second phase. Each solve
//! builds its own model, so concurrent allocations need no locking.

use std::time::Instant;

use log::{debug, info};
use lp_modeler::solvers::Status;

use crate::lp::{self, AvgResponseTime, Caps, Objective, TotalCost};
use crate::model::Problem;
use crate::routes::RouteIndex;
use crate::solution::{SolveStatus, SolvingStats, Solution, VmRounding};
use crate::solver::{Cbc, Solver};
use crate::{Error, Phase, Result};

/// Produces a [`Solution`] for a [`Problem`].
pub trait Allocator {
    /// Solves the allocation problem.
    ///
    /// # Errors
    ///
    /// Returns a structural-infeasibility error before touching any solver
    /// when some workload source has no eligible instance class, and
    /// propagates solver infeasibility and timeouts unchanged.
    fn allocate(&self, problem: &Problem) -> Result<Solution>;
}

macro_rules! single_objective_allocator {
    ($name:ident, $objective:expr, $doc:literal) => {
        #[doc = $doc]
        ///
        /// The problem's own `max_cost` and `max_avg_resp_time` bounds, when
        /// set, are enforced as constraints.
        pub struct $name<S = Cbc> {
            solver: S,
            rounding: VmRounding,
        }

        impl $name<Cbc> {
            /// Creates an allocator backed by a plain CBC run.
            #[must_use]
            pub fn new() -> Self {
                Self::with_solver(Cbc)
            }
        }

        impl Default for $name<Cbc> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<S: Solver> $name<S> {
            /// Creates an allocator backed by the given solver.
            pub fn with_solver(solver: S) -> Self {
                Self {
                    solver,
                    rounding: VmRounding::default(),
                }
            }

            /// Changes how fractional VM counts are rounded.
            #[must_use]
            pub fn rounding(mut self, rounding: VmRounding) -> Self {
                self.rounding = rounding;
                self
            }
        }

        impl<S: Solver> Allocator for $name<S> {
            fn allocate(&self, problem: &Problem) -> Result<Solution> {
                let routes = RouteIndex::new(problem);
                routes.ensure_feasible(problem)?;
                solve_once(
                    problem,
                    &routes,
                    &$objective,
                    problem_caps(problem),
                    &self.solver,
                    self.rounding,
                )
            }
        }
    };
}

single_objective_allocator!(
    CostAllocator,
    TotalCost,
    "Minimizes the total VM cost across all slots."
);

single_objective_allocator!(
    ResponseTimeAllocator,
    AvgResponseTime,
    "Minimizes the request-weighted average response time."
);

macro_rules! two_phase_allocator {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        pub struct $name<S = Cbc> {
            solver: S,
            rounding: VmRounding,
        }

        impl $name<Cbc> {
            /// Creates an allocator backed by plain CBC runs.
            #[must_use]
            pub fn new() -> Self {
                Self::with_solver(Cbc)
            }
        }

        impl Default for $name<Cbc> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<S: Solver> $name<S> {
            /// Creates an allocator backed by the given solver.
            pub fn with_solver(solver: S) -> Self {
                Self {
                    solver,
                    rounding: VmRounding::default(),
                }
            }

            /// Changes how fractional VM counts are rounded.
            #[must_use]
            pub fn rounding(mut self, rounding: VmRounding) -> Self {
                self.rounding = rounding;
                self
            }
        }
    };
}

two_phase_allocator!(
    CostResponseAllocator,
    "Lexicographic cost-then-response-time optimization.\n\n\
     Phase 1 finds the optimal total cost; phase 2 minimizes the average\n\
     response time among all allocations of exactly that cost, so cost\n\
     keeps strict priority. A phase-2 infeasibility (possible only when\n\
     `max_avg_resp_time` is unreachable at the optimal cost) is reported\n\
     with the response-time phase tag, distinct from phase-1 failures."
);

two_phase_allocator!(
    ResponseCostAllocator,
    "Lexicographic response-time-then-cost optimization.\n\n\
     Phase 1 finds the optimal average response time; phase 2 minimizes\n\
     cost among all allocations achieving exactly that response time."
);

impl<S: Solver> Allocator for CostResponseAllocator<S> {
    fn allocate(&self, problem: &Problem) -> Result<Solution> {
        let routes = RouteIndex::new(problem);
        routes.ensure_feasible(problem)?;
        let first = solve_once(
            problem,
            &routes,
            &TotalCost,
            Caps {
                max_cost: problem.max_cost(),
                max_avg_resp_time_secs: None,
            },
            &self.solver,
            self.rounding,
        )?;
        let optimal_cost = first.total_cost();
        info!(
            "cost optimum {:.4} found, re-solving for response time",
            optimal_cost
        );
        let second = solve_once(
            problem,
            &routes,
            &AvgResponseTime,
            Caps {
                max_cost: Some(optimal_cost),
                max_avg_resp_time_secs: problem
                    .max_avg_resp_time()
                    .map(|bound| bound.as_secs_f64()),
            },
            &self.solver,
            self.rounding,
        )?;
        Ok(second.absorb_phase(first.stats()))
    }
}

impl<S: Solver> Allocator for ResponseCostAllocator<S> {
    fn allocate(&self, problem: &Problem) -> Result<Solution> {
        let routes = RouteIndex::new(problem);
        routes.ensure_feasible(problem)?;
        let first = solve_once(
            problem,
            &routes,
            &AvgResponseTime,
            Caps {
                max_cost: problem.max_cost(),
                max_avg_resp_time_secs: None,
            },
            &self.solver,
            self.rounding,
        )?;
        let optimal_resp_time = first.avg_response_time();
        info!(
            "response time optimum {:?} found, re-solving for cost",
            optimal_resp_time
        );
        let second = solve_once(
            problem,
            &routes,
            &TotalCost,
            Caps {
                max_cost: problem.max_cost(),
                max_avg_resp_time_secs: Some(optimal_resp_time.as_secs_f64()),
            },
            &self.solver,
            self.rounding,
        )?;
        Ok(second.absorb_phase(first.stats()))
    }
}

fn problem_caps(problem: &Problem) -> Caps {
    Caps {
        max_cost: problem.max_cost(),
        max_avg_resp_time_secs: problem.max_avg_resp_time().map(|bound| bound.as_secs_f64()),
    }
}

fn solve_once<S: Solver>(
    problem: &Problem,
    routes: &RouteIndex,
    objective: &dyn Objective,
    caps: Caps,
    solver: &S,
    rounding: VmRounding,
) -> Result<Solution> {
    let phase = objective.phase();
    info!(
        "minimizing {} over {} time slots",
        phase,
        problem.slots()
    );
    let started = Instant::now();
    let model = lp::build(problem, routes, objective, caps);
    let creation_time = started.elapsed();

    let started = Instant::now();
    let (status, values) = solver.run(&model.problem)?;
    let solving_time = started.elapsed();
    debug!("solver finished in {:?}", solving_time);

    let status = match status {
        Status::Optimal => SolveStatus::Optimal,
        Status::SubOptimal => SolveStatus::Feasible,
        Status::Infeasible | Status::Unbounded => return Err(Error::Infeasible { phase }),
        Status::NotSolved => {
            return Err(Error::Solver("solver did not produce a solution".to_string()))
        }
    };
    let stats = SolvingStats {
        status,
        creation_time,
        solving_time,
    };
    crate::solution::assemble(problem, &model, &values, rounding, stats)
}
