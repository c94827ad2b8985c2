//! External MILP solver boundary.
//!
//! The engine hands a finished [`LpProblem`] to a [`Solver`] and gets back
//! either a variable assignment with a status, or a failure. Nothing else
//! about the solver is assumed, so a different backend can be plugged in
//! by implementing the trait.

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use lp_modeler::dsl::LpProblem;
use lp_modeler::format::lp_format::*;
use lp_modeler::solvers::{CbcSolver, SolverTrait, Status};
use uuid::Uuid;

use crate::{Error, Result};

/// Solves a prepared MILP and returns the raw variable assignment keyed by
/// variable name, together with the solver's status.
pub trait Solver {
    /// Runs the solver to completion (or failure).
    ///
    /// # Errors
    ///
    /// Returns an error when the solver cannot be executed, its output
    /// cannot be read, or it exceeds a configured time budget. Note that
    /// an infeasible problem is *not* an error at this boundary: it comes
    /// back as [`Status::Infeasible`] for the allocator to interpret.
    fn run(&self, problem: &LpProblem) -> Result<(Status, HashMap<String, f32>)>;
}

/// Plain CBC invocation through `lp_modeler`, with no time budget.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cbc;

impl Solver for Cbc {
    fn run(&self, problem: &LpProblem) -> Result<(Status, HashMap<String, f32>)> {
        CbcSolver::new().run(problem).map_err(Error::Solver)
    }
}

/// Runs the `cbc` executable with a wall-clock budget and kills it when
/// the budget is exceeded.
///
/// Timeouts are the solver's job: the engine itself imposes no deadline,
/// so this is the runner to pick when one is wanted.
pub struct CbcTimeout {
    command: String,
    timeout: Duration,
    solution_file: String,
}

impl CbcTimeout {
    /// Creates a runner that gives up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            command: "cbc".to_string(),
            timeout,
            solution_file: format!("{}.sol", Uuid::new_v4()),
        }
    }

    /// Uses a different executable name or path for the solver.
    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    fn read_solution(&self) -> std::result::Result<(Status, HashMap<String, f32>), String> {
        fn parse(file: &File) -> std::result::Result<(Status, HashMap<String, f32>), String> {
            let mut values: HashMap<String, f32> = HashMap::new();
            let mut file = BufReader::new(file);
            let mut buffer = String::new();
            let _ = file.read_line(&mut buffer);

            let status = match buffer.split_whitespace().next() {
                Some("Optimal") => Status::Optimal,
                // Infeasible status is either "Infeasible" or "Integer infeasible".
                Some("Infeasible") | Some("Integer") => Status::Infeasible,
                Some("Unbounded") => Status::Unbounded,
                // "Stopped" can be on time, on iterations, or on ctrl-c.
                Some("Stopped") => Status::SubOptimal,
                Some(_) => Status::NotSolved,
                None => return Err("empty solution file".to_string()),
            };
            for line in file.lines() {
                let line = line.map_err(|e| e.to_string())?;
                let mut fields: Vec<_> = line.split_whitespace().collect();
                if fields.first() == Some(&"**") {
                    fields.remove(0);
                }
                if fields.len() == 4 {
                    match fields[2].parse::<f32>() {
                        Ok(value) => {
                            values.insert(fields[1].to_string(), value);
                        }
                        Err(e) => return Err(e.to_string()),
                    }
                } else {
                    return Err("incorrect solution format".to_string());
                }
            }
            Ok((status, values))
        }

        match File::open(&self.solution_file) {
            Ok(file) => {
                let result = parse(&file)?;
                let _ = fs::remove_file(&self.solution_file);
                Ok(result)
            }
            Err(e) => Err(format!("cannot open solution file: {}", e)),
        }
    }
}

impl Solver for CbcTimeout {
    fn run(&self, problem: &LpProblem) -> Result<(Status, HashMap<String, f32>)> {
        let model_file = format!("{}.lp", problem.unique_name);

        problem.write_lp(&model_file).map_err(|source| Error::WriteModel {
            source,
            file: PathBuf::from(&model_file),
        })?;

        let mut child = Command::new(&self.command)
            .arg(&model_file)
            .arg("solve")
            .arg("solution")
            .arg(&self.solution_file)
            .spawn()
            .map_err(|e| Error::Solver(e.to_string()))?;

        let (tx, rx) = mpsc::channel::<()>();
        let timeout = self.timeout;
        thread::spawn(move || {
            thread::sleep(timeout);
            // If this fails, `rx` is closed and the solver already finished.
            let _ = tx.send(());
        });

        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|_| Error::Solver("error attempting to wait for cbc".to_string()))?
            {
                let _ = fs::remove_file(&model_file);
                return if status.success() {
                    self.read_solution().map_err(Error::Solver)
                } else {
                    Err(Error::Solver(status.to_string()))
                };
            }
            if rx.try_recv().is_ok() {
                let _ = child.kill();
                let _ = fs::remove_file(&model_file);
                return Err(Error::Timeout(timeout));
            }
            thread::sleep(Duration::from_millis(200));
        }
    }
}
