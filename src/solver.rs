//! Hand-off of the assembled system to a linear solver.

use crate::assembly::system::{gather_dense, DistributedLinearSystem};
use crate::config::{ConfigReader, Settings};
use crate::error::DiscretizationError;
use crate::parallel::ExecutionContext;
use eyre::eyre;
use log::{debug, info, warn};
use std::collections::BTreeMap;

pub const DEFAULT_RELATIVE_TOLERANCE: f64 = 1e-10;

pub trait LinearSolver {
    /// Solves the system and returns the solution values of the rows owned by this rank.
    /// Collective.
    fn solve(&self, context: &ExecutionContext, system: &dyn DistributedLinearSystem) -> eyre::Result<Vec<f64>>;
}

/// Gathers the whole system on every rank and solves it with a dense LU factorization.
///
/// Meant for small systems and for checking other solvers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectSolver {
    relative_tolerance: f64,
}

impl Default for DirectSolver {
    fn default() -> Self {
        Self {
            relative_tolerance: DEFAULT_RELATIVE_TOLERANCE,
        }
    }
}

impl DirectSolver {
    pub fn new(relative_tolerance: f64) -> Self {
        Self { relative_tolerance }
    }

    pub fn from_settings(config: &impl ConfigReader) -> eyre::Result<Self> {
        let relative_tolerance = config.get_or("relativeTolerance", DEFAULT_RELATIVE_TOLERANCE)?;
        if !(relative_tolerance > 0.0) {
            return Err(DiscretizationError::config(config.key_path("relativeTolerance"), "must be positive").into());
        }
        Ok(Self::new(relative_tolerance))
    }

    pub fn relative_tolerance(&self) -> f64 {
        self.relative_tolerance
    }
}

impl LinearSolver for DirectSolver {
    fn solve(&self, context: &ExecutionContext, system: &dyn DistributedLinearSystem) -> eyre::Result<Vec<f64>> {
        let (matrix, rhs) = gather_dense(context, system)?;
        let n = rhs.len();
        let solution = matrix
            .clone()
            .lu()
            .solve(&rhs)
            .ok_or_else(|| eyre!("system matrix of size {n}x{n} is singular"))?;

        // Residual norms from the owned rows, reduced over all ranks
        let owned = system.ownership_range();
        let residual = &matrix * &solution - &rhs;
        let local_residual: f64 = owned.clone().map(|i| residual[i] * residual[i]).sum();
        let local_rhs: f64 = owned.clone().map(|i| rhs[i] * rhs[i]).sum();
        let residual_norm = context.all_reduce_sum(local_residual)?.sqrt();
        let rhs_norm = context.all_reduce_sum(local_rhs)?.sqrt();
        let relative_residual = if rhs_norm > 0.0 {
            residual_norm / rhs_norm
        } else {
            residual_norm
        };

        if relative_residual > self.relative_tolerance {
            warn!(
                "Direct solve of {n} dofs: relative residual {relative_residual:e} exceeds tolerance {:e}",
                self.relative_tolerance
            );
        } else {
            debug!("Direct solve of {n} dofs: relative residual {relative_residual:e}");
        }
        Ok(owned.map(|i| solution[i]).collect())
    }
}

/// Named solver configurations from the `Solvers` section of a settings document.
#[derive(Debug, Clone, Default)]
pub struct SolverManager {
    configurations: BTreeMap<String, Settings>,
}

impl SolverManager {
    pub fn new(settings: &Settings) -> eyre::Result<Self> {
        let solvers = settings.sub_or_empty("Solvers")?;
        let mut configurations = BTreeMap::new();
        for name in solvers.keys() {
            configurations.insert(name.clone(), solvers.sub(&name)?);
        }
        if !configurations.is_empty() {
            info!(
                "Configured solvers: {}",
                configurations.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        Ok(Self { configurations })
    }

    pub fn has_solver(&self, name: &str) -> bool {
        self.configurations.contains_key(name)
    }

    pub fn solver_settings(&self, name: &str) -> Option<&Settings> {
        self.configurations.get(name)
    }

    /// The solver for a section using it: the named solver from `solverName` if given, with
    /// `relativeTolerance` of the section taking precedence.
    pub fn solver(&self, config: &impl ConfigReader) -> eyre::Result<DirectSolver> {
        let mut solver = match config.get::<String>("solverName")? {
            Some(name) => {
                let settings = self.configurations.get(&name).ok_or_else(|| {
                    DiscretizationError::config(
                        config.key_path("solverName"),
                        format!("no solver named `{name}` is configured under `Solvers`"),
                    )
                })?;
                DirectSolver::from_settings(settings)?
            }
            None => DirectSolver::default(),
        };
        if config.has_key("relativeTolerance") {
            solver = DirectSolver::from_settings(config)?;
        }
        Ok(solver)
    }
}
