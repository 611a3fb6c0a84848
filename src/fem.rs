//! The finite element discretization of one equation on one function space.

use crate::assembly::boundary::apply_dirichlet_boundary_conditions;
use crate::assembly::global::{add_element_matrices, add_element_vectors, assemble_pattern, system_layout};
use crate::assembly::local::{ElementMassAssembler, ElementSourceAssembler, ElementStiffnessAssembler};
use crate::assembly::system::{CsrLinearSystem, DistributedLinearSystem};
use crate::config::{read_dirichlet_boundary_conditions, read_per_axis_reals, ConfigReader, Settings};
use crate::error::DiscretizationError;
use crate::mesh::{MeshManager, MeshTopology};
use crate::parallel::ExecutionContext;
use crate::partition::MeshPartition;
use crate::quadrature::Quadrature;
use crate::solver::{DirectSolver, LinearSolver, SolverManager};
use crate::space::FunctionSpace;
use eyre::WrapErr;
use log::{debug, info, warn};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The weak forms that can be assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Equation {
    /// $\Delta u = 0$.
    Laplace,
    /// $\Delta u = f$ with the source from `rightHandSide`.
    Poisson,
    /// $\nabla \cdot (D \nabla u) = f$, with the tensor from `diffusionTensor`. The mass
    /// matrix is assembled as well, for use by time stepping.
    Diffusion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Uninitialized,
    Initialized,
}

/// Everything derived from the settings and the partition during initialization.
#[derive(Debug, Clone)]
struct Setup {
    partition: MeshPartition,
    quadrature: Quadrature,
    // Global numbering
    dirichlet: BTreeMap<usize, f64>,
    // Mesh dof numbering, `None` for a zero source
    source: Option<Vec<f64>>,
    diffusion_tensor: Option<Matrix3<f64>>,
    solver: DirectSolver,
}

/// Assembles and solves one equation.
///
/// The discretization moves between two states. [`initialize`](Self::initialize) reads the
/// settings, partitions the function space and allocates the system; afterwards the
/// `set_*` operations can be repeated any number of times without reallocation.
/// [`reset`](Self::reset) releases everything and returns to the uninitialized state.
pub struct FiniteElementMethod<S = CsrLinearSystem> {
    context: ExecutionContext,
    settings: Settings,
    space: Arc<FunctionSpace>,
    equation: Equation,
    solver_manager: SolverManager,
    state: AssemblyState,
    setup: Option<Setup>,
    system: S,
    mass_matrix: S,
    solution: Option<Vec<f64>>,
}

impl FiniteElementMethod<CsrLinearSystem> {
    pub fn new(context: ExecutionContext, settings: Settings, space: Arc<FunctionSpace>, equation: Equation) -> Self {
        Self::with_system(context, settings, space, equation)
    }

    /// Creates the discretization for a settings section, with the function space resolved by
    /// the mesh manager.
    pub fn from_settings(
        context: ExecutionContext,
        settings: Settings,
        meshes: &mut MeshManager,
        equation: Equation,
    ) -> eyre::Result<Self> {
        let space = meshes.function_space(&settings)?;
        Ok(Self::new(context, settings, space, equation))
    }
}

impl<S: DistributedLinearSystem + Default> FiniteElementMethod<S> {
    /// Like [`FiniteElementMethod::new`], with a custom linear-system backend.
    pub fn with_system(context: ExecutionContext, settings: Settings, space: Arc<FunctionSpace>, equation: Equation) -> Self {
        Self {
            context,
            settings,
            space,
            equation,
            solver_manager: SolverManager::default(),
            state: AssemblyState::Uninitialized,
            setup: None,
            system: S::default(),
            mass_matrix: S::default(),
            solution: None,
        }
    }

    pub fn with_solver_manager(mut self, solver_manager: SolverManager) -> Self {
        self.solver_manager = solver_manager;
        self
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == AssemblyState::Initialized
    }

    pub fn equation(&self) -> Equation {
        self.equation
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn function_space(&self) -> &Arc<FunctionSpace> {
        &self.space
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    pub fn mass_matrix(&self) -> &S {
        &self.mass_matrix
    }

    pub fn partition(&self) -> Option<&MeshPartition> {
        self.setup.as_ref().map(|setup| &setup.partition)
    }

    /// Dirichlet constraints in mesh dof numbering.
    pub fn dirichlet_boundary_conditions(&self) -> Option<BTreeMap<usize, f64>> {
        self.setup.as_ref().map(|setup| {
            setup
                .dirichlet
                .iter()
                .map(|(&global, &value)| (setup.partition.global_to_natural(global), value))
                .collect()
        })
    }

    fn setup(&self) -> Result<&Setup, DiscretizationError> {
        initialized_setup(self.state, &self.setup)
    }

    /// Reads the settings, partitions the function space and allocates the system.
    ///
    /// Collective. Calling it on an initialized discretization does nothing. On failure the
    /// discretization stays uninitialized.
    pub fn initialize(&mut self) -> eyre::Result<()> {
        if self.is_initialized() {
            debug!("initialize() called on an initialized discretization, nothing to do");
            return Ok(());
        }
        let space = Arc::clone(&self.space);
        let n_dofs = space.n_dofs();

        let quadrature = read_quadrature(&self.settings, space.basis().order())?;
        let natural_dirichlet = read_dirichlet_boundary_conditions(&self.settings, "dirichletBoundaryConditions")?;
        if let Some((&dof, _)) = natural_dirichlet.range(n_dofs..).next() {
            return Err(DiscretizationError::config(
                self.settings.key_path("dirichletBoundaryConditions"),
                format!("dof {dof} does not exist, the function space has {n_dofs} dofs"),
            )
            .into());
        }
        let source = match self.equation {
            Equation::Laplace => {
                if self.settings.has_key("rightHandSide") {
                    warn!("rightHandSide is ignored for the Laplace equation");
                }
                None
            }
            Equation::Poisson | Equation::Diffusion => read_source(&self.settings, n_dofs)?,
        };
        let diffusion_tensor = match self.equation {
            Equation::Diffusion => read_diffusion_tensor(&self.settings, space.dim())?,
            _ => None,
        };
        let solver = self.solver_manager.solver(&self.settings)?;

        let partition = MeshPartition::new(&self.context, &space)?;
        let dirichlet = natural_dirichlet
            .iter()
            .map(|(&natural, &value)| (partition.natural_to_global(natural), value))
            .collect();
        let pattern = assemble_pattern(&space, &partition)?;
        let layout = system_layout(&partition);

        let mut system = S::default();
        let mut mass_matrix = S::default();
        system.create(layout.clone(), pattern.clone())?;
        mass_matrix.create(layout, pattern)?;

        self.system = system;
        self.mass_matrix = mass_matrix;
        self.setup = Some(Setup {
            partition,
            quadrature,
            dirichlet,
            source,
            diffusion_tensor,
            solver,
        });
        self.solution = None;
        self.state = AssemblyState::Initialized;
        info!(
            "Initialized {:?} discretization on rank {}/{}: {n_dofs} dofs, {} owned",
            self.equation,
            self.context.rank(),
            self.context.n_ranks(),
            self.system.ownership_range().len()
        );
        Ok(())
    }

    /// Assembles the stiffness matrix into the system, replacing its previous values.
    pub fn set_stiffness_matrix(&mut self) -> eyre::Result<()> {
        let setup = initialized_setup(self.state, &self.setup)?;
        let assembler = ElementStiffnessAssembler::new(&self.space, setup.quadrature)?
            .with_diffusion_tensor(setup.diffusion_tensor);
        self.system.zero_matrix()?;
        add_element_matrices(&mut self.system, &assembler, &setup.partition)
            .wrap_err("failed to assemble stiffness matrix")?;
        self.system.assemble(&self.context)?;
        debug!("Assembled stiffness matrix");
        Ok(())
    }

    /// Assembles the mass matrix, stored separately from the system.
    pub fn set_mass_matrix(&mut self) -> eyre::Result<()> {
        let setup = initialized_setup(self.state, &self.setup)?;
        let assembler = ElementMassAssembler::new(&self.space, setup.quadrature)?;
        self.mass_matrix.zero_matrix()?;
        add_element_matrices(&mut self.mass_matrix, &assembler, &setup.partition)
            .wrap_err("failed to assemble mass matrix")?;
        self.mass_matrix.assemble(&self.context)?;
        debug!("Assembled mass matrix");
        Ok(())
    }

    /// Assembles the right-hand side, replacing its previous values.
    pub fn set_right_hand_side(&mut self) -> eyre::Result<()> {
        let setup = initialized_setup(self.state, &self.setup)?;
        self.system.zero_rhs()?;
        if let Some(source) = &setup.source {
            let assembler = ElementSourceAssembler::new(&self.space, setup.quadrature, source)?;
            add_element_vectors(&mut self.system, &assembler, &setup.partition)
                .wrap_err("failed to assemble right-hand side")?;
        }
        self.system.assemble(&self.context)?;
        debug!("Assembled right-hand side");
        Ok(())
    }

    pub fn apply_boundary_conditions(&mut self) -> eyre::Result<()> {
        let setup = initialized_setup(self.state, &self.setup)?;
        apply_dirichlet_boundary_conditions(&mut self.system, &setup.dirichlet)?;
        Ok(())
    }

    /// Solves with the solver configured through `solverName`/`relativeTolerance`.
    pub fn solve(&mut self) -> eyre::Result<()> {
        let solver = self.setup()?.solver;
        self.solve_with(&solver)
    }

    pub fn solve_with(&mut self, solver: &dyn LinearSolver) -> eyre::Result<()> {
        self.setup()?;
        let solution = solver.solve(&self.context, &self.system)?;
        info!("Solved system on rank {}", self.context.rank());
        self.solution = Some(solution);
        Ok(())
    }

    /// Initializes if necessary, then assembles, applies the boundary conditions and solves.
    pub fn run(&mut self) -> eyre::Result<()> {
        self.initialize()?;
        self.set_stiffness_matrix()?;
        if self.equation == Equation::Diffusion {
            self.set_mass_matrix()?;
        }
        self.set_right_hand_side()?;
        self.apply_boundary_conditions()?;
        self.solve()
    }

    /// Releases the system and the partition.
    pub fn reset(&mut self) {
        self.system.destroy();
        self.mass_matrix.destroy();
        self.setup = None;
        self.solution = None;
        if self.is_initialized() {
            info!("Reset discretization on rank {}", self.context.rank());
        }
        self.state = AssemblyState::Uninitialized;
    }

    /// Solution values of the owned dofs, in global numbering.
    pub fn solution(&self) -> Option<&[f64]> {
        self.solution.as_deref()
    }

    /// Solution values of the owned and ghost dofs, in the partition's local numbering.
    /// Collective.
    pub fn local_solution(&self) -> eyre::Result<Vec<f64>> {
        let setup = self.setup()?;
        let owned = self
            .solution
            .as_ref()
            .ok_or_else(|| DiscretizationError::InvalidState("the system has not been solved".to_string()))?;
        let mut values = owned.clone();
        values.resize(setup.partition.n_local(), 0.0);
        setup.partition.update_ghosts(&self.context, &mut values)?;
        Ok(values)
    }

    /// The complete solution in mesh dof numbering, on every rank. Collective.
    pub fn gather_solution(&self) -> eyre::Result<Vec<f64>> {
        let setup = self.setup()?;
        let owned = self
            .solution
            .as_ref()
            .ok_or_else(|| DiscretizationError::InvalidState("the system has not been solved".to_string()))?;
        let global: Vec<f64> = self.context.all_gather_f64s(owned)?.concat();
        let partition = &setup.partition;
        if global.len() != partition.n_dofs_global() {
            return Err(DiscretizationError::PartitionInconsistency(format!(
                "gathered {} solution values for {} dofs",
                global.len(),
                partition.n_dofs_global()
            ))
            .into());
        }
        Ok((0..global.len())
            .map(|natural| global[partition.natural_to_global(natural)])
            .collect())
    }
}

fn initialized_setup(state: AssemblyState, setup: &Option<Setup>) -> Result<&Setup, DiscretizationError> {
    match (state, setup) {
        (AssemblyState::Initialized, Some(setup)) => Ok(setup),
        _ => Err(DiscretizationError::InvalidState(
            "the discretization has not been initialized".to_string(),
        )),
    }
}

/// `quadrature` is either `"none"` or the number of Gauss points per axis.
fn read_quadrature(config: &impl ConfigReader, order: usize) -> eyre::Result<Quadrature> {
    let default = Quadrature::Gauss(order + 1);
    match config.value("quadrature") {
        None | Some(Value::Null) => Ok(default),
        Some(Value::String(name)) if name.eq_ignore_ascii_case("none") => Ok(Quadrature::None),
        Some(value) => match value.as_u64() {
            Some(n) if n > 0 => Ok(Quadrature::Gauss(n as usize)),
            _ => Err(DiscretizationError::config(
                config.key_path("quadrature"),
                "expected \"none\" or a positive number of Gauss points",
            )
            .into()),
        },
    }
}

/// `rightHandSide` is a constant or one value per dof.
fn read_source(config: &impl ConfigReader, n_dofs: usize) -> eyre::Result<Option<Vec<f64>>> {
    match read_per_axis_reals(config, "rightHandSide")? {
        None => Ok(None),
        Some(values) if config.value("rightHandSide").map_or(false, Value::is_number) => {
            Ok(Some(vec![values[0]; n_dofs]))
        }
        Some(values) if values.len() == n_dofs => Ok(Some(values)),
        Some(values) => Err(DiscretizationError::config(
            config.key_path("rightHandSide"),
            format!("expected {n_dofs} values, got {}", values.len()),
        )
        .into()),
    }
}

/// `diffusionTensor` is a scalar or a `dim x dim` / `3 x 3` matrix in row-major order.
fn read_diffusion_tensor(config: &impl ConfigReader, dim: usize) -> eyre::Result<Option<Matrix3<f64>>> {
    let values = match read_per_axis_reals(config, "diffusionTensor")? {
        None => return Ok(None),
        Some(values) => values,
    };
    let mut tensor = Matrix3::zeros();
    match values.len() {
        1 => tensor = Matrix3::identity() * values[0],
        n if n == dim * dim || n == 9 => {
            let size = if n == 9 { 3 } else { dim };
            for i in 0..size {
                for j in 0..size {
                    tensor[(i, j)] = values[i * size + j];
                }
            }
        }
        n => {
            return Err(DiscretizationError::config(
                config.key_path("diffusionTensor"),
                format!("expected 1, {} or 9 values, got {n}", dim * dim),
            )
            .into())
        }
    }
    if (tensor - tensor.transpose()).amax() > 1e-12 * tensor.amax().max(1.0) {
        warn!("diffusionTensor is not symmetric");
    }
    Ok(Some(tensor))
}
