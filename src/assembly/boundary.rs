use crate::assembly::system::DistributedLinearSystem;
use crate::error::DiscretizationError;
use log::debug;
use std::collections::BTreeMap;

/// Eliminates Dirichlet constraints `global dof -> prescribed value` from an assembled system.
///
/// For every constrained dof `c` with value `v`:
///
/// - row `c` becomes the identity row and `rhs[c] = v`,
/// - in every other row `i`, `rhs[i] -= A[i][c] * v` and then `A[i][c] = 0`.
///
/// Only owned rows are touched, so no communication is needed. Applying the same constraints
/// again leaves the system unchanged, since the constrained columns are already zero.
pub fn apply_dirichlet_boundary_conditions(
    system: &mut dyn DistributedLinearSystem,
    constraints: &BTreeMap<usize, f64>,
) -> Result<(), DiscretizationError> {
    if !system.is_created() {
        return Err(DiscretizationError::InvalidState(
            "boundary conditions can only be applied to a created system".to_string(),
        ));
    }
    let n = system.n_global_rows();
    if let Some((&dof, _)) = constraints.range(n..).next() {
        return Err(DiscretizationError::config(
            "dirichletBoundaryConditions",
            format!("constrained dof {dof} does not exist, the system has {n} dofs"),
        ));
    }

    // Every constrained owned row needs a stored diagonal before anything is modified
    let mut missing_diagonal = None;
    system.visit_rows(&mut |row, cols, _, _| {
        if missing_diagonal.is_none() && constraints.contains_key(&row) && cols.binary_search(&row).is_err() {
            missing_diagonal = Some(row);
        }
    });
    if let Some(row) = missing_diagonal {
        return Err(DiscretizationError::InvalidState(format!(
            "row {row} has no diagonal entry in the sparsity pattern"
        )));
    }

    let mut n_constrained_rows = 0;
    system.visit_rows_mut(&mut |row, cols, values, rhs| {
        if let Some(&prescribed) = constraints.get(&row) {
            for (&col, value) in cols.iter().zip(values.iter_mut()) {
                *value = if col == row { 1.0 } else { 0.0 };
            }
            *rhs = prescribed;
            n_constrained_rows += 1;
        } else {
            for (col, value) in cols.iter().zip(values.iter_mut()) {
                if let Some(&prescribed) = constraints.get(col) {
                    *rhs -= *value * prescribed;
                    *value = 0.0;
                }
            }
        }
    });

    debug!(
        "Applied {} Dirichlet constraints, {n_constrained_rows} of them in owned rows",
        constraints.len()
    );
    Ok(())
}
