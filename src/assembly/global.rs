//! Scatter of element contributions into the distributed system.

use crate::assembly::buffers::ElementBuffer;
use crate::assembly::local::{ElementConnectivityAssembler, ElementMatrixAssembler, ElementVectorAssembler};
use crate::assembly::system::{DistributedLinearSystem, SystemLayout};
use crate::error::DiscretizationError;
use crate::partition::MeshPartition;
use crate::space::FunctionSpace;
use eyre::WrapErr;
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;

/// Row ownership of the system matching the partition's dof ownership.
pub fn system_layout(partition: &MeshPartition) -> SystemLayout {
    SystemLayout {
        rank: partition.rank(),
        row_ranges: partition.owned_ranges().to_vec(),
    }
}

/// Sparsity pattern of the rows owned by this rank, with global column indices.
///
/// Row `i` couples to every dof of every element containing dof `i`, including elements
/// assembled by other ranks.
pub fn assemble_pattern(space: &FunctionSpace, partition: &MeshPartition) -> Result<SparsityPattern, DiscretizationError> {
    let owned = partition.owned_range();
    let n_global = partition.n_dofs_global();
    let mut offsets = Vec::with_capacity(owned.len() + 1);
    let mut column_indices = Vec::new();
    let mut element_dofs = vec![0; space.dofs_per_element()];
    let mut row_columns = Vec::new();

    offsets.push(0);
    for global_row in owned.clone() {
        let natural_row = partition.global_to_natural(global_row);
        row_columns.clear();
        for &element in space.dof_elements(natural_row) {
            ElementConnectivityAssembler::populate_element_dofs(space, &mut element_dofs, element);
            row_columns.extend(element_dofs.iter().map(|&dof| partition.natural_to_global(dof)));
        }
        // A dof outside of every element still needs its diagonal entry
        row_columns.push(global_row);
        row_columns.sort_unstable();
        row_columns.dedup();
        column_indices.extend_from_slice(&row_columns);
        offsets.push(column_indices.len());
    }

    debug!(
        "Sparsity pattern for rows {owned:?}: {} entries",
        column_indices.len()
    );
    SparsityPattern::try_from_offsets_and_indices(owned.len(), n_global, offsets, column_indices)
        .map_err(|err| DiscretizationError::InvalidState(format!("invalid sparsity pattern: {err}")))
}

/// Adds the element matrices of all elements owned by this rank into the system.
///
/// Contributions to rows of other ranks stay pending until
/// [`DistributedLinearSystem::assemble`].
pub fn add_element_matrices(
    system: &mut dyn DistributedLinearSystem,
    element_assembler: &dyn ElementMatrixAssembler,
    partition: &MeshPartition,
) -> eyre::Result<()> {
    let mut buffer = ElementBuffer::default();
    let mut element_matrix = DMatrix::zeros(0, 0);
    for element in partition.owned_elements() {
        let n = element_assembler.element_dof_count(element);
        buffer.resize(n);
        element_assembler.populate_element_dofs(&mut buffer.dofs, element);
        for (global, &natural) in buffer.global_dofs.iter_mut().zip(&buffer.dofs) {
            *global = partition.natural_to_global(natural);
        }
        element_matrix.resize_mut(n, n, 0.0);
        element_assembler
            .assemble_element_matrix_into(element, &mut element_matrix)
            .wrap_err_with(|| format!("failed to assemble matrix of element {element}"))?;
        trace!("Element {element}: dofs {:?}", buffer.dofs);

        for (i, &row) in buffer.global_dofs.iter().enumerate() {
            for (j, &col) in buffer.global_dofs.iter().enumerate() {
                system.add_matrix_entry(row, col, element_matrix[(i, j)])?;
            }
        }
    }
    Ok(())
}

/// Adds the element vectors of all elements owned by this rank into the right-hand side.
pub fn add_element_vectors(
    system: &mut dyn DistributedLinearSystem,
    element_assembler: &dyn ElementVectorAssembler,
    partition: &MeshPartition,
) -> eyre::Result<()> {
    let mut buffer = ElementBuffer::default();
    let mut element_vector = DVector::zeros(0);
    for element in partition.owned_elements() {
        let n = element_assembler.element_dof_count(element);
        buffer.resize(n);
        element_assembler.populate_element_dofs(&mut buffer.dofs, element);
        element_vector.resize_vertically_mut(n, 0.0);
        element_assembler
            .assemble_element_vector_into(element, &mut element_vector)
            .wrap_err_with(|| format!("failed to assemble vector of element {element}"))?;

        for (i, &natural) in buffer.dofs.iter().enumerate() {
            system.add_rhs_entry(partition.natural_to_global(natural), element_vector[i])?;
        }
    }
    Ok(())
}
