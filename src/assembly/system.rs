//! The distributed matrix/vector pair that assembly writes into.

use crate::error::DiscretizationError;
use crate::parallel::wire::{cast_slice, decode_assembly, encode_assembly, read_records, WireMatrixEntry, WireRhsEntry};
use crate::parallel::ExecutionContext;
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use rustc_hash::FxHashMap;
use std::ops::Range;

/// Row ownership of a distributed system: rank `r` stores the global rows `row_ranges[r]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemLayout {
    pub rank: usize,
    pub row_ranges: Vec<Range<usize>>,
}

impl SystemLayout {
    pub fn n_global_rows(&self) -> usize {
        self.row_ranges.last().map(|r| r.end).unwrap_or(0)
    }

    pub fn owned_rows(&self) -> Range<usize> {
        self.row_ranges[self.rank].clone()
    }

    pub fn owner_of(&self, row: usize) -> Option<usize> {
        let rank = self.row_ranges.partition_point(|r| r.end <= row);
        (rank < self.row_ranges.len()).then_some(rank)
    }
}

/// A distributed square matrix with a right-hand side vector.
///
/// Every rank stores the rows of its ownership range. Rows and columns are addressed by
/// global index. The matrix has a fixed sparsity pattern, given at creation; writing an entry
/// outside of it is an error.
///
/// `add_*` operations may target rows owned by other ranks: such contributions are kept
/// until the collective [`assemble`](Self::assemble), which delivers them to the owners.
/// `set_*` operations only accept owned rows.
pub trait DistributedLinearSystem {
    /// Allocates storage. `pattern` has one row per owned row and global column indices.
    fn create(&mut self, layout: SystemLayout, pattern: SparsityPattern) -> Result<(), DiscretizationError>;

    fn is_created(&self) -> bool;

    /// Releases the storage.
    fn destroy(&mut self);

    fn layout(&self) -> Option<&SystemLayout>;

    fn ownership_range(&self) -> Range<usize> {
        self.layout().map(|l| l.owned_rows()).unwrap_or(0..0)
    }

    fn n_global_rows(&self) -> usize {
        self.layout().map(|l| l.n_global_rows()).unwrap_or(0)
    }

    fn zero_matrix(&mut self) -> Result<(), DiscretizationError>;

    fn zero_rhs(&mut self) -> Result<(), DiscretizationError>;

    fn add_matrix_entry(&mut self, row: usize, col: usize, value: f64) -> Result<(), DiscretizationError>;

    fn set_matrix_entry(&mut self, row: usize, col: usize, value: f64) -> Result<(), DiscretizationError>;

    fn add_rhs_entry(&mut self, row: usize, value: f64) -> Result<(), DiscretizationError>;

    fn set_rhs_entry(&mut self, row: usize, value: f64) -> Result<(), DiscretizationError>;

    /// The stored value of an owned entry, `None` if it is outside the pattern or not owned.
    fn matrix_entry(&self, row: usize, col: usize) -> Option<f64>;

    fn rhs_entry(&self, row: usize) -> Option<f64>;

    /// Delivers pending contributions to off-rank rows. Collective.
    fn assemble(&mut self, context: &ExecutionContext) -> Result<(), DiscretizationError>;

    /// Calls `f(row, columns, values, rhs)` for every owned row, in ascending order.
    fn visit_rows(&self, f: &mut dyn FnMut(usize, &[usize], &[f64], f64));

    /// Like [`visit_rows`](Self::visit_rows), with mutable access to values and rhs.
    fn visit_rows_mut(&mut self, f: &mut dyn FnMut(usize, &[usize], &mut [f64], &mut f64));
}

/// Gathers the complete system as dense matrix and vector on every rank. Collective.
pub fn gather_dense(
    context: &ExecutionContext,
    system: &dyn DistributedLinearSystem,
) -> Result<(DMatrix<f64>, DVector<f64>), DiscretizationError> {
    let n = system.n_global_rows();
    let mut entries = Vec::new();
    let mut rhs_entries = Vec::new();
    system.visit_rows(&mut |row, cols, row_values, rhs| {
        entries.extend(
            cols.iter()
                .zip(row_values)
                .map(|(&col, &value)| WireMatrixEntry::new(row, col, value)),
        );
        rhs_entries.push(WireRhsEntry::new(row, rhs));
    });

    let gathered_entries = context.all_gather_bytes(cast_slice(&entries))?;
    let gathered_rhs = context.all_gather_bytes(cast_slice(&rhs_entries))?;

    let mut matrix = DMatrix::zeros(n, n);
    let mut vector = DVector::zeros(n);
    let malformed = || DiscretizationError::Communication("malformed system rows".to_string());
    for (entry_bytes, rhs_bytes) in gathered_entries.iter().zip(&gathered_rhs) {
        for entry in read_records::<WireMatrixEntry>(entry_bytes)? {
            let (row, col) = (entry.row.get(), entry.col.get());
            if row >= n || col >= n {
                return Err(malformed());
            }
            matrix[(row, col)] = entry.value.get();
        }
        for entry in read_records::<WireRhsEntry>(rhs_bytes)? {
            let row = entry.row.get();
            if row >= n {
                return Err(malformed());
            }
            vector[row] = entry.value.get();
        }
    }
    Ok((matrix, vector))
}

/// A [`DistributedLinearSystem`] storing its owned rows as an `nalgebra-sparse` CSR matrix.
#[derive(Debug, Clone, Default)]
pub struct CsrLinearSystem {
    layout: Option<SystemLayout>,
    // Owned rows x global columns
    matrix: Option<CsrMatrix<f64>>,
    rhs: Vec<f64>,
    // Pending contributions to rows of other ranks, by owner
    pending_matrix: FxHashMap<usize, Vec<WireMatrixEntry>>,
    pending_rhs: FxHashMap<usize, Vec<WireRhsEntry>>,
}

impl CsrLinearSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// The owned rows, `None` before creation.
    pub fn local_matrix(&self) -> Option<&CsrMatrix<f64>> {
        self.matrix.as_ref()
    }

    pub fn local_rhs(&self) -> &[f64] {
        &self.rhs
    }

    fn not_created() -> DiscretizationError {
        DiscretizationError::InvalidState("the linear system has not been created".to_string())
    }

    fn local_row(&self, row: usize) -> Result<Option<usize>, DiscretizationError> {
        let layout = self.layout.as_ref().ok_or_else(Self::not_created)?;
        let owned = layout.owned_rows();
        if owned.contains(&row) {
            Ok(Some(row - owned.start))
        } else if row < layout.n_global_rows() {
            Ok(None)
        } else {
            Err(DiscretizationError::InvalidState(format!(
                "row {row} is out of bounds for a system with {} rows",
                layout.n_global_rows()
            )))
        }
    }

    fn entry_mut(&mut self, local_row: usize, col: usize) -> Result<&mut f64, DiscretizationError> {
        let matrix = self.matrix.as_mut().ok_or_else(Self::not_created)?;
        let (offsets, cols, values) = matrix.csr_data_mut();
        let range = offsets[local_row]..offsets[local_row + 1];
        let (cols, values) = (&cols[range.clone()], &mut values[range]);
        match cols.binary_search(&col) {
            Ok(index) => Ok(&mut values[index]),
            Err(_) => Err(DiscretizationError::InvalidState(format!(
                "entry ({local_row}, {col}) of the local rows is outside the sparsity pattern"
            ))),
        }
    }

    fn owner_of(&self, row: usize) -> Result<usize, DiscretizationError> {
        self.layout
            .as_ref()
            .and_then(|l| l.owner_of(row))
            .ok_or_else(Self::not_created)
    }
}

impl DistributedLinearSystem for CsrLinearSystem {
    fn create(&mut self, layout: SystemLayout, pattern: SparsityPattern) -> Result<(), DiscretizationError> {
        let owned = layout.owned_rows();
        if pattern.major_dim() != owned.len() || pattern.minor_dim() != layout.n_global_rows() {
            return Err(DiscretizationError::InvalidState(format!(
                "pattern of size {}x{} does not match {} owned rows of a {}x{} system",
                pattern.major_dim(),
                pattern.minor_dim(),
                owned.len(),
                layout.n_global_rows(),
                layout.n_global_rows()
            )));
        }
        let values = vec![0.0; pattern.nnz()];
        let matrix = CsrMatrix::try_from_pattern_and_values(pattern, values)
            .map_err(|err| DiscretizationError::InvalidState(format!("invalid sparsity pattern: {err}")))?;
        debug!(
            "Created linear system: rows {:?} of {}, {} stored entries",
            owned,
            layout.n_global_rows(),
            matrix.nnz()
        );
        self.rhs = vec![0.0; owned.len()];
        self.matrix = Some(matrix);
        self.layout = Some(layout);
        self.pending_matrix.clear();
        self.pending_rhs.clear();
        Ok(())
    }

    fn is_created(&self) -> bool {
        self.matrix.is_some()
    }

    fn destroy(&mut self) {
        *self = Self::default();
    }

    fn layout(&self) -> Option<&SystemLayout> {
        self.layout.as_ref()
    }

    fn zero_matrix(&mut self) -> Result<(), DiscretizationError> {
        let matrix = self.matrix.as_mut().ok_or_else(Self::not_created)?;
        matrix.values_mut().fill(0.0);
        self.pending_matrix.clear();
        Ok(())
    }

    fn zero_rhs(&mut self) -> Result<(), DiscretizationError> {
        if !self.is_created() {
            return Err(Self::not_created());
        }
        self.rhs.fill(0.0);
        self.pending_rhs.clear();
        Ok(())
    }

    fn add_matrix_entry(&mut self, row: usize, col: usize, value: f64) -> Result<(), DiscretizationError> {
        match self.local_row(row)? {
            Some(local_row) => *self.entry_mut(local_row, col)? += value,
            None => {
                let owner = self.owner_of(row)?;
                self.pending_matrix
                    .entry(owner)
                    .or_default()
                    .push(WireMatrixEntry::new(row, col, value));
            }
        }
        Ok(())
    }

    fn set_matrix_entry(&mut self, row: usize, col: usize, value: f64) -> Result<(), DiscretizationError> {
        match self.local_row(row)? {
            Some(local_row) => *self.entry_mut(local_row, col)? = value,
            None => {
                return Err(DiscretizationError::InvalidState(format!(
                    "cannot set entry in row {row}, which is owned by another rank"
                )))
            }
        }
        Ok(())
    }

    fn add_rhs_entry(&mut self, row: usize, value: f64) -> Result<(), DiscretizationError> {
        match self.local_row(row)? {
            Some(local_row) => self.rhs[local_row] += value,
            None => {
                let owner = self.owner_of(row)?;
                self.pending_rhs
                    .entry(owner)
                    .or_default()
                    .push(WireRhsEntry::new(row, value));
            }
        }
        Ok(())
    }

    fn set_rhs_entry(&mut self, row: usize, value: f64) -> Result<(), DiscretizationError> {
        match self.local_row(row)? {
            Some(local_row) => self.rhs[local_row] = value,
            None => {
                return Err(DiscretizationError::InvalidState(format!(
                    "cannot set rhs entry {row}, which is owned by another rank"
                )))
            }
        }
        Ok(())
    }

    fn matrix_entry(&self, row: usize, col: usize) -> Option<f64> {
        let local_row = self.local_row(row).ok().flatten()?;
        let matrix = self.matrix.as_ref()?;
        let row = matrix.get_row(local_row)?;
        let index = row.col_indices().binary_search(&col).ok()?;
        Some(row.values()[index])
    }

    fn rhs_entry(&self, row: usize) -> Option<f64> {
        let local_row = self.local_row(row).ok().flatten()?;
        self.rhs.get(local_row).copied()
    }

    fn assemble(&mut self, context: &ExecutionContext) -> Result<(), DiscretizationError> {
        let layout = self.layout.clone().ok_or_else(Self::not_created)?;
        let n_ranks = layout.row_ranges.len();
        if n_ranks != context.n_ranks() {
            return Err(DiscretizationError::InvalidState(format!(
                "system was created for {n_ranks} ranks, but the context has {}",
                context.n_ranks()
            )));
        }
        if n_ranks == 1 {
            return Ok(());
        }

        // Every pair of ranks exchanges, possibly empty, contributions
        let mut pending_matrix = std::mem::take(&mut self.pending_matrix);
        let mut pending_rhs = std::mem::take(&mut self.pending_rhs);
        let outgoing = (0..n_ranks)
            .filter(|&peer| peer != layout.rank)
            .map(|peer| {
                let matrix_entries = pending_matrix.remove(&peer).unwrap_or_default();
                let rhs_entries = pending_rhs.remove(&peer).unwrap_or_default();
                (peer, encode_assembly(&matrix_entries, &rhs_entries))
            })
            .collect();

        let malformed = |peer: usize| {
            DiscretizationError::Communication(format!("malformed assembly contributions from rank {peer}"))
        };
        let mut n_received = 0;
        for (peer, payload) in context.exchange(outgoing)? {
            let (matrix_entries, rhs_entries) = decode_assembly(&payload)?;
            for entry in &matrix_entries {
                let local_row = self.local_row(entry.row.get())?.ok_or_else(|| malformed(peer))?;
                *self.entry_mut(local_row, entry.col.get())? += entry.value.get();
            }
            for entry in &rhs_entries {
                let local_row = self.local_row(entry.row.get())?.ok_or_else(|| malformed(peer))?;
                self.rhs[local_row] += entry.value.get();
            }
            n_received += matrix_entries.len() + rhs_entries.len();
        }
        debug!("Rank {}: received {n_received} off-rank contributions", layout.rank);
        Ok(())
    }

    fn visit_rows(&self, f: &mut dyn FnMut(usize, &[usize], &[f64], f64)) {
        if let (Some(matrix), Some(layout)) = (&self.matrix, &self.layout) {
            let start = layout.owned_rows().start;
            for (local_row, row) in matrix.row_iter().enumerate() {
                f(start + local_row, row.col_indices(), row.values(), self.rhs[local_row]);
            }
        }
    }

    fn visit_rows_mut(&mut self, f: &mut dyn FnMut(usize, &[usize], &mut [f64], &mut f64)) {
        if let (Some(matrix), Some(layout)) = (&mut self.matrix, &self.layout) {
            let start = layout.owned_rows().start;
            for (local_row, mut row) in matrix.row_iter_mut().enumerate() {
                let (cols, values) = row.cols_and_values_mut();
                f(start + local_row, cols, values, &mut self.rhs[local_row]);
            }
        }
    }
}
