//! Fixed-layout records for messages between ranks.
//!
//! Every multi-byte field is stored little-endian: constructors apply `to_le` and accessors
//! `from_le`, so the byte layout does not depend on the host.

use crate::error::DiscretizationError;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// A global index (row, column, dof or count).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct WireIndex {
    index_le: u64,
}

impl WireIndex {
    pub fn new(index: usize) -> Self {
        Self {
            index_le: (index as u64).to_le(),
        }
    }

    pub fn get(&self) -> usize {
        u64::from_le(self.index_le) as usize
    }
}

/// A double stored by its bit pattern.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct WireValue {
    bits_le: u64,
}

impl WireValue {
    pub fn new(value: f64) -> Self {
        Self {
            bits_le: value.to_bits().to_le(),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

/// A matrix contribution `A[row, col] += value`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct WireMatrixEntry {
    pub row: WireIndex,
    pub col: WireIndex,
    pub value: WireValue,
}

impl WireMatrixEntry {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self {
            row: WireIndex::new(row),
            col: WireIndex::new(col),
            value: WireValue::new(value),
        }
    }
}

/// A right-hand side contribution `b[row] += value`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct WireRhsEntry {
    pub row: WireIndex,
    pub value: WireValue,
}

impl WireRhsEntry {
    pub fn new(row: usize, value: f64) -> Self {
        Self {
            row: WireIndex::new(row),
            value: WireValue::new(value),
        }
    }
}

/// Leads an assembly message: the number of matrix records and of rhs records that follow.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct WireAssemblyHeader {
    pub n_matrix: WireIndex,
    pub n_rhs: WireIndex,
}

pub fn cast_slice<T: Pod>(records: &[T]) -> &[u8] {
    bytemuck::cast_slice(records)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), DiscretizationError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DiscretizationError::Communication(format!(
            "expected {expected} bytes, got {actual}"
        )))
    }
}

/// Copies the records of type `T` out of a received message.
///
/// Received buffers are byte-aligned only, so the records are copied into storage aligned
/// for `T` rather than reinterpreted in place.
pub fn read_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, DiscretizationError> {
    let size = size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(DiscretizationError::Communication(format!(
            "message of {} bytes is not a sequence of {size}-byte records",
            bytes.len()
        )));
    }
    let mut records = vec![T::zeroed(); bytes.len() / size];
    bytemuck::cast_slice_mut(&mut records).copy_from_slice(bytes);
    Ok(records)
}

pub fn encode_indices(indices: &[usize]) -> Vec<u8> {
    let records: Vec<WireIndex> = indices.iter().map(|&index| WireIndex::new(index)).collect();
    cast_slice(&records).to_vec()
}

pub fn decode_indices(bytes: &[u8]) -> Result<Vec<usize>, DiscretizationError> {
    Ok(read_records::<WireIndex>(bytes)?
        .iter()
        .map(WireIndex::get)
        .collect())
}

pub fn encode_values(values: &[f64]) -> Vec<u8> {
    let records: Vec<WireValue> = values.iter().map(|&value| WireValue::new(value)).collect();
    cast_slice(&records).to_vec()
}

pub fn decode_values(bytes: &[u8]) -> Result<Vec<f64>, DiscretizationError> {
    Ok(read_records::<WireValue>(bytes)?
        .iter()
        .map(WireValue::get)
        .collect())
}

/// Encodes an assembly message: header, matrix records, rhs records.
pub fn encode_assembly(matrix: &[WireMatrixEntry], rhs: &[WireRhsEntry]) -> Vec<u8> {
    let header = WireAssemblyHeader {
        n_matrix: WireIndex::new(matrix.len()),
        n_rhs: WireIndex::new(rhs.len()),
    };
    let mut payload = Vec::with_capacity(
        size_of::<WireAssemblyHeader>()
            + matrix.len() * size_of::<WireMatrixEntry>()
            + rhs.len() * size_of::<WireRhsEntry>(),
    );
    payload.extend_from_slice(cast_slice(std::slice::from_ref(&header)));
    payload.extend_from_slice(cast_slice(matrix));
    payload.extend_from_slice(cast_slice(rhs));
    payload
}

/// Decodes a message written by [`encode_assembly`].
pub fn decode_assembly(payload: &[u8]) -> Result<(Vec<WireMatrixEntry>, Vec<WireRhsEntry>), DiscretizationError> {
    let header_size = size_of::<WireAssemblyHeader>();
    if payload.len() < header_size {
        return Err(DiscretizationError::Communication(format!(
            "assembly message of {} bytes is shorter than its header",
            payload.len()
        )));
    }
    let (header_bytes, rest) = payload.split_at(header_size);
    let header: WireAssemblyHeader = bytemuck::pod_read_unaligned(header_bytes);
    let matrix_size = header
        .n_matrix
        .get()
        .checked_mul(size_of::<WireMatrixEntry>());
    let rhs_size = header.n_rhs.get().checked_mul(size_of::<WireRhsEntry>());
    let (matrix_size, rhs_size) = match (matrix_size, rhs_size) {
        (Some(m), Some(r)) if m.checked_add(r).is_some() => (m, r),
        _ => {
            return Err(DiscretizationError::Communication(
                "assembly message header announces too many records".to_string(),
            ))
        }
    };
    expect_exact_len(rest.len(), matrix_size + rhs_size)?;
    let (matrix_bytes, rhs_bytes) = rest.split_at(matrix_size);
    Ok((read_records(matrix_bytes)?, read_records(rhs_bytes)?))
}
