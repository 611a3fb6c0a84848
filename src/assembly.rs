//! Assembly of element contributions into a distributed linear system.
//!
//! The pieces are layered like the rest of the crate:
//!
//! - [`local`]: element matrices and vectors computed by quadrature (or by tensor-product
//!   factorization on regular structured meshes),
//! - [`global`]: the sparsity pattern of the owned rows and the scatter of element
//!   contributions through the partition's numbering,
//! - [`system`]: the [`DistributedLinearSystem`](system::DistributedLinearSystem) interface
//!   and its CSR-backed implementation,
//! - [`boundary`]: elimination of Dirichlet constraints.

pub mod boundary;
pub mod buffers;
pub mod global;
pub mod local;
pub mod system;
