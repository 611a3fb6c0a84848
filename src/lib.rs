//! Distributed finite element discretization of scalar elliptic equations on structured and
//! unstructured Lagrange meshes.
//!
//! A discretization is driven by [`fem::FiniteElementMethod`]: it partitions the
//! [`space::FunctionSpace`] over the ranks of an [`parallel::ExecutionContext`], assembles the
//! stiffness matrix and right-hand side into a [`assembly::system::DistributedLinearSystem`],
//! eliminates Dirichlet constraints and hands the system to a [`solver::LinearSolver`].

pub mod assembly;
pub mod basis;
pub mod config;
pub mod error;
pub mod fem;
pub mod geometry;
pub mod io;
pub mod mesh;
pub mod parallel;
pub mod partition;
pub mod quadrature;
pub mod solver;
pub mod space;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
