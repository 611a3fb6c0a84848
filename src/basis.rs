//! Tensor-product Lagrange bases on the unit reference element $[0, 1]^D$.
//!
//! Local nodes are numbered lexicographically with the first reference coordinate varying
//! fastest. Along each axis an order-$p$ basis has $p + 1$ equidistant nodes.

use crate::error::DiscretizationError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A Lagrange basis of order 1 (linear) or 2 (quadratic) per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagrangeBasis {
    order: usize,
}

impl LagrangeBasis {
    pub fn new(order: usize) -> Result<Self, DiscretizationError> {
        match order {
            1 | 2 => Ok(Self { order }),
            _ => Err(DiscretizationError::config(
                "basisOrder",
                format!("only Lagrange bases of order 1 and 2 are supported, got {order}"),
            )),
        }
    }

    pub fn linear() -> Self {
        Self { order: 1 }
    }

    pub fn quadratic() -> Self {
        Self { order: 2 }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn nodes_per_axis(&self) -> usize {
        self.order + 1
    }

    pub fn nodes_per_element(&self, dim: usize) -> usize {
        self.nodes_per_axis().pow(dim as u32)
    }

    /// Lagrange bases carry a single dof per node (version).
    pub fn dofs_per_node(&self) -> usize {
        1
    }

    pub fn dofs_per_element(&self, dim: usize) -> usize {
        self.nodes_per_element(dim) * self.dofs_per_node()
    }

    /// Reference coordinate of the `i`-th node along one axis.
    pub fn node_coordinate_1d(&self, i: usize) -> f64 {
        i as f64 / self.order as f64
    }

    /// Splits a local node index into per-axis indices.
    pub fn axis_indices(&self, dim: usize, local_node: usize) -> [usize; 3] {
        let n = self.nodes_per_axis();
        let mut result = [0; 3];
        let mut remainder = local_node;
        for index in result.iter_mut().take(dim) {
            *index = remainder % n;
            remainder /= n;
        }
        result
    }

    /// Reference position of a local node.
    pub fn reference_node(&self, dim: usize, local_node: usize) -> [f64; 3] {
        let indices = self.axis_indices(dim, local_node);
        let mut xi = [0.0; 3];
        for k in 0..dim {
            xi[k] = self.node_coordinate_1d(indices[k]);
        }
        xi
    }

    pub fn phi_1d(&self, i: usize, xi: f64) -> f64 {
        match (self.order, i) {
            (1, 0) => 1.0 - xi,
            (1, 1) => xi,
            (2, 0) => 2.0 * (xi - 0.5) * (xi - 1.0),
            (2, 1) => 4.0 * xi * (1.0 - xi),
            (2, 2) => 2.0 * xi * (xi - 0.5),
            _ => unreachable!("invalid 1D basis function index {i} for order {}", self.order),
        }
    }

    pub fn dphi_1d(&self, i: usize, xi: f64) -> f64 {
        match (self.order, i) {
            (1, 0) => -1.0,
            (1, 1) => 1.0,
            (2, 0) => 4.0 * xi - 3.0,
            (2, 1) => 4.0 - 8.0 * xi,
            (2, 2) => 4.0 * xi - 1.0,
            _ => unreachable!("invalid 1D basis function index {i} for order {}", self.order),
        }
    }

    /// Value of the local basis function `local_node` at the reference point `xi`.
    ///
    /// Only the first `dim` coordinates of `xi` are read.
    pub fn evaluate(&self, dim: usize, local_node: usize, xi: &[f64]) -> f64 {
        let indices = self.axis_indices(dim, local_node);
        (0..dim)
            .map(|k| self.phi_1d(indices[k], xi[k]))
            .product()
    }

    /// Reference gradient of a local basis function, zero-padded to three components.
    pub fn gradient(&self, dim: usize, local_node: usize, xi: &[f64]) -> Vector3<f64> {
        let indices = self.axis_indices(dim, local_node);
        let mut gradient = Vector3::zeros();
        for k in 0..dim {
            gradient[k] = (0..dim)
                .map(|l| {
                    if l == k {
                        self.dphi_1d(indices[l], xi[l])
                    } else {
                        self.phi_1d(indices[l], xi[l])
                    }
                })
                .product();
        }
        gradient
    }
}

impl Default for LagrangeBasis {
    fn default() -> Self {
        Self::linear()
    }
}
