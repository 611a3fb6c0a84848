//! Quadrature on the unit reference element.
//!
//! Rules are taken from `distfem-quadrature` and mapped from $[-1, 1]^D$ to $[0, 1]^D$.

use crate::basis::LagrangeBasis;
use distfem_quadrature::tensor::{hexahedron_gauss, quadrilateral_gauss};
use distfem_quadrature::univariate::gauss;
use distfem_quadrature::{map_to_unit_interval, Rule};
use serde::{Deserialize, Serialize};

/// The quadrature scheme used for element integrals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quadrature {
    /// Closed-form element matrices for affine structured elements.
    None,
    /// Tensor-product Gauss-Legendre with `N` points per axis.
    Gauss(usize),
}

impl Default for Quadrature {
    fn default() -> Self {
        Quadrature::Gauss(2)
    }
}

/// A quadrature rule on $[0, 1]^D$ with points zero-padded to three coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule {
    dim: usize,
    weights: Vec<f64>,
    points: Vec<[f64; 3]>,
}

fn pad<const D: usize>(rule: Rule<D>) -> (Vec<f64>, Vec<[f64; 3]>) {
    let (weights, points) = map_to_unit_interval(rule);
    let points = points
        .into_iter()
        .map(|p| {
            let mut padded = [0.0; 3];
            padded[..D].copy_from_slice(&p);
            padded
        })
        .collect();
    (weights, points)
}

impl QuadratureRule {
    /// # Panics
    ///
    /// Panics if `dim` is not 1, 2 or 3, or if `points_per_axis` is zero.
    pub fn gauss(dim: usize, points_per_axis: usize) -> Self {
        assert!(points_per_axis > 0, "quadrature needs at least one point per axis");
        let (weights, points) = match dim {
            1 => pad(gauss(points_per_axis)),
            2 => pad(quadrilateral_gauss(points_per_axis)),
            3 => pad(hexahedron_gauss(points_per_axis)),
            _ => panic!("unsupported reference dimension {dim}"),
        };
        Self { dim, weights, points }
    }

    /// A Gauss rule integrating mass and stiffness integrands of affine elements exactly.
    pub fn for_basis(dim: usize, basis: &LagrangeBasis) -> Self {
        Self::gauss(dim, basis.order() + 1)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn integrate(&self, f: impl Fn(&[f64; 3]) -> f64) -> f64 {
        self.weights
            .iter()
            .zip(&self.points)
            .map(|(w, xi)| w * f(xi))
            .sum()
    }
}
