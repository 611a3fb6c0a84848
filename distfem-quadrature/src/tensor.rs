//! Rules for the reference square and cube formed as tensor products of 1D rules.
//!
//! Points are ordered lexicographically with the first coordinate varying fastest.

use crate::univariate::gauss;
use crate::Rule;

/// Tensor-product Gauss rule for `[-1, 1]^2`.
pub fn quadrilateral_gauss(num_points_per_dim: usize) -> Rule<2> {
    let n = num_points_per_dim;
    let (weights1d, points1d) = gauss(n);
    let mut weights = Vec::with_capacity(n * n);
    let mut points = Vec::with_capacity(n * n);

    for (wy, [y]) in weights1d.iter().zip(&points1d) {
        for (wx, [x]) in weights1d.iter().zip(&points1d) {
            weights.push(wx * wy);
            points.push([*x, *y]);
        }
    }

    (weights, points)
}

/// Tensor-product Gauss rule for `[-1, 1]^3`.
pub fn hexahedron_gauss(num_points_per_dim: usize) -> Rule<3> {
    let n = num_points_per_dim;
    let (weights1d, points1d) = gauss(n);
    let mut weights = Vec::with_capacity(n * n * n);
    let mut points = Vec::with_capacity(n * n * n);

    for (wz, [z]) in weights1d.iter().zip(&points1d) {
        for (wy, [y]) in weights1d.iter().zip(&points1d) {
            for (wx, [x]) in weights1d.iter().zip(&points1d) {
                weights.push(wx * wy * wz);
                points.push([*x, *y, *z]);
            }
        }
    }

    (weights, points)
}
