//! Quadrature rules for tensor-product reference domains.
//!
//! All rules in this crate are defined on `[-1, 1]^D` and are returned as a pair of weights
//! and points. Mapping to other reference domains is left to the user, see e.g.
//! [`map_to_unit_interval`].

pub mod tensor;
pub mod univariate;

/// A D-dimensional point.
pub type Point<const D: usize> = [f64; D];

/// A D-dimensional rule.
pub type Rule<const D: usize> = (Vec<f64>, Vec<Point<D>>);

/// Integrates the given function with the given quadrature rule.
pub fn integrate<const D: usize>(rule: &Rule<D>, f: impl Fn(&Point<D>) -> f64) -> f64 {
    let (weights, points) = rule;
    weights
        .iter()
        .zip(points)
        .map(|(w, x)| w * f(x))
        .sum()
}

/// Maps a rule on `[-1, 1]^D` to the unit domain `[0, 1]^D`.
///
/// Weights are scaled by `2^{-D}` so that the rule still integrates exactly the same
/// polynomials.
pub fn map_to_unit_interval<const D: usize>(rule: Rule<D>) -> Rule<D> {
    let (weights, points) = rule;
    let scale = 0.5f64.powi(D as i32);
    let weights = weights.into_iter().map(|w| w * scale).collect();
    let points = points
        .into_iter()
        .map(|p| p.map(|x| 0.5 * (x + 1.0)))
        .collect();
    (weights, points)
}
