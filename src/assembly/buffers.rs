use crate::basis::LagrangeBasis;
use crate::geometry::Jacobian;
use crate::quadrature::QuadratureRule;
use nalgebra::{Point3, Vector3};

/// Values and reference gradients of all local basis functions at every point of a
/// quadrature rule.
///
/// The table only depends on the basis and the rule, so it is computed once and shared by
/// all elements.
#[derive(Debug, Clone, PartialEq)]
pub struct BasisTable {
    n_basis: usize,
    rule: QuadratureRule,
    // Indexed by point * n_basis + basis function
    values: Vec<f64>,
    gradients: Vec<Vector3<f64>>,
}

impl BasisTable {
    pub fn new(basis: &LagrangeBasis, rule: QuadratureRule) -> Self {
        let dim = rule.dim();
        let n_basis = basis.nodes_per_element(dim);
        let mut values = Vec::with_capacity(rule.len() * n_basis);
        let mut gradients = Vec::with_capacity(rule.len() * n_basis);
        for xi in rule.points() {
            for i in 0..n_basis {
                values.push(basis.evaluate(dim, i, xi));
                gradients.push(basis.gradient(dim, i, xi));
            }
        }
        Self {
            n_basis,
            rule,
            values,
            gradients,
        }
    }

    pub fn rule(&self) -> &QuadratureRule {
        &self.rule
    }

    pub fn n_basis(&self) -> usize {
        self.n_basis
    }

    pub fn n_points(&self) -> usize {
        self.rule.len()
    }

    pub fn values_at(&self, point: usize) -> &[f64] {
        &self.values[point * self.n_basis..(point + 1) * self.n_basis]
    }

    pub fn gradients_at(&self, point: usize) -> &[Vector3<f64>] {
        &self.gradients[point * self.n_basis..(point + 1) * self.n_basis]
    }

    /// Jacobian at a quadrature point of the element with the given dof positions.
    pub fn jacobian_at(&self, point: usize, positions: &[Point3<f64>]) -> Jacobian {
        let dim = self.rule.dim();
        let mut tangents = [Vector3::zeros(); 3];
        for (position, gradient) in positions.iter().zip(self.gradients_at(point)) {
            for k in 0..dim {
                tangents[k] += position.coords * gradient[k];
            }
        }
        Jacobian::from_tangents(&tangents[..dim])
    }
}

/// Per-element workspace reused across elements.
#[derive(Debug, Clone, Default)]
pub struct ElementBuffer {
    pub dofs: Vec<usize>,
    pub global_dofs: Vec<usize>,
}

impl ElementBuffer {
    pub fn resize(&mut self, n_dofs: usize) {
        self.dofs.resize(n_dofs, 0);
        self.global_dofs.resize(n_dofs, 0);
    }
}
