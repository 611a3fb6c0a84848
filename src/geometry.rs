//! Element Jacobians and the transformations needed to pull weak forms back to the
//! reference element.
//!
//! Elements of dimension $D \in \{1, 2, 3\}$ always live in three-dimensional physical space.
//! The Jacobian is stored as $D$ tangent vectors $t_k = \partial x / \partial \xi_k$.
//!
//! The free functions in this module are plain arithmetic: a singular input yields
//! NaN/Inf rather than an error. [`Jacobian::check_orientation`] is the guard that callers
//! use before trusting the result.

use crate::error::DiscretizationError;
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

/// Determinant of the 3x3 Jacobian whose columns are the given tangent vectors.
pub fn determinant(jacobian: &[Vector3<f64>; 3]) -> f64 {
    let [t1, t2, t3] = jacobian;
    t1.dot(&t2.cross(t3))
}

/// Computes $(J^T J)^{-1}$ together with $\det J$ for a 3x3 Jacobian.
///
/// The rows of $J^{-1}$ are $(t_2 \times t_3, t_3 \times t_1, t_1 \times t_2) / \det J$, hence
/// entry $(a, b)$ of the result is the dot product of two such cofactor rows over $(\det J)^2$.
pub fn transformation_matrix_and_determinant(jacobian: &[Vector3<f64>; 3]) -> (Matrix3<f64>, f64) {
    let [t1, t2, t3] = jacobian;
    let cofactors = [t2.cross(t3), t3.cross(t1), t1.cross(t2)];
    let det = t1.dot(&cofactors[0]);
    let prefactor = 1.0 / (det * det);

    let mut result = Matrix3::zeros();
    for a in 0..3 {
        for b in a..3 {
            let entry = prefactor * cofactors[a].dot(&cofactors[b]);
            result[(a, b)] = entry;
            result[(b, a)] = entry;
        }
    }
    (result, det)
}

/// Inverse of a symmetric 3x3 matrix, together with its determinant.
///
/// Only the lower triangle of `matrix` is read.
pub fn symmetric_inverse(matrix: &Matrix3<f64>) -> (Matrix3<f64>, f64) {
    let m11 = matrix[(0, 0)];
    let m21 = matrix[(1, 0)];
    let m31 = matrix[(2, 0)];
    let m22 = matrix[(1, 1)];
    let m32 = matrix[(2, 1)];
    let m33 = matrix[(2, 2)];

    let determinant = m11 * m22 * m33 - m11 * m32 * m32 - m21 * m21 * m33 + 2.0 * m21 * m31 * m32 - m22 * m31 * m31;
    let inv_det = 1.0 / determinant;

    let i11 = inv_det * (m22 * m33 - m32 * m32);
    let i21 = inv_det * (m31 * m32 - m21 * m33);
    let i31 = inv_det * (m21 * m32 - m22 * m31);
    let i22 = inv_det * (m11 * m33 - m31 * m31);
    let i32 = inv_det * (m21 * m31 - m11 * m32);
    let i33 = inv_det * (m11 * m22 - m21 * m21);

    #[rustfmt::skip]
    let inverse = Matrix3::new(
        i11, i21, i31,
        i21, i22, i32,
        i31, i32, i33,
    );
    (inverse, determinant)
}

/// The generalized volume element of a $D$-dimensional element in 3D space.
///
/// - $D = 1$: length of the tangent,
/// - $D = 2$: area spanned by the two tangents, $\| t_1 \times t_2 \|$,
/// - $D = 3$: $|\det J|$.
///
/// # Panics
///
/// Panics if the number of tangents is not 1, 2 or 3.
pub fn integration_factor(tangents: &[Vector3<f64>]) -> f64 {
    match tangents {
        [t1] => t1.norm(),
        [t1, t2] => t1.cross(t2).norm(),
        [t1, t2, t3] => determinant(&[*t1, *t2, *t3]).abs(),
        _ => panic!("Jacobian must have between 1 and 3 tangent vectors, got {}", tangents.len()),
    }
}

/// Evaluates the bilinear form $v_2^T M v_1$ for a symmetric matrix $M$.
pub fn apply_transformation(transformation: &Matrix3<f64>, vector1: &Vector3<f64>, vector2: &Vector3<f64>) -> f64 {
    vector2.dot(&(transformation * vector1))
}

/// Two-dimensional counterpart of [`apply_transformation`].
pub fn apply_transformation_2d(transformation: &Matrix2<f64>, vector1: &Vector2<f64>, vector2: &Vector2<f64>) -> f64 {
    vector2.dot(&(transformation * vector1))
}

/// The Jacobian of the reference-to-physical map at one point of an element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jacobian {
    dim: usize,
    // Unused trailing tangents are zero
    tangents: [Vector3<f64>; 3],
}

impl Jacobian {
    /// # Panics
    ///
    /// Panics if the number of tangents is not 1, 2 or 3.
    pub fn from_tangents(tangents: &[Vector3<f64>]) -> Self {
        assert!(
            (1..=3).contains(&tangents.len()),
            "Jacobian must have between 1 and 3 tangent vectors"
        );
        let mut padded = [Vector3::zeros(); 3];
        padded[..tangents.len()].copy_from_slice(tangents);
        Self {
            dim: tangents.len(),
            tangents: padded,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn tangents(&self) -> &[Vector3<f64>] {
        &self.tangents[..self.dim]
    }

    /// The 3x3 matrix with the tangents as columns, zero-padded for $D < 3$.
    pub fn as_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_columns(&self.tangents)
    }

    /// Signed measure of the element map.
    ///
    /// For $D = 3$ this is $\det J$. Lower-dimensional elements only have an orientation
    /// when they lie in the coordinate line ($x$) or plane ($xy$) of their dimension; in that
    /// case the signed length/area is returned, otherwise the unsigned integration factor.
    pub fn determinant(&self) -> f64 {
        let t = &self.tangents;
        match self.dim {
            1 if t[0].y == 0.0 && t[0].z == 0.0 => t[0].x,
            2 if t[0].z == 0.0 && t[1].z == 0.0 => t[0].x * t[1].y - t[0].y * t[1].x,
            3 => determinant(t),
            _ => self.integration_factor(),
        }
    }

    pub fn integration_factor(&self) -> f64 {
        integration_factor(self.tangents())
    }

    /// Fails with [`DiscretizationError::DegenerateElement`] unless the [determinant] is
    /// strictly positive.
    ///
    /// Elements embedded outside their coordinate line or plane have no orientation, so for
    /// them only a vanishing measure is rejected; an inverted element there goes unnoticed.
    ///
    /// [determinant]: Self::determinant
    pub fn check_orientation(&self, element: usize) -> Result<(), DiscretizationError> {
        let determinant = self.determinant();
        // Also rejects NaN
        if determinant > 0.0 {
            Ok(())
        } else {
            Err(DiscretizationError::DegenerateElement { element, determinant })
        }
    }

    /// The metric tensor $G = J^T J$, zero-padded to 3x3.
    pub fn metric_tensor(&self) -> Matrix3<f64> {
        let j = self.as_matrix();
        j.transpose() * j
    }

    /// The inverse metric $G^{-1}$, zero-padded to 3x3.
    ///
    /// Reference gradients contracted with this matrix give physical gradient products:
    /// $\nabla \phi_i \cdot \nabla \phi_j = \hat\nabla \phi_j^T G^{-1} \hat\nabla \phi_i$.
    pub fn inverse_metric(&self) -> Matrix3<f64> {
        match self.dim {
            1 => {
                let mut result = Matrix3::zeros();
                result[(0, 0)] = 1.0 / self.tangents[0].norm_squared();
                result
            }
            2 => {
                let g = self.metric_tensor();
                let g2 = Matrix2::new(g[(0, 0)], g[(0, 1)], g[(1, 0)], g[(1, 1)]);
                let det = g2[(0, 0)] * g2[(1, 1)] - g2[(0, 1)] * g2[(1, 0)];
                let mut result = Matrix3::zeros();
                result[(0, 0)] = g2[(1, 1)] / det;
                result[(0, 1)] = -g2[(0, 1)] / det;
                result[(1, 0)] = -g2[(1, 0)] / det;
                result[(1, 1)] = g2[(0, 0)] / det;
                result
            }
            _ => transformation_matrix_and_determinant(&self.tangents).0,
        }
    }

    /// The matrix $M$ such that $\nabla \phi_i \cdot D \nabla \phi_j = \hat\nabla \phi_i^T M \hat\nabla \phi_j$
    /// for reference gradients $\hat\nabla$.
    ///
    /// Without a tensor this is the inverse metric. With a tensor $D$ it is
    /// $G^{-1} J^T D J G^{-1}$, where $J G^{-1}$ is the (pseudo-)inverse transpose of $J$.
    pub fn gradient_transformation(&self, diffusion_tensor: Option<&Matrix3<f64>>) -> Matrix3<f64> {
        let g_inv = self.inverse_metric();
        match diffusion_tensor {
            None => g_inv,
            Some(tensor) => {
                let j_inv_t = self.as_matrix() * g_inv;
                let m = j_inv_t.transpose() * tensor * j_inv_t;
                // Symmetrize to remove round-off asymmetry for symmetric tensors
                (m + m.transpose()) * 0.5
            }
        }
    }
}
