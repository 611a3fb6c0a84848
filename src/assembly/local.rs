//! Element matrices and vectors.
//!
//! Stiffness matrices follow the sign convention of the discrete Laplacian:
//! $A_{ij} = -\int_K \nabla \phi_i \cdot D \nabla \phi_j \, dx$.

use crate::assembly::buffers::BasisTable;
use crate::basis::LagrangeBasis;
use crate::error::DiscretizationError;
use crate::geometry::apply_transformation;
use crate::mesh::{MeshKind, MeshTopology};
use crate::quadrature::{Quadrature, QuadratureRule};
use crate::space::FunctionSpace;
use eyre::eyre;
use nalgebra::{DMatrix, DVector, Matrix3};

pub trait ElementConnectivityAssembler {
    fn num_elements(&self) -> usize;

    fn num_dofs(&self) -> usize;

    fn element_dof_count(&self, element_index: usize) -> usize;

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize);
}

pub trait ElementMatrixAssembler: ElementConnectivityAssembler {
    fn assemble_element_matrix_into(&self, element_index: usize, output: &mut DMatrix<f64>) -> eyre::Result<()>;

    fn assemble_element_matrix(&self, element_index: usize) -> eyre::Result<DMatrix<f64>> {
        let n = self.element_dof_count(element_index);
        let mut output = DMatrix::zeros(n, n);
        self.assemble_element_matrix_into(element_index, &mut output)?;
        Ok(output)
    }
}

pub trait ElementVectorAssembler: ElementConnectivityAssembler {
    fn assemble_element_vector_into(&self, element_index: usize, output: &mut DVector<f64>) -> eyre::Result<()>;

    fn assemble_element_vector(&self, element_index: usize) -> eyre::Result<DVector<f64>> {
        let mut output = DVector::zeros(self.element_dof_count(element_index));
        self.assemble_element_vector_into(element_index, &mut output)?;
        Ok(output)
    }
}

impl ElementConnectivityAssembler for FunctionSpace {
    fn num_elements(&self) -> usize {
        self.n_elements()
    }

    fn num_dofs(&self) -> usize {
        self.n_dofs()
    }

    fn element_dof_count(&self, _element_index: usize) -> usize {
        self.dofs_per_element()
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        MeshTopology::populate_element_dofs(self, output, element_index)
    }
}

/// Reference-interval integrals of products of 1D basis functions and their derivatives.
///
/// Regular structured elements are axis-aligned boxes, so every element integral factorizes
/// into a product of such 1D integrals.
#[derive(Debug, Clone, PartialEq)]
struct TensorFactors {
    // ∫ φ_i φ_j
    mass: DMatrix<f64>,
    // ∫ φ_i' φ_j'
    stiffness: DMatrix<f64>,
    // ∫ φ_i' φ_j
    mixed: DMatrix<f64>,
}

impl TensorFactors {
    fn new(basis: &LagrangeBasis) -> Self {
        let n = basis.nodes_per_axis();
        let rule = QuadratureRule::for_basis(1, basis);
        let integral = |f: &dyn Fn(f64) -> f64| rule.integrate(|xi| f(xi[0]));
        let mass = DMatrix::from_fn(n, n, |i, j| integral(&|x| basis.phi_1d(i, x) * basis.phi_1d(j, x)));
        let stiffness = DMatrix::from_fn(n, n, |i, j| integral(&|x| basis.dphi_1d(i, x) * basis.dphi_1d(j, x)));
        let mixed = DMatrix::from_fn(n, n, |i, j| integral(&|x| basis.dphi_1d(i, x) * basis.phi_1d(j, x)));
        Self { mass, stiffness, mixed }
    }

    /// $\int_K \partial_a \phi_i \, \partial_b \phi_j$ on a box with edge lengths `h`.
    /// `None` stands for the function value instead of a derivative.
    fn product_integral(
        &self,
        basis: &LagrangeBasis,
        h: &[f64],
        i: usize,
        j: usize,
        a: Option<usize>,
        b: Option<usize>,
    ) -> f64 {
        let dim = h.len();
        let ii = basis.axis_indices(dim, i);
        let jj = basis.axis_indices(dim, j);
        (0..dim)
            .map(|k| {
                let (p, q) = (ii[k], jj[k]);
                match (a == Some(k), b == Some(k)) {
                    (true, true) => self.stiffness[(p, q)] / h[k],
                    (true, false) => self.mixed[(p, q)],
                    (false, true) => self.mixed[(q, p)],
                    (false, false) => self.mass[(p, q)] * h[k],
                }
            })
            .product()
    }
}

/// How element integrals are evaluated.
#[derive(Debug, Clone, PartialEq)]
enum Integration {
    Factorized { factors: TensorFactors, h: Vec<f64> },
    Quadrature(BasisTable),
}

impl Integration {
    fn new(space: &FunctionSpace, quadrature: Quadrature) -> Result<Self, DiscretizationError> {
        match quadrature {
            Quadrature::None => {
                let h = match space.mesh() {
                    MeshKind::Structured(mesh) => mesh.element_lengths(),
                    MeshKind::Unstructured(_) => None,
                };
                let h = h.ok_or_else(|| {
                    DiscretizationError::config(
                        "quadrature",
                        "integration without quadrature requires a regular structured mesh",
                    )
                })?;
                Ok(Integration::Factorized {
                    factors: TensorFactors::new(space.basis()),
                    h,
                })
            }
            Quadrature::Gauss(n) if n > 0 => {
                let rule = QuadratureRule::gauss(space.dim(), n);
                Ok(Integration::Quadrature(BasisTable::new(space.basis(), rule)))
            }
            Quadrature::Gauss(_) => Err(DiscretizationError::config(
                "quadrature",
                "Gauss quadrature needs at least one point per axis",
            )),
        }
    }
}

/// Evaluates `f(weight * integration factor, basis values, basis gradients, transformation)`
/// at every quadrature point of an element.
fn for_each_quadrature_point(
    space: &FunctionSpace,
    table: &BasisTable,
    element_index: usize,
    diffusion_tensor: Option<&Matrix3<f64>>,
    mut f: impl FnMut(f64, &[f64], &[nalgebra::Vector3<f64>], &Matrix3<f64>),
) -> eyre::Result<()> {
    let positions = space.element_dof_positions(element_index)?;
    for (q, weight) in table.rule().weights().iter().enumerate() {
        let jacobian = table.jacobian_at(q, &positions);
        jacobian.check_orientation(element_index)?;
        let integration_factor = jacobian.integration_factor();
        if !(integration_factor > 0.0) {
            return Err(DiscretizationError::DegenerateElement {
                element: element_index,
                determinant: integration_factor,
            }
            .into());
        }
        let transformation = jacobian.gradient_transformation(diffusion_tensor);
        f(
            weight * integration_factor,
            table.values_at(q),
            table.gradients_at(q),
            &transformation,
        );
    }
    Ok(())
}

fn check_output_size(element_index: usize, expected: usize, rows: usize, cols: usize) -> eyre::Result<()> {
    if rows != expected || cols != expected {
        return Err(eyre!(
            "output for element {element_index} is {rows}x{cols}, expected {expected}x{expected}"
        ));
    }
    Ok(())
}

/// Element matrices $-\int_K \nabla \phi_i \cdot D \nabla \phi_j$, with $D = I$ unless a
/// diffusion tensor is given.
#[derive(Debug, Clone)]
pub struct ElementStiffnessAssembler<'a> {
    space: &'a FunctionSpace,
    integration: Integration,
    diffusion_tensor: Option<Matrix3<f64>>,
}

impl<'a> ElementStiffnessAssembler<'a> {
    pub fn new(space: &'a FunctionSpace, quadrature: Quadrature) -> Result<Self, DiscretizationError> {
        Ok(Self {
            space,
            integration: Integration::new(space, quadrature)?,
            diffusion_tensor: None,
        })
    }

    pub fn with_diffusion_tensor(mut self, tensor: Option<Matrix3<f64>>) -> Self {
        self.diffusion_tensor = tensor;
        self
    }
}

impl<'a> ElementConnectivityAssembler for ElementStiffnessAssembler<'a> {
    fn num_elements(&self) -> usize {
        self.space.num_elements()
    }

    fn num_dofs(&self) -> usize {
        self.space.num_dofs()
    }

    fn element_dof_count(&self, element_index: usize) -> usize {
        self.space.element_dof_count(element_index)
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        ElementConnectivityAssembler::populate_element_dofs(self.space, output, element_index)
    }
}

impl<'a> ElementMatrixAssembler for ElementStiffnessAssembler<'a> {
    fn assemble_element_matrix_into(&self, element_index: usize, output: &mut DMatrix<f64>) -> eyre::Result<()> {
        let n = self.element_dof_count(element_index);
        check_output_size(element_index, n, output.nrows(), output.ncols())?;
        output.fill(0.0);

        match &self.integration {
            Integration::Factorized { factors, h } => {
                let basis = self.space.basis();
                let dim = h.len();
                let tensor = self.diffusion_tensor.unwrap_or_else(Matrix3::identity);
                for i in 0..n {
                    for j in 0..n {
                        let mut entry = 0.0;
                        for a in 0..dim {
                            for b in 0..dim {
                                if tensor[(a, b)] != 0.0 {
                                    entry += tensor[(a, b)] * factors.product_integral(basis, h, i, j, Some(a), Some(b));
                                }
                            }
                        }
                        output[(i, j)] = -entry;
                    }
                }
            }
            Integration::Quadrature(table) => {
                for_each_quadrature_point(
                    self.space,
                    table,
                    element_index,
                    self.diffusion_tensor.as_ref(),
                    |weight, _, gradients, transformation| {
                        for i in 0..n {
                            for j in 0..n {
                                output[(i, j)] -= weight * apply_transformation(transformation, &gradients[j], &gradients[i]);
                            }
                        }
                    },
                )?;
            }
        }
        Ok(())
    }
}

/// Element mass matrices $\int_K \phi_i \phi_j$.
#[derive(Debug, Clone)]
pub struct ElementMassAssembler<'a> {
    space: &'a FunctionSpace,
    integration: Integration,
}

impl<'a> ElementMassAssembler<'a> {
    pub fn new(space: &'a FunctionSpace, quadrature: Quadrature) -> Result<Self, DiscretizationError> {
        Ok(Self {
            space,
            integration: Integration::new(space, quadrature)?,
        })
    }
}

impl<'a> ElementConnectivityAssembler for ElementMassAssembler<'a> {
    fn num_elements(&self) -> usize {
        self.space.num_elements()
    }

    fn num_dofs(&self) -> usize {
        self.space.num_dofs()
    }

    fn element_dof_count(&self, element_index: usize) -> usize {
        self.space.element_dof_count(element_index)
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        ElementConnectivityAssembler::populate_element_dofs(self.space, output, element_index)
    }
}

impl<'a> ElementMatrixAssembler for ElementMassAssembler<'a> {
    fn assemble_element_matrix_into(&self, element_index: usize, output: &mut DMatrix<f64>) -> eyre::Result<()> {
        let n = self.element_dof_count(element_index);
        check_output_size(element_index, n, output.nrows(), output.ncols())?;
        output.fill(0.0);

        match &self.integration {
            Integration::Factorized { factors, h } => {
                let basis = self.space.basis();
                for i in 0..n {
                    for j in 0..n {
                        output[(i, j)] = factors.product_integral(basis, h, i, j, None, None);
                    }
                }
            }
            Integration::Quadrature(table) => {
                for_each_quadrature_point(self.space, table, element_index, None, |weight, values, _, _| {
                    for i in 0..n {
                        for j in 0..n {
                            output[(i, j)] += weight * values[i] * values[j];
                        }
                    }
                })?;
            }
        }
        Ok(())
    }
}

/// Element load vectors $\int_K f_h \phi_i$ of a source given by its dof values.
///
/// The source is interpolated with the same basis, so the load vector is the element mass
/// matrix applied to the element's source values.
#[derive(Debug, Clone)]
pub struct ElementSourceAssembler<'a> {
    mass: ElementMassAssembler<'a>,
    // Indexed by mesh dof number
    source: &'a [f64],
}

impl<'a> ElementSourceAssembler<'a> {
    pub fn new(
        space: &'a FunctionSpace,
        quadrature: Quadrature,
        source: &'a [f64],
    ) -> Result<Self, DiscretizationError> {
        if source.len() != space.n_dofs() {
            return Err(DiscretizationError::config(
                "rightHandSide",
                format!("expected {} values, got {}", space.n_dofs(), source.len()),
            ));
        }
        Ok(Self {
            mass: ElementMassAssembler::new(space, quadrature)?,
            source,
        })
    }
}

impl<'a> ElementConnectivityAssembler for ElementSourceAssembler<'a> {
    fn num_elements(&self) -> usize {
        self.mass.num_elements()
    }

    fn num_dofs(&self) -> usize {
        self.mass.num_dofs()
    }

    fn element_dof_count(&self, element_index: usize) -> usize {
        self.mass.element_dof_count(element_index)
    }

    fn populate_element_dofs(&self, output: &mut [usize], element_index: usize) {
        self.mass.populate_element_dofs(output, element_index)
    }
}

impl<'a> ElementVectorAssembler for ElementSourceAssembler<'a> {
    fn assemble_element_vector_into(&self, element_index: usize, output: &mut DVector<f64>) -> eyre::Result<()> {
        let n = self.element_dof_count(element_index);
        if output.len() != n {
            return Err(eyre!(
                "output for element {element_index} has {} entries, expected {n}",
                output.len()
            ));
        }
        let mut dofs = vec![0; n];
        self.populate_element_dofs(&mut dofs, element_index);
        let element_source = DVector::from_iterator(n, dofs.iter().map(|&dof| self.source[dof]));
        let mass = self.mass.assemble_element_matrix(element_index)?;
        output.copy_from(&(mass * element_source));
        Ok(())
    }
}
