//! Harmonic functions contained in the discrete space must be reproduced exactly from their
//! boundary values.

use super::{boundary_constraints, constraints_to_json};
use distfem::config::Settings;
use distfem::fem::{Equation, FiniteElementMethod};
use distfem::mesh::{MeshTopology, StructuredMesh};
use distfem::parallel::ExecutionContext;
use distfem::space::FunctionSpace;
use matrixcompare::assert_scalar_eq;
use nalgebra::{Matrix3, Point3, Vector3};
use serde_json::json;
use std::sync::Arc;
use util::regular_space;

fn solve_with_boundary_values(
    space: Arc<FunctionSpace>,
    extent: &[f64],
    extra_settings: serde_json::Value,
    u: impl Fn(&[f64; 3]) -> f64,
) -> Vec<f64> {
    let constraints = boundary_constraints(&space, extent, &u);
    let mut settings = extra_settings;
    settings["dirichletBoundaryConditions"] = constraints_to_json(&constraints);
    let mut fem = FiniteElementMethod::new(
        ExecutionContext::serial(),
        Settings::from_value(settings),
        space,
        Equation::Laplace,
    );
    fem.run().unwrap();
    fem.gather_solution().unwrap()
}

fn assert_reproduces(space: &FunctionSpace, solution: &[f64], u: impl Fn(&[f64; 3]) -> f64, tol: f64) {
    for (dof, value) in solution.iter().enumerate() {
        let x = space.dof_position(dof).unwrap();
        assert_scalar_eq!(*value, u(&[x.x, x.y, x.z]), comp = abs, tol = tol);
    }
}

#[test]
fn linear_function_on_rectangle() {
    let u = |x: &[f64; 3]| 1.0 + 2.0 * x[0] + 3.0 * x[1];
    let space = regular_space(&[2, 3], &[2.0, 3.0], 1);
    for quadrature in [json!("none"), json!(2)] {
        let solution = solve_with_boundary_values(space.clone(), &[2.0, 3.0], json!({ "quadrature": quadrature }), u);
        assert_reproduces(&space, &solution, u, 1e-12);
    }
}

#[test]
fn linear_function_on_cube() {
    let u = |x: &[f64; 3]| x[0] + 2.0 * x[1] + 3.0 * x[2];
    let space = regular_space(&[2, 2, 3], &[1.0, 1.0, 1.5], 1);
    let solution = solve_with_boundary_values(space.clone(), &[1.0, 1.0, 1.5], json!({}), u);
    assert_reproduces(&space, &solution, u, 1e-12);
}

#[test]
fn quadratic_harmonic_function_on_square() {
    let u = |x: &[f64; 3]| x[0] * x[0] - x[1] * x[1] + x[0] * x[1];
    let space = regular_space(&[3, 2], &[1.5, 1.0], 2);
    for quadrature in [json!("none"), json!(3)] {
        let solution = solve_with_boundary_values(space.clone(), &[1.5, 1.0], json!({ "quadrature": quadrature }), u);
        assert_reproduces(&space, &solution, u, 1e-11);
    }
}

#[test]
fn linear_function_on_affinely_deformed_mesh() {
    // Shear and stretch the unit square, keeping the orientation
    let map = Matrix3::new(2.0, 0.5, 0.0, 0.25, 1.0, 0.0, 0.0, 0.0, 1.0);
    let offset = Vector3::new(-1.0, 0.5, 0.0);
    let n = 3;
    let reference = StructuredMesh::regular(&[n, n], &[1.0, 1.0], 1).unwrap();
    let positions: Vec<Point3<f64>> = (0..reference.n_nodes())
        .map(|node| {
            let x = reference.dof_position(node).unwrap();
            Point3::from(map * x.coords + offset)
        })
        .collect();
    let space = Arc::new(FunctionSpace::new(StructuredMesh::deformable(&[n, n], 1, positions).unwrap()).unwrap());

    // Boundary dofs are those of the reference square
    let constraints = boundary_constraints(&FunctionSpace::new(reference).unwrap(), &[1.0, 1.0], |_| 0.0);
    let u = |x: &[f64; 3]| 0.5 - x[0] + 4.0 * x[1];
    let constraints: serde_json::Map<_, _> = constraints
        .keys()
        .map(|&dof| {
            let x = space.dof_position(dof).unwrap();
            (dof.to_string(), json!(u(&[x.x, x.y, x.z])))
        })
        .collect();

    let settings = Settings::from_value(json!({ "dirichletBoundaryConditions": constraints }));
    let mut fem = FiniteElementMethod::new(ExecutionContext::serial(), settings, space.clone(), Equation::Laplace);
    fem.run().unwrap();
    assert_reproduces(&space, &fem.gather_solution().unwrap(), u, 1e-12);
}

#[test]
fn linear_function_on_non_affine_mesh() {
    // The interior nodes of a 3 x 3 grid are moved, turning the elements into general quads
    let n = 3;
    let reference = StructuredMesh::regular(&[n, n], &[1.0, 1.0], 1).unwrap();
    let positions: Vec<Point3<f64>> = (0..reference.n_nodes())
        .map(|node| {
            let x = reference.dof_position(node).unwrap();
            let [a, b, _] = reference.node_coordinates(node);
            let interior = (1..n).contains(&a) && (1..n).contains(&b);
            let shift = if interior {
                Vector3::new(0.07 * (a as f64 - 1.5), -0.05 * (b as f64 - 1.2), 0.0)
            } else {
                Vector3::zeros()
            };
            x + shift
        })
        .collect();
    let space = Arc::new(FunctionSpace::new(StructuredMesh::deformable(&[n, n], 1, positions).unwrap()).unwrap());

    let u = |x: &[f64; 3]| 2.0 * x[0] - x[1];
    let solution = solve_with_boundary_values(space.clone(), &[1.0, 1.0], json!({ "quadrature": 2 }), u);
    assert_reproduces(&space, &solution, u, 1e-12);
}
