use distfem::assembly::boundary::apply_dirichlet_boundary_conditions;
use distfem::assembly::global::{add_element_matrices, assemble_pattern, system_layout};
use distfem::assembly::local::ElementStiffnessAssembler;
use distfem::assembly::system::{gather_dense, CsrLinearSystem, DistributedLinearSystem, SystemLayout};
use distfem::error::DiscretizationError;
use distfem::mesh::MeshTopology;
use distfem::parallel::ExecutionContext;
use distfem::partition::MeshPartition;
use distfem::proptest::structured_mesh_strategy;
use distfem::quadrature::Quadrature;
use distfem::space::FunctionSpace;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{dmatrix, dvector, DMatrix, DVector};
use nalgebra_sparse::pattern::SparsityPattern;
use proptest::prelude::*;
use std::collections::BTreeMap;
use util::{regular_space, run_on_ranks};

fn stiffness_system(context: &ExecutionContext, space: &FunctionSpace) -> CsrLinearSystem {
    let partition = MeshPartition::new(context, space).unwrap();
    let mut system = CsrLinearSystem::new();
    system
        .create(system_layout(&partition), assemble_pattern(space, &partition).unwrap())
        .unwrap();
    let assembler = ElementStiffnessAssembler::new(space, Quadrature::None).unwrap();
    add_element_matrices(&mut system, &assembler, &partition).unwrap();
    system.assemble(context).unwrap();
    system
}

fn scenario_constraints() -> BTreeMap<usize, f64> {
    [(0, 1.0), (5, 0.0)].into_iter().collect()
}

fn expected_scenario_system() -> (DMatrix<f64>, DVector<f64>) {
    #[rustfmt::skip]
    let matrix = dmatrix![1.0, 0.0, 0.0, 0.0, 0.0, 0.0;
                          0.0, -2.5, 1.25, 0.0, 0.0, 0.0;
                          0.0, 1.25, -2.5, 1.25, 0.0, 0.0;
                          0.0, 0.0, 1.25, -2.5, 1.25, 0.0;
                          0.0, 0.0, 0.0, 1.25, -2.5, 0.0;
                          0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
    (matrix, dvector![1.0, -1.25, 0.0, 0.0, 0.0, 0.0])
}

#[test]
fn constrained_rows_and_columns_are_eliminated() {
    let context = ExecutionContext::serial();
    let space = regular_space(&[5], &[4.0], 1);
    let mut system = stiffness_system(&context, &space);
    apply_dirichlet_boundary_conditions(&mut system, &scenario_constraints()).unwrap();

    let (matrix, rhs) = gather_dense(&context, &system).unwrap();
    let (expected_matrix, expected_rhs) = expected_scenario_system();
    assert_matrix_eq!(matrix, expected_matrix, comp = abs, tol = 1e-12);
    assert_matrix_eq!(rhs, expected_rhs, comp = abs, tol = 1e-12);
}

#[test]
fn elimination_is_idempotent() {
    let context = ExecutionContext::serial();
    let space = regular_space(&[5], &[4.0], 1);
    let mut system = stiffness_system(&context, &space);
    apply_dirichlet_boundary_conditions(&mut system, &scenario_constraints()).unwrap();
    let once = gather_dense(&context, &system).unwrap();
    apply_dirichlet_boundary_conditions(&mut system, &scenario_constraints()).unwrap();
    let twice = gather_dense(&context, &system).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn elimination_on_several_ranks_matches_serial() {
    let space = regular_space(&[5], &[4.0], 1);
    let (expected_matrix, expected_rhs) = expected_scenario_system();
    for n_ranks in [2, 3] {
        let results = run_on_ranks(n_ranks, |context| {
            let mut system = stiffness_system(&context, &space);
            apply_dirichlet_boundary_conditions(&mut system, &scenario_constraints()).unwrap();
            gather_dense(&context, &system).unwrap()
        });
        // In 1D the global numbering is the natural numbering
        for (matrix, rhs) in results {
            assert_matrix_eq!(matrix, expected_matrix, comp = abs, tol = 1e-12);
            assert_matrix_eq!(rhs, expected_rhs, comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn constraints_outside_the_system_are_rejected() {
    let context = ExecutionContext::serial();
    let space = regular_space(&[5], &[4.0], 1);
    let mut system = stiffness_system(&context, &space);
    let constraints: BTreeMap<usize, f64> = [(6, 1.0)].into_iter().collect();
    assert!(matches!(
        apply_dirichlet_boundary_conditions(&mut system, &constraints),
        Err(DiscretizationError::Config { key, .. }) if key == "dirichletBoundaryConditions"
    ));

    let mut empty = CsrLinearSystem::new();
    assert!(matches!(
        apply_dirichlet_boundary_conditions(&mut empty, &scenario_constraints()),
        Err(DiscretizationError::InvalidState(_))
    ));
}

#[test]
fn two_dimensional_rows_and_columns_are_eliminated() {
    // 3 x 4 nodes on [0, 6] x [0, 9], bottom and top rows prescribed
    let context = ExecutionContext::serial();
    let space = regular_space(&[2, 3], &[6.0, 9.0], 1);
    let constraints: BTreeMap<usize, f64> = [0, 1, 2]
        .into_iter()
        .flat_map(|i| [(i, i as f64 / 3.0), (9 + i, i as f64 / 3.0)])
        .collect();
    let mut system = stiffness_system(&context, &space);
    apply_dirichlet_boundary_conditions(&mut system, &constraints).unwrap();
    let (matrix, rhs) = gather_dense(&context, &system).unwrap();

    #[rustfmt::skip]
    let interior_rows = [
        [0.0, 0.0, 0.0, -12.0, 3.0, 0.0, 1.5, 3.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 3.0, -24.0, 3.0, 3.0, 3.0, 3.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 3.0, -12.0, 0.0, 3.0, 1.5, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.5, 3.0, 0.0, -12.0, 3.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 3.0, 3.0, 3.0, 3.0, -24.0, 3.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 3.0, 1.5, 0.0, 3.0, -12.0, 0.0, 0.0, 0.0],
    ];
    let mut expected_matrix = DMatrix::identity(12, 12);
    for (k, row) in interior_rows.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            expected_matrix[(3 + k, j)] = value / 9.0;
        }
    }
    let third = 1.0 / 3.0;
    #[rustfmt::skip]
    let expected_rhs = dvector![0.0, third, 2.0 * third,
                                -1.0 / 9.0, -3.0 / 9.0, -2.0 / 9.0,
                                -1.0 / 9.0, -3.0 / 9.0, -2.0 / 9.0,
                                0.0, third, 2.0 * third];
    assert_matrix_eq!(matrix, expected_matrix, comp = abs, tol = 1e-12);
    assert_matrix_eq!(rhs, expected_rhs, comp = abs, tol = 1e-12);

    let solution = matrix.lu().solve(&rhs).unwrap();
    for (&dof, &value) in &constraints {
        assert_scalar_eq!(solution[dof], value, comp = abs, tol = 1e-12);
    }
}

#[test]
fn missing_diagonal_leaves_the_system_unchanged() {
    // Row 1 couples to rows 0 and 2, but not to itself
    let pattern =
        SparsityPattern::try_from_offsets_and_indices(3, 3, vec![0, 2, 4, 6], vec![0, 1, 0, 2, 1, 2]).unwrap();
    let mut system = CsrLinearSystem::new();
    system
        .create(
            SystemLayout {
                rank: 0,
                row_ranges: vec![0..3],
            },
            pattern,
        )
        .unwrap();
    for (row, col) in [(0, 0), (0, 1), (1, 0), (1, 2), (2, 1), (2, 2)] {
        system.set_matrix_entry(row, col, (row + col + 1) as f64).unwrap();
    }
    for row in 0..3 {
        system.set_rhs_entry(row, 1.0).unwrap();
    }
    let context = ExecutionContext::serial();
    let before = gather_dense(&context, &system).unwrap();

    // Row 0 could be eliminated on its own, but row 1 has no diagonal
    let constraints: BTreeMap<usize, f64> = [(0, 2.0), (1, 3.0)].into_iter().collect();
    assert!(matches!(
        apply_dirichlet_boundary_conditions(&mut system, &constraints),
        Err(DiscretizationError::InvalidState(_))
    ));
    assert_eq!(gather_dense(&context, &system).unwrap(), before);
}

proptest! {
    #[test]
    fn elimination_of_arbitrary_constraints_is_idempotent(
        (mesh, constraints) in structured_mesh_strategy(2, 16).prop_flat_map(|mesh| {
            let n_dofs = mesh.n_dofs();
            (Just(mesh), prop::collection::btree_map(0..n_dofs, -10.0..10.0, 0..=n_dofs))
        })
    ) {
        let context = ExecutionContext::serial();
        let space = FunctionSpace::new(mesh).unwrap();
        let mut system = stiffness_system(&context, &space);
        apply_dirichlet_boundary_conditions(&mut system, &constraints).unwrap();
        let once = gather_dense(&context, &system).unwrap();
        apply_dirichlet_boundary_conditions(&mut system, &constraints).unwrap();
        let twice = gather_dense(&context, &system).unwrap();
        prop_assert_eq!(&once, &twice);

        let (matrix, rhs) = once;
        for (&dof, &value) in &constraints {
            for j in 0..matrix.ncols() {
                prop_assert_eq!(matrix[(dof, j)], if j == dof { 1.0 } else { 0.0 });
                if j != dof {
                    prop_assert_eq!(matrix[(j, dof)], 0.0);
                }
            }
            prop_assert_eq!(rhs[dof], value);
        }
    }
}
