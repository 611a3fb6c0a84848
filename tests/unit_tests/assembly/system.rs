use distfem::assembly::system::{gather_dense, CsrLinearSystem, DistributedLinearSystem, SystemLayout};
use distfem::error::DiscretizationError;
use distfem::parallel::ExecutionContext;
use matrixcompare::assert_matrix_eq;
use nalgebra::{dmatrix, dvector};
use nalgebra_sparse::pattern::SparsityPattern;
use util::run_on_ranks;

/// Tridiagonal pattern of the rows `start..end` of an `n x n` system.
fn tridiagonal_pattern(start: usize, end: usize, n: usize) -> SparsityPattern {
    let mut offsets = vec![0];
    let mut indices = Vec::new();
    for row in start..end {
        indices.extend(row.saturating_sub(1)..(row + 2).min(n));
        offsets.push(indices.len());
    }
    SparsityPattern::try_from_offsets_and_indices(end - start, n, offsets, indices).unwrap()
}

fn serial_system(n: usize) -> CsrLinearSystem {
    let mut system = CsrLinearSystem::new();
    let layout = SystemLayout {
        rank: 0,
        row_ranges: vec![0..n],
    };
    system.create(layout, tridiagonal_pattern(0, n, n)).unwrap();
    system
}

#[test]
fn operations_before_creation_fail() {
    let mut system = CsrLinearSystem::new();
    assert!(!system.is_created());
    assert_eq!(system.ownership_range(), 0..0);
    assert_eq!(system.n_global_rows(), 0);
    assert!(matches!(system.zero_matrix(), Err(DiscretizationError::InvalidState(_))));
    assert!(system.add_matrix_entry(0, 0, 1.0).is_err());
    assert!(system.add_rhs_entry(0, 1.0).is_err());
    assert_eq!(system.matrix_entry(0, 0), None);
}

#[test]
fn pattern_must_match_layout() {
    let mut system = CsrLinearSystem::new();
    let layout = SystemLayout {
        rank: 0,
        row_ranges: vec![0..3],
    };
    assert!(system.create(layout, tridiagonal_pattern(0, 2, 3)).is_err());
    assert!(!system.is_created());
}

#[test]
fn add_and_set_entries() {
    let mut system = serial_system(3);
    system.add_matrix_entry(0, 0, 1.0).unwrap();
    system.add_matrix_entry(0, 0, 2.0).unwrap();
    system.set_matrix_entry(1, 2, -1.0).unwrap();
    system.add_rhs_entry(2, 4.0).unwrap();
    system.set_rhs_entry(1, 0.5).unwrap();

    assert_eq!(system.matrix_entry(0, 0), Some(3.0));
    assert_eq!(system.matrix_entry(1, 2), Some(-1.0));
    assert_eq!(system.matrix_entry(0, 2), None);
    assert_eq!(system.rhs_entry(2), Some(4.0));
    assert_eq!(system.local_rhs(), &[0.0, 0.5, 4.0]);

    // Outside of the pattern and out of bounds
    assert!(system.add_matrix_entry(0, 2, 1.0).is_err());
    assert!(system.add_matrix_entry(3, 0, 1.0).is_err());

    let (matrix, rhs) = gather_dense(&ExecutionContext::serial(), &system).unwrap();
    #[rustfmt::skip]
    let expected = dmatrix![3.0, 0.0, 0.0;
                            0.0, 0.0, -1.0;
                            0.0, 0.0, 0.0];
    assert_matrix_eq!(matrix, expected);
    assert_matrix_eq!(rhs, dvector![0.0, 0.5, 4.0]);

    system.zero_matrix().unwrap();
    system.zero_rhs().unwrap();
    assert_eq!(system.local_matrix().unwrap().values(), &[0.0; 7]);
    assert_eq!(system.local_rhs(), &[0.0; 3]);

    system.destroy();
    assert!(!system.is_created());
    assert_eq!(system.layout(), None);
}

#[test]
fn visit_rows_in_ascending_order() {
    let mut system = serial_system(3);
    system.visit_rows_mut(&mut |row, cols, values, rhs| {
        for (col, value) in cols.iter().zip(values.iter_mut()) {
            *value = (10 * row + col) as f64;
        }
        *rhs = row as f64;
    });
    let mut visited = Vec::new();
    system.visit_rows(&mut |row, cols, values, rhs| visited.push((row, cols.to_vec(), values.to_vec(), rhs)));
    assert_eq!(
        visited,
        vec![
            (0, vec![0, 1], vec![0.0, 1.0], 0.0),
            (1, vec![0, 1, 2], vec![10.0, 11.0, 12.0], 1.0),
            (2, vec![1, 2], vec![21.0, 22.0], 2.0),
        ]
    );
}

#[test]
fn off_rank_contributions_are_delivered_on_assemble() {
    let n = 4;
    let results = run_on_ranks(2, |context| {
        let rank = context.rank();
        let row_ranges = vec![0..2, 2..4];
        let owned = row_ranges[rank].clone();
        let mut system = CsrLinearSystem::new();
        let layout = SystemLayout { rank, row_ranges };
        system
            .create(layout, tridiagonal_pattern(owned.start, owned.end, n))
            .unwrap();

        // Both ranks add to the rows 1 and 2 at the interface
        system.add_matrix_entry(1, 2, 1.0).unwrap();
        system.add_matrix_entry(2, 1, 1.0).unwrap();
        system.add_rhs_entry(2, 0.25).unwrap();
        assert!(system.set_matrix_entry(3 - 2 * rank, 3 - 2 * rank, 1.0).is_err());

        system.assemble(&context).unwrap();
        let dense = gather_dense(&context, &system).unwrap();
        (system.matrix_entry(1, 2), system.matrix_entry(2, 1), system.rhs_entry(2), dense)
    });

    assert_eq!(results[0].0, Some(2.0));
    assert_eq!(results[0].1, None);
    assert_eq!(results[1].1, Some(2.0));
    assert_eq!(results[1].2, Some(0.5));

    let (matrix, rhs) = &results[0].3;
    assert_eq!(matrix[(1, 2)], 2.0);
    assert_eq!(matrix[(2, 1)], 2.0);
    assert_eq!(rhs[2], 0.5);
    assert_eq!(&results[1].3, &results[0].3);
}

#[test]
fn assemble_checks_the_number_of_ranks() {
    let results = run_on_ranks(2, |context| {
        let mut system = serial_system(2);
        system.assemble(&context)
    });
    assert!(results.iter().all(|result| result.is_err()));
}
