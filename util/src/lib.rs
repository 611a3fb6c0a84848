use distfem::mesh::StructuredMesh;
use distfem::parallel::{ExecutionContext, ThreadCommunicator};
use distfem::space::FunctionSpace;
use std::sync::Arc;
use std::thread;

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Runs `f` on `n_ranks` threads connected as ranks of one run, and returns the results
/// ordered by rank.
///
/// Panics if any of the ranks panics.
pub fn run_on_ranks<T, F>(n_ranks: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ExecutionContext) -> T + Sync,
{
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = ThreadCommunicator::world(n_ranks)
            .into_iter()
            .map(|communicator| scope.spawn(move || f(ExecutionContext::new(communicator))))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("a rank panicked"))
            .collect()
    })
}

/// Function space on a regular structured mesh.
pub fn regular_space(n_elements_per_axis: &[usize], extent: &[f64], order: usize) -> Arc<FunctionSpace> {
    let mesh = StructuredMesh::regular(n_elements_per_axis, extent, order).expect("valid mesh parameters");
    Arc::new(FunctionSpace::new(mesh).expect("valid function space"))
}

/// Function space on the unit square/cube with `n` elements per axis.
pub fn unit_space(dim: usize, n: usize, order: usize) -> Arc<FunctionSpace> {
    regular_space(&vec![n; dim], &vec![1.0; dim], order)
}
