use crate::error::DiscretizationError;
use crate::mesh::{Face, MeshTopology};
use crate::space::FunctionSpace;
use log::trace;
use nalgebra::{Point3, Vector3};
use std::collections::VecDeque;

/// Reference coordinates may exceed $[0, 1]$ by this much and still count as inside.
pub const REFERENCE_TOLERANCE: f64 = 1e-10;

const MAX_NEWTON_ITERATIONS: usize = 50;
const NEWTON_STEP_TOLERANCE: f64 = 1e-12;

/// Where a physical point lies in a function space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLocation {
    pub element: usize,
    /// `None` for the function space itself, otherwise the face of the ghost mesh.
    pub ghost_mesh: Option<Face>,
    /// Reference coordinates, clamped to $[0, 1]$ and zero-padded to three components.
    pub xi: [f64; 3],
}

impl FunctionSpace {
    /// Reference coordinates of `point` in `element`, if the element contains it.
    ///
    /// The reference coordinates are computed with a Gauss-Newton iteration on the
    /// isoparametric map, which for elements of lower dimension than the embedding space
    /// also requires the point to lie on the element.
    pub fn point_in_element(
        &self,
        point: &Point3<f64>,
        element: usize,
    ) -> Result<Option<[f64; 3]>, DiscretizationError> {
        let dim = self.dim();
        let positions = self.element_dof_positions(element)?;

        let (lower, upper) = positions.iter().fold(
            (Vector3::repeat(f64::INFINITY), Vector3::repeat(f64::NEG_INFINITY)),
            |(lower, upper), p| (lower.inf(&p.coords), upper.sup(&p.coords)),
        );
        let diameter = (upper - lower).norm();
        let distance_tolerance = 1e-9 * diameter.max(1.0);

        // Multilinear elements are contained in the bounding box of their vertices
        if self.basis().order() == 1 {
            let outside = (0..3).any(|k| {
                point[k] < lower[k] - distance_tolerance || point[k] > upper[k] + distance_tolerance
            });
            if outside {
                return Ok(None);
            }
        }

        let mut xi = [0.0; 3];
        xi[..dim].fill(0.5);
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let residual = point - self.map_reference_point(&positions, &xi);
            let jacobian = self.jacobian_from_positions(&positions, &xi);
            let step = jacobian.inverse_metric() * (jacobian.as_matrix().transpose() * residual);
            if !step.iter().all(|s| s.is_finite()) {
                return Ok(None);
            }
            for k in 0..dim {
                xi[k] += step[k];
            }
            if xi.iter().any(|x| x.abs() > 1e3) {
                return Ok(None);
            }
            if step.amax() < NEWTON_STEP_TOLERANCE {
                break;
            }
        }

        let inside = xi[..dim]
            .iter()
            .all(|&x| (-REFERENCE_TOLERANCE..=1.0 + REFERENCE_TOLERANCE).contains(&x));
        if !inside {
            return Ok(None);
        }
        let mismatch = (point - self.map_reference_point(&positions, &xi)).norm();
        if mismatch > distance_tolerance {
            return Ok(None);
        }

        for x in &mut xi[..dim] {
            *x = x.clamp(0.0, 1.0);
        }
        Ok(Some(xi))
    }

    /// Locates the element containing `point`.
    ///
    /// The search visits `start_element` first and then moves outward through elements that
    /// share a node with already visited ones, visiting neighbours in ascending order. Without
    /// a start element, elements are visited in ascending order. The first element containing
    /// the point wins, so a point on a shared face is attributed deterministically.
    /// If no element of this function space contains the point, the ghost meshes are searched
    /// in ascending face order.
    pub fn find_position(
        &self,
        point: &Point3<f64>,
        start_element: Option<usize>,
    ) -> Result<Option<PointLocation>, DiscretizationError> {
        if let Some(location) = self.find_position_in_own_mesh(point, start_element)? {
            return Ok(Some(location));
        }

        for face in Face::ALL {
            if let Some(ghost) = self.ghost_mesh(face) {
                if let Some(location) = ghost.find_position_in_own_mesh(point, None)? {
                    trace!("Point {point:?} found in ghost mesh at face {face:?}");
                    return Ok(Some(PointLocation {
                        ghost_mesh: Some(face),
                        ..location
                    }));
                }
            }
        }
        Ok(None)
    }

    fn find_position_in_own_mesh(
        &self,
        point: &Point3<f64>,
        start_element: Option<usize>,
    ) -> Result<Option<PointLocation>, DiscretizationError> {
        let n_elements = self.n_elements();
        let located = |element: usize, xi: [f64; 3]| PointLocation {
            element,
            ghost_mesh: None,
            xi,
        };

        let start = match start_element.filter(|&e| e < n_elements) {
            Some(start) => start,
            None => {
                for element in 0..n_elements {
                    if let Some(xi) = self.point_in_element(point, element)? {
                        return Ok(Some(located(element, xi)));
                    }
                }
                return Ok(None);
            }
        };

        let mut visited = vec![false; n_elements];
        let mut queue = VecDeque::from([start]);
        visited[start] = true;
        let mut next_unvisited = 0;
        loop {
            while let Some(element) = queue.pop_front() {
                if let Some(xi) = self.point_in_element(point, element)? {
                    trace!("Point {point:?} found in element {element}, searched from {start}");
                    return Ok(Some(located(element, xi)));
                }
                for neighbour in self.element_neighbours(element) {
                    if !visited[neighbour] {
                        visited[neighbour] = true;
                        queue.push_back(neighbour);
                    }
                }
            }
            // Continue with the next component of a disconnected mesh
            while next_unvisited < n_elements && visited[next_unvisited] {
                next_unvisited += 1;
            }
            if next_unvisited == n_elements {
                return Ok(None);
            }
            visited[next_unvisited] = true;
            queue.push_back(next_unvisited);
        }
    }
}
