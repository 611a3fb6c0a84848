use crate::config::{read_per_axis_counts, read_per_axis_reals, ConfigReader};
use crate::error::DiscretizationError;
use crate::mesh::MeshTopology;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Geometry of a structured mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructuredGeometry {
    /// Axis-aligned box of the given extent, uniformly subdivided.
    Regular { origin: Point3<f64>, extent: Vec<f64> },
    /// Arbitrary node positions, one per node in natural order.
    Deformable { node_positions: Vec<Point3<f64>> },
}

/// A mesh whose nodes and elements are numbered by their Cartesian indices.
///
/// With $p$ the basis order and $n_k$ elements along axis $k$, there are $N_k = p n_k + 1$
/// nodes along axis $k$. Node $(a, b, c)$ has number $a + N_0 (b + N_1 c)$ and element
/// $(i, j, k)$ has number $i + n_0 (j + n_1 k)$. Nothing is stored besides the counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredMesh {
    n_elements_per_axis: Vec<usize>,
    order: usize,
    geometry: StructuredGeometry,
}

fn check_axis_counts(n_elements_per_axis: &[usize]) -> Result<(), DiscretizationError> {
    if !(1..=3).contains(&n_elements_per_axis.len()) {
        return Err(DiscretizationError::config(
            "nElements",
            format!("expected 1 to 3 axes, got {}", n_elements_per_axis.len()),
        ));
    }
    if n_elements_per_axis.iter().any(|&n| n == 0) {
        return Err(DiscretizationError::config("nElements", "every axis needs at least one element"));
    }
    Ok(())
}

impl StructuredMesh {
    /// A uniformly subdivided box with one corner at the origin.
    pub fn regular(n_elements_per_axis: &[usize], extent: &[f64], order: usize) -> Result<Self, DiscretizationError> {
        check_axis_counts(n_elements_per_axis)?;
        if extent.len() != n_elements_per_axis.len() {
            return Err(DiscretizationError::config(
                "physicalExtent",
                format!(
                    "expected {} entries to match nElements, got {}",
                    n_elements_per_axis.len(),
                    extent.len()
                ),
            ));
        }
        if extent.iter().any(|&l| !(l > 0.0)) {
            return Err(DiscretizationError::config("physicalExtent", "extents must be positive"));
        }
        Ok(Self {
            n_elements_per_axis: n_elements_per_axis.to_vec(),
            order,
            geometry: StructuredGeometry::Regular {
                origin: Point3::origin(),
                extent: extent.to_vec(),
            },
        })
    }

    /// A structured mesh with explicitly given node positions in natural node order.
    pub fn deformable(
        n_elements_per_axis: &[usize],
        order: usize,
        node_positions: Vec<Point3<f64>>,
    ) -> Result<Self, DiscretizationError> {
        check_axis_counts(n_elements_per_axis)?;
        let mut mesh = Self {
            n_elements_per_axis: n_elements_per_axis.to_vec(),
            order,
            geometry: StructuredGeometry::Deformable {
                node_positions: Vec::new(),
            },
        };
        mesh.set_node_positions(node_positions)?;
        Ok(mesh)
    }

    /// Reads `nElements`, and either `nodePositions` or `physicalExtent` (default 1 per axis).
    pub fn from_settings(config: &impl ConfigReader, order: usize) -> eyre::Result<Self> {
        let n_elements = read_per_axis_counts(config, "nElements")?
            .ok_or_else(|| DiscretizationError::config(config.key_path("nElements"), "required key is missing"))?;
        let with_key = |err: DiscretizationError, key: &str| match err {
            DiscretizationError::Config { message, .. } => DiscretizationError::config(config.key_path(key), message),
            other => other,
        };

        if config.has_key("nodePositions") {
            let positions: Vec<Vec<f64>> = config.get_required("nodePositions")?;
            let positions = positions
                .into_iter()
                .map(|p| match p.as_slice() {
                    [x] => Ok(Point3::new(*x, 0.0, 0.0)),
                    [x, y] => Ok(Point3::new(*x, *y, 0.0)),
                    [x, y, z] => Ok(Point3::new(*x, *y, *z)),
                    _ => Err(DiscretizationError::config(
                        config.key_path("nodePositions"),
                        "node positions must have 1 to 3 coordinates",
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Self::deformable(&n_elements, order, positions).map_err(|err| with_key(err, "nodePositions"))?)
        } else {
            let extent = match read_per_axis_reals(config, "physicalExtent")? {
                // A single number applies to every axis
                Some(extent) if config.value("physicalExtent").map_or(false, |v| v.is_number()) => {
                    vec![extent[0]; n_elements.len()]
                }
                Some(extent) => extent,
                None => {
                    log::debug!("no physicalExtent given for {}, using unit extent", config.section_path());
                    vec![1.0; n_elements.len()]
                }
            };
            Ok(Self::regular(&n_elements, &extent, order).map_err(|err| with_key(err, "physicalExtent"))?)
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn geometry(&self) -> &StructuredGeometry {
        &self.geometry
    }

    pub fn is_regular(&self) -> bool {
        matches!(self.geometry, StructuredGeometry::Regular { .. })
    }

    pub fn n_elements_per_axis(&self) -> &[usize] {
        &self.n_elements_per_axis
    }

    pub fn n_nodes_per_axis(&self) -> Vec<usize> {
        self.n_elements_per_axis
            .iter()
            .map(|n| self.order * n + 1)
            .collect()
    }

    /// Element spacing along each axis of a regular mesh.
    pub fn element_lengths(&self) -> Option<Vec<f64>> {
        match &self.geometry {
            StructuredGeometry::Regular { extent, .. } => Some(
                extent
                    .iter()
                    .zip(&self.n_elements_per_axis)
                    .map(|(l, n)| l / *n as f64)
                    .collect(),
            ),
            StructuredGeometry::Deformable { .. } => None,
        }
    }

    pub fn element_coordinates(&self, element: usize) -> [usize; 3] {
        let mut coords = [0; 3];
        let mut remainder = element;
        for (c, n) in coords.iter_mut().zip(&self.n_elements_per_axis) {
            *c = remainder % n;
            remainder /= n;
        }
        coords
    }

    pub fn element_index(&self, coords: [usize; 3]) -> usize {
        self.n_elements_per_axis
            .iter()
            .zip(coords)
            .rev()
            .fold(0, |index, (n, c)| index * n + c)
    }

    pub fn node_coordinates(&self, node: usize) -> [usize; 3] {
        let mut coords = [0; 3];
        let mut remainder = node;
        for (c, n) in coords.iter_mut().zip(self.n_nodes_per_axis()) {
            *c = remainder % n;
            remainder /= n;
        }
        coords
    }

    pub fn node_index(&self, coords: [usize; 3]) -> usize {
        self.n_nodes_per_axis()
            .iter()
            .zip(coords)
            .rev()
            .fold(0, |index, (n, c)| index * n + c)
    }

    /// Replaces the node positions, turning a regular mesh into a deformable one.
    pub fn set_node_positions(&mut self, node_positions: Vec<Point3<f64>>) -> Result<(), DiscretizationError> {
        let expected = self.n_nodes();
        if node_positions.len() != expected {
            return Err(DiscretizationError::config(
                "nodePositions",
                format!("expected {expected} node positions, got {}", node_positions.len()),
            ));
        }
        self.geometry = StructuredGeometry::Deformable { node_positions };
        Ok(())
    }
}

impl MeshTopology for StructuredMesh {
    fn dim(&self) -> usize {
        self.n_elements_per_axis.len()
    }

    fn n_elements(&self) -> usize {
        self.n_elements_per_axis.iter().product()
    }

    fn n_nodes(&self) -> usize {
        self.n_nodes_per_axis().iter().product()
    }

    fn n_dofs(&self) -> usize {
        self.n_nodes()
    }

    fn nodes_per_element(&self) -> usize {
        (self.order + 1).pow(self.dim() as u32)
    }

    fn node_no(&self, element: usize, local_node: usize) -> usize {
        let element_coords = self.element_coordinates(element);
        let p = self.order;
        let mut node_coords = [0; 3];
        let mut remainder = local_node;
        for k in 0..self.dim() {
            node_coords[k] = p * element_coords[k] + remainder % (p + 1);
            remainder /= p + 1;
        }
        self.node_index(node_coords)
    }

    fn dof_no(&self, element: usize, local_dof: usize) -> usize {
        self.node_no(element, local_dof)
    }

    fn node_dofs(&self, node: usize) -> Vec<usize> {
        vec![node]
    }

    fn dof_position(&self, dof: usize) -> Option<Point3<f64>> {
        match &self.geometry {
            StructuredGeometry::Regular { origin, extent } => {
                let coords = self.node_coordinates(dof);
                let mut offset = Vector3::zeros();
                for k in 0..self.dim() {
                    let n_intervals = (self.order * self.n_elements_per_axis[k]) as f64;
                    offset[k] = extent[k] * coords[k] as f64 / n_intervals;
                }
                Some(origin + offset)
            }
            StructuredGeometry::Deformable { node_positions } => node_positions.get(dof).copied(),
        }
    }
}
