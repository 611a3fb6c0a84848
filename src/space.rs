//! Function spaces: a mesh together with a Lagrange basis.

use crate::basis::LagrangeBasis;
use crate::config::ConfigReader;
use crate::error::DiscretizationError;
use crate::geometry::Jacobian;
use crate::mesh::{Face, MeshKind, MeshTopology, StructuredMesh, UnstructuredMesh};
use itertools::Itertools;
use log::{info, warn};
use nalgebra::{Point3, Vector3};
use std::fmt;
use std::sync::Arc;

mod find_position;

pub use find_position::*;

/// Compressed adjacency lists `index -> elements`.
#[derive(Debug, Clone, PartialEq)]
struct ElementAdjacency {
    offsets: Vec<usize>,
    elements: Vec<usize>,
}

impl ElementAdjacency {
    /// Builds the adjacency from the `(key, element)` incidences reported by `visit`.
    fn build(n_keys: usize, n_elements: usize, mut visit: impl FnMut(usize, &mut dyn FnMut(usize))) -> Self {
        let mut lists = vec![Vec::new(); n_keys];
        for element in 0..n_elements {
            visit(element, &mut |key| lists[key].push(element));
        }
        let mut offsets = Vec::with_capacity(n_keys + 1);
        let mut elements = Vec::new();
        offsets.push(0);
        for mut list in lists {
            list.sort_unstable();
            list.dedup();
            elements.extend(list);
            offsets.push(elements.len());
        }
        Self { offsets, elements }
    }

    fn get(&self, key: usize) -> &[usize] {
        &self.elements[self.offsets[key]..self.offsets[key + 1]]
    }
}

/// A mesh equipped with a Lagrange basis of matching order.
///
/// Besides the numbering queries of [`MeshTopology`], a function space knows the basis
/// functions on each element, can compute element Jacobians and locate physical points.
/// Up to six neighbouring function spaces can be attached as ghost meshes, one per face,
/// so that point location can continue across a subdomain boundary.
pub struct FunctionSpace {
    name: Option<String>,
    mesh: MeshKind,
    basis: LagrangeBasis,
    dof_elements: ElementAdjacency,
    node_elements: ElementAdjacency,
    ghost_meshes: [Option<Arc<FunctionSpace>>; 6],
}

impl fmt::Debug for FunctionSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpace")
            .field("name", &self.name)
            .field("mesh", &self.mesh)
            .field("basis", &self.basis)
            .field(
                "ghost_meshes",
                &self
                    .ghost_meshes
                    .iter()
                    .map(|ghost| ghost.as_ref().map(|g| g.name.clone()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl FunctionSpace {
    pub fn new(mesh: impl Into<MeshKind>) -> Result<Self, DiscretizationError> {
        let mesh = mesh.into();
        let basis = LagrangeBasis::new(mesh.order())?;
        let dim = mesh.dim();
        if mesh.nodes_per_element() != basis.nodes_per_element(dim) {
            return Err(DiscretizationError::InvalidState(format!(
                "mesh has {} nodes per element, but a {dim}D lagrange{} basis needs {}",
                mesh.nodes_per_element(),
                basis.order(),
                basis.nodes_per_element(dim)
            )));
        }

        let n_local = mesh.nodes_per_element();
        let dof_elements = ElementAdjacency::build(mesh.n_dofs(), mesh.n_elements(), |element, push| {
            for local in 0..n_local {
                push(mesh.dof_no(element, local));
            }
        });
        let node_elements = ElementAdjacency::build(mesh.n_nodes(), mesh.n_elements(), |element, push| {
            for local in 0..n_local {
                push(mesh.node_no(element, local));
            }
        });

        info!(
            "Created {dim}D lagrange{} function space with {} elements, {} nodes and {} dofs",
            basis.order(),
            mesh.n_elements(),
            mesh.n_nodes(),
            mesh.n_dofs()
        );

        Ok(Self {
            name: None,
            mesh,
            basis,
            dof_elements,
            node_elements,
            ghost_meshes: Default::default(),
        })
    }

    /// Creates a function space from a mesh section.
    ///
    /// A section with `exelemFile` and `exnodeFile` describes an unstructured mesh. Otherwise the
    /// mesh is structured, with `nElements`, optional `physicalExtent` or `nodePositions` and
    /// the basis order `basisOrder` (default 1).
    pub fn from_settings(config: &impl ConfigReader) -> eyre::Result<Self> {
        let order: usize = config.get_or("basisOrder", 1)?;
        let mesh: MeshKind = if config.has_key("exelemFile") || config.has_key("exnodeFile") {
            let mesh = UnstructuredMesh::from_settings(config)?;
            if config.has_key("basisOrder") && mesh.order() != order {
                warn!(
                    "{} is ignored, the mesh file prescribes order {}",
                    config.key_path("basisOrder"),
                    mesh.order()
                );
            }
            mesh.into()
        } else {
            LagrangeBasis::new(order).map_err(|err| match err {
                DiscretizationError::Config { message, .. } => {
                    DiscretizationError::config(config.key_path("basisOrder"), message)
                }
                other => other,
            })?;
            StructuredMesh::from_settings(config, order)?.into()
        };
        Ok(Self::new(mesh)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn mesh(&self) -> &MeshKind {
        &self.mesh
    }

    pub fn basis(&self) -> &LagrangeBasis {
        &self.basis
    }

    pub fn dofs_per_element(&self) -> usize {
        self.basis.dofs_per_element(self.dim())
    }

    pub fn element_dofs(&self, element: usize) -> Vec<usize> {
        let mut dofs = vec![0; self.dofs_per_element()];
        self.populate_element_dofs(&mut dofs, element);
        dofs
    }

    /// Elements containing the given dof, in ascending order.
    pub fn dof_elements(&self, dof: usize) -> &[usize] {
        self.dof_elements.get(dof)
    }

    /// Elements containing the given node, in ascending order.
    pub fn node_elements(&self, node: usize) -> &[usize] {
        self.node_elements.get(node)
    }

    /// Elements sharing at least one node with `element`, in ascending order.
    pub fn element_neighbours(&self, element: usize) -> Vec<usize> {
        (0..self.nodes_per_element())
            .flat_map(|local| self.node_elements(self.node_no(element, local)).iter().copied())
            .filter(|&other| other != element)
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Positions of the dofs of an element, in local order.
    pub fn element_dof_positions(&self, element: usize) -> Result<Vec<Point3<f64>>, DiscretizationError> {
        (0..self.dofs_per_element())
            .map(|local| {
                self.dof_position(self.dof_no(element, local)).ok_or_else(|| {
                    DiscretizationError::InvalidState(format!(
                        "element {element} has no geometry: the mesh has no geometry field"
                    ))
                })
            })
            .collect()
    }

    /// Maps a reference point to physical space, given the element's dof positions.
    pub fn map_reference_point(&self, positions: &[Point3<f64>], xi: &[f64]) -> Point3<f64> {
        let dim = self.dim();
        let x = positions
            .iter()
            .enumerate()
            .fold(Vector3::zeros(), |x, (local, position)| {
                x + position.coords * self.basis.evaluate(dim, local, xi)
            });
        Point3::from(x)
    }

    /// Jacobian at `xi` of the isoparametric map defined by the element's dof positions.
    pub fn jacobian_from_positions(&self, positions: &[Point3<f64>], xi: &[f64]) -> Jacobian {
        let dim = self.dim();
        let mut tangents = [Vector3::zeros(); 3];
        for (local, position) in positions.iter().enumerate() {
            let gradient = self.basis.gradient(dim, local, xi);
            for k in 0..dim {
                tangents[k] += position.coords * gradient[k];
            }
        }
        Jacobian::from_tangents(&tangents[..dim])
    }

    pub fn compute_jacobian(&self, element: usize, xi: &[f64]) -> Result<Jacobian, DiscretizationError> {
        let positions = self.element_dof_positions(element)?;
        Ok(self.jacobian_from_positions(&positions, xi))
    }

    /// Attaches the function space of the neighbouring subdomain behind `face`.
    pub fn set_ghost_mesh(&mut self, face: Face, ghost: Arc<FunctionSpace>) {
        self.ghost_meshes[face.index()] = Some(ghost);
    }

    pub fn with_ghost_mesh(mut self, face: Face, ghost: Arc<FunctionSpace>) -> Self {
        self.set_ghost_mesh(face, ghost);
        self
    }

    pub fn ghost_mesh(&self, face: Face) -> Option<&Arc<FunctionSpace>> {
        self.ghost_meshes[face.index()].as_ref()
    }
}

impl MeshTopology for FunctionSpace {
    fn dim(&self) -> usize {
        self.mesh.dim()
    }

    fn n_elements(&self) -> usize {
        self.mesh.n_elements()
    }

    fn n_nodes(&self) -> usize {
        self.mesh.n_nodes()
    }

    fn n_dofs(&self) -> usize {
        self.mesh.n_dofs()
    }

    fn nodes_per_element(&self) -> usize {
        self.mesh.nodes_per_element()
    }

    fn node_no(&self, element: usize, local_node: usize) -> usize {
        self.mesh.node_no(element, local_node)
    }

    fn dof_no(&self, element: usize, local_dof: usize) -> usize {
        self.mesh.dof_no(element, local_dof)
    }

    fn node_dofs(&self, node: usize) -> Vec<usize> {
        self.mesh.node_dofs(node)
    }

    fn dof_position(&self, dof: usize) -> Option<Point3<f64>> {
        self.mesh.dof_position(dof)
    }
}
