//! Mesh topologies.
//!
//! Two kinds of meshes are supported, both behind the [`MeshTopology`] interface:
//! [`StructuredMesh`], whose numbering is a closed-form function of Cartesian indices, and
//! [`UnstructuredMesh`], whose connectivity is read from element/node description files.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

mod manager;
mod structured;
mod unstructured;

pub use manager::*;
pub use structured::*;
pub use unstructured::*;

/// Element-to-node and element-to-dof numbering of a mesh.
///
/// All indices are global and 0-based. Implementations must be pure: the same query always
/// gives the same answer.
pub trait MeshTopology {
    /// Dimension of the reference element.
    fn dim(&self) -> usize;

    fn n_elements(&self) -> usize;

    fn n_nodes(&self) -> usize;

    /// Number of dofs, which exceeds the number of nodes when nodes carry several versions.
    fn n_dofs(&self) -> usize;

    fn nodes_per_element(&self) -> usize;

    fn node_no(&self, element: usize, local_node: usize) -> usize;

    fn dof_no(&self, element: usize, local_dof: usize) -> usize;

    /// All dofs of a node, in ascending order.
    fn node_dofs(&self, node: usize) -> Vec<usize>;

    /// Physical position of a dof, if the mesh has a geometry.
    fn dof_position(&self, dof: usize) -> Option<Point3<f64>>;

    /// Physical position of a node, taken from its first dof.
    fn node_position(&self, node: usize) -> Option<Point3<f64>> {
        self.node_dofs(node)
            .first()
            .and_then(|&dof| self.dof_position(dof))
    }

    fn populate_element_dofs(&self, output: &mut [usize], element: usize) {
        for (local_dof, dof) in output.iter_mut().enumerate() {
            *dof = self.dof_no(element, local_dof);
        }
    }
}

/// The closed set of supported mesh kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshKind {
    Structured(StructuredMesh),
    Unstructured(UnstructuredMesh),
}

impl MeshKind {
    pub fn as_structured(&self) -> Option<&StructuredMesh> {
        match self {
            MeshKind::Structured(mesh) => Some(mesh),
            MeshKind::Unstructured(_) => None,
        }
    }

    pub fn as_unstructured(&self) -> Option<&UnstructuredMesh> {
        match self {
            MeshKind::Structured(_) => None,
            MeshKind::Unstructured(mesh) => Some(mesh),
        }
    }

    pub fn order(&self) -> usize {
        match self {
            MeshKind::Structured(mesh) => mesh.order(),
            MeshKind::Unstructured(mesh) => mesh.order(),
        }
    }

    fn topology(&self) -> &dyn MeshTopology {
        match self {
            MeshKind::Structured(mesh) => mesh,
            MeshKind::Unstructured(mesh) => mesh,
        }
    }
}

impl From<StructuredMesh> for MeshKind {
    fn from(mesh: StructuredMesh) -> Self {
        MeshKind::Structured(mesh)
    }
}

impl From<UnstructuredMesh> for MeshKind {
    fn from(mesh: UnstructuredMesh) -> Self {
        MeshKind::Unstructured(mesh)
    }
}

impl MeshTopology for MeshKind {
    fn dim(&self) -> usize {
        self.topology().dim()
    }

    fn n_elements(&self) -> usize {
        self.topology().n_elements()
    }

    fn n_nodes(&self) -> usize {
        self.topology().n_nodes()
    }

    fn n_dofs(&self) -> usize {
        self.topology().n_dofs()
    }

    fn nodes_per_element(&self) -> usize {
        self.topology().nodes_per_element()
    }

    fn node_no(&self, element: usize, local_node: usize) -> usize {
        self.topology().node_no(element, local_node)
    }

    fn dof_no(&self, element: usize, local_dof: usize) -> usize {
        self.topology().dof_no(element, local_dof)
    }

    fn node_dofs(&self, node: usize) -> Vec<usize> {
        self.topology().node_dofs(node)
    }

    fn dof_position(&self, dof: usize) -> Option<Point3<f64>> {
        self.topology().dof_position(dof)
    }
}

/// A face of a structured block, used to identify the neighbouring ghost mesh behind it.
///
/// Faces are numbered `2 * axis + side`, with side 0 at the lower end of the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Face {
    XMinus = 0,
    XPlus = 1,
    YMinus = 2,
    YPlus = 3,
    ZMinus = 4,
    ZPlus = 5,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::XMinus,
        Face::XPlus,
        Face::YMinus,
        Face::YPlus,
        Face::ZMinus,
        Face::ZPlus,
    ];

    pub fn from_index(index: usize) -> Option<Face> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}
