use crate::io::exfile::{ElementDescription, ElementNode, NodeDescription, NodeRecord};
use crate::mesh::{MeshTopology, StructuredMesh, UnstructuredMesh, GEOMETRY_FIELD};
use ::proptest::prelude::*;
use nalgebra::Point3;
use std::cmp::max;

pub fn point3() -> impl Strategy<Value = Point3<f64>> {
    // Keep coordinates small, otherwise mapped positions quickly lose all precision
    let range = -10.0..10.0;
    [range.clone(), range.clone(), range].prop_map(|[x, y, z]| Point3::new(x, y, z))
}

/// A point in the interior of the reference element $[0, 1]^D$, zero-padded to three coordinates.
pub fn reference_point(dim: usize) -> impl Strategy<Value = [f64; 3]> {
    let range = 0.0..=1.0;
    [range.clone(), range.clone(), range].prop_map(move |mut xi| {
        for coordinate in xi.iter_mut().skip(dim) {
            *coordinate = 0.0;
        }
        xi
    })
}

// Element counts per axis with at most `max_elements` elements in total
fn element_counts_strategy(dim: usize, max_elements: usize) -> impl Strategy<Value = Vec<usize>> {
    let max_per_axis = max(1, (max_elements as f64).powf(1.0 / dim as f64).floor() as usize);
    prop::collection::vec(1..=max_per_axis, dim)
}

/// Regular structured meshes of dimension 1 to `max_dim`, linear or quadratic.
pub fn structured_mesh_strategy(max_dim: usize, max_elements: usize) -> impl Strategy<Value = StructuredMesh> {
    (1..=max(1, max_dim.min(3)), 1..=2usize)
        .prop_flat_map(move |(dim, order)| {
            let extent = prop::collection::vec(0.5..4.0, dim);
            (element_counts_strategy(dim, max_elements), extent, Just(order))
        })
        .prop_filter_map("invalid mesh parameters", |(counts, extent, order)| {
            StructuredMesh::regular(&counts, &extent, order).ok()
        })
}

/// Unstructured meshes with the connectivity and geometry of a regular structured mesh, where
/// every node has one or two versions and every element reference picks one of them.
pub fn unstructured_mesh_strategy(max_dim: usize, max_elements: usize) -> impl Strategy<Value = UnstructuredMesh> {
    structured_mesh_strategy(max_dim, max_elements)
        .prop_flat_map(|mesh| {
            let n_references = mesh.n_elements() * mesh.nodes_per_element();
            let versions = prop::collection::vec(1..=2usize, mesh.n_nodes());
            let choices = prop::collection::vec(0..2usize, n_references);
            (Just(mesh), versions, choices)
        })
        .prop_filter_map("invalid mesh description", |(mesh, versions, choices)| {
            let nodes_per_element = mesh.nodes_per_element();
            let elements = (0..mesh.n_elements())
                .map(|element| {
                    (0..nodes_per_element)
                        .map(|local| {
                            let node = mesh.node_no(element, local);
                            let choice = choices[element * nodes_per_element + local];
                            ElementNode {
                                version: choice % versions[node],
                                ..ElementNode::new(node)
                            }
                        })
                        .collect()
                })
                .collect();
            let dim = mesh.dim();
            let nodes = (0..mesh.n_nodes())
                .map(|node| {
                    let position = mesh.node_position(node)?;
                    // Component-major, the same position for every version
                    let values = (0..dim)
                        .flat_map(|c| std::iter::repeat(position[c]).take(versions[node]))
                        .collect();
                    Some(NodeRecord {
                        versions: versions[node],
                        values: vec![values],
                        line: 0,
                    })
                })
                .collect::<Option<Vec<_>>>()?;
            let elements = ElementDescription {
                dim,
                order: mesh.order(),
                elements,
                lines: Vec::new(),
            };
            let nodes = NodeDescription {
                fields: vec![(GEOMETRY_FIELD.to_string(), dim)],
                nodes,
            };
            UnstructuredMesh::from_descriptions(elements, nodes, &Default::default()).ok()
        })
}
