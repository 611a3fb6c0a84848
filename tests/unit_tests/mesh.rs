use super::exfile::{TWO_QUADS_EXELEM, TWO_QUADS_EXNODE, VERSIONED_EXELEM, VERSIONED_EXNODE};
use distfem::config::Settings;
use distfem::error::DiscretizationError;
use distfem::io::exfile::{ElementDescription, ElementNode, NodeDescription, NodeRecord};
use distfem::mesh::{
    Face, MeshKind, MeshManager, MeshTopology, StructuredGeometry, StructuredMesh, UnstructuredMesh, UnstructuredMeshOptions,
};
use distfem::proptest::{structured_mesh_strategy, unstructured_mesh_strategy};
use matrixcompare::assert_scalar_eq;
use nalgebra::Point3;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn element_dofs(mesh: &dyn MeshTopology, element: usize) -> Vec<usize> {
    let mut dofs = vec![0; mesh.nodes_per_element()];
    mesh.populate_element_dofs(&mut dofs, element);
    dofs
}

#[test]
fn structured_numbering_in_2d() {
    let mesh = StructuredMesh::regular(&[2, 3], &[2.0, 3.0], 1).unwrap();
    assert_eq!(mesh.dim(), 2);
    assert_eq!(mesh.n_elements(), 6);
    assert_eq!(mesh.n_nodes_per_axis(), vec![3, 4]);
    assert_eq!(mesh.n_nodes(), 12);
    assert_eq!(mesh.n_dofs(), 12);
    assert_eq!(mesh.nodes_per_element(), 4);

    assert_eq!(mesh.element_coordinates(4), [0, 2, 0]);
    assert_eq!(mesh.element_index([1, 1, 0]), 3);
    assert_eq!(element_dofs(&mesh, 0), vec![0, 1, 3, 4]);
    assert_eq!(element_dofs(&mesh, 4), vec![6, 7, 9, 10]);
    assert_eq!(element_dofs(&mesh, 5), vec![7, 8, 10, 11]);
    assert_eq!(mesh.node_dofs(7), vec![7]);
}

#[test]
fn structured_numbering_of_quadratic_elements() {
    let mesh = StructuredMesh::regular(&[2], &[1.0], 2).unwrap();
    assert_eq!(mesh.n_nodes(), 5);
    assert_eq!(element_dofs(&mesh, 1), vec![2, 3, 4]);

    let mesh = StructuredMesh::regular(&[1, 1, 1], &[1.0, 1.0, 1.0], 2).unwrap();
    assert_eq!(mesh.n_nodes(), 27);
    assert_eq!(mesh.nodes_per_element(), 27);
    assert_eq!(element_dofs(&mesh, 0), (0..27).collect::<Vec<_>>());
}

#[test]
fn structured_node_positions() {
    let mesh = StructuredMesh::regular(&[5], &[4.0], 1).unwrap();
    assert_eq!(mesh.element_lengths(), Some(vec![0.8]));
    let position = mesh.dof_position(2).unwrap();
    assert_scalar_eq!(position.x, 1.6, comp = abs, tol = 1e-14);
    assert_eq!(position.y, 0.0);

    let mesh = StructuredMesh::regular(&[2, 2], &[1.0, 2.0], 2).unwrap();
    // Node (3, 1) of the 5 x 5 node grid
    let position = mesh.node_position(8).unwrap();
    assert_scalar_eq!(position.x, 0.75, comp = abs, tol = 1e-14);
    assert_scalar_eq!(position.y, 0.5, comp = abs, tol = 1e-14);
}

#[test]
fn deformable_structured_mesh() {
    let positions = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.2, 0.0),
        Point3::new(0.1, 1.0, 0.0),
        Point3::new(1.2, 1.1, 0.0),
    ];
    let mesh = StructuredMesh::deformable(&[1, 1], 1, positions.clone()).unwrap();
    assert!(!mesh.is_regular());
    assert_eq!(mesh.element_lengths(), None);
    assert_eq!(mesh.dof_position(3), Some(positions[3]));

    let error = StructuredMesh::deformable(&[1, 1], 1, positions[..3].to_vec()).unwrap_err();
    assert!(matches!(error, DiscretizationError::Config { key, .. } if key == "nodePositions"));

    let mut mesh = StructuredMesh::regular(&[1, 1], &[1.0, 1.0], 1).unwrap();
    mesh.set_node_positions(positions).unwrap();
    assert!(matches!(mesh.geometry(), StructuredGeometry::Deformable { .. }));
}

#[test]
fn invalid_structured_meshes() {
    assert!(StructuredMesh::regular(&[], &[], 1).is_err());
    assert!(StructuredMesh::regular(&[1, 2, 3, 4], &[1.0; 4], 1).is_err());
    assert!(StructuredMesh::regular(&[2, 0], &[1.0, 1.0], 1).is_err());
    assert!(StructuredMesh::regular(&[2, 2], &[1.0], 1).is_err());
    assert!(StructuredMesh::regular(&[2], &[-1.0], 1).is_err());
}

#[test]
fn structured_mesh_from_settings() {
    let settings = Settings::from_json_str(r#"{ "nElements": [5], "physicalExtent": 4.0 }"#).unwrap();
    let mesh = StructuredMesh::from_settings(&settings, 1).unwrap();
    assert_eq!(mesh.element_lengths(), Some(vec![0.8]));

    let settings = Settings::from_json_str(r#"{ "nElements": [2, 3] }"#).unwrap();
    let mesh = StructuredMesh::from_settings(&settings, 2).unwrap();
    assert_eq!(mesh.n_nodes_per_axis(), vec![5, 7]);
    assert_eq!(mesh.element_lengths(), Some(vec![0.5, 1.0 / 3.0]));

    let settings = Settings::from_json_str(r#"{ "nElements": [2, 4], "physicalExtent": 2.0 }"#).unwrap();
    let mesh = StructuredMesh::from_settings(&settings, 1).unwrap();
    assert_eq!(mesh.element_lengths(), Some(vec![1.0, 0.5]));

    let settings = Settings::from_json_str(r#"{ "nElements": 1, "nodePositions": [[0.0], [2.0]] }"#).unwrap();
    let mesh = StructuredMesh::from_settings(&settings, 1).unwrap();
    assert_eq!(mesh.dof_position(1), Some(Point3::new(2.0, 0.0, 0.0)));

    let settings = Settings::from_json_str(r#"{ "physicalExtent": 4.0 }"#).unwrap();
    let error = StructuredMesh::from_settings(&settings, 1).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<DiscretizationError>(),
        Some(DiscretizationError::Config { key, .. }) if key == "nElements"
    ));

    let settings = Settings::from_json_str(r#"{ "nElements": [2, 2], "physicalExtent": [1.0] }"#).unwrap();
    let error = StructuredMesh::from_settings(&settings, 1).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<DiscretizationError>(),
        Some(DiscretizationError::Config { key, .. }) if key == "physicalExtent"
    ));
}

#[test]
fn unstructured_mesh_with_versions() {
    let mesh = UnstructuredMesh::from_strs(VERSIONED_EXELEM, VERSIONED_EXNODE, &Default::default()).unwrap();
    assert_eq!(mesh.dim(), 2);
    assert_eq!(mesh.n_elements(), 2);
    assert_eq!(mesh.n_nodes(), 6);
    assert_eq!(mesh.n_dofs(), 7);
    assert_eq!(mesh.node_versions(1), 2);
    assert_eq!(mesh.node_dofs(1), vec![1, 2]);

    assert_eq!(element_dofs(&mesh, 0), vec![0, 1, 4, 5]);
    assert_eq!(element_dofs(&mesh, 1), vec![2, 3, 5, 6]);
    assert_eq!(mesh.node_no(1, 0), 1);

    let temperature = mesh.field("temperature").unwrap();
    assert_eq!(temperature.n_components(), 1);
    assert_eq!(temperature.dof_values(2), &[20.0]);
    // Both versions of node 2 sit at the same position
    assert_eq!(mesh.dof_position(1), mesh.dof_position(2));
}

#[test]
fn scale_factors_are_absorbed_into_dof_values() {
    let kept = UnstructuredMesh::from_strs(
        VERSIONED_EXELEM,
        VERSIONED_EXNODE,
        &UnstructuredMeshOptions {
            keep_scale_factors: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(!kept.scale_factors_eliminated());
    assert_eq!(kept.element_nodes(0)[0].scale_factor, 2.0);
    assert_eq!(kept.field("temperature").unwrap().dof_values(0), &[1.0]);

    let mut eliminated = kept.clone();
    eliminated.eliminate_scale_factors();
    assert!(eliminated.scale_factors_eliminated());
    assert_eq!(eliminated.element_nodes(0)[0].scale_factor, 1.0);
    assert_eq!(eliminated.field("temperature").unwrap().dof_values(0), &[2.0]);
    assert_eq!(eliminated.field("temperature").unwrap().dof_values(1), &[2.0]);

    let once = eliminated.clone();
    eliminated.eliminate_scale_factors();
    assert_eq!(eliminated, once);

    let default = UnstructuredMesh::from_strs(VERSIONED_EXELEM, VERSIONED_EXNODE, &Default::default()).unwrap();
    assert_eq!(default, once);
}

#[test]
fn remapping_field_variables() {
    let remap: BTreeMap<String, String> = [
        ("temperature".to_string(), "u".to_string()),
        ("pressure".to_string(), "p".to_string()),
    ]
    .into_iter()
    .collect();
    let options = UnstructuredMeshOptions {
        remap,
        ..Default::default()
    };
    let mesh = UnstructuredMesh::from_strs(TWO_QUADS_EXELEM, TWO_QUADS_EXNODE, &options).unwrap();
    assert!(mesh.field("temperature").is_none());
    assert_eq!(mesh.field("u").unwrap().dof_values(2), &[3.5]);

    let mut mesh = UnstructuredMesh::from_strs(TWO_QUADS_EXELEM, TWO_QUADS_EXNODE, &Default::default()).unwrap();
    let clash: BTreeMap<String, String> = [("temperature".to_string(), "geometry".to_string())]
        .into_iter()
        .collect();
    assert!(matches!(
        mesh.remap_field_variables(&clash),
        Err(DiscretizationError::Config { key, .. }) if key == "remap"
    ));

    let rename_geometry: BTreeMap<String, String> = [("geometry".to_string(), "coordinates".to_string())]
        .into_iter()
        .collect();
    mesh.remap_field_variables(&rename_geometry).unwrap();
    assert!(mesh.geometry_field().is_none());
    assert_eq!(mesh.dof_position(0), None);
}

#[test]
fn geometry_field_can_be_disabled() {
    let options = UnstructuredMeshOptions {
        no_geometry_field: true,
        ..Default::default()
    };
    let mesh = UnstructuredMesh::from_strs(TWO_QUADS_EXELEM, TWO_QUADS_EXNODE, &options).unwrap();
    assert!(mesh.geometry_field().is_none());
    assert_eq!(mesh.fields().len(), 1);
}

#[test]
fn invalid_node_references_are_parse_errors() {
    let exelem = "Dimension: 1\nElement: 1\n  Nodes: 1 7\n";
    let exnode = "Fields: geometry=1\nNode: 1\n  geometry: 0\nNode: 2\n  geometry: 1\n";
    let error = UnstructuredMesh::from_strs(exelem, exnode, &Default::default()).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<DiscretizationError>(),
        Some(DiscretizationError::Parse { line: 2, .. })
    ));

    let exelem = "Dimension: 1\nElement: 1\n  Nodes: 1 2\n  Versions: 1 2\n";
    assert!(UnstructuredMesh::from_strs(exelem, exnode, &Default::default()).is_err());
}

fn two_node_line() -> NodeDescription {
    NodeDescription {
        fields: vec![("geometry".to_string(), 1)],
        nodes: vec![
            NodeRecord {
                versions: 1,
                values: vec![vec![0.0]],
                line: 0,
            },
            NodeRecord {
                versions: 1,
                values: vec![vec![1.0]],
                line: 0,
            },
        ],
    }
}

fn line_elements(elements: Vec<Vec<ElementNode>>, lines: Vec<usize>) -> ElementDescription {
    ElementDescription {
        dim: 1,
        order: 1,
        elements,
        lines,
    }
}

fn parse_error_message(result: Result<UnstructuredMesh, DiscretizationError>) -> String {
    match result {
        Err(DiscretizationError::Parse { message, .. }) => message,
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn generated_descriptions_are_validated_without_line_numbers() {
    let options = UnstructuredMeshOptions::default();
    // No line numbers at all
    let elements = line_elements(vec![vec![ElementNode::new(0), ElementNode::new(6)]], vec![]);
    let message = parse_error_message(UnstructuredMesh::from_descriptions(elements, two_node_line(), &options));
    assert!(message.contains("node 7"), "{message}");

    // Fewer line numbers than elements: the second element is still checked
    let elements = line_elements(
        vec![
            vec![ElementNode::new(0), ElementNode::new(1)],
            vec![ElementNode::new(1), ElementNode::new(2)],
        ],
        vec![3],
    );
    assert!(UnstructuredMesh::from_descriptions(elements, two_node_line(), &options).is_err());

    let elements = line_elements(vec![vec![ElementNode::new(0), ElementNode::new(1)]], vec![]);
    let mesh = UnstructuredMesh::from_descriptions(elements, two_node_line(), &options).unwrap();
    assert_eq!(mesh.n_dofs(), 2);
    assert_eq!(mesh.dof_no(0, 1), 1);
}

#[test]
fn generated_descriptions_with_wrong_node_counts_are_rejected() {
    let options = UnstructuredMeshOptions::default();
    let elements = line_elements(
        vec![vec![ElementNode::new(0), ElementNode::new(1), ElementNode::new(0)]],
        vec![0],
    );
    let message = parse_error_message(UnstructuredMesh::from_descriptions(elements, two_node_line(), &options));
    assert!(message.contains("needs 2"), "{message}");

    let mut elements = line_elements(vec![vec![ElementNode::new(0), ElementNode::new(1)]], vec![]);
    elements.dim = 4;
    assert!(UnstructuredMesh::from_descriptions(elements, two_node_line(), &options).is_err());
}

#[test]
fn generated_descriptions_with_wrong_value_counts_are_rejected() {
    let options = UnstructuredMeshOptions::default();
    let elements = || line_elements(vec![vec![ElementNode::new(0), ElementNode::new(1)]], vec![]);

    let mut nodes = two_node_line();
    nodes.nodes[1].values[0] = vec![];
    let message = parse_error_message(UnstructuredMesh::from_descriptions(elements(), nodes, &options));
    assert!(message.contains("node 2"), "{message}");

    // Two versions need two values per component
    let mut nodes = two_node_line();
    nodes.nodes[0].versions = 2;
    assert!(UnstructuredMesh::from_descriptions(elements(), nodes, &options).is_err());

    let mut nodes = two_node_line();
    nodes.nodes[0].values.clear();
    assert!(UnstructuredMesh::from_descriptions(elements(), nodes, &options).is_err());

    let mut nodes = two_node_line();
    nodes.nodes[1].versions = 0;
    nodes.nodes[1].values = vec![vec![]];
    assert!(UnstructuredMesh::from_descriptions(elements(), nodes, &options).is_err());
}

#[test]
fn mesh_kind_dispatches_to_the_mesh() {
    let structured: MeshKind = StructuredMesh::regular(&[2, 2], &[1.0, 1.0], 2).unwrap().into();
    assert_eq!(structured.order(), 2);
    assert_eq!(structured.n_dofs(), 25);
    assert!(structured.as_structured().is_some());
    assert!(structured.as_unstructured().is_none());

    let unstructured: MeshKind = UnstructuredMesh::from_strs(TWO_QUADS_EXELEM, TWO_QUADS_EXNODE, &Default::default())
        .unwrap()
        .into();
    assert_eq!(unstructured.order(), 1);
    assert_eq!(unstructured.dof_no(1, 3), 5);
}

#[test]
fn named_function_spaces_are_created_once() {
    let settings = Settings::from_json_str(
        r#"{
            "Meshes": { "box": { "nElements": [2, 2] }, "line": { "nElements": 3 } },
            "First": { "meshName": "box" },
            "Second": { "meshName": "box" },
            "Inline": { "nElements": 4 },
            "Missing": { "meshName": "cube" }
        }"#,
    )
    .unwrap();
    let mut meshes = MeshManager::new(&settings).unwrap();
    assert!(meshes.has_mesh_configuration("line"));
    assert!(!meshes.has_function_space("box"));

    let first = meshes.function_space(&settings.sub("First").unwrap()).unwrap();
    let second = meshes.function_space(&settings.sub("Second").unwrap()).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(first.n_dofs(), 9);
    assert!(meshes.has_function_space("box"));
    assert!(!meshes.has_function_space("line"));

    let inline = meshes.function_space(&settings.sub("Inline").unwrap()).unwrap();
    let again = meshes.function_space(&settings.sub("Inline").unwrap()).unwrap();
    assert!(!std::sync::Arc::ptr_eq(&inline, &again));
    assert_eq!(inline.n_dofs(), 5);

    assert!(meshes.function_space(&settings.sub("Missing").unwrap()).is_err());
}

#[test]
fn faces_are_numbered_by_axis_and_side() {
    assert_eq!(Face::from_index(3), Some(Face::YPlus));
    assert_eq!(Face::from_index(6), None);
    assert_eq!(Face::ZMinus.index(), 4);
    assert!(Face::ALL.iter().enumerate().all(|(i, face)| face.index() == i));
}

proptest! {
    #[test]
    fn structured_dof_count_invariant(mesh in structured_mesh_strategy(3, 64)) {
        // A single version per node: as many dofs as nodes, and every node referenced
        prop_assert_eq!(mesh.n_dofs(), mesh.n_nodes());
        let mut referenced = vec![false; mesh.n_nodes()];
        for element in 0..mesh.n_elements() {
            for dof in element_dofs(&mesh, element) {
                referenced[dof] = true;
            }
        }
        prop_assert!(referenced.iter().all(|r| *r));
    }

    #[test]
    fn structured_element_coordinates_round_trip(mesh in structured_mesh_strategy(3, 64)) {
        for element in 0..mesh.n_elements() {
            prop_assert_eq!(mesh.element_index(mesh.element_coordinates(element)), element);
        }
        for node in 0..mesh.n_nodes() {
            prop_assert_eq!(mesh.node_index(mesh.node_coordinates(node)), node);
        }
    }

    #[test]
    fn unstructured_dof_count_invariant(mesh in unstructured_mesh_strategy(3, 27)) {
        // One dof per node version
        let total_versions: usize = (0..mesh.n_nodes()).map(|node| mesh.node_versions(node)).sum();
        prop_assert_eq!(mesh.n_dofs(), total_versions);
        prop_assert!(mesh.n_dofs() >= mesh.n_nodes());
        let single_versions = (0..mesh.n_nodes()).all(|node| mesh.node_versions(node) == 1);
        prop_assert_eq!(mesh.n_dofs() == mesh.n_nodes(), single_versions);

        for node in 0..mesh.n_nodes() {
            prop_assert_eq!(mesh.node_dofs(node).len(), mesh.node_versions(node));
        }
        for element in 0..mesh.n_elements() {
            for dof in element_dofs(&mesh, element) {
                prop_assert!(dof < mesh.n_dofs());
            }
        }
    }
}
