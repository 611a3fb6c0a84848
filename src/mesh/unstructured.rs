use crate::config::ConfigReader;
use crate::error::DiscretizationError;
use crate::io::exfile::{
    memory_path, parse_element_description, parse_node_description, write_element_description,
    write_node_description, ElementDescription, ElementNode, NodeDescription, NodeRecord,
};
use crate::mesh::MeshTopology;
use eyre::WrapErr;
use log::{debug, info, warn};
use nalgebra::Point3;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the field interpreted as node positions.
pub const GEOMETRY_FIELD: &str = "geometry";

/// A named field with `n_components` values per dof.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldVariable {
    name: String,
    n_components: usize,
    // values[dof * n_components + component]
    values: Vec<f64>,
}

impl FieldVariable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn dof_values(&self, dof: usize) -> &[f64] {
        &self.values[dof * self.n_components..(dof + 1) * self.n_components]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnstructuredMeshOptions {
    /// Do not interpret any field as geometry.
    pub no_geometry_field: bool,
    /// Field renames `old name -> new name`, applied after parsing.
    pub remap: BTreeMap<String, String>,
    /// Keep the scale factors as read instead of absorbing them into the dof values.
    pub keep_scale_factors: bool,
}

/// A mesh with explicitly stored element-to-node connectivity.
///
/// Every node has one or more versions. Each version is a separate dof, and elements
/// reference a specific version of each of their nodes. Dofs are numbered node by node,
/// versions of a node being consecutive.
#[derive(Debug, Clone, PartialEq)]
pub struct UnstructuredMesh {
    dim: usize,
    order: usize,
    elements: Vec<Vec<ElementNode>>,
    node_versions: Vec<usize>,
    // Prefix sums of node_versions, n_nodes + 1 entries
    dof_offsets: Vec<usize>,
    fields: Vec<FieldVariable>,
    scale_factors_eliminated: bool,
}

impl UnstructuredMesh {
    pub fn from_descriptions(
        elements: ElementDescription,
        nodes: NodeDescription,
        options: &UnstructuredMeshOptions,
    ) -> Result<Self, DiscretizationError> {
        let path = memory_path();
        Self::from_parsed(elements, nodes, options, &path, &path)
    }

    /// Parses a pair of in-memory descriptions.
    pub fn from_strs(exelem: &str, exnode: &str, options: &UnstructuredMeshOptions) -> eyre::Result<Self> {
        let path = memory_path();
        let elements = parse_element_description(exelem, &path)?;
        let nodes = parse_node_description(exnode, &path)?;
        Ok(Self::from_parsed(elements, nodes, options, &path, &path)?)
    }

    pub fn from_files(
        exelem_path: impl AsRef<Path>,
        exnode_path: impl AsRef<Path>,
        options: &UnstructuredMeshOptions,
    ) -> eyre::Result<Self> {
        let exelem_path = exelem_path.as_ref();
        let exnode_path = exnode_path.as_ref();
        let exelem = fs::read_to_string(exelem_path)
            .wrap_err_with(|| format!("failed to read element description {}", exelem_path.display()))?;
        let exnode = fs::read_to_string(exnode_path)
            .wrap_err_with(|| format!("failed to read node description {}", exnode_path.display()))?;
        let elements = parse_element_description(&exelem, exelem_path)?;
        let nodes = parse_node_description(&exnode, exnode_path)?;
        let mesh = Self::from_parsed(elements, nodes, options, exelem_path, exnode_path)?;
        info!(
            "Read unstructured mesh from {} and {}: {} elements, {} nodes, {} dofs",
            exelem_path.display(),
            exnode_path.display(),
            mesh.n_elements(),
            mesh.n_nodes(),
            mesh.n_dofs()
        );
        Ok(mesh)
    }

    /// Reads `exelemFile`, `exnodeFile` and the optional `remap` object.
    pub fn from_settings(config: &impl ConfigReader) -> eyre::Result<Self> {
        let exelem: PathBuf = config.get_required("exelemFile")?;
        let exnode: PathBuf = config.get_required("exnodeFile")?;
        let options = UnstructuredMeshOptions {
            remap: config.get_or("remap", BTreeMap::new())?,
            ..Default::default()
        };
        Self::from_files(exelem, exnode, &options)
    }

    fn from_parsed(
        elements: ElementDescription,
        nodes: NodeDescription,
        options: &UnstructuredMeshOptions,
        element_path: &Path,
        node_path: &Path,
    ) -> Result<Self, DiscretizationError> {
        validate_nodes(&nodes, node_path)?;
        let node_versions: Vec<usize> = nodes.nodes.iter().map(|n| n.versions).collect();
        let mut dof_offsets = Vec::with_capacity(node_versions.len() + 1);
        dof_offsets.push(0);
        for versions in &node_versions {
            dof_offsets.push(dof_offsets[dof_offsets.len() - 1] + versions);
        }
        validate_elements(&elements, &node_versions, element_path)?;

        let n_dofs = dof_offsets[dof_offsets.len() - 1];
        let mut fields: Vec<FieldVariable> = nodes
            .fields
            .iter()
            .enumerate()
            .map(|(field_index, (name, n_components))| {
                let mut values = vec![0.0; n_dofs * n_components];
                for (node, record) in nodes.nodes.iter().enumerate() {
                    for version in 0..record.versions {
                        let dof = dof_offsets[node] + version;
                        for c in 0..*n_components {
                            values[dof * n_components + c] = record.values[field_index][c * record.versions + version];
                        }
                    }
                }
                FieldVariable {
                    name: name.clone(),
                    n_components: *n_components,
                    values,
                }
            })
            .collect();

        if options.no_geometry_field {
            fields.retain(|field| field.name != GEOMETRY_FIELD);
        }

        let mut mesh = Self {
            dim: elements.dim,
            order: elements.order,
            elements: elements.elements,
            node_versions,
            dof_offsets,
            fields,
            scale_factors_eliminated: false,
        };
        mesh.remap_field_variables(&options.remap)?;
        if !options.keep_scale_factors {
            mesh.eliminate_scale_factors();
        }
        debug!(
            "Unstructured mesh: {} elements, {} nodes, {} dofs, fields [{}]",
            mesh.n_elements(),
            mesh.n_nodes(),
            mesh.n_dofs(),
            mesh.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(mesh)
    }

    /// Renames fields according to `remap`. Names not present in the mesh are skipped.
    pub fn remap_field_variables(&mut self, remap: &BTreeMap<String, String>) -> Result<(), DiscretizationError> {
        for (old_name, new_name) in remap {
            if old_name == new_name {
                continue;
            }
            if self.fields.iter().any(|f| &f.name == new_name) {
                return Err(DiscretizationError::config(
                    "remap",
                    format!("cannot rename `{old_name}` to `{new_name}`: a field with that name exists"),
                ));
            }
            match self.fields.iter_mut().find(|f| &f.name == old_name) {
                Some(field) => {
                    debug!("Renaming field `{old_name}` to `{new_name}`");
                    field.name = new_name.clone();
                }
                None => warn!("Field `{old_name}` to be renamed to `{new_name}` does not exist, skipping"),
            }
        }
        if let Some(geometry) = self.geometry_field() {
            if geometry.n_components > 3 {
                return Err(DiscretizationError::config(
                    "remap",
                    format!("geometry field has {} components, at most 3 allowed", geometry.n_components),
                ));
            }
        }
        Ok(())
    }

    /// Multiplies every dof value by the scale factor of the first element referencing the
    /// dof, then resets all scale factors to 1. Repeated calls are no-ops.
    pub fn eliminate_scale_factors(&mut self) {
        if self.scale_factors_eliminated {
            return;
        }
        let mut factors: Vec<Option<f64>> = vec![None; self.n_dofs()];
        for (element_index, element) in self.elements.iter().enumerate() {
            for entry in element {
                let dof = self.dof_offsets[entry.node] + entry.version;
                match factors[dof] {
                    None => factors[dof] = Some(entry.scale_factor),
                    Some(factor) if factor != entry.scale_factor => warn!(
                        "Element {element_index} uses scale factor {} for dof {dof}, but {factor} was applied",
                        entry.scale_factor
                    ),
                    Some(_) => {}
                }
            }
        }
        for field in &mut self.fields {
            for (dof, factor) in factors.iter().enumerate() {
                if let Some(factor) = factor {
                    for value in &mut field.values[dof * field.n_components..(dof + 1) * field.n_components] {
                        *value *= factor;
                    }
                }
            }
        }
        for entry in self.elements.iter_mut().flatten() {
            entry.scale_factor = 1.0;
        }
        self.scale_factors_eliminated = true;
    }

    pub fn scale_factors_eliminated(&self) -> bool {
        self.scale_factors_eliminated
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn element_nodes(&self, element: usize) -> &[ElementNode] {
        &self.elements[element]
    }

    pub fn node_versions(&self, node: usize) -> usize {
        self.node_versions[node]
    }

    pub fn fields(&self) -> &[FieldVariable] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldVariable> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn geometry_field(&self) -> Option<&FieldVariable> {
        self.field(GEOMETRY_FIELD)
    }

    pub fn to_element_description(&self) -> ElementDescription {
        ElementDescription {
            dim: self.dim,
            order: self.order,
            elements: self.elements.clone(),
            lines: vec![0; self.elements.len()],
        }
    }

    pub fn to_node_description(&self) -> NodeDescription {
        let nodes = self
            .node_versions
            .iter()
            .enumerate()
            .map(|(node, &versions)| {
                let values = self
                    .fields
                    .iter()
                    .map(|field| {
                        let mut values = Vec::with_capacity(field.n_components * versions);
                        for c in 0..field.n_components {
                            for version in 0..versions {
                                let dof = self.dof_offsets[node] + version;
                                values.push(field.values[dof * field.n_components + c]);
                            }
                        }
                        values
                    })
                    .collect();
                NodeRecord {
                    versions,
                    values,
                    line: 0,
                }
            })
            .collect();
        NodeDescription {
            fields: self
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.n_components))
                .collect(),
            nodes,
        }
    }

    /// Writes the element and node descriptions.
    ///
    /// Each file is first written next to its destination and then moved into place, so an
    /// interrupted write never leaves a truncated description behind.
    pub fn write_files(&self, exelem_path: impl AsRef<Path>, exnode_path: impl AsRef<Path>) -> eyre::Result<()> {
        write_atomically(exelem_path.as_ref(), &write_element_description(&self.to_element_description()))?;
        write_atomically(exnode_path.as_ref(), &write_node_description(&self.to_node_description()))?;
        Ok(())
    }
}

fn write_atomically(path: &Path, contents: &str) -> eyre::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).wrap_err_with(|| format!("failed to create directory {}", parent.display()))?;
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    fs::write(&partial, contents).wrap_err_with(|| format!("failed to write {}", partial.display()))?;
    fs::rename(&partial, path).wrap_err_with(|| format!("failed to move output into place at {}", path.display()))?;
    Ok(())
}

/// Checks that every node record holds `n_components * versions` values for each field.
fn validate_nodes(nodes: &NodeDescription, path: &Path) -> Result<(), DiscretizationError> {
    if let Some((name, _)) = nodes.fields.iter().find(|(_, n_components)| *n_components == 0) {
        return Err(DiscretizationError::parse(path, 0, format!("field `{name}` has no components")));
    }
    for (index, record) in nodes.nodes.iter().enumerate() {
        let error = |message: String| DiscretizationError::parse(path, record.line, message);
        if record.versions == 0 {
            return Err(error(format!("node {} has no versions", index + 1)));
        }
        if record.values.len() != nodes.fields.len() {
            return Err(error(format!(
                "node {} has values for {} fields, but {} fields are declared",
                index + 1,
                record.values.len(),
                nodes.fields.len()
            )));
        }
        for ((name, n_components), values) in nodes.fields.iter().zip(&record.values) {
            let expected = n_components * record.versions;
            if values.len() != expected {
                return Err(error(format!(
                    "node {} has {} values for `{name}`, expected {expected}",
                    index + 1,
                    values.len()
                )));
            }
        }
    }
    Ok(())
}

/// Checks the element shape, node count and node references of every element.
fn validate_elements(
    elements: &ElementDescription,
    node_versions: &[usize],
    path: &Path,
) -> Result<(), DiscretizationError> {
    let (dim, order) = (elements.dim, elements.order);
    if !(1..=3).contains(&dim) || !(1..=2).contains(&order) {
        return Err(DiscretizationError::parse(
            path,
            0,
            format!("unsupported {dim}D lagrange{order} elements"),
        ));
    }
    let nodes_per_element = (order + 1).pow(dim as u32);
    for (element_index, element) in elements.elements.iter().enumerate() {
        let line = elements.lines.get(element_index).copied().unwrap_or(0);
        if element.len() != nodes_per_element {
            return Err(DiscretizationError::parse(
                path,
                line,
                format!(
                    "element {} has {} nodes, a {dim}D lagrange{order} element needs {nodes_per_element}",
                    element_index + 1,
                    element.len()
                ),
            ));
        }
        for entry in element {
            let versions = node_versions.get(entry.node).copied().ok_or_else(|| {
                DiscretizationError::parse(
                    path,
                    line,
                    format!(
                        "element {} references node {}, but only {} nodes are defined",
                        element_index + 1,
                        entry.node + 1,
                        node_versions.len()
                    ),
                )
            })?;
            if entry.version >= versions {
                return Err(DiscretizationError::parse(
                    path,
                    line,
                    format!(
                        "element {} references version {} of node {}, which has {versions} version(s)",
                        element_index + 1,
                        entry.version + 1,
                        entry.node + 1
                    ),
                ));
            }
        }
    }
    Ok(())
}

impl MeshTopology for UnstructuredMesh {
    fn dim(&self) -> usize {
        self.dim
    }

    fn n_elements(&self) -> usize {
        self.elements.len()
    }

    fn n_nodes(&self) -> usize {
        self.node_versions.len()
    }

    fn n_dofs(&self) -> usize {
        self.dof_offsets[self.dof_offsets.len() - 1]
    }

    fn nodes_per_element(&self) -> usize {
        (self.order + 1).pow(self.dim as u32)
    }

    fn node_no(&self, element: usize, local_node: usize) -> usize {
        self.elements[element][local_node].node
    }

    fn dof_no(&self, element: usize, local_dof: usize) -> usize {
        let entry = &self.elements[element][local_dof];
        self.dof_offsets[entry.node] + entry.version
    }

    fn node_dofs(&self, node: usize) -> Vec<usize> {
        (self.dof_offsets[node]..self.dof_offsets[node + 1]).collect()
    }

    fn dof_position(&self, dof: usize) -> Option<Point3<f64>> {
        let geometry = self.geometry_field()?;
        let mut position = Point3::origin();
        for (c, value) in geometry.dof_values(dof).iter().enumerate() {
            position[c] = *value;
        }
        Some(position)
    }
}
