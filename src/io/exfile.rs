//! Paired element/node description files for unstructured meshes.
//!
//! The element file lists, per element, the ordered node references together with the
//! node version used by the element and a per-node scale factor:
//!
//! ```text
//! Dimension: 2
//! Basis: lagrange1
//! Element: 1
//!   Nodes: 1 2 4 5
//!   Versions: 1 1 1 1
//!   Scale factors: 1 1 1 1
//! ```
//!
//! The node file declares the fields and, per node, the number of versions and the values of
//! every field. Values are component-major: all versions of the first component come first.
//!
//! ```text
//! Fields: geometry=3
//! Node: 1
//!   Versions: 1
//!   geometry: 0 0 0
//! ```
//!
//! Numbers are 1-based in files and 0-based in memory. Lines starting with `#` are comments.

use crate::error::DiscretizationError;
use itertools::Itertools;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The node reference of one local node of an element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementNode {
    pub node: usize,
    pub version: usize,
    pub scale_factor: f64,
}

impl ElementNode {
    pub fn new(node: usize) -> Self {
        Self {
            node,
            version: 0,
            scale_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementDescription {
    pub dim: usize,
    pub order: usize,
    pub elements: Vec<Vec<ElementNode>>,
    /// Line of the `Element:` header of each element, or 0 for generated descriptions.
    pub lines: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub versions: usize,
    /// Per declared field, `n_components * versions` values in component-major order.
    pub values: Vec<Vec<f64>>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescription {
    /// Declared fields as `(name, number of components)`.
    pub fields: Vec<(String, usize)>,
    pub nodes: Vec<NodeRecord>,
}

/// Path reported for descriptions that were not read from a file.
pub fn memory_path() -> PathBuf {
    PathBuf::from("<memory>")
}

struct LineCursor<'a> {
    path: &'a Path,
}

impl<'a> LineCursor<'a> {
    fn error(&self, line: usize, message: impl Into<String>) -> DiscretizationError {
        DiscretizationError::parse(self.path, line, message)
    }

    fn parse_list<T: FromStr>(&self, line: usize, key: &str, text: &str) -> Result<Vec<T>, DiscretizationError> {
        text.split_whitespace()
            .map(|token| {
                token
                    .parse()
                    .map_err(|_| self.error(line, format!("invalid entry `{token}` in `{key}`")))
            })
            .collect()
    }

    fn parse_single<T: FromStr>(&self, line: usize, key: &str, text: &str) -> Result<T, DiscretizationError> {
        text.trim()
            .parse()
            .map_err(|_| self.error(line, format!("invalid value `{}` for `{key}`", text.trim())))
    }

    fn one_based(&self, line: usize, key: &str, values: Vec<usize>) -> Result<Vec<usize>, DiscretizationError> {
        values
            .into_iter()
            .map(|v| {
                v.checked_sub(1)
                    .ok_or_else(|| self.error(line, format!("`{key}` entries are 1-based")))
            })
            .collect()
    }
}

/// Yields `(1-based line number, key, rest)` for every non-comment line.
fn key_value_lines(text: &str) -> impl Iterator<Item = (usize, Option<(&str, &str)>)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(i, line)| (i, line.split_once(':').map(|(k, v)| (k.trim(), v.trim()))))
}

pub fn parse_element_description(text: &str, path: &Path) -> Result<ElementDescription, DiscretizationError> {
    let cursor = LineCursor { path };
    let mut dim = None;
    let mut order: usize = 1;
    let mut elements: Vec<Vec<ElementNode>> = Vec::new();
    let mut lines = Vec::new();

    for (line, entry) in key_value_lines(text) {
        let (key, rest) = entry.ok_or_else(|| cursor.error(line, "expected `key: value`"))?;
        match key {
            "Dimension" => {
                if !elements.is_empty() {
                    return Err(cursor.error(line, "`Dimension` must precede all elements"));
                }
                let d: usize = cursor.parse_single(line, key, rest)?;
                if !(1..=3).contains(&d) {
                    return Err(cursor.error(line, format!("unsupported dimension {d}")));
                }
                dim = Some(d);
            }
            "Basis" => {
                if !elements.is_empty() {
                    return Err(cursor.error(line, "`Basis` must precede all elements"));
                }
                let lowercase = rest.to_ascii_lowercase();
                order = match lowercase.strip_prefix("lagrange") {
                    Some("1") => 1,
                    Some("2") => 2,
                    _ => return Err(cursor.error(line, format!("unsupported basis `{rest}`"))),
                };
            }
            "Element" => {
                let number: usize = cursor.parse_single(line, key, rest)?;
                if number != elements.len() + 1 {
                    return Err(cursor.error(
                        line,
                        format!("expected element {}, found element {number}", elements.len() + 1),
                    ));
                }
                if let (Some(previous), Some(&previous_line)) = (elements.last(), lines.last()) {
                    if previous.is_empty() {
                        return Err(cursor.error(previous_line, "element has no `Nodes` entry"));
                    }
                }
                elements.push(Vec::new());
                lines.push(line);
            }
            "Nodes" | "Versions" | "Scale factors" => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| cursor.error(line, format!("`{key}` outside of an element")))?;
                if key == "Nodes" {
                    if !element.is_empty() {
                        return Err(cursor.error(line, "duplicate `Nodes` entry"));
                    }
                    let nodes = cursor.one_based(line, key, cursor.parse_list(line, key, rest)?)?;
                    element.extend(nodes.into_iter().map(ElementNode::new));
                } else if element.is_empty() {
                    return Err(cursor.error(line, format!("`{key}` must follow `Nodes`")));
                } else if key == "Versions" {
                    let versions = cursor.one_based(line, key, cursor.parse_list(line, key, rest)?)?;
                    if versions.len() != element.len() {
                        return Err(cursor.error(line, "number of versions does not match number of nodes"));
                    }
                    for (entry, version) in element.iter_mut().zip(versions) {
                        entry.version = version;
                    }
                } else {
                    let factors: Vec<f64> = cursor.parse_list(line, key, rest)?;
                    if factors.len() != element.len() {
                        return Err(cursor.error(line, "number of scale factors does not match number of nodes"));
                    }
                    for (entry, factor) in element.iter_mut().zip(factors) {
                        entry.scale_factor = factor;
                    }
                }
            }
            _ => return Err(cursor.error(line, format!("unknown key `{key}`"))),
        }
    }

    if let (Some(last), Some(&last_line)) = (elements.last(), lines.last()) {
        if last.is_empty() {
            return Err(cursor.error(last_line, "element has no `Nodes` entry"));
        }
    }
    let dim = dim.ok_or_else(|| cursor.error(0, "missing `Dimension`"))?;

    let nodes_per_element = (order + 1).pow(dim as u32);
    for (element, &line) in elements.iter().zip(&lines) {
        if element.len() != nodes_per_element {
            return Err(cursor.error(
                line,
                format!(
                    "expected {nodes_per_element} nodes for a {dim}D lagrange{order} element, found {}",
                    element.len()
                ),
            ));
        }
    }

    Ok(ElementDescription {
        dim,
        order,
        elements,
        lines,
    })
}

fn check_complete(
    cursor: &LineCursor,
    fields: &[(String, usize)],
    node: Option<&NodeRecord>,
    seen: &[bool],
) -> Result<(), DiscretizationError> {
    match node {
        Some(node) if seen.iter().any(|s| !s) => {
            let missing = fields
                .iter()
                .zip(seen)
                .filter(|(_, s)| !**s)
                .map(|((name, _), _)| name.as_str())
                .join(", ");
            Err(cursor.error(node.line, format!("node is missing values for: {missing}")))
        }
        _ => Ok(()),
    }
}

pub fn parse_node_description(text: &str, path: &Path) -> Result<NodeDescription, DiscretizationError> {
    let cursor = LineCursor { path };
    let mut fields: Vec<(String, usize)> = Vec::new();
    let mut nodes: Vec<NodeRecord> = Vec::new();
    // Whether each field of the current node has been seen
    let mut seen = Vec::new();

    for (line, entry) in key_value_lines(text) {
        let (key, rest) = entry.ok_or_else(|| cursor.error(line, "expected `key: value`"))?;
        match key {
            "Fields" => {
                if !fields.is_empty() || !nodes.is_empty() {
                    return Err(cursor.error(line, "`Fields` must appear once, before all nodes"));
                }
                for token in rest.split_whitespace() {
                    let (name, count) = token
                        .split_once('=')
                        .ok_or_else(|| cursor.error(line, format!("expected `name=components`, got `{token}`")))?;
                    let count: usize = cursor.parse_single(line, "Fields", count)?;
                    if count == 0 || fields.iter().any(|(existing, _)| existing == name) {
                        return Err(cursor.error(line, format!("invalid declaration of field `{name}`")));
                    }
                    fields.push((name.to_string(), count));
                }
            }
            "Node" => {
                check_complete(&cursor, &fields, nodes.last(), &seen)?;
                let number: usize = cursor.parse_single(line, key, rest)?;
                if number != nodes.len() + 1 {
                    return Err(cursor.error(line, format!("expected node {}, found node {number}", nodes.len() + 1)));
                }
                nodes.push(NodeRecord {
                    versions: 1,
                    values: vec![Vec::new(); fields.len()],
                    line,
                });
                seen = vec![false; fields.len()];
            }
            "Versions" => {
                let node = nodes
                    .last_mut()
                    .ok_or_else(|| cursor.error(line, "`Versions` outside of a node"))?;
                if seen.iter().any(|s| *s) {
                    return Err(cursor.error(line, "`Versions` must precede the field values of a node"));
                }
                let versions: usize = cursor.parse_single(line, key, rest)?;
                if versions == 0 {
                    return Err(cursor.error(line, "a node needs at least one version"));
                }
                node.versions = versions;
            }
            name => {
                let field_index = fields
                    .iter()
                    .position(|(field, _)| field == name)
                    .ok_or_else(|| cursor.error(line, format!("undeclared field `{name}`")))?;
                let node = nodes
                    .last_mut()
                    .ok_or_else(|| cursor.error(line, format!("values for `{name}` outside of a node")))?;
                if seen[field_index] {
                    return Err(cursor.error(line, format!("duplicate values for `{name}`")));
                }
                let values: Vec<f64> = cursor.parse_list(line, name, rest)?;
                let expected = fields[field_index].1 * node.versions;
                if values.len() != expected {
                    return Err(cursor.error(
                        line,
                        format!("expected {expected} values for `{name}`, found {}", values.len()),
                    ));
                }
                node.values[field_index] = values;
                seen[field_index] = true;
            }
        }
    }
    check_complete(&cursor, &fields, nodes.last(), &seen)?;

    Ok(NodeDescription { fields, nodes })
}

pub fn write_element_description(description: &ElementDescription) -> String {
    let mut output = String::new();
    // Writing into a String is infallible
    let _ = writeln!(output, "Dimension: {}", description.dim);
    let _ = writeln!(output, "Basis: lagrange{}", description.order);
    for (i, element) in description.elements.iter().enumerate() {
        let _ = writeln!(output, "Element: {}", i + 1);
        let _ = writeln!(output, "  Nodes: {}", element.iter().map(|e| e.node + 1).join(" "));
        let _ = writeln!(output, "  Versions: {}", element.iter().map(|e| e.version + 1).join(" "));
        let _ = writeln!(output, "  Scale factors: {}", element.iter().map(|e| e.scale_factor).join(" "));
    }
    output
}

pub fn write_node_description(description: &NodeDescription) -> String {
    let mut output = String::new();
    let declarations = description
        .fields
        .iter()
        .map(|(name, count)| format!("{name}={count}"))
        .join(" ");
    let _ = writeln!(output, "Fields: {declarations}");
    for (i, node) in description.nodes.iter().enumerate() {
        let _ = writeln!(output, "Node: {}", i + 1);
        let _ = writeln!(output, "  Versions: {}", node.versions);
        for ((name, _), values) in description.fields.iter().zip(&node.values) {
            let _ = writeln!(output, "  {name}: {}", values.iter().join(" "));
        }
    }
    output
}
