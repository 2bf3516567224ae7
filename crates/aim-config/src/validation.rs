//! Patch file validation.
//!
//! Checks that run before any node is created: node types exist, ids are
//! unique, every parameter is accepted by its node type and holds the right
//! kind of value, and every reference names a node in the file.
//!
//! # Example
//!
//! ```rust
//! use aim_config::{NodeConfig, ParamKind, PatchFile, param_kind, validate};
//!
//! assert_eq!(param_kind("polyphonic", "max_voices"), Some(ParamKind::Count));
//! assert_eq!(param_kind("sine", "duty"), None);
//!
//! let file = PatchFile::new("demo")
//!     .with_node(NodeConfig::new("tone", "sine").with_param("frequency", 220.0))
//!     .with_node(NodeConfig::new("main", "out").with_param("input", "tone"));
//! validate(&file).expect("patch is consistent");
//! ```

use std::collections::BTreeSet;

use aim_core::NodeKind;

use crate::error::ConfigError;
use crate::patch_file::{NodeConfig, ParamValue, PatchFile};

/// How a node parameter is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A string stored on the node: sink name, MIDI device or audio file.
    Text,
    /// A positive integer fixed at construction (voice limits and counts).
    Count,
    /// An inlet: a literal number or a reference to another node.
    Inlet,
}

/// Classify `param` for nodes of `node_type`.
///
/// Returns `None` when the type is unknown or does not take the parameter.
pub fn param_kind(node_type: &str, param: &str) -> Option<ParamKind> {
    match (node_type, param) {
        ("out", "name") | ("midi", "device") | ("audiofile", "file") => {
            return Some(ParamKind::Text);
        }
        ("polyphonic" | "unison", "max_voices") | ("unison", "voices") => {
            return Some(ParamKind::Count);
        }
        _ => {}
    }
    let kind = NodeKind::from_type_name(node_type)?;
    kind.inlets()
        .iter()
        .any(|(name, _)| *name == param)
        .then_some(ParamKind::Inlet)
}

/// Split a reference into node id and optional outlet name.
///
/// A reference that is itself a node id refers to that node's default
/// outlet. Otherwise the text after the last `.` names the outlet.
pub fn split_reference<'a>(ids: &BTreeSet<&str>, reference: &'a str) -> Option<(&'a str, Option<&'a str>)> {
    if ids.contains(reference) {
        return Some((reference, None));
    }
    let (node, outlet) = reference.rsplit_once('.')?;
    ids.contains(node).then_some((node, Some(outlet)))
}

/// Validate a whole patch file.
pub fn validate(file: &PatchFile) -> Result<(), ConfigError> {
    let mut ids = BTreeSet::new();
    for node in &file.nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(ConfigError::DuplicateId(node.id.clone()));
        }
    }
    for node in &file.nodes {
        validate_node(node, &ids)?;
    }
    Ok(())
}

fn validate_node(node: &NodeConfig, ids: &BTreeSet<&str>) -> Result<(), ConfigError> {
    if NodeKind::from_type_name(&node.node_type).is_none() {
        return Err(ConfigError::UnknownNodeType {
            node: node.id.clone(),
            node_type: node.node_type.clone(),
        });
    }
    for (param, value) in &node.params {
        let kind =
            param_kind(&node.node_type, param).ok_or_else(|| ConfigError::UnknownParameter {
                node: node.id.clone(),
                node_type: node.node_type.clone(),
                param: param.clone(),
            })?;
        match (kind, value) {
            (ParamKind::Text, ParamValue::Text(_)) => {}
            (ParamKind::Text, ParamValue::Number(_)) => {
                return Err(ConfigError::invalid_value(&node.id, param, "expected a string"));
            }
            (ParamKind::Count, ParamValue::Number(n)) => {
                count(&node.id, param, *n)?;
            }
            (ParamKind::Count, ParamValue::Text(_)) => {
                return Err(ConfigError::invalid_value(
                    &node.id,
                    param,
                    "must be a positive integer",
                ));
            }
            (ParamKind::Inlet, ParamValue::Number(n)) => {
                if !n.is_finite() {
                    return Err(ConfigError::invalid_value(&node.id, param, "must be finite"));
                }
            }
            (ParamKind::Inlet, ParamValue::Text(reference)) => {
                if split_reference(ids, reference).is_none() {
                    return Err(ConfigError::UnresolvedReference {
                        node: node.id.clone(),
                        param: param.clone(),
                        reference: reference.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Convert a count parameter, rejecting zero, negatives and fractions.
pub(crate) fn count(node: &str, param: &str, value: f64) -> Result<usize, ConfigError> {
    if value >= 1.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
        Ok(value as usize)
    } else {
        Err(ConfigError::invalid_value(node, param, "must be a positive integer"))
    }
}
