//! Patch file format.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A node parameter as written in the file.
///
/// Numbers are literals. Strings are references to another node's default
/// outlet (`"lfo"`) or a named outlet (`"keys.midi"`), except for the text
/// parameters `name`, `device` and `file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A literal number.
    Number(f64),
    /// A reference or a text parameter.
    Text(String),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// One `[[nodes]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identifier other nodes use to refer to this one.
    pub id: String,

    /// Node type name (e.g. "sine", "polyphonic").
    #[serde(rename = "type")]
    pub node_type: String,

    /// Inlets and typed parameters.
    #[serde(flatten)]
    pub params: BTreeMap<String, ParamValue>,
}

impl NodeConfig {
    /// Create a node entry without parameters.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Run settings stored with a patch. Command-line flags override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Frames per second (defaults to 48000).
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Frames per buffer (defaults to 512).
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,

    /// Output attenuation (defaults to 0.1).
    #[serde(default = "default_gain")]
    pub gain: f32,

    /// Sinks to play. Empty plays every sink.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    /// Seed for noise and random nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_frame_count() -> usize {
    512
}

fn default_gain() -> f32 {
    0.1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_count: default_frame_count(),
            gain: default_gain(),
            outputs: Vec::new(),
            seed: None,
        }
    }
}

/// A patch stored as TOML.
///
/// # TOML Format
///
/// ```toml
/// name = "two voices"
///
/// [settings]
/// sample_rate = 48000
/// frame_count = 256
///
/// [[nodes]]
/// id = "keys"
/// type = "midi"
/// device = "keyboard"
///
/// [[nodes]]
/// id = "poly"
/// type = "polyphonic"
/// input = "keys"
/// max_voices = 2
///
/// [[nodes]]
/// id = "tone"
/// type = "sine"
/// frequency = "poly"
///
/// [[nodes]]
/// id = "main"
/// type = "out"
/// input = "tone"
/// name = "main"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchFile {
    /// Name of the patch.
    #[serde(default = "default_name")]
    pub name: String,

    /// Run settings.
    #[serde(default)]
    pub settings: Settings,

    /// Nodes, in any order. References may point forward.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

fn default_name() -> String {
    "untitled".to_string()
}

impl PatchFile {
    /// Create an empty patch file.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Settings::default(),
            nodes: Vec::new(),
            base_dir: None,
        }
    }

    /// Add a node entry.
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    /// Load a patch from a TOML file.
    ///
    /// Relative `file` parameters are later resolved against the file's
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let mut file = Self::from_toml(&content)?;
        file.base_dir = path.parent().map(Path::to_path_buf);
        tracing::debug!(path = %path.display(), nodes = file.nodes.len(), "patch file loaded");
        Ok(file)
    }

    /// Load a patch from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save the patch to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Resolve a `file` parameter: absolute paths stay, relative paths are
    /// joined to the directory the patch was loaded from.
    pub fn resolve_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Find a node entry by id.
    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
