//! Error types for patch file operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, validating or building a patch file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Unknown node type
    #[error("unknown node type '{node_type}' for node '{node}'")]
    UnknownNodeType {
        /// Id of the offending node.
        node: String,
        /// Type name that is not in the vocabulary.
        node_type: String,
    },

    /// Parameter not accepted by the node type
    #[error("node '{node}' ({node_type}) has no parameter '{param}'")]
    UnknownParameter {
        /// Id of the node.
        node: String,
        /// Its type name.
        node_type: String,
        /// Parameter that is not accepted.
        param: String,
    },

    /// A reference names a node that is not in the file
    #[error("node '{node}' parameter '{param}' refers to unknown node '{reference}'")]
    UnresolvedReference {
        /// Id of the node holding the reference.
        node: String,
        /// Parameter holding the reference.
        param: String,
        /// The reference as written.
        reference: String,
    },

    /// Two nodes share an id
    #[error("duplicate node id: {0}")]
    DuplicateId(String),

    /// Invalid parameter value
    #[error("invalid value for '{param}' on node '{node}': {reason}")]
    InvalidValue {
        /// Id of the node.
        node: String,
        /// Parameter with the bad value.
        param: String,
        /// Description of why the value is invalid.
        reason: String,
    },

    /// An audio file could not be loaded
    #[error("node '{node}' could not load '{path}': {reason}")]
    LoadClip {
        /// Id of the audiofile node.
        node: String,
        /// Resolved path of the file.
        path: PathBuf,
        /// Loader error text.
        reason: String,
    },

    /// The patch itself is inconsistent
    #[error("patch construction failed: {0}")]
    Build(#[from] aim_core::BuildError),
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(node: &str, param: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            node: node.to_string(),
            param: param.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn mock_io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "mock")
    }

    // --- factory methods ---

    #[test]
    fn read_file_factory_produces_correct_variant() {
        let err = ConfigError::read_file("/some/path", mock_io_err());
        assert!(
            matches!(err, ConfigError::ReadFile { ref path, .. } if path == std::path::Path::new("/some/path"))
        );
    }

    #[test]
    fn write_file_factory_produces_correct_variant() {
        let err = ConfigError::write_file("/out/path", mock_io_err());
        assert!(
            matches!(err, ConfigError::WriteFile { ref path, .. } if path == std::path::Path::new("/out/path"))
        );
    }

    #[test]
    fn invalid_value_factory_produces_correct_variant() {
        let err = ConfigError::invalid_value("poly", "max_voices", "must be a positive integer");
        assert!(matches!(err, ConfigError::InvalidValue { ref node, ref param, .. }
            if node == "poly" && param == "max_voices"));
    }

    // --- Display formatting ---

    #[test]
    fn read_file_display() {
        let msg = ConfigError::read_file("/a/b.toml", mock_io_err()).to_string();
        assert!(msg.contains("failed to read file"), "got: {msg}");
        assert!(msg.contains("/a/b.toml"), "got: {msg}");
    }

    #[test]
    fn unknown_node_type_display() {
        let err = ConfigError::UnknownNodeType {
            node: "verb".to_string(),
            node_type: "reverb".to_string(),
        };
        assert_eq!(err.to_string(), "unknown node type 'reverb' for node 'verb'");
    }

    #[test]
    fn unresolved_reference_display() {
        let err = ConfigError::UnresolvedReference {
            node: "tone".to_string(),
            param: "frequency".to_string(),
            reference: "lfo".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "node 'tone' parameter 'frequency' refers to unknown node 'lfo'"
        );
    }

    #[test]
    fn build_error_display_wraps_core_message() {
        let err = ConfigError::from(aim_core::BuildError::DuplicateSinkName("main".into()));
        assert_eq!(
            err.to_string(),
            "patch construction failed: sink name 'main' is used more than once"
        );
    }

    // --- Error::source() chain for I/O-wrapping variants ---

    #[test]
    fn read_file_source_is_some() {
        let err = ConfigError::read_file("/x", mock_io_err());
        assert!(err.source().is_some(), "ReadFile must expose I/O source");
    }

    #[test]
    fn duplicate_id_source_is_none() {
        assert!(ConfigError::DuplicateId("a".into()).source().is_none());
    }
}
