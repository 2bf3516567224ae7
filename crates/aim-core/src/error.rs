//! Error types for network construction, graph analysis and compilation.
//!
//! Every failure here is fatal for the network that produced it. Nothing is
//! returned half-built: a [`Patch`](crate::Patch) either finishes into a
//! complete [`Network`](crate::Network) or reports the first problem it saw,
//! and compilation is all-or-nothing.

use crate::node::NodeId;
use thiserror::Error;

/// Errors raised while a patch is being described.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A node was wired to one of its own outlets.
    #[error("node {0} depends on itself")]
    SelfDependency(NodeId),

    /// A handle from another patch was used as an input.
    #[error("node {0} belongs to another patch (identity collision)")]
    IdentityCollision(NodeId),

    /// A node without outlets was used as an input value.
    #[error("node {node} ({kind}) has no outlets and cannot be used as an input")]
    NoOutlets {
        /// The node that was used as an input.
        node: NodeId,
        /// Its type name.
        kind: &'static str,
    },

    /// The named inlet does not exist on this node type.
    #[error("node {node} ({kind}) has no inlet named '{inlet}'")]
    UnknownInlet {
        /// Node being rewired.
        node: NodeId,
        /// Its type name.
        kind: &'static str,
        /// Inlet name that failed to resolve.
        inlet: String,
    },

    /// The named outlet does not exist on this node type.
    #[error("node {node} ({kind}) has no outlet named '{outlet}'")]
    UnknownOutlet {
        /// Node whose outlet was requested.
        node: NodeId,
        /// Its type name.
        kind: &'static str,
        /// Outlet name that failed to resolve.
        outlet: String,
    },

    /// Two sinks share a name.
    #[error("sink name '{0}' is used more than once")]
    DuplicateSinkName(String),
}

/// Errors raised while building or ordering the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A node reads one of its own outlets.
    #[error("node {0} depends on itself")]
    SelfDependency(NodeId),

    /// The reachable network contains a cycle through this node.
    #[error("dependency cycle through node {0}")]
    Cycle(NodeId),

    /// An inlet references a node that is not part of the network.
    #[error("node {from} references unknown node {missing}")]
    MissingNode {
        /// Node holding the dangling reference.
        from: NodeId,
        /// The node that could not be found.
        missing: NodeId,
    },

    /// The network declares no sinks, so nothing would ever be evaluated.
    #[error("network has no sink nodes")]
    NoSinks,
}

/// Errors raised by the node compiler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// No rule matches the node's current inlet combination.
    #[error("node {kind} ({node}) does not support inputs:\n{inlets}")]
    Unsupported {
        /// Offending node.
        node: NodeId,
        /// Its type name.
        kind: &'static str,
        /// Human-readable `name: value` listing of every inlet.
        inlets: String,
    },

    /// A node appears in the order before one of the outlets it reads.
    #[error("node {node} was scheduled before its dependency {dependency}")]
    OutOfOrder {
        /// Node being compiled.
        node: NodeId,
        /// Dependency that had not been compiled yet.
        dependency: NodeId,
    },

    /// The execution order names a node the network does not contain.
    #[error("unknown node {0} in execution order")]
    UnknownNode(NodeId),

    /// Frame count or sample rate is zero.
    #[error("invalid compile environment: {0}")]
    InvalidEnvironment(String),
}

/// Any failure on the way from a patch to a runnable program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Construction failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Graph analysis failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Convenience result type for aim-core operations.
pub type Result<T> = std::result::Result<T, Error>;
