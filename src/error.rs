//! Error types for graph construction and execution
//!
//! Construction-time errors (`GraphBuildError`) are raised by `compile()` and
//! abort before any run can start. Run-time errors (`RunError`) abort a run
//! and carry the last-known state where the caller needs it for diagnosis.

use thiserror::Error;

use crate::state::GraphState;

/// Errors raised while validating and compiling a graph definition.
///
/// These are the only errors `compile()` produces; none of them can occur
/// at run time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphBuildError {
    /// Two nodes were registered under the same name
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    /// An edge or entry point references a node that was never added
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// No entry point was set before compiling
    #[error("graph entry point not set")]
    NoEntryPoint,

    /// A node cannot be reached from the entry point via any edge
    #[error("node unreachable from entry: {0}")]
    Unreachable(String),

    /// A subgraph boundary declares an illegal field
    #[error("schema validation failed for field '{field}': {reason}")]
    SchemaValidation { field: String, reason: String },
}

impl GraphBuildError {
    /// Create a schema validation error
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that abort a run.
///
/// Per-action tool failures never appear here; they are converted into
/// error-flagged result records inside the tool-execution step.
#[derive(Debug, Error)]
pub enum RunError {
    /// The scheduler exceeded the configured recursion ceiling
    #[error("recursion limit {limit} exceeded after {steps} steps (last node: {last_node})")]
    RecursionExceeded {
        limit: usize,
        steps: usize,
        last_node: String,
        state: Box<GraphState>,
    },

    /// The run was cancelled via its cancellation token
    #[error("run cancelled")]
    Cancelled { state: Box<GraphState> },

    /// A directive named a node absent from the current graph (strict mode only)
    #[error("unresolved directive from '{node}' to unknown target '{target}'")]
    UnresolvedDirective {
        node: String,
        target: String,
        state: Option<Box<GraphState>>,
    },

    /// A parent-scoped directive was issued in the top-level graph
    #[error("parent-scope directive from '{node}' but graph has no parent")]
    ParentScopeAtTopLevel {
        node: String,
        state: Option<Box<GraphState>>,
    },

    /// A conditional edge produced a branch value with no mapped target
    #[error("no edge target for branch '{branch}' out of node '{node}'")]
    Routing {
        node: String,
        branch: String,
        state: Option<Box<GraphState>>,
    },

    /// A node's own computation failed
    #[error("node '{node}' failed: {message}")]
    Node {
        node: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        state: Option<Box<GraphState>>,
    },

    /// A delta referenced an undeclared field or violated a merge rule
    #[error("state error: {0}")]
    State(String),

    /// Checkpoint store failure
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl RunError {
    /// Create a node error with a message
    pub fn node_error(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Node {
            node: node.into(),
            message: message.into(),
            source: None,
            state: None,
        }
    }

    /// Create a node error wrapping a source error
    pub fn node_error_with_source(
        node: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Node {
            node: node.into(),
            message: message.into(),
            source: Some(Box::new(source)),
            state: None,
        }
    }

    /// Create a state error
    pub fn state_error(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint_error(message: impl Into<String>) -> Self {
        Self::Checkpoint(message.into())
    }

    /// Attach the last-known state to variants that carry one, if not already set.
    ///
    /// The scheduler calls this when an error surfaces so callers always see
    /// the state the run died with.
    pub(crate) fn attach_state(mut self, current: &GraphState) -> Self {
        match &mut self {
            Self::UnresolvedDirective { state, .. }
            | Self::ParentScopeAtTopLevel { state, .. }
            | Self::Routing { state, .. }
            | Self::Node { state, .. } => {
                if state.is_none() {
                    *state = Some(Box::new(current.clone()));
                }
            }
            _ => {}
        }
        self
    }

    /// The state attached to this failure, if any.
    pub fn final_state(&self) -> Option<&GraphState> {
        match self {
            Self::RecursionExceeded { state, .. } | Self::Cancelled { state } => Some(state),
            Self::UnresolvedDirective { state, .. }
            | Self::ParentScopeAtTopLevel { state, .. }
            | Self::Routing { state, .. }
            | Self::Node { state, .. } => state.as_deref(),
            _ => None,
        }
    }

    /// True for errors that end the whole run (as opposed to state/checkpoint
    /// plumbing failures surfaced mid-merge).
    pub fn is_scheduling_failure(&self) -> bool {
        matches!(
            self,
            Self::RecursionExceeded { .. }
                | Self::Cancelled { .. }
                | Self::UnresolvedDirective { .. }
                | Self::ParentScopeAtTopLevel { .. }
                | Self::Routing { .. }
        )
    }
}
