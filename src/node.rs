//! Node abstraction and control-transfer directives
//!
//! A node is one named unit of computation. It reads the shared state and
//! returns a delta, optionally paired with a [`Directive`] that overrides
//! the static edge table to name the next node, in the current graph or
//! the enclosing one.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::RunError;
use crate::state::{GraphState, StateDelta, StateSchema};

/// Which graph a directive's target lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveScope {
    /// Target is a node of the current graph
    Local,
    /// Target is a node of the enclosing graph; fatal at the top level
    Parent,
}

/// A control-transfer request returned by a node.
///
/// The delta is merged whether or not the routing part is honored; routing
/// follows the resolver's policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directive {
    pub target: String,
    pub delta: StateDelta,
    pub scope: DirectiveScope,
}

impl Directive {
    /// Redirect to a node in the current graph.
    pub fn local(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            delta: StateDelta::new(),
            scope: DirectiveScope::Local,
        }
    }

    /// Redirect to a node in the enclosing graph.
    pub fn parent(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            delta: StateDelta::new(),
            scope: DirectiveScope::Parent,
        }
    }

    /// Attach a state delta to merge alongside the transfer.
    pub fn with_delta(mut self, delta: StateDelta) -> Self {
        self.delta = delta;
        self
    }
}

/// What one node execution produced.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub delta: StateDelta,
    pub directive: Option<Directive>,
}

impl NodeOutput {
    /// No state change, no redirect.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A plain delta; routing falls to the edge table.
    pub fn delta(delta: StateDelta) -> Self {
        Self {
            delta,
            directive: None,
        }
    }

    /// Attach a directive.
    pub fn with_directive(mut self, directive: Directive) -> Self {
        self.directive = Some(directive);
        self
    }
}

/// Execution context handed to a node for one step.
pub struct NodeContext<'a> {
    /// Name this node is registered under
    pub node: &'a str,
    /// Read-only view of the current state
    pub state: &'a GraphState,
    /// Scheduler step count for this run (1-based at first execution)
    pub step: usize,
    /// Cooperative cancellation for long-running work
    pub cancel: &'a CancellationToken,
    /// Engine configuration (tool parallelism, tie-break policy)
    pub config: &'a EngineConfig,
}

/// Boundary contract a nested-graph node exposes for compile-time
/// validation: the fields copied across the boundary and the child's schema.
#[derive(Debug, Clone)]
pub struct NestedBoundary {
    pub fields: Vec<String>,
    pub child_schema: Arc<StateSchema>,
}

/// A named unit of computation in a graph.
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, ctx: NodeContext<'_>) -> Result<NodeOutput, RunError>;

    /// The boundary contract when this node wraps a nested graph.
    ///
    /// The builder validates it during `compile()` regardless of how the
    /// node was registered. Plain nodes return `None`.
    fn nested_boundary(&self) -> Option<NestedBoundary> {
        None
    }
}

/// Shared handle for registered nodes.
pub type DynNode = Arc<dyn Node>;

/// Adapter registering a plain closure as a node.
///
/// The closure gets the state view and the step count; use a full [`Node`]
/// impl when the handler needs async I/O or the cancellation token.
pub struct FnNode<F>
where
    F: Fn(&GraphState, usize) -> Result<NodeOutput, RunError> + Send + Sync,
{
    f: F,
}

impl<F> FnNode<F>
where
    F: Fn(&GraphState, usize) -> Result<NodeOutput, RunError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Node for FnNode<F>
where
    F: Fn(&GraphState, usize) -> Result<NodeOutput, RunError> + Send + Sync,
{
    async fn run(&self, ctx: NodeContext<'_>) -> Result<NodeOutput, RunError> {
        (self.f)(ctx.state, ctx.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateSchema;
    use serde_json::json;

    #[test]
    fn directive_constructors() {
        let d = Directive::local("reviewer");
        assert_eq!(d.target, "reviewer");
        assert_eq!(d.scope, DirectiveScope::Local);
        assert!(d.delta.is_empty());

        let d = Directive::parent("supervisor").with_delta(StateDelta::new().set("phase", "done"));
        assert_eq!(d.scope, DirectiveScope::Parent);
        assert!(!d.delta.is_empty());
    }

    #[test]
    fn directive_serde_roundtrip() {
        let d = Directive::local("act").with_delta(StateDelta::new().set("phase", json!("x")));
        let s = serde_json::to_string(&d).unwrap();
        let back: Directive = serde_json::from_str(&s).unwrap();
        assert_eq!(back.target, "act");
        assert_eq!(back.scope, DirectiveScope::Local);
    }

    #[tokio::test]
    async fn fn_node_runs_closure() {
        let node = FnNode::new(|_state, step| {
            Ok(NodeOutput::delta(StateDelta::new().set("phase", step)))
        });

        let schema = Arc::new(StateSchema::new().plain_field("phase"));
        let state = GraphState::new(schema);
        let cancel = CancellationToken::new();
        let config = EngineConfig::default();
        let ctx = NodeContext {
            node: "test",
            state: &state,
            step: 3,
            cancel: &cancel,
            config: &config,
        };

        let out = node.run(ctx).await.unwrap();
        assert!(out.directive.is_none());
        let (field, value) = out.delta.iter().next().unwrap();
        assert_eq!(field, "phase");
        assert_eq!(value, &json!(3));
    }
}
