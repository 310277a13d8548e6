//! Subgraph boundary: a nested graph exposed to its parent as one node
//!
//! The boundary schema names the plain fields copied into the child before
//! it runs and copied back as a delta afterwards. Reducer semantics belong
//! to each graph's own merge step, so a reducer-governed field in the
//! boundary is rejected when the subgraph is wired into a parent, at
//! `compile()` time rather than at run time.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RunError;
use crate::graph::CompiledGraph;
use crate::node::{Directive, DirectiveScope, NestedBoundary, Node, NodeContext, NodeOutput};
use crate::runner::{self, RunOptions, ScopedOutcome};
use crate::state::StateDelta;

/// Declared input/output fields at a subgraph boundary.
#[derive(Debug, Clone, Default)]
pub struct BoundarySchema {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl BoundarySchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy this parent field into the child before the run.
    pub fn input(mut self, field: impl Into<String>) -> Self {
        self.inputs.push(field.into());
        self
    }

    /// Copy this child field back into the parent after the run.
    pub fn output(mut self, field: impl Into<String>) -> Self {
        self.outputs.push(field.into());
        self
    }

    /// A field copied both ways.
    pub fn inout(self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.input(field.clone()).output(field)
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }
}

/// A compiled graph wrapped as a single parent node.
pub struct SubgraphNode {
    graph: Arc<CompiledGraph>,
    boundary: BoundarySchema,
}

impl SubgraphNode {
    pub fn new(graph: CompiledGraph, boundary: BoundarySchema) -> Self {
        Self {
            graph: Arc::new(graph),
            boundary,
        }
    }

    /// All boundary fields, deduplicated, for compile-time validation.
    fn boundary_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .boundary
            .inputs
            .iter()
            .chain(self.boundary.outputs.iter())
            .cloned()
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }
}

#[async_trait]
impl Node for SubgraphNode {
    fn nested_boundary(&self) -> Option<NestedBoundary> {
        Some(NestedBoundary {
            fields: self.boundary_fields(),
            child_schema: self.graph.schema().clone(),
        })
    }

    async fn run(&self, ctx: NodeContext<'_>) -> Result<NodeOutput, RunError> {
        // Translate parent state into the child's schema: a plain copy of
        // each declared input field.
        let mut child_state = self.graph.initial_state();
        for field in self.boundary.inputs() {
            if let Some(value) = ctx.state.get(field) {
                child_state = child_state.with_value(field, value.clone())?;
            }
        }

        tracing::info!(
            node = %ctx.node,
            subgraph = %self.graph.name(),
            step = ctx.step,
            "entering subgraph"
        );

        let options = RunOptions::default().with_cancellation(ctx.cancel.clone());
        let outcome = runner::run_scoped(&self.graph, child_state, &options, true)
            .await
            .map_err(|e| RunError::node_error_with_source(ctx.node, "subgraph run failed", e))?;

        let (child_state, bubbled) = match outcome {
            ScopedOutcome::Finished(state) => (state, None),
            ScopedOutcome::Bubbled {
                state, directive, ..
            } => (state, Some(directive)),
        };

        // Translate the child's output back into a delta against the
        // parent's schema.
        let mut delta = StateDelta::new();
        for field in self.boundary.outputs() {
            if let Some(value) = child_state.get(field) {
                delta = delta.set(field, value.clone());
            }
        }

        let mut output = NodeOutput::delta(delta);
        if let Some(directive) = bubbled {
            tracing::debug!(
                node = %ctx.node,
                target = %directive.target,
                "subgraph surfaced a parent-scope directive"
            );
            // One level popped: the target now names a node of this graph.
            output = output.with_directive(Directive {
                target: directive.target,
                delta: directive.delta,
                scope: DirectiveScope::Local,
            });
        }
        Ok(output)
    }
}
