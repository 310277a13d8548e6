//! Run loop: sequential node scheduling
//!
//! One node runs at a time. After each execution the node's delta (and any
//! directive delta) is merged, the next node is resolved (directive first,
//! static/conditional edge table as fallback), a snapshot is recorded, and
//! the loop continues until `END`, the recursion ceiling, cancellation, or
//! a fatal error.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checkpoint::{CheckpointStore, StateSnapshot};
use crate::error::RunError;
use crate::graph::{CompiledGraph, END};
use crate::node::{Directive, NodeContext};
use crate::resolver::{self, Resolution};
use crate::state::GraphState;

/// Per-run options: identity, cancellation, persistence.
#[derive(Clone)]
pub struct RunOptions {
    thread_id: String,
    cancel: CancellationToken,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            thread_id: Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            checkpoints: None,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-chosen thread id instead of a generated one.
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    /// Observe this token for cooperative cancellation.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Record a snapshot after every merged step.
    pub fn with_checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

/// How a scoped (possibly nested) run ended without error.
pub(crate) enum ScopedOutcome {
    /// Reached `END`
    Finished(GraphState),
    /// A parent-scoped directive stopped this graph level
    Bubbled {
        node: String,
        state: GraphState,
        directive: Directive,
    },
}

/// Run a top-level graph to completion.
///
/// A parent-scoped directive at this level has nowhere to go and is fatal.
pub(crate) async fn run(
    graph: &CompiledGraph,
    initial_state: GraphState,
    options: &RunOptions,
) -> Result<GraphState, RunError> {
    match run_scoped(graph, initial_state, options, false).await? {
        ScopedOutcome::Finished(state) => Ok(state),
        ScopedOutcome::Bubbled { node, state, .. } => Err(RunError::ParentScopeAtTopLevel {
            node,
            state: Some(Box::new(state)),
        }),
    }
}

/// Run one graph level. Nested levels are entered through a subgraph node,
/// which converts a `Bubbled` outcome back into a local directive.
pub(crate) async fn run_scoped(
    graph: &CompiledGraph,
    mut state: GraphState,
    options: &RunOptions,
    nested: bool,
) -> Result<ScopedOutcome, RunError> {
    let limit = graph.config().recursion_limit;
    let mut current = graph.entry().to_string();
    let mut step: usize = 0;

    tracing::info!(
        graph = %graph.name(),
        thread_id = %options.thread_id,
        entry = %current,
        nested,
        "run started"
    );

    loop {
        if options.cancel.is_cancelled() {
            tracing::warn!(
                graph = %graph.name(),
                thread_id = %options.thread_id,
                step,
                "run cancelled"
            );
            return Err(RunError::Cancelled {
                state: Box::new(state),
            });
        }

        if current == END {
            tracing::info!(
                graph = %graph.name(),
                thread_id = %options.thread_id,
                steps = step,
                "run finished"
            );
            return Ok(ScopedOutcome::Finished(state));
        }

        if step >= limit {
            tracing::error!(
                graph = %graph.name(),
                thread_id = %options.thread_id,
                limit,
                next = %current,
                "recursion limit exceeded"
            );
            return Err(RunError::RecursionExceeded {
                limit,
                steps: step,
                last_node: current,
                state: Box::new(state),
            });
        }
        step += 1;

        let node = graph.node(&current).ok_or_else(|| {
            // Unreachable for compiled graphs; every routed target is validated.
            RunError::node_error(current.as_str(), "node missing from compiled graph")
                .attach_state(&state)
        })?;

        tracing::debug!(graph = %graph.name(), node = %current, step, "executing node");
        let ctx = NodeContext {
            node: &current,
            state: &state,
            step,
            cancel: &options.cancel,
            config: graph.config(),
        };
        let output = node.run(ctx).await.map_err(|e| e.attach_state(&state))?;

        state
            .apply(&output.delta)
            .map_err(|e| e.attach_state(&state))?;

        // The directive's delta merges regardless of how routing resolves.
        let next = match output.directive {
            Some(directive) => {
                state
                    .apply(&directive.delta)
                    .map_err(|e| e.attach_state(&state))?;
                match resolver::resolve(directive, &current, graph)
                    .map_err(|e| e.attach_state(&state))?
                {
                    Resolution::Goto(target) => target,
                    Resolution::Fallback => graph
                        .edges()
                        .next(&current, &state)
                        .map_err(|e| e.attach_state(&state))?,
                    Resolution::Bubble(directive) => {
                        record_step(options, step, &directive.target, &state).await?;
                        return Ok(ScopedOutcome::Bubbled {
                            node: current,
                            state,
                            directive,
                        });
                    }
                }
            }
            None => graph
                .edges()
                .next(&current, &state)
                .map_err(|e| e.attach_state(&state))?,
        };

        record_step(options, step, &next, &state).await?;
        current = next;
    }
}

async fn record_step(
    options: &RunOptions,
    step: usize,
    next_node: &str,
    state: &GraphState,
) -> Result<(), RunError> {
    if let Some(store) = &options.checkpoints {
        let snapshot = StateSnapshot::capture(&options.thread_id, step, next_node, state);
        store.put(snapshot).await?;
    }
    Ok(())
}
