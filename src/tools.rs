//! Tool-execution step
//!
//! Executes every action record requested by the latest reasoning turn and
//! merges exactly one result record per action back into the message log.
//! Handlers run concurrently behind a semaphore, but merge order is always
//! request order, so the log is identical whether handlers run sequentially
//! or in parallel. One failing action never aborts the turn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::DirectivePolicy;
use crate::error::RunError;
use crate::message::{latest_actions, ActionRecord, Message, ResultContent, ResultRecord};
use crate::node::{Directive, Node, NodeContext, NodeOutput};
use crate::state::StateDelta;

/// Failure inside a tool handler. Converted to an error-flagged result
/// record, never propagated past the tool-execution step.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for ToolError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ToolError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// What a handler produced for one action.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// Plain result content
    Result(ResultContent),
    /// Routing candidate; a synthesized result record still answers the action
    Directive(Directive),
    /// Result content plus a routing candidate
    ResultWithDirective(ResultContent, Directive),
}

/// Context handed to a handler for one call.
#[derive(Clone)]
pub struct ToolContext {
    /// Scheduler step of the tool-execution node
    pub step: usize,
    /// Cooperative cancellation; in-flight handlers are allowed to finish
    pub cancel: CancellationToken,
}

/// A registered action handler.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, args: Value, ctx: ToolContext) -> Result<ToolOutcome, ToolError>;
}

/// Read-only name → handler map, built once at process start.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name. Later registrations with the
    /// same name replace earlier ones.
    pub fn register(mut self, handler: impl ToolHandler + 'static) -> Self {
        let handler: Arc<dyn ToolHandler> = Arc::new(handler);
        self.handlers.insert(handler.name().to_string(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The tool-execution node.
///
/// Reads action records from the latest assistant message, dispatches each
/// to its registered handler, and appends one result record per action to
/// the message log. Directives returned by handlers are tie-broken by the
/// configured [`DirectivePolicy`]; all result records and every directive's
/// state delta merge regardless, only the winner's routing is honored.
pub struct ToolNode {
    registry: Arc<ToolRegistry>,
    message_field: String,
}

impl ToolNode {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            message_field: "messages".to_string(),
        }
    }

    /// Use a message-log field other than `"messages"`.
    pub fn with_message_field(mut self, field: impl Into<String>) -> Self {
        self.message_field = field.into();
        self
    }

    async fn dispatch(
        registry: Arc<ToolRegistry>,
        action: ActionRecord,
        ctx: ToolContext,
        timeout: Option<std::time::Duration>,
    ) -> (ResultRecord, Option<Directive>) {
        let Some(handler) = registry.get(&action.name).cloned() else {
            return (
                ResultRecord::error(
                    &action.id,
                    format!("no handler registered for tool '{}'", action.name),
                ),
                None,
            );
        };

        let call = handler.call(action.arguments.clone(), ctx);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolError::new(format!(
                    "tool '{}' timed out after {:?}",
                    action.name, limit
                ))),
            },
            None => call.await,
        };

        match outcome {
            Ok(ToolOutcome::Result(content)) => (ResultRecord::ok(&action.id, content), None),
            Ok(ToolOutcome::Directive(directive)) => (
                ResultRecord::ok(
                    &action.id,
                    format!("control transferred to '{}'", directive.target),
                ),
                Some(directive),
            ),
            Ok(ToolOutcome::ResultWithDirective(content, directive)) => {
                (ResultRecord::ok(&action.id, content), Some(directive))
            }
            Err(err) => (
                ResultRecord::error(&action.id, format!("tool '{}' failed: {}", action.name, err)),
                None,
            ),
        }
    }
}

#[async_trait]
impl Node for ToolNode {
    async fn run(&self, ctx: NodeContext<'_>) -> Result<NodeOutput, RunError> {
        let actions = latest_actions(ctx.state, &self.message_field);
        if actions.is_empty() {
            tracing::debug!(node = %ctx.node, "no pending actions");
            return Ok(NodeOutput::empty());
        }

        tracing::info!(
            node = %ctx.node,
            step = ctx.step,
            action_count = actions.len(),
            "dispatching tool batch"
        );

        let semaphore = Arc::new(Semaphore::new(ctx.config.tool_parallelism));
        let timeout = ctx.config.tool_timeout;
        let tool_ctx = ToolContext {
            step: ctx.step,
            cancel: ctx.cancel.clone(),
        };

        let mut handles = Vec::with_capacity(actions.len());
        for action in &actions {
            let registry = self.registry.clone();
            let action = action.clone();
            let tool_ctx = tool_ctx.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                Self::dispatch(registry, action, tool_ctx, timeout).await
            }));
        }

        // Collect in request order regardless of completion order; a panic
        // inside a handler becomes an error record for that action alone.
        let mut records = Vec::with_capacity(actions.len());
        let mut directives: Vec<(usize, Directive)> = Vec::new();
        for (idx, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok((record, directive)) => {
                    if let Some(directive) = directive {
                        directives.push((idx, directive));
                    }
                    records.push(record);
                }
                Err(join_err) => {
                    records.push(ResultRecord::error(
                        &actions[idx].id,
                        format!("tool '{}' panicked: {}", actions[idx].name, join_err),
                    ));
                }
            }
        }

        let mut delta = StateDelta::new();
        for record in records {
            delta = delta.set(&self.message_field, Message::result(record));
        }

        let (directive, losers) =
            split_directives(ctx.node, directives, ctx.config.directive_policy);

        // Losing directives keep their state updates; only routing is
        // tie-broken.
        for loser in losers {
            for (field, value) in loser.delta.iter() {
                delta = delta.set(field, value.clone());
            }
        }

        let mut output = NodeOutput::delta(delta);
        if let Some(directive) = directive {
            output = output.with_directive(directive);
        }
        Ok(output)
    }
}

/// Apply the configured tie-break: one winner routes, the losers come back
/// so their state deltas can still merge.
fn split_directives(
    node: &str,
    mut directives: Vec<(usize, Directive)>,
    policy: DirectivePolicy,
) -> (Option<Directive>, Vec<Directive>) {
    if directives.len() <= 1 {
        return (directives.pop().map(|(_, d)| d), Vec::new());
    }
    let winner_idx = match policy {
        DirectivePolicy::FirstWins => 0,
        DirectivePolicy::LastWins => directives.len() - 1,
    };
    let (_, winner) = directives.remove(winner_idx);
    let losers: Vec<Directive> = directives
        .into_iter()
        .map(|(_, directive)| {
            tracing::warn!(
                node = %node,
                target = %directive.target,
                policy = ?policy,
                "directive lost tie-break; state delta kept, routing dropped"
            );
            directive
        })
        .collect();
    (Some(winner), losers)
}
