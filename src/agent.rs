//! Reasoning node and continuation predicate
//!
//! The reasoning node drives an opaque language-model collaborator: it hands
//! the message log to the model and appends the assistant turn (text plus
//! any requested action records). The [`pending_actions`] predicate is the
//! continuation guard every reasoning/tool cycle edge needs; without it the
//! cycle only stops when the recursion ceiling aborts the run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RunError;
use crate::message::{message_log, ActionRecord, Message, Role};
use crate::node::{Node, NodeContext, NodeOutput};
use crate::router::BranchPredicate;
use crate::state::{GraphState, StateDelta};

/// Branch value while the latest reasoning output still has pending actions.
pub const CONTINUE: &str = "continue";
/// Branch value once the reasoning output carries no actions.
pub const FINISH: &str = "end";

/// One model turn: response text plus requested actions.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub text: String,
    pub actions: Vec<ActionRecord>,
}

impl ModelTurn {
    /// A turn with no actions (stopping signal).
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
        }
    }

    /// A turn requesting actions.
    pub fn with_actions(text: impl Into<String>, actions: Vec<ActionRecord>) -> Self {
        Self {
            text: text.into(),
            actions,
        }
    }
}

/// Opaque language-model collaborator. Behavior and prompt content are the
/// caller's concern; the engine only consumes the returned turn.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, messages: &[Message]) -> Result<ModelTurn, RunError>;
}

/// A reasoning node: feeds the message log to the model and appends the
/// assistant turn.
pub struct AgentNode {
    model: Arc<dyn LanguageModel>,
    message_field: String,
}

impl AgentNode {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            message_field: "messages".to_string(),
        }
    }

    /// Use a message-log field other than `"messages"`.
    pub fn with_message_field(mut self, field: impl Into<String>) -> Self {
        self.message_field = field.into();
        self
    }
}

#[async_trait]
impl Node for AgentNode {
    async fn run(&self, ctx: NodeContext<'_>) -> Result<NodeOutput, RunError> {
        let log = message_log(ctx.state, &self.message_field);
        let turn = self
            .model
            .invoke(&log)
            .await
            .map_err(|e| match e {
                err @ RunError::Node { .. } => err,
                other => RunError::node_error(ctx.node, other.to_string()),
            })?;

        tracing::info!(
            node = %ctx.node,
            step = ctx.step,
            action_count = turn.actions.len(),
            "reasoning turn complete"
        );

        let message = Message::assistant_with_actions(turn.text, turn.actions);
        Ok(NodeOutput::delta(
            StateDelta::new().set(&self.message_field, message),
        ))
    }
}

/// Continuation predicate for reasoning/tool cycles.
///
/// Returns [`CONTINUE`] while the log ends with an assistant message that
/// still carries action records, [`FINISH`] otherwise. Attach it to every
/// cycle edge:
///
/// ```ignore
/// builder.add_conditional_edge("reason", pending_actions("messages"), [
///     (CONTINUE, "act"),
///     (FINISH, END),
/// ])
/// ```
pub fn pending_actions(field: impl Into<String>) -> BranchPredicate {
    let field = field.into();
    Arc::new(move |state: &GraphState| {
        let log = message_log(state, &field);
        match log.last() {
            Some(msg) if msg.role == Role::Assistant && msg.has_actions() => {
                CONTINUE.to_string()
            }
            _ => FINISH.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::state::StateSchema;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct ScriptedModel {
        turns: std::sync::Mutex<Vec<ModelTurn>>,
    }

    impl ScriptedModel {
        fn new(turns: Vec<ModelTurn>) -> Self {
            Self {
                turns: std::sync::Mutex::new(turns),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn invoke(&self, _messages: &[Message]) -> Result<ModelTurn, RunError> {
            let mut turns = self.turns.lock().unwrap();
            if turns.is_empty() {
                return Ok(ModelTurn::text_only("done"));
            }
            Ok(turns.remove(0))
        }
    }

    fn message_state() -> GraphState {
        GraphState::new(Arc::new(StateSchema::new().append_field("messages")))
    }

    #[tokio::test]
    async fn agent_node_appends_assistant_turn() {
        let model = Arc::new(ScriptedModel::new(vec![ModelTurn::with_actions(
            "searching",
            vec![ActionRecord::with_id("a1", "search", json!({"q": "rust"}))],
        )]));
        let node = AgentNode::new(model);

        let mut state = message_state();
        state
            .apply(&StateDelta::new().set("messages", Message::user("find rust docs")))
            .unwrap();

        let cancel = CancellationToken::new();
        let config = EngineConfig::default();
        let ctx = NodeContext {
            node: "reason",
            state: &state,
            step: 1,
            cancel: &cancel,
            config: &config,
        };

        let output = node.run(ctx).await.unwrap();
        state.apply(&output.delta).unwrap();

        let log = message_log(&state, "messages");
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].role, Role::Assistant);
        assert_eq!(log[1].actions.len(), 1);
    }

    #[test]
    fn pending_actions_continues_while_actions_remain() {
        let mut state = message_state();
        state
            .apply(&StateDelta::new().set(
                "messages",
                Message::assistant_with_actions(
                    "",
                    vec![ActionRecord::with_id("a1", "search", json!({}))],
                ),
            ))
            .unwrap();

        let predicate = pending_actions("messages");
        assert_eq!(predicate(&state), CONTINUE);
    }

    #[test]
    fn pending_actions_finishes_without_actions() {
        let mut state = message_state();
        state
            .apply(&StateDelta::new().set("messages", Message::assistant("all done")))
            .unwrap();

        let predicate = pending_actions("messages");
        assert_eq!(predicate(&state), FINISH);
    }

    #[test]
    fn pending_actions_finishes_on_empty_log() {
        let state = message_state();
        let predicate = pending_actions("messages");
        assert_eq!(predicate(&state), FINISH);
    }
}
