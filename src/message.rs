//! Message log entries, action records, and result records
//!
//! The message log is the reducer-governed field most graphs carry. A
//! reasoning node appends an assistant message holding zero or more
//! [`ActionRecord`]s; the tool-execution step answers each with exactly one
//! [`ResultRecord`] whose content is guaranteed non-empty.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::GraphState;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One requested external operation produced by a reasoning node in one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Correlation id pairing this request with its result record
    pub id: String,
    /// Registered handler name to dispatch to
    pub name: String,
    pub arguments: Value,
}

impl ActionRecord {
    /// Create an action record with a fresh correlation id.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    /// Create an action record with an explicit id (checkpoint replay, tests).
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A structured piece of result content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Json { data: Value },
}

/// Result content: a non-empty string or a non-empty list of blocks.
///
/// Emptiness here breaks downstream consumers, so construction goes through
/// [`ResultRecord`] which replaces empty content before it can reach the
/// merge step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ResultContent {
    /// Whether this content violates the non-empty invariant.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Blocks(blocks) => {
                blocks.is_empty()
                    || blocks.iter().all(|b| match b {
                        ContentBlock::Text { text } => text.trim().is_empty(),
                        ContentBlock::Json { data } => data.is_null(),
                    })
            }
        }
    }
}

impl From<&str> for ResultContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ResultContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// The answer to one action record, paired by correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Correlation id of the action this answers
    pub id: String,
    pub content: ResultContent,
    /// Set when the handler failed and `content` is a diagnostic
    pub error: bool,
}

impl ResultRecord {
    /// Wrap handler output. Empty content is replaced with a synthesized
    /// diagnostic and flagged as an error rather than merged as-is.
    pub fn ok(id: impl Into<String>, content: impl Into<ResultContent>) -> Self {
        let id = id.into();
        let content = content.into();
        if content.is_empty() {
            tracing::warn!(action_id = %id, "empty result content replaced with diagnostic");
            return Self {
                content: ResultContent::Text(format!(
                    "tool returned empty content for action {}",
                    id
                )),
                id,
                error: true,
            };
        }
        Self {
            id,
            content,
            error: false,
        }
    }

    /// Build an error-flagged record with a guaranteed non-empty diagnostic.
    pub fn error(id: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        let id = id.into();
        let mut diagnostic = diagnostic.into();
        if diagnostic.trim().is_empty() {
            diagnostic = format!("tool failed without diagnostic for action {}", id);
        }
        Self {
            id,
            content: ResultContent::Text(diagnostic),
            error: true,
        }
    }
}

/// One entry in the message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque correlation id for this entry
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Action records requested in this turn (assistant messages)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionRecord>,
    /// Result record answering an action (tool messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultRecord>,
}

impl Message {
    fn build(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            actions: Vec::new(),
            result: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::build(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::build(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::build(Role::Assistant, content)
    }

    pub fn assistant_with_actions(content: impl Into<String>, actions: Vec<ActionRecord>) -> Self {
        let mut msg = Self::build(Role::Assistant, content);
        msg.actions = actions;
        msg
    }

    /// A tool message wrapping a result record. The message content mirrors
    /// the record's text so plain consumers of the log see something useful.
    pub fn result(record: ResultRecord) -> Self {
        let content = match &record.content {
            ResultContent::Text(text) => text.clone(),
            ResultContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.clone(),
                    ContentBlock::Json { data } => data.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        };
        let mut msg = Self::build(Role::Tool, content);
        msg.result = Some(record);
        msg
    }

    /// Whether this message still requests actions.
    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }
}

/// Deserialize a state field as a message log. Entries that are not valid
/// messages are skipped.
pub fn message_log(state: &GraphState, field: &str) -> Vec<Message> {
    state
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Action records from the latest assistant message in the log, if the log
/// ends with one. Once tool results follow it, the actions are no longer
/// pending.
pub fn latest_actions(state: &GraphState, field: &str) -> Vec<ActionRecord> {
    let log = message_log(state, field);
    match log.last() {
        Some(msg) if msg.role == Role::Assistant => msg.actions.clone(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{GraphState, StateDelta, StateSchema};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn action_record_ids_are_unique() {
        let a = ActionRecord::new("search", json!({"q": "rust"}));
        let b = ActionRecord::new("search", json!({"q": "rust"}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn empty_text_result_is_replaced() {
        let record = ResultRecord::ok("call-1", "   ");
        assert!(record.error);
        assert!(!record.content.is_empty());
        assert_eq!(record.id, "call-1");
    }

    #[test]
    fn empty_block_list_is_replaced() {
        let record = ResultRecord::ok("call-2", ResultContent::Blocks(vec![]));
        assert!(record.error);
        assert!(!record.content.is_empty());
    }

    #[test]
    fn blocks_of_blank_text_count_as_empty() {
        let content = ResultContent::Blocks(vec![ContentBlock::Text { text: "  ".into() }]);
        assert!(content.is_empty());

        let content = ResultContent::Blocks(vec![ContentBlock::Json { data: json!(null) }]);
        assert!(content.is_empty());

        let content = ResultContent::Blocks(vec![ContentBlock::Json {
            data: json!({"hits": 3}),
        }]);
        assert!(!content.is_empty());
    }

    #[test]
    fn error_record_never_empty() {
        let record = ResultRecord::error("call-3", "");
        assert!(record.error);
        assert!(!record.content.is_empty());
    }

    #[test]
    fn good_result_passes_through() {
        let record = ResultRecord::ok("call-4", "found 3 hits");
        assert!(!record.error);
        assert_eq!(record.content, ResultContent::Text("found 3 hits".into()));
    }

    #[test]
    fn result_message_mirrors_record_text() {
        let msg = Message::result(ResultRecord::ok("call-5", "done"));
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content, "done");
        assert_eq!(msg.result.as_ref().unwrap().id, "call-5");
    }

    #[test]
    fn latest_actions_reads_trailing_assistant_message() {
        let schema = Arc::new(StateSchema::new().append_field("messages"));
        let mut state = GraphState::new(schema);

        let actions = vec![ActionRecord::with_id("a1", "search", json!({}))];
        let delta = StateDelta::new()
            .set("messages", Message::user("hi"))
            .set("messages", Message::assistant_with_actions("", actions));
        state.apply(&delta).unwrap();

        let pending = latest_actions(&state, "messages");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "a1");
    }

    #[test]
    fn latest_actions_empty_after_tool_reply() {
        let schema = Arc::new(StateSchema::new().append_field("messages"));
        let mut state = GraphState::new(schema);

        let actions = vec![ActionRecord::with_id("a1", "search", json!({}))];
        let delta = StateDelta::new()
            .set("messages", Message::assistant_with_actions("", actions))
            .set("messages", Message::result(ResultRecord::ok("a1", "hit")));
        state.apply(&delta).unwrap();

        assert!(latest_actions(&state, "messages").is_empty());
    }

    #[test]
    fn message_serde_roundtrip() {
        let msg = Message::assistant_with_actions(
            "looking things up",
            vec![ActionRecord::with_id("a1", "search", json!({"q": "x"}))],
        );
        let json_str = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json_str).unwrap();
        assert_eq!(msg, back);
    }
}
