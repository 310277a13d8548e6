//! stategraph: a graph-based control and routing engine for multi-step
//! agent workflows.
//!
//! A workflow is a directed graph of named nodes sharing one
//! reducer-governed state. Each step runs one node, merges its delta into
//! the state per field rules, and picks the next node from a directive the
//! node issued or from the static/conditional edge table. Runs terminate at
//! the `END` sentinel, abort at a recursion ceiling, and can be cancelled
//! cooperatively or snapshotted per step into a checkpoint store.
//!
//! ```ignore
//! let graph = GraphBuilder::new(StateSchema::new().append_field("messages"))
//!     .add_node("reason", AgentNode::new(model))
//!     .add_node("act", ToolNode::new(registry))
//!     .set_entry("reason")
//!     .add_conditional_edge("reason", pending_actions("messages"), [
//!         (CONTINUE, "act"),
//!         (FINISH, END),
//!     ])
//!     .add_edge("act", "reason")
//!     .compile(EngineConfig::default())?;
//!
//! let final_state = graph.invoke(graph.initial_state()).await?;
//! ```

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod graph;
pub mod message;
pub mod node;
mod resolver;
mod router;
pub mod runner;
pub mod state;
pub mod subgraph;
pub mod tools;

pub use agent::{pending_actions, AgentNode, LanguageModel, ModelTurn, CONTINUE, FINISH};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, StateSnapshot};
pub use config::{DirectivePolicy, EngineConfig, UnresolvedTargetPolicy};
pub use error::{GraphBuildError, RunError};
pub use graph::{CompiledGraph, GraphBuilder, END};
pub use message::{
    latest_actions, message_log, ActionRecord, ContentBlock, Message, ResultContent, ResultRecord,
    Role,
};
pub use node::{
    Directive, DirectiveScope, DynNode, FnNode, NestedBoundary, Node, NodeContext, NodeOutput,
};
pub use router::BranchPredicate;
pub use runner::RunOptions;
pub use state::{FieldKind, FieldSpec, GraphState, StateDelta, StateSchema};
pub use subgraph::{BoundarySchema, SubgraphNode};
pub use tools::{ToolContext, ToolError, ToolHandler, ToolNode, ToolOutcome, ToolRegistry};
