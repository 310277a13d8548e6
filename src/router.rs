//! Static and conditional edge table
//!
//! Consulted by the scheduler when a node returns no directive (or when a
//! directive is dropped under the fallback policy): either a single static
//! successor, or a predicate evaluated against the post-delta state whose
//! branch value maps to a target.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RunError;
use crate::graph::END;
use crate::state::GraphState;

/// Predicate for conditional edges: inspects the post-delta state and
/// returns a branch value.
pub type BranchPredicate = Arc<dyn Fn(&GraphState) -> String + Send + Sync>;

pub(crate) enum Edge {
    Static(String),
    Conditional {
        predicate: BranchPredicate,
        branches: HashMap<String, String>,
    },
}

/// Edge table for one graph.
#[derive(Default)]
pub(crate) struct EdgeTable {
    edges: HashMap<String, Edge>,
}

impl EdgeTable {
    pub(crate) fn set_static(&mut self, from: String, to: String) {
        self.edges.insert(from, Edge::Static(to));
    }

    pub(crate) fn set_conditional(
        &mut self,
        from: String,
        predicate: BranchPredicate,
        branches: HashMap<String, String>,
    ) {
        self.edges.insert(from, Edge::Conditional { predicate, branches });
    }

    pub(crate) fn has_edge(&self, from: &str) -> bool {
        self.edges.contains_key(from)
    }

    /// Every target reachable from `from` in one hop.
    pub(crate) fn targets(&self, from: &str) -> Vec<&str> {
        match self.edges.get(from) {
            Some(Edge::Static(to)) => vec![to.as_str()],
            Some(Edge::Conditional { branches, .. }) => {
                branches.values().map(String::as_str).collect()
            }
            None => Vec::new(),
        }
    }

    /// Resolve the next node after `from`. A node with no outgoing edge is
    /// terminal; a conditional branch value with no mapped target is a
    /// routing error.
    pub(crate) fn next(&self, from: &str, state: &GraphState) -> Result<String, RunError> {
        match self.edges.get(from) {
            None => Ok(END.to_string()),
            Some(Edge::Static(to)) => Ok(to.clone()),
            Some(Edge::Conditional { predicate, branches }) => {
                let branch = predicate(state);
                branches.get(&branch).cloned().ok_or(RunError::Routing {
                    node: from.to_string(),
                    branch,
                    state: None,
                })
            }
        }
    }
}
