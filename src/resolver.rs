//! Directive resolution
//!
//! Interprets a node's control-transfer directive against the current graph:
//! local targets must exist in the current node set (policy decides what
//! happens when they don't), parent-scoped directives bubble one graph level
//! and are always fatal at the top.

use crate::config::UnresolvedTargetPolicy;
use crate::error::RunError;
use crate::graph::{CompiledGraph, END};
use crate::node::{Directive, DirectiveScope};

/// Outcome of resolving one directive.
#[derive(Debug)]
pub(crate) enum Resolution {
    /// Transfer control to this node (or `END`)
    Goto(String),
    /// Directive dropped; fall through to the static edge table
    Fallback,
    /// Parent-scoped; surface to the enclosing graph
    Bubble(Directive),
}

/// Resolve `directive` issued by `node` within `graph`.
///
/// The directive's delta is the caller's concern and has already been
/// merged; only routing is decided here.
pub(crate) fn resolve(
    directive: Directive,
    node: &str,
    graph: &CompiledGraph,
) -> Result<Resolution, RunError> {
    match directive.scope {
        DirectiveScope::Parent => Ok(Resolution::Bubble(directive)),
        DirectiveScope::Local => {
            if directive.target == END || graph.contains_node(&directive.target) {
                return Ok(Resolution::Goto(directive.target));
            }
            match graph.config().unresolved_target_policy {
                UnresolvedTargetPolicy::FallbackWithWarning => {
                    tracing::warn!(
                        node = %node,
                        target = %directive.target,
                        "directive target not in graph; falling back to static edge"
                    );
                    Ok(Resolution::Fallback)
                }
                UnresolvedTargetPolicy::Strict => Err(RunError::UnresolvedDirective {
                    node: node.to_string(),
                    target: directive.target,
                    state: None,
                }),
            }
        }
    }
}
