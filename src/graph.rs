//! Graph builder DSL and compilation
//!
//! Provides a fluent API for declaring nodes, edges, and the entry point,
//! then validates the definition and compiles it into a runnable
//! [`CompiledGraph`]. All structural validation happens here; a graph that
//! compiles cannot hit an unknown node or an illegal boundary schema at run
//! time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{GraphBuildError, RunError};
use crate::node::{DynNode, NestedBoundary, Node};
use crate::router::{BranchPredicate, EdgeTable};
use crate::runner::{self, RunOptions};
use crate::state::{FieldKind, GraphState, StateSchema};
use crate::subgraph::SubgraphNode;

/// Sentinel target for terminal edges.
pub const END: &str = "END";

/// Builder for a graph definition.
pub struct GraphBuilder {
    name: String,
    schema: Arc<StateSchema>,
    nodes: Vec<(String, DynNode)>,
    static_edges: Vec<(String, String)>,
    conditional_edges: Vec<(String, BranchPredicate, HashMap<String, String>)>,
    directive_targets: Vec<String>,
    entry: Option<String>,
}

impl GraphBuilder {
    /// Start a graph over the given state schema.
    pub fn new(schema: StateSchema) -> Self {
        Self {
            name: String::new(),
            schema: Arc::new(schema),
            nodes: Vec::new(),
            static_edges: Vec::new(),
            conditional_edges: Vec::new(),
            directive_targets: Vec::new(),
            entry: None,
        }
    }

    /// Name the graph (appears in log fields).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register a node under a unique name.
    pub fn add_node(mut self, name: impl Into<String>, node: impl Node + 'static) -> Self {
        self.nodes.push((name.into(), Arc::new(node)));
        self
    }

    /// Register an already-shared node handle.
    pub fn add_shared_node(mut self, name: impl Into<String>, node: DynNode) -> Self {
        self.nodes.push((name.into(), node));
        self
    }

    /// Wire a nested graph in as a single node.
    ///
    /// Equivalent to [`GraphBuilder::add_node`]; the subgraph's boundary
    /// schema is validated during `compile()` whichever way it was
    /// registered: every boundary field must be plain in both the parent's
    /// and the child's schema.
    pub fn add_subgraph(self, name: impl Into<String>, subgraph: SubgraphNode) -> Self {
        self.add_node(name, subgraph)
    }

    /// Declare a node as a known directive target.
    ///
    /// Directive routing is dynamic, so the reachability check cannot see
    /// it. A declared target counts as reachable (and seeds reachability
    /// for its own successors) even when no static or conditional edge
    /// points at it.
    pub fn add_directive_target(mut self, name: impl Into<String>) -> Self {
        self.directive_targets.push(name.into());
        self
    }

    /// Add a static edge.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.static_edges.push((from.into(), to.into()));
        self
    }

    /// Add a conditional edge: the predicate runs against the post-delta
    /// state and its branch value selects a target.
    pub fn add_conditional_edge(
        mut self,
        from: impl Into<String>,
        predicate: BranchPredicate,
        branches: impl IntoIterator<Item = (&'static str, &'static str)>,
    ) -> Self {
        let branches = branches
            .into_iter()
            .map(|(b, t)| (b.to_string(), t.to_string()))
            .collect();
        self.conditional_edges.push((from.into(), predicate, branches));
        self
    }

    /// Set the entry node.
    pub fn set_entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Validate the definition and produce a runnable graph.
    ///
    /// Deterministic: identical definitions always produce the same outcome.
    pub fn compile(self, config: EngineConfig) -> Result<CompiledGraph, GraphBuildError> {
        let entry = self.entry.ok_or(GraphBuildError::NoEntryPoint)?;

        let mut nodes: HashMap<String, DynNode> = HashMap::new();
        for (name, node) in self.nodes {
            let boundary = node.nested_boundary();
            if nodes.insert(name.clone(), node).is_some() {
                return Err(GraphBuildError::DuplicateNode(name));
            }
            if let Some(boundary) = boundary {
                validate_boundary(&name, &boundary, &self.schema)?;
            }
        }

        if !nodes.contains_key(&entry) {
            return Err(GraphBuildError::UnknownNode(entry));
        }

        let mut edges = EdgeTable::default();
        for (from, to) in self.static_edges {
            if !nodes.contains_key(&from) {
                return Err(GraphBuildError::UnknownNode(from));
            }
            if to != END && !nodes.contains_key(&to) {
                return Err(GraphBuildError::UnknownNode(to));
            }
            edges.set_static(from, to);
        }
        for (from, predicate, branches) in self.conditional_edges {
            if !nodes.contains_key(&from) {
                return Err(GraphBuildError::UnknownNode(from));
            }
            for target in branches.values() {
                if target != END && !nodes.contains_key(target) {
                    return Err(GraphBuildError::UnknownNode(target.clone()));
                }
            }
            edges.set_conditional(from, predicate, branches);
        }

        for target in &self.directive_targets {
            if !nodes.contains_key(target) {
                return Err(GraphBuildError::UnknownNode(target.clone()));
            }
        }

        check_reachability(&entry, &self.directive_targets, &nodes, &edges)?;

        Ok(CompiledGraph {
            name: self.name,
            schema: self.schema,
            nodes,
            edges,
            entry,
            config,
        })
    }
}

/// Boundary fields must be plain on both sides: reducer semantics belong to
/// a graph's own merge step and may not be re-declared across the boundary.
fn validate_boundary(
    node: &str,
    boundary: &NestedBoundary,
    parent: &StateSchema,
) -> Result<(), GraphBuildError> {
    for field in &boundary.fields {
        match parent.kind_of(field) {
            None => {
                return Err(GraphBuildError::schema(
                    field,
                    format!("subgraph '{}' boundary field not in parent schema", node),
                ))
            }
            Some(FieldKind::Append) => {
                return Err(GraphBuildError::schema(
                    field,
                    format!(
                        "subgraph '{}' declares a reducer-governed parent field in its boundary",
                        node
                    ),
                ))
            }
            Some(FieldKind::Replace) => {}
        }
        match boundary.child_schema.kind_of(field) {
            None => {
                return Err(GraphBuildError::schema(
                    field,
                    format!("subgraph '{}' boundary field not in subgraph schema", node),
                ))
            }
            Some(FieldKind::Append) => {
                return Err(GraphBuildError::schema(
                    field,
                    format!(
                        "subgraph '{}' declares a reducer-governed field in its own boundary schema",
                        node
                    ),
                ))
            }
            Some(FieldKind::Replace) => {}
        }
    }
    Ok(())
}

fn check_reachability(
    entry: &str,
    directive_targets: &[String],
    nodes: &HashMap<String, DynNode>,
    edges: &EdgeTable,
) -> Result<(), GraphBuildError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    seen.insert(entry);
    queue.push_back(entry);
    for target in directive_targets {
        if seen.insert(target) {
            queue.push_back(target);
        }
    }

    while let Some(current) = queue.pop_front() {
        for target in edges.targets(current) {
            if target != END && seen.insert(target) {
                queue.push_back(target);
            }
        }
    }

    let mut names: Vec<&String> = nodes.keys().collect();
    names.sort();
    for name in names {
        if !seen.contains(name.as_str()) {
            return Err(GraphBuildError::Unreachable(name.clone()));
        }
    }
    Ok(())
}

/// A validated, runnable graph.
pub struct CompiledGraph {
    name: String,
    schema: Arc<StateSchema>,
    nodes: HashMap<String, DynNode>,
    edges: EdgeTable,
    entry: String,
    config: EngineConfig,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    /// Graph name (may be empty).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The state schema this graph runs over.
    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Engine configuration fixed at compile time.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A fresh state for this graph's schema.
    pub fn initial_state(&self) -> GraphState {
        GraphState::new(self.schema.clone())
    }

    /// Entry node name.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Whether the graph has a node with this name.
    pub fn contains_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub(crate) fn node(&self, name: &str) -> Option<&DynNode> {
        self.nodes.get(name)
    }

    pub(crate) fn edges(&self) -> &EdgeTable {
        &self.edges
    }

    /// Run the graph to completion with default options.
    pub async fn invoke(&self, initial_state: GraphState) -> Result<GraphState, RunError> {
        self.invoke_with(initial_state, RunOptions::default()).await
    }

    /// Run the graph with explicit options (thread id, cancellation token,
    /// checkpoint store).
    pub async fn invoke_with(
        &self,
        initial_state: GraphState,
        options: RunOptions,
    ) -> Result<GraphState, RunError> {
        runner::run(self, initial_state, &options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FnNode, NodeOutput};
    use crate::state::StateDelta;

    fn passthrough() -> FnNode<impl Fn(&GraphState, usize) -> Result<NodeOutput, RunError> + Send + Sync>
    {
        FnNode::new(|_, _| Ok(NodeOutput::empty()))
    }

    fn schema() -> StateSchema {
        StateSchema::new().append_field("messages").plain_field("phase")
    }

    #[test]
    fn basic_graph_compiles() {
        let graph = GraphBuilder::new(schema())
            .name("basic")
            .add_node("start", passthrough())
            .add_node("next", passthrough())
            .set_entry("start")
            .add_edge("start", "next")
            .add_edge("next", END)
            .compile(EngineConfig::default())
            .unwrap();

        assert_eq!(graph.name(), "basic");
        assert_eq!(graph.entry(), "start");
        assert!(graph.contains_node("start"));
        assert!(!graph.contains_node("missing"));
    }

    #[test]
    fn missing_entry_is_rejected() {
        let result = GraphBuilder::new(schema())
            .add_node("start", passthrough())
            .compile(EngineConfig::default());
        assert_eq!(result.err(), Some(GraphBuildError::NoEntryPoint));
    }

    #[test]
    fn duplicate_node_is_rejected() {
        let result = GraphBuilder::new(schema())
            .add_node("start", passthrough())
            .add_node("start", passthrough())
            .set_entry("start")
            .compile(EngineConfig::default());
        assert_eq!(result.err(), Some(GraphBuildError::DuplicateNode("start".into())));
    }

    #[test]
    fn unknown_edge_target_is_rejected() {
        let result = GraphBuilder::new(schema())
            .add_node("start", passthrough())
            .set_entry("start")
            .add_edge("start", "missing")
            .compile(EngineConfig::default());
        assert_eq!(result.err(), Some(GraphBuildError::UnknownNode("missing".into())));
    }

    #[test]
    fn unknown_conditional_branch_target_is_rejected() {
        let predicate: BranchPredicate = Arc::new(|_| "go".to_string());
        let result = GraphBuilder::new(schema())
            .add_node("start", passthrough())
            .set_entry("start")
            .add_conditional_edge("start", predicate, [("go", "missing")])
            .compile(EngineConfig::default());
        assert_eq!(result.err(), Some(GraphBuildError::UnknownNode("missing".into())));
    }

    #[test]
    fn unreachable_node_is_rejected() {
        let result = GraphBuilder::new(schema())
            .add_node("start", passthrough())
            .add_node("island", passthrough())
            .set_entry("start")
            .add_edge("start", END)
            .compile(EngineConfig::default());
        assert_eq!(result.err(), Some(GraphBuildError::Unreachable("island".into())));
    }

    #[test]
    fn directive_target_counts_as_reachable() {
        // "handoff_only" has no inbound edge; directives are its only way in.
        let graph = GraphBuilder::new(schema())
            .add_node("start", passthrough())
            .add_node("handoff_only", passthrough())
            .set_entry("start")
            .add_edge("start", END)
            .add_edge("handoff_only", END)
            .add_directive_target("handoff_only")
            .compile(EngineConfig::default())
            .unwrap();

        assert!(graph.contains_node("handoff_only"));
    }

    #[test]
    fn undeclared_directive_only_node_is_still_rejected() {
        let result = GraphBuilder::new(schema())
            .add_node("start", passthrough())
            .add_node("handoff_only", passthrough())
            .set_entry("start")
            .add_edge("start", END)
            .add_edge("handoff_only", END)
            .compile(EngineConfig::default());
        assert_eq!(
            result.err(),
            Some(GraphBuildError::Unreachable("handoff_only".into()))
        );
    }

    #[test]
    fn unknown_directive_target_is_rejected() {
        let result = GraphBuilder::new(schema())
            .add_node("start", passthrough())
            .set_entry("start")
            .add_directive_target("ghost")
            .compile(EngineConfig::default());
        assert_eq!(result.err(), Some(GraphBuildError::UnknownNode("ghost".into())));
    }

    #[test]
    fn subgraph_registered_via_add_node_is_still_validated() {
        use crate::subgraph::BoundarySchema;

        let child = GraphBuilder::new(StateSchema::new().append_field("messages"))
            .add_node("inner", passthrough())
            .set_entry("inner")
            .add_edge("inner", END)
            .compile(EngineConfig::default())
            .unwrap();
        let sub = SubgraphNode::new(child, BoundarySchema::new().input("messages"));

        let err = GraphBuilder::new(schema())
            .add_node("worker", sub)
            .set_entry("worker")
            .compile(EngineConfig::default())
            .unwrap_err();

        assert!(matches!(
            err,
            GraphBuildError::SchemaValidation { field, .. } if field == "messages"
        ));
    }

    #[test]
    fn compile_is_deterministic() {
        let build = || {
            GraphBuilder::new(schema())
                .add_node("a", passthrough())
                .add_node("b", passthrough())
                .add_node("orphan", passthrough())
                .set_entry("a")
                .add_edge("a", "b")
                .compile(EngineConfig::default())
        };
        for _ in 0..10 {
            assert_eq!(build().err(), Some(GraphBuildError::Unreachable("orphan".into())));
        }
    }

    #[tokio::test]
    async fn invoke_runs_to_terminal() {
        let graph = GraphBuilder::new(schema())
            .add_node(
                "start",
                FnNode::new(|_, _| {
                    Ok(NodeOutput::delta(StateDelta::new().set("phase", "done")))
                }),
            )
            .set_entry("start")
            .add_edge("start", END)
            .compile(EngineConfig::default())
            .unwrap();

        let result = graph.invoke(graph.initial_state()).await.unwrap();
        assert_eq!(result.get("phase"), Some(&serde_json::json!("done")));
    }
}
