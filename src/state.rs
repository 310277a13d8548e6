//! State container shared between graph nodes
//!
//! A graph declares its state as an ordered set of named fields. Each field
//! is either reducer-governed (`Append`: deltas extend a list, entries are
//! never overwritten) or plain (`Replace`: last write wins). The scheduler
//! merges every node's delta through these rules after each step.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RunError;

/// How updates to a field are merged into the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Reducer-governed: delta values are appended to a list, never overwrite
    Append,
    /// Plain: last write wins
    Replace,
}

/// A single field declaration in a state schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

/// Ordered field declarations for a graph's state.
///
/// Field order is declaration order; distinct graphs (parent and subgraph)
/// declare independent schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSchema {
    fields: Vec<FieldSpec>,
}

impl StateSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a reducer-governed (append-only) field.
    pub fn append_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind: FieldKind::Append,
        });
        self
    }

    /// Declare a plain (last-write-wins) field.
    pub fn plain_field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind: FieldKind::Replace,
        });
        self
    }

    /// Look up the merge rule for a field.
    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.kind)
    }

    /// Whether the schema declares a field with this name.
    pub fn contains(&self, name: &str) -> bool {
        self.kind_of(name).is_some()
    }

    /// Field declarations in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

/// A set of field updates produced by one node execution.
///
/// Entries are ordered; for `Append` fields the order determines the order
/// entries land in the log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDelta {
    entries: Vec<(String, Value)>,
}

impl StateDelta {
    /// Create an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an update for a field. For `Append` fields a list value extends
    /// the log and any other value is appended as a single entry.
    pub fn set(mut self, field: impl Into<String>, value: impl Serialize) -> Self {
        self.entries.push((
            field.into(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        ));
        self
    }

    /// Whether the delta carries no updates.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(field, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }
}

/// Mutable state owned by a single run.
///
/// Built from a schema at run invocation (optionally seeded from a
/// checkpoint), mutated by every node's delta, and returned (or attached to
/// a typed failure) at run termination. Never shared across runs.
#[derive(Debug, Clone)]
pub struct GraphState {
    schema: Arc<StateSchema>,
    values: HashMap<String, Value>,
}

impl GraphState {
    /// Create a fresh state for a schema. `Append` fields start as empty
    /// lists; plain fields start as `null`.
    pub fn new(schema: Arc<StateSchema>) -> Self {
        let values = schema
            .fields()
            .iter()
            .map(|f| {
                let initial = match f.kind {
                    FieldKind::Append => Value::Array(Vec::new()),
                    FieldKind::Replace => Value::Null,
                };
                (f.name.clone(), initial)
            })
            .collect();
        Self { schema, values }
    }

    /// Rebuild a state from persisted field values (checkpoint resume).
    ///
    /// Fields absent from the snapshot keep their initial value; fields the
    /// schema does not declare are rejected.
    pub fn restore(
        schema: Arc<StateSchema>,
        values: HashMap<String, Value>,
    ) -> Result<Self, RunError> {
        let mut state = Self::new(schema);
        for (field, value) in values {
            if !state.schema.contains(&field) {
                return Err(RunError::state_error(format!(
                    "snapshot field '{}' not declared in schema",
                    field
                )));
            }
            state.values.insert(field, value);
        }
        Ok(state)
    }

    /// Seed a field before the run starts. Bypasses merge rules; the field
    /// must be declared.
    pub fn with_value(
        mut self,
        field: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, RunError> {
        let field = field.into();
        if !self.schema.contains(&field) {
            return Err(RunError::state_error(format!(
                "field '{}' not declared in schema",
                field
            )));
        }
        self.values.insert(
            field,
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
        Ok(self)
    }

    /// The schema this state was built from.
    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    /// Read a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// All field values (for snapshots).
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Merge a delta per field rules.
    ///
    /// `Append` fields extend their list (a list delta value is flattened,
    /// anything else lands as one entry); `Replace` fields take the new
    /// value. An undeclared field is a state error.
    pub fn apply(&mut self, delta: &StateDelta) -> Result<(), RunError> {
        for (field, value) in delta.iter() {
            let kind = self.schema.kind_of(field).ok_or_else(|| {
                RunError::state_error(format!("delta field '{}' not declared in schema", field))
            })?;
            match kind {
                FieldKind::Replace => {
                    self.values.insert(field.clone(), value.clone());
                }
                FieldKind::Append => {
                    let log = self
                        .values
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !log.is_array() {
                        *log = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = log {
                        match value {
                            Value::Array(new_items) => items.extend(new_items.iter().cloned()),
                            other => items.push(other.clone()),
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
