//! State merging strategies for parallel branches
//!
//! When sibling nodes run in parallel they all receive the same input state
//! and each produces its own output; a [`StateMerger`] combines those outputs
//! back into one state. The built-in strategies cover the common cases;
//! [`CustomMerger`] takes a closure for everything else.

use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Strategy combining the current state with updates from parallel siblings
pub trait StateMerger: Send + Sync {
    /// Merge `updates` (in sibling order) into `current`
    fn merge(&self, current: Value, updates: Vec<Value>) -> Value;

    fn name(&self) -> &str;
}

/// Keep only the last update; earlier writes are discarded
#[derive(Debug, Clone, Copy, Default)]
pub struct LastValueMerger;

impl StateMerger for LastValueMerger {
    fn merge(&self, current: Value, mut updates: Vec<Value>) -> Value {
        updates.pop().unwrap_or(current)
    }

    fn name(&self) -> &str {
        "last_value"
    }
}

/// Union object keys; later updates win on conflicts
#[derive(Debug, Clone, Copy, Default)]
pub struct MapMerger;

impl StateMerger for MapMerger {
    fn merge(&self, current: Value, updates: Vec<Value>) -> Value {
        let mut merged: Map<String, Value> = current.as_object().cloned().unwrap_or_default();

        for update in &updates {
            match update.as_object() {
                Some(fields) => {
                    for (key, value) in fields {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                // A non-object update degenerates to last-value semantics.
                None => return updates.last().cloned().unwrap_or(current),
            }
        }

        Value::Object(merged)
    }

    fn name(&self) -> &str {
        "merge"
    }
}

/// Concatenate everything into one array
///
/// Array updates are flattened in; scalars are appended.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendMerger;

impl StateMerger for AppendMerger {
    fn merge(&self, current: Value, updates: Vec<Value>) -> Value {
        let mut items: Vec<Value> = match current {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };

        for update in updates {
            match update {
                Value::Array(more) => items.extend(more),
                Value::Null => {}
                other => items.push(other),
            }
        }

        Value::Array(items)
    }

    fn name(&self) -> &str {
        "append"
    }
}

/// Numeric sum of the current value and all updates
#[derive(Debug, Clone, Copy, Default)]
pub struct SumMerger;

impl StateMerger for SumMerger {
    fn merge(&self, current: Value, updates: Vec<Value>) -> Value {
        let all_integers = std::iter::once(&current)
            .chain(updates.iter())
            .all(|v| v.is_i64() || v.is_null());

        if all_integers {
            let total: i64 = std::iter::once(&current)
                .chain(updates.iter())
                .filter_map(|v| v.as_i64())
                .sum();
            json!(total)
        } else {
            let total: f64 = std::iter::once(&current)
                .chain(updates.iter())
                .filter_map(|v| v.as_f64())
                .sum();
            json!(total)
        }
    }

    fn name(&self) -> &str {
        "sum"
    }
}

/// User-supplied merge function
#[derive(Clone)]
pub struct CustomMerger {
    func: Arc<dyn Fn(Value, Vec<Value>) -> Value + Send + Sync>,
}

impl CustomMerger {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Value + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }
}

impl StateMerger for CustomMerger {
    fn merge(&self, current: Value, updates: Vec<Value>) -> Value {
        (self.func)(current, updates)
    }

    fn name(&self) -> &str {
        "custom"
    }
}
