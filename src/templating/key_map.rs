//! Key mapping: projecting context variables onto a rendered node's own fields.
//!
//! A key map is written either as a map from local field to context variable,
//!
//! ```yaml
//! key_map:
//!   icon: chosenIcon
//!   cards: cards
//! ```
//!
//! or as a list of names that map to themselves (`key_map: [icon, cards]`).

use serde_json::{Map, Value};

use super::context::{Context, lookup, without_variable};

/// Ordered `(local field, context variable)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMap {
    entries: Vec<(String, String)>,
}

impl KeyMap {
    /// Parse a key map from its node representation.
    ///
    /// `null` is an empty map.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the value is neither a map of
    /// strings nor a list of strings.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let entries: Vec<(String, String)> = match value {
            Value::Null => Vec::new(),
            Value::Object(map) => map
                .iter()
                .map(|(field, variable)| match variable {
                    Value::String(variable) => Ok((field.clone(), variable.clone())),
                    other => Err(format!(
                        "entry '{field}' must name a context variable, found {}",
                        type_name(other)
                    )),
                })
                .collect::<Result<_, _>>()?,
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(name) => Ok((name.clone(), name.clone())),
                    other => Err(format!("list entries must be names, found {}", type_name(other))),
                })
                .collect::<Result<_, _>>()?,
            other => {
                return Err(format!("expected a map or a list, found {}", type_name(other)));
            }
        };
        Ok(Self {
            entries,
        })
    }

    /// The `(field, variable)` pairs in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Project context values onto `node`.
    ///
    /// Variables that are missing or `null` are skipped. Scalars are assigned
    /// first, in declaration order. Objects and arrays are then handed to `resolve`
    /// one sub-node at a time, together with a path segment for error reporting and
    /// the ancestor context to resolve it under: `context` without the consumed
    /// variable, dotted paths included. Array order is preserved.
    pub fn apply<F>(&self, node: &mut Map<String, Value>, context: &Context, mut resolve: F)
    where
        F: FnMut(&str, &Value, &Context) -> Value,
    {
        let mut nested = Vec::new();
        for (field, variable) in &self.entries {
            match lookup(context, variable) {
                None | Some(Value::Null) => {
                    tracing::trace!("key_map: '{}' is undefined, keeping '{}'", variable, field);
                }
                Some(value @ (Value::Object(_) | Value::Array(_))) => {
                    nested.push((field, variable, value));
                }
                Some(scalar) => {
                    node.insert(field.clone(), scalar.clone());
                }
            }
        }

        for (field, variable, value) in nested {
            let sub_context = without_variable(context, variable);
            let resolved = match value {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| resolve(&format!("{field}[{i}]"), item, &sub_context))
                        .collect(),
                ),
                other => resolve(field, other, &sub_context),
            };
            node.insert(field.clone(), resolved);
        }
    }
}

/// Human-readable JSON type name for error messages.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
