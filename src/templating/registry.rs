//! Template registry.
//!
//! Templates are parsed from definition nodes, checked for reference cycles, and
//! stored by key. The registry is filled during a refresh pass's load phase and is
//! read-only afterwards; a stored [`Template`] is never mutated.

use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

use super::context::Context;
use super::error::RegistrationError;
use super::graph::ReferenceGraph;
use super::key_map::{KeyMap, type_name};
use super::partials::Dialect;
use super::utils::unescape_tag_contents;
use crate::constants::{
    FIELD_CONTEXT, FIELD_DIALECT, FIELD_KEY_MAP, FIELD_PRIORITY, FIELD_REF,
    FIELD_REPLICATE_CONTEXT, FIELD_TEMPLATE, TEMPLATE_DEFINITION_FIELDS,
};

/// A registered, reusable card definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Registry key
    pub key: String,
    /// Card fields, without the definition-only fields
    pub body: Map<String, Value>,
    /// Default context, lowest precedence during merging
    pub context: Context,
    /// Key map used when a reference does not carry its own
    pub key_map: Option<KeyMap>,
    /// Load order; higher priorities load later
    pub priority: i64,
    /// Whether ancestor context is visible inside the template
    pub replicate_context: bool,
    /// Dialect of the body's expressions
    pub dialect: Dialect,
    /// Serialized body with tag contents unescaped, ready to render
    body_text: String,
}

impl Template {
    /// Parse a template from its definition node.
    ///
    /// Definition-only fields (`card_template`, `context`, `key_map`, `priority`,
    /// `replicate_context`, `dialect`) are split off; everything else is the body.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidTemplate`] when the node is not a map or
    /// one of the definition fields has the wrong type.
    pub fn from_node(key: impl Into<String>, node: &Value) -> Result<Self, RegistrationError> {
        let key = key.into();
        let invalid = |reason: String| RegistrationError::InvalidTemplate {
            key: key.clone(),
            reason,
        };

        let Value::Object(fields) = node else {
            return Err(invalid(format!("expected a map, found {}", type_name(node))));
        };

        let context = match fields.get(FIELD_CONTEXT) {
            None | Some(Value::Null) => Context::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(invalid(format!(
                    "{FIELD_CONTEXT} must be a map, found {}",
                    type_name(other)
                )));
            }
        };

        let key_map = fields
            .get(FIELD_KEY_MAP)
            .map(|v| KeyMap::from_value(v).map_err(|e| invalid(format!("{FIELD_KEY_MAP}: {e}"))))
            .transpose()?;

        let priority = match fields.get(FIELD_PRIORITY) {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                invalid(format!("{FIELD_PRIORITY} must be an integer, found {value}"))
            })?,
        };

        let replicate_context = match fields.get(FIELD_REPLICATE_CONTEXT) {
            None | Some(Value::Null) => true,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(invalid(format!(
                    "{FIELD_REPLICATE_CONTEXT} must be true or false, found {}",
                    type_name(other)
                )));
            }
        };

        let dialect = match fields.get(FIELD_DIALECT) {
            None | Some(Value::Null) => Dialect::default(),
            Some(Value::String(name)) => name.parse().map_err(invalid)?,
            Some(other) => {
                return Err(invalid(format!(
                    "{FIELD_DIALECT} must be a name, found {}",
                    type_name(other)
                )));
            }
        };

        let body: Map<String, Value> = fields
            .iter()
            .filter(|(k, _)| !TEMPLATE_DEFINITION_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let serialized = serde_json::to_string(&body)
            .map_err(|e| invalid(format!("body cannot be serialized: {e}")))?;
        let body_text = unescape_tag_contents(&serialized, dialect.tag_delimiters());

        Ok(Self {
            key,
            body,
            context,
            key_map,
            priority,
            replicate_context,
            dialect,
            body_text,
        })
    }

    /// Parse a definition node that names its own key through `card_template`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidTemplate`] when the marker is missing or
    /// empty, or when [`Template::from_node`] rejects the node.
    pub fn from_marked_node(node: &Value) -> Result<Self, RegistrationError> {
        match node.get(FIELD_TEMPLATE).and_then(Value::as_str) {
            Some(key) if !key.trim().is_empty() => Self::from_node(key.trim(), node),
            _ => Err(RegistrationError::InvalidTemplate {
                key: String::new(),
                reason: format!("{FIELD_TEMPLATE} must be a non-empty name"),
            }),
        }
    }

    /// Body serialized as JSON text, ready to render in JSON-string mode.
    #[must_use]
    pub fn body_text(&self) -> &str {
        &self.body_text
    }

    /// Every template key referenced anywhere in the body or default context.
    #[must_use]
    pub fn references(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        for value in self.body.values().chain(self.context.values()) {
            collect_references(value, &mut refs);
        }
        if let Some(Value::String(alias)) = self.body.get(FIELD_REF) {
            refs.insert(alias.clone());
        }
        refs
    }
}

fn collect_references(value: &Value, refs: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(key)) = map.get(FIELD_REF) {
                refs.insert(key.clone());
            }
            for child in map.values() {
                collect_references(child, refs);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, refs);
            }
        }
        _ => {}
    }
}

/// Summary of a [`TemplateRegistry::load_all`] call.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Keys that were inserted, in load order
    pub registered: Vec<String>,
    /// Templates that were skipped, with the reason
    pub rejected: Vec<RegistrationError>,
}

impl LoadReport {
    /// Whether every template in the batch was registered.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Templates by key.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Template>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one template.
    ///
    /// Returns `Ok(true)` when the template was inserted and `Ok(false)` when the
    /// key is taken and `overwrite` is false.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::CircularDependency`] if the template would
    /// close a reference cycle; the registry is left unchanged.
    pub fn register(&mut self, template: Template, overwrite: bool) -> Result<bool, RegistrationError> {
        if !overwrite && self.templates.contains_key(&template.key) {
            tracing::debug!("Template '{}' already registered, keeping existing", template.key);
            return Ok(false);
        }

        let mut graph = ReferenceGraph::new();
        for existing in self.templates.values().filter(|t| t.key != template.key) {
            graph.add_template(&existing.key, &existing.references());
        }
        graph.add_template(&template.key, &template.references());

        if let Some(cycle) = graph.find_cycle_from(&template.key) {
            return Err(RegistrationError::CircularDependency {
                cycle,
            });
        }

        tracing::debug!("Registered template '{}' (priority {})", template.key, template.priority);
        self.templates.insert(template.key.clone(), template);
        Ok(true)
    }

    /// Register a batch of templates.
    ///
    /// The batch is sorted by priority ascending, ties broken by key. Cycles are
    /// evaluated over the whole batch first: every template on a cycle is rejected,
    /// so mutually referencing templates never enter the registry one at a time.
    /// Rejections are collected in the report; loading never stops early.
    pub fn load_all(&mut self, mut templates: Vec<Template>, overwrite: bool) -> LoadReport {
        templates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.key.cmp(&b.key)));

        let (cyclic, graph) = self.batch_cycles(&templates, overwrite);
        let mut report = LoadReport::default();

        for template in templates {
            let key = template.key.clone();
            if cyclic.contains(&key) {
                let cycle = graph.find_cycle_from(&key).unwrap_or_else(|| vec![key.clone(), key.clone()]);
                tracing::warn!("Skipping template '{}': circular reference {}", key, cycle.join(" -> "));
                report.rejected.push(RegistrationError::CircularDependency {
                    cycle,
                });
                continue;
            }

            match self.register(template, overwrite) {
                Ok(true) => report.registered.push(key),
                Ok(false) => {
                    tracing::debug!("Duplicate template '{}' rejected", key);
                    report.rejected.push(RegistrationError::DuplicateKeyRejected {
                        key,
                    });
                }
                Err(e) => {
                    tracing::warn!("Skipping template '{}': {}", key, e);
                    report.rejected.push(e);
                }
            }
        }

        report
    }

    /// Keys on a cycle in the registry as it would look after the whole batch.
    ///
    /// Only the definition that would win each key is considered: the last one in
    /// load order when overwriting, otherwise the first one seen.
    fn batch_cycles(&self, batch: &[Template], overwrite: bool) -> (BTreeSet<String>, ReferenceGraph) {
        let mut winners: HashMap<&str, &Template> =
            self.templates.iter().map(|(k, t)| (k.as_str(), t)).collect();
        for template in batch {
            if overwrite || !winners.contains_key(template.key.as_str()) {
                winners.insert(template.key.as_str(), template);
            }
        }

        let mut keys: Vec<&&str> = winners.keys().collect();
        keys.sort();
        let mut graph = ReferenceGraph::new();
        for key in keys {
            if let Some(template) = winners.get(*key) {
                graph.add_template(key, &template.references());
            }
        }

        let batch_keys: BTreeSet<&str> = batch.iter().map(|t| t.key.as_str()).collect();
        let cyclic =
            graph.cyclic_keys().into_iter().filter(|k| batch_keys.contains(k.as_str())).collect();
        (cyclic, graph)
    }

    /// Look up a template.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Template> {
        self.templates.get(key)
    }

    /// Whether a key is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    /// Registered keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.templates.keys()
    }

    /// Number of registered templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
