//! Tree walker and reference resolver.
//!
//! The walker classifies every node it meets:
//!
//! - a **template definition** (carries `card_template`) is returned unchanged;
//! - a **reference** (carries `ref`) is expanded from its template;
//! - any other map or list is a **container** whose fields are walked with the
//!   same ancestor context;
//! - everything else is a **leaf** and is returned unchanged.
//!
//! Expanding a reference renders the template body against the effective context,
//! resolves references nested in the rendered body, applies the bulk-override
//! payload, then the key map. A failure anywhere in that sequence is contained at
//! the reference: the node keeps its pre-render shape, gains an `error` field, and
//! the walk carries on with its siblings.

use serde_json::{Map, Value};
use std::fmt;

use super::context::{Context, merge_context};
use super::error::{NodeFailure, RenderError};
use super::key_map::{KeyMap, type_name};
use super::partials::{OutputMode, SnippetEngine};
use super::registry::{Template, TemplateRegistry};
use super::utils::{find_similar, shallow_merge};
use crate::constants::{
    DEFAULT_MAX_DEPTH, ENGINE_FIELDS, FIELD_CONTEXT, FIELD_ERROR, FIELD_KEY_MAP, FIELD_OVERRIDES,
    FIELD_REF, FIELD_TEMPLATE,
};

/// Approximate location of a node, e.g. `views[0].cards[1].card`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath(String);

impl NodePath {
    /// Path rooted at a named tree, such as a view.
    #[must_use]
    pub fn root(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Path of a named field below this one.
    #[must_use]
    pub fn field(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{name}", self.0))
        }
    }

    /// Path of a list element below this one.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        Self(format!("{}[{index}]", self.0))
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One tree walk against a loaded template registry and partial set.
///
/// A resolver borrows the registries read-only and collects the failures it
/// contains along the way. Create one per tree.
pub struct Resolver<'e> {
    templates: &'e TemplateRegistry,
    snippets: &'e SnippetEngine,
    max_depth: usize,
    failures: Vec<NodeFailure>,
}

impl<'e> Resolver<'e> {
    /// Create a resolver with the default expansion depth limit.
    #[must_use]
    pub fn new(templates: &'e TemplateRegistry, snippets: &'e SnippetEngine) -> Self {
        Self {
            templates,
            snippets,
            max_depth: DEFAULT_MAX_DEPTH,
            failures: Vec::new(),
        }
    }

    /// Set the maximum nesting of template expansions.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve a tree under an ancestor context.
    ///
    /// Never fails: render failures are annotated on the nodes where they happen
    /// and collected in [`Resolver::failures`].
    pub fn resolve(&mut self, node: &Value, ancestor: &Context) -> Value {
        self.resolve_at(node, ancestor, &NodePath::default())
    }

    /// Resolve a tree whose root sits at `path`, for error reporting.
    pub fn resolve_at(&mut self, node: &Value, ancestor: &Context, path: &NodePath) -> Value {
        self.walk(node, ancestor, path, 0)
    }

    /// Failures contained so far.
    #[must_use]
    pub fn failures(&self) -> &[NodeFailure] {
        &self.failures
    }

    /// Consume the resolver, returning the contained failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<NodeFailure> {
        self.failures
    }

    fn walk(&mut self, node: &Value, ancestor: &Context, path: &NodePath, depth: usize) -> Value {
        match node {
            Value::Object(map) if map.contains_key(FIELD_TEMPLATE) => node.clone(),
            Value::Object(map) if is_reference(map) => {
                self.resolve_reference(map, ancestor, path, depth)
            }
            Value::Object(map) => Value::Object(self.walk_fields(map, ancestor, path, depth)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.walk(item, ancestor, &path.index(i), depth))
                    .collect(),
            ),
            leaf => leaf.clone(),
        }
    }

    /// Walk every map- or list-valued field except the engine's own.
    fn walk_fields(
        &mut self,
        fields: &Map<String, Value>,
        ancestor: &Context,
        path: &NodePath,
        depth: usize,
    ) -> Map<String, Value> {
        fields
            .iter()
            .map(|(name, value)| {
                let walked = if ENGINE_FIELDS.contains(&name.as_str())
                    || !matches!(value, Value::Object(_) | Value::Array(_))
                {
                    value.clone()
                } else {
                    self.walk(value, ancestor, &path.field(name), depth)
                };
                (name.clone(), walked)
            })
            .collect()
    }

    fn resolve_reference(
        &mut self,
        node: &Map<String, Value>,
        ancestor: &Context,
        path: &NodePath,
        depth: usize,
    ) -> Value {
        match self.expand(node, ancestor, path, depth) {
            Ok(expanded) => Value::Object(expanded),
            Err(error) => Value::Object(self.annotate(node, &error, path)),
        }
    }

    /// Expand one reference node.
    fn expand(
        &mut self,
        node: &Map<String, Value>,
        ancestor: &Context,
        path: &NodePath,
        depth: usize,
    ) -> Result<Map<String, Value>, RenderError> {
        let key = reference_key(node)?;
        if depth >= self.max_depth {
            return Err(RenderError::DepthExceeded {
                key: key.to_string(),
                max_depth: self.max_depth,
            });
        }

        let templates = self.templates;
        let template = templates.get(key).ok_or_else(|| RenderError::TemplateNotFound {
            key: key.to_string(),
            suggestions: find_similar(key, templates.keys()),
        })?;

        let local = local_context(node, key)?;
        let effective =
            merge_context(ancestor, &template.context, &local, template.replicate_context);
        let key_map = match node.get(FIELD_KEY_MAP) {
            None | Some(Value::Null) => template.key_map.clone().unwrap_or_default(),
            Some(value) => KeyMap::from_value(value).map_err(|reason| RenderError::InvalidKeyMap {
                key: key.to_string(),
                reason,
            })?,
        };

        tracing::debug!("Expanding '{}' at {} (depth {})", key, path, depth);
        let rendered = self.render_body(template, &effective)?;

        let mut body = if is_reference(&rendered) {
            // The template aliases another one; the alias's own engine fields are
            // consumed by its expansion.
            let mut aliased = self.expand(&rendered, &effective, path, depth + 1)?;
            aliased.retain(|name, _| !ENGINE_FIELDS.contains(&name.as_str()));
            aliased
        } else {
            self.walk_fields(&rendered, &effective, path, depth + 1)
        };

        let payload = body
            .shift_remove(FIELD_OVERRIDES)
            .filter(|v| !v.is_null())
            .or_else(|| node.get(FIELD_OVERRIDES).filter(|v| !v.is_null()).cloned());
        if let Some(payload) = payload {
            let overrides = parse_overrides(key, &payload)?;
            let overrides = self.walk_fields(&overrides, &effective, path, depth + 1);
            shallow_merge(&mut body, &overrides);
        }
        body.retain(|name, _| !ENGINE_FIELDS.contains(&name.as_str()));

        if !key_map.is_empty() {
            key_map.apply(&mut body, &effective, |segment, sub_node, sub_context| {
                self.walk(sub_node, sub_context, &path.field(segment), depth + 1)
            });
        }

        let mut output = Map::with_capacity(body.len() + 4);
        output.insert(FIELD_REF.to_string(), Value::String(key.to_string()));
        for field in [FIELD_CONTEXT, FIELD_KEY_MAP, FIELD_OVERRIDES] {
            if let Some(value) = node.get(field) {
                output.insert(field.to_string(), value.clone());
            }
        }
        for (name, value) in body {
            output.entry(name).or_insert(value);
        }
        Ok(output)
    }

    /// Render a template body and parse it back into a node.
    fn render_body(
        &self,
        template: &Template,
        effective: &Context,
    ) -> Result<Map<String, Value>, RenderError> {
        let mut data = Map::new();
        data.insert(FIELD_CONTEXT.to_string(), Value::Object(effective.clone()));

        let text = self.snippets.render(
            &template.key,
            template.body_text(),
            &Value::Object(data),
            template.dialect,
            OutputMode::JsonString,
        )?;

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(mut rendered)) => {
                rendered.shift_remove(FIELD_TEMPLATE);
                Ok(rendered)
            }
            Ok(other) => Err(RenderError::UnparsableOutput {
                key: template.key.clone(),
                reason: format!("expected a map, found {}", type_name(&other)),
                source: None,
            }),
            Err(e) => Err(RenderError::UnparsableOutput {
                key: template.key.clone(),
                reason: e.to_string(),
                source: Some(e),
            }),
        }
    }

    /// Record a contained failure and build the fallback node.
    fn annotate(
        &mut self,
        node: &Map<String, Value>,
        error: &RenderError,
        path: &NodePath,
    ) -> Map<String, Value> {
        let key = node.get(FIELD_REF).and_then(Value::as_str).map(str::to_string);
        let message = match &key {
            Some(key) => format!("Template '{key}' failed: {error}"),
            None => error.to_string(),
        };
        tracing::warn!("{}: {}", path, message);

        let mut annotated = Map::with_capacity(node.len() + 1);
        annotated.insert(FIELD_ERROR.to_string(), Value::String(message.clone()));
        for (name, value) in node {
            if name != FIELD_ERROR {
                annotated.insert(name.clone(), value.clone());
            }
        }

        self.failures.push(NodeFailure {
            path: path.to_string(),
            key,
            message,
        });
        annotated
    }
}

fn is_reference(node: &Map<String, Value>) -> bool {
    node.get(FIELD_REF).is_some_and(|v| !v.is_null())
}

fn reference_key(node: &Map<String, Value>) -> Result<&str, RenderError> {
    match node.get(FIELD_REF) {
        Some(Value::String(key)) if !key.trim().is_empty() => Ok(key.trim()),
        Some(other) => Err(RenderError::InvalidReference {
            reason: format!("{FIELD_REF} must be a template name, found {}", describe(other)),
        }),
        None => Err(RenderError::InvalidReference {
            reason: format!("{FIELD_REF} is missing"),
        }),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) if s.trim().is_empty() => "an empty string".to_string(),
        other => type_name(other).to_string(),
    }
}

fn local_context(node: &Map<String, Value>, key: &str) -> Result<Context, RenderError> {
    match node.get(FIELD_CONTEXT) {
        None | Some(Value::Null) => Ok(Context::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(RenderError::InvalidContext {
            key: key.to_string(),
            reason: format!("expected a map, found {}", type_name(other)),
        }),
    }
}

/// Parse a bulk-override payload: a JSON-encoded map, or a map.
fn parse_overrides(key: &str, payload: &Value) -> Result<Map<String, Value>, RenderError> {
    let failure = |reason: String, source: Option<serde_json::Error>| {
        RenderError::BulkOverrideParseFailure {
            key: key.to_string(),
            reason,
            source,
        }
    };

    match payload {
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) if text.trim().is_empty() => Ok(Map::new()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(failure(format!("expected a map, found {}", type_name(&other)), None)),
            Err(e) => Err(failure(e.to_string(), Some(e))),
        },
        other => Err(failure(
            format!("expected a map or a JSON string, found {}", type_name(other)),
            None,
        )),
    }
}
