//! Partial/snippet engine.
//!
//! Partials are small named text templates included from template bodies (and from
//! other partials). Each partial is compiled once under its [`Dialect`] when a
//! refresh pass loads it; template bodies themselves are compiled per render.
//!
//! The registry is filled during the load phase and then frozen behind an
//! [`Arc`] inside a [`SnippetEngine`], which is what rendering code holds on to.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::error::RenderError;
use super::eta::{self, EtaProgram};
use super::renderer;
use super::utils::escape_json_fragment;
use crate::constants::MAX_INCLUDE_DEPTH;

/// Expression syntax used by a template or partial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Logic-block dialect rendered by Tera: `{{ expr }}`, `{% if %}`, filters, and
    /// `include_partial(partial="name", ...)` with named parameters.
    #[default]
    #[serde(alias = "tera", alias = "nunjucks")]
    Jinja,
    /// Value-interpolation dialect: `<%= expr %>`, `<%~ include("name", {...}) %>`.
    #[serde(alias = "ejs")]
    Eta,
}

impl Dialect {
    /// Opening and closing delimiters of every tag form in this dialect.
    #[must_use]
    pub fn tag_delimiters(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Jinja => &[("{{", "}}"), ("{%", "%}"), ("{#", "#}")],
            Self::Eta => &[("<%", "%>")],
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jinja => write!(f, "jinja"),
            Self::Eta => write!(f, "eta"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jinja" | "tera" | "nunjucks" => Ok(Self::Jinja),
            "eta" | "ejs" => Ok(Self::Eta),
            other => Err(format!("unknown dialect '{other}' (expected 'jinja' or 'eta')")),
        }
    }
}

/// How substituted values are written into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Plain text; nothing is escaped. Used for partials.
    Text,
    /// The text is a serialized JSON document and every substitution lands inside a
    /// JSON string, so escaped substitutions are JSON-string escaped. Used for
    /// template bodies.
    JsonString,
}

impl OutputMode {
    pub(crate) fn escaper(self) -> fn(&str) -> String {
        match self {
            Self::Text => str::to_string,
            Self::JsonString => escape_json_fragment,
        }
    }
}

/// A named snippet as discovered from a dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partial {
    /// Name used by `include`
    pub name: String,
    /// Raw template text
    pub body: String,
    /// Dialect the body is written in
    pub dialect: Dialect,
    /// Load order; higher priorities load later and win name clashes
    pub priority: i64,
}

impl Partial {
    /// Create a partial with default priority.
    pub fn new(name: impl Into<String>, body: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            dialect,
            priority: 0,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug)]
enum Compiled {
    Jinja,
    Eta(EtaProgram),
}

#[derive(Debug)]
struct CompiledPartial {
    partial: Partial,
    compiled: Compiled,
}

/// Summary of a [`PartialRegistry::load_all`] call.
#[derive(Debug, Default)]
pub struct PartialLoadReport {
    /// Names that compiled and were registered, in load order
    pub loaded: Vec<String>,
    /// Partials excluded because they failed to compile
    pub failures: Vec<RenderError>,
}

/// Compiled partials keyed by name.
#[derive(Debug, Default)]
pub struct PartialRegistry {
    partials: HashMap<String, CompiledPartial>,
}

impl PartialRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register one partial, replacing any partial of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::SnippetCompileFailure`] if the body does not compile;
    /// the registry is left unchanged.
    pub fn insert(&mut self, partial: Partial) -> Result<(), RenderError> {
        let compiled = match partial.dialect {
            Dialect::Jinja => {
                renderer::check_syntax(&partial.name, &partial.body)?;
                Compiled::Jinja
            }
            Dialect::Eta => Compiled::Eta(eta::compile(&partial.name, &partial.body)?),
        };

        if self.partials.contains_key(&partial.name) {
            tracing::debug!("Partial '{}' replaced by priority {}", partial.name, partial.priority);
        }
        self.partials.insert(
            partial.name.clone(),
            CompiledPartial {
                partial,
                compiled,
            },
        );
        Ok(())
    }

    /// Compile and register a batch of partials in priority order.
    ///
    /// Partials are sorted by priority ascending (ties broken by name), so a
    /// higher-priority partial replaces a lower-priority one of the same name. A
    /// partial that fails to compile is excluded and logged; the rest of the batch
    /// still loads.
    pub fn load_all(&mut self, mut partials: Vec<Partial>) -> PartialLoadReport {
        partials.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

        let mut report = PartialLoadReport::default();
        for partial in partials {
            let name = partial.name.clone();
            match self.insert(partial) {
                Ok(()) => report.loaded.push(name),
                Err(e) => {
                    tracing::warn!("Skipping partial '{}': {}", name, e);
                    report.failures.push(e);
                }
            }
        }
        report
    }

    /// Look up a partial by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Partial> {
        self.partials.get(name).map(|p| &p.partial)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.partials.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered partials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partials.len()
    }

    /// Whether no partials are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }
}

/// Read-only rendering handle over a frozen [`PartialRegistry`].
///
/// Cloning is cheap; every render and nested include shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct SnippetEngine {
    partials: Arc<PartialRegistry>,
}

impl SnippetEngine {
    /// Freeze a registry for rendering.
    #[must_use]
    pub fn new(partials: PartialRegistry) -> Self {
        Self {
            partials: Arc::new(partials),
        }
    }

    /// The underlying registry.
    #[must_use]
    pub fn partials(&self) -> &PartialRegistry {
        &self.partials
    }

    /// Render `text` under `dialect` against `context`.
    ///
    /// `name` identifies the text in error messages (a template key or partial
    /// name).
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::SnippetCompileFailure`] when the text does not compile
    /// and [`RenderError::SnippetRuntimeFailure`] when execution fails, including
    /// failures inside included partials.
    pub fn render(
        &self,
        name: &str,
        text: &str,
        context: &Value,
        dialect: Dialect,
        mode: OutputMode,
    ) -> Result<String, RenderError> {
        self.render_at(name, text, context, dialect, mode, 0)
    }

    /// Render a registered partial with an explicit data object.
    ///
    /// `depth` counts nested includes; past [`MAX_INCLUDE_DEPTH`] the include fails,
    /// which stops partials that include each other.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::PartialNotFound`] for unknown names, or any error from
    /// rendering the partial.
    pub fn render_partial(&self, name: &str, data: &Value, depth: usize) -> Result<String, RenderError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(RenderError::runtime(
                name,
                format!("partial includes nested deeper than {MAX_INCLUDE_DEPTH} levels"),
            ));
        }

        let entry = self.partials.partials.get(name).ok_or_else(|| RenderError::PartialNotFound {
            name: name.to_string(),
        })?;

        tracing::trace!("Including partial '{}' at depth {}", name, depth);
        match &entry.compiled {
            Compiled::Jinja => renderer::render_jinja(
                self,
                name,
                &entry.partial.body,
                data,
                OutputMode::Text,
                depth,
            ),
            Compiled::Eta(program) => {
                let include = |child: &str, child_data: &Value| {
                    self.render_partial(child, child_data, depth + 1)
                };
                program.render(name, data, OutputMode::Text.escaper(), &include)
            }
        }
    }

    fn render_at(
        &self,
        name: &str,
        text: &str,
        context: &Value,
        dialect: Dialect,
        mode: OutputMode,
        depth: usize,
    ) -> Result<String, RenderError> {
        match dialect {
            Dialect::Jinja => renderer::render_jinja(self, name, text, context, mode, depth),
            Dialect::Eta => {
                let program = eta::compile(name, text)?;
                let include = |child: &str, child_data: &Value| {
                    self.render_partial(child, child_data, depth + 1)
                };
                program.render(name, context, mode.escaper(), &include)
            }
        }
    }
}
