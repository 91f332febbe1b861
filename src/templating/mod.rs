//! Card template resolution engine.
//!
//! This module expands *references* in a tree of dashboard card configuration into
//! concrete cards. A reference names a registered template and may supply its own
//! variable bindings; the engine renders the template body against the merged
//! context, resolves whatever references the expansion introduces, and hands back
//! an ordinary card.
//!
//! # Overview
//!
//! ```yaml
//! # A template definition. `card_template` names it; `context` holds defaults.
//! - card_template: light_button
//!   context:
//!     icon: mdi:lightbulb
//!   type: button
//!   entity: "{{ context.entity }}"
//!   icon: "{{ context.icon }}"
//!
//! # A reference to it.
//! - ref: light_button
//!   context:
//!     entity: light.kitchen
//! ```
//!
//! resolves the reference to
//!
//! ```yaml
//! - ref: light_button
//!   context:
//!     entity: light.kitchen
//!   type: button
//!   entity: light.kitchen
//!   icon: mdi:lightbulb
//! ```
//!
//! The `ref`, `context`, `key_map` and `overrides` fields stay on the output so the
//! same configuration can be resolved again on the next refresh pass.
//!
//! # Components
//!
//! - [`context`]: the context merger (template defaults, then ancestor context when
//!   the template replicates it, then the node's own context).
//! - [`key_map`]: projects context values onto a rendered card's own fields.
//! - [`partials`], [`renderer`], [`eta`]: named text snippets and the two template
//!   dialects.
//! - [`registry`], [`graph`]: template storage with reference-cycle rejection.
//! - [`resolver`]: the tree walker, with per-node error containment.
//!
//! # Dialects
//!
//! Templates and partials default to the logic-block dialect, rendered by Tera:
//!
//! ```text
//! {{ context.name | upper }}
//! {% if context.show %}...{% endif %}
//! {{ include_partial(partial="greet", name=context.n) }}
//! ```
//!
//! Setting `dialect: eta` switches to the value-interpolation dialect:
//!
//! ```text
//! <%= context.name %>
//! <%~ include("greet", { name: context.n }) %>
//! ```
//!
//! # Lifecycle
//!
//! An [`Engine`] is built once per refresh pass from that pass's templates and
//! partials and is read-only afterwards. It is `Send + Sync`, so independent views
//! can be resolved on different threads against one shared engine.

pub mod context;
pub mod error;
pub mod eta;
pub mod graph;
pub mod key_map;
pub mod partials;
pub mod registry;
pub mod renderer;
pub mod resolver;
pub mod utils;

#[cfg(test)]
mod resolver_tests;

use serde_json::Value;

pub use context::Context;
pub use error::{NodeFailure, RegistrationError, RenderError};
pub use key_map::KeyMap;
pub use partials::{Dialect, Partial, PartialLoadReport, PartialRegistry, SnippetEngine};
pub use registry::{LoadReport, Template, TemplateRegistry};
pub use resolver::{NodePath, Resolver};

use crate::constants::DEFAULT_MAX_DEPTH;

/// Loaded templates and partials for one refresh pass.
#[derive(Debug)]
pub struct Engine {
    templates: TemplateRegistry,
    snippets: SnippetEngine,
    max_depth: usize,
}

/// Result of resolving one tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The resolved tree
    pub node: Value,
    /// Failures contained while resolving it
    pub failures: Vec<NodeFailure>,
}

impl Resolution {
    /// Whether every reference resolved.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// What happened while building an [`Engine`].
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Template registration summary
    pub templates: LoadReport,
    /// Partial compilation summary
    pub partials: PartialLoadReport,
}

impl BuildReport {
    /// Whether every template and partial loaded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.templates.is_clean() && self.partials.failures.is_empty()
    }
}

impl Engine {
    /// Start building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The loaded templates.
    #[must_use]
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// The loaded partials.
    #[must_use]
    pub fn snippets(&self) -> &SnippetEngine {
        &self.snippets
    }

    /// Maximum nesting of template expansions.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// A fresh resolver over this engine's registries.
    #[must_use]
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.templates, &self.snippets).with_max_depth(self.max_depth)
    }

    /// Resolve a tree with no ancestor context.
    #[must_use]
    pub fn resolve(&self, node: &Value) -> Resolution {
        self.resolve_with(node, &Context::new(), &NodePath::default())
    }

    /// Resolve a tree under an ancestor context, reporting failures relative to
    /// `path`.
    #[must_use]
    pub fn resolve_with(&self, node: &Value, ancestor: &Context, path: &NodePath) -> Resolution {
        let mut resolver = self.resolver();
        let node = resolver.resolve_at(node, ancestor, path);
        Resolution {
            node,
            failures: resolver.into_failures(),
        }
    }
}

/// Collects a refresh pass's templates and partials, then loads them.
#[derive(Debug)]
pub struct EngineBuilder {
    templates: Vec<Template>,
    invalid: Vec<RegistrationError>,
    partials: Vec<Partial>,
    max_depth: usize,
    overwrite: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            templates: Vec::new(),
            invalid: Vec::new(),
            partials: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            overwrite: true,
        }
    }
}

impl EngineBuilder {
    /// Maximum nesting of template expansions.
    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Whether a later template replaces an earlier one with the same key.
    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Add a parsed template.
    #[must_use]
    pub fn template(mut self, template: Template) -> Self {
        self.templates.push(template);
        self
    }

    /// Add a template from its definition node.
    ///
    /// A malformed definition is not an error here; it shows up in the
    /// [`BuildReport`].
    #[must_use]
    pub fn template_node(mut self, key: &str, node: &Value) -> Self {
        match Template::from_node(key, node) {
            Ok(template) => self.templates.push(template),
            Err(e) => self.invalid.push(e),
        }
        self
    }

    /// Add a template definition that names itself with `card_template`.
    #[must_use]
    pub fn marked_template(mut self, node: &Value) -> Self {
        match Template::from_marked_node(node) {
            Ok(template) => self.templates.push(template),
            Err(e) => self.invalid.push(e),
        }
        self
    }

    /// Add a partial.
    #[must_use]
    pub fn partial(mut self, partial: Partial) -> Self {
        self.partials.push(partial);
        self
    }

    /// Add several partials.
    #[must_use]
    pub fn partials(mut self, partials: impl IntoIterator<Item = Partial>) -> Self {
        self.partials.extend(partials);
        self
    }

    /// Compile the partials, register the templates, and freeze the result.
    ///
    /// Partials load first so they are available to every template. Nothing
    /// here fails outright: rejected templates and partials are listed in the
    /// returned report.
    #[must_use]
    pub fn build(self) -> (Engine, BuildReport) {
        let mut partials = PartialRegistry::new();
        let partial_report = partials.load_all(self.partials);

        let mut templates = TemplateRegistry::new();
        let mut template_report = templates.load_all(self.templates, self.overwrite);
        for error in self.invalid {
            tracing::warn!("Skipping template: {}", error);
            template_report.rejected.push(error);
        }

        tracing::debug!(
            "Engine loaded {} template(s) and {} partial(s)",
            templates.len(),
            partials.len()
        );

        let engine = Engine {
            templates,
            snippets: SnippetEngine::new(partials),
            max_depth: self.max_depth,
        };
        (
            engine,
            BuildReport {
                templates: template_report,
                partials: partial_report,
            },
        )
    }
}
