//! Error types for template registration and rendering.
//!
//! Registration problems ([`RegistrationError`]) are structural: they are raised while
//! a refresh pass loads its templates, and the offending template is skipped.
//! Render problems ([`RenderError`]) are expected per-node failures: the resolver
//! catches them at the node being rendered and records them as an annotation, so they
//! never escape a tree walk.

use thiserror::Error;

/// Errors raised while loading templates into a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Registering the template would close a reference cycle.
    ///
    /// `cycle` lists the keys along the cycle, with the first key repeated at the end.
    #[error("Circular template reference detected: {}", .cycle.join(" -> "))]
    CircularDependency {
        /// Keys along the cycle, first key repeated at the end
        cycle: Vec<String>,
    },

    /// The key is already registered and overwriting was disabled for this load.
    #[error("Template '{key}' is already registered and overwrite is disabled")]
    DuplicateKeyRejected {
        /// Key that was kept
        key: String,
    },

    /// The template definition itself is malformed.
    #[error("Invalid template '{key}': {reason}")]
    InvalidTemplate {
        /// Key of the rejected template
        key: String,
        /// What was wrong with it
        reason: String,
    },
}

impl RegistrationError {
    /// Key of the template this error is about.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::CircularDependency {
                cycle,
            } => cycle.first().map_or("", String::as_str),
            Self::DuplicateKeyRejected {
                key,
            }
            | Self::InvalidTemplate {
                key,
                ..
            } => key,
        }
    }

    /// Generate an operator-facing message with a suggestion for fixing the
    /// configuration.
    #[must_use]
    pub fn format_with_context(&self) -> String {
        match self {
            Self::CircularDependency {
                cycle,
            } => format_circular_dependency_error(cycle),
            Self::DuplicateKeyRejected {
                key,
            } => format!(
                "Template '{key}' was defined more than once.\n\
                 The first definition was kept; rename one of them or enable overwrite.\n"
            ),
            Self::InvalidTemplate {
                key,
                reason,
            } => format!("Template '{key}' was skipped: {reason}\n"),
        }
    }
}

fn format_circular_dependency_error(cycle: &[String]) -> String {
    let mut msg = String::new();

    msg.push_str("Circular template reference\n\n");
    msg.push_str("These templates reference each other and would expand forever:\n");
    for (i, key) in cycle.iter().enumerate() {
        if i > 0 {
            msg.push_str("  ↓\n");
        }
        msg.push_str(&format!("  {key}\n"));
    }
    msg.push_str("\nNone of the templates on the cycle were registered.\n");
    msg.push_str("Remove the reference that closes the cycle, or move the shared part into a\n");
    msg.push_str("partial.\n");

    msg
}

/// Errors raised while rendering a single reference node.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No template is registered under the referenced key.
    #[error("Template '{key}' is not registered{}", format_suggestions(.suggestions))]
    TemplateNotFound {
        /// The referenced key
        key: String,
        /// Registered keys with similar names
        suggestions: Vec<String>,
    },

    /// The `ref` field is present but unusable.
    #[error("Invalid reference: {reason}")]
    InvalidReference {
        /// What was wrong with the reference
        reason: String,
    },

    /// The node's local context is not a map.
    #[error("Invalid context for template '{key}': {reason}")]
    InvalidContext {
        /// Template being rendered
        key: String,
        /// What was wrong with the context
        reason: String,
    },

    /// The key map on a reference node is neither a map nor a list of names.
    #[error("Invalid key_map for template '{key}': {reason}")]
    InvalidKeyMap {
        /// Template being rendered
        key: String,
        /// What was wrong with the key map
        reason: String,
    },

    /// A template body or partial failed to compile under its dialect.
    #[error("Failed to compile '{name}': {message}")]
    SnippetCompileFailure {
        /// Template key or partial name
        name: String,
        /// Compiler message
        message: String,
    },

    /// A template body or partial failed while executing.
    #[error("Failed to render '{name}': {message}")]
    SnippetRuntimeFailure {
        /// Template key or partial name
        name: String,
        /// Runtime message
        message: String,
        /// Underlying engine error, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A template or partial included a partial that is not loaded.
    #[error("Partial '{name}' is not registered")]
    PartialNotFound {
        /// Requested partial name
        name: String,
    },

    /// The rendered text could not be parsed back into a card.
    #[error("Rendered output of template '{key}' is not a valid card: {reason}")]
    UnparsableOutput {
        /// Template being rendered
        key: String,
        /// What the parser rejected
        reason: String,
        /// Underlying JSON error, if any
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The bulk-override payload could not be parsed.
    #[error("Invalid overrides for template '{key}': {reason}")]
    BulkOverrideParseFailure {
        /// Template being rendered
        key: String,
        /// What the parser rejected
        reason: String,
        /// Underlying JSON error, if any
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Template expansion nested deeper than the configured limit.
    #[error("Template expansion exceeded the maximum depth of {max_depth} at '{key}'")]
    DepthExceeded {
        /// Template at which the limit was hit
        key: String,
        /// The configured limit
        max_depth: usize,
    },
}

impl RenderError {
    pub(crate) fn runtime(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SnippetRuntimeFailure {
            name: name.into(),
            message: message.into(),
            source: None,
        }
    }
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean {}?)", suggestions.join(", "))
    }
}

/// A contained render failure, recorded for reporting after a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    /// Approximate location of the node, e.g. `cards[1].card`
    pub path: String,
    /// Referenced template key, when the node had a usable one
    pub key: Option<String>,
    /// The annotation written onto the node
    pub message: String,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
