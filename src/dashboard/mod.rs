//! Dashboard documents: the input and output of a refresh pass.
//!
//! A dashboard is one YAML or JSON document:
//!
//! ```yaml
//! title: Home
//! templates:
//!   light_button:
//!     context: { icon: mdi:lightbulb }
//!     type: button
//!     entity: "{{ context.entity }}"
//!     icon: "{{ context.icon }}"
//! partials:
//!   greet: "Hello {{ name }}!"
//!   footer:
//!     url: partials/footer.eta
//!     dialect: eta
//! views:
//!   - title: Kitchen
//!     cards:
//!       - ref: light_button
//!         context: { entity: light.kitchen }
//! ```
//!
//! Cards anywhere in the views carrying `card_template: <key>` are template
//! definitions too; see [`discovery`]. Unknown top-level fields are kept as-is.

pub mod discovery;
pub mod sink;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::core::CardtplError;
use crate::templating::Dialect;

pub use discovery::{DiscoveredTemplate, Discovery, DiscoveryProblem, discover};
pub use sink::{DirectorySink, MemorySink, SaveOutcome, ViewSink};

/// A dashboard document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    /// Top-level fields cardtpl does not interpret (`title`, `background`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// Templates keyed by name
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub templates: Map<String, Value>,

    /// Partials keyed by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partials: BTreeMap<String, PartialDef>,

    /// Views, each a map with `cards` and/or `sections`
    #[serde(default)]
    pub views: Vec<Value>,
}

/// A partial as written in a dashboard: an inline body or a full definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartialDef {
    /// `name: "body"`, in the default dialect
    Inline(String),
    /// `name: { body | url, dialect, priority }`
    Detailed(PartialSpec),
}

/// A partial definition with explicit settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialSpec {
    /// Inline body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// URL or path to fetch the body from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Body dialect
    #[serde(default)]
    pub dialect: Dialect,
    /// Registration priority
    #[serde(default)]
    pub priority: i64,
}

/// Output encoding for a dashboard or view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// YAML
    #[default]
    Yaml,
    /// Pretty-printed JSON
    Json,
}

impl Format {
    /// Encode `value`, ending with a newline.
    pub fn render<T: Serialize>(self, value: &T) -> Result<String> {
        let mut text = match self {
            Self::Yaml => serde_yaml::to_string(value).context("Failed to encode YAML")?,
            Self::Json => serde_json::to_string_pretty(value).context("Failed to encode JSON")?,
        };
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(text)
    }
}

impl Dashboard {
    /// Read and parse a dashboard file.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CardtplError::DashboardNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read dashboard {}", path.display()))?;
        let dashboard = Self::parse(&text, &path.display().to_string())?;

        tracing::debug!(
            "Loaded dashboard {} with {} view(s), {} template(s), {} partial(s)",
            path.display(),
            dashboard.views.len(),
            dashboard.templates.len(),
            dashboard.partials.len()
        );
        Ok(dashboard)
    }

    /// Parse dashboard text. YAML is accepted, and so is JSON as a subset of it.
    ///
    /// `file` only labels errors.
    pub fn parse(text: &str, file: &str) -> Result<Self, CardtplError> {
        let document: Value =
            serde_yaml::from_str(text).map_err(|e| CardtplError::DashboardParseError {
                file: file.to_string(),
                reason: e.to_string(),
            })?;

        let invalid = |reason: String| CardtplError::InvalidDashboard {
            file: file.to_string(),
            reason,
        };

        match &document {
            Value::Object(_) => {}
            Value::Null => return Err(invalid("the document is empty".to_string())),
            _ => return Err(invalid("the document must be a map".to_string())),
        }

        let dashboard: Self =
            serde_json::from_value(document).map_err(|e| invalid(e.to_string()))?;

        if let Some(index) = dashboard.views.iter().position(|view| !view.is_object()) {
            return Err(invalid(format!("views[{index}] is not a map")));
        }
        Ok(dashboard)
    }

    /// A file-safe name for every view, unique within the dashboard.
    #[must_use]
    pub fn view_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.views
            .iter()
            .enumerate()
            .map(|(index, view)| {
                let base = view_name(view, index);
                let mut name = base.clone();
                let mut n = 2;
                while !seen.insert(name.clone()) {
                    name = format!("{base}-{n}");
                    n += 1;
                }
                name
            })
            .collect()
    }
}

/// A file-safe name for a view: its `path`, else its `title`, else its position.
#[must_use]
pub fn view_name(view: &Value, index: usize) -> String {
    let label = ["path", "title"]
        .iter()
        .filter_map(|field| view.get(*field).and_then(Value::as_str))
        .map(slug)
        .find(|s| !s.is_empty());
    label.unwrap_or_else(|| format!("view-{index}"))
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
