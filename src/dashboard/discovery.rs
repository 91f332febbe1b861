//! Finding the templates and partials a dashboard defines.
//!
//! Templates come from two places: the top-level `templates` map, and any card
//! inside the views that carries `card_template: <key>`. Definitions are not
//! searched for further definitions. Partials come from the `partials` map, split
//! into bodies available now and bodies that must be fetched.

use serde_json::Value;

use super::{Dashboard, PartialDef};
use crate::constants::FIELD_TEMPLATE;
use crate::source::RemotePartial;
use crate::templating::{Dialect, EngineBuilder, NodePath, Partial};

/// A template definition and where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredTemplate {
    /// Key from the `templates` map; `None` when the node names itself with
    /// `card_template`
    pub key: Option<String>,
    /// The definition node
    pub node: Value,
    /// Location in the dashboard, e.g. `templates.light` or `views[0].cards[2]`
    pub origin: String,
}

impl DiscoveredTemplate {
    /// Queue this definition on an engine builder.
    #[must_use]
    pub fn add_to(&self, builder: EngineBuilder) -> EngineBuilder {
        match &self.key {
            Some(key) => builder.template_node(key, &self.node),
            None => builder.marked_template(&self.node),
        }
    }
}

/// A partial definition that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryProblem {
    /// Partial name
    pub name: String,
    /// What is wrong with it
    pub reason: String,
}

impl std::fmt::Display for DiscoveryProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "partial '{}': {}", self.name, self.reason)
    }
}

/// Everything a dashboard defines for one refresh pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Template definitions in discovery order
    pub templates: Vec<DiscoveredTemplate>,
    /// Partials with inline bodies
    pub partials: Vec<Partial>,
    /// Partials to fetch
    pub remote_partials: Vec<RemotePartial>,
    /// Unusable partial definitions
    pub problems: Vec<DiscoveryProblem>,
}

/// Collect a dashboard's templates and partials.
#[must_use]
pub fn discover(dashboard: &Dashboard) -> Discovery {
    let mut discovery = Discovery::default();

    for (key, node) in &dashboard.templates {
        discovery.templates.push(DiscoveredTemplate {
            key: Some(key.clone()),
            node: node.clone(),
            origin: format!("templates.{key}"),
        });
    }

    for (index, view) in dashboard.views.iter().enumerate() {
        collect_marked(view, &NodePath::root(format!("views[{index}]")), &mut discovery.templates);
    }

    for (name, definition) in &dashboard.partials {
        match definition {
            PartialDef::Inline(body) => {
                discovery.partials.push(Partial::new(name.clone(), body.clone(), Dialect::default()));
            }
            PartialDef::Detailed(spec) => match (&spec.body, &spec.url) {
                (Some(body), None) => discovery.partials.push(
                    Partial::new(name.clone(), body.clone(), spec.dialect)
                        .with_priority(spec.priority),
                ),
                (None, Some(url)) => discovery.remote_partials.push(RemotePartial {
                    name: name.clone(),
                    location: url.clone(),
                    dialect: spec.dialect,
                    priority: spec.priority,
                }),
                (Some(_), Some(_)) => discovery.problems.push(DiscoveryProblem {
                    name: name.clone(),
                    reason: "has both 'body' and 'url'".to_string(),
                }),
                (None, None) => discovery.problems.push(DiscoveryProblem {
                    name: name.clone(),
                    reason: "needs a 'body' or a 'url'".to_string(),
                }),
            },
        }
    }

    for problem in &discovery.problems {
        tracing::warn!("Skipping {}", problem);
    }
    tracing::debug!(
        "Discovered {} template(s), {} inline and {} remote partial(s)",
        discovery.templates.len(),
        discovery.partials.len(),
        discovery.remote_partials.len()
    );
    discovery
}

fn collect_marked(node: &Value, path: &NodePath, found: &mut Vec<DiscoveredTemplate>) {
    match node {
        Value::Object(map) => {
            if map.contains_key(FIELD_TEMPLATE) {
                found.push(DiscoveredTemplate {
                    key: None,
                    node: node.clone(),
                    origin: path.to_string(),
                });
                return;
            }
            for (field, child) in map {
                collect_marked(child, &path.field(field), found);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_marked(item, &path.index(index), found);
            }
        }
        _ => {}
    }
}
