//! Logic-block dialect rendering with Tera.
//!
//! Every render builds a fresh [`Tera`] instance (cheap: a few empty maps) with one
//! template and the `include_partial` function registered, so no state leaks between
//! renders and nested includes get their own depth counter.
//!
//! # Including partials
//!
//! Partials take named parameters, which become the partial's whole context:
//!
//! ```text
//! {{ include_partial(partial="greet", name=context.n) }}
//! {{ include_partial(partial="row", data=context.entity, icon="mdi:fan") }}
//! ```
//!
//! `data`, when given, must be an object and forms the base that the other named
//! parameters overlay.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tera::{Context as TeraContext, Tera};

use super::error::RenderError;
use super::partials::{OutputMode, SnippetEngine};
use super::utils::{escape_json_fragment, find_similar};

/// Name of the include function available to logic-block templates.
pub const INCLUDE_FUNCTION: &str = "include_partial";

/// Suffix that switches on JSON-string escaping for template bodies.
const JSON_SUFFIX: &str = ".json";

/// What Tera writes when a map is substituted as text.
const MAP_PLACEHOLDER: &str = "[object]";

/// Tera function rendering a registered partial.
struct IncludePartial {
    engine: SnippetEngine,
    depth: usize,
}

impl tera::Function for IncludePartial {
    fn call(&self, args: &HashMap<String, tera::Value>) -> tera::Result<tera::Value> {
        let name = args
            .get("partial")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg(format!("{INCLUDE_FUNCTION} requires partial=\"name\"")))?;

        let mut data = match args.get("data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(tera::Error::msg(format!(
                    "{INCLUDE_FUNCTION}(partial=\"{name}\") expects data= to be an object"
                )));
            }
        };

        // HashMap order is arbitrary; overlay named parameters in a stable order
        let named: BTreeMap<&String, &Value> =
            args.iter().filter(|(k, _)| k.as_str() != "partial" && k.as_str() != "data").collect();
        for (key, value) in named {
            data.insert(key.clone(), value.clone());
        }

        let rendered = self
            .engine
            .render_partial(name, &Value::Object(data), self.depth + 1)
            .map_err(|e| tera::Error::chain(format!("failed to include partial '{name}'"), e))?;
        Ok(Value::String(rendered))
    }
}

/// Check that `text` parses as a logic-block template.
///
/// # Errors
///
/// Returns [`RenderError::SnippetCompileFailure`] with Tera's parse message.
pub fn check_syntax(name: &str, text: &str) -> Result<(), RenderError> {
    let mut tera = Tera::default();
    tera.add_raw_template(name, text).map_err(|e| RenderError::SnippetCompileFailure {
        name: name.to_string(),
        message: format_tera_error(&e),
    })
}

/// Render `text` as a logic-block template.
///
/// # Errors
///
/// Compile errors become [`RenderError::SnippetCompileFailure`]; everything raised
/// while rendering (missing variables, failed includes, filter errors) becomes
/// [`RenderError::SnippetRuntimeFailure`] carrying the Tera error as its source.
pub(crate) fn render_jinja(
    engine: &SnippetEngine,
    name: &str,
    text: &str,
    context: &Value,
    mode: OutputMode,
    depth: usize,
) -> Result<String, RenderError> {
    let mut tera = Tera::default();
    let template_name = match mode {
        OutputMode::JsonString => {
            tera.autoescape_on(vec![JSON_SUFFIX]);
            tera.set_escape_fn(escape_json_fragment);
            format!("{name}{JSON_SUFFIX}")
        }
        OutputMode::Text => {
            tera.autoescape_on(vec![]);
            name.to_string()
        }
    };

    tera.register_function(
        INCLUDE_FUNCTION,
        IncludePartial {
            engine: engine.clone(),
            depth,
        },
    );

    tera.add_raw_template(&template_name, text).map_err(|e| RenderError::SnippetCompileFailure {
        name: name.to_string(),
        message: format_tera_error(&e),
    })?;

    let tera_context = TeraContext::from_value(context.clone())
        .map_err(|e| RenderError::runtime(name, format!("context must be an object: {e}")))?;

    let rendered =
        tera.render(&template_name, &tera_context).map_err(|e| parse_tera_error(name, e, context))?;
    if substituted_map(text, context, &rendered) {
        return Err(RenderError::runtime(
            name,
            "a map was substituted as text; pick one of its fields or use the json_encode filter",
        ));
    }
    Ok(rendered)
}

/// Whether the output holds more map placeholders than the template text and the
/// string values of the context could account for.
fn substituted_map(text: &str, context: &Value, rendered: &str) -> bool {
    fn in_strings(value: &Value) -> usize {
        match value {
            Value::String(s) => s.matches(MAP_PLACEHOLDER).count(),
            Value::Array(items) => items.iter().map(in_strings).sum(),
            Value::Object(map) => map.values().map(in_strings).sum(),
            _ => 0,
        }
    }

    let produced = rendered.matches(MAP_PLACEHOLDER).count();
    produced > 0 && produced > text.matches(MAP_PLACEHOLDER).count() + in_strings(context)
}

/// Turn a Tera render error into a [`RenderError`], adding "did you mean" hints for
/// missing variables.
fn parse_tera_error(name: &str, error: tera::Error, context: &Value) -> RenderError {
    let mut message = format_tera_error(&error);

    if let Some(variable) = extract_variable_name(&message) {
        let available = available_variables(context);
        let suggestions = find_similar(&variable, &available);
        if !suggestions.is_empty() {
            message.push_str(&format!(" (did you mean {}?)", suggestions.join(", ")));
        }
    }

    RenderError::SnippetRuntimeFailure {
        name: name.to_string(),
        message,
        source: Some(Box::new(error)),
    }
}

/// Extract the variable name from Tera's "Variable `foo` not found" message.
fn extract_variable_name(error_msg: &str) -> Option<String> {
    let re = Regex::new(r"Variable `([^`]+)` not found").ok()?;
    re.captures(error_msg).and_then(|caps| caps.get(1)).map(|m| m.as_str().to_string())
}

/// Dotted paths available in a render context, three levels deep.
fn available_variables(context: &Value) -> Vec<String> {
    fn collect(prefix: &str, value: &Value, depth: usize, out: &mut Vec<String>) {
        if let Value::Object(map) = value {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                if depth < 3 {
                    collect(&path, child, depth + 1, out);
                }
                out.push(path);
            }
        }
    }

    let mut vars = Vec::new();
    collect("", context, 0, &mut vars);
    vars
}

/// Format a Tera error chain into one readable line.
///
/// Tera wraps the root cause in "Failed to render 'name'" layers; those are
/// dropped and the remaining messages are joined with arrows.
pub fn format_tera_error(error: &tera::Error) -> String {
    use std::error::Error;

    let mut messages = Vec::new();
    let mut current: Option<&dyn Error> = Some(error);
    while let Some(err) = current {
        let msg = err.to_string();
        let cleaned = msg.trim();
        let is_wrapper = (cleaned.starts_with("Failed to render '")
            || cleaned.starts_with("Failed to parse '"))
            && cleaned.ends_with('\'');
        if !cleaned.is_empty() && !is_wrapper {
            messages.push(cleaned.to_string());
        }
        current = err.source();
    }

    if messages.is_empty() {
        error.to_string()
    } else {
        messages.join(" → ")
    }
}
