//! Context merging for template expansion.
//!
//! Every reference node is rendered against an *effective context* built from three
//! layers of variable bindings:
//!
//! 1. the template's default context (lowest precedence),
//! 2. the ancestor context flowing down from enclosing expansions, but only when the
//!    template replicates context,
//! 3. the node's own local context (always wins).
//!
//! Overlays are shallow: a key present in a higher layer replaces the whole value
//! from the layer below. Key order is the order in which keys first appear.

use serde_json::{Map, Value};

/// Variable bindings visible to a node while it renders.
pub type Context = Map<String, Value>;

/// Build the effective context for a reference node.
///
/// With `replicate_context` false the ancestor layer is dropped entirely: only the
/// template defaults and the node's own bindings apply.
///
/// # Examples
///
/// ```rust
/// use cardtpl_cli::templating::context::merge_context;
/// use serde_json::json;
///
/// let defaults = json!({ "x": 1 }).as_object().cloned().unwrap();
/// let ancestor = json!({ "x": 2, "y": 3 }).as_object().cloned().unwrap();
/// let local = json!({ "x": 4 }).as_object().cloned().unwrap();
///
/// let merged = merge_context(&ancestor, &defaults, &local, true);
/// assert_eq!(merged["x"], json!(4));
/// assert_eq!(merged["y"], json!(3));
///
/// let isolated = merge_context(&ancestor, &defaults, &Default::default(), false);
/// assert_eq!(isolated["x"], json!(1));
/// assert!(!isolated.contains_key("y"));
/// ```
#[must_use]
pub fn merge_context(
    ancestor: &Context,
    template_defaults: &Context,
    local: &Context,
    replicate_context: bool,
) -> Context {
    let mut merged = template_defaults.clone();
    if replicate_context {
        overlay(&mut merged, ancestor);
    }
    overlay(&mut merged, local);
    merged
}

/// Shallow-overlay `top` onto `base`.
pub fn overlay(base: &mut Context, top: &Context) {
    for (key, value) in top {
        base.insert(key.clone(), value.clone());
    }
}

/// Copy of `context` without `key`, preserving the order of the remaining keys.
#[must_use]
pub fn without_key(context: &Context, key: &str) -> Context {
    context.iter().filter(|(k, _)| k.as_str() != key).map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Copy of `context` without the variable at `path`.
///
/// Paths resolve the way [`lookup`] resolves them: a direct key match is removed at
/// the top level, otherwise the leaf of a dotted path is removed from a copy of its
/// enclosing object and sibling values stay visible. A list element addressed by
/// index becomes `null`, so later indices keep their meaning.
#[must_use]
pub fn without_variable(context: &Context, path: &str) -> Context {
    if context.contains_key(path) || !path.contains('.') {
        return without_key(context, path);
    }

    let mut copy = context.clone();
    let mut segments = path.split('.');
    if let Some(value) = segments.next().and_then(|root| copy.get_mut(root)) {
        let rest: Vec<&str> = segments.collect();
        remove_path(value, &rest);
    }
    copy
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };
    match value {
        Value::Object(map) if rest.is_empty() => {
            map.shift_remove(*segment);
        }
        Value::Object(map) => {
            if let Some(child) = map.get_mut(*segment) {
                remove_path(child, rest);
            }
        }
        Value::Array(items) => {
            let Some(child) = segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)) else {
                return;
            };
            if rest.is_empty() {
                *child = Value::Null;
            } else {
                remove_path(child, rest);
            }
        }
        _ => {}
    }
}

/// Look up a possibly dotted variable path (`entity.icon`) in a context.
///
/// A direct key match wins over path traversal, so variables whose names contain
/// dots stay reachable. Array segments are addressed by index (`items.0`).
#[must_use]
pub fn lookup<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    if let Some(value) = context.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
