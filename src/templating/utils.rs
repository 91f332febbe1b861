//! Utility functions for the templating system.

use serde_json::{Map, Value};
use strsim::levenshtein;

use crate::constants::SIMILARITY_THRESHOLD_PERCENT;

/// Shallow-merge `overrides` into `base`.
///
/// Every top-level field of `overrides` replaces the field of the same name in
/// `base`; nested objects are replaced, not merged. Fields already in `base` keep
/// their position.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use cardtpl_cli::templating::utils::shallow_merge;
///
/// let mut base = json!({ "type": "button", "tap_action": { "action": "toggle" } });
/// let overrides = json!({ "tap_action": { "action": "more-info" }, "color": "red" });
///
/// shallow_merge(base.as_object_mut().unwrap(), overrides.as_object().unwrap());
/// assert_eq!(base, json!({
///     "type": "button",
///     "tap_action": { "action": "more-info" },
///     "color": "red"
/// }));
/// ```
pub fn shallow_merge(base: &mut Map<String, Value>, overrides: &Map<String, Value>) {
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
}

/// Escape text so it can sit inside a JSON string literal.
///
/// Used as the output escaper while rendering a serialized template body: every
/// substituted value lands between the quotes of some JSON string, so quotes,
/// backslashes and control characters must be escaped to keep the text parseable.
#[must_use]
pub fn escape_json_fragment(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if (c as u32) < 0x20 => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Undo JSON string escaping inside template tags.
///
/// Template bodies are serialized to JSON text before rendering, which escapes the
/// quotes in expressions such as `include_partial(partial="greet")`. This restores
/// the text between each pair of `delimiters` so the dialect sees the expression
/// as written. A span that is not a valid JSON string fragment is left as is.
#[must_use]
pub fn unescape_tag_contents(text: &str, delimiters: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        let next = delimiters
            .iter()
            .filter_map(|&(open, close)| rest.find(open).map(|i| (i, open, close)))
            .min_by_key(|&(i, _, _)| i);
        let Some((start, open, close)) = next else {
            break;
        };
        let inner_start = start + open.len();
        let Some(len) = rest[inner_start..].find(close) else {
            break;
        };

        out.push_str(&rest[..inner_start]);
        let inner = &rest[inner_start..inner_start + len];
        match serde_json::from_str::<String>(&format!("\"{inner}\"")) {
            Ok(unescaped) => out.push_str(&unescaped),
            Err(_) => out.push_str(inner),
        }
        out.push_str(close);
        rest = &rest[inner_start + len + close.len()..];
    }

    out.push_str(rest);
    out
}

/// Find names similar to `target` using Levenshtein distance.
///
/// Returns at most three candidates, closest first, within
/// [`SIMILARITY_THRESHOLD_PERCENT`] of the target's length.
#[must_use]
pub fn find_similar<'a>(target: &str, available: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut scored: Vec<_> =
        available.into_iter().map(|name| (name.clone(), levenshtein(target, name))).collect();

    scored.sort_by(|(a_name, a_dist), (b_name, b_dist)| {
        a_dist.cmp(b_dist).then_with(|| a_name.cmp(b_name))
    });

    let max_distance = (target.len() * SIMILARITY_THRESHOLD_PERCENT / 100).max(1);
    scored
        .into_iter()
        .filter(|(_, dist)| *dist <= max_distance)
        .take(3)
        .map(|(name, _)| name)
        .collect()
}
