//! Global constants used throughout the cardtpl codebase.
//!
//! This module holds the reserved node field names that make up the persisted
//! configuration contract, plus the depth limits, timeouts, and retry
//! parameters shared across modules. The field names are part of the on-disk
//! format: renaming one breaks every dashboard that was saved with it.

use std::time::Duration;

/// Template marker. A card carrying this field is a template definition and
/// the field's string value is the key it registers under.
pub const FIELD_TEMPLATE: &str = "card_template";

/// Reference key naming the template a node expands.
pub const FIELD_REF: &str = "ref";

/// Local context on reference nodes, default context on template definitions.
pub const FIELD_CONTEXT: &str = "context";

/// Key map projecting context variables onto a rendered node's own fields.
pub const FIELD_KEY_MAP: &str = "key_map";

/// Registration priority of a template or partial.
pub const FIELD_PRIORITY: &str = "priority";

/// Whether ancestor context is visible inside a template.
pub const FIELD_REPLICATE_CONTEXT: &str = "replicate_context";

/// Expression dialect of a template or partial.
pub const FIELD_DIALECT: &str = "dialect";

/// Bulk-override payload: a JSON-encoded object shallow-merged over the
/// rendered node.
pub const FIELD_OVERRIDES: &str = "overrides";

/// Node-level error annotation written by the resolver.
pub const FIELD_ERROR: &str = "error";

/// Fields owned by the engine. The walker never descends into them and the
/// resolver places them first in its output.
pub const ENGINE_FIELDS: &[&str] =
    &[FIELD_ERROR, FIELD_REF, FIELD_CONTEXT, FIELD_KEY_MAP, FIELD_OVERRIDES];

/// Fields describing a template definition rather than its body.
pub const TEMPLATE_DEFINITION_FIELDS: &[&str] = &[
    FIELD_TEMPLATE,
    FIELD_CONTEXT,
    FIELD_KEY_MAP,
    FIELD_PRIORITY,
    FIELD_REPLICATE_CONTEXT,
    FIELD_DIALECT,
];

/// Maximum nesting of template expansions along one branch of the tree.
///
/// Registration already rejects reference cycles; this bound only stops
/// runaway expansion through context-supplied sub-nodes.
pub const DEFAULT_MAX_DEPTH: usize = 50;

/// Maximum nesting of partial includes within a single render.
pub const MAX_INCLUDE_DEPTH: usize = 10;

/// Default number of concurrent partial fetches.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// Default number of retries for a failed HTTP fetch.
pub const DEFAULT_FETCH_RETRIES: usize = 3;

/// Default per-request timeout for HTTP fetches, in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Starting delay for exponential backoff between fetch retries (50ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 50;

/// Maximum backoff delay between fetch retries (2s).
pub fn max_backoff_delay() -> Duration {
    Duration::from_secs(2)
}

/// Maximum allowed Levenshtein distance as a percentage of target length for
/// "did you mean" suggestions.
pub const SIMILARITY_THRESHOLD_PERCENT: usize = 50;
