//! cardtpl - card template resolution for dashboard configurations
//!
//! Dashboards built from cards repeat themselves: the same button with a different
//! entity, the same stack with different rooms. cardtpl lets a dashboard define a
//! card once as a named *template* and *reference* it wherever it is needed, with
//! per-use variables. A refresh pass expands every reference into a concrete card.
//!
//! # Architecture Overview
//!
//! - Templates and partials are discovered from the dashboard on every pass
//! - A fresh [`templating::Engine`] holds them for that pass, read-only
//! - Each view is resolved independently; a failing card is annotated in place and
//!   never takes its siblings down
//! - Resolved output keeps `ref`, `context`, `key_map` and `overrides`, so the
//!   result can be resolved again
//!
//! # Core Modules
//!
//! - [`templating`] - the resolution engine: registry, context merger, key mapper,
//!   partials in two dialects, and the tree walker
//! - [`dashboard`] - the dashboard document model, discovery, and view persistence
//! - [`source`] - fetching partial bodies over HTTP and from files
//! - [`refresh`] - one discover/load/resolve pass
//! - [`config`] - `~/.cardtpl/config.toml`
//! - [`core`] - application errors and their terminal presentation
//! - [`cli`] - the `cardtpl` command
//! - [`constants`] - reserved field names and limits
//!
//! # Example
//!
//! ```rust,no_run
//! use cardtpl_cli::templating::Engine;
//! use serde_json::json;
//!
//! let (engine, report) = Engine::builder()
//!     .template_node("t1", &json!({"type": "button", "name": "{{ context.n }}"}))
//!     .build();
//! assert!(report.is_clean());
//!
//! let resolution = engine.resolve(&json!({"ref": "t1", "context": {"n": "World"}}));
//! assert_eq!(resolution.node["name"], "World");
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod dashboard;
pub mod refresh;
pub mod source;
pub mod templating;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
