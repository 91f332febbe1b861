//! Core types for cardtpl.
//!
//! Application-level error handling lives here: [`CardtplError`] for failures that
//! abort a command, and [`ErrorContext`] / [`user_friendly_error`] for presenting
//! them in the terminal with details and a suggestion.

pub mod error;

pub use error::{CardtplError, ErrorContext, user_friendly_error};
