//! Integration test suite for cardtpl
//!
//! End-to-end tests through the public library API and the `cardtpl` binary.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **scenarios**: engine behavior on complete card trees
//! - **refresh**: refresh passes over dashboard files, with file and HTTP partials
//! - **cli**: the `resolve` and `validate` commands

mod cli;
mod refresh;
mod scenarios;
