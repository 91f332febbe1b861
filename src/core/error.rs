//! Error handling for cardtpl
//!
//! Engine-level problems (a template that cannot register, a card that fails to
//! render) are data, not errors: they end up in load reports and node annotations.
//! This module covers what stops a command outright: a dashboard that cannot be
//! read, a broken configuration file, output that cannot be written.
//!
//! The system has two parts, as elsewhere in the codebase:
//! - [`CardtplError`] - strongly-typed failures for code to match on
//! - [`ErrorContext`] - a wrapper adding details and a suggestion for the terminal
//!
//! # Examples
//!
//! ```rust,no_run
//! use cardtpl_cli::core::{CardtplError, user_friendly_error};
//!
//! let error = CardtplError::DashboardNotFound {
//!     path: "ui-lovelace.yaml".to_string(),
//! };
//! let context = user_friendly_error(anyhow::Error::from(error));
//! context.display(); // colored error, details and suggestion on stderr
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Failures that abort a cardtpl command.
#[derive(Error, Debug)]
pub enum CardtplError {
    /// The dashboard file does not exist.
    #[error("Dashboard not found: {path}")]
    DashboardNotFound {
        /// Path that was given
        path: String,
    },

    /// The dashboard file is not valid YAML or JSON.
    #[error("Failed to parse dashboard {file}: {reason}")]
    DashboardParseError {
        /// Dashboard file
        file: String,
        /// Parser message
        reason: String,
    },

    /// The dashboard parses but has the wrong shape.
    #[error("Invalid dashboard {file}: {reason}")]
    InvalidDashboard {
        /// Dashboard file
        file: String,
        /// What is wrong
        reason: String,
    },

    /// The configuration file is unreadable or invalid.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// What went wrong
        message: String,
    },

    /// Templates, partials or references failed and the caller asked for a
    /// strict run.
    #[error("{count} problem(s) found while resolving {dashboard}")]
    ResolutionProblems {
        /// Dashboard file
        dashboard: String,
        /// Number of rejected templates, partials and failed nodes
        count: usize,
    },

    /// A view could not be persisted.
    #[error("Failed to save view '{view}': {reason}")]
    SaveFailed {
        /// View name or path
        view: String,
        /// Underlying problem
        reason: String,
    },

    /// I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML error.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl Clone for CardtplError {
    fn clone(&self) -> Self {
        match self {
            Self::DashboardNotFound {
                path,
            } => Self::DashboardNotFound {
                path: path.clone(),
            },
            Self::DashboardParseError {
                file,
                reason,
            } => Self::DashboardParseError {
                file: file.clone(),
                reason: reason.clone(),
            },
            Self::InvalidDashboard {
                file,
                reason,
            } => Self::InvalidDashboard {
                file: file.clone(),
                reason: reason.clone(),
            },
            Self::ConfigError {
                message,
            } => Self::ConfigError {
                message: message.clone(),
            },
            Self::ResolutionProblems {
                dashboard,
                count,
            } => Self::ResolutionProblems {
                dashboard: dashboard.clone(),
                count: *count,
            },
            Self::SaveFailed {
                view,
                reason,
            } => Self::SaveFailed {
                view: view.clone(),
                reason: reason.clone(),
            },
            // Source errors are not Clone; keep their message
            Self::IoError(e) => Self::IoError(std::io::Error::new(e.kind(), e.to_string())),
            Self::TomlError(e) => Self::Other {
                message: format!("TOML parsing error: {e}"),
            },
            Self::JsonError(e) => Self::Other {
                message: format!("JSON error: {e}"),
            },
            Self::YamlError(e) => Self::Other {
                message: format!("YAML error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// An error with optional details and a suggestion, for terminal display.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: CardtplError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error with no details or suggestion.
    #[must_use]
    pub const fn new(error: CardtplError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr: error in red, details in yellow, suggestion in
    /// green.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with suggestions where the error
/// type is recognized.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(cardtpl_error) = error.downcast_ref::<CardtplError>() {
        return create_error_context(cardtpl_error.clone());
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(CardtplError::Other {
                    message: error_with_chain(&error),
                })
                .with_suggestion("Check the permissions of the dashboard file and output directory");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(CardtplError::Other {
                    message: error_with_chain(&error),
                })
                .with_suggestion("Check that the file or directory exists and the path is correct");
            }
            _ => {}
        }
    }

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(CardtplError::ConfigError {
            message: toml_error.to_string(),
        })
        .with_suggestion("Check the TOML syntax of your cardtpl configuration file");
    }

    ErrorContext::new(CardtplError::Other {
        message: error_with_chain(&error),
    })
}

/// The error message followed by its numbered causes.
fn error_with_chain(error: &anyhow::Error) -> String {
    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }
    message
}

fn create_error_context(error: CardtplError) -> ErrorContext {
    match &error {
        CardtplError::DashboardNotFound {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Pass the path of a dashboard YAML or JSON file")
            .with_details("cardtpl reads one dashboard document with a top-level 'views' list"),

        CardtplError::DashboardParseError {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check the YAML syntax: indentation, quoting of '{{ }}' expressions, and list markers")
            .with_details("Template expressions that start a YAML value must be quoted"),

        CardtplError::InvalidDashboard {
            ..
        } => ErrorContext::new(error).with_suggestion(
            "A dashboard needs a 'views' list; 'templates' must be a map and 'partials' a map of names",
        ),

        CardtplError::ConfigError {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check ~/.cardtpl/config.toml or the file passed with --config"),

        CardtplError::ResolutionProblems {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Run 'cardtpl validate' to list every problem with its location"),

        CardtplError::SaveFailed {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check that the output directory exists and is writable"),

        _ => ErrorContext::new(error),
    }
}
