//! # Error Types
//!
//! This module defines all error types for the ABC interpreter and player.
//!
//! Parse errors carry location information (line/column) so a caller can point
//! at the offending text. Parsing never stops at the first problem: the parser
//! collects every [`AbcError`] it finds into the tune's diagnostics, and
//! [`AbcError::Diagnostics`] bundles them when a complete tune is required.
//!
//! ## Error Types
//! - [`AbcError`] - Tokenizer/parser/structure errors
//! - [`SchedulerError`] - Rejections from the playback queue
//! - [`BackendError`] - Failures reported by a sound backend
//! - [`ConnectionError`] - Failures talking to a remote player
//! - [`ConfigError`] - Invalid or unreadable player configuration
//!
//! ## Usage
//! ```rust
//! use abcplay::{compile, AbcError};
//!
//! match compile("X:1\nK:C\n(3abc") {
//!     Ok(tune) => println!("{} events", tune.events.len()),
//!     Err(AbcError::Diagnostics(errors)) => {
//!         for e in errors {
//!             eprintln!("{}", e);
//!         }
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AbcError {
    /// Parse error with location information.
    ///
    /// # Example
    /// ```
    /// # use abcplay::AbcError;
    /// let err = AbcError::Parse {
    ///     line: 5,
    ///     column: 10,
    ///     message: "Unexpected character '&'".to_string(),
    /// };
    /// assert_eq!(err.to_string(), "Parse error at line 5, column 10: Unexpected character '&'");
    /// ```
    #[error("Parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// A context that must close on the same line was left open, or a part
    /// sequence references a section that does not exist.
    #[error("Structural error at line {line}: {message}")]
    Structural { line: usize, message: String },

    /// Invalid header field value (meter, unit length, tempo, key, voice).
    #[error("Invalid field at line {line}: {message}")]
    Metadata { line: usize, message: String },

    /// Repeat expansion did not converge.
    #[error("Repeat expansion limit of {limit} exceeded")]
    RepeatLimit { limit: usize },

    /// Every diagnostic collected while parsing a tune.
    #[error("{}", summarize(.0))]
    Diagnostics(Vec<AbcError>),
}

impl AbcError {
    /// Source line the error refers to, when it has one.
    pub fn line(&self) -> Option<usize> {
        match self {
            AbcError::Parse { line, .. }
            | AbcError::Structural { line, .. }
            | AbcError::Metadata { line, .. } => Some(*line),
            AbcError::RepeatLimit { .. } | AbcError::Diagnostics(_) => None,
        }
    }
}

fn summarize(errors: &[AbcError]) -> String {
    match errors.first() {
        None => "No errors".to_string(),
        Some(first) if errors.len() == 1 => first.to_string(),
        Some(first) => format!("{} ({} more)", first, errors.len() - 1),
    }
}

/// Reasons the playback scheduler refuses a request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Queue is full ({capacity} slots)")]
    QueueFull { capacity: usize },

    #[error("Tune has {count} unresolved error(s) and cannot be queued")]
    IncompleteTune { count: usize },

    #[error("Sound backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("No slot with id {0}")]
    UnknownSlot(u64),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Scheduler has shut down")]
    ShutDown,
}

/// Failure reported by a [`crate::playback::SoundBackend`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend rejected message: {0}")]
    Rejected(String),
}

/// Failure while talking to a remote player over the control channel.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("No greeting received from {addr}")]
    NoGreeting { addr: String },

    #[error("Timed out waiting for {addr}")]
    Timeout { addr: String },

    #[error("Could not start player process: {0}")]
    Launch(std::io::Error),

    #[error("Player reported error: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid or unreadable player configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config value: {0}")]
    Value(String),
}
