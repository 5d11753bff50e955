//! Typed error enums for catalog loading and request handling.
//!
//! The `Display` text of every request-side variant is exactly the message
//! sent to the client in an `error` event.

use thiserror::Error;

use crate::types::ArgType;

// ── Catalog errors ────────────────────────────────────────────────────────────

/// Errors raised while loading the configuration document.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration must be a JSON object")]
    NotAnObject,

    #[error("invalid definition for command \"{command}\": {source}")]
    InvalidCommand {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("command \"{0}\" has an empty script")]
    EmptyScript(String),

    #[error("command \"{command}\" declares argument \"{arg}\" more than once")]
    DuplicateArgument { command: String, arg: String },

    #[error("command \"{command}\", argument \"{arg}\": invalid regex: {source}")]
    InvalidPattern {
        command: String,
        arg: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid \"terminal_eye\" section: {0}")]
    InvalidSettings(#[source] serde_json::Error),
}

// ── Validation errors ─────────────────────────────────────────────────────────

/// What a type-mismatched argument was expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Type(ArgType),
    /// Untyped argument that received a non-primitive value.
    Primitive,
}

impl std::fmt::Display for Expected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expected::Type(t) => t.fmt(f),
            Expected::Primitive => f.write_str("primitive"),
        }
    }
}

/// Failure of the schema validator for one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required argument \"{0}\" is missing.")]
    MissingArgument(String),

    #[error("Invalid type of argument \"{arg}\". Expecting \"{expected}\" got \"{actual}\".")]
    TypeMismatch {
        arg: String,
        expected: Expected,
        actual: &'static str,
    },

    #[error("Invalid argument \"{0}\". RegExp match failed.")]
    PatternMismatch(String),

    /// Broken catalog entry rather than a bad client request.
    #[error("Invalid configuration. Argument [{index}] must have a name.")]
    UnnamedArgument { index: usize },
}

impl ValidationError {
    /// Whether this failure points at the deployment, not the client.
    #[must_use]
    pub fn is_configuration_defect(&self) -> bool {
        matches!(self, ValidationError::UnnamedArgument { .. })
    }
}

// ── Request errors ────────────────────────────────────────────────────────────

/// Every way a single command request can end in an `error` terminal event.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Invalid arguments received. Valid JSON string expected.")]
    MalformedPayload,

    #[error("Command not specified.")]
    MissingCommand,

    #[error("Unknown command \"{0}\".")]
    UnknownCommand(String),

    #[error("Command \"{0}\" is still running.")]
    Busy(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Error executing \"{command}\"")]
    SpawnFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error executing \"{command}\". Exit code: {code}")]
    NonZeroExit { command: String, code: i32 },

    /// Killed by a signal; the exit code is reported as `null`.
    #[error("Error executing \"{command}\". Exit code: null (signal {signal})")]
    Signaled { command: String, signal: i32 },
}
