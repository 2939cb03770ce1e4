//! CLI error types with miette diagnostics.
//!
//! Maps engine and config errors into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use zigmesh_config::ConfigError;
use zigmesh_core::EngineError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(zigmesh::not_found),
        help("Run: zigmesh {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{identifier} matches {count} devices")]
    #[diagnostic(
        code(zigmesh::ambiguous),
        help("Use the short address instead.")
    )]
    Ambiguous { identifier: String, count: usize },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(zigmesh::validation))]
    Validation { field: String, reason: String },

    // ── Snapshot ─────────────────────────────────────────────────────

    #[error("No snapshot file given")]
    #[diagnostic(
        code(zigmesh::no_snapshot),
        help(
            "Pass --file <path>, or set engine.persistence_path in {config_path}"
        )
    )]
    NoSnapshot { config_path: String },

    #[error("Could not read snapshot {path}")]
    #[diagnostic(code(zigmesh::snapshot))]
    Snapshot {
        path: String,
        #[source]
        source: EngineError,
    },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(zigmesh::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(zigmesh::config))]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(code(zigmesh::engine))]
    Engine(EngineError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(zigmesh::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } | Self::NoSnapshot { .. } => exit_code::NOT_FOUND,
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::Validation { .. }
            | Self::Ambiguous { .. }
            | Self::Config(ConfigError::Validation { .. }) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── EngineError → CliError mapping ───────────────────────────────────

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidRange { field, reason } => Self::Validation { field, reason },
            EngineError::NotFound { what } => Self::NotFound {
                resource_type: "entry".into(),
                identifier: what,
                list_command: "snapshot devices".into(),
            },
            other => Self::Engine(other),
        }
    }
}
