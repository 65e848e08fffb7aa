//! Error taxonomy for the launcher.
//!
//! Everything fatal funnels into [`Error`] and is printed by the binary as a
//! single `cage: …` line before a non-zero exit. Warnings about rules the
//! host mechanism cannot enforce are ordinary stderr output, not errors.

use crate::rules::RuleViolation;

/// Fatal launcher errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed configuration file or auto-preset declaration.
    #[error("error loading config: {0}")]
    Config(String),

    /// A preset name that neither the config file nor the builtin table knows.
    #[error("preset not found: {0}")]
    UnknownPreset(String),

    /// `extends` chain loops back on itself.
    #[error("circular preset dependency: {0}")]
    PresetCycle(String),

    /// Duplicate or conflicting rule inside a single preset.
    #[error(transparent)]
    Rule(#[from] RuleViolation),

    /// The enforcement helper is missing from PATH (macOS `sandbox-exec`).
    #[error("{0} not found on PATH")]
    BackendUnavailable(String),

    /// The target command is missing from PATH.
    #[error("command not found: {0}")]
    TargetNotFound(String),

    /// Landlock rejected the restriction before anything was executed.
    #[error("failed to apply Landlock restrictions: {0}")]
    Enforcement(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
