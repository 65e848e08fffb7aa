//! cage: run commands under host-enforced filesystem confinement.
//!
//! Declarative allow/deny path rules from CLI flags and presets are merged
//! into a single conflict-resolved decision set, then lowered to a macOS
//! `sandbox-exec` profile or a Linux Landlock ruleset before the launcher
//! replaces itself with the target command.

pub mod config;
pub mod dryrun;
pub mod error;
pub mod gitdir;
pub mod launcher;
pub mod paths;
pub mod rules;
pub mod sandbox;

pub use config::{Config, Preset};
pub use error::{Error, Result};
pub use launcher::{build_sandbox_config, effective_presets, Invocation};
pub use rules::{
    AccessMode, Resolution, ResolvedRule, RuleAction, RuleConflict, RuleResolver, RuleSource,
};
pub use sandbox::{SandboxConfig, IN_CAGE_ENV};
