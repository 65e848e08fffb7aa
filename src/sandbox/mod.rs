//! Sandbox backends for OS-level filesystem confinement.
//!
//! Both backends consume the same [`SandboxConfig`]; the platform is picked
//! at compile time. macOS lowers the rules to an SBPL profile and hands
//! execution to `sandbox-exec`; Linux installs Landlock restrictions
//! in-process. Either way the launcher ends in an `exec` that replaces the
//! process image, so nothing of this crate survives a successful start.

pub mod landlock;
pub mod seatbelt;

use crate::rules::{ResolvedRule, RuleConflict};

/// Set in the environment before `exec` so the child and its descendants
/// can detect confinement.
pub const IN_CAGE_ENV: &str = "IN_CAGE";

/// Everything a backend needs to confine and launch the target.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    /// Disable all restrictions (debugging escape hatch).
    pub allow_all: bool,
    /// Allow writes to `~/Library/Keychains` (macOS only).
    pub allow_keychain: bool,
    /// Deny reads outside the explicit read allowlist.
    pub strict: bool,
    /// Resolved rules whose mode includes WRITE, sorted by path.
    pub write_rules: Vec<ResolvedRule>,
    /// Resolved rules whose mode includes READ, sorted by path.
    pub read_rules: Vec<ResolvedRule>,
    /// Conflicts settled during resolution, surfaced by dry-run.
    pub conflicts: Vec<RuleConflict>,
    /// Target command and arguments.
    pub command: String,
    pub args: Vec<String>,
}

/// Run the target under the platform backend. On success this never
/// returns: the process image has been replaced.
pub fn run(config: &SandboxConfig) -> crate::error::Result<std::convert::Infallible> {
    #[cfg(target_os = "macos")]
    {
        seatbelt::run_in_sandbox(config)
    }
    #[cfg(target_os = "linux")]
    {
        landlock::run_in_sandbox(config)
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = config;
        Err(crate::error::Error::Enforcement(
            "no sandbox backend for this platform".into(),
        ))
    }
}
