//! Linux Landlock backend.
//!
//! Landlock is allowlist-only: the kernel grants rights to paths and a deny
//! cannot punch a hole in an already-allowed parent. Planning therefore
//! synthesizes a strictly additive allowlist; denies the LSM cannot
//! represent become stderr warnings, and write allows nested under a
//! literal write deny are dropped with a diagnostic.
//!
//! Deny `except` entries restore read only, as on macOS. Outside strict
//! mode everything is readable by default here, so exceptions have no
//! observable effect on Linux.

use std::fmt::Write as _;
use std::fs;

use crate::paths;
use crate::rules::RuleAction;
use crate::sandbox::SandboxConfig;

/// One planned Landlock grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRule {
    pub path: String,
    pub write: bool,
    pub is_dir: bool,
    /// Renames and links across directories; directories outside /dev.
    pub refer: bool,
    /// Device ioctls, for /dev and descendants.
    pub ioctl_dev: bool,
}

/// The additive allowlist plus its diagnostics, computed before any
/// enforcement. Dry-run renders exactly this plan.
#[derive(Debug, Clone, Default)]
pub struct LandlockPlan {
    pub rules: Vec<PlannedRule>,
    /// Unenforceable denies; printed to stderr, never fatal.
    pub warnings: Vec<String>,
    /// Write allows dropped because a deny covers them.
    pub notes: Vec<String>,
}

impl LandlockPlan {
    /// Read-only grant for an existing path; missing paths are skipped
    /// silently.
    fn push_read(&mut self, path: &str) {
        let Ok(meta) = fs::metadata(path) else {
            return;
        };
        self.rules.push(PlannedRule {
            path: path.to_string(),
            write: false,
            is_dir: meta.is_dir(),
            refer: false,
            ioctl_dev: false,
        });
    }
}

/// Compute the Landlock plan for `config`. Pure apart from `stat`, so the
/// dry-run formatter and the enforcement path share it.
pub fn plan(config: &SandboxConfig) -> LandlockPlan {
    let mut plan = LandlockPlan::default();
    if config.allow_all {
        return plan;
    }

    if config.strict {
        for rule in config.read_rules.iter().chain(config.write_rules.iter()) {
            if rule.action == RuleAction::Allow {
                plan.push_read(&rule.path);
            }
        }
    } else {
        plan.push_read("/");
    }

    // Denies the allowlist model cannot express. A READ|WRITE deny sits in
    // both resolved sequences; warn once per (path, mode).
    let mut warned = std::collections::HashSet::new();
    for rule in config.write_rules.iter().chain(config.read_rules.iter()) {
        if rule.action != RuleAction::Deny {
            continue;
        }
        if !warned.insert((rule.path.clone(), rule.mode)) {
            continue;
        }
        if rule.is_glob {
            plan.warnings.push(format!(
                "glob pattern {:?} cannot be enforced on Linux (Landlock requires literal paths); pattern will be ignored",
                rule.path
            ));
        } else if rule.mode.allows_read() && !config.strict {
            plan.warnings.push(format!(
                "read deny {:?} cannot be enforced on Linux (Landlock is allowlist-only); use --strict for read protection",
                rule.path
            ));
        }
    }

    // The child always gets somewhere to discard output.
    if fs::metadata("/dev/null").is_ok() {
        plan.rules.push(PlannedRule {
            path: "/dev/null".to_string(),
            write: true,
            is_dir: false,
            refer: false,
            ioctl_dev: false,
        });
    }

    let deny_set: Vec<&str> = config
        .write_rules
        .iter()
        .filter(|rule| rule.action == RuleAction::Deny && !rule.is_glob)
        .map(|rule| rule.path.as_str())
        .collect();
    let denied = |path: &str| {
        deny_set
            .iter()
            .any(|deny| *deny == path || paths::contains(deny, path))
    };

    for rule in &config.write_rules {
        if rule.action != RuleAction::Allow {
            continue;
        }
        if denied(&rule.path) {
            plan.notes.push(format!(
                "skipping write allow for {} (matches deny rule)",
                rule.path
            ));
            continue;
        }
        let Ok(meta) = fs::metadata(&rule.path) else {
            continue;
        };
        let under_dev = rule.path == "/dev" || rule.path.starts_with("/dev/");
        plan.rules.push(PlannedRule {
            path: rule.path.clone(),
            write: true,
            is_dir: meta.is_dir(),
            refer: meta.is_dir() && !under_dev,
            ioctl_dev: under_dev,
        });
    }

    plan
}

/// Human-readable descriptors for the planned grants; the Linux dry-run
/// artifact.
pub fn describe(plan: &LandlockPlan) -> String {
    let mut out = String::new();
    for rule in &plan.rules {
        let kind = if rule.is_dir { "dir " } else { "file" };
        let mut rights = String::from(if rule.write { "read+write" } else { "read-only" });
        if rule.refer {
            rights.push_str("+refer");
        }
        if rule.ioctl_dev {
            rights.push_str("+ioctl_dev");
        }
        let _ = writeln!(out, "{kind} {rights:<20} {}", rule.path);
    }
    out
}

/// Install the planned rules on the current process. Uses the best-effort
/// compatibility path so kernels without Landlock degrade to a warning
/// instead of aborting; an outright rejection is fatal.
#[cfg(target_os = "linux")]
pub fn apply(plan: &LandlockPlan) -> crate::error::Result<()> {
    use landlock::{
        path_beneath_rules, Access, AccessFs, CompatLevel, Compatible, Ruleset, RulesetAttr,
        RulesetCreatedAttr, RulesetStatus, ABI,
    };

    use crate::error::Error;

    let abi = ABI::V5;
    let mut ruleset = Ruleset::default()
        .set_compatibility(CompatLevel::BestEffort)
        .handle_access(AccessFs::from_all(abi))
        .map_err(|err| Error::Enforcement(err.to_string()))?
        .create()
        .map_err(|err| Error::Enforcement(err.to_string()))?
        .set_no_new_privs(true);

    for rule in &plan.rules {
        let mut access = if rule.write {
            AccessFs::from_read(abi) | AccessFs::from_write(abi)
        } else {
            AccessFs::from_read(abi)
        };
        if rule.refer {
            access |= AccessFs::Refer;
        }
        if rule.ioctl_dev {
            access |= AccessFs::IoctlDev;
        }
        ruleset = ruleset
            .add_rules(path_beneath_rules(&[rule.path.as_str()], access))
            .map_err(|err| Error::Enforcement(err.to_string()))?;
    }

    let status = ruleset
        .restrict_self()
        .map_err(|err| Error::Enforcement(err.to_string()))?;

    match status.ruleset {
        RulesetStatus::FullyEnforced => {
            tracing::debug!("Landlock restrictions fully enforced");
        }
        RulesetStatus::PartiallyEnforced => {
            eprintln!("cage: warning: Landlock only partially enforced (older kernel ABI)");
        }
        RulesetStatus::NotEnforced => {
            eprintln!(
                "cage: warning: Landlock not supported by this kernel; running without filesystem confinement"
            );
        }
    }
    Ok(())
}

/// Apply the plan and replace this process with the target command.
#[cfg(target_os = "linux")]
pub fn run_in_sandbox(
    config: &SandboxConfig,
) -> crate::error::Result<std::convert::Infallible> {
    if config.allow_all {
        return exec_target(config);
    }

    let plan = plan(config);
    for warning in &plan.warnings {
        eprintln!("cage: warning: {warning}");
    }
    for note in &plan.notes {
        eprintln!("cage: info: {note}");
    }
    apply(&plan)?;
    exec_target(config)
}

#[cfg(target_os = "linux")]
fn exec_target(config: &SandboxConfig) -> crate::error::Result<std::convert::Infallible> {
    use std::os::unix::process::CommandExt;

    use crate::error::Error;

    let target = which::which(&config.command)
        .map_err(|_| Error::TargetNotFound(config.command.clone()))?;
    let err = std::process::Command::new(target).args(&config.args).exec();
    Err(err.into())
}
