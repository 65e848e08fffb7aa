//! Dry-run formatter.
//!
//! Prints a structured summary of the resolved rules followed by the raw
//! artifact the backend would enforce. The artifact comes from the same
//! synthesis routines the backends use, so summary and artifact cannot
//! drift apart.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::rules::{ResolvedRule, RuleAction, RuleConflict};
use crate::sandbox::{landlock, seatbelt, SandboxConfig};

/// Print the dry-run report for the compile-time platform to stdout.
pub fn print(config: &SandboxConfig) {
    print!("{}", render(config));
}

/// Render the report for the compile-time platform.
pub fn render(config: &SandboxConfig) -> String {
    #[cfg(target_os = "linux")]
    {
        render_landlock(config)
    }
    #[cfg(not(target_os = "linux"))]
    {
        render_seatbelt(config)
    }
}

/// Deny rules across both sequences, shown once per `(path, mode)` even
/// when a READ|WRITE deny sits in both.
fn unique_denies(config: &SandboxConfig) -> Vec<&ResolvedRule> {
    let mut seen = HashSet::new();
    config
        .write_rules
        .iter()
        .chain(config.read_rules.iter())
        .filter(|rule| rule.action == RuleAction::Deny)
        .filter(|rule| seen.insert((rule.path.as_str(), rule.mode)))
        .collect()
}

fn write_conflicts(out: &mut String, conflicts: &[RuleConflict]) {
    if conflicts.is_empty() {
        return;
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Rule Conflicts:");
    let _ = writeln!(out, "----------------------------------------");
    for conflict in conflicts {
        let kind = if conflict.same_preset {
            "Intra-preset"
        } else {
            "Cross-preset"
        };
        let _ = writeln!(out, "{kind} conflict for path: {}", conflict.path);
        let _ = writeln!(out, "  Conflicting rules:");
        for rule in &conflict.rules {
            let action = match rule.action {
                RuleAction::Allow => "allow",
                RuleAction::Deny => "deny",
            };
            let _ = writeln!(
                out,
                "    - {action} {} ({}) from {}",
                rule.path,
                rule.mode.label(),
                rule.source
            );
        }
        let action = match conflict.resolution.action {
            RuleAction::Allow => "allow",
            RuleAction::Deny => "deny",
        };
        let _ = writeln!(
            out,
            "  Resolution: {action} from {} (CLI > preset, allow > deny, specific > general)",
            conflict.resolution.source
        );
        let _ = writeln!(out);
    }
}

fn write_deny_summary(out: &mut String, config: &SandboxConfig) {
    let denies = unique_denies(config);
    if denies.is_empty() {
        return;
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "- Deny rules:");
    for rule in denies {
        let glob_note = if rule.is_glob { " (glob pattern)" } else { "" };
        let _ = writeln!(
            out,
            "  * {} ({}){glob_note} - from {}",
            rule.path,
            rule.mode.label(),
            rule.source
        );
        for except in &rule.except {
            let _ = writeln!(out, "    except: {except}");
        }
    }
}

fn write_command(out: &mut String, config: &SandboxConfig) {
    let _ = writeln!(out);
    let _ = write!(out, "Command: {}", config.command);
    if !config.args.is_empty() {
        let _ = write!(out, " {}", config.args.join(" "));
    }
    let _ = writeln!(out);
}

/// macOS report: summary plus the SBPL profile text.
pub fn render_seatbelt(config: &SandboxConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Sandbox Profile (dry-run):");
    let _ = writeln!(out, "========================================");
    let _ = writeln!(out, "Version: macOS Sandbox v1");
    let _ = writeln!(out, "Base profile: system.sb");
    let _ = writeln!(out);
    let _ = writeln!(out, "Rules:");

    if config.allow_all {
        let _ = writeln!(out, "- Allow all operations (--allow-all flag)");
    } else {
        let _ = writeln!(out, "- Allow all operations by default");
        let _ = writeln!(out, "- Deny all file writes");
        let _ = writeln!(out, "- Allow writes to:");
        let _ = writeln!(out, "  * System temporary directories");
        if config.allow_keychain {
            let _ = writeln!(out, "  * Keychain directories (--allow-keychain)");
        }
        for rule in &config.write_rules {
            if rule.action == RuleAction::Allow {
                let _ = writeln!(out, "  * {} ({})", rule.path, rule.source);
            }
        }

        if config.strict {
            let _ = writeln!(out);
            let _ = writeln!(out, "- STRICT MODE: Deny all file reads by default");
            let _ = writeln!(out, "- Allow reads to:");
            for rule in &config.read_rules {
                if rule.action == RuleAction::Allow {
                    let _ = writeln!(out, "  * {} ({})", rule.path, rule.source);
                }
            }
        }

        write_deny_summary(&mut out, config);
    }

    write_conflicts(&mut out, &config.conflicts);

    let _ = writeln!(out);
    let _ = writeln!(out, "Raw profile:");
    let _ = writeln!(out, "----------------------------------------");
    out.push_str(&seatbelt::generate_profile(config));
    let _ = writeln!(out, "----------------------------------------");

    write_command(&mut out, config);
    out
}

/// Linux report: summary plus the planned Landlock grants.
pub fn render_landlock(config: &SandboxConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Sandbox Profile (dry-run):");
    let _ = writeln!(out, "========================================");
    let _ = writeln!(out, "Platform: Linux");
    let _ = writeln!(out, "Technology: Landlock LSM");
    let _ = writeln!(out);
    let _ = writeln!(out, "The following restrictions would be applied:");
    let _ = writeln!(out);
    let _ = writeln!(out, "Rules:");

    let plan = landlock::plan(config);

    if config.allow_all {
        let _ = writeln!(out, "- Allow all operations (--allow-all flag)");
    } else {
        if config.strict {
            let _ = writeln!(out, "- STRICT MODE: Only explicit read paths are allowed");
            let _ = writeln!(out, "- Allow read access to:");
            for rule in &config.read_rules {
                if rule.action == RuleAction::Allow {
                    let _ = writeln!(out, "  * {} ({})", rule.path, rule.source);
                }
            }
        } else {
            let _ = writeln!(out, "- Allow read access to all files");
        }

        let _ = writeln!(out, "- Deny write access except to:");
        let _ = writeln!(out, "  * /dev/null (for discarding output)");
        for rule in &config.write_rules {
            if rule.action == RuleAction::Allow {
                let _ = writeln!(out, "  * {} ({})", rule.path, rule.source);
            }
        }

        let denies = unique_denies(config);
        if !denies.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "- Deny rules:");
            for rule in denies {
                let note = if rule.mode.allows_read() {
                    if rule.is_glob {
                        " (WARNING: glob patterns not supported on Linux)"
                    } else if !config.strict {
                        " (WARNING: read deny only effective with --strict on Linux)"
                    } else {
                        ""
                    }
                } else {
                    ""
                };
                let _ = writeln!(
                    out,
                    "  * {} ({}){note}",
                    rule.path,
                    rule.mode.label()
                );
                for except in &rule.except {
                    let _ = writeln!(out, "    except: {except}");
                }
            }
        }
    }

    write_conflicts(&mut out, &config.conflicts);

    let _ = writeln!(out);
    let _ = writeln!(out, "Landlock rules:");
    let _ = writeln!(out, "----------------------------------------");
    out.push_str(&landlock::describe(&plan));
    let _ = writeln!(out, "----------------------------------------");

    write_command(&mut out, config);
    out
}
