//! Rule model and resolver.
//!
//! Rules arrive from CLI flags and presets, get keyed by `(path, mode)`,
//! and leave as two sorted sequences (write rules, read rules) plus a
//! conflict report. A deny with an allow nested strictly inside it is a
//! carve-out, not a conflict.

use std::collections::BTreeMap;
use std::fmt;

use crate::paths;

/// File access being granted or revoked, as a read/write bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn allows_read(self) -> bool {
        !matches!(self, AccessMode::Write)
    }

    pub fn allows_write(self) -> bool {
        !matches!(self, AccessMode::Read)
    }

    /// Label used in diagnostics and dry-run output.
    pub fn label(self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::ReadWrite => "read+write",
        }
    }
}

/// Whether a rule grants or revokes access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Allow,
    Deny,
}

/// Where a rule came from; drives precedence and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
    Cli,
    Preset(String),
}

impl RuleSource {
    pub fn is_cli(&self) -> bool {
        matches!(self, RuleSource::Cli)
    }

    pub fn preset_name(&self) -> Option<&str> {
        match self {
            RuleSource::Cli => None,
            RuleSource::Preset(name) => Some(name),
        }
    }
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSource::Cli => f.write_str("CLI flag"),
            RuleSource::Preset(name) => f.write_str(name),
        }
    }
}

/// A single file access rule that survived conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRule {
    /// Absolute, lexically clean path or glob pattern.
    pub path: String,
    pub mode: AccessMode,
    pub action: RuleAction,
    pub source: RuleSource,
    /// Set iff the raw pattern contained `*`.
    pub is_glob: bool,
    /// Read-only carve-outs; only meaningful on deny rules.
    pub except: Vec<String>,
}

/// Rules that contended for one `(path, mode)` key, and the winner.
#[derive(Debug, Clone)]
pub struct RuleConflict {
    pub path: String,
    pub rules: Vec<ResolvedRule>,
    pub resolution: ResolvedRule,
    /// True when every contender came from the same preset.
    pub same_preset: bool,
}

/// Duplicate or conflicting declarations inside a single preset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleViolation {
    #[error("duplicate rule for {path} ({}) in preset '{preset}'", mode.label())]
    Duplicate {
        path: String,
        mode: AccessMode,
        preset: String,
    },
    #[error("conflicting actions for {path} ({}) in preset '{preset}'", mode.label())]
    Conflict {
        path: String,
        mode: AccessMode,
        preset: String,
    },
}

/// Output of [`RuleResolver::resolve`]: mode-partitioned winners plus the
/// conflicts that were settled along the way.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub write_rules: Vec<ResolvedRule>,
    pub read_rules: Vec<ResolvedRule>,
    pub conflicts: Vec<RuleConflict>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RuleKey {
    path: String,
    mode: AccessMode,
}

/// Accumulates raw rules keyed by `(path, mode)` and resolves them with a
/// fixed precedence: CLI beats preset, allow beats deny, longer path wins.
#[derive(Debug, Default)]
pub struct RuleResolver {
    rules: BTreeMap<RuleKey, Vec<ResolvedRule>>,
}

impl RuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant write access to `path`.
    pub fn add_allow(&mut self, path: &str, source: RuleSource) {
        self.insert(ResolvedRule {
            path: paths::canonicalize(path),
            mode: AccessMode::Write,
            action: RuleAction::Allow,
            source,
            is_glob: path.contains('*'),
            except: Vec::new(),
        });
    }

    /// Grant read access to `path`; only consulted in strict mode.
    pub fn add_read(&mut self, path: &str, source: RuleSource) {
        self.insert(ResolvedRule {
            path: paths::canonicalize(path),
            mode: AccessMode::Read,
            action: RuleAction::Allow,
            source,
            is_glob: path.contains('*'),
            except: Vec::new(),
        });
    }

    /// Deny read and write access to `path`. `except` entries restore read
    /// access to sub-paths; entries outside the denied path are dropped.
    pub fn add_deny(&mut self, path: &str, except: &[String], source: RuleSource) {
        let denied = paths::canonicalize(path);
        let except = except
            .iter()
            .map(|entry| paths::canonicalize(entry))
            .filter(|entry| paths::contains(&denied, entry))
            .collect();
        self.insert(ResolvedRule {
            path: denied,
            mode: AccessMode::ReadWrite,
            action: RuleAction::Deny,
            source,
            is_glob: path.contains('*'),
            except,
        });
    }

    fn insert(&mut self, rule: ResolvedRule) {
        let key = RuleKey {
            path: rule.path.clone(),
            mode: rule.mode,
        };
        self.rules.entry(key).or_default().push(rule);
    }

    /// Check a single preset for internal duplicates and conflicts.
    pub fn validate_preset(&self, preset: &str) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for (key, rules) in &self.rules {
            let owned: Vec<&ResolvedRule> = rules
                .iter()
                .filter(|rule| rule.source.preset_name() == Some(preset))
                .collect();
            for (i, rule1) in owned.iter().enumerate() {
                for rule2 in &owned[i + 1..] {
                    if rule1.action == rule2.action {
                        violations.push(RuleViolation::Duplicate {
                            path: key.path.clone(),
                            mode: key.mode,
                            preset: preset.to_string(),
                        });
                    } else if !is_carve_out(rule1, rule2) {
                        violations.push(RuleViolation::Conflict {
                            path: key.path.clone(),
                            mode: key.mode,
                            preset: preset.to_string(),
                        });
                    }
                }
            }
        }
        violations
    }

    /// Resolve every key, settle conflicts, and partition winners by mode.
    ///
    /// A READ|WRITE rule lands in both output sequences under its single
    /// key, so neither sequence ever holds the same `(path, mode)` twice.
    pub fn resolve(&self) -> Resolution {
        let mut resolution = Resolution::default();

        for (key, rules) in &self.rules {
            let winner = if rules.len() == 1 {
                rules[0].clone()
            } else {
                let winner = pick_winner(rules);
                if has_real_conflict(rules) {
                    let first = rules[0].source.preset_name();
                    let same_preset = rules
                        .iter()
                        .all(|rule| rule.source.preset_name() == first);
                    resolution.conflicts.push(RuleConflict {
                        path: key.path.clone(),
                        rules: rules.clone(),
                        resolution: winner.clone(),
                        same_preset,
                    });
                }
                winner
            };

            if key.mode.allows_write() {
                resolution.write_rules.push(winner.clone());
            }
            if key.mode.allows_read() {
                resolution.read_rules.push(winner);
            }
        }

        resolution.write_rules.sort_by(|a, b| a.path.cmp(&b.path));
        resolution.read_rules.sort_by(|a, b| a.path.cmp(&b.path));
        resolution
    }
}

/// Pick the highest-precedence rule: CLI over preset, then allow over deny,
/// then the lexically longer (more specific) path.
fn pick_winner(rules: &[ResolvedRule]) -> ResolvedRule {
    let mut ordered: Vec<&ResolvedRule> = rules.iter().collect();
    ordered.sort_by(|a, b| {
        b.source
            .is_cli()
            .cmp(&a.source.is_cli())
            .then_with(|| {
                let a_allows = a.action == RuleAction::Allow;
                let b_allows = b.action == RuleAction::Allow;
                b_allows.cmp(&a_allows)
            })
            .then_with(|| b.path.len().cmp(&a.path.len()))
    });
    ordered[0].clone()
}

fn has_real_conflict(rules: &[ResolvedRule]) -> bool {
    for (i, rule1) in rules.iter().enumerate() {
        for rule2 in &rules[i + 1..] {
            if rule1.action != rule2.action && !is_carve_out(rule1, rule2) {
                return true;
            }
        }
    }
    false
}

/// True iff one rule denies a path and the other allows a path strictly
/// inside it. Same-path opposite actions are an authoring mistake, never a
/// carve-out.
pub fn is_carve_out(rule1: &ResolvedRule, rule2: &ResolvedRule) -> bool {
    match (rule1.action, rule2.action) {
        (RuleAction::Deny, RuleAction::Allow) => paths::contains(&rule1.path, &rule2.path),
        (RuleAction::Allow, RuleAction::Deny) => paths::contains(&rule2.path, &rule1.path),
        _ => false,
    }
}
