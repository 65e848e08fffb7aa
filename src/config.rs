//! Preset configuration.
//!
//! Presets are declarative data loaded from a YAML file, composed through
//! `extends` with set-union of paths and logical OR of booleans. A fixed
//! builtin table lives behind the reserved `builtin:` prefix. Auto-presets
//! map the target command's basename onto preset names.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Reserved name prefix for the builtin preset table.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Builtin preset names, without the prefix.
pub const BUILTIN_PRESETS: &[&str] = &[
    "secure",
    "strict-base",
    "secure-home",
    "npm",
    "cargo",
    "go",
    "java",
];

/// A path granted by a preset, optionally resolved through symlinks before
/// rule canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "AllowPathDecl")]
pub struct AllowPath {
    pub path: String,
    pub eval_symlinks: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AllowPathDecl {
    Plain(String),
    Full {
        path: String,
        #[serde(default, rename = "eval-symlinks")]
        eval_symlinks: bool,
    },
}

impl From<AllowPathDecl> for AllowPath {
    fn from(decl: AllowPathDecl) -> Self {
        match decl {
            AllowPathDecl::Plain(path) => AllowPath {
                path,
                eval_symlinks: false,
            },
            AllowPathDecl::Full {
                path,
                eval_symlinks,
            } => AllowPath {
                path,
                eval_symlinks,
            },
        }
    }
}

/// A path denied by a preset; `except` entries restore read-only access to
/// sub-paths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "DenyPathDecl")]
pub struct DenyPath {
    pub path: String,
    pub except: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DenyPathDecl {
    Plain(String),
    Full {
        path: String,
        #[serde(default)]
        except: Vec<String>,
    },
}

impl From<DenyPathDecl> for DenyPath {
    fn from(decl: DenyPathDecl) -> Self {
        match decl {
            DenyPathDecl::Plain(path) => DenyPath {
                path,
                except: Vec::new(),
            },
            DenyPathDecl::Full { path, except } => DenyPath { path, except },
        }
    }
}

/// A declarative preset, as written in the config file or the builtin table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Preset {
    pub extends: Vec<String>,
    pub skip_defaults: bool,
    pub strict: bool,
    pub allow: Vec<AllowPath>,
    pub read: Vec<AllowPath>,
    pub deny: Vec<DenyPath>,
    pub allow_keychain: bool,
    pub allow_git: bool,
}

impl Preset {
    /// Set-union of paths and OR of booleans. Deduplication is against the
    /// already-merged presets only, so a path declared twice inside one
    /// preset survives for validation to reject.
    fn merge(&mut self, other: &Preset) {
        let known: BTreeSet<&str> = self.allow.iter().map(|e| e.path.as_str()).collect();
        let fresh: Vec<AllowPath> = other
            .allow
            .iter()
            .filter(|e| !known.contains(e.path.as_str()))
            .cloned()
            .collect();
        self.allow.extend(fresh);

        let known: BTreeSet<&str> = self.read.iter().map(|e| e.path.as_str()).collect();
        let fresh: Vec<AllowPath> = other
            .read
            .iter()
            .filter(|e| !known.contains(e.path.as_str()))
            .cloned()
            .collect();
        self.read.extend(fresh);

        let known: BTreeSet<&str> = self.deny.iter().map(|e| e.path.as_str()).collect();
        let fresh: Vec<DenyPath> = other
            .deny
            .iter()
            .filter(|e| !known.contains(e.path.as_str()))
            .cloned()
            .collect();
        self.deny.extend(fresh);

        self.skip_defaults |= other.skip_defaults;
        self.strict |= other.strict;
        self.allow_keychain |= other.allow_keychain;
        self.allow_git |= other.allow_git;
    }

    /// Expand environment variables in every path and resolve symlinks for
    /// entries marked `eval-symlinks`.
    pub fn process(&self) -> Preset {
        let mut out = self.clone();
        for entry in out.allow.iter_mut().chain(out.read.iter_mut()) {
            entry.path = expand_env(&entry.path);
            if entry.eval_symlinks {
                entry.path = eval_symlinks(&entry.path);
            }
        }
        for deny in out.deny.iter_mut() {
            deny.path = expand_env(&deny.path);
            for except in deny.except.iter_mut() {
                *except = expand_env(except);
            }
        }
        out
    }
}

/// The `defaults:` section: presets applied to every invocation unless
/// skipped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub presets: Vec<String>,
}

/// One `auto-presets:` entry. Exactly one of `command` (exact basename) or
/// `command-pattern` (regex) must be present.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AutoPreset {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub command_pattern: Option<String>,
    #[serde(default)]
    pub presets: Vec<String>,
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Config {
    pub defaults: Defaults,
    pub presets: BTreeMap<String, Preset>,
    pub auto_presets: Vec<AutoPreset>,
}

impl Config {
    /// Load from `path`, or from the first discovered default location.
    /// No config file at all is fine and yields an empty config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(explicit) => Self::load_file(explicit),
            None => match discover_config_path() {
                Some(found) => Self::load_file(&found),
                None => Ok(Self::default()),
            },
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        Self::from_yaml(&text)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(text).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for name in self.presets.keys() {
            if name.starts_with(BUILTIN_PREFIX) {
                return Err(Error::Config(format!(
                    "preset name {name:?} uses the reserved '{BUILTIN_PREFIX}' prefix"
                )));
            }
        }
        for entry in &self.auto_presets {
            match (&entry.command, &entry.command_pattern) {
                (Some(_), Some(_)) => {
                    return Err(Error::Config(
                        "auto-preset entries take either 'command' or 'command-pattern', not both"
                            .into(),
                    ))
                }
                (None, None) => {
                    return Err(Error::Config(
                        "auto-preset entries need a 'command' or 'command-pattern'".into(),
                    ))
                }
                _ => {}
            }
            if let Some(pattern) = &entry.command_pattern {
                regex::Regex::new(pattern).map_err(|err| {
                    Error::Config(format!("invalid command-pattern {pattern:?}: {err}"))
                })?;
            }
        }
        Ok(())
    }

    /// Raw (unresolved) declaration for `name`, if it exists.
    pub fn get_preset(&self, name: &str) -> Option<Preset> {
        if let Some(builtin) = name.strip_prefix(BUILTIN_PREFIX) {
            return builtin_preset(builtin);
        }
        self.presets.get(name).cloned()
    }

    /// Every known preset name, sorted: user presets plus the builtin table.
    pub fn list_presets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.presets.keys().cloned().collect();
        names.extend(
            BUILTIN_PRESETS
                .iter()
                .map(|name| format!("{BUILTIN_PREFIX}{name}")),
        );
        names.sort();
        names
    }

    /// Flatten `extends` depth-first, left-to-right. Paths are set-unioned,
    /// booleans ORed, cycles fatal, and a preset reached through several
    /// parents is merged once. The flattened preset carries no `extends`.
    pub fn resolve_preset(&self, name: &str) -> Result<Preset> {
        let mut visiting = Vec::new();
        let mut visited = BTreeSet::new();
        self.resolve_inner(name, &mut visiting, &mut visited)
    }

    fn resolve_inner(
        &self,
        name: &str,
        visiting: &mut Vec<String>,
        visited: &mut BTreeSet<String>,
    ) -> Result<Preset> {
        if visiting.iter().any(|seen| seen == name) {
            let mut chain = visiting.clone();
            chain.push(name.to_string());
            return Err(Error::PresetCycle(chain.join(" -> ")));
        }

        let declared = self
            .get_preset(name)
            .ok_or_else(|| Error::UnknownPreset(name.to_string()))?;

        visiting.push(name.to_string());
        let mut flat = Preset::default();
        for parent in &declared.extends {
            if !visited.insert(parent.clone()) {
                continue;
            }
            let resolved = self.resolve_inner(parent, visiting, visited)?;
            flat.merge(&resolved);
        }
        visiting.pop();

        flat.merge(&declared);
        flat.extends = Vec::new();
        Ok(flat)
    }

    /// Preset names contributed by the first auto-preset entry matching the
    /// basename of `command`.
    pub fn auto_presets_for(&self, command: &str) -> Result<Vec<String>> {
        let basename = Path::new(command)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| command.to_string());

        for entry in &self.auto_presets {
            if let Some(exact) = &entry.command {
                if *exact == basename {
                    return Ok(entry.presets.clone());
                }
            } else if let Some(pattern) = &entry.command_pattern {
                let re = regex::Regex::new(pattern).map_err(|err| {
                    Error::Config(format!("invalid command-pattern {pattern:?}: {err}"))
                })?;
                if re.is_match(&basename) {
                    return Ok(entry.presets.clone());
                }
            }
        }
        Ok(Vec::new())
    }
}

/// Default config file candidates, most specific first.
fn config_path_candidates(xdg_config_home: Option<&str>, home: Option<&str>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(xdg) = xdg_config_home {
        if !xdg.is_empty() {
            candidates.push(Path::new(xdg).join("cage").join("presets.yaml"));
        }
    }
    if let Some(home) = home {
        let base = Path::new(home).join(".config").join("cage");
        candidates.push(base.join("presets.yaml"));
        candidates.push(base.join("presets.yml"));
    }
    candidates
}

fn discover_config_path() -> Option<PathBuf> {
    let xdg = env::var("XDG_CONFIG_HOME").ok();
    let home = env::var("HOME").ok();
    config_path_candidates(xdg.as_deref(), home.as_deref())
        .into_iter()
        .find(|candidate| candidate.is_file())
}

/// `$VAR` / `${VAR}` expansion against the process environment. A variable
/// that is not set stays in the string literally.
pub fn expand_env(input: &str) -> String {
    shellexpand::env_with_context_no_errors(input, |var| env::var(var).ok()).into_owned()
}

/// Resolve a path through symlinks. Paths that do not exist (yet) are kept
/// as-is so they can still flow into rules.
fn eval_symlinks(path: &str) -> String {
    match fs::canonicalize(path) {
        Ok(resolved) => resolved.to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

fn allow_paths(paths: &[&str]) -> Vec<AllowPath> {
    paths
        .iter()
        .map(|path| AllowPath {
            path: path.to_string(),
            eval_symlinks: false,
        })
        .collect()
}

fn deny_paths(paths: &[&str]) -> Vec<DenyPath> {
    paths
        .iter()
        .map(|path| DenyPath {
            path: path.to_string(),
            except: Vec::new(),
        })
        .collect()
}

/// The fixed builtin preset table. Presets are data, composed like any
/// user preset.
fn builtin_preset(name: &str) -> Option<Preset> {
    let preset = match name {
        // Deny the usual credential directories outright.
        "secure" => Preset {
            deny: deny_paths(&[
                "$HOME/.ssh",
                "$HOME/.aws",
                "$HOME/.gnupg",
                "$HOME/.kube",
                "$HOME/.docker",
                "$HOME/.netrc",
                "$HOME/.npmrc",
            ]),
            ..Preset::default()
        },
        // The read allowlist a dynamically linked process needs to start.
        "strict-base" => Preset {
            strict: true,
            read: allow_paths(&[
                "/bin",
                "/dev",
                "/etc",
                "/lib",
                "/lib64",
                "/opt",
                "/private",
                "/sbin",
                "/System",
                "/tmp",
                "/usr",
                "/var",
                "$PWD",
            ]),
            ..Preset::default()
        },
        // Hide the home directory; keep the working tree usable.
        "secure-home" => Preset {
            allow: allow_paths(&["$PWD"]),
            deny: vec![DenyPath {
                path: "$HOME".to_string(),
                except: vec!["$PWD".to_string()],
            }],
            ..Preset::default()
        },
        "npm" => Preset {
            extends: vec![format!("{BUILTIN_PREFIX}secure")],
            allow: allow_paths(&["$PWD", "$HOME/.npm"]),
            ..Preset::default()
        },
        "cargo" => Preset {
            extends: vec![format!("{BUILTIN_PREFIX}secure")],
            allow: allow_paths(&["$PWD", "$HOME/.cargo/registry", "$HOME/.cargo/git"]),
            ..Preset::default()
        },
        "go" => Preset {
            extends: vec![format!("{BUILTIN_PREFIX}secure")],
            allow: allow_paths(&["$PWD", "$HOME/go/pkg", "$HOME/.cache/go-build"]),
            ..Preset::default()
        },
        "java" => Preset {
            extends: vec![format!("{BUILTIN_PREFIX}secure")],
            allow: allow_paths(&["$PWD", "$HOME/.m2/repository", "$HOME/.gradle/caches"]),
            ..Preset::default()
        },
        _ => return None,
    };
    Some(preset)
}

/// Deduplicate by path (first occurrence wins) and sort for display.
fn sorted_paths<T: Clone>(entries: &[T], path_of: impl Fn(&T) -> &str) -> Vec<T> {
    let mut seen = BTreeSet::new();
    let mut unique: Vec<T> = entries
        .iter()
        .filter(|entry| seen.insert(path_of(entry).to_string()))
        .cloned()
        .collect();
    unique.sort_by(|a, b| path_of(a).cmp(path_of(b)));
    unique
}

/// Human-readable rendering for `--show-preset` with `-o text`.
pub fn render_preset_text(name: &str, preset: &Preset, extends_chain: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Preset: {name}");
    let _ = writeln!(out, "========================================");

    if !extends_chain.is_empty() {
        let _ = writeln!(out, "Extends: {}", extends_chain.join(" → "));
        let _ = writeln!(out);
    }

    if !preset.extends.is_empty() {
        let _ = writeln!(out, "extends:");
        for parent in &preset.extends {
            let _ = writeln!(out, "  - {parent}");
        }
    }

    if preset.allow_git {
        let _ = writeln!(out, "allow-git: true");
    }
    if preset.allow_keychain {
        let _ = writeln!(out, "allow-keychain: true");
    }
    if preset.skip_defaults {
        let _ = writeln!(out, "skip-defaults: true");
    }
    if preset.strict {
        let _ = writeln!(out, "strict: true");
    }

    if !preset.allow.is_empty() {
        let _ = writeln!(out, "\nallow (write paths):");
        for entry in sorted_paths(&preset.allow, |e| &e.path) {
            let _ = writeln!(out, "  - {}", entry.path);
        }
    }

    if !preset.read.is_empty() {
        let _ = writeln!(out, "\nread (read-only paths):");
        for entry in sorted_paths(&preset.read, |e| &e.path) {
            let _ = writeln!(out, "  - {}", entry.path);
        }
    }

    if !preset.deny.is_empty() {
        let _ = writeln!(out, "\ndeny (read+write, except restores read-only):");
        for entry in sorted_paths(&preset.deny, |e| &e.path) {
            let _ = writeln!(out, "  - {}", entry.path);
            for except in &entry.except {
                let _ = writeln!(out, "    except: {except}");
            }
        }
    }

    out
}

/// Config-schema YAML rendering for `--show-preset` with `-o yaml` or `raw`.
pub fn render_preset_yaml(name: &str, preset: &Preset, extends_chain: &[String]) -> String {
    let key = name.strip_prefix(BUILTIN_PREFIX).unwrap_or(name);
    let mut out = String::new();

    if !extends_chain.is_empty() {
        let _ = writeln!(out, "# Extends: {}", extends_chain.join(" → "));
    }
    let _ = writeln!(out, "presets:");
    let _ = writeln!(out, "  {key}:");

    if !preset.extends.is_empty() {
        let _ = writeln!(out, "    extends:");
        for parent in &preset.extends {
            let _ = writeln!(out, "      - {parent:?}");
        }
    }

    if preset.allow_git {
        let _ = writeln!(out, "    allow-git: true");
    }
    if preset.allow_keychain {
        let _ = writeln!(out, "    allow-keychain: true");
    }
    if preset.skip_defaults {
        let _ = writeln!(out, "    skip-defaults: true");
    }
    if preset.strict {
        let _ = writeln!(out, "    strict: true");
    }

    for (section, entries) in [("allow", &preset.allow), ("read", &preset.read)] {
        if entries.is_empty() {
            continue;
        }
        let _ = writeln!(out, "    {section}:");
        for entry in sorted_paths(entries, |e| &e.path) {
            if entry.eval_symlinks {
                let _ = writeln!(out, "      - path: {:?}", entry.path);
                let _ = writeln!(out, "        eval-symlinks: true");
            } else {
                let _ = writeln!(out, "      - {:?}", entry.path);
            }
        }
    }

    if !preset.deny.is_empty() {
        let _ = writeln!(out, "    deny:");
        for entry in sorted_paths(&preset.deny, |e| &e.path) {
            if entry.except.is_empty() {
                let _ = writeln!(out, "      - {:?}", entry.path);
            } else {
                let _ = writeln!(out, "      - path: {:?}", entry.path);
                let _ = writeln!(out, "        except:");
                for except in &entry.except {
                    let _ = writeln!(out, "          - {except:?}");
                }
            }
        }
    }

    out
}
