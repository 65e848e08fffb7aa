//! Launcher glue: compose flags, config file, and auto-presets into the
//! [`SandboxConfig`] handed to a backend or the dry-run formatter.

use crate::config::Config;
use crate::error::Result;
use crate::gitdir;
use crate::rules::{RuleResolver, RuleSource};
use crate::sandbox::SandboxConfig;

/// Flag values collected by the CLI. Mirrors the clap definition in the
/// binary without depending on it, so tests can drive the full pipeline.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub allow: Vec<String>,
    pub allow_read: Vec<String>,
    pub deny: Vec<String>,
    pub presets: Vec<String>,
    pub no_defaults: bool,
    pub strict: bool,
    pub allow_all: bool,
    pub allow_keychain: bool,
    pub allow_git: bool,
    pub command: String,
    pub args: Vec<String>,
}

/// The effective preset list: defaults (unless skipped), `--preset` flags,
/// then auto-preset matches, deduplicated keeping the first occurrence.
///
/// `skip-defaults: true` anywhere in the resolved chain of a listed preset
/// suppresses the defaults, as does `--no-defaults`.
pub fn effective_presets(config: &Config, invocation: &Invocation) -> Result<Vec<String>> {
    let mut presets = invocation.presets.clone();
    presets.extend(config.auto_presets_for(&invocation.command)?);

    let mut skip_defaults = invocation.no_defaults;
    if !skip_defaults {
        for name in &presets {
            // Unknown names are reported during accumulation, not here.
            let Ok(resolved) = config.resolve_preset(name) else {
                continue;
            };
            if resolved.skip_defaults {
                skip_defaults = true;
                break;
            }
        }
    }

    if !skip_defaults && !config.defaults.presets.is_empty() {
        let mut with_defaults = config.defaults.presets.clone();
        with_defaults.extend(presets);
        presets = with_defaults;
    }

    let mut seen = std::collections::BTreeSet::new();
    presets.retain(|name| seen.insert(name.clone()));
    Ok(presets)
}

/// Accumulate CLI and preset rules, validate each preset, resolve, and
/// assemble the backend configuration.
pub fn build_sandbox_config(config: &Config, invocation: &Invocation) -> Result<SandboxConfig> {
    let presets = effective_presets(config, invocation)?;

    let mut resolver = RuleResolver::new();
    for path in &invocation.allow {
        resolver.add_allow(path, RuleSource::Cli);
    }
    for path in &invocation.allow_read {
        resolver.add_read(path, RuleSource::Cli);
    }
    for path in &invocation.deny {
        resolver.add_deny(path, &[], RuleSource::Cli);
    }

    let mut allow_keychain = invocation.allow_keychain;
    let mut allow_git = invocation.allow_git;
    let mut strict = invocation.strict;

    for name in &presets {
        let processed = config.resolve_preset(name)?.process();
        let source = RuleSource::Preset(name.clone());
        for entry in &processed.allow {
            resolver.add_allow(&entry.path, source.clone());
        }
        for entry in &processed.read {
            resolver.add_read(&entry.path, source.clone());
        }
        for entry in &processed.deny {
            resolver.add_deny(&entry.path, &entry.except, source.clone());
        }

        allow_keychain |= processed.allow_keychain;
        allow_git |= processed.allow_git;
        strict |= processed.strict;

        if let Some(violation) = resolver.validate_preset(name).into_iter().next() {
            return Err(violation.into());
        }
    }

    if allow_git {
        let cwd = std::env::current_dir()?;
        if let Some(common) = gitdir::common_dir(&cwd) {
            tracing::debug!(dir = %common.display(), "granting git common directory");
            resolver.add_allow(&common.to_string_lossy(), RuleSource::Cli);
        }
    }

    let resolution = resolver.resolve();
    tracing::debug!(
        write_rules = resolution.write_rules.len(),
        read_rules = resolution.read_rules.len(),
        conflicts = resolution.conflicts.len(),
        presets = presets.len(),
        "resolved sandbox rules"
    );

    Ok(SandboxConfig {
        allow_all: invocation.allow_all,
        allow_keychain,
        strict,
        write_rules: resolution.write_rules,
        read_rules: resolution.read_rules,
        conflicts: resolution.conflicts,
        command: invocation.command.clone(),
        args: invocation.args.clone(),
    })
}
