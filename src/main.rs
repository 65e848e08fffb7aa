//! Binary entry point: CLI definition, logging setup, and dispatch.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use cage::config::{self, Config};
use cage::launcher::{build_sandbox_config, Invocation};
use cage::{dryrun, sandbox, Error};

/// Run a command under host-enforced filesystem confinement.
///
/// Writes are denied outside the allowed paths; with --strict, reads are
/// denied outside the read allowlist as well. Enforcement uses
/// sandbox-exec on macOS and Landlock on Linux.
#[derive(Parser, Debug)]
#[command(name = "cage", version, about)]
struct Cli {
    /// Grant write access to a path (repeatable)
    #[arg(long = "allow", value_name = "PATH")]
    allow: Vec<String>,

    /// Grant read access to a path; honored with --strict (repeatable)
    #[arg(long = "allow-read", value_name = "PATH")]
    allow_read: Vec<String>,

    /// Deny read and write access to a path (repeatable)
    #[arg(long = "deny", value_name = "PATH")]
    deny: Vec<String>,

    /// Strict mode: deny reads outside the explicit read allowlist
    #[arg(long)]
    strict: bool,

    /// Disable all restrictions (testing/debugging only)
    #[arg(long)]
    allow_all: bool,

    /// Allow write access to the macOS keychain
    #[arg(long)]
    allow_keychain: bool,

    /// Allow access to the git common directory (git operations in worktrees)
    #[arg(long)]
    allow_git: bool,

    /// Apply a named preset (repeatable)
    #[arg(long = "preset", value_name = "NAME")]
    presets: Vec<String>,

    /// Skip the default presets from the config file
    #[arg(long)]
    no_defaults: bool,

    /// List available presets and exit
    #[arg(long)]
    list_presets: bool,

    /// Show the contents of a preset and exit
    #[arg(long, value_name = "NAME")]
    show_preset: Option<String>,

    /// Output format for --show-preset
    #[arg(short = 'o', value_enum, default_value = "text", value_name = "FORMAT")]
    output: OutputFormat,

    /// Path to a custom configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Show the generated sandbox profile without executing
    #[arg(long)]
    dry_run: bool,

    /// Target command and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Resolved preset in a human layout
    Text,
    /// Resolved preset as config-schema YAML
    Yaml,
    /// The unresolved declaration as config-schema YAML
    Raw,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("cage: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Children and their descendants can detect confinement through this.
    std::env::set_var(sandbox::IN_CAGE_ENV, "1");

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    if cli.list_presets {
        let names = config.list_presets();
        if names.is_empty() {
            println!("No presets available");
        } else {
            println!("Available presets:");
            for name in names {
                println!("  - {name}");
            }
        }
        return Ok(());
    }

    if let Some(name) = &cli.show_preset {
        let raw = config
            .get_preset(name)
            .ok_or_else(|| Error::UnknownPreset(name.clone()))?;
        let rendered = match cli.output {
            OutputFormat::Raw => config::render_preset_yaml(name, &raw, &[]),
            OutputFormat::Yaml => {
                let resolved = config.resolve_preset(name)?;
                config::render_preset_yaml(name, &resolved, &raw.extends)
            }
            OutputFormat::Text => {
                let resolved = config.resolve_preset(name)?;
                config::render_preset_text(name, &resolved, &raw.extends)
            }
        };
        print!("{rendered}");
        return Ok(());
    }

    let Some((command, args)) = cli.command.split_first() else {
        eprintln!("Usage: cage [flags] <command> [command-args...]");
        eprintln!("       cage [flags] -- <command> [command-flags] [command-args...]");
        std::process::exit(1);
    };

    let invocation = Invocation {
        allow: cli.allow,
        allow_read: cli.allow_read,
        deny: cli.deny,
        presets: cli.presets,
        no_defaults: cli.no_defaults,
        strict: cli.strict,
        allow_all: cli.allow_all,
        allow_keychain: cli.allow_keychain,
        allow_git: cli.allow_git,
        command: command.clone(),
        args: args.to_vec(),
    };

    let sandbox_config = build_sandbox_config(&config, &invocation)?;

    if cli.dry_run {
        dryrun::print(&sandbox_config);
        return Ok(());
    }

    // On success exec replaces the process image and this never returns.
    match sandbox::run(&sandbox_config)? {}
}
