//! macOS Seatbelt backend.
//!
//! Lowers the resolved rules to an SBPL profile and replaces the process
//! with `sandbox-exec -p <profile> <command> …`. SBPL applies rules top to
//! bottom with later rules overriding earlier ones where they share a
//! subject path, so emission order is a semantic contract: the global write
//! deny comes first, then targeted denies, then the allows that carve
//! access back in.
//!
//! Read denials use `file-read-data`, never `file-read*`. The starred class
//! also blocks `stat`/`lstat`, which breaks path resolution in most
//! runtimes; `file-read-data` blocks `read` and `readdir` while leaving
//! metadata queries intact.

use std::collections::HashSet;

use crate::rules::{AccessMode, ResolvedRule, RuleAction};
use crate::sandbox::SandboxConfig;

/// System temporary directory family; always writable.
const TEMP_DIR_REGEX: &str = r"^/private/var/folders/[^/]+/[^/]+/(C|T|0)($|/)";

/// Accumulates profile lines, dropping exact repeats so that a READ|WRITE
/// deny appearing in both resolved sequences emits each operation once.
struct ProfileBuilder {
    text: String,
    seen: HashSet<String>,
}

impl ProfileBuilder {
    fn new() -> Self {
        Self {
            text: String::new(),
            seen: HashSet::new(),
        }
    }

    /// Preamble or global line, emitted unconditionally.
    fn push(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
    }

    /// Per-path rule line, deduplicated on exact text.
    fn push_rule(&mut self, line: String) {
        if self.seen.insert(line.clone()) {
            self.text.push_str(&line);
            self.text.push('\n');
        }
    }
}

/// Synthesize the SBPL profile for `config`.
pub fn generate_profile(config: &SandboxConfig) -> String {
    let mut profile = ProfileBuilder::new();
    profile.push("(version 1)");
    profile.push("(import \"system.sb\")");
    profile.push("(allow default)");

    if config.allow_all {
        return profile.text;
    }

    profile.push("(deny file-write*)");
    profile.push(&format!(
        "(allow file-write* (regex #\"{TEMP_DIR_REGEX}\"))"
    ));

    if config.allow_keychain {
        match std::env::var("HOME") {
            Ok(home) => profile.push_rule(format!(
                "(allow file-write* (subpath \"{}/Library/Keychains\"))",
                escape_path(&home)
            )),
            Err(_) => tracing::warn!("HOME not set; skipping keychain allowance"),
        }
    }

    // Write denies, and the read half of READ|WRITE denies.
    for rule in &config.write_rules {
        if rule.action == RuleAction::Deny {
            emit_deny(&mut profile, rule, AccessMode::Write);
            if rule.mode.allows_read() {
                emit_deny(&mut profile, rule, AccessMode::Read);
            }
        }
    }

    // Write allows. The literal form covers an allow target that is a file
    // rather than a directory.
    for rule in &config.write_rules {
        if rule.action == RuleAction::Allow {
            let escaped = escape_path(&rule.path);
            profile.push_rule(format!("(allow file-write* (subpath \"{escaped}\"))"));
            profile.push_rule(format!("(allow file-write* (literal \"{escaped}\"))"));
        }
    }

    // Carve-outs restore read access only.
    for rule in &config.write_rules {
        if rule.action == RuleAction::Deny {
            for except in &rule.except {
                emit_read_allow(&mut profile, except);
            }
        }
    }

    if config.strict {
        profile.push("(deny file-read-data)");
        // Without this, process startup and dynamic-linker path resolution
        // fail inside the sandbox.
        profile.push("(allow file-read-data (literal \"/\"))");

        for rule in &config.read_rules {
            if rule.action == RuleAction::Deny {
                emit_deny(&mut profile, rule, AccessMode::Read);
            }
        }
        for rule in &config.read_rules {
            if rule.action == RuleAction::Allow {
                emit_read_allow(&mut profile, &rule.path);
            }
        }
        // Write-allowed paths are implicitly readable.
        for rule in &config.write_rules {
            if rule.action == RuleAction::Allow {
                emit_read_allow(&mut profile, &rule.path);
            }
        }
        for rule in &config.read_rules {
            if rule.action == RuleAction::Deny {
                for except in &rule.except {
                    emit_read_allow(&mut profile, except);
                }
            }
        }
    }

    profile.text
}

fn emit_deny(profile: &mut ProfileBuilder, rule: &ResolvedRule, mode: AccessMode) {
    let operation = if mode == AccessMode::Read {
        "file-read-data"
    } else {
        "file-write*"
    };

    if rule.is_glob {
        let regex = glob_to_regex(&rule.path);
        profile.push_rule(format!("(deny {operation} (regex #\"{regex}\"))"));
    } else {
        let escaped = escape_path(&rule.path);
        profile.push_rule(format!("(deny {operation} (subpath \"{escaped}\"))"));
    }
}

fn emit_read_allow(profile: &mut ProfileBuilder, path: &str) {
    let escaped = escape_path(path);
    profile.push_rule(format!("(allow file-read-data (subpath \"{escaped}\"))"));
    profile.push_rule(format!("(allow file-read-data (literal \"{escaped}\"))"));
}

/// Backslash-escape backslashes and double quotes for SBPL string literals.
fn escape_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Translate a glob pattern to the SBPL regex dialect: anchored at the
/// start, `**` crosses separators, `*` and `?` stop at them, and the suffix
/// matches the path itself or anything beneath it.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' | '(' | ')' | '[' | ']' | '{' | '}' | '+' | '^' | '$' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push_str("($|/)");
    out
}

/// Replace this process with `sandbox-exec` running the target under the
/// generated profile.
#[cfg(target_os = "macos")]
pub fn run_in_sandbox(
    config: &SandboxConfig,
) -> crate::error::Result<std::convert::Infallible> {
    use std::os::unix::process::CommandExt;

    use crate::error::Error;

    let profile = generate_profile(config);
    tracing::debug!(bytes = profile.len(), "generated sandbox profile");

    let helper = which::which("sandbox-exec")
        .map_err(|_| Error::BackendUnavailable("sandbox-exec".into()))?;

    let err = std::process::Command::new(helper)
        .arg("-p")
        .arg(&profile)
        .arg(&config.command)
        .args(&config.args)
        .exec();
    Err(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSource;

    fn deny(path: &str, mode: AccessMode) -> ResolvedRule {
        ResolvedRule {
            path: path.to_string(),
            mode,
            action: RuleAction::Deny,
            source: RuleSource::Cli,
            is_glob: path.contains('*'),
            except: Vec::new(),
        }
    }

    fn allow(path: &str, mode: AccessMode) -> ResolvedRule {
        ResolvedRule {
            path: path.to_string(),
            mode,
            action: RuleAction::Allow,
            source: RuleSource::Cli,
            is_glob: path.contains('*'),
            except: Vec::new(),
        }
    }

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn deny_rules_use_file_read_data_not_file_read_star() {
        let config = SandboxConfig {
            write_rules: vec![deny("/Users/test", AccessMode::ReadWrite)],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);

        assert!(!profile.contains("(deny file-read* (subpath \"/Users/test\"))"));
        assert!(profile.contains("(deny file-read-data (subpath \"/Users/test\"))"));
        assert!(profile.contains("(deny file-write* (subpath \"/Users/test\"))"));
    }

    #[test]
    fn readwrite_deny_emits_each_operation_exactly_once() {
        // The same rule object lands in both resolved sequences; emission
        // must still be single per operation, strict mode included.
        let rule = deny("/Users/test", AccessMode::ReadWrite);
        let config = SandboxConfig {
            strict: true,
            write_rules: vec![rule.clone()],
            read_rules: vec![rule],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);

        assert_eq!(
            count(&profile, "(deny file-write* (subpath \"/Users/test\"))"),
            1
        );
        assert_eq!(
            count(&profile, "(deny file-read-data (subpath \"/Users/test\"))"),
            1
        );
    }

    #[test]
    fn strict_mode_denies_reads_and_keeps_the_root_literal() {
        let config = SandboxConfig {
            strict: true,
            read_rules: vec![allow("/usr", AccessMode::Read)],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);

        assert!(profile.contains("(deny file-read-data)"));
        assert!(!profile.contains("(deny file-read*)"));
        assert!(profile.contains("(allow file-read-data (literal \"/\"))"));
        assert!(profile.contains("(allow file-read-data (subpath \"/usr\"))"));
        assert!(profile.contains("(allow file-read-data (literal \"/usr\"))"));
    }

    #[test]
    fn strict_mode_mirrors_write_allows_as_reads() {
        let config = SandboxConfig {
            strict: true,
            write_rules: vec![allow("/work", AccessMode::Write)],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);

        assert!(profile.contains("(allow file-write* (subpath \"/work\"))"));
        assert!(profile.contains("(allow file-read-data (subpath \"/work\"))"));
    }

    #[test]
    fn allow_all_emits_no_deny_lines() {
        let config = SandboxConfig {
            allow_all: true,
            write_rules: vec![deny("/ignored", AccessMode::ReadWrite)],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);

        assert!(!profile.contains("(deny"));
        assert!(profile.contains("(version 1)"));
        assert!(profile.contains("(import \"system.sb\")"));
        assert!(profile.contains("(allow default)"));
    }

    #[test]
    fn non_strict_profile_keeps_temp_dirs_writable() {
        let profile = generate_profile(&SandboxConfig::default());
        assert!(profile
            .contains("(allow file-write* (regex #\"^/private/var/folders/[^/]+/[^/]+/(C|T|0)($|/)\"))"));
    }

    #[test]
    fn carve_outs_restore_read_data_only() {
        let mut rule = deny("/Users/test", AccessMode::ReadWrite);
        rule.except = vec!["/Users/test/allowed".to_string()];
        let config = SandboxConfig {
            write_rules: vec![rule],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);

        assert!(profile.contains("(allow file-read-data (subpath \"/Users/test/allowed\"))"));
        assert!(profile.contains("(allow file-read-data (literal \"/Users/test/allowed\"))"));
        assert!(!profile.contains("(allow file-write* (subpath \"/Users/test/allowed\"))"));
    }

    #[test]
    fn write_allows_emit_subpath_and_literal_forms() {
        let config = SandboxConfig {
            write_rules: vec![allow("/Users/test/project", AccessMode::Write)],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);

        assert!(profile.contains("(allow file-write* (subpath \"/Users/test/project\"))"));
        assert!(profile.contains("(allow file-write* (literal \"/Users/test/project\"))"));
    }

    #[test]
    fn glob_denies_lower_to_regex_for_both_operations() {
        let config = SandboxConfig {
            write_rules: vec![deny("/Users/*/secret", AccessMode::ReadWrite)],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);

        assert!(
            profile.contains("(deny file-write* (regex #\"^/Users/[^/]*/secret($|/)\"))")
        );
        assert!(
            profile.contains("(deny file-read-data (regex #\"^/Users/[^/]*/secret($|/)\"))")
        );
    }

    #[test]
    fn strict_deny_with_exception_matches_expected_shape() {
        let mut rule = deny("/home/user", AccessMode::ReadWrite);
        rule.except = vec!["/home/user/Documents".to_string()];
        let config = SandboxConfig {
            strict: true,
            write_rules: vec![rule.clone()],
            read_rules: vec![rule],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);

        assert!(profile.contains("(deny file-read-data)"));
        assert!(profile.contains("(allow file-read-data (literal \"/\"))"));
        assert!(profile.contains("(deny file-read-data (subpath \"/home/user\"))"));
        assert!(profile.contains("(allow file-read-data (subpath \"/home/user/Documents\"))"));
    }

    #[test]
    fn keychain_flag_allows_keychain_writes() {
        std::env::set_var("HOME", std::env::var("HOME").unwrap_or_else(|_| "/root".into()));
        let config = SandboxConfig {
            allow_keychain: true,
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);
        assert!(profile.contains("/Library/Keychains\"))"));
    }

    #[test]
    fn glob_translation_table() {
        assert_eq!(
            glob_to_regex("/Users/*/secret"),
            "^/Users/[^/]*/secret($|/)"
        );
        assert_eq!(glob_to_regex("/a/**/b"), "^/a/.*/b($|/)");
        assert_eq!(glob_to_regex("/a/file?.txt"), "^/a/file[^/]\\.txt($|/)");
        assert_eq!(glob_to_regex("/a/(x)[y]{z}"), "^/a/\\(x\\)\\[y\\]\\{z\\}($|/)");
        assert_eq!(glob_to_regex("/plus+dollar$"), "^/plus\\+dollar\\$($|/)");
    }

    #[test]
    fn paths_are_escaped_for_sbpl_strings() {
        assert_eq!(escape_path("/simple/path"), "/simple/path");
        assert_eq!(
            escape_path("/path/with \"quotes\""),
            "/path/with \\\"quotes\\\""
        );
        assert_eq!(
            escape_path("/back\\slash"),
            "/back\\\\slash"
        );

        let config = SandboxConfig {
            write_rules: vec![allow("/with \"quote", AccessMode::Write)],
            ..SandboxConfig::default()
        };
        let profile = generate_profile(&config);
        assert!(profile.contains("(allow file-write* (subpath \"/with \\\"quote\"))"));
    }
}
