//! Config file to backend artifact: preset composition, carve-outs, and
//! the conflict report.

use cage::dryrun;
use cage::launcher::{build_sandbox_config, effective_presets, Invocation};
use cage::sandbox::seatbelt;
use cage::{Config, Error};

fn invocation(command: &str) -> Invocation {
    Invocation {
        command: command.to_string(),
        ..Invocation::default()
    }
}

#[test]
fn preset_chain_flattens_into_rules() {
    let yaml = r#"
presets:
  protect-home:
    deny:
      - path: /home/user
        except:
          - /home/user/Documents
  dev:
    extends: ["protect-home"]
    strict: true
    allow: ["/home/user/Documents"]
    read: ["/usr"]
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let mut inv = invocation("vim");
    inv.presets = vec!["dev".to_string()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();
    assert!(sandbox.strict);

    let profile = seatbelt::generate_profile(&sandbox);
    assert!(profile.contains("(deny file-read-data)"));
    assert!(profile.contains("(allow file-read-data (literal \"/\"))"));
    assert!(profile.contains("(deny file-read-data (subpath \"/home/user\"))"));
    // The carve-out restores read access only.
    assert!(profile.contains("(allow file-read-data (subpath \"/home/user/Documents\"))"));
    // The separate write allow makes the same path writable.
    assert!(profile.contains("(allow file-write* (subpath \"/home/user/Documents\"))"));
}

#[test]
fn sibling_parents_with_opposite_actions_do_not_fail_validation() {
    // A allows /x, B denies /x; the flattened child carries both. The allow
    // is keyed WRITE and the deny READ|WRITE, so single-preset validation
    // has nothing to object to and emission lets the allow win.
    let yaml = r#"
presets:
  a:
    allow: ["/x"]
  b:
    deny: ["/x"]
  child:
    extends: ["a", "b"]
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let mut inv = invocation("ls");
    inv.presets = vec!["child".to_string()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();
    let profile = seatbelt::generate_profile(&sandbox);

    let deny_at = profile.find("(deny file-write* (subpath \"/x\"))").unwrap();
    let allow_at = profile.find("(allow file-write* (subpath \"/x\"))").unwrap();
    assert!(allow_at > deny_at);
}

#[test]
fn duplicate_rules_inside_one_preset_are_fatal() {
    let yaml = r#"
presets:
  broken:
    deny: ["/data", "/data"]
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let mut inv = invocation("ls");
    inv.presets = vec!["broken".to_string()];

    let err = build_sandbox_config(&config, &inv).unwrap_err();
    assert!(matches!(err, Error::Rule(_)));
    assert!(err.to_string().contains("duplicate rule"));
}

#[test]
fn auto_preset_applies_by_basename() {
    let yaml = r#"
presets:
  node:
    allow: ["/tmp/npm-cache"]
auto-presets:
  - command-pattern: "^npm"
    presets: ["node"]
"#;
    let config = Config::from_yaml(yaml).unwrap();

    let sandbox = build_sandbox_config(&config, &invocation("/usr/local/bin/npm")).unwrap();
    assert!(sandbox
        .write_rules
        .iter()
        .any(|rule| rule.source.preset_name() == Some("node")));

    let unmatched = build_sandbox_config(&config, &invocation("python3")).unwrap();
    assert!(unmatched.write_rules.is_empty());
}

#[test]
fn defaults_participate_unless_a_preset_skips_them() {
    let yaml = r#"
defaults:
  presets: ["base"]
presets:
  base:
    allow: ["/workspace"]
  hermit:
    skip-defaults: true
"#;
    let config = Config::from_yaml(yaml).unwrap();

    let with_defaults = effective_presets(&config, &invocation("ls")).unwrap();
    assert_eq!(with_defaults, vec!["base"]);

    let mut inv = invocation("ls");
    inv.presets = vec!["hermit".to_string()];
    let skipped = effective_presets(&config, &inv).unwrap();
    assert_eq!(skipped, vec!["hermit"]);
}

#[test]
fn builtin_presets_expand_home_and_flow_through() {
    std::env::set_var("HOME", std::env::var("HOME").unwrap_or_else(|_| "/root".into()));
    let home = std::env::var("HOME").unwrap();

    let config = Config::default();
    let mut inv = invocation("ls");
    inv.presets = vec!["builtin:secure".to_string()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();
    assert!(sandbox
        .write_rules
        .iter()
        .any(|rule| rule.path == format!("{home}/.ssh")));

    let profile = seatbelt::generate_profile(&sandbox);
    assert!(profile.contains(&format!("(deny file-write* (subpath \"{home}/.ssh\"))")));
    assert!(profile.contains(&format!("(deny file-read-data (subpath \"{home}/.ssh\"))")));
}

#[test]
fn cross_source_conflict_shows_up_in_the_dry_run() {
    // Same-path allow and deny from two presets: the READ|WRITE keys meet
    // when both presets deny-and-allow at the same mode. Use two denies at
    // the same path to force contention within one key.
    let yaml = r#"
presets:
  one:
    deny: ["/shared"]
  two:
    deny: ["/shared"]
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let mut inv = invocation("ls");
    inv.presets = vec!["one".to_string(), "two".to_string()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();
    // Two identical-action rules at one key: resolved to a single rule,
    // no conflict record (same action is not a conflict).
    assert!(sandbox.conflicts.is_empty());
    assert_eq!(
        sandbox
            .write_rules
            .iter()
            .filter(|rule| rule.path == "/shared")
            .count(),
        1
    );

    let rendered = dryrun::render_seatbelt(&sandbox);
    let summary = rendered.split("Raw profile:").next().unwrap();
    assert_eq!(summary.matches("/shared (read+write)").count(), 1);
}
