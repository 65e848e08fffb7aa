//! End-to-end rule resolution: CLI flags through the launcher into backend
//! artifacts, on both synthesis paths.

use cage::dryrun;
use cage::launcher::{build_sandbox_config, Invocation};
use cage::sandbox::{landlock, seatbelt};
use cage::{Config, RuleAction};

fn invocation(command: &str) -> Invocation {
    Invocation {
        command: command.to_string(),
        ..Invocation::default()
    }
}

#[test]
fn strict_deny_emits_each_operation_once() {
    let config = Config::default();
    let mut inv = invocation("ls");
    inv.strict = true;
    inv.deny = vec!["/Users/test".to_string()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();
    let profile = seatbelt::generate_profile(&sandbox);

    assert_eq!(
        profile
            .matches("(deny file-write* (subpath \"/Users/test\"))")
            .count(),
        1
    );
    assert_eq!(
        profile
            .matches("(deny file-read-data (subpath \"/Users/test\"))")
            .count(),
        1
    );

    // The dry-run summary lists the deny once as well.
    let rendered = dryrun::render_seatbelt(&sandbox);
    let summary = rendered.split("Raw profile:").next().unwrap();
    assert_eq!(summary.matches("/Users/test (read+write)").count(), 1);
}

#[test]
fn glob_deny_lowers_to_anchored_regex() {
    let config = Config::default();
    let mut inv = invocation("ls");
    inv.deny = vec!["/Users/*/secret".to_string()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();
    let profile = seatbelt::generate_profile(&sandbox);

    assert!(profile.contains("(deny file-write* (regex #\"^/Users/[^/]*/secret($|/)\"))"));
    assert!(profile.contains("(deny file-read-data (regex #\"^/Users/[^/]*/secret($|/)\"))"));
}

#[test]
fn cli_allow_outranks_preset_deny_in_emission_order() {
    let yaml = r#"
presets:
  blocker:
    deny: ["/work"]
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let mut inv = invocation("make");
    inv.allow = vec!["/work".to_string()];
    inv.presets = vec!["blocker".to_string()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();

    // The allow (WRITE) and the deny (READ|WRITE) occupy different mode
    // keys, so both survive; SBPL ordering makes the allow effective.
    let profile = seatbelt::generate_profile(&sandbox);
    let deny_at = profile
        .find("(deny file-write* (subpath \"/work\"))")
        .expect("deny present");
    let allow_at = profile
        .find("(allow file-write* (subpath \"/work\"))")
        .expect("allow present");
    assert!(allow_at > deny_at, "allow must override the deny");

    let cli_allow = sandbox
        .write_rules
        .iter()
        .find(|rule| rule.action == RuleAction::Allow)
        .unwrap();
    assert!(cli_allow.source.is_cli());
}

#[test]
fn strict_mode_never_widens_reads() {
    let config = Config::default();
    let mut relaxed = invocation("ls");
    relaxed.allow_read = vec!["/usr/share".to_string()];

    let mut strict = relaxed.clone();
    strict.strict = true;

    let relaxed_profile =
        seatbelt::generate_profile(&build_sandbox_config(&config, &relaxed).unwrap());
    let strict_profile =
        seatbelt::generate_profile(&build_sandbox_config(&config, &strict).unwrap());

    // Outside strict mode reads are not restricted at all; strict mode adds
    // the global read denial before any read allows.
    assert!(!relaxed_profile.contains("(deny file-read-data)"));
    assert!(strict_profile.contains("(deny file-read-data)"));
    assert!(strict_profile.contains("(allow file-read-data (subpath \"/usr/share\"))"));
}

#[test]
fn linux_plan_warns_and_skips_what_landlock_cannot_express() {
    let config = Config::default();
    let mut inv = invocation("ls");
    inv.deny = vec!["/secret".to_string(), "/users/*/secret".to_string()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();
    let plan = landlock::plan(&sandbox);

    let read_warning = plan
        .warnings
        .iter()
        .find(|w| w.contains("read deny"))
        .expect("read deny warning");
    assert!(read_warning.contains("use --strict"));

    let glob_warning = plan
        .warnings
        .iter()
        .find(|w| w.contains("glob pattern"))
        .expect("glob warning");
    assert!(glob_warning.contains("cannot be enforced"));

    // Non-strict mode stays read-transparent.
    assert!(plan.rules.iter().any(|r| r.path == "/" && !r.write));
}

#[test]
fn linux_write_allow_under_deny_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let denied = dir.path().to_string_lossy().into_owned();
    let nested = dir.path().join("sub");
    std::fs::create_dir(&nested).unwrap();

    let config = Config::default();
    let mut inv = invocation("ls");
    inv.deny = vec![denied.clone()];
    inv.allow = vec![nested.to_string_lossy().into_owned()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();
    let plan = landlock::plan(&sandbox);

    assert!(plan.notes.iter().any(|n| n.contains("matches deny rule")));
    assert!(!plan
        .rules
        .iter()
        .any(|r| r.write && r.path.starts_with(&denied)));
}

#[test]
fn allow_all_produces_a_bare_profile_and_an_empty_plan() {
    let config = Config::default();
    let mut inv = invocation("ls");
    inv.allow_all = true;
    inv.deny = vec!["/ignored".to_string()];

    let sandbox = build_sandbox_config(&config, &inv).unwrap();

    let profile = seatbelt::generate_profile(&sandbox);
    assert!(!profile.contains("(deny"));

    let plan = landlock::plan(&sandbox);
    assert!(plan.rules.is_empty());
    assert!(plan.warnings.is_empty());
}
