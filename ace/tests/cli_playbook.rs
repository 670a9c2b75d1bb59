//! CLI tests for the `ace` binary.
//!
//! Spawns the binary against playbook and config files in a temp dir and
//! checks exit status, stdout, and what was written back.

use std::fs;
use std::process::Command;

use ace::core::playbook::Playbook;
use ace::io::config::{AdapterConfig, load_config};
use ace::io::playbook_store::{load_playbook, save_playbook};

fn ace(args: &[&str], dir: &std::path::Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_ace"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run ace")
}

#[test]
fn stats_prints_counts_as_json() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut playbook = Playbook::new();
    playbook.add_tip("api usage", "Paginate.", None, &["spotify".to_string()]);
    playbook.add_tip("auth", "Use the supervisor app.", None, &["spotify".to_string()]);
    save_playbook(&temp.path().join("playbook.json"), &playbook).expect("save");

    let output = ace(&["playbook", "stats", "playbook.json"], temp.path());

    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json stats");
    assert_eq!(stats["sections"], 2);
    assert_eq!(stats["tips"], 2);
    assert_eq!(stats["scenario_tags"], 1);
}

#[test]
fn check_rejects_schema_violation() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("playbook.json"), r#"{"tips": {}}"#).expect("write");

    let output = ace(&["playbook", "check", "playbook.json"], temp.path());

    assert_eq!(output.status.code(), Some(1));
    assert!(!output.stderr.is_empty());
}

#[test]
fn dedup_writes_back_without_duplicate() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("playbook.json");
    let mut playbook = Playbook::new();
    playbook.add_tip("api usage", "Always paginate list endpoints.", None, &[]);
    let dup = playbook.add_tip("api usage", "Paginate list endpoints", None, &[]);
    save_playbook(&path, &playbook).expect("save");

    let output = ace(
        &["playbook", "dedup", "playbook.json", "--ids", &dup],
        temp.path(),
    );

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), dup);
    let reloaded = load_playbook(&path).expect("reload");
    assert_eq!(reloaded.len(), 1);
    assert!(reloaded.get_tip(&dup).is_none());
}

#[test]
fn config_init_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");

    assert!(ace(&["config", "init"], temp.path()).status.success());
    let written = load_config(&temp.path().join("ace.toml")).expect("load");
    assert_eq!(written, AdapterConfig::default());

    let again = ace(&["config", "init"], temp.path());
    assert_eq!(again.status.code(), Some(1));
    assert!(ace(&["config", "init", "--force"], temp.path()).status.success());
    assert!(ace(&["config", "check", "ace.toml"], temp.path()).status.success());
}
