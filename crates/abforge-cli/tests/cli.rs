use std::path::Path;
use std::process::{Command, Output};

const BUTTON: &str =
    "import React from 'react';\n\nexport const Button = (props) => {\n  return <button>{props.label}</button>;\n};\n";

fn experiment(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_experiment"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("STATSIG_CONSOLE_API_KEY")
        .env("NO_COLOR", "1")
        .output()
        .expect("binary runs")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Template plus one code change targeting `Button.tsx`
fn write_btn_contract(root: &Path) {
    let out = experiment(root, &["create", "btn"]);
    assert!(out.status.success());

    let path = root.join("contract/btn.json");
    let raw = std::fs::read_to_string(&path).unwrap();
    let patched = raw.replacen(
        "\"codeChanges\": []",
        r#""codeChanges": [{"file": "Button.tsx", "function": "Button", "parameterUsage": "color"}]"#,
        1,
    );
    assert_ne!(raw, patched, "template layout changed");
    std::fs::write(&path, patched).unwrap();
}

#[test]
fn create_without_contract_writes_template() {
    let dir = tempfile::tempdir().unwrap();
    let out = experiment(dir.path(), &["create", "hero-banner"]);

    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("wrote template contract"));
    let raw = std::fs::read_to_string(dir.path().join("contract/hero-banner.json")).unwrap();
    assert!(raw.contains("\"branchName\": \"exp/hero-banner\""));
}

#[test]
fn unknown_subcommand_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let out = experiment(dir.path(), &["launch", "btn"]);

    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("launch"));
}

#[test]
fn missing_key_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(experiment(dir.path(), &["status"]).status.code(), Some(1));
}

#[test]
fn help_exits_with_zero() {
    let dir = tempfile::tempdir().unwrap();
    let out = experiment(dir.path(), &["help"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("preflight"));
}

#[test]
fn verify_reports_contract_and_targets() {
    let dir = tempfile::tempdir().unwrap();
    write_btn_contract(dir.path());

    let missing = experiment(dir.path(), &["verify", "nope"]);
    assert_eq!(missing.status.code(), Some(1));

    let no_source = experiment(dir.path(), &["verify", "btn"]);
    assert_eq!(no_source.status.code(), Some(1));
    assert!(stdout(&no_source).contains("File not found"));

    std::fs::write(dir.path().join("Button.tsx"), BUTTON).unwrap();
    let out = experiment(dir.path(), &["verify", "btn"]);
    assert_eq!(out.status.code(), Some(0), "{}", stdout(&out));
    assert!(stdout(&out).contains("Button.tsx declares Button"));
}

#[test]
fn status_without_credentials_names_the_variable() {
    let dir = tempfile::tempdir().unwrap();
    let out = experiment(dir.path(), &["status", "btn"]);

    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).contains("STATSIG_CONSOLE_API_KEY"));
}

#[test]
fn offline_list_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let out = experiment(dir.path(), &["list", "--offline"]);

    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("no experiments"));
}

#[test]
fn restore_without_rollback_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_btn_contract(dir.path());
    std::fs::write(dir.path().join("Button.tsx"), BUTTON).unwrap();

    let out = experiment(dir.path(), &["restore", "btn"]);
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("Button.tsx")).unwrap(),
        BUTTON
    );
}

#[test]
fn create_rejects_a_key_that_leaves_the_contract_dir() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("project");
    std::fs::create_dir(&root).unwrap();

    let out = experiment(&root, &["create", "../outside"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).contains("invalid experiment key `../outside`"));
    assert!(!dir.path().join("outside.json").exists());
    assert!(!root.join("contract").exists());
}

#[test]
fn key_with_a_space_is_rejected_by_every_subcommand() {
    let dir = tempfile::tempdir().unwrap();
    for command in ["create", "verify", "status", "start", "stop", "preflight", "restore"] {
        let out = experiment(dir.path(), &[command, "Bad Key"]);
        assert_eq!(out.status.code(), Some(1), "{command}");
        assert!(stdout(&out).contains("invalid experiment key `Bad Key`"), "{command}");
    }
    assert!(!dir.path().join("contract").exists());
}
