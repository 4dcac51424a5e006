use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn layerfix(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_layerfix"))
        .args(args)
        .current_dir(dir)
        .env("LAYERFIX_LOG", "off")
        .output()
        .expect("run layerfix")
}

const NEEDS_ALT: &str = "export const A = () => <img src=\"a.png\" />;\n";

#[test]
fn passes_lists_the_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let out = layerfix(dir.path(), &["passes"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for name in ["config", "patterns", "imports", "components", "accessibility", "hydration", "directives"] {
        assert!(stdout.contains(name), "missing {name} in:\n{stdout}");
    }
}

#[test]
fn check_reports_work_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.jsx");
    fs::write(&file, NEEDS_ALT).unwrap();

    let out = layerfix(dir.path(), &["check", "a.jsx", "--passes", "5"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stdout).contains("would fix (accessibility)"));
    assert_eq!(fs::read_to_string(&file).unwrap(), NEEDS_ALT);
}

#[test]
fn check_passes_on_clean_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.jsx"), "export const A = () => <p>a</p>;\n").unwrap();
    let out = layerfix(dir.path(), &["check", ".", "--passes", "5"]);
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn fix_writes_in_place_and_dry_run_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.jsx");
    fs::write(&file, NEEDS_ALT).unwrap();

    let dry = layerfix(dir.path(), &["fix", "a.jsx", "--passes", "5", "--dry-run"]);
    assert!(dry.status.success());
    assert_eq!(fs::read_to_string(&file).unwrap(), NEEDS_ALT);

    let fixed = layerfix(dir.path(), &["fix", "a.jsx", "--passes", "5"]);
    assert!(fixed.status.success());
    assert_eq!(
        fs::read_to_string(&file).unwrap(),
        "export const A = () => <img src=\"a.png\" alt=\"\" />;\n"
    );
}

#[test]
fn fix_json_emits_reports() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.jsx"), NEEDS_ALT).unwrap();

    let out = layerfix(dir.path(), &["fix", "a.jsx", "--passes", "5", "--dry-run", "--json"]);
    assert!(out.status.success());
    let reports: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let report = &reports[0]["report"];
    assert_eq!(report["changed"], serde_json::Value::Bool(true));
    assert_eq!(report["outcomes"][0]["status"], "committed");
    assert!(report["run_id"].is_string());
}

#[test]
fn project_config_selects_passes() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("layerfix.toml"), "enabled_passes = [2]\n").unwrap();
    fs::write(dir.path().join("a.jsx"), NEEDS_ALT).unwrap();

    // only the patterns pass runs, and it has nothing to do here
    let out = layerfix(dir.path(), &["check", "a.jsx"]);
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn missing_path_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = layerfix(dir.path(), &["fix", "nope.jsx"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("nope.jsx"));
}
