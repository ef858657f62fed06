use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pka_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pka");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("corpus/notes")).unwrap();
    fs::create_dir_all(root.join("corpus/pdfs")).unwrap();
    fs::create_dir_all(root.join("corpus/emails")).unwrap();

    fs::write(
        root.join("corpus/notes/q3-budget.md"),
        "---\ntitle: Q3 Budget Notes\n---\n\nWe agreed to defer the hiring plan to Q4.\n",
    )
    .unwrap();

    let schema_path = root.join("data/answer.schema.json");
    fs::write(&schema_path, "{}").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/pka.sqlite"

[lexical]
path = "{root}/data/pka-index"

[sources]
notes_dir = "{root}/corpus/notes"
pdfs_dir = "{root}/corpus/pdfs"
emails_dir = "{root}/corpus/emails"

[embedding]
base_url = "http://localhost:11434"
model = "nomic-embed-text"
dims = 8

[synthesis]
schema_path = "{schema_path}"

[server]
bind = "127.0.0.1:0"
"#,
        root = root.display(),
        schema_path = schema_path.display(),
    );

    let config_path = config_dir.join("pka.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pka(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pka_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pka binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pka(&config_path, &["init"]);
    assert!(success, "init failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("initialized"));
}

#[test]
fn init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_pka(&config_path, &["init"]);
    assert!(success1, "first init failed");

    let (_, _, success2) = run_pka(&config_path, &["init"]);
    assert!(success2, "second init failed (not idempotent)");
}

#[test]
fn replay_with_no_runs_returns_empty_list() {
    let (_tmp, config_path) = setup_test_env();

    run_pka(&config_path, &["init"]);
    let (stdout, stderr, success) = run_pka(&config_path, &["replay"]);
    assert!(success, "replay failed: stdout={stdout}, stderr={stderr}");
    let runs: Vec<serde_json::Value> = serde_json::from_str(stdout.trim()).unwrap();
    assert!(runs.is_empty());
}

#[test]
fn replay_of_unknown_run_id_reports_missing() {
    let (_tmp, config_path) = setup_test_env();

    run_pka(&config_path, &["init"]);
    let (stdout, _stderr, success) = run_pka(&config_path, &["replay", "not-a-real-run-id"]);
    assert!(success);
    assert!(stdout.contains("does not exist"));
}

#[test]
fn missing_config_file_fails_with_nonzero_exit() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_stdout, stderr, success) = run_pka(&missing, &["init"]);
    assert!(!success);
    assert!(!stderr.is_empty());
}
