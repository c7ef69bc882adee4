use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docidx_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docidx"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("library");
    fs::create_dir_all(files_dir.join("notes")).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("notes/beta.txt"),
        "Beta plain text file.\n\nContains notes about deployment and infrastructure.",
    )
    .unwrap();
    fs::write(files_dir.join("notes/ignored.bin"), [0u8, 159, 146, 150]).unwrap();

    let config_content = format!(
        r#"[index]
name = "cli-test"
endpoint = "http://127.0.0.1:9"

[chunking]
max_tokens = 15

[embedding]
endpoint = "http://127.0.0.1:9"
model = "text-embedding-ada-002"

[source]
kind = "filesystem"
file_formats = ["md", "txt"]

[source.filesystem]
root = "{}"
"#,
        files_dir.display()
    );

    let config_path = config_dir.join("docidx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docidx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docidx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docidx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_folders_lists_root_and_subdirectories() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_docidx(&config, &["folders"]);
    assert!(success, "folders failed: {}", stderr);

    let folders: Vec<&str> = stdout.lines().collect();
    assert_eq!(folders, vec!["/", "/notes"]);
}

#[test]
fn test_ingest_dry_run_counts_without_credentials() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_docidx(&config, &["ingest", "--dry-run"]);
    assert!(success, "dry run failed: {}", stderr);

    assert!(stdout.contains("ingest filesystem (dry-run)"));
    assert!(stdout.contains("folders: 2"));
    assert!(stdout.contains("documents: 2"));
    assert!(!stdout.contains("Upload of"));
}

#[test]
fn test_ingest_dry_run_single_folder() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) =
        run_docidx(&config, &["ingest", "--dry-run", "--folder", "/notes"]);
    assert!(success, "dry run failed: {}", stderr);

    assert!(stdout.contains("/notes  1 documents"));
    assert!(stdout.contains("folders: 1"));
}

#[test]
fn test_ingest_without_api_key_fails() {
    let (_tmp, config) = setup_test_env();
    let output = Command::new(docidx_binary())
        .arg("--config")
        .arg(&config)
        .args(["ingest", "--progress", "off"])
        .env_remove("AOAI_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("SEARCH_ADMIN_API_KEY")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("environment variable not set"), "stderr: {}", stderr);
}

#[test]
fn test_unknown_progress_mode_rejected() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_docidx(&config, &["ingest", "--progress", "loud"]);
    assert!(!success);
    assert!(stderr.contains("Unknown progress mode"));
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_docidx(&tmp.path().join("nope.toml"), &["folders"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config) = setup_test_env();
    let content = fs::read_to_string(&config).unwrap();
    fs::write(&config, content.replace("max_tokens = 15", "max_tokens = 0")).unwrap();

    let (_, stderr, success) = run_docidx(&config, &["folders"]);
    assert!(!success);
    assert!(stderr.contains("max_tokens"));
}
