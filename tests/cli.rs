use serde_json::Value;
use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().join("campaigns");
    fs::create_dir_all(&data_dir).unwrap();

    let config_content = format!(
        r#"[server]
host = "127.0.0.1"
port = 0

[tracker]
data_dir = "{}"
"#,
        data_dir.display()
    );
    let config_path = tmp.path().join("opsh.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_opsh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_opsh"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("DATABASE_URL")
        .env_remove("POSTGRES_HOST")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run opsh: {}", e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_probe_scan_prints_result() {
    let (_tmp, config) = setup_test_env();
    let open = TcpListener::bind("127.0.0.1:0").unwrap();
    let open_port = open.local_addr().unwrap().port();
    let payload = format!(
        r#"{{"target": "127.0.0.1", "ports": [{}, {}]}}"#,
        open_port,
        closed_port()
    );

    let (stdout, stderr, success) = run_opsh(&config, &["probe", "scan", "--json", &payload]);
    assert!(success, "probe failed: {}", stderr);
    let result: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(result["kind"], "scan");
    assert_eq!(result["open_ports"], serde_json::json!([open_port]));
}

#[test]
fn test_probe_rejects_invalid_input() {
    let (_tmp, config) = setup_test_env();
    let (_, _, success) = run_opsh(
        &config,
        &["probe", "dns", "--json", r#"{"query": "example.com", "record_type": "AAAA"}"#],
    );
    assert!(!success);

    let (_, _, success) = run_opsh(&config, &["probe", "ping"]);
    assert!(!success);
}

#[test]
fn test_campaigns_list_empty() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_opsh(&config, &["campaigns", "list"]);
    assert!(success, "list failed: {}", stderr);
    assert!(stdout.contains("No campaigns"));
}

#[test]
fn test_campaigns_show_invalid_id() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_opsh(&config, &["campaigns", "show", "nope"]);
    assert!(!success);
    assert!(stderr.contains("invalid campaign id"));
}

fn seed_campaign(config: &Path, project: &Path) -> String {
    let data_dir = config.parent().unwrap().join("campaigns");
    let id = uuid::Uuid::new_v4().to_string();
    let campaign = serde_json::json!({
        "id": id,
        "name": "cli",
        "patterns": ["**/*.go"],
        "location": project.display().to_string(),
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z",
    });
    fs::write(
        data_dir.join(format!("{}.json", id)),
        serde_json::to_vec_pretty(&campaign).unwrap(),
    )
    .unwrap();
    id
}

#[test]
fn test_campaigns_sync_and_coverage() {
    let (tmp, config) = setup_test_env();
    let project = tmp.path().join("project");
    fs::create_dir_all(project.join("pkg")).unwrap();
    fs::write(project.join("a.go"), "package main\n").unwrap();
    fs::write(project.join("pkg/b.go"), "package pkg\n").unwrap();
    fs::write(project.join("README.md"), "# readme\n").unwrap();
    let id = seed_campaign(&config, &project);

    let (stdout, stderr, success) = run_opsh(&config, &["campaigns", "sync", &id]);
    assert!(success, "sync failed: {}", stderr);
    assert!(stdout.contains("added 2, deleted 0, total 2"), "got: {}", stdout);

    fs::remove_file(project.join("a.go")).unwrap();
    let (stdout, stderr, success) = run_opsh(&config, &["campaigns", "sync", &id]);
    assert!(success, "resync failed: {}", stderr);
    assert!(stdout.contains("added 0, deleted 1, total 2"), "got: {}", stdout);

    let (stdout, stderr, success) = run_opsh(&config, &["campaigns", "coverage", &id]);
    assert!(success, "coverage failed: {}", stderr);
    let coverage: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(coverage["campaign_id"], id.as_str());
    assert_eq!(coverage["total_files"], 1);
    assert_eq!(coverage["visited_files"], 0);

    let (stdout, _, success) = run_opsh(&config, &["campaigns", "list"]);
    assert!(success);
    assert!(stdout.contains("cli"));
}

#[test]
fn test_campaigns_sync_unknown_campaign_fails() {
    let (_tmp, config) = setup_test_env();
    let missing = uuid::Uuid::new_v4().to_string();
    let (_, stderr, success) = run_opsh(&config, &["campaigns", "sync", &missing]);
    assert!(!success);
    assert!(stderr.contains("campaign not found"), "got: {}", stderr);
}
