use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn dealdesk_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dealdesk"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("mutual_nda.txt"),
        "MUTUAL NON-DISCLOSURE AGREEMENT\n\n\
         1. Confidential Information\nEach party shall protect the other party's confidential information.\n\n\
         2. Term\nThis agreement shall automatically renew for successive one year terms.",
    )
    .unwrap();

    // A bucket folder the way an external system would have filled it.
    let folder = root.join("buckets/client-context/acme_corp_42");
    fs::create_dir_all(&folder).unwrap();
    fs::write(
        folder.join("supply_msa.txt"),
        "MASTER SERVICES AGREEMENT\n\nSection 1 Services\nSupplier shall provide the services. \
         Liability of either party is unlimited for gross negligence.",
    )
    .unwrap();
    fs::write(folder.join("broken.pdf"), b"%PDF-garbage").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/dealdesk.sqlite"

[storage]
backend = "local"
root = "{root}/buckets"

[analysis]
provider = "heuristic"

[server]
bind = "127.0.0.1:0"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("dealdesk.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_dealdesk(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = dealdesk_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("ANTHROPIC_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run dealdesk binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn field<'a>(stdout: &'a str, name: &str) -> &'a str {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(name))
        .map(|rest| rest.trim_start_matches(':').trim())
        .unwrap_or_else(|| panic!("no '{}' in output:\n{}", name, stdout))
}

fn upload_nda(config_path: &Path) -> (String, String, bool) {
    let file = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files/mutual_nda.txt");
    run_dealdesk(
        config_path,
        &[
            "upload",
            file.to_str().unwrap(),
            "--company",
            "Acme Corp",
            "--deal",
            "Q3 Supply",
            "--tags",
            "nda, urgent",
        ],
    )
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_dealdesk(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_dealdesk(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_dealdesk(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_upload_then_analyze() {
    let (_tmp, config_path) = setup_test_env();
    run_dealdesk(&config_path, &["init"]);

    let (stdout, stderr, success) = upload_nda(&config_path);
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("queued for processing"));
    assert!(stdout.contains("created company"));
    assert!(stdout.contains("created deal"));
    let upload_id = field(&stdout, "file_upload_id").to_string();

    let (stdout, _, success) = run_dealdesk(&config_path, &["status", &upload_id]);
    assert!(success);
    assert!(stdout.contains("\"upload_status\": \"uploaded\""));
    assert!(stdout.contains("\"processing_status\": \"pending\""));

    let (stdout, stderr, success) = run_dealdesk(&config_path, &["analyze", &upload_id]);
    assert!(success, "analyze failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("mutual_nda.txt: nda"));
    assert!(stdout.contains("analysis_id:"));

    let (stdout, _, _) = run_dealdesk(&config_path, &["status", &upload_id]);
    assert!(stdout.contains("\"upload_status\": \"completed\""));
    assert!(stdout.contains("\"processing_status\": \"completed\""));
}

#[test]
fn test_second_upload_reuses_company_and_deal() {
    let (_tmp, config_path) = setup_test_env();
    run_dealdesk(&config_path, &["init"]);

    upload_nda(&config_path);
    let (stdout, _, success) = upload_nda(&config_path);
    assert!(success);
    assert!(!stdout.contains("created company"));
    assert!(!stdout.contains("created deal"));

    let (stdout, _, success) = run_dealdesk(&config_path, &["uploads", "--company", "acme"]);
    assert!(success);
    assert!(stdout.contains("mutual_nda.txt"));
    assert!(stdout.contains("Acme Corp / Q3 Supply"));
}

#[test]
fn test_status_unknown_upload_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_dealdesk(&config_path, &["init"]);

    let (_, stderr, success) = run_dealdesk(&config_path, &["status", "no-such-id"]);
    assert!(!success);
    assert!(stderr.contains("File upload not found"));
}

#[test]
fn test_process_folder_stores_results() {
    let (_tmp, config_path) = setup_test_env();
    run_dealdesk(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_dealdesk(&config_path, &["process", "client-context", "acme_corp_42"]);
    assert!(success, "process failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("supply_msa.txt: msa"));
    assert!(stdout.contains("warning: Skipping broken.pdf"));
    assert!(stdout.contains("files: 2"));
    let pipeline_id = field(&stdout, "pipeline_id").to_string();

    let (stdout, _, success) = run_dealdesk(&config_path, &["results", &pipeline_id]);
    assert!(success);
    assert!(stdout.contains("\"company_name\": \"Acme Corp\""));
    assert!(stdout.contains("supply_msa.txt"));
    assert!(!stdout.contains("broken.pdf"));

    let (stdout, _, success) = run_dealdesk(&config_path, &["search", "supplier"]);
    assert!(success);
    assert!(stdout.contains("supply_msa.txt"));
}

#[test]
fn test_process_missing_folder_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_dealdesk(&config_path, &["init"]);

    let (stdout, _, success) = run_dealdesk(&config_path, &["process", "client-context", "nobody_1"]);
    assert!(!success);
    assert!(stdout.contains("No files found in folder"));
}

#[test]
fn test_simulate_counts_chunks() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_dealdesk(&config_path, &["simulate", "Mutual_NDA.pdf", "vendor_msa.docx", "deck.pptx"]);
    assert!(success, "simulate failed: stderr={}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["summary"]["files_processed"], 3);
    assert_eq!(report["summary"]["chunks_created"], 30);
    assert_eq!(report["results"]["Mutual_NDA.pdf"]["classification"]["type"], "nda");
    assert_eq!(report["results"]["vendor_msa.docx"]["classification"]["type"], "msa");
    assert_eq!(report["results"]["deck.pptx"]["classification"]["type"], "other");
}

#[test]
fn test_simulate_without_files_is_rejected() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_dealdesk(&config_path, &["simulate"]);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("No files selected"));
}
