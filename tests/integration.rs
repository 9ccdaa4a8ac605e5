use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn recall_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("recall");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("runbook.md"),
        "# Deployment Runbook\n\nThe kubernetes deployment rollout happens in three stages.\n\nRollbacks use the previous replica set and take about two minutes.",
    )
    .unwrap();
    fs::write(
        files_dir.join("recipes.txt"),
        "Grandma's tomato soup starts with roasted tomatoes and fresh basil.\n\nSimmer for forty minutes and season to taste.",
    )
    .unwrap();

    // The hash provider keeps the whole pipeline offline and deterministic.
    let config_content = format!(
        r#"[db]
path = "{}/data/recall.sqlite"

[chunking]
chunk_size = 400
overlap = 80

[embedding]
provider = "hash"
dims = 64

[retrieval]
default_limit = 5
default_min_similarity = 0.5

[server]
bind = "127.0.0.1:7420"
"#,
        root.display()
    );

    let config_path = config_dir.join("recall.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_recall(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = recall_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run recall binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingest(config_path: &Path, tmp: &TempDir, file: &str, user: &str) -> String {
    let path = tmp.path().join("files").join(file);
    let (stdout, stderr, success) = run_recall(
        config_path,
        &["ingest", path.to_str().unwrap(), "--user", user],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

/// Pull the document id out of the ingest report.
fn document_id(ingest_stdout: &str) -> String {
    ingest_stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("document: "))
        .expect("ingest output should contain a document id")
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_recall(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_recall(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_recall(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_text_file() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);

    let stdout = ingest(&config_path, &tmp, "recipes.txt", "alice");
    assert!(stdout.contains("chunks: "));
    assert!(stdout.contains("ok"));

    // Every chunk got an embedding from the hash provider.
    let chunks: usize = stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("chunks: "))
        .unwrap()
        .parse()
        .unwrap();
    let embedded: usize = stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("embedded: "))
        .unwrap()
        .parse()
        .unwrap();
    assert!(chunks >= 1);
    assert_eq!(chunks, embedded);

    let (docs, _, _) = run_recall(&config_path, &["documents", "--user", "alice"]);
    assert!(docs.contains("documents for alice (1)"));
    assert!(docs.contains("Grandma's tomato soup"));
}

#[test]
fn test_ingest_unsupported_extension_rejected() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);

    let path = tmp.path().join("files").join("slides.pptx");
    fs::write(&path, b"fake bytes").unwrap();

    let (_, stderr, success) = run_recall(
        &config_path,
        &["ingest", path.to_str().unwrap(), "--user", "alice"],
    );
    assert!(!success);
    assert!(stderr.contains("unsupported file type"));
}

#[test]
fn test_oversized_file_rejected_before_extraction() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);

    // 16 MB of valid text — only the size ceiling can reject it.
    let path = tmp.path().join("files").join("huge.txt");
    fs::write(&path, vec![b'a'; 16 * 1024 * 1024]).unwrap();

    let (_, stderr, success) = run_recall(
        &config_path,
        &["ingest", path.to_str().unwrap(), "--user", "alice"],
    );
    assert!(!success);
    assert!(stderr.contains("file too large"));

    let (docs, _, _) = run_recall(&config_path, &["documents", "--user", "alice"]);
    assert!(docs.contains("No documents"));
}

#[test]
fn test_search_empty_library_instructs_upload() {
    let (_tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);

    let (stdout, _, success) = run_recall(
        &config_path,
        &["search", "anything at all", "--user", "alice"],
    );
    assert!(success);
    assert!(stdout.contains("empty"));
    assert!(stdout.contains("Upload"));
    assert!(!stdout.contains("Suggestions"));
}

#[test]
fn test_search_no_match_offers_suggestions() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);
    ingest(&config_path, &tmp, "recipes.txt", "alice");

    let (stdout, _, success) = run_recall(
        &config_path,
        &[
            "search",
            "quantum chromodynamics lattice",
            "--user",
            "alice",
            "--min-similarity",
            "0.8",
        ],
    );
    assert!(success, "search failed: {}", stdout);
    assert!(stdout.contains("No stored passages matched"));
    assert!(stdout.contains("Suggestions:"));
    assert!(stdout.contains("chromodynamics lattice"));
}

#[test]
fn test_search_finds_matching_passage() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);
    ingest(&config_path, &tmp, "runbook.md", "alice");
    ingest(&config_path, &tmp, "recipes.txt", "alice");

    let (stdout, _, success) = run_recall(
        &config_path,
        &[
            "search",
            "kubernetes deployment rollout happens in three stages",
            "--user",
            "alice",
            "--min-similarity",
            "0.3",
        ],
    );
    assert!(success, "search failed: {}", stdout);
    assert!(stdout.contains("Found"));
    assert!(stdout.contains("Deployment Runbook"));
    assert!(stdout.contains("Relevant"));
}

#[test]
fn test_search_is_scoped_per_user() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);
    ingest(&config_path, &tmp, "runbook.md", "alice");

    // Bob has no documents — Alice's never leak into his results.
    let (stdout, _, success) = run_recall(
        &config_path,
        &["search", "kubernetes deployment rollout", "--user", "bob"],
    );
    assert!(success);
    assert!(stdout.contains("empty"));

    let (docs, _, _) = run_recall(&config_path, &["documents", "--user", "bob"]);
    assert!(docs.contains("No documents"));
}

#[test]
fn test_get_prints_document_and_chunks() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);
    let id = document_id(&ingest(&config_path, &tmp, "runbook.md", "alice"));

    let (stdout, _, success) = run_recall(&config_path, &["get", &id, "--user", "alice"]);
    assert!(success);
    assert!(stdout.contains("Deployment Runbook"));
    assert!(stdout.contains("--- Chunks ("));
    assert!(stdout.contains("embedded"));
}

#[test]
fn test_get_refuses_other_users_document() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);
    let id = document_id(&ingest(&config_path, &tmp, "runbook.md", "alice"));

    let (_, stderr, success) = run_recall(&config_path, &["get", &id, "--user", "bob"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_delete_removes_document() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);
    let id = document_id(&ingest(&config_path, &tmp, "recipes.txt", "alice"));

    let (stdout, _, success) = run_recall(&config_path, &["delete", &id, "--user", "alice"]);
    assert!(success, "delete failed: {}", stdout);
    assert!(stdout.contains("deleted"));

    let (docs, _, _) = run_recall(&config_path, &["documents", "--user", "alice"]);
    assert!(docs.contains("No documents"));

    // Deleting again reports not found.
    let (_, stderr, success) = run_recall(&config_path, &["delete", &id, "--user", "alice"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_dynamic_threshold_flag_accepted() {
    let (tmp, config_path) = setup_test_env();
    run_recall(&config_path, &["init"]);
    ingest(&config_path, &tmp, "runbook.md", "alice");

    // A short query with dynamic thresholding lowers the cutoff; the call
    // must succeed either way.
    let (stdout, _, success) = run_recall(
        &config_path,
        &[
            "search",
            "kubernetes rollout",
            "--user",
            "alice",
            "--dynamic-threshold",
        ],
    );
    assert!(success, "search failed: {}", stdout);
}
