//! E2E Integration tests for linefix
//!
//! Run with: cargo test --test integration
//! Verbose:  TEST_VERBOSE=1 cargo test --test integration -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Test logging macro - prints when TEST_VERBOSE is set
macro_rules! test_log {
    ($level:expr, $($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            eprintln!("[{}] [integration:{}] {}",
                $level,
                line!(),
                format!($($arg)*)
            );
        }
    };
}

fn get_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_linefix"))
}

fn base_command() -> Command {
    let mut cmd = Command::new(get_binary_path());
    cmd.env_remove("LINEFIX_VERBOSE")
        .env_remove("FORCE_COLOR")
        .env("NO_COLOR", "1");
    cmd
}

fn finish(mut cmd: Command) -> (String, String, i32) {
    let output = cmd.output().expect("Failed to run linefix");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    test_log!("OUTPUT", "Exit code: {}", code);
    test_log!("OUTPUT", "Stdout length: {} bytes", stdout.len());
    if !stderr.is_empty() {
        test_log!("STDERR", "{}", stderr);
    }

    (stdout, stderr, code)
}

fn run_linefix_args(args: &[&str]) -> (String, String, i32) {
    test_log!("RUN", "linefix with args: {:?}", args);

    let mut cmd = base_command();
    cmd.args(args);
    finish(cmd)
}

/// Standard tree: a.txt empty, b.txt terminated, c.txt unterminated
fn scenario_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "").unwrap();
    fs::write(temp.path().join("b.txt"), "hello\n").unwrap();
    fs::write(temp.path().join("c.txt"), "hello").unwrap();
    temp
}

fn has_line(output: &str, path: &Path) -> bool {
    let expected = path.display().to_string();
    output.lines().any(|line| line.trim_end() == expected)
}

// ============================================================================
// Scan Tests
// ============================================================================

#[test]
fn test_e2e_scan_reports_affected_files() {
    test_log!("START", "Scan reports files without trailing newline");

    let temp = scenario_tree();
    let root = temp.path();
    let dir_arg = root.to_str().unwrap();
    let (stdout, _stderr, code) = run_linefix_args(&["scan", "--no-config", dir_arg]);

    assert_eq!(code, 0, "Scan should succeed regardless of affected files");
    assert!(stdout.contains("2 file(s) affected"), "stdout: {}", stdout);
    assert!(has_line(&stdout, &root.join("a.txt")));
    assert!(has_line(&stdout, &root.join("c.txt")));
    assert!(!has_line(&stdout, &root.join("b.txt")));

    // Scan never writes
    assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"");
    assert_eq!(fs::read(root.join("c.txt")).unwrap(), b"hello");

    test_log!("END", "Test PASSED");
}

#[test]
fn test_e2e_scan_check_exit_codes() {
    test_log!("START", "scan --check gates on affected files");

    let temp = scenario_tree();
    let dir_arg = temp.path().to_str().unwrap();
    let (_stdout, _stderr, code) = run_linefix_args(&["scan", "--check", "--no-config", dir_arg]);
    assert_eq!(code, 3, "Affected files should exit 3 with --check");

    let clean = TempDir::new().unwrap();
    fs::write(clean.path().join("ok.txt"), "fine\n").unwrap();
    let dir_arg = clean.path().to_str().unwrap();
    let (stdout, _stderr, code) = run_linefix_args(&["scan", "--check", "--no-config", dir_arg]);
    assert_eq!(code, 0, "Clean tree should exit 0 with --check");
    assert!(stdout.contains("0 file(s) affected"));

    test_log!("END", "Test PASSED");
}

#[test]
fn test_e2e_scan_skips_git_directory() {
    test_log!("START", "Scan never inspects .git");

    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join(".git/config"), "[core]").unwrap();
    fs::write(root.join("readme.txt"), "read me").unwrap();

    let dir_arg = root.to_str().unwrap();
    let (stdout, _stderr, code) = run_linefix_args(&["scan", "--no-config", dir_arg]);

    assert_eq!(code, 0);
    assert!(stdout.contains("1 file(s) affected"), "stdout: {}", stdout);
    assert!(has_line(&stdout, &root.join("readme.txt")));
    assert!(!stdout.contains("config"));

    test_log!("END", "Test PASSED");
}

#[test]
fn test_e2e_scan_defaults_to_current_directory() {
    test_log!("START", "Scan without a directory uses the working directory");

    let temp = scenario_tree();
    let mut cmd = base_command();
    cmd.current_dir(temp.path()).args(["scan", "--no-config"]);
    let (stdout, _stderr, code) = finish(cmd);

    assert_eq!(code, 0);
    assert!(stdout.contains("2 file(s) affected"), "stdout: {}", stdout);
    assert!(stdout.contains("c.txt"));

    test_log!("END", "Test PASSED");
}

#[test]
fn test_e2e_exit_code_nonexistent_directory() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("does-not-exist");
    let (_stdout, stderr, code) =
        run_linefix_args(&["scan", "--no-config", missing.to_str().unwrap()]);

    assert_eq!(code, 1, "Missing directory should exit 1");
    assert!(stderr.contains("Failed to enumerate"), "stderr: {}", stderr);
    assert!(stderr.contains("does-not-exist"));
}

// ============================================================================
// Fix Tests
// ============================================================================

#[test]
fn test_e2e_fix_appends_carriage_return() {
    test_log!("START", "Fix appends CR to affected files only");

    let temp = scenario_tree();
    let root = temp.path();
    let dir_arg = root.to_str().unwrap();
    let (stdout, _stderr, code) = run_linefix_args(&["fix", "--no-config", dir_arg]);

    assert_eq!(code, 0);
    assert!(stdout.contains("2 file(s) fixed"), "stdout: {}", stdout);
    assert!(has_line(&stdout, &root.join("a.txt")));
    assert!(has_line(&stdout, &root.join("c.txt")));

    assert_eq!(fs::read(root.join("a.txt")).unwrap(), vec![0x0D]);
    assert_eq!(fs::read(root.join("b.txt")).unwrap(), b"hello\n");
    assert_eq!(fs::read(root.join("c.txt")).unwrap(), b"hello\r");

    test_log!("END", "Test PASSED");
}

#[test]
fn test_e2e_fix_then_scan_is_clean() {
    test_log!("START", "Fix followed by scan reports nothing");

    let temp = scenario_tree();
    fs::create_dir(temp.path().join("nested")).unwrap();
    fs::write(temp.path().join("nested/deep.md"), "# title").unwrap();
    let dir_arg = temp.path().to_str().unwrap();

    let (_stdout, _stderr, code) = run_linefix_args(&["fix", "--no-config", dir_arg]);
    assert_eq!(code, 0);

    let (stdout, _stderr, code) = run_linefix_args(&["scan", "--check", "--no-config", dir_arg]);
    assert_eq!(code, 0, "Nothing should be affected after fix");
    assert!(stdout.contains("0 file(s) affected"));

    test_log!("END", "Test PASSED");
}

#[test]
fn test_e2e_fix_twice_is_stable() {
    let temp = scenario_tree();
    let dir_arg = temp.path().to_str().unwrap();

    run_linefix_args(&["fix", "--no-config", dir_arg]);
    let (stdout, _stderr, code) = run_linefix_args(&["fix", "--no-config", dir_arg]);

    assert_eq!(code, 0);
    assert!(stdout.contains("0 file(s) fixed"));
    assert_eq!(fs::read(temp.path().join("c.txt")).unwrap(), b"hello\r");
}

#[cfg(unix)]
#[test]
fn test_e2e_fix_failure_exit_code() {
    test_log!("START", "Unfixable files are reported and exit 4");

    let temp = TempDir::new().unwrap();
    let root = temp.path();
    std::os::unix::fs::symlink(root.join("missing"), root.join("dangling")).unwrap();
    fs::write(root.join("c.txt"), "hello").unwrap();

    let dir_arg = root.to_str().unwrap();
    let (stdout, _stderr, code) = run_linefix_args(&["fix", "--no-config", dir_arg]);

    assert_eq!(code, 4, "Fix failures should exit 4");
    assert!(stdout.contains("1 file(s) fixed"), "stdout: {}", stdout);
    assert!(stdout.contains("1 file(s) could not be fixed"));
    assert!(stdout.contains("dangling"));
    assert_eq!(fs::read(root.join("c.txt")).unwrap(), b"hello\r");
    assert!(!root.join("missing").exists());

    test_log!("END", "Test PASSED");
}

// ============================================================================
// Output Mode Tests
// ============================================================================

#[test]
fn test_e2e_scan_json_output() {
    let temp = scenario_tree();
    let dir_arg = temp.path().to_str().unwrap();
    let (stdout, _stderr, code) = run_linefix_args(&["scan", "--json", "--no-config", dir_arg]);

    assert_eq!(code, 0);
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(json["command"], "scan");
    assert_eq!(json["status"], "affected");
    assert_eq!(json["files_scanned"], 3);
    assert_eq!(json["affected_count"], 2);

    let files = json["files"].as_array().unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f["path"].as_str().unwrap()).collect();
    assert!(paths[0].ends_with("a.txt"));
    assert!(paths[1].ends_with("c.txt"));
    assert!(files.iter().all(|f| f["status"] == "missing_newline"));
}

#[test]
fn test_e2e_fix_json_output() {
    let temp = scenario_tree();
    let dir_arg = temp.path().to_str().unwrap();
    let (stdout, _stderr, code) = run_linefix_args(&["fix", "--json", "--no-config", dir_arg]);

    assert_eq!(code, 0);
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(json["command"], "fix");
    assert_eq!(json["status"], "fixed");
    assert_eq!(json["fixed_count"], 2);
    assert_eq!(json["failed_count"], 0);
}

#[test]
fn test_e2e_verbose_still_scans() {
    test_log!("START", "Verbose augments output instead of replacing it");

    let temp = scenario_tree();
    let dir_arg = temp.path().to_str().unwrap();
    let (stdout, _stderr, code) = run_linefix_args(&["fix", "-v", "--no-config", dir_arg]);

    assert_eq!(code, 0);
    assert!(stdout.contains("2 file(s) fixed"), "stdout: {}", stdout);
    assert!(stdout.contains("Summary"));
    assert_eq!(fs::read(temp.path().join("c.txt")).unwrap(), b"hello\r");

    test_log!("END", "Test PASSED");
}

#[test]
fn test_e2e_verbose_from_environment() {
    let temp = scenario_tree();
    let mut cmd = base_command();
    cmd.env("LINEFIX_VERBOSE", "1")
        .args(["scan", "--no-config", temp.path().to_str().unwrap()]);
    let (stdout, _stderr, code) = finish(cmd);

    assert_eq!(code, 0);
    assert!(stdout.contains("Summary"), "stdout: {}", stdout);
    assert!(stdout.contains("2 file(s) affected"));
}

#[test]
fn test_e2e_exclude_flag() {
    let temp = scenario_tree();
    fs::write(temp.path().join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
    let dir_arg = temp.path().to_str().unwrap();

    let (stdout, _stderr, code) =
        run_linefix_args(&["scan", "--exclude", "*.png,a.*", "--no-config", dir_arg]);

    assert_eq!(code, 0);
    assert!(stdout.contains("1 file(s) affected"), "stdout: {}", stdout);
    assert!(!stdout.contains("logo.png"));
    assert!(has_line(&stdout, &temp.path().join("c.txt")));
}

#[test]
fn test_e2e_config_file_in_scanned_directory() {
    let temp = scenario_tree();
    fs::write(temp.path().join(".linefixrc"), "exclude = [\"c.txt\", \".linefixrc\"]\n").unwrap();
    let dir_arg = temp.path().to_str().unwrap();

    let (stdout, _stderr, code) = run_linefix_args(&["scan", dir_arg]);

    assert_eq!(code, 0);
    assert!(stdout.contains("1 file(s) affected"), "stdout: {}", stdout);
    assert!(has_line(&stdout, &temp.path().join("a.txt")));
}

// ============================================================================
// Argument Tests
// ============================================================================

#[test]
fn test_e2e_exit_code_invalid_glob() {
    let temp = scenario_tree();
    let dir_arg = temp.path().to_str().unwrap();
    let (_stdout, stderr, code) =
        run_linefix_args(&["scan", "--exclude", "[", "--no-config", dir_arg]);

    assert_eq!(code, 2, "Invalid glob should exit 2");
    assert!(stderr.contains("Invalid glob pattern"));
}

#[test]
fn test_e2e_exit_code_no_subcommand() {
    let (_stdout, _stderr, code) = run_linefix_args(&[]);
    assert_eq!(code, 2);
}

#[test]
fn test_e2e_json_conflicts_with_verbose() {
    let (_stdout, _stderr, code) = run_linefix_args(&["scan", "--json", "--verbose"]);
    assert_eq!(code, 2);
}

#[test]
fn test_e2e_json_with_verbose_environment() {
    for value in ["0", "false", "1"] {
        test_log!("START", "--json with LINEFIX_VERBOSE={}", value);
        let temp = scenario_tree();
        let mut cmd = base_command();
        cmd.env("LINEFIX_VERBOSE", value).args([
            "scan",
            "--json",
            "--no-config",
            temp.path().to_str().unwrap(),
        ]);
        let (stdout, stderr, code) = finish(cmd);

        assert_eq!(code, 0, "LINEFIX_VERBOSE={} stderr: {}", value, stderr);
        let json: serde_json::Value =
            serde_json::from_str(&stdout).expect("stdout must be a single JSON document");
        assert_eq!(json["affected_count"], 2);
        assert!(!stdout.contains("Summary"));
    }
}

#[test]
fn test_e2e_completion_bash() {
    let (stdout, _stderr, code) = run_linefix_args(&["completion", "bash"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("_linefix"), "stdout: {}", stdout);
    assert!(stdout.contains("scan"));

    let (_stdout, _stderr, code) = run_linefix_args(&["completion", "nushell-ish"]);
    assert_eq!(code, 2);
}

#[test]
fn test_e2e_no_progress_on_piped_stderr() {
    let temp = scenario_tree();
    let (_stdout, stderr, code) =
        run_linefix_args(&["scan", "--no-config", temp.path().to_str().unwrap()]);
    assert_eq!(code, 0);
    assert!(!stderr.contains("Scanning"), "stderr: {}", stderr);
}

#[test]
fn test_e2e_verbose_bracketed_paths_printed_verbatim() {
    let temp = TempDir::new().unwrap();
    let docs = temp.path().join("docs");
    fs::create_dir(&docs).unwrap();
    let draft = docs.join("[draft].md");
    fs::write(&draft, "draft").unwrap();
    fs::write(docs.join("[bold]x.md"), "x").unwrap();

    let (stdout, _stderr, code) = run_linefix_args(&[
        "scan",
        "--verbose",
        "--color",
        "always",
        "--no-config",
        temp.path().to_str().unwrap(),
    ]);

    assert_eq!(code, 0);
    let expected = format!("{}: missing trailing newline", draft.display());
    assert!(
        stdout.lines().any(|line| line.trim_end() == expected),
        "stdout: {}",
        stdout
    );
    assert!(has_line(&stdout, &draft));
    assert!(has_line(&stdout, &docs.join("[bold]x.md")));
}

#[test]
fn test_e2e_version() {
    let (stdout, _stderr, code) = run_linefix_args(&["version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));

    let (stdout, _stderr, code) = run_linefix_args(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}
