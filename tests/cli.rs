//! CLI test cases.
//!
//! Most of these run without Poppler or Tesseract. Tests that need the real
//! tools are ignored by default.

use std::{fs, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// A PDF with two blank pages.
static TWO_PAGE_PDF: &str = "tests/fixtures/two_pages.pdf";

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("pdf2text").unwrap();
    // Don't let the developer's environment pick engines for us.
    cmd.env_remove("PDF2TEXT_TESSERACT")
        .env_remove("PDF2TEXT_POPPLER")
        .arg("--ui")
        .arg("plain");
    cmd
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_subcommand_help_lists_work_flags() {
    cmd()
        .args(["batch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--chunk-size"))
        .stdout(predicate::str::contains("--parallel"))
        .stdout(predicate::str::contains("--tesseract-path"));
}

#[test]
fn test_bogus_tesseract_path_is_reported() {
    cmd()
        .arg("convert")
        .arg(TWO_PAGE_PDF)
        .args(["--tesseract-path", "/nonexistent/bin/tesseract"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not available"));
}

#[test]
fn test_bogus_tesseract_env_var_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    cmd()
        .env("PDF2TEXT_TESSERACT", "/nonexistent/bin/tesseract")
        .arg("batch")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("not available"));
}

#[test]
fn test_invalid_dpi_is_rejected() {
    cmd()
        .args(["convert", TWO_PAGE_PDF, "--dpi", "0"])
        .assert()
        .failure();
}

#[test]
#[ignore = "Needs poppler-utils and tesseract installed"]
fn test_convert_two_page_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.txt");
    cmd()
        .arg("convert")
        .arg(TWO_PAGE_PDF)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();
    let text = fs::read_to_string(&output).unwrap();
    assert!(text.starts_with("--- Page 1 ---\n"));
    assert!(text.contains("\n--- Page 2 ---\n"));
}

#[test]
#[ignore = "Needs poppler-utils and tesseract installed"]
fn test_convert_concurrently_with_enhancement() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.txt");
    for mode in ["processes", "threads"] {
        cmd()
            .arg("convert")
            .arg(TWO_PAGE_PDF)
            .arg("-o")
            .arg(&output)
            .args(["--mode", mode, "--enhance", "-j", "2"])
            .assert()
            .success();
        let text = fs::read_to_string(&output).unwrap();
        assert!(text.contains("--- Page 2 ---"));
    }
}

#[test]
#[ignore = "Needs poppler-utils and tesseract installed"]
fn test_batch_with_summary() {
    let input = tempfile::tempdir().unwrap();
    fs::copy(TWO_PAGE_PDF, input.path().join("a.pdf")).unwrap();
    fs::write(input.path().join("broken.pdf"), b"not a pdf").unwrap();
    let output = tempfile::tempdir().unwrap();
    let summary = output.path().join("summary.json");
    cmd()
        .arg("batch")
        .arg(input.path())
        .arg("-o")
        .arg(output.path())
        .arg("--summary")
        .arg(&summary)
        .arg("--parallel")
        .assert()
        .success();
    assert!(output.path().join("a.txt").exists());
    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(summary["processed"], 1);
    assert_eq!(summary["total"], 2);
}

#[test]
#[ignore = "Needs poppler-utils and tesseract installed"]
fn test_empty_batch_exits_with_2() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    cmd()
        .arg("batch")
        .arg(input.path())
        .arg("-o")
        .arg(output.path())
        .assert()
        .code(2);
}
