// tests/cli_dispatch_test.rs

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::File;
use std::io::Write;
use tempfile::tempdir;

// 辅助函数，避免重复
fn main_command() -> Command {
    Command::cargo_bin(env!("CARGO_PKG_NAME")).unwrap()
}

// --- 测试基本 CLI 行为 ---

#[test]
fn test_help_flag() {
    let mut cmd = main_command();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("显示此帮助信息并退出"));
}

#[test]
fn test_version_flag() {
    let mut cmd = main_command();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_mode_shows_help() {
    let mut cmd = main_command();
    cmd.assert().failure();
}

#[test]
fn test_conflicting_modes_are_rejected() {
    let mut cmd = main_command();
    cmd.arg("--url")
        .arg("https://example.com/v.mp4")
        .arg("--manifest")
        .arg("m.json");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

// --- 测试核心分发逻辑 ---

#[test]
fn test_missing_batch_file_fails_with_error() {
    let dir = tempdir().unwrap();
    let mut cmd = main_command();
    cmd.arg("--batch-file")
        .arg(dir.path().join("does-not-exist.txt"))
        .arg("--output")
        .arg(dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("程序执行出错"));
}

#[test]
fn test_malformed_manifest_fails_with_error() {
    let dir = tempdir().unwrap();
    let manifest_path = dir.path().join("bad.json");
    let mut file = File::create(&manifest_path).unwrap();
    file.write_all(b"{ not valid json ").unwrap();

    let mut cmd = main_command();
    cmd.arg("--manifest")
        .arg(&manifest_path)
        .arg("--output")
        .arg(dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("程序执行出错"));
}

#[test]
fn test_empty_batch_file_is_not_an_error() {
    let dir = tempdir().unwrap();
    let batch_path = dir.path().join("empty.txt");
    File::create(&batch_path).unwrap();

    let mut cmd = main_command();
    cmd.arg("--batch-file")
        .arg(&batch_path)
        .arg("--output")
        .arg(dir.path());
    // 空批量文件走警告路径，退出码为 0
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("批量文件为空"));
}

#[test]
fn test_quality_must_be_numeric() {
    let mut cmd = main_command();
    cmd.arg("--url")
        .arg("https://example.com/v.mp4")
        .arg("--quality")
        .arg("best");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
