//! Integration tests for coderun against real toolchains
//!
//! These tests need python3, node, gcc, g++, and a JDK on PATH.
//! Run with: cargo test -p coderun --features integration-tests

#![cfg(feature = "integration-tests")]

use std::fs;

use coderun::{Config, Runner};
use tempfile::TempDir;

mod compiled;
mod interpreted;
mod java;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Runner over the built-in languages, with workspaces under a private root
pub(crate) fn test_runner() -> (TempDir, Runner) {
    let root = tempfile::tempdir().expect("Failed to create workspace root");
    let mut config = Config::default();
    config.workspace_root = Some(root.path().to_path_buf());
    let runner = Runner::new(config).expect("Failed to create runner");
    (root, runner)
}

pub(crate) fn assert_clean(root: &TempDir) {
    let leftovers: Vec<_> = fs::read_dir(root.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "workspaces left behind: {leftovers:?}");
}
