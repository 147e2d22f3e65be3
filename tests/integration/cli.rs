//! Binary-level checks of the CLI using only built-in collaborators.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use crate::common::build_spec;

/// A spec that only needs built-ins: passthrough parser plus a constant
/// fetcher declared at the document level.
fn builtin_spec(dir: &std::path::Path) {
    build_spec(
        dir,
        r#"
doc_name = "report"
main_template = "root.txt"

[metadata]
source_parser = "passthrough"
data_fetchers = { type = "constant", name = "rows", value = { total = 42 } }
"#,
        &[
            (
                "root.txt",
                "DOC {{ param.id }}\n{% include \"summary.txt\" %}\n{% include \"footer.txt\" %}\n",
            ),
            ("summary.txt", "S={{ data.root.summary.data.rows.total }}"),
            // Purely presentational: no source unit, empty context.
            ("footer.txt", "FOOTER"),
        ],
        &[("summary.json", "{}")],
    );
}

#[test]
fn tree_command_prints_hierarchy() {
    let dir = TempDir::new().unwrap();
    builtin_spec(dir.path());

    Command::cargo_bin("docforge")
        .unwrap()
        .args(["tree", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("root"))
        .stdout(predicate::str::contains("summary"));
}

#[test]
fn generate_produces_an_artifact() {
    let dir = TempDir::new().unwrap();
    builtin_spec(dir.path());

    Command::cargo_bin("docforge")
        .unwrap()
        .args([
            "generate",
            dir.path().to_str().unwrap(),
            "--param",
            "id=X1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("done"));

    let output = std::fs::read_to_string(dir.path().join("gen/X1/out/report_X1.txt")).unwrap();
    assert!(output.contains("DOC X1"));
    assert!(output.contains("S=42"));
    assert!(output.contains("FOOTER"));
}

#[test]
fn generate_without_params_fails() {
    let dir = TempDir::new().unwrap();
    builtin_spec(dir.path());

    Command::cargo_bin("docforge")
        .unwrap()
        .args(["generate", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--param"));
}

#[test]
fn generate_unknown_fragment_fails_with_report() {
    let dir = TempDir::new().unwrap();
    builtin_spec(dir.path());

    Command::cargo_bin("docforge")
        .unwrap()
        .args([
            "generate",
            dir.path().to_str().unwrap(),
            "--param",
            "id=X1",
            "--fragment",
            "ghost",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn generate_partial_labels_output() {
    let dir = TempDir::new().unwrap();
    builtin_spec(dir.path());

    Command::cargo_bin("docforge")
        .unwrap()
        .args([
            "generate",
            dir.path().to_str().unwrap(),
            "--param",
            "id=X1",
            "--fragment",
            "summary",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("partial"));

    let path = dir.path().join("gen/X1/out/report_X1-partial.txt");
    let output = std::fs::read_to_string(path).unwrap();
    assert!(output.contains("S=42"));
    assert!(!output.contains("FOOTER"));
}
