//! Debug mode recording and standalone replay.

use tempfile::TempDir;

use docforge::debug::{read_records, replay};
use docforge::scheduler::{Engine, GenerateOptions};
use docforge::spec::DocSpec;

use crate::common::{param, test_registry, three_fragment_spec};

fn debug_options() -> GenerateOptions {
    GenerateOptions {
        debug_mode: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn failure_in_debug_mode_writes_a_record() {
    let dir = TempDir::new().unwrap();
    let spec_dir = dir.path().join("report");
    std::fs::create_dir_all(&spec_dir).unwrap();
    three_fragment_spec(&spec_dir);
    let spec = DocSpec::load(&spec_dir).unwrap();
    let (registry, parser, _fetcher) = test_registry();
    parser.fail_fragment("detail");
    let engine = Engine::new(registry);

    let batch = engine
        .generate(&spec, vec![param("X1")], &debug_options(), None)
        .await
        .unwrap();
    assert!(batch.is_failed());

    // The log lives in the shared meta dir beside the spec directory.
    let log = dir.path().join("_meta/debug_log.jsonl");
    let records = read_records(&log).unwrap();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.document, "X1");
    assert_eq!(record.fragment_path, "root.detail");
    assert_eq!(record.parameter, param("X1"));
    // The triple is complete: data was fetched before generation failed.
    assert!(record.data.is_object());
    assert!(record.metadata.contains_key("fragment_name"));
}

#[tokio::test]
async fn replayed_record_reproduces_the_error() {
    let dir = TempDir::new().unwrap();
    let spec_dir = dir.path().join("report");
    std::fs::create_dir_all(&spec_dir).unwrap();
    three_fragment_spec(&spec_dir);
    let spec = DocSpec::load(&spec_dir).unwrap();
    let (registry, parser, _fetcher) = test_registry();
    parser.fail_fragment("detail");
    let engine = Engine::new(registry.clone());

    engine
        .generate(&spec, vec![param("X1")], &debug_options(), None)
        .await
        .unwrap();

    let log = dir.path().join("_meta/debug_log.jsonl");
    let records = read_records(&log).unwrap();

    // Feeding the recorded triple straight back into the executor's
    // generation stage reproduces the same failure, with no other run
    // state involved.
    let err = replay(&registry, &records[0]).await.unwrap_err();
    assert!(err.to_string().contains("instrumented failure in 'detail'"));
}

#[tokio::test]
async fn debug_mode_executes_sequentially_in_pre_order() {
    let dir = TempDir::new().unwrap();
    let spec_dir = dir.path().join("report");
    std::fs::create_dir_all(&spec_dir).unwrap();
    three_fragment_spec(&spec_dir);
    let spec = DocSpec::load(&spec_dir).unwrap();
    let (registry, parser, _fetcher) = test_registry();
    // Both leaves fail: the records must appear in pre-order, proving
    // sequential execution.
    parser.fail_fragment("summary");
    parser.fail_fragment("detail");
    let engine = Engine::new(registry);

    engine
        .generate(&spec, vec![param("X1")], &debug_options(), None)
        .await
        .unwrap();

    let log = dir.path().join("_meta/debug_log.jsonl");
    let records = read_records(&log).unwrap();
    let paths: Vec<&str> = records.iter().map(|r| r.fragment_path.as_str()).collect();
    assert_eq!(paths, vec!["root.summary", "root.detail"]);
}

#[tokio::test]
async fn no_record_without_debug_mode() {
    let dir = TempDir::new().unwrap();
    let spec_dir = dir.path().join("report");
    std::fs::create_dir_all(&spec_dir).unwrap();
    three_fragment_spec(&spec_dir);
    let spec = DocSpec::load(&spec_dir).unwrap();
    let (registry, parser, _fetcher) = test_registry();
    parser.fail_fragment("detail");
    let engine = Engine::new(registry);

    engine
        .generate(
            &spec,
            vec![param("X1")],
            &GenerateOptions::default(),
            None,
        )
        .await
        .unwrap();

    assert!(!dir.path().join("_meta/debug_log.jsonl").exists());
}
