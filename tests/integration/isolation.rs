//! Fragment failure isolation and report structure.

use std::sync::atomic::Ordering;

use tempfile::TempDir;

use docforge::scheduler::{Engine, GenerateOptions};
use docforge::spec::DocSpec;

use crate::common::{param, test_registry, three_fragment_spec};

#[tokio::test]
async fn failing_fragment_does_not_abort_siblings() {
    let dir = TempDir::new().unwrap();
    three_fragment_spec(dir.path());
    let spec = DocSpec::load(dir.path()).unwrap();
    let (registry, parser, _fetcher) = test_registry();
    parser.fail_fragment("detail");
    let engine = Engine::new(registry);
    let options = GenerateOptions::default();

    let batch = engine
        .generate(&spec, vec![param("X1")], &options, None)
        .await
        .unwrap();

    // The run as a whole is failed, but the sibling succeeded and its
    // cached context was persisted.
    assert!(batch.is_failed());
    assert_eq!(parser.generation_count("summary"), 1);
    assert!(dir.path().join("gen/X1/hash/root_summary.ctx").exists());
    assert!(!dir.path().join("gen/X1/hash/root_detail.ctx").exists());

    // Report shape: {"X1": {"detail": (summary, detail)}}.
    let failures = batch.report.for_document("X1").unwrap();
    assert_eq!(failures.len(), 1);
    let failure = failures.get("detail").unwrap();
    assert!(failure.summary.contains("instrumented failure"));
    assert!(!failure.detail.is_empty());

    // The document still rendered, with the failed subtree omitted.
    let outcome = &batch.outcomes[0];
    let output = std::fs::read_to_string(outcome.output_path.as_ref().unwrap()).unwrap();
    assert!(output.contains("S=summary:X1"));
    assert!(!output.contains("D="));
}

#[tokio::test]
async fn fixed_fragment_reuses_sibling_caches() {
    let dir = TempDir::new().unwrap();
    three_fragment_spec(dir.path());
    let spec = DocSpec::load(dir.path()).unwrap();
    let (registry, parser, _fetcher) = test_registry();
    let flag = parser.fail_fragment("detail");
    let engine = Engine::new(registry);
    let options = GenerateOptions::default();

    let first = engine
        .generate(&spec, vec![param("X1")], &options, None)
        .await
        .unwrap();
    assert!(first.is_failed());

    // "Fix" the failing logic and re-run: the sibling's context is
    // reused verbatim, only the fixed fragment is computed.
    flag.store(false, Ordering::SeqCst);
    let second = engine
        .generate(&spec, vec![param("X1")], &options, None)
        .await
        .unwrap();

    assert!(!second.is_failed());
    assert_eq!(parser.generation_count("summary"), 1);
    assert_eq!(parser.generation_count("detail"), 1);

    let output = std::fs::read_to_string(second.outcomes[0].output_path.as_ref().unwrap()).unwrap();
    assert!(output.contains("S=summary:X1"));
    assert!(output.contains("D=detail:X1"));
}

#[tokio::test]
async fn root_failure_fails_the_document_without_rendering() {
    let dir = TempDir::new().unwrap();
    three_fragment_spec(dir.path());
    // Give the root its own (failing) source unit.
    std::fs::write(dir.path().join("src/root.json"), "{}").unwrap();
    let spec = DocSpec::load(dir.path()).unwrap();
    let (registry, parser, _fetcher) = test_registry();
    parser.fail_fragment("root");
    let engine = Engine::new(registry);

    let batch = engine
        .generate(&spec, vec![param("X1")], &GenerateOptions::default(), None)
        .await
        .unwrap();

    assert!(batch.is_failed());
    let outcome = &batch.outcomes[0];
    assert_eq!(
        outcome.state,
        docforge::core::report::GenerationState::Failed
    );
    assert!(outcome.output_path.is_none());
}

#[tokio::test]
async fn fetch_failure_is_fragment_scoped() {
    let dir = TempDir::new().unwrap();
    three_fragment_spec(dir.path());
    let spec = DocSpec::load(dir.path()).unwrap();
    let (registry, _parser, fetcher) = test_registry();
    fetcher.failing.store(true, Ordering::SeqCst);
    let engine = Engine::new(registry);

    let batch = engine
        .generate(&spec, vec![param("X1")], &GenerateOptions::default(), None)
        .await
        .unwrap();

    assert!(batch.is_failed());
    let failures = batch.report.for_document("X1").unwrap();
    // Both leaves share the failing fetcher; each failure is recorded
    // under its own fragment name.
    assert!(failures.get("summary").unwrap().summary.contains("Data fetch failed"));
    assert!(failures.get("detail").unwrap().summary.contains("Data fetch failed"));
}
