//! Merge determinism under shuffled completion order.

use std::sync::atomic::Ordering;

use tempfile::TempDir;

use docforge::scheduler::{Engine, GenerateOptions};
use docforge::spec::DocSpec;

use crate::common::{build_spec, param, test_registry};

/// A wide tree so concurrent completion order actually varies.
fn wide_spec(dir: &std::path::Path) {
    let mut root = String::from("ROOT\n");
    let mut templates: Vec<(String, String)> = Vec::new();
    let mut sources: Vec<(String, String)> = Vec::new();
    for name in ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"] {
        root.push_str(&format!("{{% include \"{name}.txt\" %}}\n"));
        templates.push((
            format!("{name}.txt"),
            format!("{name}={{{{ data.root.{name}.value }}}}\n"),
        ));
        sources.push((format!("{name}.json"), "{}".to_string()));
    }
    let template_refs: Vec<(&str, &str)> = std::iter::once(("root.txt", root.as_str()))
        .chain(templates.iter().map(|(n, c)| (n.as_str(), c.as_str())))
        .collect();
    let source_refs: Vec<(&str, &str)> = sources
        .iter()
        .map(|(n, c)| (n.as_str(), c.as_str()))
        .collect();

    build_spec(
        dir,
        r#"
doc_name = "wide"
main_template = "root.txt"

[metadata]
source_parser = "test"
data_fetchers = { type = "test" }
"#,
        &template_refs,
        &source_refs,
    );
}

#[tokio::test]
async fn merged_output_is_identical_across_completion_orders() {
    let dir = TempDir::new().unwrap();
    wide_spec(dir.path());
    let spec = DocSpec::load(dir.path()).unwrap();

    let mut rendered: Vec<String> = Vec::new();
    for workers in [1, 2, 6] {
        let (registry, parser, _fetcher) = test_registry();
        // Per-fragment pseudo-random delays shuffle completion order.
        parser.delay_ms.store(15, Ordering::SeqCst);
        let engine = Engine::new(registry);
        let options = GenerateOptions {
            fragment_workers: workers,
            skip_unchanged: Some(false),
            ..Default::default()
        };

        let batch = engine
            .generate(&spec, vec![param("X1")], &options, None)
            .await
            .unwrap();
        assert!(!batch.is_failed());
        let output =
            std::fs::read_to_string(batch.outcomes[0].output_path.as_ref().unwrap()).unwrap();
        rendered.push(output);
    }

    assert_eq!(rendered[0], rendered[1]);
    assert_eq!(rendered[1], rendered[2]);
}

#[tokio::test]
async fn batch_outcomes_preserve_input_order() {
    let dir = TempDir::new().unwrap();
    wide_spec(dir.path());
    let spec = DocSpec::load(dir.path()).unwrap();
    let (registry, parser, _fetcher) = test_registry();
    parser.delay_ms.store(10, Ordering::SeqCst);
    let engine = Engine::new(registry);
    let options = GenerateOptions {
        document_workers: 3,
        ..Default::default()
    };

    let params = vec![param("A"), param("B"), param("C")];
    let batch = engine.generate(&spec, params, &options, None).await.unwrap();

    let documents: Vec<&str> = batch.outcomes.iter().map(|o| o.document.as_str()).collect();
    assert_eq!(documents, vec!["A", "B", "C"]);
}
