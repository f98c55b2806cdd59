//! Invariant checks over the full pipeline: id stability, change detection
//! idempotence, snippet bounds, score ranges, exclusion, and determinism.

mod helpers;

use chrono::{Duration, Utc};
use helpers::{test_engine, test_engine_with, write_tree, FailingEmbedder, PlainTextExtractor};
use filesense_core::{CancelToken, Engine, EngineConfig};
use std::sync::Arc;
use tempfile::TempDir;

fn dirs() -> (TempDir, TempDir) {
    (TempDir::new().unwrap(), TempDir::new().unwrap())
}

#[test]
fn ids_stay_stable_across_modifications_and_rescans() {
    let (tree, data) = dirs();
    write_tree(tree.path(), &[("a.txt", "first draft"), ("b.txt", "other file")]);
    let engine = test_engine(data.path());
    engine.scan(tree.path(), &CancelToken::new()).unwrap();

    let root = tree.path().canonicalize().unwrap();
    let a_path = root.join("a.txt").to_string_lossy().into_owned();
    let original_id = engine.store().get_file_by_path(&a_path).unwrap().unwrap().id;

    // Modify and rescan: same id, updated hash.
    write_tree(tree.path(), &[("a.txt", "second draft, rather longer than before")]);
    let report = engine.scan(tree.path(), &CancelToken::new()).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(engine.store().get_file_by_path(&a_path).unwrap().unwrap().id, original_id);

    // Delete, rescan (tombstone), restore, rescan: still the same id.
    std::fs::remove_file(root.join("a.txt")).unwrap();
    engine.scan(tree.path(), &CancelToken::new()).unwrap();
    write_tree(tree.path(), &[("a.txt", "back from the dead")]);
    let report = engine.scan(tree.path(), &CancelToken::new()).unwrap();
    assert_eq!(report.added, 1);
    let revived = engine.store().get_file_by_path(&a_path).unwrap().unwrap();
    assert_eq!(revived.id, original_id);
    assert!(!revived.tombstoned);
}

#[test]
fn rescanning_an_unchanged_tree_changes_nothing() {
    let (tree, data) = dirs();
    write_tree(
        tree.path(),
        &[("a.txt", "alpha"), ("b.txt", "beta"), ("sub/c.txt", "gamma")],
    );
    let engine = test_engine(data.path());
    let first = engine.scan(tree.path(), &CancelToken::new()).unwrap();
    assert_eq!(first.added, 3);

    let second = engine.scan(tree.path(), &CancelToken::new()).unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 3);
    assert_eq!(second.tombstoned, 0);
}

#[test]
fn snippets_never_exceed_the_configured_bound() {
    let (tree, data) = dirs();
    let long_text = "word ".repeat(500);
    write_tree(tree.path(), &[("a.txt", &long_text), ("b.txt", "tiny")]);

    let mut config = EngineConfig::default();
    config.snippet_bytes = 64;
    let engine = test_engine_with(data.path(), config);
    engine.scan(tree.path(), &CancelToken::new()).unwrap();

    for file in engine.store().list_live_files().unwrap() {
        let snippet = engine.store().get_snippet(file.id).unwrap().unwrap();
        assert!(snippet.len() <= 64, "snippet of {} is {} bytes", file.path, snippet.len());
    }
}

#[test]
fn factors_stay_in_range_and_query_is_excluded() {
    let (tree, data) = dirs();
    write_tree(
        tree.path(),
        &[
            ("a.txt", "alpha pipeline report"),
            ("b.txt", "beta pipeline report"),
            ("c.txt", "gamma rocks geology"),
            ("d.txt", "delta pipeline notes"),
        ],
    );
    let engine = test_engine(data.path());
    engine.scan(tree.path(), &CancelToken::new()).unwrap();
    let root = tree.path().canonicalize().unwrap();
    let a_path = root.join("a.txt").to_string_lossy().into_owned();

    // Mix in activity and co-access so every factor is exercised.
    let t0 = Utc::now();
    engine.log_activity_at(&a_path, t0).unwrap();
    engine.log_activity_at(&root.join("b.txt").to_string_lossy(), t0 + Duration::seconds(3)).unwrap();
    engine.log_activity_at(&root.join("d.txt").to_string_lossy(), t0 + Duration::seconds(9)).unwrap();

    let recs = engine.recommend_at(&a_path, 3, t0 + Duration::seconds(20)).unwrap();
    assert!(!recs.is_empty());
    assert!(recs.len() <= 3);

    let weights = recs[0].weights;
    let cap = weights.semantic + weights.recency + weights.cooccurrence;
    for rec in &recs {
        assert!(!rec.path.ends_with("a.txt"), "query must not recommend itself");
        for factor in [rec.factors.semantic, rec.factors.recency, rec.factors.cooccurrence] {
            assert!((0.0..=1.0).contains(&factor), "factor out of range: {factor}");
        }
        assert!(rec.final_score >= 0.0 && rec.final_score <= cap);
    }

    // Sorted by final score, descending.
    for pair in recs.windows(2) {
        assert!(pair[0].final_score >= pair[1].final_score);
    }
}

#[test]
fn identical_inputs_rank_identically() {
    let (tree, data) = dirs();
    write_tree(
        tree.path(),
        &[("a.txt", "alpha pipeline"), ("b.txt", "beta pipeline"), ("c.txt", "gamma rocks")],
    );
    let engine = test_engine(data.path());
    engine.scan(tree.path(), &CancelToken::new()).unwrap();
    let root = tree.path().canonicalize().unwrap();
    let a_path = root.join("a.txt").to_string_lossy().into_owned();

    let now = Utc::now();
    let first = engine.recommend_at(&a_path, 5, now).unwrap();
    let second = engine.recommend_at(&a_path, 5, now).unwrap();

    assert_eq!(first.len(), second.len());
    for (x, y) in first.iter().zip(second.iter()) {
        assert_eq!(x.path, y.path);
        assert_eq!(x.final_score, y.final_score);
        assert_eq!(x.factors.semantic, y.factors.semantic);
        assert_eq!(x.factors.recency, y.factors.recency);
        assert_eq!(x.factors.cooccurrence, y.factors.cooccurrence);
    }
}

#[test]
fn embedder_failures_are_counted_never_fatal() {
    let (tree, data) = dirs();
    write_tree(tree.path(), &[("a.txt", "alpha"), ("b.txt", "beta")]);

    let mut config = EngineConfig::default();
    config.data_dir = data.path().to_path_buf();
    config.dim = helpers::TEST_DIM;
    config.allowed_extensions = ["txt".to_string()].into_iter().collect();
    let engine = Engine::new(
        config,
        Arc::new(PlainTextExtractor),
        Arc::new(FailingEmbedder { dim: helpers::TEST_DIM }),
    )
    .unwrap();

    let report = engine.scan(tree.path(), &CancelToken::new()).unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.failures, 2);

    // Snippets land even when embeddings do not.
    let health = engine.health().unwrap();
    assert_eq!(health.n_files, 2);
    assert_eq!(health.n_embedded, 0);
    for file in engine.store().list_live_files().unwrap() {
        assert!(engine.store().get_snippet(file.id).unwrap().is_some());
        assert!(engine.store().get_embedding(file.id).unwrap().is_none());
    }
}

#[test]
fn unembedded_query_still_ranks_on_activity_signals() {
    let (tree, data) = dirs();
    write_tree(tree.path(), &[("a.txt", "alpha"), ("b.txt", "beta")]);

    let mut config = EngineConfig::default();
    config.data_dir = data.path().to_path_buf();
    config.dim = helpers::TEST_DIM;
    config.allowed_extensions = ["txt".to_string()].into_iter().collect();
    let engine = Engine::new(
        config,
        Arc::new(PlainTextExtractor),
        Arc::new(FailingEmbedder { dim: helpers::TEST_DIM }),
    )
    .unwrap();
    engine.scan(tree.path(), &CancelToken::new()).unwrap();
    let root = tree.path().canonicalize().unwrap();
    let a_path = root.join("a.txt").to_string_lossy().into_owned();
    let b_path = root.join("b.txt").to_string_lossy().into_owned();

    // Co-access builds the only candidate edge; semantics are unavailable.
    let t0 = Utc::now();
    engine.log_activity_at(&a_path, t0).unwrap();
    engine.log_activity_at(&b_path, t0 + Duration::seconds(2)).unwrap();

    let recs = engine.recommend_at(&a_path, 5, t0 + Duration::seconds(10)).unwrap();
    assert_eq!(recs.len(), 1);
    assert!(recs[0].path.ends_with("b.txt"));
    assert_eq!(recs[0].factors.semantic, 0.0);
    assert!(recs[0].factors.cooccurrence > 0.0);
}
