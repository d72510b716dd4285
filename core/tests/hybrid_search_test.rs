mod common;

use std::sync::Arc;

use common::{search_result, FixtureBackend, FixtureReranker};
use weknora_core::search::{HybridSearchRequest, HybridSearcher, QueryType};
use weknora_core::types::MatchType;
use weknora_core::WeKnoraError;

fn request(kb_ids: &[&str]) -> HybridSearchRequest {
    HybridSearchRequest {
        kb_ids: kb_ids.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn empty_query_lists_are_rejected() {
    let searcher = HybridSearcher::new(Arc::new(FixtureBackend::new()), None);
    let err = searcher.search(request(&["k1"])).await.unwrap_err();
    assert!(matches!(err, WeKnoraError::InvalidArgument(_)));
}

#[tokio::test]
async fn shorthand_query_expands_to_both_modes() {
    let backend = FixtureBackend::new()
        .with_results("k1", vec![search_result("c1", "k1", 0.9, MatchType::Embedding)]);
    let searcher = HybridSearcher::new(Arc::new(backend), None);

    let mut req = request(&["k1"]);
    req.query = Some("what is rust".to_string());
    let output = searcher.search(req).await.unwrap();

    assert_eq!(output.search_mode, "hybrid");
    // Both the vector and the keyword triple hit the same chunk; dedupe
    // leaves one.
    assert_eq!(output.results.len(), 1);
}

/// Fan-out + dedupe: the same chunk observed with several scores keeps its
/// maximum; sub-threshold chunks are dropped.
#[tokio::test]
async fn fan_out_dedupes_and_filters() {
    // c1 appears at 0.82 in k1 and 0.71/0.65 in k2; c2 sits below the
    // vector threshold.
    let backend = FixtureBackend::new()
        .with_results(
            "k1",
            vec![
                search_result("c1", "k1", 0.82, MatchType::Embedding),
                search_result("c2", "k1", 0.55, MatchType::Embedding),
            ],
        )
        .with_results(
            "k2",
            vec![
                search_result("c1", "k2", 0.71, MatchType::Embedding),
                search_result("c1", "k2", 0.65, MatchType::Embedding),
            ],
        );
    let searcher = HybridSearcher::new(Arc::new(backend), None);

    let mut req = request(&["k1", "k2"]);
    req.vector_queries = vec!["q1".to_string(), "q2".to_string()];
    req.keyword_queries = vec!["q1".to_string()];
    req.top_k = 2;
    let output = searcher.search(req).await.unwrap();

    assert_eq!(output.results.len(), 1);
    assert_eq!(output.results[0].result.id, "c1");
    assert_eq!(output.results[0].result.score, 0.82);
    assert_eq!(output.results[0].result.match_type, MatchType::Embedding);
}

/// Threshold soundness: every surviving hit satisfies its match-type rule
/// and the min-score floor.
#[tokio::test]
async fn thresholds_are_enforced_per_match_type() {
    let backend = FixtureBackend::new().with_results(
        "k1",
        vec![
            search_result("v-pass", "k1", 0.65, MatchType::Embedding),
            search_result("v-fail", "k1", 0.58, MatchType::Embedding),
            search_result("k-pass", "k1", 0.52, MatchType::Keyword),
            search_result("k-fail", "k1", 0.45, MatchType::Keyword),
            search_result("g-pass", "k1", 0.55, MatchType::Graph),
            search_result("g-fail", "k1", 0.40, MatchType::Graph),
        ],
    );
    let searcher = HybridSearcher::new(Arc::new(backend), None);

    let mut req = request(&["k1"]);
    req.vector_queries = vec!["q".to_string()];
    let output = searcher.search(req).await.unwrap();

    let ids: Vec<&str> = output.results.iter().map(|r| r.result.id.as_str()).collect();
    assert!(ids.contains(&"v-pass"));
    assert!(ids.contains(&"k-pass"));
    assert!(ids.contains(&"g-pass"));
    assert!(!ids.contains(&"v-fail"));
    assert!(!ids.contains(&"k-fail"));
    assert!(!ids.contains(&"g-fail"));
    for hit in &output.results {
        assert!(hit.result.score >= 0.3);
    }
}

/// Sort stability: descending score, then ascending knowledge id on ties.
/// (The vector-before-keyword tie break is covered by the unit tests.)
#[tokio::test]
async fn results_are_sorted_deterministically() {
    let mut tie_a = search_result("ta", "k1", 0.8, MatchType::Embedding);
    tie_a.knowledge_id = "doc-a".to_string();
    let mut tie_b = search_result("tb", "k1", 0.8, MatchType::Embedding);
    tie_b.knowledge_id = "doc-b".to_string();
    let mut tie_c = search_result("tc", "k1", 0.8, MatchType::Keyword);
    tie_c.knowledge_id = "doc-c".to_string();

    let backend = FixtureBackend::new().with_results(
        "k1",
        vec![
            tie_c,
            tie_b,
            tie_a,
            search_result("top", "k1", 0.95, MatchType::Embedding),
            search_result("low", "k1", 0.62, MatchType::Embedding),
        ],
    );
    let searcher = HybridSearcher::new(Arc::new(backend), None);

    let mut req = request(&["k1"]);
    req.vector_queries = vec!["q".to_string()];
    let output = searcher.search(req).await.unwrap();

    let ids: Vec<&str> = output.results.iter().map(|r| r.result.id.as_str()).collect();
    assert_eq!(ids, vec!["top", "ta", "tb", "tc", "low"]);
}

#[tokio::test]
async fn partial_kb_failure_is_swallowed() {
    let backend = FixtureBackend::new()
        .with_results("good", vec![search_result("c1", "good", 0.9, MatchType::Embedding)])
        .with_failing_kb("bad");
    let searcher = HybridSearcher::new(Arc::new(backend), None);

    let mut req = request(&["good", "bad"]);
    req.vector_queries = vec!["q".to_string()];
    let output = searcher.search(req).await.unwrap();
    assert_eq!(output.results.len(), 1);
    assert_eq!(output.kb_counts.get("good"), Some(&1));
}

#[tokio::test]
async fn empty_post_filter_result_is_success() {
    let backend = FixtureBackend::new()
        .with_results("k1", vec![search_result("c1", "k1", 0.1, MatchType::Embedding)]);
    let searcher = HybridSearcher::new(Arc::new(backend), None);

    let mut req = request(&["k1"]);
    req.vector_queries = vec!["q".to_string()];
    let output = searcher.search(req).await.unwrap();
    assert!(output.results.is_empty());
    assert_eq!(output.total_before_filter, 1);
}

#[tokio::test]
async fn rerank_replaces_scores_and_reorders() {
    let backend = FixtureBackend::new().with_results(
        "k1",
        vec![
            search_result("first", "k1", 0.9, MatchType::Embedding),
            search_result("second", "k1", 0.7, MatchType::Embedding),
        ],
    );
    let reranker = FixtureReranker::new(&[("first", 0.4), ("second", 0.95)]);
    let searcher = HybridSearcher::new(Arc::new(backend), Some(Arc::new(reranker)));

    let mut req = request(&["k1"]);
    req.vector_queries = vec!["q".to_string()];
    let output = searcher.search(req).await.unwrap();

    assert_eq!(output.results[0].result.id, "second");
    assert_eq!(output.results[0].result.score, 0.95);
    assert_eq!(output.results[1].result.id, "first");
    assert_eq!(output.results[1].result.score, 0.4);
}

#[tokio::test]
async fn rerank_failure_keeps_original_scores() {
    let backend = FixtureBackend::new()
        .with_results("k1", vec![search_result("c1", "k1", 0.9, MatchType::Embedding)]);
    let searcher =
        HybridSearcher::new(Arc::new(backend), Some(Arc::new(FixtureReranker::failing())));

    let mut req = request(&["k1"]);
    req.vector_queries = vec!["q".to_string()];
    let output = searcher.search(req).await.unwrap();
    assert_eq!(output.results[0].result.score, 0.9);
}

#[tokio::test]
async fn knowledge_id_filter_restricts_documents() {
    let mut in_doc = search_result("in", "k1", 0.9, MatchType::Embedding);
    in_doc.knowledge_id = "doc-wanted".to_string();
    let mut out_doc = search_result("out", "k1", 0.9, MatchType::Embedding);
    out_doc.knowledge_id = "doc-other".to_string();

    let backend = FixtureBackend::new().with_results("k1", vec![in_doc, out_doc]);
    let searcher = HybridSearcher::new(Arc::new(backend), None);

    let mut req = request(&["k1"]);
    req.vector_queries = vec!["q".to_string()];
    req.knowledge_ids = Some(["doc-wanted".to_string()].into_iter().collect());
    let output = searcher.search(req).await.unwrap();

    assert_eq!(output.results.len(), 1);
    assert_eq!(output.results[0].result.id, "in");
    assert_eq!(output.results[0].query_type, QueryType::Vector);
}
