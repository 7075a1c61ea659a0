mod common;

use futures::StreamExt;
use std::time::Duration;

use common::{harness, harness_with, ids, seed_post};
use tao_feed::config::FeedConfig;
use tao_feed::feed::is_feed_ordered;
use tao_feed::models::PartialFeedFailure;
use tao_feed::AppError;

fn followees(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("f{:02}", i)).collect()
}

#[tokio::test]
async fn test_feed_interleaves_followees_and_own_posts() {
    let h = harness();
    let store = h.store.inner();
    seed_post(store, "b10", "b", 10).await;
    seed_post(store, "b30", "b", 30).await;
    seed_post(store, "c20", "c", 20).await;
    seed_post(store, "a15", "a", 15).await;
    seed_post(store, "a25", "a", 25).await;
    seed_post(store, "stranger", "z", 40).await;

    let feed = h
        .assembler
        .assemble_feed("a", &["b".to_string(), "c".to_string()])
        .await
        .unwrap();

    assert_eq!(ids(&feed.posts), vec!["b30", "a25", "c20", "a15", "b10"]);
    assert!(!feed.is_partial());
    assert!(!feed.fallback);
}

#[tokio::test]
async fn test_twenty_five_followees_issue_three_concurrent_queries() {
    let h = harness();
    h.store.set_query_delay(Some(Duration::from_millis(50))).await;

    let feed = h.assembler.assemble_feed("me", &followees(25)).await.unwrap();

    assert!(feed.is_empty());
    assert_eq!(h.store.query_count(), 3);
    assert_eq!(h.store.max_concurrent_queries(), 3);
}

#[tokio::test]
async fn test_one_failed_chunk_yields_partial_feed() {
    let h = harness();
    let store = h.store.inner();
    seed_post(store, "p1", "f03", 100).await;
    seed_post(store, "p2", "f15", 200).await;
    seed_post(store, "p3", "f22", 300).await;
    h.store.fail_queries_for_author("f15").await;

    let feed = h.assembler.assemble_feed("me", &followees(25)).await.unwrap();

    assert_eq!(ids(&feed.posts), vec!["p3", "p1"]);
    assert_eq!(
        feed.partial_failure,
        Some(PartialFeedFailure {
            failed_chunks: 1,
            total_chunks: 3
        })
    );
}

#[tokio::test]
async fn test_all_chunks_failing_is_unavailable() {
    let h = harness();
    seed_post(h.store.inner(), "p1", "f01", 100).await;
    h.store.fail_all_queries(true);

    let err = h.assembler.assemble_feed("me", &followees(12)).await.unwrap_err();
    assert!(matches!(err, AppError::FeedUnavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_following_nobody_uses_global_recency_feed() {
    let h = harness();
    for i in 0..30 {
        seed_post(h.store.inner(), &format!("p{:02}", i), &format!("u{}", i % 7), i).await;
    }

    let feed = h.assembler.assemble_feed("me", &[]).await.unwrap();

    assert!(feed.fallback);
    assert_eq!(feed.len(), 20);
    assert_eq!(feed.posts[0].id, "p29");
    assert!(is_feed_ordered(&feed.posts));
    assert_eq!(h.store.query_count(), 1);
}

#[tokio::test]
async fn test_feed_is_capped_and_ordered() {
    let h = harness_with(FeedConfig {
        feed_cap: 7,
        ..FeedConfig::default()
    });
    for i in 0..40 {
        seed_post(h.store.inner(), &format!("p{:02}", i), &format!("f{:02}", i % 15), i / 3).await;
    }

    let feed = h.assembler.assemble_feed("me", &followees(15)).await.unwrap();

    assert_eq!(feed.len(), 7);
    assert!(is_feed_ordered(&feed.posts));
    // Equal timestamps fall back to the higher id first.
    assert_eq!(ids(&feed.posts)[..3], ["p39", "p38", "p37"]);
}

#[tokio::test]
async fn test_live_feed_reemits_on_change_and_stops_after_close() {
    let h = harness();
    seed_post(h.store.inner(), "b1", "b", 10).await;

    let mut subscription = h.live.subscribe_feed("a", &["b".to_string()]).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids(&first.posts), vec!["b1"]);

    seed_post(h.store.inner(), "b2", "b", 20).await;
    let second = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids(&second.posts), vec!["b2", "b1"]);

    // Unrelated authors do not change this feed.
    seed_post(h.store.inner(), "z1", "z", 30).await;

    subscription.close();
    seed_post(h.store.inner(), "b3", "b", 40).await;
    assert!(subscription.is_closed());
    assert!(subscription.next().await.is_none());
}

#[tokio::test]
async fn test_live_feed_with_one_failed_chunk_is_partial() {
    let h = harness();
    let store = h.store.inner();
    seed_post(store, "p1", "f03", 100).await;
    seed_post(store, "p2", "f15", 200).await;
    seed_post(store, "p3", "f22", 300).await;
    h.store.fail_queries_for_author("f15").await;

    let mut subscription = h.live.subscribe_feed("me", &followees(25)).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids(&first.posts), vec!["p3", "p1"]);
    assert_eq!(
        first.partial_failure,
        Some(PartialFeedFailure {
            failed_chunks: 1,
            total_chunks: 3
        })
    );
    assert!(!first.fallback);
}

#[tokio::test]
async fn test_live_feed_following_nobody_tracks_recent_posts() {
    let h = harness();
    seed_post(h.store.inner(), "old", "u1", 10).await;

    let mut subscription = h.live.subscribe_feed("me", &[]).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert!(first.fallback);
    assert_eq!(ids(&first.posts), vec!["old"]);

    seed_post(h.store.inner(), "new", "u2", 20).await;
    let second = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert!(second.fallback);
    assert_eq!(ids(&second.posts), vec!["new", "old"]);
}

#[tokio::test]
async fn test_live_feed_without_any_subscription_is_unavailable() {
    let h = harness();
    h.store.fail_all_queries(true);

    let result = h.live.subscribe_feed("a", &["b".to_string()]).await;
    assert!(matches!(result, Err(AppError::FeedUnavailable(_))));
}
