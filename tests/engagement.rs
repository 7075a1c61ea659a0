mod common;

use std::time::Duration;

use common::{harness, seed_post, Harness};
use tao_feed::engagement::{FeedSession, SyncState};
use tao_feed::models::{FeedSnapshot, NewPost, NotificationEvent, Post};
use tao_feed::AppError;

fn session_for(viewer: &str, posts: Vec<Post>) -> FeedSession {
    FeedSession::new(FeedSnapshot {
        posts,
        ..FeedSnapshot::empty(viewer)
    })
}

async fn create_post(h: &Harness, author: &str, image: bool) -> Post {
    h.content
        .create_post(
            author,
            NewPost {
                caption: "post".to_string(),
                image: if image { vec![0xFF, 0xD8, 0xFF] } else { vec![] },
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_like_twice_equals_like_once() {
    let h = harness();
    let post = seed_post(h.store.inner(), "p1", "author", 10).await;
    let session = session_for("viewer", vec![post]);

    h.engagement.like(&session, "p1", "viewer").await.unwrap();
    let after_one = h.content.get_post("p1").await.unwrap().likes;
    h.engagement.like(&session, "p1", "viewer").await.unwrap();
    let after_two = h.content.get_post("p1").await.unwrap().likes;

    assert_eq!(after_one, after_two);
    assert_eq!(after_two.len(), 1);

    h.engagement.unlike(&session, "p1", "viewer").await.unwrap();
    h.engagement.unlike(&session, "p1", "viewer").await.unwrap();
    assert!(h.content.get_post("p1").await.unwrap().likes.is_empty());
    assert!(!session.snapshot().await.post("p1").unwrap().is_liked_by("viewer"));
}

#[tokio::test]
async fn test_failed_like_restores_like_set() {
    let h = harness();
    let mut post = seed_post(h.store.inner(), "p1", "author", 10).await;
    post.likes.insert("someone".to_string());
    let before = post.likes.clone();
    let session = session_for("viewer", vec![post]);
    h.store.fail_writes("array_add").await;

    let err = h.engagement.like(&session, "p1", "viewer").await.unwrap_err();

    assert!(matches!(err, AppError::OptimisticWriteFailed(_)));
    assert_eq!(session.snapshot().await.post("p1").unwrap().likes, before);
    assert_eq!(session.like_state("p1", "viewer").await, SyncState::Synced);
}

#[tokio::test]
async fn test_timed_out_like_is_reverted() {
    let mut config = tao_feed::config::FeedConfig::default();
    config.write_timeout = Duration::from_millis(20);
    let h = common::harness_with(config);
    let post = seed_post(h.store.inner(), "p1", "author", 10).await;
    let session = session_for("viewer", vec![post]);
    h.store.set_write_delay(Some(Duration::from_millis(200))).await;

    let err = h.engagement.like(&session, "p1", "viewer").await.unwrap_err();

    assert!(matches!(err, AppError::OptimisticWriteFailed(_)));
    assert!(!session.snapshot().await.post("p1").unwrap().is_liked_by("viewer"));
}

#[tokio::test]
async fn test_double_tap_issues_one_write() {
    let h = harness();
    let post = seed_post(h.store.inner(), "p1", "author", 10).await;
    let session = session_for("viewer", vec![post]);
    h.store.set_write_delay(Some(Duration::from_millis(50))).await;

    let (first, second) = tokio::join!(
        h.engagement.like(&session, "p1", "viewer"),
        h.engagement.like(&session, "p1", "viewer"),
    );
    first.unwrap();
    second.unwrap();

    let writes = h.store.write_log().await;
    assert_eq!(writes, vec!["array_add:posts/p1".to_string()]);
    assert_eq!(h.engagement.stats().snapshot().writes_coalesced, 1);
    assert_eq!(session.like_state("p1", "viewer").await, SyncState::Synced);
    assert!(session.snapshot().await.post("p1").unwrap().is_liked_by("viewer"));
}

#[tokio::test]
async fn test_like_is_visible_before_write_completes() {
    let h = harness();
    let post = seed_post(h.store.inner(), "p1", "author", 10).await;
    let session = session_for("viewer", vec![post]);
    h.store.set_write_delay(Some(Duration::from_millis(100))).await;

    let like = h.engagement.like(&session, "p1", "viewer");
    let observe = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let snapshot = session.snapshot().await;
        let state = session.like_state("p1", "viewer").await;
        (snapshot, state)
    };
    let (result, (snapshot, state)) = tokio::join!(like, observe);

    result.unwrap();
    assert!(snapshot.post("p1").unwrap().is_liked_by("viewer"));
    assert_eq!(state, SyncState::PendingApply);
}

#[tokio::test]
async fn test_comment_increment_failure_leaves_bounded_undercount() {
    let h = harness();
    let post = create_post(&h, "author", false).await;
    let session = session_for("viewer", vec![post.clone()]);

    h.engagement.add_comment(&session, &post.id, "viewer", "first").await.unwrap();
    h.store.fail_writes("increment").await;
    let second = h
        .engagement
        .add_comment(&session, &post.id, "viewer", "second")
        .await
        .unwrap();

    assert_eq!(h.content.list_comments(&post.id, None).await.unwrap().len(), 2);
    assert_eq!(h.content.get_comment(&second.id).await.unwrap().text, "second");
    assert_eq!(h.content.get_post(&post.id).await.unwrap().comment_count, 1);
    assert_eq!(session.snapshot().await.post(&post.id).unwrap().comment_count, 1);
    assert_eq!(session.comment_count_state(&post.id).await, SyncState::Synced);
    assert_eq!(h.engagement.stats().comment_count_drift(), 1);

    h.store.heal_writes().await;
    assert_eq!(h.engagement.repair_comment_count(&post.id).await.unwrap(), 2);
    assert_eq!(h.content.get_post(&post.id).await.unwrap().comment_count, 2);
}

#[tokio::test]
async fn test_comment_on_missing_post_is_not_found() {
    let h = harness();
    let session = FeedSession::empty("viewer");

    let err = h
        .engagement
        .add_comment(&session, "gone", "viewer", "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EntityNotFound(_)));
    assert!(h.store.write_log().await.is_empty());
}

#[tokio::test]
async fn test_delete_post_cascades_in_order() {
    let h = harness();
    let post = create_post(&h, "author", true).await;
    let image_url = post.image_url.clone().unwrap();
    let session = session_for("author", vec![post.clone()]);
    let c1 = h.engagement.add_comment(&session, &post.id, "a", "one").await.unwrap();
    let c2 = h.engagement.add_comment(&session, &post.id, "b", "two").await.unwrap();
    h.objects.set_fail_deletes(true);

    h.engagement.delete_post(&session, &post.id, "author").await.unwrap();

    let log = h.store.write_log().await;
    let batch = log.iter().position(|w| w.starts_with("batch[")).unwrap();
    let post_delete = log
        .iter()
        .position(|w| w == &format!("delete:posts/{}", post.id))
        .unwrap();
    assert!(batch < post_delete);
    assert!(log[batch].contains(&format!("delete:comments/{}", c1.id)));
    assert!(log[batch].contains(&format!("delete:comments/{}", c2.id)));

    // Image delete failed and was swallowed; the blob is orphaned.
    assert!(h.objects.contains(&image_url).await);

    assert!(matches!(h.content.get_post(&post.id).await, Err(AppError::EntityNotFound(_))));
    assert!(matches!(h.content.get_comment(&c1.id).await, Err(AppError::EntityNotFound(_))));
    assert!(h.content.list_comments(&post.id, None).await.unwrap().is_empty());
    assert!(session.snapshot().await.post(&post.id).is_none());
}

#[tokio::test]
async fn test_failed_comment_batch_keeps_post() {
    let h = harness();
    let post = create_post(&h, "author", false).await;
    let session = session_for("author", vec![post.clone()]);
    h.engagement.add_comment(&session, &post.id, "a", "one").await.unwrap();
    h.store.fail_writes("batch").await;

    assert!(h.engagement.delete_post(&session, &post.id, "author").await.is_err());
    assert!(h.content.get_post(&post.id).await.is_ok());
    assert_eq!(h.content.list_comments(&post.id, None).await.unwrap().len(), 1);
    assert!(session.snapshot().await.post(&post.id).is_some());
}

#[tokio::test]
async fn test_non_owner_delete_is_forbidden() {
    let h = harness();
    let post = create_post(&h, "author", false).await;
    let session = session_for("intruder", vec![post.clone()]);

    let err = h
        .engagement
        .delete_post(&session, &post.id, "intruder")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Forbidden(_)));
    assert!(h.content.get_post(&post.id).await.is_ok());
    assert!(session.snapshot().await.post(&post.id).is_some());
}

#[tokio::test]
async fn test_notifications_are_dispatched() {
    let mut h = harness();
    let post = create_post(&h, "author", false).await;
    let session = session_for("fan", vec![post.clone()]);

    h.engagement.like(&session, &post.id, "fan").await.unwrap();
    h.engagement.add_comment(&session, &post.id, "fan", "wow").await.unwrap();
    // Self-engagement is not notified.
    let own = session_for("author", vec![post.clone()]);
    h.engagement.like(&own, &post.id, "author").await.unwrap();

    let liked = h.deliveries.recv().await.unwrap();
    assert_eq!(liked.target_user, "author");
    assert!(matches!(liked.event, NotificationEvent::PostLiked { .. }));
    let commented = h.deliveries.recv().await.unwrap();
    assert!(matches!(commented.event, NotificationEvent::PostCommented { .. }));

    let extra = tokio::time::timeout(Duration::from_millis(50), h.deliveries.recv()).await;
    assert!(extra.is_err());
}

#[tokio::test]
async fn test_reconcile_keeps_in_flight_like() {
    let h = harness();
    let post = seed_post(h.store.inner(), "p1", "author", 10).await;
    let session = session_for("viewer", vec![post.clone()]);
    h.store.set_write_delay(Some(Duration::from_millis(80))).await;

    let like = h.engagement.like(&session, "p1", "viewer");
    let reconcile = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let server = FeedSnapshot {
            posts: vec![post.clone()],
            ..FeedSnapshot::empty("viewer")
        };
        h.engagement.reconcile(&session, server).await;
        session.snapshot().await
    };
    let (result, during) = tokio::join!(like, reconcile);

    result.unwrap();
    assert!(during.post("p1").unwrap().is_liked_by("viewer"));
}

#[tokio::test]
async fn test_overlapping_failed_like_and_unlike_restore_server_state() {
    let h = harness();
    let post = seed_post(h.store.inner(), "p1", "author", 10).await;
    let session = session_for("viewer", vec![post]);
    h.store.fail_writes("array_add").await;
    h.store.fail_writes("array_remove").await;
    h.store.set_write_delay(Some(Duration::from_millis(50))).await;

    let like = h.engagement.like(&session, "p1", "viewer");
    let unlike = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.engagement.unlike(&session, "p1", "viewer").await
    };
    let (liked, unliked) = tokio::join!(like, unlike);

    assert!(liked.is_err());
    assert!(unliked.is_err());
    assert!(!h.content.get_post("p1").await.unwrap().is_liked_by("viewer"));
    assert!(!session.snapshot().await.post("p1").unwrap().is_liked_by("viewer"));
    assert_eq!(session.like_state("p1", "viewer").await, SyncState::Synced);
}

#[tokio::test]
async fn test_failed_unlike_keeps_superseded_like_that_landed() {
    let h = harness();
    let post = seed_post(h.store.inner(), "p1", "author", 10).await;
    let session = session_for("viewer", vec![post]);
    h.store.fail_writes("array_remove").await;
    h.store.set_write_delay(Some(Duration::from_millis(50))).await;

    let like = h.engagement.like(&session, "p1", "viewer");
    let unlike = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.engagement.unlike(&session, "p1", "viewer").await
    };
    let (liked, unliked) = tokio::join!(like, unlike);

    liked.unwrap();
    assert!(unliked.is_err());
    assert!(h.content.get_post("p1").await.unwrap().is_liked_by("viewer"));
    assert!(session.snapshot().await.post("p1").unwrap().is_liked_by("viewer"));
}
