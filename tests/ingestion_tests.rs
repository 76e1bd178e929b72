//! Fetch pipeline integration tests: ingestion idempotency, task collapse,
//! cross-process fetch de-duplication, and the list deadline.

mod test_utils;

use std::time::Duration;

use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::json;

use mentions::clock::Clock;
use mentions::engine::adapter::{CommentAdapter, MentionAdapter};
use mentions::models::mention::{self, MentionKind};
use mentions::models::task::{self, TaskCode};
use mentions::repositories::TaskRepository;
use test_utils::{
    ScriptedResponse, adapter_context, build_harness, seed_mention, test_actor,
};

fn comment_payload() -> serde_json::Value {
    json!({
        "x": [
            { "commentId": "c1", "comment": "hi", "platform": "x" },
        ]
    })
}

#[tokio::test]
async fn ingesting_the_same_comment_twice_yields_one_mention() {
    let harness = build_harness(vec![
        ScriptedResponse::Ok(comment_payload()),
        ScriptedResponse::Ok(comment_payload()),
    ])
    .await;
    let adapter = CommentAdapter::new(adapter_context(&harness));
    let actor = test_actor();

    let posts = json!([{ "id": "p1", "postIds": [], "platform": "bluesky" }]);
    let first = TaskRepository::insert_fetch_task(
        &harness.db,
        TaskCode::FetchComments,
        posts.clone(),
        &actor.email,
        harness.clock.now(),
    )
    .await
    .unwrap();

    adapter.process_fetch_task(&first, &actor).await.unwrap();

    // 30 seconds later the aggregator returns the same comment again.
    harness.clock.advance(Duration::from_secs(30));
    let second = TaskRepository::insert_fetch_task(
        &harness.db,
        TaskCode::FetchComments,
        posts,
        &actor.email,
        harness.clock.now(),
    )
    .await
    .unwrap();

    adapter.process_fetch_task(&second, &actor).await.unwrap();

    let mentions_rows = mention::Entity::find()
        .filter(mention::Column::SocialMediaPlatformRef.eq("c1"))
        .all(&harness.db)
        .await
        .unwrap();
    assert_eq!(mentions_rows.len(), 1, "platform ref is the idempotency key");
    assert_eq!(mentions_rows[0].kind, MentionKind::Comment);

    // Both tasks finished despite the duplicate.
    for id in [first.id, second.id] {
        let task = task::Entity::find_by_id(id)
            .one(&harness.db)
            .await
            .unwrap()
            .unwrap();
        assert!(task.finished_at.is_some());
    }
}

#[tokio::test]
async fn finished_fetch_task_collapses_posts_and_attaches_comments() {
    let harness = build_harness(vec![ScriptedResponse::Ok(comment_payload())]).await;
    let adapter = CommentAdapter::new(adapter_context(&harness));
    let actor = test_actor();

    let posts = json!([{ "id": "p9", "postIds": ["tw-1"], "platform": "bluesky" }]);
    let fetch = TaskRepository::insert_fetch_task(
        &harness.db,
        TaskCode::FetchComments,
        posts,
        &actor.email,
        harness.clock.now(),
    )
    .await
    .unwrap();

    adapter.process_fetch_task(&fetch, &actor).await.unwrap();

    let task = task::Entity::find_by_id(fetch.id)
        .one(&harness.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.data["posts"], json!(["p9"]));
    let comments = task.data["comments"].as_array().unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0]["commentId"], "c1");
    assert_eq!(comments[0]["apiPostId"], "p9");
}

#[tokio::test]
async fn per_post_failures_do_not_block_task_completion() {
    let harness = build_harness(vec![
        ScriptedResponse::Client(404),
        ScriptedResponse::Ok(comment_payload()),
    ])
    .await;
    let adapter = CommentAdapter::new(adapter_context(&harness));
    let actor = test_actor();

    let posts = json!([
        { "id": "p1", "postIds": [], "platform": "bluesky" },
        { "id": "p2", "postIds": [], "platform": "bluesky" },
    ]);
    let fetch = TaskRepository::insert_fetch_task(
        &harness.db,
        TaskCode::FetchComments,
        posts,
        &actor.email,
        harness.clock.now(),
    )
    .await
    .unwrap();

    adapter.process_fetch_task(&fetch, &actor).await.unwrap();

    let task = task::Entity::find_by_id(fetch.id)
        .one(&harness.db)
        .await
        .unwrap()
        .unwrap();
    assert!(
        task.finished_at.is_some(),
        "fetch tasks finish even when single posts fail"
    );
}

#[tokio::test]
async fn recently_fetched_posts_are_not_fetched_again() {
    // History returns p1 and p2, but a fetch task from one minute ago
    // already covers them.
    let harness = build_harness(vec![
        // Recovery re-processes the pending task: one comments call per post.
        ScriptedResponse::Ok(json!({})),
        ScriptedResponse::Ok(json!({})),
        // Then the reconcile lists recent posts.
        ScriptedResponse::Ok(json!({
            "history": [
                { "id": "p1", "postIds": [] },
                { "id": "p2", "postIds": [] },
            ]
        })),
    ])
    .await;

    let one_minute_ago = harness.clock.now() - chrono::Duration::seconds(60);
    task::ActiveModel {
        code: Set(TaskCode::FetchComments),
        data: Set(json!({
            "posts": [
                { "id": "p1", "postIds": [], "platform": "bluesky" },
                { "id": "p2", "postIds": [], "platform": "bluesky" },
            ]
        })),
        started_at: Set(Some(one_minute_ago)),
        finished_at: Set(None),
        created_by: Set("operator@example.com".to_string()),
        created_at: Set(one_minute_ago),
        updated_at: Set(one_minute_ago),
        ..Default::default()
    }
    .insert(&harness.db)
    .await
    .unwrap();

    let errors = harness
        .engine
        .clone()
        .fetch_and_reconcile(test_actor())
        .await;
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    let fetch_tasks = task::Entity::find()
        .filter(task::Column::Code.eq(TaskCode::FetchComments))
        .all(&harness.db)
        .await
        .unwrap();
    assert_eq!(
        fetch_tasks.len(),
        1,
        "no new fetch task for already-covered posts"
    );
}

#[tokio::test]
async fn fresh_posts_create_and_process_a_fetch_task() {
    let harness = build_harness(vec![
        ScriptedResponse::Ok(json!({
            "history": [{ "id": "p1", "postIds": [] }]
        })),
        ScriptedResponse::Ok(json!({
            "bluesky": [
                { "commentId": "fresh-1", "comment": "new here", "platform": "bluesky" },
            ]
        })),
    ])
    .await;

    let errors = harness
        .engine
        .clone()
        .fetch_and_reconcile(test_actor())
        .await;
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");

    let fetch_tasks = task::Entity::find()
        .filter(task::Column::Code.eq(TaskCode::FetchComments))
        .all(&harness.db)
        .await
        .unwrap();
    assert_eq!(fetch_tasks.len(), 1);
    assert!(fetch_tasks[0].finished_at.is_some());

    let ingested = mention::Entity::find()
        .filter(mention::Column::SocialMediaPlatformRef.eq("fresh-1"))
        .one(&harness.db)
        .await
        .unwrap();
    assert!(ingested.is_some());
}

#[tokio::test]
async fn list_mentions_returns_within_the_wait_deadline() {
    use async_trait::async_trait;
    use mentions::clock::SystemClock;
    use mentions::config::SocialConfig;
    use mentions::engine::{EngineConfig, MentionEngine};
    use mentions::gateway::http::{GatewayError, Transport, UpstreamRequest};
    use mentions::gateway::{BreakerConfig, RetryConfig, SocialGateway};
    use std::sync::Arc;

    /// Transport that never answers inside the test window.
    struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        async fn request(
            &self,
            _request: UpstreamRequest,
        ) -> Result<serde_json::Value, GatewayError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({}))
        }
    }

    let db = test_utils::setup_test_db().await;
    seed_mention(&db, "ref-cached", MentionKind::Comment).await;

    let clock = Arc::new(SystemClock);
    let social = Arc::new(SocialGateway::new(
        db.clone(),
        Arc::new(StalledTransport),
        clock.clone(),
        &SocialConfig {
            platforms: vec!["bluesky".to_string()],
            ..Default::default()
        },
        BreakerConfig::default(),
        RetryConfig::default(),
    ));
    let engine = MentionEngine::new(db.clone(), social, clock, EngineConfig::default());

    let started = std::time::Instant::now();
    let (mentions_list, meta) = engine
        .list_mentions(Some(Duration::from_millis(100)), &test_actor())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(2),
        "list must answer near the deadline, took {elapsed:?}"
    );
    assert!(meta.is_syncing, "upstream still running");
    assert_eq!(mentions_list.len(), 1, "last known snapshot is served");
    assert_eq!(mentions_list[0].social_media_platform_ref, "ref-cached");
}
