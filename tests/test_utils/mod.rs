//! Shared utilities for the integration suite.
//!
//! Engine tests run against a file-backed SQLite database (unique per test)
//! rather than `sqlite::memory:`: the reply pipeline deliberately calls the
//! gateway inside an open transaction, so the pool needs more than one
//! connection with a shared view of the data.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use serde_json::{Value as JsonValue, json};

use mentions::auth::Actor;
use mentions::clock::ManualClock;
use mentions::config::SocialConfig;
use mentions::engine::adapter::AdapterContext;
use mentions::engine::{EngineConfig, MentionEngine};
use mentions::gateway::http::{GatewayError, Transport, UpstreamRequest};
use mentions::gateway::{BreakerConfig, RetryConfig, SocialGateway};
use mentions::models::mention::{self, MentionKind};

/// Connects to a fresh file-backed SQLite database with all migrations
/// applied.
pub async fn setup_test_db() -> DatabaseConnection {
    let path = std::env::temp_dir().join(format!("mentions-test-{}.sqlite", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}?mode=rwc", path.display());

    let db = Database::connect(url).await.expect("connect test db");
    Migrator::up(&db, None).await.expect("apply migrations");
    db
}

/// Scripted responses for the mock transport, consumed in order. An empty
/// script answers `{}` forever.
#[allow(dead_code)]
pub enum ScriptedResponse {
    Ok(JsonValue),
    Server,
    Network,
    Client(u16),
}

pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(script: Vec<ScriptedResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        })
    }

    #[allow(dead_code)]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, _request: UpstreamRequest) -> Result<JsonValue, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(ScriptedResponse::Ok(value)) => Ok(value),
            Some(ScriptedResponse::Server) => Err(GatewayError::Server {
                status: 503,
                body: String::new(),
            }),
            Some(ScriptedResponse::Network) => {
                Err(GatewayError::Network("connection reset".into()))
            }
            Some(ScriptedResponse::Client(status)) => Err(GatewayError::Client {
                status,
                body: String::new(),
            }),
            None => Ok(json!({})),
        }
    }
}

/// Everything an engine test needs, wired over one database.
pub struct TestHarness {
    pub db: DatabaseConnection,
    pub engine: Arc<MentionEngine>,
    pub social: Arc<SocialGateway>,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
}

/// Builds an engine over a scripted transport. Retries are disabled so call
/// counts stay deterministic; breaker thresholds use production defaults.
pub async fn build_harness(script: Vec<ScriptedResponse>) -> TestHarness {
    let db = setup_test_db().await;
    let transport = ScriptedTransport::new(script);
    let clock = Arc::new(ManualClock::default());

    let social_config = SocialConfig {
        platforms: vec!["bluesky".to_string()],
        history_last_days: 7,
        ..Default::default()
    };

    let social = Arc::new(SocialGateway::new(
        db.clone(),
        transport.clone(),
        clock.clone(),
        &social_config,
        BreakerConfig::default(),
        RetryConfig {
            max_retries: 0,
            ..Default::default()
        },
    ));

    let engine = MentionEngine::new(
        db.clone(),
        social.clone(),
        clock.clone(),
        EngineConfig::default(),
    );

    TestHarness {
        db,
        engine,
        social,
        transport,
        clock,
    }
}

/// An adapter context over the harness services, for driving the fetch
/// pipeline directly.
#[allow(dead_code)]
pub fn adapter_context(harness: &TestHarness) -> AdapterContext {
    AdapterContext {
        db: harness.db.clone(),
        social: harness.social.clone(),
        clock: harness.clock.clone(),
        fan_out: 10,
    }
}

pub fn test_actor() -> Actor {
    Actor {
        id: 1,
        email: "operator@example.com".to_string(),
    }
}

/// Inserts a mention row directly.
#[allow(dead_code)]
pub async fn seed_mention(
    db: &DatabaseConnection,
    platform_ref: &str,
    kind: MentionKind,
) -> mention::Model {
    let now = Utc::now();
    mention::ActiveModel {
        content: Set("original comment".to_string()),
        social_media_platform_ref: Set(platform_ref.to_string()),
        social_media_api_post_ref: Set(Some("post-1".to_string())),
        platform: Set("bluesky".to_string()),
        kind: Set(kind),
        state: Set(None),
        disposition: Set(None),
        user_id: Set(None),
        mention_id: Set(None),
        data: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed mention")
}

/// A successful aggregator reply payload for the given platform.
#[allow(dead_code)]
pub fn reply_success(platform: &str, comment: &str, comment_id: &str) -> JsonValue {
    json!({
        "success": true,
        platform: { "comment": comment, "commentId": comment_id },
    })
}
