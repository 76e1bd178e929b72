//! Per-platform circuit breaker with store-backed state.
//!
//! The in-memory state is authoritative within a process; every transition
//! (and every in-CLOSED failure increment) is persisted through a
//! fire-and-forget upsert so a fresh process resumes without re-discovering
//! the outage. Persistence failures are logged and never slow the call path.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::gateway::http::GatewayError;
use crate::repositories::BreakerStateRepository;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "HALF_OPEN")]
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub max_failures: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Serialized breaker state as stored in `circuit_breaker_states.state_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

/// Observability hook invoked (fire-and-forget) on each state transition.
pub type StateChangeHook = Arc<dyn Fn(CircuitState, &BreakerSnapshot) + Send + Sync>;

#[derive(Debug, Error)]
pub enum BreakerError {
    /// Rejected without invoking the operation.
    #[error("circuit '{name}' is OPEN, retry in {retry_in_secs}s")]
    Open { name: String, retry_in_secs: u64 },
    /// The failure that pushed the circuit over its threshold.
    #[error("circuit '{name}' opened after {failures} consecutive failures")]
    Tripped {
        name: String,
        failures: u32,
        #[source]
        source: GatewayError,
    },
    /// An underlying failure while the circuit stays closed (or half-open).
    #[error(transparent)]
    Upstream(#[from] GatewayError),
}

impl BreakerError {
    /// The gateway error underneath, when one exists.
    pub fn upstream(&self) -> Option<&GatewayError> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Tripped { source, .. } => Some(source),
            BreakerError::Upstream(source) => Some(source),
        }
    }
}

#[derive(Debug)]
struct Inner {
    loaded: bool,
    state: CircuitState,
    failures: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    db: DatabaseConnection,
    inner: Mutex<Inner>,
    on_state_change: Option<StateChangeHook>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        db: DatabaseConnection,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            db,
            inner: Mutex::new(Inner {
                loaded: false,
                state: CircuitState::Closed,
                failures: 0,
                last_failure_time: None,
                next_attempt_time: None,
            }),
            on_state_change: None,
        }
    }

    pub fn with_state_change_hook(mut self, hook: StateChangeHook) -> Self {
        self.on_state_change = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state without triggering a transition. The retry predicate
    /// reads this between attempts.
    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Runs `op` through the breaker, applying the state machine on the
    /// outcome.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.ensure_loaded().await;

        let now = self.clock.now();
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => {}
                CircuitState::Open => {
                    let next_attempt = inner.next_attempt_time.unwrap_or(now);
                    if now < next_attempt {
                        let retry_in = (next_attempt - now).num_seconds().max(0) as u64;
                        counter!("circuit_breaker_rejected_total", "circuit" => self.name.clone())
                            .increment(1);
                        return Err(BreakerError::Open {
                            name: self.name.clone(),
                            retry_in_secs: retry_in,
                        });
                    }
                    // Reset window elapsed: permit a single probe.
                    inner.state = CircuitState::HalfOpen;
                    let snapshot = snapshot_of(&inner, now);
                    drop(inner);
                    self.after_transition(CircuitState::HalfOpen, snapshot);
                }
            }
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => Err(self.on_failure(err)),
        }
    }

    fn on_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        let prev_state = inner.state;
        let had_failures = inner.failures > 0;

        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.last_failure_time = None;
        inner.next_attempt_time = None;
        let snapshot = snapshot_of(&inner, now);
        drop(inner);

        if prev_state != CircuitState::Closed {
            info!(
                circuit = %self.name,
                from = %prev_state,
                "circuit closed, failure counter reset"
            );
            self.after_transition(CircuitState::Closed, snapshot);
        } else if had_failures {
            // Streak broken inside CLOSED: record the reset counters.
            self.persist(snapshot);
        }
    }

    fn on_failure(&self, err: GatewayError) -> BreakerError {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        let prev_state = inner.state;

        inner.failures += 1;
        inner.last_failure_time = Some(now);

        match prev_state {
            CircuitState::Closed if inner.failures >= self.config.max_failures => {
                inner.state = CircuitState::Open;
                inner.next_attempt_time = Some(
                    now + chrono::Duration::from_std(self.config.reset_timeout)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60)),
                );
                let failures = inner.failures;
                let snapshot = snapshot_of(&inner, now);
                drop(inner);

                warn!(
                    circuit = %self.name,
                    failures,
                    "circuit opened"
                );
                self.after_transition(CircuitState::Open, snapshot);
                BreakerError::Tripped {
                    name: self.name.clone(),
                    failures,
                    source: err,
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed: back to OPEN with a fresh reset window.
                inner.state = CircuitState::Open;
                inner.next_attempt_time = Some(
                    now + chrono::Duration::from_std(self.config.reset_timeout)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60)),
                );
                let snapshot = snapshot_of(&inner, now);
                drop(inner);

                warn!(circuit = %self.name, "half-open probe failed, circuit re-opened");
                self.after_transition(CircuitState::Open, snapshot);
                BreakerError::Upstream(err)
            }
            _ => {
                let snapshot = snapshot_of(&inner, now);
                drop(inner);
                self.persist(snapshot);
                BreakerError::Upstream(err)
            }
        }
    }

    /// Loads persisted state on first use; absence means CLOSED with zero
    /// counters.
    async fn ensure_loaded(&self) {
        if self.inner.lock().unwrap().loaded {
            return;
        }

        let loaded = match BreakerStateRepository::load(&self.db, &self.name).await {
            Ok(row) => row.and_then(|row| {
                serde_json::from_value::<BreakerSnapshot>(row.state_data.clone()).ok()
            }),
            Err(err) => {
                error!(circuit = %self.name, error = %err, "failed to load circuit breaker state");
                None
            }
        };

        let mut inner = self.inner.lock().unwrap();
        if inner.loaded {
            return;
        }
        if let Some(snapshot) = loaded {
            inner.state = snapshot.state;
            inner.failures = snapshot.failures;
            inner.last_failure_time = snapshot.last_failure_time;
            inner.next_attempt_time = snapshot.next_attempt_time;
        }
        inner.loaded = true;
    }

    fn after_transition(&self, new_state: CircuitState, snapshot: BreakerSnapshot) {
        gauge!("circuit_breaker_state", "circuit" => self.name.clone()).set(match new_state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 1.0,
        });
        if let Some(hook) = &self.on_state_change {
            hook(new_state, &snapshot);
        }
        self.persist(snapshot);
    }

    /// Fire-and-forget upsert; the call path never awaits the write.
    fn persist(&self, snapshot: BreakerSnapshot) {
        let data = match serde_json::to_value(&snapshot) {
            Ok(data) => data,
            Err(err) => {
                error!(circuit = %self.name, error = %err, "failed to serialize breaker snapshot");
                return;
            }
        };

        let db = self.db.clone();
        let name = self.name.clone();
        let now = snapshot.timestamp;
        tokio::spawn(async move {
            if let Err(err) = BreakerStateRepository::upsert(&db, &name, data, now).await {
                error!(circuit = %name, error = %err, "failed to persist circuit breaker state");
            }
        });
    }
}

fn snapshot_of(inner: &Inner, now: DateTime<Utc>) -> BreakerSnapshot {
    BreakerSnapshot {
        state: inner.state,
        failures: inner.failures,
        last_failure_time: inner.last_failure_time,
        next_attempt_time: inner.next_attempt_time,
        timestamp: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn test_db() -> DatabaseConnection {
        // A single pooled connection so the spawned persistence writers see
        // the same in-memory database.
        let mut options = sea_orm::ConnectOptions::new("sqlite::memory:".to_owned());
        options.max_connections(1);
        let db = Database::connect(options).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db
    }

    fn breaker(db: &DatabaseConnection, clock: Arc<ManualClock>, max_failures: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "bluesky",
            BreakerConfig {
                max_failures,
                reset_timeout: Duration::from_secs(60),
            },
            db.clone(),
            clock,
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> BreakerError {
        breaker
            .execute(|| async {
                Err::<(), _>(GatewayError::Server {
                    status: 503,
                    body: String::new(),
                })
            })
            .await
            .unwrap_err()
    }

    /// Persistence is fire-and-forget; poll until a snapshot matching
    /// `predicate` lands (or time out returning the last one seen).
    async fn wait_for_persisted(
        db: &DatabaseConnection,
        name: &str,
        predicate: impl Fn(&BreakerSnapshot) -> bool,
    ) -> Option<BreakerSnapshot> {
        let mut last = None;
        for _ in 0..100 {
            if let Some(row) = BreakerStateRepository::load(db, name).await.unwrap() {
                if let Ok(snapshot) = serde_json::from_value::<BreakerSnapshot>(row.state_data) {
                    if predicate(&snapshot) {
                        return Some(snapshot);
                    }
                    last = Some(snapshot);
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        last
    }

    #[tokio::test]
    async fn success_keeps_circuit_closed() {
        let db = test_db().await;
        let clock = Arc::new(ManualClock::default());
        let breaker = breaker(&db, clock, 5);

        let result = breaker.execute(|| async { Ok::<_, GatewayError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn threshold_failure_opens_circuit_and_wraps_error() {
        let db = test_db().await;
        let clock = Arc::new(ManualClock::default());
        let breaker = breaker(&db, clock, 3);

        assert!(matches!(fail(&breaker).await, BreakerError::Upstream(_)));
        assert!(matches!(fail(&breaker).await, BreakerError::Upstream(_)));
        let tripped = fail(&breaker).await;
        assert!(matches!(tripped, BreakerError::Tripped { failures: 3, .. }));
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_invoking_operation() {
        let db = test_db().await;
        let clock = Arc::new(ManualClock::default());
        let breaker = breaker(&db, clock, 1);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let rejected = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, GatewayError>(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(rejected, BreakerError::Open { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "operation must not run");
    }

    #[tokio::test]
    async fn full_recovery_cycle_closed_open_half_open_closed() {
        let db = test_db().await;
        let clock = Arc::new(ManualClock::default());
        let breaker = breaker(&db, clock.clone(), 2);

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);

        clock.advance(Duration::from_secs(61));

        // The next execute is the half-open probe; success closes the circuit.
        let result = breaker.execute(|| async { Ok::<_, GatewayError>("ok") }).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        let snapshot = wait_for_persisted(&db, "bluesky", |s| {
            s.state == CircuitState::Closed && s.failures == 0
        })
        .await
        .expect("state persisted");
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failures, 0);
        assert!(snapshot.next_attempt_time.is_none());
    }

    #[tokio::test]
    async fn failed_probe_reopens_with_fresh_window() {
        let db = test_db().await;
        let clock = Arc::new(ManualClock::default());
        let breaker = breaker(&db, clock.clone(), 1);

        let _ = fail(&breaker).await;
        clock.advance(Duration::from_secs(61));

        let err = fail(&breaker).await;
        assert!(matches!(err, BreakerError::Upstream(_)));
        assert_eq!(breaker.current_state(), CircuitState::Open);

        // Still inside the new reset window: rejected immediately.
        let rejected = breaker
            .execute(|| async { Ok::<_, GatewayError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(rejected, BreakerError::Open { .. }));
    }

    #[tokio::test]
    async fn fresh_process_resumes_from_persisted_state() {
        let db = test_db().await;
        let clock = Arc::new(ManualClock::default());

        {
            let first = breaker(&db, clock.clone(), 1);
            let _ = fail(&first).await;
            let persisted =
                wait_for_persisted(&db, "bluesky", |s| s.state == CircuitState::Open).await;
            assert!(persisted.is_some());
        }

        // A new breaker instance over the same store starts out OPEN.
        let second = breaker(&db, clock.clone(), 1);
        let rejected = second
            .execute(|| async { Ok::<_, GatewayError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(rejected, BreakerError::Open { .. }));
    }

    #[tokio::test]
    async fn state_change_hook_fires_on_transitions() {
        let db = test_db().await;
        let clock = Arc::new(ManualClock::default());
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let seen = transitions.clone();

        let breaker = CircuitBreaker::new(
            "twitter",
            BreakerConfig {
                max_failures: 1,
                reset_timeout: Duration::from_secs(60),
            },
            db.clone(),
            clock.clone(),
        )
        .with_state_change_hook(Arc::new(move |state, _snapshot| {
            seen.lock().unwrap().push(state);
        }));

        let _ = fail(&breaker).await;
        clock.advance(Duration::from_secs(61));
        let _ = breaker.execute(|| async { Ok::<_, GatewayError>(()) }).await;

        let observed = transitions.lock().unwrap().clone();
        assert_eq!(
            observed,
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }
}
