//! Expiration sweeper: periodic purge of expired grants.
//!
//! Permission checks already ignore expired grants, so the sweeper only
//! reclaims space. Running it late, twice, or concurrently with reads is safe.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use warden_core::{AccessResult, Clock, SystemClock};

use crate::store::{bounded, GrantStore};

/// Sweeper loop configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweeps. The first sweep runs immediately.
    pub interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            name: "grant-sweeper".to_string(),
        }
    }
}

impl SweeperConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Sweeper runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweeperStats {
    pub runs: u64,
    pub grants_removed: u64,
    pub failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Handle to control a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Request graceful shutdown and wait for the loop to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    /// Get current sweeper statistics.
    pub fn stats(&self) -> SweeperStats {
        lock_stats(&self.stats).clone()
    }
}

fn lock_stats(stats: &Mutex<SweeperStats>) -> std::sync::MutexGuard<'_, SweeperStats> {
    stats.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ExpirationSweeper<G> {
    store: G,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl<G: GrantStore + 'static> ExpirationSweeper<G> {
    pub fn new(store: G) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            store_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Delete every grant whose expiry is at or before now.
    ///
    /// Returns the number of grants removed.
    pub async fn sweep(&self) -> AccessResult<u64> {
        let now = self.clock.now();
        let removed = bounded(
            "delete_expired",
            self.store_timeout,
            self.store.delete_expired(now),
        )
        .await?;

        if removed > 0 {
            info!(removed, "cleaned up expired grants");
        } else {
            debug!("no expired grants");
        }
        Ok(removed)
    }

    /// Run `sweep` every `config.interval` on a background task.
    ///
    /// A failed sweep is logged and counted; the loop keeps going.
    pub fn spawn(self, config: SweeperConfig) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let join = tokio::spawn(sweeper_loop(self, config, shutdown_rx, stats.clone()));

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            stats,
        }
    }
}

async fn sweeper_loop<G: GrantStore + 'static>(
    sweeper: ExpirationSweeper<G>,
    config: SweeperConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
    stats: Arc<Mutex<SweeperStats>>,
) {
    info!(sweeper = %config.name, interval_ms = config.interval.as_millis() as u64, "sweeper started");

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                let result = sweeper.sweep().await;
                let mut s = lock_stats(&stats);
                s.runs += 1;
                s.last_run_at = Some(sweeper.clock.now());
                match result {
                    Ok(removed) => s.grants_removed += removed,
                    Err(e) => {
                        s.failures += 1;
                        warn!(sweeper = %config.name, error = %e, "sweep failed");
                    }
                }
            }
        }
    }

    info!(sweeper = %config.name, "sweeper stopped");
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use warden_auth::{Grant, Role, Scope};
    use warden_core::{GrantId, ManualClock, StoreError, UserId};

    use super::*;
    use crate::store::InMemoryGrantStore;

    fn grant(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Grant {
        let u = UserId::new();
        Grant::new(u, Role::User, Scope::Global, expires_at, u, now)
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let store = InMemoryGrantStore::arc();
        let clock = Arc::new(ManualClock::starting_now());
        let now = clock.now();

        store.create(&grant(None, now)).await.unwrap();
        store.create(&grant(Some(now + ChronoDuration::minutes(30)), now)).await.unwrap();
        store.create(&grant(Some(now - ChronoDuration::minutes(1)), now)).await.unwrap();

        let sweeper = ExpirationSweeper::new(store.clone()).with_clock(clock.clone());
        assert_eq!(sweeper.sweep().await.unwrap(), 1);
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
        assert_eq!(store.len(), 2);

        clock.advance(ChronoDuration::minutes(30));
        assert_eq!(sweeper.sweep().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    struct FailingStore;

    #[async_trait]
    impl GrantStore for FailingStore {
        async fn create(&self, _grant: &Grant) -> Result<(), StoreError> {
            Ok(())
        }

        async fn list_active(&self, _user_id: UserId, _now: DateTime<Utc>) -> Result<Vec<Grant>, StoreError> {
            Ok(vec![])
        }

        async fn delete_by_id(&self, _id: GrantId) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn delete_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("db down".into()))
        }
    }

    #[tokio::test]
    async fn sweep_surfaces_store_errors() {
        let err = ExpirationSweeper::new(FailingStore).sweep().await.unwrap_err();
        assert!(err.is_store());
    }

    #[tokio::test]
    async fn background_loop_sweeps_and_stops() {
        let store = InMemoryGrantStore::arc();
        let now = Utc::now();
        store.create(&grant(Some(now - ChronoDuration::seconds(5)), now)).await.unwrap();

        let handle = ExpirationSweeper::new(store.clone())
            .spawn(SweeperConfig::default().with_interval(Duration::from_millis(10)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = handle.stats();
        handle.shutdown().await;

        assert!(stats.runs >= 1);
        assert_eq!(stats.grants_removed, 1);
        assert_eq!(stats.failures, 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn background_loop_counts_failures_and_keeps_running() {
        let handle = ExpirationSweeper::new(FailingStore)
            .spawn(SweeperConfig::default().with_name("failing").with_interval(Duration::from_millis(10)));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = handle.stats();
        handle.shutdown().await;

        assert!(stats.failures >= 2);
        assert_eq!(stats.failures, stats.runs);
    }
}
