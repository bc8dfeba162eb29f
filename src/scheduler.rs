//! Daily cache maintenance.
//!
//! A single background task sleeps until the configured UTC hour, purges
//! old cache entries, logs statistics, and schedules the next day. A failed
//! sweep waits `cleanup_retry_secs` before rescheduling. Every wait races
//! the stop token, so `stop()` returns promptly. The sweep itself runs on
//! the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::TranslationConfig;
use crate::translate::store::CacheError;
use crate::translate::TranslationService;

const DAY_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Time from `now_unix` until the next occurrence of `hour_utc:00:00`.
/// At or past the hour, the next run is tomorrow.
pub fn delay_until_next_run(now_unix: i64, hour_utc: u8) -> Duration {
    let since_midnight = now_unix.rem_euclid(DAY_SECS);
    let target = i64::from(hour_utc % 24) * 3_600;
    let wait = if since_midnight < target {
        target - since_midnight
    } else {
        DAY_SECS - since_midnight + target
    };
    Duration::from_secs(wait as u64)
}

pub struct MaintenanceScheduler {
    service: Arc<TranslationService>,
    clock: Arc<dyn Clock>,
    hour_utc: u8,
    retention: Duration,
    retry_after: Duration,
    state: watch::Sender<SchedulerState>,
    worker: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MaintenanceScheduler {
    pub fn new(service: Arc<TranslationService>, config: &TranslationConfig) -> Self {
        let clock = Arc::clone(service.clock());
        let (state, _) = watch::channel(SchedulerState::Stopped);
        Self {
            service,
            clock,
            hour_utc: config.cleanup_hour_utc,
            retention: config.cleanup_retention(),
            retry_after: config.cleanup_retry(),
            state,
            worker: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Spawn the maintenance task. No-op while already running.
    /// Must be called within a Tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if let Some((_, handle)) = worker.as_ref() {
            if !handle.is_finished() {
                warn!("maintenance scheduler already running");
                return;
            }
        }

        let token = CancellationToken::new();
        let job = SweepJob {
            service: Arc::clone(&self.service),
            clock: Arc::clone(&self.clock),
            hour_utc: self.hour_utc,
            retention: self.retention,
            retry_after: self.retry_after,
        };
        let handle = tokio::spawn(job.run(token.clone()));
        *worker = Some((token, handle));
        self.state.send_replace(SchedulerState::Running);
        info!(hour_utc = self.hour_utc, "maintenance scheduler started");
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(&self) {
        let Some((token, handle)) = self.worker.lock().take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            warn!(error = %e, "maintenance task ended abnormally");
        }
        self.state.send_replace(SchedulerState::Stopped);
        info!("maintenance scheduler stopped");
    }

    /// Run one sweep immediately, outside the schedule.
    pub fn sweep_now(&self) -> Result<usize, CacheError> {
        sweep(&self.service, self.retention)
    }
}

struct SweepJob {
    service: Arc<TranslationService>,
    clock: Arc<dyn Clock>,
    hour_utc: u8,
    retention: Duration,
    retry_after: Duration,
}

impl SweepJob {
    async fn run(self, token: CancellationToken) {
        loop {
            let delay = delay_until_next_run(self.clock.now_unix(), self.hour_utc);
            info!(delay_secs = delay.as_secs(), "next cache sweep scheduled");
            if !sleep_or_cancel(delay, &token).await {
                break;
            }

            let service = Arc::clone(&self.service);
            let retention = self.retention;
            let outcome = match tokio::task::spawn_blocking(move || sweep(&service, retention)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = outcome {
                error!(
                    error = %e,
                    retry_secs = self.retry_after.as_secs(),
                    "cache sweep failed, backing off"
                );
                if !sleep_or_cancel(self.retry_after, &token).await {
                    break;
                }
            }
        }
        info!("maintenance task exiting");
    }
}

fn sweep(service: &TranslationService, retention: Duration) -> Result<usize, CacheError> {
    let removed = service.purge_expired(retention)?;
    let stats = service.statistics();
    info!(
        removed,
        total_entries = stats.total_entries,
        recent_entries = stats.recent_entries,
        total_logged = stats.total_logged,
        "cache sweep done"
    );
    Ok(removed)
}

/// `false` when cancelled before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = token.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::history::MemoryAuditLog;
    use crate::translate::store::{CacheKey, CacheStore};
    use crate::translate::{Language, ProviderError, TranslationProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 2024-01-01T01:59:00Z
    const BEFORE_HOUR: i64 = 1_704_074_340;

    struct NoProvider;

    #[async_trait]
    impl TranslationProvider for NoProvider {
        async fn translate(&self, _: &str, _: Language, _: Language) -> Result<String, ProviderError> {
            Err(ProviderError::Api("unused".into()))
        }
    }

    #[derive(Default)]
    struct PurgeCounter {
        purges: AtomicUsize,
        fail: bool,
    }

    impl CacheStore for PurgeCounter {
        fn lookup(&self, _: &CacheKey) -> Result<Option<String>, CacheError> {
            Ok(None)
        }
        fn store(&self, _: &CacheKey, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            Ok(())
        }
        fn purge_expired(&self, _: Duration) -> Result<usize, CacheError> {
            self.purges.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CacheError::Corrupt("locked".into()))
            } else {
                Ok(3)
            }
        }
        fn invalidate(&self, _: &CacheKey) -> Result<bool, CacheError> {
            Ok(false)
        }
        fn count_entries(&self) -> Result<u64, CacheError> {
            Ok(0)
        }
        fn count_created_since(&self, _: i64) -> Result<u64, CacheError> {
            Ok(0)
        }
    }

    fn scheduler(store: Arc<PurgeCounter>) -> MaintenanceScheduler {
        let config = TranslationConfig::default();
        let service = TranslationService::new(
            Arc::new(NoProvider),
            store,
            Arc::new(MemoryAuditLog::new()),
            &config,
        )
        .with_clock(Arc::new(ManualClock::new(BEFORE_HOUR)));
        MaintenanceScheduler::new(Arc::new(service), &config)
    }

    #[test]
    fn next_run_delay() {
        assert_eq!(delay_until_next_run(BEFORE_HOUR, 2), Duration::from_secs(60));
        // Exactly on the hour runs tomorrow
        assert_eq!(delay_until_next_run(BEFORE_HOUR + 60, 2), Duration::from_secs(86_400));
        assert_eq!(
            delay_until_next_run(BEFORE_HOUR + 61, 2),
            Duration::from_secs(86_400 - 1)
        );
        assert_eq!(delay_until_next_run(0, 0), Duration::from_secs(86_400));
        assert_eq!(delay_until_next_run(0, 23), Duration::from_secs(23 * 3_600));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_at_configured_hour() {
        let store = Arc::new(PurgeCounter::default());
        let scheduler = scheduler(store.clone());
        let mut states = scheduler.subscribe();

        scheduler.start();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SchedulerState::Running);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 1);

        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sweep_backs_off() {
        let store = Arc::new(PurgeCounter {
            fail: true,
            ..Default::default()
        });
        let scheduler = scheduler(store.clone());
        scheduler.start();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 1);
        // 60s to the hour, then the 3600s backoff, then 60s again
        tokio::time::sleep(Duration::from_secs(3_719 - 61)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 2);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_and_stop_is_idempotent() {
        let store = Arc::new(PurgeCounter::default());
        let scheduler = scheduler(store.clone());
        scheduler.start();
        scheduler.start();
        scheduler.stop().await;
        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        // Stopped task never sweeps
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 0);

        // Restart after stop works
        scheduler.start();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[test]
    fn sweep_now_reports_removed() {
        let store = Arc::new(PurgeCounter::default());
        let scheduler = scheduler(store.clone());
        assert_eq!(scheduler.sweep_now().unwrap(), 3);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
