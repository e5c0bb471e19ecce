//! Periodic poll driver
//!
//! The coordinator never polls itself. A host either calls
//! [`ReloadCoordinator::poll`] from its own loop (once per frame, say) or
//! spawns a [`TickDriver`] on a tokio runtime.

use crate::coordinator::ReloadCoordinator;
use crate::event::PollReport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something that can be polled for pending reloads
pub trait PollTarget: Send + Sync + 'static {
    /// Process pending reloads
    fn poll(&self) -> PollReport;
}

impl PollTarget for ReloadCoordinator {
    fn poll(&self) -> PollReport {
        ReloadCoordinator::poll(self)
    }
}

/// Calls [`PollTarget::poll`] on a fixed cadence
pub struct TickDriver {
    target: Arc<dyn PollTarget>,
    period: Duration,
}

impl std::fmt::Debug for TickDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickDriver")
            .field("period", &self.period)
            .finish()
    }
}

impl TickDriver {
    /// Create a driver polling `target` every `period`
    pub fn new(target: Arc<dyn PollTarget>, period: Duration) -> Self {
        Self { target, period }
    }

    /// Start ticking on the current tokio runtime
    ///
    /// Each poll runs on the blocking pool since loads touch the filesystem
    /// and the OS loader. A slow poll delays the next tick instead of
    /// stacking up.
    pub fn spawn(self) -> TickHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let Self { target, period } = self;

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period = ?period, "Tick driver started");

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let target = Arc::clone(&target);
                match tokio::task::spawn_blocking(move || target.poll()).await {
                    Ok(report) if !report.is_empty() => debug!(
                        reloaded = report.reloaded.len(),
                        failed = report.failed.len(),
                        deferred = report.deferred.len(),
                        "Poll finished"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Poll task failed"),
                }
            }

            info!("Tick driver stopped");
        });

        TickHandle { token, task }
    }
}

/// Running tick driver
#[derive(Debug)]
pub struct TickHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl TickHandle {
    /// Whether the driver task is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop ticking and wait for an in-flight poll to finish
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Tick driver ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTarget {
        polls: AtomicUsize,
    }

    impl PollTarget for CountingTarget {
        fn poll(&self) -> PollReport {
            self.polls.fetch_add(1, Ordering::SeqCst);
            PollReport::default()
        }
    }

    #[tokio::test]
    async fn test_driver_polls_until_stopped() {
        let target = Arc::new(CountingTarget::default());
        let polled: Arc<dyn PollTarget> = Arc::clone(&target) as _;
        let handle = TickDriver::new(polled, Duration::from_millis(10)).spawn();
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        let seen = target.polls.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several polls, saw {seen}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(target.polls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_driver_reloads_dirty_module() {
        use crate::testing::FakeBackend;
        use hotswap_config::RuntimeConfig;
        use hotswap_core::ModuleDescriptor;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("libmath.so");
        std::fs::write(&source, b"fake").unwrap();

        let config = RuntimeConfig {
            staging_dir: Some(dir.path().join("staging")),
            ..RuntimeConfig::default()
        };
        let backend = Arc::new(FakeBackend::math());
        let coordinator = Arc::new(ReloadCoordinator::with_backend(
            config,
            Arc::clone(&backend) as _,
        ));
        let descriptor =
            ModuleDescriptor::new("math", &source).with_symbol("add", "fn(i32, i32) -> i32");
        coordinator.register_or_refresh(descriptor).unwrap();
        coordinator.mark_dirty("math").unwrap();

        let target: Arc<dyn PollTarget> = Arc::clone(&coordinator) as _;
        let handle = TickDriver::new(target, Duration::from_millis(10)).spawn();

        let mut waited = Duration::ZERO;
        while backend.open_count() < 2 && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        handle.stop().await;

        assert!(backend.open_count() >= 2);
        assert!(coordinator.resolve("math", "add").is_ok());
    }
}
