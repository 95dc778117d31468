use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

pub type SweepFuture = Pin<Box<dyn Future<Output = bool> + Send>>;
pub type SweepExecutor = Arc<dyn Fn() -> SweepFuture + Send + Sync>;

/// Single background task that fires a sweep on a fixed interval. Sweeps never overlap:
/// the next tick is only awaited once the current sweep has returned, and ticks missed
/// while a sweep was running are skipped rather than queued.
#[derive(Clone)]
pub struct SyncScheduler {
    interval: Duration,
    shutdown: Arc<Notify>,
    executor: Arc<RwLock<Option<SweepExecutor>>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    completed_sweeps: Arc<AtomicU64>,
}

impl SyncScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_secs(1)),
            shutdown: Arc::new(Notify::new()),
            executor: Arc::new(RwLock::new(None)),
            handle: Arc::new(Mutex::new(None)),
            completed_sweeps: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_executor(&self, executor: SweepExecutor) {
        if let Ok(mut writer) = self.executor.write() {
            *writer = Some(executor);
        }
    }

    /// Starts the loop; a second call while it is running is a no-op.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let scheduler = self.clone();
        *handle = Some(tokio::spawn(async move {
            scheduler.run_loop().await;
        }));
        tracing::info!(interval_secs = self.interval.as_secs(), "sync scheduler started");
    }

    /// Stops the loop. A sweep in progress is cancelled at its next suspension point.
    pub async fn shutdown(&self) {
        let task = self.handle.lock().await.take();
        if let Some(task) = task {
            self.shutdown.notify_one();
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "sync scheduler task ended abnormally");
            }
            tracing::info!("sync scheduler stopped");
        }
    }

    pub fn completed_sweeps(&self) -> u64 {
        self.completed_sweeps.load(Ordering::SeqCst)
    }

    async fn run_loop(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::warn!("sync scheduler stopping during a sweep");
                    break;
                }
                ok = self.execute() => {
                    self.completed_sweeps.fetch_add(1, Ordering::SeqCst);
                    if !ok {
                        tracing::warn!("scheduled sweep finished with an error");
                    }
                }
            }
        }
    }

    async fn execute(&self) -> bool {
        let executor = self.executor.read().ok().and_then(|reader| reader.clone());
        match executor {
            Some(executor) => executor().await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SweepExecutor, SweepFuture, SyncScheduler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_executor(counter: Arc<AtomicUsize>, in_sweep: Arc<AtomicUsize>, overlap: Arc<AtomicUsize>) -> SweepExecutor {
        Arc::new(move || -> SweepFuture {
            let counter = counter.clone();
            let in_sweep = in_sweep.clone();
            let overlap = overlap.clone();
            Box::pin(async move {
                if in_sweep.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_sweep.fetch_sub(1, Ordering::SeqCst);
                counter.fetch_add(1, Ordering::SeqCst);
                true
            })
        })
    }

    async fn wait_for(scheduler: &SyncScheduler, sweeps: u64) {
        for _ in 0..200 {
            if scheduler.completed_sweeps() >= sweeps {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn sweeps_on_start_then_on_interval_without_overlap() {
        let counter = Arc::new(AtomicUsize::new(0));
        let in_sweep = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let scheduler = SyncScheduler::new(Duration::from_secs(1));
        scheduler.set_executor(counting_executor(counter.clone(), in_sweep, overlap.clone()));

        scheduler.start().await;
        wait_for(&scheduler, 1).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        wait_for(&scheduler, 2).await;
        scheduler.shutdown().await;

        assert!(counter.load(Ordering::SeqCst) >= 2);
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_without_start_is_a_no_op() {
        let scheduler = SyncScheduler::new(Duration::from_secs(60));
        scheduler.shutdown().await;
        assert_eq!(scheduler.completed_sweeps(), 0);
    }
}
