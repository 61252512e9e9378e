//! Background polling loop.

use crate::error::SyncError;
use crate::state::{ChangeListener, SyncEngine};
use crate::transport::SyncTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Runs [`SyncEngine::sync_if_needed`] on a timer.
///
/// The first tick fires immediately. Syncs run on the blocking pool, one at
/// a time; a failed sync is logged and retried on the next tick.
#[derive(Debug)]
pub struct SyncPoller;

impl SyncPoller {
    /// Starts polling on the current tokio runtime.
    pub fn spawn<T>(engine: Arc<SyncEngine<T>>, interval: Duration) -> SyncPollerHandle
    where
        T: SyncTransport + 'static,
    {
        let trigger = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(
            Arc::clone(&engine),
            interval,
            Arc::clone(&trigger),
            shutdown_rx,
        ));
        info!(?interval, "sync poller started");

        SyncPollerHandle {
            listener: engine,
            trigger,
            shutdown,
            task,
        }
    }
}

/// Controls a running [`SyncPoller`].
pub struct SyncPollerHandle {
    listener: Arc<dyn ChangeListener>,
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncPollerHandle {
    /// Requests an immediate sync.
    ///
    /// Triggers that arrive while a sync is running collapse into one
    /// follow-up sync.
    pub fn trigger(&self) {
        self.listener.local_change();
        self.trigger.notify_one();
    }

    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop and waits for a running sync to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "sync poller task failed");
        }
        info!("sync poller stopped");
    }
}

impl std::fmt::Debug for SyncPollerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPollerHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

async fn run<T>(
    engine: Arc<SyncEngine<T>>,
    interval: Duration,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: SyncTransport + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => debug!("sync triggered"),
        }

        let engine = Arc::clone(&engine);
        match tokio::task::spawn_blocking(move || engine.sync_if_needed()).await {
            Ok(Ok(outcome)) => debug!(?outcome, "poll finished"),
            Ok(Err(SyncError::InProgress)) => debug!("sync already running"),
            Ok(Err(e)) => warn!(error = %e, "sync failed, retrying on next tick"),
            Err(e) => error!(error = %e, "sync task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::transport::MockTransport;
    use ledger_core::{LocalStore, Watermark};
    use ledger_sync_protocol::SyncResponse;

    fn engine() -> Arc<SyncEngine<MockTransport>> {
        Arc::new(SyncEngine::new(
            SyncConfig::new("memory://"),
            MockTransport::new(),
            Arc::new(LocalStore::in_memory()),
        ))
    }

    async fn wait_for_requests(engine: &SyncEngine<MockTransport>, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.transport().requests().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("poller did not send the expected requests");
    }

    #[tokio::test]
    async fn first_tick_syncs_immediately() {
        let engine = engine();
        engine
            .transport()
            .push_response(SyncResponse::new("items", Watermark::new(3), vec![]));

        let handle = SyncPoller::spawn(Arc::clone(&engine), Duration::from_secs(3600));
        wait_for_requests(&engine, 1).await;
        handle.shutdown().await;

        assert!(!engine.is_dirty());
        assert_eq!(engine.watermark(), Watermark::new(3));
    }

    #[tokio::test]
    async fn trigger_forces_a_sync() {
        let engine = engine();
        engine
            .transport()
            .push_response(SyncResponse::new("items", Watermark::new(3), vec![]));
        engine
            .transport()
            .push_response(SyncResponse::new("items", Watermark::new(4), vec![]));

        let handle = SyncPoller::spawn(Arc::clone(&engine), Duration::from_secs(3600));
        wait_for_requests(&engine, 1).await;

        handle.trigger();
        wait_for_requests(&engine, 2).await;
        handle.shutdown().await;

        assert_eq!(engine.watermark(), Watermark::new(4));
    }

    #[tokio::test]
    async fn failures_are_retried_on_later_ticks() {
        let engine = engine();
        engine
            .transport()
            .push_error(SyncError::transport_retryable("connection refused"));
        engine
            .transport()
            .push_response(SyncResponse::new("items", Watermark::new(8), vec![]));

        let handle = SyncPoller::spawn(Arc::clone(&engine), Duration::from_millis(10));
        wait_for_requests(&engine, 2).await;
        handle.shutdown().await;

        assert_eq!(engine.stats().failures, 1);
        assert_eq!(engine.watermark(), Watermark::new(8));
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let engine = engine();
        let handle = SyncPoller::spawn(Arc::clone(&engine), Duration::from_millis(10));
        handle.shutdown().await;

        let sent = engine.transport().requests().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.transport().requests().len(), sent);
    }
}
