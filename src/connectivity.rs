//! Connectivity monitor.
//!
//! Probes `GET /health` on a fixed interval, publishes the observable
//! [`ConnectivityState`] through a watch channel, and drains the pending
//! queue on every Offline -> Online transition.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::remote::RemoteApi;
use crate::sync::SyncEngine;

/// Observable sync status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
  pub is_online: bool,
  pub is_syncing: bool,
  pub pending_count: usize,
}

/// Shared handle on the published [`ConnectivityState`].
///
/// Setters only notify observers when the value actually changes.
#[derive(Clone)]
pub struct StatusHandle {
  tx: Arc<watch::Sender<ConnectivityState>>,
}

impl StatusHandle {
  /// Starts Offline with nothing pending, until the first probe says otherwise.
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(ConnectivityState::default());
    Self { tx: Arc::new(tx) }
  }

  pub fn current(&self) -> ConnectivityState {
    *self.tx.borrow()
  }

  /// Receive every change of the state from now on.
  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.tx.subscribe()
  }

  /// Returns the previous value.
  pub(crate) fn set_online(&self, online: bool) -> bool {
    let mut previous = online;
    self.tx.send_if_modified(|state| {
      previous = state.is_online;
      state.is_online = online;
      previous != online
    });
    previous
  }

  pub(crate) fn set_syncing(&self, syncing: bool) {
    self.tx.send_if_modified(|state| {
      let changed = state.is_syncing != syncing;
      state.is_syncing = syncing;
      changed
    });
  }

  pub(crate) fn set_pending_count(&self, count: usize) {
    self.tx.send_if_modified(|state| {
      let changed = state.pending_count != count;
      state.pending_count = count;
      changed
    });
  }
}

impl Default for StatusHandle {
  fn default() -> Self {
    Self::new()
  }
}

/// Periodic health prober that owns the online flag.
pub struct ConnectivityMonitor {
  api: Arc<dyn RemoteApi>,
  engine: Arc<SyncEngine>,
  status: StatusHandle,
  interval: Duration,
}

impl ConnectivityMonitor {
  pub fn new(
    api: Arc<dyn RemoteApi>,
    engine: Arc<SyncEngine>,
    status: StatusHandle,
    interval: Duration,
  ) -> Self {
    Self {
      api,
      engine,
      status,
      interval,
    }
  }

  /// Probe once, publish the result and refresh the pending count.
  ///
  /// On an Offline -> Online transition with pending changes, the drain is
  /// awaited before returning. Returns whether the probe succeeded.
  pub async fn check(&self) -> bool {
    let online = match self.api.health().await {
      Ok(()) => true,
      Err(e) => {
        debug!(error = %e, "Health probe failed");
        false
      }
    };

    let was_online = self.status.set_online(online);

    let pending = match self.engine.refresh_pending_count() {
      Ok(count) => count,
      Err(e) => {
        warn!(error = %e, "Failed to read pending queue");
        0
      }
    };

    match (was_online, online) {
      (false, true) => {
        info!(pending, "Connection restored");
        if pending > 0 {
          self.engine.sync_pending_changes().await;
        }
      }
      (true, false) => info!(pending, "Connection lost"),
      _ => {}
    }

    online
  }

  /// Probe immediately, then every interval, until the task is shut down.
  ///
  /// Shutdown is only observed between probes, so a drain started by a
  /// probe always runs to completion.
  pub fn spawn(self: Arc<Self>) -> MonitorTask {
    let token = CancellationToken::new();
    let cancel = token.clone();
    let interval = self.interval;

    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        tokio::select! {
          biased;
          _ = cancel.cancelled() => break,
          _ = ticker.tick() => {}
        }
        self.check().await;
      }

      debug!("Connectivity monitor stopped");
    });

    info!(interval_secs = interval.as_secs(), "Connectivity monitor started");

    MonitorTask {
      token,
      handle: Some(handle),
    }
  }
}

/// Running monitor. Dropping it stops the probing.
pub struct MonitorTask {
  token: CancellationToken,
  handle: Option<JoinHandle<()>>,
}

impl MonitorTask {
  /// Stop probing and wait for an in-flight probe or drain to finish.
  pub async fn shutdown(mut self) {
    self.token.cancel();
    if let Some(handle) = self.handle.take() {
      if let Err(e) = handle.await {
        warn!(error = %e, "Connectivity monitor task failed");
      }
    }
  }
}

impl Drop for MonitorTask {
  fn drop(&mut self) {
    self.token.cancel();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::UsageHours;
  use crate::queue::{Change, PendingQueue};
  use crate::store::{MemoryStore, SharedStore};
  use crate::testing::{usage_entry, FakeApi};

  fn setup(api: Arc<FakeApi>) -> (Arc<ConnectivityMonitor>, Arc<PendingQueue>, StatusHandle) {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let queue = Arc::new(PendingQueue::new(Arc::clone(&store)));
    let status = StatusHandle::new();
    let engine = Arc::new(SyncEngine::new(
      api.clone(),
      Arc::clone(&queue),
      store,
      status.clone(),
    ));
    let monitor = Arc::new(ConnectivityMonitor::new(
      api,
      engine,
      status.clone(),
      Duration::from_secs(20),
    ));
    (monitor, queue, status)
  }

  fn usage(tractor_id: &str) -> Change {
    Change::UsageLog(usage_entry(tractor_id, UsageHours::EndHours(100.0)))
  }

  #[tokio::test]
  async fn test_reconnect_drains_once() {
    let api = Arc::new(FakeApi::new());
    api.set_healthy(false);
    let (monitor, queue, status) = setup(api.clone());

    queue.enqueue(usage("T1")).unwrap();
    assert!(!monitor.check().await);
    assert_eq!(status.current().pending_count, 1);
    assert!(api.calls().is_empty());

    api.set_healthy(true);
    assert!(monitor.check().await);
    assert_eq!(api.calls(), vec!["log_usage:T1".to_string()]);
    assert_eq!(status.current().pending_count, 0);

    // Still online, nothing new to drain
    assert!(monitor.check().await);
    assert_eq!(api.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_steady_online_checks_do_not_notify() {
    let api = Arc::new(FakeApi::new());
    let (monitor, _queue, status) = setup(api);

    monitor.check().await;
    let mut rx = status.subscribe();
    rx.borrow_and_update();

    for _ in 0..5 {
      monitor.check().await;
    }
    assert!(!rx.has_changed().unwrap());
  }

  #[tokio::test]
  async fn test_health_checks_during_drain_do_not_notify_or_drain_again() {
    let api = Arc::new(FakeApi::new());
    api.set_healthy(false);
    let (monitor, queue, status) = setup(api.clone());

    queue.enqueue(usage("T1")).unwrap();
    monitor.check().await;

    api.set_healthy(true);
    let gate = api.hold_requests();
    let reconnecting = Arc::clone(&monitor);
    let running = tokio::spawn(async move { reconnecting.check().await });
    gate.entered.notified().await;

    let mut rx = status.subscribe();
    rx.borrow_and_update();
    for _ in 0..3 {
      assert!(monitor.check().await);
    }
    assert!(!rx.has_changed().unwrap());
    assert!(status.current().is_syncing);

    gate.release.notify_one();
    assert!(running.await.unwrap());
    assert_eq!(api.calls(), vec!["log_usage:T1".to_string()]);
    assert_eq!(status.current().pending_count, 0);
  }

  #[tokio::test]
  async fn test_shutdown_wins_over_ready_tick() {
    let api = Arc::new(FakeApi::new());
    let (monitor, _queue, _status) = setup(api.clone());

    // The first tick is ready at once; cancellation lands before the task runs
    let task = monitor.spawn();
    task.shutdown().await;

    assert_eq!(api.health_checks(), 0);
  }

  #[tokio::test]
  async fn test_already_online_does_not_drain() {
    let api = Arc::new(FakeApi::new());
    let (monitor, queue, _status) = setup(api.clone());

    monitor.check().await;
    queue.enqueue(usage("T1")).unwrap();
    monitor.check().await;

    // Only a transition drains; a manual sync picks this up
    assert!(api.calls().is_empty());
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_going_offline_is_published() {
    let api = Arc::new(FakeApi::new());
    let (monitor, _queue, status) = setup(api.clone());

    monitor.check().await;
    assert!(status.current().is_online);

    let mut rx = status.subscribe();
    rx.borrow_and_update();
    api.set_healthy(false);
    monitor.check().await;

    assert!(rx.has_changed().unwrap());
    assert!(!rx.borrow_and_update().is_online);
  }

  #[tokio::test]
  async fn test_spawned_monitor_checks_immediately_and_shuts_down() {
    let api = Arc::new(FakeApi::new());
    let (monitor, _queue, status) = setup(api);

    let mut rx = status.subscribe();
    let task = monitor.spawn();

    rx.changed().await.unwrap();
    assert!(rx.borrow().is_online);

    task.shutdown().await;
  }
}
