use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bus::{Callback, Change, Origin};
use crate::collections::Collection;
use crate::store::Store;

/// Last raw value seen per collection. A hub writes into this after its own
/// saves so they are not reported back as another writer's change.
pub(crate) type Seen = Mutex<HashMap<Collection, Option<String>>>;
pub(crate) type Snapshot = Arc<Seen>;

/// Re-reads watched collections on an interval and reports the ones whose
/// stored value changed since the last look.
pub struct Poller;

impl Poller {
    /// Start polling `collections` every `interval` on the current tokio runtime.
    ///
    /// The first snapshot is taken before this returns, so any write made
    /// after `spawn` is reported on a later tick.
    pub fn spawn(
        store: Store,
        collections: Vec<Collection>,
        interval: Duration,
        callback: Callback,
    ) -> PollHandle {
        let mut seen: HashMap<Collection, Option<String>> = HashMap::new();
        for &collection in &collections {
            match store.get_raw(collection.key()) {
                Ok(raw) => {
                    seen.insert(collection, raw);
                }
                Err(e) => {
                    tracing::warn!(%collection, error = %e, "initial poll read failed");
                }
            }
        }

        let seen: Snapshot = Arc::new(Mutex::new(seen));
        let shared = Arc::clone(&seen);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the snapshot already covers it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
                poll_once(&store, &collections, &shared, &callback);
            }
            tracing::debug!("poller stopped");
        });

        PollHandle {
            shutdown_tx,
            task: Some(task),
            seen,
        }
    }
}

fn poll_once(
    store: &Store,
    collections: &[Collection],
    seen: &Seen,
    callback: &Callback,
) {
    let mut changed = Vec::new();
    {
        let mut seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
        for &collection in collections {
            let raw = match store.get_raw(collection.key()) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(%collection, error = %e, "poll failed, skipping this cycle");
                    continue;
                }
            };
            // A collection we could never read counts as changed once it becomes readable
            if seen.get(&collection) == Some(&raw) {
                continue;
            }
            seen.insert(collection, raw);
            changed.push(collection);
        }
    }

    for collection in changed {
        callback(&Change {
            collection,
            origin: Origin::Poll,
        });
    }
}

/// Owns a running poller. Dropping it stops the timer.
pub struct PollHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    seen: Snapshot,
}

impl PollHandle {
    /// Stop the poller and wait for its task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "poller task panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.seen)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = self.shutdown_tx.send(true);
            task.abort();
        }
    }
}
