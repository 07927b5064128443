use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use crate::bus::{Bus, Callback, Change, Origin, Subscription};
use crate::collections::{self, Collection, Schema};
use crate::error::StoreError;
use crate::poll::{PollHandle, Poller, Seen, Snapshot};
use crate::store::Store;

/// Transient message for the acting user, e.g. "could not save, try again".
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub collection: Collection,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// The only surface dashboard code talks to. Callers never touch the
/// [`Store`] directly.
#[derive(Clone)]
pub struct Hub {
    store: Store,
    bus: Bus,
    toasts: Arc<Mutex<Vec<Toast>>>,
    pollers: Arc<Mutex<Vec<Weak<Seen>>>>,
}

impl Hub {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            bus: Bus::new(),
            toasts: Arc::default(),
            pollers: Arc::default(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn load<S: Schema>(&self) -> Result<Vec<S::Item>, StoreError> {
        collections::load::<S>(&self.store)
    }

    /// Persist `items` as the whole collection, then notify subscribers.
    ///
    /// A transient failure gets one immediate re-attempt. If the save still
    /// fails, a toast is recorded and the error is returned to the caller.
    pub fn save<S: Schema>(&self, items: &[S::Item]) -> Result<(), StoreError> {
        let collection = S::COLLECTION;
        let pollers = self.live_pollers();
        // Held across the write so no tick of ours reads it before it is recorded
        let mut seen: Vec<_> = pollers
            .iter()
            .map(|p| p.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();

        let result = match collections::save::<S>(&self.store, items) {
            Err(e) if e.is_transient() => {
                tracing::warn!(%collection, error = %e, "save failed, retrying once");
                collections::save::<S>(&self.store, items)
            }
            other => other,
        };

        match result {
            Ok(raw) => {
                for snapshot in &mut seen {
                    snapshot.insert(collection, Some(raw.clone()));
                }
            }
            Err(e) => {
                drop(seen);
                tracing::error!(%collection, error = %e, "save failed");
                self.toast(collection, format!("Could not save {}: {}. Please retry.", collection, e));
                return Err(e);
            }
        }
        drop(seen);

        self.bus.publish(&Change {
            collection,
            origin: Origin::Local,
        });
        Ok(())
    }

    /// Read-modify-write of one collection. Last write wins against other writers.
    pub fn update<S, R>(&self, f: impl FnOnce(&mut Vec<S::Item>) -> R) -> Result<R, StoreError>
    where
        S: Schema,
    {
        let mut items = self.load::<S>()?;
        let out = f(&mut items);
        self.save::<S>(&items)?;
        Ok(out)
    }

    pub fn subscribe<F>(&self, collection: Collection, callback: F) -> Subscription
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.bus.subscribe(collection, callback)
    }

    /// Poll `collections` for writes from other processes. Saves made through
    /// this hub are not reported. Requires a tokio runtime.
    pub fn poll<F>(&self, collections: &[Collection], interval: Duration, callback: F) -> PollHandle
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.spawn_poller(collections, interval, Arc::new(callback))
    }

    /// Subscribe and poll with one callback, the way a dashboard card mounts.
    /// Dropping the returned [`Mount`] releases both.
    pub fn mount<F>(&self, collections: &[Collection], interval: Duration, callback: F) -> Mount
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let subscriptions = collections
            .iter()
            .map(|&c| self.bus.subscribe_arc(c, Arc::clone(&callback)))
            .collect();
        let poller = self.spawn_poller(collections, interval, callback);
        Mount {
            subscriptions,
            poller: Some(poller),
        }
    }

    pub fn subscriber_count(&self, collection: Collection) -> usize {
        self.bus.subscriber_count(collection)
    }

    pub fn take_toasts(&self) -> Vec<Toast> {
        std::mem::take(&mut *self.toasts.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn spawn_poller(&self, collections: &[Collection], interval: Duration, callback: Callback) -> PollHandle {
        let poller = Poller::spawn(self.store.clone(), collections.to_vec(), interval, callback);
        let mut pollers = self.pollers.lock().unwrap_or_else(PoisonError::into_inner);
        pollers.retain(|p| p.strong_count() > 0);
        pollers.push(Arc::downgrade(&poller.snapshot()));
        poller
    }

    fn live_pollers(&self) -> Vec<Snapshot> {
        let mut pollers = self.pollers.lock().unwrap_or_else(PoisonError::into_inner);
        pollers.retain(|p| p.strong_count() > 0);
        pollers.iter().filter_map(Weak::upgrade).collect()
    }

    fn toast(&self, collection: Collection, message: String) {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Toast {
                collection,
                message,
                at: Utc::now(),
            });
    }
}

/// Subscriptions and poll timer owned by one mounted card.
pub struct Mount {
    subscriptions: Vec<Subscription>,
    poller: Option<PollHandle>,
}

impl Mount {
    /// Tear down, waiting for the poll task to finish.
    pub async fn unmount(mut self) {
        self.subscriptions.clear();
        if let Some(poller) = self.poller.take() {
            poller.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{Applications, Colleges, Notices};
    use crate::kv::MemoryBackend;
    use crate::models::{College, Notice};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hub() -> (Hub, MemoryBackend) {
        let backend = MemoryBackend::new();
        (Hub::new(Store::new(backend.clone())), backend)
    }

    fn notice(id: u64, content: &str) -> Notice {
        Notice { id, content: content.into(), timestamp: Utc::now() }
    }

    #[test]
    fn save_notifies_once_and_subscriber_sees_the_new_value() {
        let (hub, _) = hub();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reader = hub.clone();
        let sink = Arc::clone(&seen);
        let _sub = hub.subscribe(Collection::Notices, move |change| {
            assert_eq!(change.origin, Origin::Local);
            sink.lock().unwrap().push(reader.load::<Notices>().unwrap());
        });
        let calls_for_apps = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls_for_apps);
        let _apps = hub.subscribe(Collection::Applications, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let value = vec![notice(1, "Placement drive on Friday")];
        hub.save::<Notices>(&value).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], value);
        assert_eq!(calls_for_apps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_save_records_toast_and_does_not_notify() {
        let (hub, backend) = hub();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = hub.subscribe(Collection::Notices, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        backend.set_online(false);
        let err = hub.save::<Notices>(&[notice(1, "x")]).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let toasts = hub.take_toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].collection, Collection::Notices);
        assert!(hub.take_toasts().is_empty());
    }

    #[test]
    fn quota_exceeded_is_reported_to_the_caller() {
        let hub = Hub::new(Store::new(MemoryBackend::with_quota(64)));
        let big = vec![notice(1, &"x".repeat(200))];
        let err = hub.save::<Notices>(&big).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
        assert_eq!(hub.take_toasts().len(), 1);
        assert!(hub.load::<Notices>().unwrap().is_empty());
    }

    #[test]
    fn update_is_read_modify_write() {
        let (hub, _) = hub();
        let college = College {
            id: 1,
            name: "NIT Trichy".into(),
            location: "Tiruchirappalli".into(),
            students_count: 0,
            added_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        };
        let len = hub
            .update::<Colleges, _>(|items| {
                items.push(college.clone());
                items.len()
            })
            .unwrap();
        assert_eq!(len, 1);
        assert_eq!(hub.load::<Colleges>().unwrap(), vec![college]);
    }

    #[test]
    fn update_does_not_write_when_the_read_fails() {
        let (hub, backend) = hub();
        hub.save::<Notices>(&[notice(1, "keep me")]).unwrap();
        backend.set_online(false);
        assert!(hub.update::<Notices, _>(|items| items.clear()).is_err());
        backend.set_online(true);
        assert_eq!(hub.load::<Notices>().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mount_registers_and_unmount_releases() {
        let (hub, _) = hub();
        let mount = hub.mount(
            &[Collection::Applications, Collection::Shortlisted],
            Duration::from_millis(20),
            |_| {},
        );
        assert_eq!(hub.subscriber_count(Collection::Applications), 1);
        assert_eq!(hub.subscriber_count(Collection::Shortlisted), 1);
        mount.unmount().await;
        assert_eq!(hub.subscriber_count(Collection::Applications), 0);
        assert_eq!(hub.subscriber_count(Collection::Shortlisted), 0);
    }

    #[tokio::test]
    async fn poll_alone_sees_writes_from_another_hub() {
        let (hub, backend) = hub();
        let other_tab = Hub::new(Store::new(backend));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handle = hub.poll(&[Collection::Notices], Duration::from_millis(20), move |change| {
            assert_eq!(change.origin, Origin::Poll);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        other_tab.save::<Notices>(&[notice(1, "Exam schedule out")]).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // The in-process bus of this hub never heard of that write
        assert_eq!(hub.subscriber_count(Collection::Notices), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn mounted_card_hears_a_local_save_once() {
        let (hub, backend) = hub();
        let changes: Arc<Mutex<Vec<Change>>> = Arc::default();
        let sink = Arc::clone(&changes);
        let mount = hub.mount(&[Collection::Notices], Duration::from_millis(20), move |change| {
            sink.lock().unwrap().push(*change);
        });

        hub.save::<Notices>(&[notice(1, "Placement drive on Friday")]).unwrap();
        tokio::time::sleep(Duration::from_millis(160)).await;
        assert_eq!(
            *changes.lock().unwrap(),
            vec![Change { collection: Collection::Notices, origin: Origin::Local }]
        );

        // Another writer is still picked up by the same mount
        let other_tab = Hub::new(Store::new(backend));
        other_tab.save::<Notices>(&[notice(2, "Results are out")]).unwrap();
        tokio::time::sleep(Duration::from_millis(160)).await;
        let seen = changes.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].origin, Origin::Poll);
        mount.unmount().await;
    }

    #[tokio::test]
    async fn callback_may_save_from_inside_a_poll_notification() {
        let (hub, backend) = hub();
        let writer = hub.clone();
        let mount = hub.mount(&[Collection::Notices], Duration::from_millis(20), move |change| {
            if change.origin == Origin::Poll {
                writer.save::<Colleges>(&[]).unwrap();
            }
        });
        Hub::new(Store::new(backend)).save::<Notices>(&[notice(1, "x")]).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(hub.store().get_raw("colleges").unwrap(), Some("[]".to_string()));
        mount.unmount().await;
    }

    #[tokio::test]
    async fn repeated_mounts_do_not_accumulate() {
        let (hub, _) = hub();
        for _ in 0..10 {
            let mount = hub.mount(&[Collection::Applications], Duration::from_millis(20), |_| {});
            drop(mount);
        }
        assert_eq!(hub.subscriber_count(Collection::Applications), 0);
        hub.save::<Applications>(&[]).unwrap();
    }
}
