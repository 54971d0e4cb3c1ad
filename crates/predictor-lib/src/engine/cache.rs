//! Per-type backend cache with at most one load in flight per key
//!
//! A load runs on its own task and publishes through a watch channel, so a
//! caller that gives up waiting does not abandon it. Later callers subscribe
//! to the same in-flight load instead of starting another.

use super::BackendHandle;
use crate::models::BackendKind;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

type Slot = watch::Receiver<Option<Arc<BackendHandle>>>;

pub(crate) struct BackendCache {
    slots: DashMap<BackendKind, Slot>,
}

impl BackendCache {
    /// Cache with the heuristic handle already resident
    pub(crate) fn new(heuristic: Arc<BackendHandle>) -> Self {
        let slots = DashMap::new();
        let (_, resident) = watch::channel(Some(heuristic));
        slots.insert(BackendKind::Heuristic, resident);
        Self { slots }
    }

    /// Handle for `kind` if it has finished loading
    pub(crate) fn peek(&self, kind: BackendKind) -> Option<Arc<BackendHandle>> {
        self.slots.get(&kind).and_then(|slot| slot.borrow().clone())
    }

    /// Cached handle, or the result of the single load started for `kind`.
    ///
    /// `None` only if the load task died without publishing.
    pub(crate) async fn get_or_load<F, Fut>(&self, kind: BackendKind, load: F) -> Option<Arc<BackendHandle>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Arc<BackendHandle>> + Send + 'static,
    {
        // The map guard is released before any await
        let mut slot = match self.slots.entry(kind) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx.clone());
                let load = load();
                tokio::spawn(async move {
                    tx.send_replace(Some(load.await));
                });
                rx
            }
        };

        let ready = slot.wait_for(Option::is_some).await.ok()?;
        let handle = (*ready).clone();
        handle
    }
}
