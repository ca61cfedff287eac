// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Typed watch event sources.
//!
//! Each watched resource (pods, pod groups, quotas, reservations, nodes,
//! config maps) is a lazy, restartable sequence of add/update/delete
//! events with initial-list-completion signalling. A source keeps a
//! store of the current objects so that a late subscriber first receives
//! the initial list and a lagged subscriber can resync from the store.
//!
//! Handlers are plain objects invoked synchronously by a long-lived
//! worker task draining one typed channel; they never block the
//! scheduling cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// An object that can be tracked by an event source.
pub trait WatchObject: Send + Sync + 'static {
    /// Store key. Namespaced objects use `"namespace/name"`,
    /// cluster-scoped objects use the bare name.
    fn store_key(&self) -> String;
}

macro_rules! impl_watch_object {
    (namespaced $ty:ty) => {
        impl WatchObject for $ty {
            fn store_key(&self) -> String {
                self.metadata.id()
            }
        }
    };
    (cluster $ty:ty) => {
        impl WatchObject for $ty {
            fn store_key(&self) -> String {
                self.metadata.name.clone()
            }
        }
    };
}

impl_watch_object!(namespaced koord_common::objects::Pod);
impl_watch_object!(namespaced koord_common::objects::PodGroup);
impl_watch_object!(namespaced koord_common::objects::ConfigMap);
impl_watch_object!(cluster koord_common::objects::ElasticQuota);
impl_watch_object!(cluster koord_common::objects::Reservation);
impl_watch_object!(cluster koord_common::objects::Node);

/// One watch event.
#[derive(Debug)]
pub enum WatchEvent<T> {
    Added(Arc<T>),
    Updated { old: Arc<T>, new: Arc<T> },
    Deleted(Arc<T>),
}

impl<T> Clone for WatchEvent<T> {
    fn clone(&self) -> Self {
        match self {
            WatchEvent::Added(obj) => WatchEvent::Added(obj.clone()),
            WatchEvent::Updated { old, new } => WatchEvent::Updated {
                old: old.clone(),
                new: new.clone(),
            },
            WatchEvent::Deleted(obj) => WatchEvent::Deleted(obj.clone()),
        }
    }
}

/// Handler callbacks for one resource type.
pub trait EventHandler<T>: Send + Sync {
    fn on_add(&self, obj: &Arc<T>);
    fn on_update(&self, old: &Arc<T>, new: &Arc<T>);
    fn on_delete(&self, obj: &Arc<T>);
}

/// A watch source for one resource type.
pub struct EventSource<T> {
    name: &'static str,
    store: RwLock<HashMap<String, Arc<T>>>,
    tx: broadcast::Sender<WatchEvent<T>>,
    synced: AtomicBool,
}

impl<T: WatchObject> EventSource<T> {
    pub fn new(name: &'static str) -> Arc<Self> {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            name,
            store: RwLock::new(HashMap::new()),
            tx,
            synced: AtomicBool::new(false),
        })
    }

    /// Feed an add event.
    pub fn add(&self, obj: T) {
        let obj = Arc::new(obj);
        self.store.write().insert(obj.store_key(), obj.clone());
        let _ = self.tx.send(WatchEvent::Added(obj));
    }

    /// Feed an update event. Falls back to add when the object is not in
    /// the store (a restarted watch can replay updates for unseen keys).
    pub fn update(&self, obj: T) {
        let obj = Arc::new(obj);
        let old = self.store.write().insert(obj.store_key(), obj.clone());
        match old {
            Some(old) => {
                let _ = self.tx.send(WatchEvent::Updated { old, new: obj });
            }
            None => {
                let _ = self.tx.send(WatchEvent::Added(obj));
            }
        }
    }

    /// Feed a delete event.
    pub fn delete(&self, obj: T) {
        let key = obj.store_key();
        let stored = self.store.write().remove(&key);
        // Prefer the stored object: the tombstone may be stale.
        let obj = stored.unwrap_or_else(|| Arc::new(obj));
        let _ = self.tx.send(WatchEvent::Deleted(obj));
    }

    /// Signal that the initial list completed.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Snapshot of the current objects.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.store.read().values().cloned().collect()
    }

    /// Lookup by store key.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.store.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    /// Subscribe to the raw event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.tx.subscribe()
    }

    /// Spawn a worker that replays the current store to `handler` as adds
    /// and then dispatches live events. A lagged worker resyncs from the
    /// store instead of dying.
    pub fn spawn_handler(
        self: &Arc<Self>,
        worker: &'static str,
        handler: Arc<dyn EventHandler<T>>,
    ) -> JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move {
            let mut rx = source.subscribe();
            for obj in source.list() {
                handler.on_add(&obj);
            }
            loop {
                match rx.recv().await {
                    Ok(WatchEvent::Added(obj)) => handler.on_add(&obj),
                    Ok(WatchEvent::Updated { old, new }) => handler.on_update(&old, &new),
                    Ok(WatchEvent::Deleted(obj)) => handler.on_delete(&obj),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            source = source.name,
                            worker,
                            missed = n,
                            "event worker lagged, resyncing from store"
                        );
                        for obj in source.list() {
                            handler.on_add(&obj);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
