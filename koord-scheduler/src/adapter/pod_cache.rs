// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The scheduler's pod cache: added and assumed pods, indexed by node.
//!
//! Reservations mirror into this cache as synthetic reserve pods, so it
//! is the one place where "what occupies this node" is answered.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use koord_common::error::{Result, SchedulerError};
use koord_common::objects::{Pod, Uid};
use parking_lot::RwLock;

#[derive(Default)]
struct PodCacheInner {
    pods: HashMap<Uid, Arc<Pod>>,
    assumed: HashSet<Uid>,
    by_node: HashMap<String, HashSet<Uid>>,
}

impl PodCacheInner {
    fn index(&mut self, pod: &Arc<Pod>) {
        if let Some(node) = pod.node_name() {
            self.by_node
                .entry(node.to_string())
                .or_default()
                .insert(pod.uid().clone());
        }
    }

    fn unindex(&mut self, pod: &Arc<Pod>) {
        if let Some(node) = pod.node_name() {
            if let Some(set) = self.by_node.get_mut(node) {
                set.remove(pod.uid());
                if set.is_empty() {
                    self.by_node.remove(node);
                }
            }
        }
    }
}

/// Shared pod cache. Only the scheduler adapter mutates it.
#[derive(Default)]
pub struct PodCache {
    inner: RwLock<PodCacheInner>,
}

impl PodCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assume a pod onto a node ahead of the bind.
    pub fn assume_pod(&self, pod: Arc<Pod>) -> Result<()> {
        let mut inner = self.inner.write();
        let uid = pod.uid().clone();
        if inner.pods.contains_key(&uid) {
            return Err(SchedulerError::internal(format!(
                "pod {} is already in the cache",
                pod.id()
            )));
        }
        inner.index(&pod);
        inner.pods.insert(uid.clone(), pod);
        inner.assumed.insert(uid);
        Ok(())
    }

    /// Drop an assumed pod that did not get bound.
    pub fn forget_pod(&self, pod: &Pod) -> Result<()> {
        let mut inner = self.inner.write();
        let uid = pod.uid();
        if !inner.assumed.contains(uid) {
            return Err(SchedulerError::not_found(format!(
                "pod {} is not assumed",
                pod.id()
            )));
        }
        let stored = inner.pods.remove(uid);
        if let Some(stored) = stored {
            inner.unindex(&stored);
        }
        inner.assumed.remove(uid);
        Ok(())
    }

    /// Add (or confirm) a pod. Confirming clears the assumed mark.
    pub fn add_pod(&self, pod: Arc<Pod>) -> Result<()> {
        let mut inner = self.inner.write();
        let uid = pod.uid().clone();
        if let Some(old) = inner.pods.remove(&uid) {
            inner.unindex(&old);
        }
        inner.index(&pod);
        inner.pods.insert(uid.clone(), pod);
        inner.assumed.remove(&uid);
        Ok(())
    }

    pub fn update_pod(&self, old: &Arc<Pod>, new: Arc<Pod>) -> Result<()> {
        let mut inner = self.inner.write();
        let uid = new.uid().clone();
        if !inner.pods.contains_key(&uid) {
            return Err(SchedulerError::not_found(format!(
                "pod {} is not in the cache",
                new.id()
            )));
        }
        inner.unindex(old);
        inner.index(&new);
        inner.pods.insert(uid, new);
        Ok(())
    }

    pub fn remove_pod(&self, pod: &Pod) -> Result<()> {
        let mut inner = self.inner.write();
        let uid = pod.uid();
        match inner.pods.remove(uid) {
            Some(stored) => {
                inner.unindex(&stored);
                inner.assumed.remove(uid);
                Ok(())
            }
            None => Err(SchedulerError::not_found(format!(
                "pod {} is not in the cache",
                pod.id()
            ))),
        }
    }

    pub fn get_pod(&self, uid: &Uid) -> Option<Arc<Pod>> {
        self.inner.read().pods.get(uid).cloned()
    }

    pub fn is_assumed_pod(&self, uid: &Uid) -> bool {
        self.inner.read().assumed.contains(uid)
    }

    pub fn pods_on_node(&self, node: &str) -> Vec<Arc<Pod>> {
        let inner = self.inner.read();
        inner
            .by_node
            .get(node)
            .map(|uids| {
                uids.iter()
                    .filter_map(|uid| inner.pods.get(uid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().pods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koord_common::objects::ObjectMeta;

    fn make_pod(name: &str, node: Option<&str>) -> Arc<Pod> {
        let mut pod = Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "ns".to_string(),
                uid: format!("uid-{name}"),
                ..Default::default()
            },
            ..Default::default()
        };
        pod.spec.node_name = node.map(|n| n.to_string());
        Arc::new(pod)
    }

    #[test]
    fn test_add_get_remove() {
        let cache = PodCache::new();
        let pod = make_pod("p1", Some("n1"));
        cache.add_pod(pod.clone()).unwrap();
        assert_eq!(cache.get_pod(pod.uid()).unwrap().id(), "ns/p1");
        assert_eq!(cache.pods_on_node("n1").len(), 1);

        cache.remove_pod(&pod).unwrap();
        assert!(cache.get_pod(pod.uid()).is_none());
        assert!(cache.pods_on_node("n1").is_empty());
        assert!(cache.remove_pod(&pod).is_err());
    }

    #[test]
    fn test_assume_and_confirm() {
        let cache = PodCache::new();
        let pod = make_pod("p1", Some("n1"));
        cache.assume_pod(pod.clone()).unwrap();
        assert!(cache.is_assumed_pod(pod.uid()));

        cache.add_pod(pod.clone()).unwrap();
        assert!(!cache.is_assumed_pod(pod.uid()));
    }

    #[test]
    fn test_assume_and_forget() {
        let cache = PodCache::new();
        let pod = make_pod("p1", Some("n1"));
        cache.assume_pod(pod.clone()).unwrap();
        cache.forget_pod(&pod).unwrap();
        assert!(cache.get_pod(pod.uid()).is_none());
        assert!(cache.forget_pod(&pod).is_err());
    }

    #[test]
    fn test_update_reindexes_node() {
        let cache = PodCache::new();
        let old = make_pod("p1", Some("n1"));
        cache.add_pod(old.clone()).unwrap();

        let new = make_pod("p1", Some("n2"));
        cache.update_pod(&old, new).unwrap();
        assert!(cache.pods_on_node("n1").is_empty());
        assert_eq!(cache.pods_on_node("n2").len(), 1);
    }
}
