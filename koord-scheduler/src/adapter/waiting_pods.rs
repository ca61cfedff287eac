// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Pods suspended at the Permit extension point.
//!
//! Each waiting pod owns a oneshot verdict channel; dropping the entry
//! cancels the waiter. Waiters are released by a group-satisfied signal,
//! pod deletion, or an explicit reject.

use std::collections::HashMap;
use std::sync::Arc;

use koord_common::objects::{Pod, Uid};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Outcome delivered to a waiting pod.
#[derive(Debug, Clone, PartialEq)]
pub enum PermitVerdict {
    Allow,
    Reject(String),
}

struct WaitingPod {
    pod: Arc<Pod>,
    /// Gang group the pod waits for, if any.
    group_id: Option<String>,
    tx: oneshot::Sender<PermitVerdict>,
}

/// Registry of permit-stage waiters, keyed by pod UID.
#[derive(Default)]
pub struct WaitingPodsMap {
    inner: Mutex<HashMap<Uid, WaitingPod>>,
}

impl WaitingPodsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. A pod already waiting keeps its old channel;
    /// the new receiver resolves to an immediate rejection.
    pub fn insert(
        &self,
        pod: Arc<Pod>,
        group_id: Option<String>,
    ) -> oneshot::Receiver<PermitVerdict> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let uid = pod.uid().clone();
        if inner.contains_key(&uid) {
            let _ = tx.send(PermitVerdict::Reject(format!(
                "pod {} is already waiting at permit",
                pod.id()
            )));
            return rx;
        }
        inner.insert(
            uid,
            WaitingPod {
                pod,
                group_id,
                tx,
            },
        );
        rx
    }

    /// Allow one waiting pod. Returns false when the pod is not waiting.
    pub fn allow(&self, uid: &Uid) -> bool {
        match self.inner.lock().remove(uid) {
            Some(waiting) => {
                let _ = waiting.tx.send(PermitVerdict::Allow);
                true
            }
            None => false,
        }
    }

    /// Reject one waiting pod. Returns the pod if it was waiting.
    pub fn reject(&self, uid: &Uid, reason: &str) -> Option<Arc<Pod>> {
        self.inner.lock().remove(uid).map(|waiting| {
            let _ = waiting
                .tx
                .send(PermitVerdict::Reject(reason.to_string()));
            waiting.pod
        })
    }

    /// Allow every waiter of the given gang group. Returns the released
    /// pods.
    pub fn allow_group(&self, group_id: &str) -> Vec<Arc<Pod>> {
        self.release_group(group_id, None)
    }

    /// Reject every waiter of the given gang group. Returns the released
    /// pods.
    pub fn reject_group(&self, group_id: &str, reason: &str) -> Vec<Arc<Pod>> {
        self.release_group(group_id, Some(reason))
    }

    fn release_group(&self, group_id: &str, reject_reason: Option<&str>) -> Vec<Arc<Pod>> {
        let mut inner = self.inner.lock();
        let uids: Vec<Uid> = inner
            .iter()
            .filter(|(_, w)| w.group_id.as_deref() == Some(group_id))
            .map(|(uid, _)| uid.clone())
            .collect();
        let mut released = Vec::with_capacity(uids.len());
        for uid in uids {
            if let Some(waiting) = inner.remove(&uid) {
                let verdict = match reject_reason {
                    None => PermitVerdict::Allow,
                    Some(reason) => PermitVerdict::Reject(reason.to_string()),
                };
                let _ = waiting.tx.send(verdict);
                released.push(waiting.pod);
            }
        }
        released
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.inner.lock().contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koord_common::objects::ObjectMeta;

    fn make_pod(name: &str) -> Arc<Pod> {
        Arc::new(Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "ns".to_string(),
                uid: format!("uid-{name}"),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_allow_releases_waiter() {
        let map = WaitingPodsMap::new();
        let pod = make_pod("p1");
        let rx = map.insert(pod.clone(), None);
        assert!(map.contains(pod.uid()));

        assert!(map.allow(pod.uid()));
        assert_eq!(rx.await.unwrap(), PermitVerdict::Allow);
        assert!(!map.contains(pod.uid()));
    }

    #[tokio::test]
    async fn test_reject_carries_reason() {
        let map = WaitingPodsMap::new();
        let pod = make_pod("p1");
        let rx = map.insert(pod.clone(), None);

        map.reject(pod.uid(), "pod deleted");
        assert_eq!(
            rx.await.unwrap(),
            PermitVerdict::Reject("pod deleted".to_string())
        );
    }

    #[tokio::test]
    async fn test_group_release() {
        let map = WaitingPodsMap::new();
        let p1 = make_pod("p1");
        let p2 = make_pod("p2");
        let p3 = make_pod("p3");
        let rx1 = map.insert(p1, Some("g".to_string()));
        let rx2 = map.insert(p2, Some("g".to_string()));
        let rx3 = map.insert(p3, Some("other".to_string()));

        let released = map.allow_group("g");
        assert_eq!(released.len(), 2);
        assert_eq!(rx1.await.unwrap(), PermitVerdict::Allow);
        assert_eq!(rx2.await.unwrap(), PermitVerdict::Allow);
        // The other group is untouched.
        assert_eq!(map.len(), 1);
        drop(rx3);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let map = WaitingPodsMap::new();
        let pod = make_pod("p1");
        let _rx1 = map.insert(pod.clone(), None);
        let rx2 = map.insert(pod.clone(), None);
        match rx2.await.unwrap() {
            PermitVerdict::Reject(reason) => assert!(reason.contains("already waiting")),
            other => panic!("expected reject, got {other:?}"),
        }
        assert_eq!(map.len(), 1);
    }
}
