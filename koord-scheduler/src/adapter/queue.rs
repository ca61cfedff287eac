// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The scheduling queue: active FIFO, backoff set, unschedulable map.
//!
//! Pods enter active, get popped by the scheduling loop (one cycle at a
//! time), and on failure land in unschedulable until a cluster event
//! moves them back. `done` closes the in-flight window of one attempt.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use koord_common::error::{Result, SchedulerError};
use koord_common::objects::{Pod, Uid};
use parking_lot::Mutex;

/// Queue-event reasons used with `move_all_to_active_or_backoff`.
pub const ASSIGNED_POD_ADD: &str = "AssignedPodAdd";
pub const ASSIGNED_POD_DELETE: &str = "AssignedPodDelete";

/// A queued pod plus its scheduling bookkeeping.
#[derive(Debug, Clone)]
pub struct QueuedPodInfo {
    pub pod: Arc<Pod>,
    /// Number of scheduling attempts so far.
    pub attempts: u32,
    /// Plugins that reported the pod unschedulable on the last attempt.
    pub unschedulable_plugins: Vec<String>,
    /// Scheduling cycle at which the pod entered the unschedulable map.
    pub queued_cycle: i64,
}

impl QueuedPodInfo {
    pub fn new(pod: Arc<Pod>) -> Self {
        Self {
            pod,
            attempts: 0,
            unschedulable_plugins: Vec::new(),
            queued_cycle: 0,
        }
    }

    pub fn uid(&self) -> &Uid {
        self.pod.uid()
    }
}

#[derive(Default)]
struct QueueInner {
    active: VecDeque<Uid>,
    active_set: HashSet<Uid>,
    backoff: VecDeque<Uid>,
    backoff_set: HashSet<Uid>,
    unschedulable: HashSet<Uid>,
    /// Payload for every queued pod, whichever sub-queue holds it.
    pods: HashMap<Uid, QueuedPodInfo>,
    /// Popped but not yet `done`.
    in_flight: HashSet<Uid>,
}

impl QueueInner {
    fn is_queued(&self, uid: &Uid) -> bool {
        self.active_set.contains(uid)
            || self.backoff_set.contains(uid)
            || self.unschedulable.contains(uid)
    }

    fn detach(&mut self, uid: &Uid) {
        if self.active_set.remove(uid) {
            self.active.retain(|u| u != uid);
        }
        if self.backoff_set.remove(uid) {
            self.backoff.retain(|u| u != uid);
        }
        self.unschedulable.remove(uid);
    }

    fn push_active(&mut self, uid: Uid) {
        if self.active_set.insert(uid.clone()) {
            self.active.push_back(uid);
        }
    }

    fn push_backoff(&mut self, uid: Uid) {
        if self.backoff_set.insert(uid.clone()) {
            self.backoff.push_back(uid);
        }
    }
}

/// The scheduling queue shared by all plugins.
pub struct SchedulingQueue {
    inner: Mutex<QueueInner>,
    cycle: AtomicI64,
    done_calls: AtomicU64,
}

impl Default for SchedulingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            cycle: AtomicI64::new(1),
            done_calls: AtomicU64::new(0),
        }
    }

    /// Add a new pod to the active queue.
    pub fn add(&self, pod: Arc<Pod>) {
        let mut inner = self.inner.lock();
        let uid = pod.uid().clone();
        inner
            .pods
            .entry(uid.clone())
            .or_insert_with(|| QueuedPodInfo::new(pod.clone()))
            .pod = pod.clone();
        if !inner.is_queued(&uid) {
            inner.push_active(uid);
        }
    }

    /// Update a queued pod in place. An unschedulable pod whose object
    /// changed may have become schedulable, so it moves back to active.
    pub fn update(&self, _old: &Arc<Pod>, new: Arc<Pod>) {
        let mut inner = self.inner.lock();
        let uid = new.uid().clone();
        if inner.in_flight.contains(&uid) {
            // Mid-attempt updates are picked up by the failure path.
            return;
        }
        match inner.pods.get_mut(&uid) {
            Some(info) => info.pod = new,
            None => {
                inner.pods.insert(uid.clone(), QueuedPodInfo::new(new));
                inner.push_active(uid.clone());
                return;
            }
        }
        if inner.unschedulable.remove(&uid) {
            inner.push_active(uid);
        }
    }

    /// Remove a pod from the queue entirely.
    pub fn delete(&self, pod: &Pod) {
        let mut inner = self.inner.lock();
        let uid = pod.uid().clone();
        inner.detach(&uid);
        inner.pods.remove(&uid);
    }

    /// Move the given pods from the unschedulable/backoff sets back to
    /// active. Unknown pods are ignored; the caller only re-nudges.
    pub fn activate(&self, pods: HashMap<String, Arc<Pod>>) {
        let mut inner = self.inner.lock();
        for pod in pods.into_values() {
            let uid = pod.uid().clone();
            if inner.unschedulable.contains(&uid) || inner.backoff_set.contains(&uid) {
                inner.detach(&uid);
                inner.push_active(uid);
            }
        }
    }

    /// Park a failed pod in the unschedulable map. Fails if the pod is
    /// already in active or backoff. If the scheduling cycle advanced
    /// past `enqueue_cycle`, a cluster event may have been missed, so the
    /// pod goes to backoff instead. Calls `done` internally.
    pub fn add_unschedulable_if_not_present(
        &self,
        mut info: QueuedPodInfo,
        enqueue_cycle: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let uid = info.uid().clone();
        if inner.active_set.contains(&uid) || inner.backoff_set.contains(&uid) {
            self.done_locked(&mut inner, &uid);
            return Err(SchedulerError::internal(format!(
                "pod {} is already present in the active/backoff queue",
                info.pod.id()
            )));
        }
        if inner.unschedulable.contains(&uid) {
            self.done_locked(&mut inner, &uid);
            return Ok(());
        }
        info.queued_cycle = enqueue_cycle;
        let missed_events = self.cycle.load(Ordering::SeqCst) > enqueue_cycle;
        inner.pods.insert(uid.clone(), info);
        if missed_events {
            inner.push_backoff(uid.clone());
        } else {
            inner.unschedulable.insert(uid.clone());
        }
        self.done_locked(&mut inner, &uid);
        Ok(())
    }

    /// Move every unschedulable pod to active or backoff: attempted pods
    /// back off first, fresh pods go straight to active.
    pub fn move_all_to_active_or_backoff(&self, reason: &str) {
        let mut inner = self.inner.lock();
        let uids: Vec<Uid> = inner.unschedulable.drain().collect();
        tracing::debug!(reason, moved = uids.len(), "moving unschedulable pods");
        for uid in uids {
            let backoff = inner.pods.get(&uid).is_some_and(|p| p.attempts > 1);
            if backoff {
                inner.push_backoff(uid);
            } else {
                inner.push_active(uid);
            }
        }
    }

    /// An assigned pod appeared (bind or reservation mirror): wake
    /// unschedulable pods that may now fit.
    pub fn assigned_pod_added(&self, _pod: &Pod) {
        self.move_all_to_active_or_backoff(ASSIGNED_POD_ADD);
    }

    /// Pop the next pod for a scheduling attempt. Advances the cycle.
    pub fn pop(&self) -> Option<QueuedPodInfo> {
        let mut inner = self.inner.lock();
        let uid = loop {
            let uid = inner.active.pop_front()?;
            if inner.active_set.remove(&uid) {
                break uid;
            }
        };
        let mut info = inner.pods.remove(&uid)?;
        info.attempts += 1;
        inner.in_flight.insert(uid);
        self.cycle.fetch_add(1, Ordering::SeqCst);
        Some(info)
    }

    /// Close the in-flight window of one scheduling attempt.
    pub fn done(&self, uid: &Uid) {
        let mut inner = self.inner.lock();
        self.done_locked(&mut inner, uid);
    }

    fn done_locked(&self, inner: &mut QueueInner, uid: &Uid) {
        inner.in_flight.remove(uid);
        self.done_calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Current scheduling cycle number.
    pub fn scheduling_cycle(&self) -> i64 {
        self.cycle.load(Ordering::SeqCst)
    }

    /// Flush every backed-off pod back to active. Driven periodically.
    pub fn flush_backoff(&self) {
        let mut inner = self.inner.lock();
        while let Some(uid) = inner.backoff.pop_front() {
            inner.backoff_set.remove(&uid);
            inner.push_active(uid);
        }
    }

    // ─── Introspection ─────────────────────────────────────────────────

    pub fn num_active(&self) -> usize {
        self.inner.lock().active.len()
    }

    pub fn num_backoff(&self) -> usize {
        self.inner.lock().backoff.len()
    }

    pub fn num_unschedulable(&self) -> usize {
        self.inner.lock().unschedulable.len()
    }

    pub fn num_in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub fn is_unschedulable(&self, uid: &Uid) -> bool {
        self.inner.lock().unschedulable.contains(uid)
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.inner.lock().is_queued(uid)
    }

    /// Total `done` calls since startup.
    pub fn done_call_count(&self) -> u64 {
        self.done_calls.load(Ordering::SeqCst)
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

    #[test]
    fn test_add_pop_done() {
        let queue = SchedulingQueue::new();
        queue.add(make_pod("p1"));
        assert_eq!(queue.num_active(), 1);

        let info = queue.pop().unwrap();
        assert_eq!(info.pod.id(), "ns/p1");
        assert_eq!(info.attempts, 1);
        assert_eq!(queue.num_in_flight(), 1);

        queue.done(info.uid());
        assert_eq!(queue.num_in_flight(), 0);
        assert_eq!(queue.done_call_count(), 1);
    }

    #[test]
    fn test_add_is_idempotent() {
        let queue = SchedulingQueue::new();
        queue.add(make_pod("p1"));
        queue.add(make_pod("p1"));
        assert_eq!(queue.num_active(), 1);
    }

    #[test]
    fn test_unschedulable_then_activate() {
        let queue = SchedulingQueue::new();
        queue.add(make_pod("p1"));
        let info = queue.pop().unwrap();
        let cycle = queue.scheduling_cycle();
        queue.add_unschedulable_if_not_present(info, cycle).unwrap();
        assert_eq!(queue.num_unschedulable(), 1);
        assert_eq!(queue.done_call_count(), 1);

        let pod = make_pod("p1");
        queue.activate(HashMap::from([(pod.id(), pod)]));
        assert_eq!(queue.num_unschedulable(), 0);
        assert_eq!(queue.num_active(), 1);
    }

    #[test]
    fn test_activate_ignores_unknown_pods() {
        let queue = SchedulingQueue::new();
        let pod = make_pod("ghost");
        queue.activate(HashMap::from([(pod.id(), pod)]));
        assert_eq!(queue.num_active(), 0);
    }

    #[test]
    fn test_stale_cycle_goes_to_backoff() {
        let queue = SchedulingQueue::new();
        queue.add(make_pod("p1"));
        queue.add(make_pod("p2"));
        let info = queue.pop().unwrap();
        let stale_cycle = queue.scheduling_cycle();
        // Another pop advances the cycle past the recorded one.
        let other = queue.pop().unwrap();
        queue.done(other.uid());

        queue
            .add_unschedulable_if_not_present(info, stale_cycle - 1)
            .unwrap();
        assert_eq!(queue.num_backoff(), 1);
        assert_eq!(queue.num_unschedulable(), 0);
    }

    #[test]
    fn test_move_all_to_active_or_backoff() {
        let queue = SchedulingQueue::new();
        queue.add(make_pod("p1"));
        let info = queue.pop().unwrap();
        let cycle = queue.scheduling_cycle();
        queue.add_unschedulable_if_not_present(info, cycle).unwrap();

        queue.move_all_to_active_or_backoff(ASSIGNED_POD_DELETE);
        assert_eq!(queue.num_unschedulable(), 0);
        assert_eq!(queue.num_active(), 1);
    }

    #[test]
    fn test_flush_backoff() {
        let queue = SchedulingQueue::new();
        queue.add(make_pod("p1"));
        queue.add(make_pod("p2"));
        let info = queue.pop().unwrap();
        let stale = queue.scheduling_cycle() - 1;
        let other = queue.pop().unwrap();
        queue.done(other.uid());
        queue.add_unschedulable_if_not_present(info, stale).unwrap();
        assert_eq!(queue.num_backoff(), 1);

        queue.flush_backoff();
        assert_eq!(queue.num_backoff(), 0);
        assert_eq!(queue.num_active(), 1);
    }

    #[test]
    fn test_delete_removes_everywhere() {
        let queue = SchedulingQueue::new();
        let pod = make_pod("p1");
        queue.add(pod.clone());
        queue.delete(&pod);
        assert_eq!(queue.num_active(), 0);
        assert!(queue.pop().is_none());
    }
}
