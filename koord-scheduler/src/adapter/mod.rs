// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The scheduler adapter: a thin façade over the framework state shared
//! by all plugins (scheduling queue, pod cache, reservation nominator,
//! permit-stage waiters). Adapter methods are cheap forwarding wrappers
//! and take no plugin locks.

pub mod nominator;
pub mod pod_cache;
pub mod queue;
pub mod waiting_pods;

use std::collections::HashMap;
use std::sync::Arc;

use koord_common::error::Result;
use koord_common::objects::{Pod, Uid};

pub use nominator::{Nomination, ReservationNominator};
pub use pod_cache::PodCache;
pub use queue::{QueuedPodInfo, SchedulingQueue, ASSIGNED_POD_ADD, ASSIGNED_POD_DELETE};
pub use waiting_pods::{PermitVerdict, WaitingPodsMap};

pub struct SchedulerAdapter {
    queue: Arc<SchedulingQueue>,
    cache: Arc<PodCache>,
    nominator: Arc<ReservationNominator>,
    waiting_pods: Arc<WaitingPodsMap>,
}

impl Default for SchedulerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerAdapter {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(SchedulingQueue::new()),
            cache: Arc::new(PodCache::new()),
            nominator: Arc::new(ReservationNominator::new()),
            waiting_pods: Arc::new(WaitingPodsMap::new()),
        }
    }

    pub fn queue(&self) -> &Arc<SchedulingQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<PodCache> {
        &self.cache
    }

    pub fn nominator(&self) -> &Arc<ReservationNominator> {
        &self.nominator
    }

    pub fn waiting_pods(&self) -> &Arc<WaitingPodsMap> {
        &self.waiting_pods
    }

    // ─── Queue forwarding ──────────────────────────────────────────────

    pub fn activate(&self, pods: HashMap<String, Arc<Pod>>) {
        self.queue.activate(pods);
    }

    pub fn add_unschedulable_if_not_present(
        &self,
        info: QueuedPodInfo,
        enqueue_cycle: i64,
    ) -> Result<()> {
        self.queue.add_unschedulable_if_not_present(info, enqueue_cycle)
    }

    pub fn scheduling_cycle(&self) -> i64 {
        self.queue.scheduling_cycle()
    }

    pub fn done(&self, uid: &Uid) {
        self.queue.done(uid);
    }

    // ─── Permit forwarding ─────────────────────────────────────────────

    /// Cancel a waiting permit entry, e.g. when the pod or its
    /// reservation is deleted.
    pub fn reject_waiting_pod(&self, uid: &Uid, reason: &str) -> bool {
        self.waiting_pods.reject(uid, reason).is_some()
    }
}
