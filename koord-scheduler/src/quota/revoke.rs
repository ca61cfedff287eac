// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The revocation loop: reclaim capacity from quotas whose usage
//! exceeds their runtime guarantee.
//!
//! A quota is only revoked after staying over its limit continuously for
//! the configured hysteresis. Victims are picked lowest priority first,
//! newest first within a priority, until usage fits again.

use std::collections::HashMap;
use std::sync::Arc;

use koord_common::config::ElasticQuotaArgs;
use koord_common::constants::{DEFAULT_QUOTA_NAME, SYSTEM_QUOTA_NAME};
use koord_common::error::Result;
use koord_common::objects::Pod;
use koord_common::resources::ResourceSet;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::group_quota_manager::{GroupQuotaManager, QuotaUsageSnapshot};
use super::quota_info::PodAttachment;
use super::tree_hub::QuotaTreeHub;

/// Carries out the actual eviction; the loop only decides.
pub trait PodEvictor: Send + Sync {
    fn evict(&self, pod: &Arc<Pod>, reason: &str) -> Result<()>;
}

/// Evictor that only logs. Used when preemption is disabled downstream.
pub struct LogPodEvictor;

impl PodEvictor for LogPodEvictor {
    fn evict(&self, pod: &Arc<Pod>, reason: &str) -> Result<()> {
        tracing::warn!(pod = %pod.id(), reason, "would evict pod");
        Ok(())
    }
}

pub struct QuotaRevoker {
    hub: Arc<QuotaTreeHub>,
    evictor: Arc<dyn PodEvictor>,
    args: Arc<ElasticQuotaArgs>,
    /// (tree, quota) → first time the quota was seen over its limit.
    violation_since: Mutex<HashMap<(String, String), u64>>,
}

impl QuotaRevoker {
    pub fn new(
        hub: Arc<QuotaTreeHub>,
        evictor: Arc<dyn PodEvictor>,
        args: Arc<ElasticQuotaArgs>,
    ) -> Self {
        Self {
            hub,
            evictor,
            args,
            violation_since: Mutex::new(HashMap::new()),
        }
    }

    /// Periodic driver. Each iteration runs under a deadline so a slow
    /// pass cannot stall shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.args.monitor_all_quotas {
            tracing::info!("quota monitoring disabled, revocation loop not started");
            return;
        }
        let interval = self.args.revoke_pod_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let revoker = self.clone();
                    let pass = tokio::task::spawn_blocking(move || revoker.check_once());
                    if tokio::time::timeout(interval, pass).await.is_err() {
                        tracing::warn!("quota revocation pass exceeded its deadline");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// One full scan over every quota of every tree.
    pub fn check_once(&self) {
        let now = koord_util::time::current_time_ms();
        for mgr in self.hub.all_managers() {
            for snapshot in mgr.usage_snapshots() {
                self.check_quota(&mgr, snapshot, now);
            }
        }
    }

    fn limit_of(&self, snapshot: &QuotaUsageSnapshot) -> ResourceSet {
        if self.args.enable_runtime_quota {
            snapshot.runtime.clone()
        } else {
            snapshot.max.clone()
        }
    }

    fn check_quota(&self, mgr: &Arc<GroupQuotaManager>, snapshot: QuotaUsageSnapshot, now: u64) {
        if snapshot.name == SYSTEM_QUOTA_NAME {
            return;
        }
        if snapshot.name == DEFAULT_QUOTA_NAME && self.args.disable_default_quota_preemption {
            return;
        }
        // Parent quotas are only enforced directly when configured;
        // otherwise each leaf is responsible for itself.
        if snapshot.has_children && !self.args.enable_check_parent_quota {
            return;
        }

        let key = (mgr.tree_id().to_string(), snapshot.name.clone());
        let limit = self.limit_of(&snapshot);
        // An empty limit means "nothing configured", not "zero capacity".
        if limit.is_empty() {
            self.violation_since.lock().remove(&key);
            return;
        }
        if !snapshot.used.exceeds_any(&limit) {
            self.violation_since.lock().remove(&key);
            return;
        }

        let since = *self.violation_since.lock().entry(key.clone()).or_insert(now);
        let elapsed_ms = now.saturating_sub(since);
        if elapsed_ms < self.args.delay_evict_time().as_millis() as u64 {
            tracing::debug!(
                tree = %key.0,
                quota = %key.1,
                elapsed_ms,
                "quota over limit, inside the eviction delay"
            );
            return;
        }

        self.revoke_quota(mgr, &snapshot, &limit);
        self.violation_since.lock().remove(&key);
    }

    fn revoke_quota(
        &self,
        mgr: &Arc<GroupQuotaManager>,
        snapshot: &QuotaUsageSnapshot,
        limit: &ResourceSet,
    ) {
        let mut candidates: Vec<PodAttachment> = if snapshot.has_children {
            mgr.subtree_pods(&snapshot.name)
        } else {
            snapshot.pods.clone()
        };
        candidates.retain(|a| a.is_assigned);
        // Lowest priority first; newest first within a priority.
        candidates.sort_by(|a, b| {
            a.pod
                .priority()
                .cmp(&b.pod.priority())
                .then(b.pod.metadata.creation_timestamp_ms.cmp(&a.pod.metadata.creation_timestamp_ms))
        });

        let mut used = snapshot.used.clone();
        for candidate in candidates {
            if !used.exceeds_any(limit) {
                break;
            }
            let reason = format!(
                "quota {} used exceeds its runtime capacity",
                snapshot.name
            );
            match self.evictor.evict(&candidate.pod, &reason) {
                Ok(()) => {
                    tracing::info!(
                        quota = %snapshot.name,
                        pod = %candidate.pod.id(),
                        "revoked pod over quota"
                    );
                    used.saturating_sub(&candidate.estimated);
                    mgr.on_pod_delete(&candidate.pod);
                }
                Err(e) => {
                    tracing::warn!(
                        quota = %snapshot.name,
                        pod = %candidate.pod.id(),
                        error = %e,
                        "failed to evict pod, skipping"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_source::EventHandler;
    use crate::quota::estimator::RequestAsIsEstimator;
    use koord_common::objects::{ElasticQuota, ElasticQuotaSpec, Node, NodeStatus, ObjectMeta};
    use koord_util::counter::ErrorCounter;

    #[derive(Default)]
    struct RecordingEvictor {
        evicted: Mutex<Vec<String>>,
    }

    impl PodEvictor for RecordingEvictor {
        fn evict(&self, pod: &Arc<Pod>, _reason: &str) -> Result<()> {
            self.evicted.lock().push(pod.id());
            Ok(())
        }
    }

    fn hub_with_args(args: &Arc<ElasticQuotaArgs>) -> Arc<QuotaTreeHub> {
        Arc::new(QuotaTreeHub::new(
            args.clone(),
            Arc::new(RequestAsIsEstimator),
            Arc::new(ErrorCounter::new()),
        ))
    }

    fn quota(name: &str, min_cpu: f64, max_cpu: f64) -> Arc<ElasticQuota> {
        Arc::new(ElasticQuota {
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            spec: ElasticQuotaSpec {
                min: ResourceSet::of(&[("cpu", min_cpu)]),
                max: ResourceSet::of(&[("cpu", max_cpu)]),
            },
        })
    }

    fn assigned_pod(name: &str, cpu: f64, priority: i32, created_ms: u64) -> Arc<Pod> {
        let mut pod = Pod::default();
        pod.metadata.name = name.to_string();
        pod.metadata.namespace = "ns".to_string();
        pod.metadata.uid = format!("uid-{name}");
        pod.metadata.creation_timestamp_ms = created_ms;
        pod.metadata.labels.insert(
            koord_common::extension::LABEL_QUOTA_NAME.to_string(),
            "team-a".to_string(),
        );
        pod.spec.resources = ResourceSet::of(&[("cpu", cpu)]);
        pod.spec.priority = Some(priority);
        pod.spec.node_name = Some("n1".to_string());
        Arc::new(pod)
    }

    fn add_node(hub: &Arc<QuotaTreeHub>, cpu: f64) {
        let node = Arc::new(Node {
            metadata: ObjectMeta {
                name: "n1".to_string(),
                ..Default::default()
            },
            status: NodeStatus {
                allocatable: ResourceSet::of(&[("cpu", cpu)]),
            },
        });
        EventHandler::<Node>::on_add(hub.as_ref(), &node);
    }

    #[test]
    fn test_revokes_lowest_priority_newest_first() {
        let args = Arc::new(ElasticQuotaArgs {
            delay_evict_time_seconds: 0,
            ..Default::default()
        });
        let hub = hub_with_args(&args);
        add_node(&hub, 4.0);
        EventHandler::<ElasticQuota>::on_add(hub.as_ref(), &quota("team-a", 2.0, 4.0));

        // 6 cpu used against a runtime of at most 4.
        for (name, priority, created) in
            [("p-old", 10, 100), ("p-new", 10, 200), ("p-high", 100, 50)]
        {
            EventHandler::<Pod>::on_add(
                hub.as_ref(),
                &assigned_pod(name, 2.0, priority, created),
            );
        }

        let evictor = Arc::new(RecordingEvictor::default());
        let revoker = QuotaRevoker::new(hub.clone(), evictor.clone(), args);
        revoker.check_once();

        // The newest low-priority pod goes first; one eviction brings
        // used (6) back under the limit (4).
        let evicted = evictor.evicted.lock().clone();
        assert_eq!(evicted, vec!["ns/p-new".to_string()]);

        // Usage converged, a second pass evicts nothing.
        revoker.check_once();
        assert_eq!(evictor.evicted.lock().len(), 1);
    }

    #[test]
    fn test_hysteresis_delays_eviction() {
        let args = Arc::new(ElasticQuotaArgs {
            delay_evict_time_seconds: 3600,
            ..Default::default()
        });
        let hub = hub_with_args(&args);
        add_node(&hub, 2.0);
        EventHandler::<ElasticQuota>::on_add(hub.as_ref(), &quota("team-a", 1.0, 2.0));
        EventHandler::<Pod>::on_add(hub.as_ref(), &assigned_pod("p1", 4.0, 0, 1));

        let evictor = Arc::new(RecordingEvictor::default());
        let revoker = QuotaRevoker::new(hub, evictor.clone(), args);
        revoker.check_once();
        assert!(evictor.evicted.lock().is_empty());
    }

    #[test]
    fn test_within_limit_clears_violation() {
        let args = Arc::new(ElasticQuotaArgs {
            delay_evict_time_seconds: 0,
            ..Default::default()
        });
        let hub = hub_with_args(&args);
        add_node(&hub, 8.0);
        EventHandler::<ElasticQuota>::on_add(hub.as_ref(), &quota("team-a", 2.0, 8.0));
        EventHandler::<Pod>::on_add(hub.as_ref(), &assigned_pod("p1", 2.0, 0, 1));

        let evictor = Arc::new(RecordingEvictor::default());
        let revoker = QuotaRevoker::new(hub, evictor.clone(), args);
        revoker.check_once();
        assert!(evictor.evicted.lock().is_empty());
    }
}
