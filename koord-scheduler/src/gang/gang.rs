// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! A Gang: the membership and permit state of one all-or-nothing pod
//! group.
//!
//! A gang holds four pod sets: `children` (all known members), `pending`
//! (known, no node, not waiting), `waiting_for_bind` (suspended at
//! Permit) and `bound` (node assigned). `children` covers the other
//! three, which are pairwise disjoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use koord_common::config::CoschedulingArgs;
use koord_common::error::{Result, SchedulerError};
use koord_common::extension::{self, GangMatchPolicy, GangMode};
use koord_common::hash::gang_group_id;
use koord_common::objects::{Pod, PodGroup};
use koord_util::counter::ErrorCounter;
use parking_lot::RwLock;

use super::group_info::{GangGroupInfo, REASON_POD_BOUND, REASON_POD_DELETED};

/// Where a gang's parameters came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GangSource {
    PodAnnotation,
    PodGroupCrd,
}

/// Parameters a gang can be initialized from, regardless of origin.
pub trait GangInitSource {
    fn source(&self) -> GangSource;
    fn min_num(&self) -> std::result::Result<usize, String>;
    fn total_num(&self) -> Option<usize>;
    fn mode(&self) -> Option<&str>;
    fn match_policy(&self) -> Option<&str>;
    fn wait_time(&self) -> Option<Duration>;
    fn groups(&self) -> std::result::Result<Vec<String>, String>;
    fn create_time_ms(&self) -> u64;
}

impl GangInitSource for Pod {
    fn source(&self) -> GangSource {
        GangSource::PodAnnotation
    }
    fn min_num(&self) -> std::result::Result<usize, String> {
        extension::gang_min_num(&self.metadata)
    }
    fn total_num(&self) -> Option<usize> {
        extension::gang_total_num(&self.metadata)
    }
    fn mode(&self) -> Option<&str> {
        extension::gang_mode(&self.metadata)
    }
    fn match_policy(&self) -> Option<&str> {
        extension::gang_match_policy(&self.metadata)
    }
    fn wait_time(&self) -> Option<Duration> {
        extension::gang_wait_time(&self.metadata)
    }
    fn groups(&self) -> std::result::Result<Vec<String>, String> {
        extension::gang_groups(&self.metadata)
    }
    fn create_time_ms(&self) -> u64 {
        self.metadata.creation_timestamp_ms
    }
}

impl GangInitSource for PodGroup {
    fn source(&self) -> GangSource {
        GangSource::PodGroupCrd
    }
    fn min_num(&self) -> std::result::Result<usize, String> {
        Ok(self.spec.min_member as usize)
    }
    fn total_num(&self) -> Option<usize> {
        extension::gang_total_num(&self.metadata)
    }
    fn mode(&self) -> Option<&str> {
        extension::gang_mode(&self.metadata)
    }
    fn match_policy(&self) -> Option<&str> {
        extension::gang_match_policy(&self.metadata)
    }
    fn wait_time(&self) -> Option<Duration> {
        // The spec-level timeout wins over the annotation.
        self.spec
            .schedule_timeout_seconds
            .map(Duration::from_secs)
            .or_else(|| extension::gang_wait_time(&self.metadata))
    }
    fn groups(&self) -> std::result::Result<Vec<String>, String> {
        extension::gang_groups(&self.metadata)
    }
    fn create_time_ms(&self) -> u64 {
        self.metadata.creation_timestamp_ms
    }
}

struct GangInner {
    create_time_ms: u64,
    wait_time: Duration,
    mode: GangMode,
    match_policy: GangMatchPolicy,
    min_required: usize,
    total_children: usize,
    gang_group: Vec<String>,
    gang_group_id: String,
    group_info: Arc<GangGroupInfo>,

    children: HashMap<String, Arc<Pod>>,
    pending: HashMap<String, Arc<Pod>>,
    waiting_for_bind: HashMap<String, Arc<Pod>>,
    bound: HashMap<String, Arc<Pod>>,

    source: GangSource,
    initialized: bool,
}

pub struct Gang {
    /// `"namespace/name"` gang id.
    pub name: String,
    inner: RwLock<GangInner>,
}

impl Gang {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: RwLock::new(GangInner {
                create_time_ms: koord_util::time::current_time_ms(),
                wait_time: Duration::ZERO,
                mode: GangMode::Strict,
                match_policy: GangMatchPolicy::OnceSatisfied,
                min_required: 0,
                total_children: 0,
                gang_group: vec![name.to_string()],
                gang_group_id: gang_group_id(&[name.to_string()]),
                group_info: Arc::new(GangGroupInfo::placeholder()),
                children: HashMap::new(),
                pending: HashMap::new(),
                waiting_for_bind: HashMap::new(),
                bound: HashMap::new(),
                source: GangSource::PodAnnotation,
                initialized: false,
            }),
        }
    }

    /// Initialize from an annotation- or CR-shaped source. Latching: the
    /// first successful init wins and later calls are no-ops. Returns
    /// whether this call performed the init.
    pub fn try_init(
        &self,
        source: &dyn GangInitSource,
        args: &CoschedulingArgs,
        errors: &ErrorCounter,
    ) -> bool {
        let mut inner = self.inner.write();
        if inner.initialized {
            return false;
        }

        let min_required = match source.min_num() {
            Ok(n) => n,
            Err(msg) => {
                errors.incr("gang_init_min_num");
                tracing::error!(gang = %self.name, error = %msg, "gang min-num illegal");
                return false;
            }
        };
        inner.min_required = min_required;

        let total_children = match source.total_num() {
            Some(n) if n != 0 && n < min_required => {
                errors.incr("gang_init_total_num");
                tracing::debug!(
                    gang = %self.name,
                    total = n,
                    min = min_required,
                    "gang total-num cannot be less than min-num, forcing up"
                );
                min_required
            }
            Some(n) => n,
            None => min_required,
        };
        inner.total_children = total_children;

        inner.mode = match source.mode() {
            Some(raw) => GangMode::parse(raw).unwrap_or_else(|| {
                errors.incr("gang_init_mode");
                tracing::debug!(gang = %self.name, value = raw, "gang mode illegal");
                GangMode::Strict
            }),
            None => GangMode::Strict,
        };

        inner.match_policy = match source.match_policy() {
            Some(raw) => GangMatchPolicy::parse(raw).unwrap_or_else(|| {
                errors.incr("gang_init_match_policy");
                tracing::debug!(gang = %self.name, value = raw, "gang match-policy illegal");
                GangMatchPolicy::OnceSatisfied
            }),
            None => GangMatchPolicy::OnceSatisfied,
        };

        inner.create_time_ms = source.create_time_ms();

        inner.wait_time = source.wait_time().unwrap_or_else(|| {
            tracing::debug!(gang = %self.name, "gang wait-time absent or illegal, using default");
            args.default_timeout()
        });

        let mut group = match source.groups() {
            Ok(groups) => groups,
            Err(msg) => {
                errors.incr("gang_init_groups");
                tracing::debug!(gang = %self.name, error = %msg, "gang groups illegal");
                Vec::new()
            }
        };
        if group.is_empty() {
            group.push(self.name.clone());
        }
        inner.gang_group_id = gang_group_id(&group);
        inner.gang_group = group;
        inner.source = source.source();
        inner.initialized = true;

        tracing::info!(
            gang = %self.name,
            min = inner.min_required,
            total = inner.total_children,
            mode = ?inner.mode,
            match_policy = ?inner.match_policy,
            wait_time = ?inner.wait_time,
            group = ?inner.gang_group,
            "gang initialized"
        );
        true
    }

    /// Install the shared group info resolved by the cache; only the
    /// first initialized group info sticks.
    pub fn set_group_info(&self, group_info: Arc<GangGroupInfo>) {
        let mut inner = self.inner.write();
        if !inner.group_info.is_initialized() {
            inner.group_info = group_info;
        }
    }

    // ─── Child transitions ─────────────────────────────────────────────

    /// Record a pod as a gang member. Unassigned pods not already in the
    /// permit stage are also tracked as pending.
    pub fn set_child(&self, pod: Arc<Pod>) {
        let mut inner = self.inner.write();
        let pod_id = pod.id();
        inner.children.insert(pod_id.clone(), pod.clone());
        if !pod.is_assigned() && !inner.waiting_for_bind.contains_key(&pod_id) {
            inner.pending.insert(pod_id, pod);
        }
    }

    /// A pod passed Reserve and entered the permit stage.
    pub fn add_assumed_pod(&self, pod: Arc<Pod>) {
        let mut inner = self.inner.write();
        let pod_id = pod.id();
        if !inner.waiting_for_bind.contains_key(&pod_id) {
            inner.waiting_for_bind.insert(pod_id.clone(), pod);
            tracing::info!(gang = %self.name, pod = %pod_id, "assumed pod added");
        }
        inner.pending.remove(&pod_id);
    }

    /// A pod left the permit stage without binding (unreserve).
    pub fn del_assumed_pod(&self, pod: &Pod) {
        let mut inner = self.inner.write();
        let pod_id = pod.id();
        if inner.waiting_for_bind.remove(&pod_id).is_some() {
            if let Some(child) = inner.children.get(&pod_id).cloned() {
                inner.pending.insert(pod_id.clone(), child);
            }
            if inner.waiting_for_bind.is_empty() {
                inner.group_info.remove_waiting_gang(&self.name);
            }
            tracing::info!(gang = %self.name, pod = %pod_id, "assumed pod removed");
        }
    }

    /// A pod got a node. Latches the group's once-satisfied flag.
    pub fn add_bound_pod(&self, pod: Arc<Pod>) {
        let mut inner = self.inner.write();
        let pod_id = pod.id();
        inner.waiting_for_bind.remove(&pod_id);
        if inner.waiting_for_bind.is_empty() {
            inner.group_info.remove_waiting_gang(&self.name);
        }
        inner.pending.remove(&pod_id);
        inner.group_info.delete_if_representative(&pod_id, REASON_POD_BOUND);
        inner.bound.insert(pod_id.clone(), pod);

        tracing::info!(gang = %self.name, pod = %pod_id, "bound pod added");
        if !inner.group_info.is_once_resource_satisfied() {
            inner.group_info.set_resource_satisfied();
            tracing::info!(gang = %self.name, "gang resource satisfied due to bound pod");
        }
    }

    /// Remove a pod from every set. Returns true when an
    /// annotation-sourced gang ran out of children and may be reaped.
    pub fn delete_pod(&self, pod: &Pod) -> bool {
        let mut inner = self.inner.write();
        let pod_id = pod.id();
        tracing::info!(gang = %self.name, pod = %pod_id, "deleting pod from gang");

        inner.children.remove(&pod_id);
        inner.pending.remove(&pod_id);
        inner.group_info.delete_if_representative(&pod_id, REASON_POD_DELETED);
        inner.waiting_for_bind.remove(&pod_id);
        if inner.waiting_for_bind.is_empty() {
            inner.group_info.remove_waiting_gang(&self.name);
        }
        inner.bound.remove(&pod_id);

        inner.source == GangSource::PodAnnotation && inner.children.is_empty()
    }

    // ─── Permit predicates ─────────────────────────────────────────────

    /// Whether the gang's side of the permit condition holds.
    pub fn is_gang_valid_for_permit(&self) -> bool {
        let inner = self.inner.read();
        if !inner.initialized {
            tracing::info!(gang = %self.name, "permit check on uninitialized gang");
            return false;
        }
        match inner.match_policy {
            GangMatchPolicy::OnlyWaiting => inner.waiting_for_bind.len() >= inner.min_required,
            GangMatchPolicy::WaitingAndRunning => {
                inner.waiting_for_bind.len() + inner.bound.len() >= inner.min_required
            }
            GangMatchPolicy::OnceSatisfied => {
                inner.waiting_for_bind.len() >= inner.min_required
                    || inner.group_info.is_once_resource_satisfied()
            }
        }
    }

    /// Whether an activation push is worth it: the gang is initialized
    /// and has enough known children to possibly pass permit.
    pub fn is_gang_worth_requeue(&self) -> bool {
        let inner = self.inner.read();
        inner.initialized && inner.children.len() >= inner.min_required
    }

    /// Any pending child, used as the activation carrier.
    pub fn pick_some_pending_child(&self) -> Option<Arc<Pod>> {
        self.inner.read().pending.values().next().cloned()
    }

    /// Elect `pod` as the group's representative. Fails when the pod is
    /// not pending in this gang (avoids leaking a stale seat) or the
    /// seat is already taken.
    pub fn record_if_no_representative(&self, pod: &Pod) -> Result<()> {
        let inner = self.inner.read();
        let pod_id = pod.id();
        if !inner.pending.contains_key(&pod_id) {
            return Err(SchedulerError::not_found(format!(
                "pod {pod_id} does not exist in the gang cache"
            )));
        }
        let representative = inner.group_info.record_if_no_representative(&pod_id);
        if representative != pod_id {
            return Err(SchedulerError::unschedulable(format!(
                "representative pod {representative} of gang group {} already exists",
                inner.gang_group_id
            )));
        }
        Ok(())
    }

    pub fn clear_current_representative(&self, reason: &str) {
        self.inner.read().group_info.clear_current_representative(reason);
    }

    // ─── Accessors ─────────────────────────────────────────────────────

    pub fn is_initialized(&self) -> bool {
        self.inner.read().initialized
    }

    pub fn is_from_annotation(&self) -> bool {
        self.inner.read().source == GangSource::PodAnnotation
    }

    pub fn source(&self) -> GangSource {
        self.inner.read().source
    }

    pub fn mode(&self) -> GangMode {
        self.inner.read().mode
    }

    pub fn match_policy(&self) -> GangMatchPolicy {
        self.inner.read().match_policy
    }

    pub fn wait_time(&self) -> Duration {
        self.inner.read().wait_time
    }

    pub fn create_time_ms(&self) -> u64 {
        self.inner.read().create_time_ms
    }

    pub fn min_required(&self) -> usize {
        self.inner.read().min_required
    }

    pub fn total_children(&self) -> usize {
        self.inner.read().total_children
    }

    pub fn gang_group(&self) -> Vec<String> {
        self.inner.read().gang_group.clone()
    }

    pub fn gang_group_id(&self) -> String {
        self.inner.read().gang_group_id.clone()
    }

    pub fn group_info(&self) -> Arc<GangGroupInfo> {
        self.inner.read().group_info.clone()
    }

    pub fn is_once_resource_satisfied(&self) -> bool {
        self.inner.read().group_info.is_once_resource_satisfied()
    }

    pub fn children_num(&self) -> usize {
        self.inner.read().children.len()
    }

    pub fn pending_num(&self) -> usize {
        self.inner.read().pending.len()
    }

    pub fn waiting_num(&self) -> usize {
        self.inner.read().waiting_for_bind.len()
    }

    pub fn bound_num(&self) -> usize {
        self.inner.read().bound.len()
    }

    pub fn has_child(&self, pod_id: &str) -> bool {
        self.inner.read().children.contains_key(pod_id)
    }

    pub fn is_pod_pending(&self, pod_id: &str) -> bool {
        self.inner.read().pending.contains_key(pod_id)
    }

    pub fn is_pod_waiting(&self, pod_id: &str) -> bool {
        self.inner.read().waiting_for_bind.contains_key(pod_id)
    }

    pub fn is_pod_bound(&self, pod_id: &str) -> bool {
        self.inner.read().bound.contains_key(pod_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koord_common::extension::{
        ANNOTATION_GANG_MIN_NUM, ANNOTATION_GANG_MODE, ANNOTATION_GANG_TOTAL_NUM,
    };
    use koord_common::objects::ObjectMeta;

    fn gang_pod(name: &str, annotations: &[(&str, &str)]) -> Arc<Pod> {
        let mut pod = Pod {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: "ns".to_string(),
                uid: format!("uid-{name}"),
                creation_timestamp_ms: 1000,
                ..Default::default()
            },
            ..Default::default()
        };
        for (k, v) in annotations {
            pod.metadata
                .annotations
                .insert(k.to_string(), v.to_string());
        }
        Arc::new(pod)
    }

    fn args() -> CoschedulingArgs {
        CoschedulingArgs::default()
    }

    #[test]
    fn test_init_from_pod_annotations() {
        let gang = Gang::new("ns/g1");
        let pod = gang_pod(
            "p1",
            &[
                (ANNOTATION_GANG_MIN_NUM, "3"),
                (ANNOTATION_GANG_TOTAL_NUM, "5"),
            ],
        );
        let errors = ErrorCounter::new();
        assert!(gang.try_init(pod.as_ref(), &args(), &errors));
        assert!(gang.is_initialized());
        assert_eq!(gang.min_required(), 3);
        assert_eq!(gang.total_children(), 5);
        assert_eq!(gang.mode(), GangMode::Strict);
        assert_eq!(gang.match_policy(), GangMatchPolicy::OnceSatisfied);
        assert_eq!(gang.wait_time(), Duration::from_secs(600));
        assert_eq!(gang.gang_group(), vec!["ns/g1".to_string()]);
    }

    #[test]
    fn test_init_is_latching() {
        let gang = Gang::new("ns/g1");
        let errors = ErrorCounter::new();
        let pod = gang_pod("p1", &[(ANNOTATION_GANG_MIN_NUM, "3")]);
        assert!(gang.try_init(pod.as_ref(), &args(), &errors));

        let other = gang_pod("p2", &[(ANNOTATION_GANG_MIN_NUM, "7")]);
        assert!(!gang.try_init(other.as_ref(), &args(), &errors));
        assert_eq!(gang.min_required(), 3);
    }

    #[test]
    fn test_init_rejects_missing_min_num() {
        let gang = Gang::new("ns/g1");
        let errors = ErrorCounter::new();
        let pod = gang_pod("p1", &[]);
        assert!(!gang.try_init(pod.as_ref(), &args(), &errors));
        assert!(!gang.is_initialized());
        assert_eq!(errors.get("gang_init_min_num"), 1);
    }

    #[test]
    fn test_init_forces_total_up_to_min() {
        let gang = Gang::new("ns/g1");
        let errors = ErrorCounter::new();
        let pod = gang_pod(
            "p1",
            &[
                (ANNOTATION_GANG_MIN_NUM, "4"),
                (ANNOTATION_GANG_TOTAL_NUM, "2"),
            ],
        );
        assert!(gang.try_init(pod.as_ref(), &args(), &errors));
        assert_eq!(gang.total_children(), 4);
    }

    #[test]
    fn test_init_bad_mode_falls_back_to_strict() {
        let gang = Gang::new("ns/g1");
        let errors = ErrorCounter::new();
        let pod = gang_pod(
            "p1",
            &[(ANNOTATION_GANG_MIN_NUM, "1"), (ANNOTATION_GANG_MODE, "Chaotic")],
        );
        assert!(gang.try_init(pod.as_ref(), &args(), &errors));
        assert_eq!(gang.mode(), GangMode::Strict);
        assert_eq!(errors.get("gang_init_mode"), 1);
    }

    #[test]
    fn test_init_from_pod_group() {
        let gang = Gang::new("ns/g1");
        let errors = ErrorCounter::new();
        let pg = PodGroup {
            metadata: ObjectMeta {
                name: "g1".to_string(),
                namespace: "ns".to_string(),
                creation_timestamp_ms: 7,
                ..Default::default()
            },
            spec: koord_common::objects::PodGroupSpec {
                min_member: 2,
                schedule_timeout_seconds: Some(120),
            },
        };
        assert!(gang.try_init(&pg, &args(), &errors));
        assert_eq!(gang.min_required(), 2);
        assert_eq!(gang.wait_time(), Duration::from_secs(120));
        assert_eq!(gang.source(), GangSource::PodGroupCrd);
        assert_eq!(gang.create_time_ms(), 7);
    }

    fn initialized_gang(min: usize) -> Gang {
        let gang = Gang::new("ns/g1");
        let errors = ErrorCounter::new();
        let min_annotation = min.to_string();
        let pod = gang_pod("seed", &[(ANNOTATION_GANG_MIN_NUM, min_annotation.as_str())]);
        assert!(gang.try_init(pod.as_ref(), &args(), &errors));
        let info = Arc::new(GangGroupInfo::new(
            gang.gang_group_id(),
            gang.gang_group(),
        ));
        info.set_initialized();
        gang.set_group_info(info);
        gang
    }

    #[test]
    fn test_set_child_tracks_pending() {
        let gang = initialized_gang(2);
        let pod = gang_pod("p1", &[]);
        gang.set_child(pod.clone());
        assert!(gang.has_child("ns/p1"));
        assert!(gang.is_pod_pending("ns/p1"));

        // Assigned pods are children but never pending.
        let mut assigned = (*gang_pod("p2", &[])).clone();
        assigned.spec.node_name = Some("n1".to_string());
        gang.set_child(Arc::new(assigned));
        assert!(gang.has_child("ns/p2"));
        assert!(!gang.is_pod_pending("ns/p2"));
    }

    #[test]
    fn test_pod_set_disjointness_through_transitions() {
        let gang = initialized_gang(2);
        let pod = gang_pod("p1", &[]);
        gang.set_child(pod.clone());

        gang.add_assumed_pod(pod.clone());
        assert!(gang.is_pod_waiting("ns/p1"));
        assert!(!gang.is_pod_pending("ns/p1"));
        assert!(!gang.is_pod_bound("ns/p1"));

        gang.del_assumed_pod(&pod);
        assert!(!gang.is_pod_waiting("ns/p1"));
        assert!(gang.is_pod_pending("ns/p1"));

        gang.add_assumed_pod(pod.clone());
        gang.add_bound_pod(pod.clone());
        assert!(gang.is_pod_bound("ns/p1"));
        assert!(!gang.is_pod_waiting("ns/p1"));
        assert!(!gang.is_pod_pending("ns/p1"));
    }

    #[test]
    fn test_bound_pod_latches_group_satisfaction() {
        let gang = initialized_gang(3);
        let pod = gang_pod("p1", &[]);
        gang.set_child(pod.clone());
        assert!(!gang.is_once_resource_satisfied());

        gang.add_bound_pod(pod);
        assert!(gang.is_once_resource_satisfied());
        // once-satisfied keeps isGangValidForPermit true with an empty
        // waiting set under the default match policy.
        assert!(gang.is_gang_valid_for_permit());
    }

    #[test]
    fn test_delete_pod_signals_gc_for_annotation_gangs() {
        let gang = initialized_gang(1);
        let pod = gang_pod("p1", &[]);
        gang.set_child(pod.clone());
        assert!(!gang.delete_pod(&gang_pod("other", &[])));
        assert!(gang.delete_pod(&pod));
    }

    #[test]
    fn test_valid_for_permit_policies() {
        let gang = initialized_gang(2);
        let p1 = gang_pod("p1", &[]);
        let p2 = gang_pod("p2", &[]);
        gang.set_child(p1.clone());
        gang.set_child(p2.clone());
        assert!(!gang.is_gang_valid_for_permit());

        gang.add_assumed_pod(p1.clone());
        assert!(!gang.is_gang_valid_for_permit());
        gang.add_assumed_pod(p2.clone());
        assert!(gang.is_gang_valid_for_permit());
    }

    #[test]
    fn test_worth_requeue() {
        let gang = initialized_gang(2);
        assert!(!gang.is_gang_worth_requeue());
        gang.set_child(gang_pod("p1", &[]));
        assert!(!gang.is_gang_worth_requeue());
        gang.set_child(gang_pod("p2", &[]));
        assert!(gang.is_gang_worth_requeue());
    }

    #[test]
    fn test_representative_requires_pending_pod() {
        let gang = initialized_gang(2);
        let pod = gang_pod("p1", &[]);
        assert!(gang.record_if_no_representative(&pod).is_err());

        gang.set_child(pod.clone());
        assert!(gang.record_if_no_representative(&pod).is_ok());

        let other = gang_pod("p2", &[]);
        gang.set_child(other.clone());
        let err = gang.record_if_no_representative(&other).unwrap_err();
        assert!(err.message.contains("representative pod"));
    }
}
