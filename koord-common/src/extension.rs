// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Annotation and label keys consumed by the scheduler, with typed
//! accessors. Malformed values surface as `None`/`Err` so callers can
//! apply per-field defaults and count the configuration error.

use std::collections::HashMap;
use std::time::Duration;

use crate::constants::DEFAULT_QUOTA_NAME;
use crate::objects::{ObjectMeta, Pod};
use crate::resources::ResourceSet;

// ─── Gang ───────────────────────────────────────────────────────────────────

pub const ANNOTATION_GANG_NAME: &str = "gang.scheduling.koordinator.sh/name";
pub const ANNOTATION_GANG_MIN_NUM: &str = "gang.scheduling.koordinator.sh/min-num";
pub const ANNOTATION_GANG_TOTAL_NUM: &str = "gang.scheduling.koordinator.sh/total-num";
pub const ANNOTATION_GANG_MODE: &str = "gang.scheduling.koordinator.sh/mode";
pub const ANNOTATION_GANG_MATCH_POLICY: &str = "gang.scheduling.koordinator.sh/match-policy";
pub const ANNOTATION_GANG_WAIT_TIME: &str = "gang.scheduling.koordinator.sh/wait-time";
pub const ANNOTATION_GANG_GROUPS: &str = "gang.scheduling.koordinator.sh/groups";

/// Label used by pods that join a gang through a PodGroup CR.
pub const LABEL_POD_GROUP: &str = "pod-group.scheduling.sigs.k8s.io";

// ─── Reservation ────────────────────────────────────────────────────────────

pub const ANNOTATION_RESERVATION_AFFINITY: &str =
    "scheduling.koordinator.sh/reservation-affinity";
pub const ANNOTATION_RESERVE_POD: &str = "scheduling.koordinator.sh/reserve-pod";
pub const ANNOTATION_RESERVATION_NAME: &str = "scheduling.koordinator.sh/reservation-name";
pub const ANNOTATION_RESOURCE_STATUS: &str = "scheduling.koordinator.sh/resource-status";
pub const ANNOTATION_RESOURCE_SPEC: &str = "scheduling.koordinator.sh/resource-spec";

// ─── Quota ──────────────────────────────────────────────────────────────────

pub const LABEL_QUOTA_NAME: &str = "quota.scheduling.koordinator.sh/name";
pub const LABEL_QUOTA_PARENT: &str = "quota.scheduling.koordinator.sh/parent";
pub const LABEL_QUOTA_TREE_ID: &str = "quota.scheduling.koordinator.sh/tree-id";
pub const LABEL_QUOTA_IS_ROOT: &str = "quota.scheduling.koordinator.sh/is-root";
pub const LABEL_QUOTA_IS_PARENT: &str = "quota.scheduling.koordinator.sh/is-parent";
pub const LABEL_QUOTA_IGNORE_DEFAULT_TREE: &str =
    "quota.scheduling.koordinator.sh/ignore-default-tree";
pub const ANNOTATION_QUOTA_TOTAL_RESOURCE: &str =
    "quota.scheduling.koordinator.sh/total-resource";
pub const ANNOTATION_QUOTA_RAW_ALLOCATABLE: &str =
    "quota.scheduling.koordinator.sh/raw-allocatable";

// ─── Estimation ─────────────────────────────────────────────────────────────

pub const ANNOTATION_CUSTOM_ESTIMATED_SCALING_FACTORS: &str =
    "scheduling.koordinator.sh/custom-estimated-scaling-factors";

/// Gang scheduling mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GangMode {
    /// On timeout or rejection, the whole gang group is rejected.
    #[default]
    Strict,
    /// Members fail individually; the rest of the gang keeps waiting.
    NonStrict,
}

impl GangMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Strict" => Some(Self::Strict),
            "NonStrict" => Some(Self::NonStrict),
            _ => None,
        }
    }
}

/// Which pods count toward a gang's min-required threshold at Permit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GangMatchPolicy {
    /// Only pods currently waiting in the permit stage.
    OnlyWaiting,
    /// Waiting pods plus already-bound pods.
    WaitingAndRunning,
    /// Waiting pods, or anything once the group has been satisfied once.
    #[default]
    OnceSatisfied,
}

impl GangMatchPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "only-waiting" => Some(Self::OnlyWaiting),
            "waiting-and-running" => Some(Self::WaitingAndRunning),
            "once-satisfied" => Some(Self::OnceSatisfied),
            _ => None,
        }
    }
}

/// Gang name for a pod: the gang annotation wins, the PodGroup label is
/// the fallback. `None` means the pod is not gang-scheduled.
pub fn gang_name_of(pod: &Pod) -> Option<String> {
    if let Some(name) = pod.metadata.annotation(ANNOTATION_GANG_NAME) {
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    pod.metadata
        .label(LABEL_POD_GROUP)
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
}

/// True when the pod joined its gang via the PodGroup label rather than
/// the gang annotations.
pub fn is_pod_group_labeled(pod: &Pod) -> bool {
    pod.metadata
        .label(LABEL_POD_GROUP)
        .is_some_and(|l| !l.is_empty())
}

/// Required min-member count from annotations. Absent or unparseable is an
/// error: a gang cannot initialize without it.
pub fn gang_min_num(meta: &ObjectMeta) -> Result<usize, String> {
    let raw = meta
        .annotation(ANNOTATION_GANG_MIN_NUM)
        .ok_or_else(|| format!("missing annotation {ANNOTATION_GANG_MIN_NUM}"))?;
    raw.parse::<usize>()
        .map_err(|e| format!("invalid {ANNOTATION_GANG_MIN_NUM} {raw:?}: {e}"))
}

/// Total-member count from annotations; `None` when absent or unparseable.
pub fn gang_total_num(meta: &ObjectMeta) -> Option<usize> {
    meta.annotation(ANNOTATION_GANG_TOTAL_NUM)?
        .parse::<usize>()
        .ok()
}

pub fn gang_mode(meta: &ObjectMeta) -> Option<&str> {
    meta.annotation(ANNOTATION_GANG_MODE)
}

pub fn gang_match_policy(meta: &ObjectMeta) -> Option<&str> {
    meta.annotation(ANNOTATION_GANG_MATCH_POLICY)
}

/// Wait time from annotations as a duration string ("600s", "10m").
/// `None` when absent, unparseable, or non-positive.
pub fn gang_wait_time(meta: &ObjectMeta) -> Option<Duration> {
    let raw = meta.annotation(ANNOTATION_GANG_WAIT_TIME)?;
    humantime::parse_duration(raw)
        .ok()
        .filter(|d| !d.is_zero())
}

/// Gang-group membership list from annotations, as a JSON string array.
pub fn gang_groups(meta: &ObjectMeta) -> Result<Vec<String>, String> {
    match meta.annotation(ANNOTATION_GANG_GROUPS) {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str::<Vec<String>>(raw)
            .map_err(|e| format!("invalid {ANNOTATION_GANG_GROUPS} {raw:?}: {e}")),
    }
}

/// Quota group of a pod; the default quota group when unlabeled.
pub fn quota_name_of(pod: &Pod) -> &str {
    pod.metadata
        .label(LABEL_QUOTA_NAME)
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_QUOTA_NAME)
}

pub fn quota_tree_id(meta: &ObjectMeta) -> &str {
    meta.label(LABEL_QUOTA_TREE_ID).unwrap_or("")
}

pub fn quota_parent(meta: &ObjectMeta) -> Option<&str> {
    meta.label(LABEL_QUOTA_PARENT).filter(|l| !l.is_empty())
}

pub fn is_root_quota(meta: &ObjectMeta) -> bool {
    meta.label(LABEL_QUOTA_IS_ROOT) == Some("true")
}

pub fn is_parent_quota(meta: &ObjectMeta) -> bool {
    meta.label(LABEL_QUOTA_IS_PARENT) == Some("true")
}

pub fn ignores_default_tree(meta: &ObjectMeta) -> bool {
    meta.label(LABEL_QUOTA_IGNORE_DEFAULT_TREE) == Some("true")
}

/// Advertised total of a root quota, from the total-resource annotation
/// (falling back to raw-allocatable), as a JSON resource map.
pub fn quota_total_resource(meta: &ObjectMeta) -> Option<Result<ResourceSet, String>> {
    let raw = meta
        .annotation(ANNOTATION_QUOTA_TOTAL_RESOURCE)
        .or_else(|| meta.annotation(ANNOTATION_QUOTA_RAW_ALLOCATABLE))?;
    Some(
        serde_json::from_str::<ResourceSet>(raw)
            .map_err(|e| format!("invalid total resource {raw:?}: {e}")),
    )
}

pub fn has_reservation_affinity(pod: &Pod) -> bool {
    pod.metadata
        .annotation(ANNOTATION_RESERVATION_AFFINITY)
        .is_some()
}

/// Per-pod estimation scaling-factor override, resource name → factor in
/// percent, as a JSON map.
pub fn custom_estimated_scaling_factors(pod: &Pod) -> Option<HashMap<String, f64>> {
    let raw = pod
        .metadata
        .annotation(ANNOTATION_CUSTOM_ESTIMATED_SCALING_FACTORS)?;
    serde_json::from_str(raw).ok()
}
