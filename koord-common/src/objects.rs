// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Watched API object models.
//!
//! These are the scheduler-facing shapes of the platform objects: pods,
//! pod groups, elastic quotas, reservations, nodes, config maps. Only the
//! fields the core consumes are modeled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resources::ResourceSet;

/// Opaque object UID.
pub type Uid = String;

/// `"namespace/name"` identity used for cache keys.
pub fn get_id(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Common object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub uid: Uid,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Creation time, milliseconds since the Unix epoch.
    pub creation_timestamp_ms: u64,
    pub resource_version: u64,
    pub deletion_timestamp_ms: Option<u64>,
}

impl ObjectMeta {
    pub fn id(&self) -> String {
        get_id(&self.namespace, &self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp_ms.is_some()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(|s| s.as_str())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(|s| s.as_str())
    }
}

// ─── Pod ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodSpec {
    pub node_name: Option<String>,
    pub scheduler_name: String,
    pub priority: Option<i32>,
    /// Aggregate resource request of all containers.
    pub resources: ResourceSet,
    /// Host ports requested by the pod's containers.
    pub host_ports: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodStatus {
    pub phase: PodPhase,
    pub nominated_node_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    pub status: PodStatus,
}

impl Pod {
    pub fn id(&self) -> String {
        self.metadata.id()
    }

    pub fn uid(&self) -> &Uid {
        &self.metadata.uid
    }

    pub fn node_name(&self) -> Option<&str> {
        self.spec.node_name.as_deref()
    }

    pub fn is_assigned(&self) -> bool {
        self.spec.node_name.as_deref().is_some_and(|n| !n.is_empty())
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.status.phase, PodPhase::Succeeded | PodPhase::Failed)
    }

    pub fn priority(&self) -> i32 {
        self.spec.priority.unwrap_or(0)
    }
}

// ─── PodGroup ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodGroupSpec {
    pub min_member: u32,
    pub schedule_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodGroup {
    pub metadata: ObjectMeta,
    pub spec: PodGroupSpec,
}

impl PodGroup {
    pub fn id(&self) -> String {
        self.metadata.id()
    }
}

// ─── ElasticQuota ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticQuotaSpec {
    pub min: ResourceSet,
    pub max: ResourceSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticQuota {
    pub metadata: ObjectMeta,
    pub spec: ElasticQuotaSpec,
}

impl ElasticQuota {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

// ─── Reservation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationPhase {
    #[default]
    Pending,
    Available,
    Succeeded,
    Failed,
}

/// Pod selector of a reservation owner. A pod matches when every
/// `match_labels` entry matches, within the owner's namespace if set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationOwner {
    pub namespace: Option<String>,
    pub match_labels: BTreeMap<String, String>,
}

impl ReservationOwner {
    pub fn matches(&self, pod: &Pod) -> bool {
        if let Some(ns) = &self.namespace {
            if *ns != pod.metadata.namespace {
                return false;
            }
        }
        self.match_labels
            .iter()
            .all(|(k, v)| pod.metadata.labels.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationSpec {
    /// Resource request held for future owner pods.
    pub resources: ResourceSet,
    /// Host ports held for future owner pods.
    pub host_ports: Vec<u32>,
    pub scheduler_name: String,
    pub owners: Vec<ReservationOwner>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationStatus {
    pub phase: ReservationPhase,
    pub node_name: Option<String>,
    /// Resources currently allocated out of the reservation by owner pods.
    pub allocated: ResourceSet,
    /// Why the reservation could not be scheduled, if it could not.
    pub unschedulable_message: Option<String>,
}

/// A cluster-scoped reservation: a placeholder for future pod placement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reservation {
    pub metadata: ObjectMeta,
    pub spec: ReservationSpec,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> &Uid {
        &self.metadata.uid
    }

    pub fn node_name(&self) -> Option<&str> {
        self.status.node_name.as_deref().filter(|n| !n.is_empty())
    }

    pub fn is_available(&self) -> bool {
        self.status.phase == ReservationPhase::Available
    }

    pub fn is_succeeded(&self) -> bool {
        self.status.phase == ReservationPhase::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.status.phase == ReservationPhase::Failed
    }

    pub fn is_terminal(&self) -> bool {
        self.is_succeeded() || self.is_failed()
    }

    pub fn set_unschedulable(&mut self, message: &str) {
        self.status.unschedulable_message = Some(message.to_string());
    }
}

// ─── Node ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatus {
    pub allocatable: ResourceSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub metadata: ObjectMeta,
    pub status: NodeStatus,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

// ─── ConfigMap ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,
    pub data: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_identity_and_assignment() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: "p1".to_string(),
                namespace: "ns".to_string(),
                uid: "uid-1".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(pod.id(), "ns/p1");
        assert!(!pod.is_assigned());

        let mut assigned = pod.clone();
        assigned.spec.node_name = Some("n1".to_string());
        assert!(assigned.is_assigned());
    }

    #[test]
    fn test_reservation_phase_helpers() {
        let mut r = Reservation::default();
        assert!(!r.is_available());
        r.status.phase = ReservationPhase::Available;
        assert!(r.is_available());
        r.status.phase = ReservationPhase::Failed;
        assert!(r.is_terminal());
    }

    #[test]
    fn test_reservation_owner_matching() {
        let owner = ReservationOwner {
            namespace: Some("ns".to_string()),
            match_labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
        };
        let mut pod = Pod::default();
        pod.metadata.namespace = "ns".to_string();
        assert!(!owner.matches(&pod));
        pod.metadata
            .labels
            .insert("app".to_string(), "web".to_string());
        assert!(owner.matches(&pod));
        pod.metadata.namespace = "other".to_string();
        assert!(!owner.matches(&pod));
    }
}
