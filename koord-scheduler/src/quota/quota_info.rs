// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Per-quota bookkeeping: spec vectors, runtime, attached pods.
//!
//! `QuotaInfo` is plain data owned by one `GroupQuotaManager` and only
//! mutated under the manager's write lock, so every reader sees a
//! consistent tree snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use koord_common::constants::ROOT_QUOTA_NAME;
use koord_common::error::{Result, SchedulerError};
use koord_common::extension;
use koord_common::objects::{ElasticQuota, Pod};
use koord_common::resources::ResourceSet;

/// A pod attached to a quota for used/request accounting.
#[derive(Debug, Clone)]
pub struct PodAttachment {
    pub pod: Arc<Pod>,
    /// Estimated consumption (scaled request).
    pub estimated: ResourceSet,
    /// Assigned or assumed pods contribute to `used`.
    pub is_assigned: bool,
}

#[derive(Debug, Clone)]
pub struct QuotaInfo {
    pub name: String,
    /// Parent quota name; top-level quotas point at the pseudo root.
    pub parent: String,
    pub tree_id: String,
    pub is_parent: bool,
    pub is_root: bool,
    pub ignore_default_tree: bool,

    pub min: ResourceSet,
    pub max: ResourceSet,
    /// Min after proportional down-scaling, when scaling is enabled.
    pub auto_scale_min: ResourceSet,
    /// Sum of attached (and descendant) estimated requests, capped by max.
    pub request: ResourceSet,
    /// Sum of assigned attached (and descendant) estimates, capped by max.
    pub used: ResourceSet,
    /// Effective capacity after redistribution among siblings.
    pub runtime: ResourceSet,

    pub(crate) pods: HashMap<String, PodAttachment>,
}

impl QuotaInfo {
    /// An implicit quota group (default/system/root) not backed by a CR.
    pub fn implicit(name: &str, tree_id: &str, max: ResourceSet) -> Self {
        Self {
            name: name.to_string(),
            parent: ROOT_QUOTA_NAME.to_string(),
            tree_id: tree_id.to_string(),
            is_parent: false,
            is_root: false,
            ignore_default_tree: false,
            min: ResourceSet::new(),
            max: max.clone(),
            auto_scale_min: ResourceSet::new(),
            request: ResourceSet::new(),
            used: ResourceSet::new(),
            runtime: max,
            pods: HashMap::new(),
        }
    }

    /// Build from an ElasticQuota object. A min not covered by max is a
    /// configuration error.
    pub fn from_quota(quota: &ElasticQuota) -> Result<Self> {
        let meta = &quota.metadata;
        let min = quota.spec.min.clone();
        let max = quota.spec.max.clone();
        if !max.is_superset_of(&min) {
            return Err(SchedulerError::invalid_spec(format!(
                "quota {} has min exceeding max",
                quota.name()
            )));
        }
        Ok(Self {
            name: quota.name().to_string(),
            parent: extension::quota_parent(meta)
                .unwrap_or(ROOT_QUOTA_NAME)
                .to_string(),
            tree_id: extension::quota_tree_id(meta).to_string(),
            is_parent: extension::is_parent_quota(meta),
            is_root: extension::is_root_quota(meta),
            ignore_default_tree: extension::ignores_default_tree(meta),
            auto_scale_min: min.clone(),
            min,
            max,
            request: ResourceSet::new(),
            used: ResourceSet::new(),
            runtime: ResourceSet::new(),
            pods: HashMap::new(),
        })
    }

    /// Whether the incoming spec differs from the cached one in a way
    /// that requires runtime recomputation or relinking.
    pub fn is_spec_change(&self, new: &QuotaInfo) -> bool {
        self.min != new.min
            || self.max != new.max
            || self.parent != new.parent
            || self.is_parent != new.is_parent
            || self.is_root != new.is_root
            || self.tree_id != new.tree_id
    }

    /// Move accounting state onto a rebuilt info (spec update / reset).
    pub fn carry_over_from(&mut self, old: &QuotaInfo) {
        self.pods = old.pods.clone();
    }

    pub fn attach_pod(&mut self, pod: Arc<Pod>, estimated: ResourceSet) {
        let is_assigned = pod.is_assigned();
        self.pods.insert(
            pod.id(),
            PodAttachment {
                pod,
                estimated,
                is_assigned,
            },
        );
    }

    pub fn detach_pod(&mut self, pod_id: &str) -> Option<PodAttachment> {
        self.pods.remove(pod_id)
    }

    pub fn has_pod(&self, pod_id: &str) -> bool {
        self.pods.contains_key(pod_id)
    }

    pub fn num_pods(&self) -> usize {
        self.pods.len()
    }

    /// Own (non-descendant) request and used, from attached pods.
    pub fn local_request_and_used(&self) -> (ResourceSet, ResourceSet) {
        let mut request = ResourceSet::new();
        let mut used = ResourceSet::new();
        for attachment in self.pods.values() {
            request.add(&attachment.estimated);
            if attachment.is_assigned {
                used.add(&attachment.estimated);
            }
        }
        (request, used)
    }

    pub fn attachments(&self) -> impl Iterator<Item = &PodAttachment> {
        self.pods.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koord_common::extension::{LABEL_QUOTA_IS_PARENT, LABEL_QUOTA_PARENT, LABEL_QUOTA_TREE_ID};
    use koord_common::objects::{ElasticQuotaSpec, ObjectMeta};

    fn quota(name: &str, min: &[(&str, f64)], max: &[(&str, f64)]) -> ElasticQuota {
        ElasticQuota {
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            spec: ElasticQuotaSpec {
                min: ResourceSet::of(min),
                max: ResourceSet::of(max),
            },
        }
    }

    #[test]
    fn test_from_quota_reads_labels() {
        let mut q = quota("child", &[("cpu", 2.0)], &[("cpu", 8.0)]);
        q.metadata
            .labels
            .insert(LABEL_QUOTA_PARENT.to_string(), "parent".to_string());
        q.metadata
            .labels
            .insert(LABEL_QUOTA_TREE_ID.to_string(), "tree-a".to_string());
        q.metadata
            .labels
            .insert(LABEL_QUOTA_IS_PARENT.to_string(), "true".to_string());

        let info = QuotaInfo::from_quota(&q).unwrap();
        assert_eq!(info.parent, "parent");
        assert_eq!(info.tree_id, "tree-a");
        assert!(info.is_parent);
        assert_eq!(info.min.get("cpu").to_f64(), 2.0);
    }

    #[test]
    fn test_from_quota_defaults_parent_to_root() {
        let info = QuotaInfo::from_quota(&quota("q", &[], &[("cpu", 4.0)])).unwrap();
        assert_eq!(info.parent, ROOT_QUOTA_NAME);
    }

    #[test]
    fn test_min_exceeding_max_is_invalid() {
        let q = quota("bad", &[("cpu", 10.0)], &[("cpu", 4.0)]);
        assert!(QuotaInfo::from_quota(&q).is_err());
    }

    #[test]
    fn test_spec_change_detection() {
        let a = QuotaInfo::from_quota(&quota("q", &[("cpu", 2.0)], &[("cpu", 8.0)])).unwrap();
        let same = QuotaInfo::from_quota(&quota("q", &[("cpu", 2.0)], &[("cpu", 8.0)])).unwrap();
        assert!(!a.is_spec_change(&same));

        let bigger = QuotaInfo::from_quota(&quota("q", &[("cpu", 4.0)], &[("cpu", 8.0)])).unwrap();
        assert!(a.is_spec_change(&bigger));
    }

    #[test]
    fn test_local_request_and_used() {
        let mut info = QuotaInfo::implicit("q", "", ResourceSet::new());
        let mut pending = Pod::default();
        pending.metadata.name = "p1".to_string();
        info.attach_pod(Arc::new(pending), ResourceSet::of(&[("cpu", 1.0)]));

        let mut assigned = Pod::default();
        assigned.metadata.name = "p2".to_string();
        assigned.spec.node_name = Some("n1".to_string());
        info.attach_pod(Arc::new(assigned), ResourceSet::of(&[("cpu", 2.0)]));

        let (request, used) = info.local_request_and_used();
        assert_eq!(request.get("cpu").to_f64(), 3.0);
        assert_eq!(used.get("cpu").to_f64(), 2.0);
    }
}
