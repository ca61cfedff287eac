// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The per-tree quota manager.
//!
//! Owns every QuotaInfo of one quota tree behind a single RwLock.
//! Runtime recomputation runs under the write lock whenever min, max,
//! request, or the tree total changes: requests aggregate bottom-up
//! (child contributions capped by child max), then capacity distributes
//! top-down among name-ordered siblings.

use std::collections::HashMap;
use std::sync::Arc;

use koord_common::config::ElasticQuotaArgs;
use koord_common::constants::{DEFAULT_QUOTA_NAME, ROOT_QUOTA_NAME, SYSTEM_QUOTA_NAME};
use koord_common::error::{Result, SchedulerError};
use koord_common::objects::{ElasticQuota, Pod};
use koord_common::resources::ResourceSet;
use parking_lot::RwLock;

use super::estimator::PodRequestEstimator;
use super::hook::QuotaHookPlugin;
use super::quota_info::{PodAttachment, QuotaInfo};
use super::runtime::{distribute_resources, scaled_mins};

/// A read-only view used by the revocation loop.
#[derive(Debug, Clone)]
pub struct QuotaUsageSnapshot {
    pub name: String,
    pub used: ResourceSet,
    pub runtime: ResourceSet,
    pub max: ResourceSet,
    pub has_children: bool,
    pub pods: Vec<PodAttachment>,
}

struct TreeState {
    /// Advertised total of this tree (cluster total for the default tree).
    total: ResourceSet,
    quotas: HashMap<String, QuotaInfo>,
}

impl TreeState {
    /// parent name → name-sorted children, for quotas present in the map.
    /// A quota whose parent is unknown hangs off the pseudo root until
    /// the parent object arrives.
    fn children_by_parent(&self) -> HashMap<String, Vec<String>> {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for (name, info) in &self.quotas {
            let parent = if info.parent != ROOT_QUOTA_NAME && !self.quotas.contains_key(&info.parent)
            {
                ROOT_QUOTA_NAME.to_string()
            } else {
                info.parent.clone()
            };
            children.entry(parent).or_default().push(name.clone());
        }
        for list in children.values_mut() {
            list.sort();
        }
        children
    }
}

pub struct GroupQuotaManager {
    tree_id: String,
    scale_mins: bool,
    estimator: Arc<dyn PodRequestEstimator>,
    hooks: RwLock<Vec<Arc<dyn QuotaHookPlugin>>>,
    state: RwLock<TreeState>,
}

impl GroupQuotaManager {
    pub fn new(
        tree_id: &str,
        args: &ElasticQuotaArgs,
        estimator: Arc<dyn PodRequestEstimator>,
    ) -> Self {
        let mut quotas = HashMap::new();
        quotas.insert(
            DEFAULT_QUOTA_NAME.to_string(),
            QuotaInfo::implicit(DEFAULT_QUOTA_NAME, tree_id, args.default_quota_group_max.clone()),
        );
        quotas.insert(
            SYSTEM_QUOTA_NAME.to_string(),
            QuotaInfo::implicit(SYSTEM_QUOTA_NAME, tree_id, args.system_quota_group_max.clone()),
        );
        Self {
            tree_id: tree_id.to_string(),
            scale_mins: args.enable_min_quota_scale,
            estimator,
            hooks: RwLock::new(Vec::new()),
            state: RwLock::new(TreeState {
                total: ResourceSet::new(),
                quotas,
            }),
        }
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    /// Register a hook plugin; it sees every subsequent spec change.
    pub fn register_hook(&self, hook: Arc<dyn QuotaHookPlugin>) {
        tracing::info!(tree = %self.tree_id, hook = hook.key(), "registering quota hook plugin");
        self.hooks.write().push(hook);
    }

    // ─── Quota lifecycle ───────────────────────────────────────────────

    /// Upsert a quota from its object. Returns true when the cached spec
    /// actually changed (and runtimes were recomputed).
    pub fn update_quota(&self, quota: &ElasticQuota) -> Result<bool> {
        let mut info = QuotaInfo::from_quota(quota)?;
        let name = info.name.clone();
        let old = {
            let mut state = self.state.write();
            let old = state.quotas.get(&name).cloned();
            if let Some(old) = &old {
                if !old.is_spec_change(&info) {
                    return Ok(false);
                }
                info.carry_over_from(old);
            }
            tracing::info!(tree = %self.tree_id, quota = %name, parent = %info.parent, "quota updated");
            state.quotas.insert(name.clone(), info);
            self.refresh_runtimes(&mut state);
            old
        };
        // Hooks run outside the tree lock on the refreshed snapshot.
        if let Some(new) = self.quota_info(&name) {
            for hook in self.hooks.read().iter() {
                hook.on_quota_update(old.as_ref(), &new);
            }
        }
        Ok(true)
    }

    /// Remove a quota. Its pods migrate to the default quota group.
    pub fn delete_quota(&self, name: &str) -> Result<()> {
        if name == DEFAULT_QUOTA_NAME || name == SYSTEM_QUOTA_NAME {
            return Err(SchedulerError::invalid_spec(format!(
                "quota {name} is a builtin group and cannot be deleted"
            )));
        }
        let mut state = self.state.write();
        let Some(removed) = state.quotas.remove(name) else {
            return Err(SchedulerError::not_found(format!(
                "quota {name} is not in tree {:?}",
                self.tree_id
            )));
        };
        if let Some(default) = state.quotas.get_mut(DEFAULT_QUOTA_NAME) {
            for (pod_id, attachment) in removed.pods {
                tracing::debug!(
                    pod = %pod_id,
                    from = name,
                    "migrating pod to the default quota group"
                );
                default.pods.insert(pod_id, attachment);
            }
        }
        tracing::info!(tree = %self.tree_id, quota = name, "quota deleted");
        self.refresh_runtimes(&mut state);
        Ok(())
    }

    /// Full re-materialization from a complete snapshot (replace event).
    /// Pod attachments survive by quota name.
    pub fn reset(&self, quotas: &[Arc<ElasticQuota>]) {
        let mut state = self.state.write();
        let mut rebuilt: HashMap<String, QuotaInfo> = HashMap::new();
        for name in [DEFAULT_QUOTA_NAME, SYSTEM_QUOTA_NAME] {
            if let Some(old) = state.quotas.get(name) {
                rebuilt.insert(name.to_string(), old.clone());
            }
        }
        for quota in quotas {
            if quota.metadata.is_deleting() {
                continue;
            }
            match QuotaInfo::from_quota(quota) {
                Ok(mut info) => {
                    if let Some(old) = state.quotas.get(&info.name) {
                        info.carry_over_from(old);
                    }
                    rebuilt.insert(info.name.clone(), info);
                }
                Err(e) => {
                    tracing::debug!(quota = %quota.name(), error = %e, "skipping invalid quota in reset");
                }
            }
        }
        state.quotas = rebuilt;
        self.refresh_runtimes(&mut state);
    }

    /// Give every registered hook plugin the same full snapshot a reset
    /// was built from.
    pub fn reset_for_hook_plugins(&self, quotas: &[Arc<ElasticQuota>]) {
        for hook in self.hooks.read().iter() {
            hook.on_reset(quotas);
        }
    }

    // ─── Totals ────────────────────────────────────────────────────────

    /// Set this tree's advertised total. Returns the delta from the
    /// previous total so the caller can adjust the default tree
    /// symmetrically.
    pub fn set_total_resource_for_tree(&self, total: ResourceSet) -> ResourceSet {
        let mut state = self.state.write();
        let delta = total.delta(&state.total);
        state.total = total;
        self.refresh_runtimes(&mut state);
        delta
    }

    /// Adjust the tree total by a signed delta.
    pub fn update_cluster_total_resource(&self, delta: &ResourceSet) {
        let mut state = self.state.write();
        state.total.add(delta);
        self.refresh_runtimes(&mut state);
    }

    pub fn total_resource(&self) -> ResourceSet {
        self.state.read().total.clone()
    }

    // ─── Pod accounting ────────────────────────────────────────────────

    /// Attach a pod to its quota (the default group when the quota is
    /// unknown) and recompute.
    pub fn on_pod_add(&self, quota_name: &str, pod: &Arc<Pod>) {
        let estimated = self.estimator.estimate(pod);
        let mut state = self.state.write();
        let target = if state.quotas.contains_key(quota_name) {
            quota_name
        } else {
            DEFAULT_QUOTA_NAME
        };
        if let Some(info) = state.quotas.get_mut(target) {
            info.attach_pod(pod.clone(), estimated);
        }
        self.refresh_runtimes(&mut state);
    }

    /// Re-attach after an update; the pod may have moved quotas or
    /// gained a node.
    pub fn on_pod_update(&self, quota_name: &str, pod: &Arc<Pod>) {
        let estimated = self.estimator.estimate(pod);
        let pod_id = pod.id();
        let mut state = self.state.write();
        for info in state.quotas.values_mut() {
            info.detach_pod(&pod_id);
        }
        let target = if state.quotas.contains_key(quota_name) {
            quota_name
        } else {
            DEFAULT_QUOTA_NAME
        };
        if let Some(info) = state.quotas.get_mut(target) {
            info.attach_pod(pod.clone(), estimated);
        }
        self.refresh_runtimes(&mut state);
    }

    pub fn on_pod_delete(&self, pod: &Pod) {
        let pod_id = pod.id();
        let mut state = self.state.write();
        let mut detached = false;
        for info in state.quotas.values_mut() {
            detached |= info.detach_pod(&pod_id).is_some();
        }
        if detached {
            self.refresh_runtimes(&mut state);
        }
    }

    // ─── Queries ───────────────────────────────────────────────────────

    pub fn quota_info(&self, name: &str) -> Option<QuotaInfo> {
        self.state.read().quotas.get(name).cloned()
    }

    pub fn runtime_of(&self, name: &str) -> Option<ResourceSet> {
        self.state.read().quotas.get(name).map(|q| q.runtime.clone())
    }

    pub fn has_quota(&self, name: &str) -> bool {
        self.state.read().quotas.contains_key(name)
    }

    pub fn num_quotas(&self) -> usize {
        self.state.read().quotas.len()
    }

    pub fn quota_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().quotas.keys().cloned().collect();
        names.sort();
        names
    }

    /// Usage snapshots for the revocation loop.
    pub fn usage_snapshots(&self) -> Vec<QuotaUsageSnapshot> {
        let state = self.state.read();
        let children = state.children_by_parent();
        let mut snapshots: Vec<QuotaUsageSnapshot> = state
            .quotas
            .values()
            .map(|info| QuotaUsageSnapshot {
                name: info.name.clone(),
                used: info.used.clone(),
                runtime: info.runtime.clone(),
                max: info.max.clone(),
                has_children: children.contains_key(&info.name),
                pods: info.attachments().cloned().collect(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// All pods attached anywhere under `name` (inclusive).
    pub fn subtree_pods(&self, name: &str) -> Vec<PodAttachment> {
        let state = self.state.read();
        let children = state.children_by_parent();
        let mut out = Vec::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(info) = state.quotas.get(&current) {
                out.extend(info.attachments().cloned());
            }
            if let Some(kids) = children.get(&current) {
                stack.extend(kids.iter().cloned());
            }
        }
        out
    }

    // ─── Runtime recomputation ─────────────────────────────────────────

    fn refresh_runtimes(&self, state: &mut TreeState) {
        let children = state.children_by_parent();

        // Bottom-up: post-order aggregation of request/used. A child
        // contributes at most its max.
        let post_order = Self::post_order(&children);
        for name in &post_order {
            let (mut request, mut used) = match state.quotas.get(name) {
                Some(info) => info.local_request_and_used(),
                None => continue,
            };
            if let Some(kids) = children.get(name) {
                for kid in kids {
                    if let Some(kid_info) = state.quotas.get(kid) {
                        request.add(&kid_info.request.min_with(&kid_info.max));
                        used.add(&kid_info.used.min_with(&kid_info.max));
                    }
                }
            }
            if let Some(info) = state.quotas.get_mut(name) {
                info.request = request;
                info.used = used;
            }
        }

        // Top-down: distribute capacity level by level, siblings ordered
        // by name. The builtin groups do not borrow; their runtime is
        // pinned to max.
        let total = state.total.clone();
        let mut stack: Vec<(String, ResourceSet)> = vec![(ROOT_QUOTA_NAME.to_string(), total)];
        while let Some((parent, parent_runtime)) = stack.pop() {
            let Some(kids) = children.get(&parent) else {
                continue;
            };
            let participating: Vec<String> = kids
                .iter()
                .filter(|name| {
                    name.as_str() != DEFAULT_QUOTA_NAME && name.as_str() != SYSTEM_QUOTA_NAME
                })
                .cloned()
                .collect();

            let inputs: Vec<(ResourceSet, ResourceSet, ResourceSet)> = participating
                .iter()
                .filter_map(|name| state.quotas.get(name))
                .map(|info| (info.min.clone(), info.max.clone(), info.request.clone()))
                .collect();
            let runtimes = distribute_resources(&parent_runtime, &inputs, self.scale_mins);

            for (name, runtime) in participating.iter().zip(runtimes) {
                if let Some(info) = state.quotas.get_mut(name) {
                    info.auto_scale_min = if self.scale_mins {
                        Self::auto_scaled_min(&parent_runtime, &inputs, info)
                    } else {
                        info.min.clone()
                    };
                    info.runtime = runtime.clone();
                }
                stack.push((name.clone(), runtime));
            }
        }

        for name in [DEFAULT_QUOTA_NAME, SYSTEM_QUOTA_NAME] {
            if let Some(info) = state.quotas.get_mut(name) {
                info.runtime = info.max.clone();
            }
        }
    }

    /// This quota's min after the sibling-level proportional scaling.
    fn auto_scaled_min(
        parent_runtime: &ResourceSet,
        siblings: &[(ResourceSet, ResourceSet, ResourceSet)],
        info: &QuotaInfo,
    ) -> ResourceSet {
        let mut scaled = ResourceSet::new();
        for (name, own_min) in info.min.iter() {
            let mins: Vec<_> = siblings.iter().map(|(min, _, _)| min.get(name)).collect();
            let scaled_all = scaled_mins(&mins, parent_runtime.get(name));
            let index = siblings
                .iter()
                .position(|(min, _, _)| min == &info.min)
                .unwrap_or(0);
            let value = scaled_all.get(index).copied().unwrap_or(own_min);
            scaled.set(name.to_string(), value);
        }
        scaled
    }

    fn post_order(children: &HashMap<String, Vec<String>>) -> Vec<String> {
        let mut order = Vec::new();
        let mut stack: Vec<(String, bool)> = vec![(ROOT_QUOTA_NAME.to_string(), false)];
        while let Some((name, expanded)) = stack.pop() {
            if expanded {
                if name != ROOT_QUOTA_NAME {
                    order.push(name);
                }
                continue;
            }
            stack.push((name.clone(), true));
            if let Some(kids) = children.get(&name) {
                for kid in kids.iter().rev() {
                    stack.push((kid.clone(), false));
                }
            }
        }
        order
    }
}
