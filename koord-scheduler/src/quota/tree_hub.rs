// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The quota tree hub: one GroupQuotaManager per quota tree.
//!
//! The default tree (empty tree id) carries the cluster total fed from
//! node events. A root quota of a non-default tree advertises that
//! tree's total; the slice moves out of the default tree unless the
//! quota opts out, so `Σ tree totals + default total = cluster total`
//! holds at every quiescent point.

use std::collections::HashMap;
use std::sync::Arc;

use koord_common::config::ElasticQuotaArgs;
use koord_common::extension;
use koord_common::objects::{ElasticQuota, Node, Pod};
use koord_common::resources::ResourceSet;
use koord_util::counter::ErrorCounter;
use parking_lot::RwLock;

use super::estimator::PodRequestEstimator;
use super::group_quota_manager::GroupQuotaManager;
use crate::event_source::EventHandler;
use crate::reservation::is_reserve_pod;

#[derive(Default)]
struct HubState {
    tree_managers: HashMap<String, Arc<GroupQuotaManager>>,
    quota_to_tree: HashMap<String, String>,
}

pub struct QuotaTreeHub {
    args: Arc<ElasticQuotaArgs>,
    estimator: Arc<dyn PodRequestEstimator>,
    default_manager: Arc<GroupQuotaManager>,
    state: RwLock<HubState>,
    errors: Arc<ErrorCounter>,
}

impl QuotaTreeHub {
    pub fn new(
        args: Arc<ElasticQuotaArgs>,
        estimator: Arc<dyn PodRequestEstimator>,
        errors: Arc<ErrorCounter>,
    ) -> Self {
        let default_manager = Arc::new(GroupQuotaManager::new("", &args, estimator.clone()));
        Self {
            args,
            estimator,
            default_manager,
            state: RwLock::new(HubState::default()),
            errors,
        }
    }

    pub fn default_manager(&self) -> &Arc<GroupQuotaManager> {
        &self.default_manager
    }

    pub fn manager_for_tree(&self, tree_id: &str) -> Option<Arc<GroupQuotaManager>> {
        if tree_id.is_empty() {
            return Some(self.default_manager.clone());
        }
        self.state.read().tree_managers.get(tree_id).cloned()
    }

    fn get_or_create_manager_for_tree(&self, tree_id: &str) -> Arc<GroupQuotaManager> {
        if tree_id.is_empty() {
            return self.default_manager.clone();
        }
        if let Some(mgr) = self.state.read().tree_managers.get(tree_id) {
            return mgr.clone();
        }
        let mut state = self.state.write();
        state
            .tree_managers
            .entry(tree_id.to_string())
            .or_insert_with(|| {
                tracing::info!(tree = tree_id, "creating quota tree manager");
                Arc::new(GroupQuotaManager::new(
                    tree_id,
                    &self.args,
                    self.estimator.clone(),
                ))
            })
            .clone()
    }

    /// The manager responsible for a quota name (default tree when the
    /// quota is unknown).
    pub fn manager_for_quota(&self, quota_name: &str) -> Arc<GroupQuotaManager> {
        let state = self.state.read();
        state
            .quota_to_tree
            .get(quota_name)
            .and_then(|tree| state.tree_managers.get(tree))
            .cloned()
            .unwrap_or_else(|| self.default_manager.clone())
    }

    pub fn all_managers(&self) -> Vec<Arc<GroupQuotaManager>> {
        let mut managers = vec![self.default_manager.clone()];
        managers.extend(self.state.read().tree_managers.values().cloned());
        managers
    }

    /// Sum of all non-default tree totals plus the default tree total.
    /// Equals the cluster total at quiescence.
    pub fn accounted_cluster_total(&self) -> ResourceSet {
        let mut total = self.default_manager.total_resource();
        for mgr in self.state.read().tree_managers.values() {
            total.add(&mgr.total_resource());
        }
        total
    }

    /// Root quotas of non-default trees advertise the tree total; the
    /// delta is mirrored out of (or back into) the default tree.
    fn handle_root_quota(
        &self,
        quota: &ElasticQuota,
        mgr: &Arc<GroupQuotaManager>,
        is_delete: bool,
    ) {
        if !extension::is_root_quota(&quota.metadata) || mgr.tree_id().is_empty() {
            return;
        }
        let Some(total) = extension::quota_total_resource(&quota.metadata) else {
            return;
        };
        let total = match total {
            Ok(total) => total,
            Err(e) => {
                self.errors.incr("quota_total_resource");
                tracing::debug!(quota = %quota.name(), error = %e, "invalid tree total annotation");
                return;
            }
        };

        let delta = if is_delete {
            // Release the whole tree total back and drop the manager.
            let delta = mgr.set_total_resource_for_tree(ResourceSet::new());
            self.state.write().tree_managers.remove(mgr.tree_id());
            delta
        } else {
            mgr.set_total_resource_for_tree(total)
        };

        if !delta.is_zero() && !extension::ignores_default_tree(&quota.metadata) {
            let mut mirror = ResourceSet::new();
            mirror.sub(&delta);
            self.default_manager.update_cluster_total_resource(&mirror);
        }
    }

    /// Full re-materialization of every tree from a complete snapshot.
    pub fn replace_quotas(&self, quotas: &[Arc<ElasticQuota>]) {
        let mut by_tree: HashMap<String, Vec<Arc<ElasticQuota>>> = HashMap::new();
        {
            let mut state = self.state.write();
            state.quota_to_tree.clear();
        }
        for quota in quotas {
            if quota.metadata.is_deleting() {
                continue;
            }
            let tree = extension::quota_tree_id(&quota.metadata).to_string();
            self.state
                .write()
                .quota_to_tree
                .insert(quota.name().to_string(), tree.clone());
            by_tree.entry(tree).or_default().push(quota.clone());
        }

        for (tree, tree_quotas) in &by_tree {
            let mgr = self.get_or_create_manager_for_tree(tree);
            for quota in tree_quotas {
                self.handle_root_quota(quota, &mgr, false);
            }
            mgr.reset(tree_quotas);
            mgr.reset_for_hook_plugins(tree_quotas);
        }
        if !by_tree.contains_key("") {
            self.default_manager.reset(&[]);
            self.default_manager.reset_for_hook_plugins(&[]);
        }
    }
}

impl EventHandler<ElasticQuota> for QuotaTreeHub {
    fn on_add(&self, quota: &Arc<ElasticQuota>) {
        if quota.metadata.is_deleting() {
            tracing::debug!(quota = %quota.name(), "ignoring add of deleting quota");
            return;
        }
        let tree = extension::quota_tree_id(&quota.metadata).to_string();
        let mgr = self.get_or_create_manager_for_tree(&tree);
        self.state
            .write()
            .quota_to_tree
            .insert(quota.name().to_string(), tree);

        self.handle_root_quota(quota, &mgr, false);
        if let Err(e) = mgr.update_quota(quota) {
            self.errors.incr("quota_spec");
            tracing::debug!(quota = %quota.name(), error = %e, "rejecting quota add");
        }
    }

    fn on_update(&self, _old: &Arc<ElasticQuota>, new: &Arc<ElasticQuota>) {
        if new.metadata.is_deleting() {
            tracing::warn!(quota = %new.name(), "ignoring update of deleting quota");
            return;
        }
        // Changing the quota tree in place is forbidden; the quota stays
        // in the tree it registered with.
        let mgr = self.manager_for_quota(new.name());
        self.handle_root_quota(new, &mgr, false);
        if let Err(e) = mgr.update_quota(new) {
            self.errors.incr("quota_spec");
            tracing::debug!(quota = %new.name(), error = %e, "rejecting quota update");
        }
    }

    fn on_delete(&self, quota: &Arc<ElasticQuota>) {
        let mgr = self.manager_for_quota(quota.name());
        self.state.write().quota_to_tree.remove(quota.name());
        if let Err(e) = mgr.delete_quota(quota.name()) {
            tracing::debug!(quota = %quota.name(), error = %e, "quota delete");
        }
        self.handle_root_quota(quota, &mgr, true);
    }
}

impl EventHandler<Pod> for QuotaTreeHub {
    fn on_add(&self, pod: &Arc<Pod>) {
        // Reserve-pod mirrors hold capacity, they do not consume quota.
        if is_reserve_pod(pod) {
            return;
        }
        let quota_name = extension::quota_name_of(pod).to_string();
        self.manager_for_quota(&quota_name).on_pod_add(&quota_name, pod);
    }

    fn on_update(&self, old: &Arc<Pod>, new: &Arc<Pod>) {
        if is_reserve_pod(new) {
            return;
        }
        if new.is_terminated() {
            EventHandler::<Pod>::on_delete(self, old);
            return;
        }
        let quota_name = extension::quota_name_of(new).to_string();
        self.manager_for_quota(&quota_name).on_pod_update(&quota_name, new);
    }

    fn on_delete(&self, pod: &Arc<Pod>) {
        if is_reserve_pod(pod) {
            return;
        }
        for mgr in self.all_managers() {
            mgr.on_pod_delete(pod);
        }
    }
}

impl EventHandler<Node> for QuotaTreeHub {
    fn on_add(&self, node: &Arc<Node>) {
        self.default_manager
            .update_cluster_total_resource(&node.status.allocatable);
    }

    fn on_update(&self, old: &Arc<Node>, new: &Arc<Node>) {
        let delta = new.status.allocatable.delta(&old.status.allocatable);
        if !delta.is_zero() {
            self.default_manager.update_cluster_total_resource(&delta);
        }
    }

    fn on_delete(&self, node: &Arc<Node>) {
        let mut delta = ResourceSet::new();
        delta.sub(&node.status.allocatable);
        self.default_manager.update_cluster_total_resource(&delta);
    }
}
