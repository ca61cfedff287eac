// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The gang cache: every Gang and GangGroupInfo, maintained from pod and
//! PodGroup watch events.
//!
//! The cache owns both maps. A gang holds only the shared group info the
//! cache installed, so groups are reaped deterministically when their
//! last member gang vanishes.

use std::collections::HashMap;
use std::sync::Arc;

use koord_common::config::CoschedulingArgs;
use koord_common::extension;
use koord_common::hash::gang_group_id;
use koord_common::objects::{get_id, Pod, PodGroup};
use koord_util::counter::ErrorCounter;
use parking_lot::RwLock;

use super::gang::Gang;
use super::group_info::GangGroupInfo;
use crate::adapter::SchedulerAdapter;
use crate::event_source::EventHandler;

#[derive(Default)]
struct CacheState {
    gangs: HashMap<String, Arc<Gang>>,
    groups: HashMap<String, Arc<GangGroupInfo>>,
}

pub struct GangCache {
    state: RwLock<CacheState>,
    args: CoschedulingArgs,
    adapter: Arc<SchedulerAdapter>,
    errors: Arc<ErrorCounter>,
}

impl GangCache {
    pub fn new(
        args: CoschedulingArgs,
        adapter: Arc<SchedulerAdapter>,
        errors: Arc<ErrorCounter>,
    ) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            args,
            adapter,
            errors,
        }
    }

    pub fn get_gang(&self, gang_id: &str) -> Option<Arc<Gang>> {
        self.state.read().gangs.get(gang_id).cloned()
    }

    fn get_or_create_gang(&self, gang_id: &str) -> Arc<Gang> {
        let mut state = self.state.write();
        state
            .gangs
            .entry(gang_id.to_string())
            .or_insert_with(|| {
                tracing::info!(gang = gang_id, "creating gang");
                Arc::new(Gang::new(gang_id))
            })
            .clone()
    }

    fn delete_gang(&self, gang_id: &str) {
        self.state.write().gangs.remove(gang_id);
        tracing::info!(gang = gang_id, "deleted gang from cache");
    }

    /// Get or create the shared group info for a group id.
    fn get_or_create_group_info(
        &self,
        group_id: &str,
        gang_group: &[String],
    ) -> Arc<GangGroupInfo> {
        let mut state = self.state.write();
        state
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| {
                let info = GangGroupInfo::new(group_id.to_string(), gang_group.to_vec());
                info.set_initialized();
                tracing::info!(group = group_id, "creating gang group info");
                Arc::new(info)
            })
            .clone()
    }

    fn delete_group_info(&self, group_id: &str) {
        self.state.write().groups.remove(group_id);
        tracing::info!(group = group_id, "deleted gang group info from cache");
    }

    /// The gang a pod belongs to, if any and already cached.
    pub fn gang_of_pod(&self, pod: &Pod) -> Option<Arc<Gang>> {
        let gang_name = extension::gang_name_of(pod)?;
        self.get_gang(&get_id(&pod.metadata.namespace, &gang_name))
    }

    /// All cached member gangs of a group.
    pub fn gangs_in_group(&self, gang_group: &[String]) -> Vec<Arc<Gang>> {
        let state = self.state.read();
        gang_group
            .iter()
            .filter_map(|gang_id| state.gangs.get(gang_id).cloned())
            .collect()
    }

    pub fn all_gangs(&self) -> Vec<Arc<Gang>> {
        self.state.read().gangs.values().cloned().collect()
    }

    pub fn num_gangs(&self) -> usize {
        self.state.read().gangs.len()
    }

    pub fn num_groups(&self) -> usize {
        self.state.read().groups.len()
    }

    /// Resolve and install the gang's group info after (re)init.
    fn install_group_info(&self, gang: &Arc<Gang>) {
        let gang_group = gang.gang_group();
        let group_id = gang_group_id(&gang_group);
        let info = self.get_or_create_group_info(&group_id, &gang_group);
        gang.set_group_info(info);
    }

    /// Push an activation for one pod: move it from the unschedulable
    /// set back to the active queue. The cache only re-nudges; it never
    /// decides placement.
    fn activate_pod(&self, gang_id: &str, pod: &Arc<Pod>) {
        tracing::debug!(gang = gang_id, pod = %pod.id(), "gang basic check passed, delivering activation");
        self.adapter
            .activate(HashMap::from([(pod.id(), pod.clone())]));
    }

    fn on_pod_event(&self, pod: &Arc<Pod>, is_create: bool) {
        let Some(gang_name) = extension::gang_name_of(pod) else {
            return;
        };
        let gang_id = get_id(&pod.metadata.namespace, &gang_name);
        let gang = self.get_or_create_gang(&gang_id);

        // Annotation-driven gangs initialize from their pods; PodGroup
        // labeled pods wait for the CR to arrive.
        if !extension::is_pod_group_labeled(pod) {
            gang.try_init(pod.as_ref(), &self.args, &self.errors);
            self.install_group_info(&gang);
        }

        gang.set_child(pod.clone());
        if pod.is_assigned() {
            gang.add_bound_pod(pod.clone());
        } else if is_create && gang.is_gang_worth_requeue() {
            self.activate_pod(&gang_id, pod);
        }
    }

    /// Drop the gang's group info when no member gang remains cached.
    fn reap_group_if_orphaned(&self, gang: &Arc<Gang>) {
        let gang_group = gang.gang_group();
        let all_deleted = {
            let state = self.state.read();
            gang_group
                .iter()
                .all(|gang_id| !state.gangs.contains_key(gang_id))
        };
        if all_deleted {
            self.delete_group_info(&gang.group_info().group_id);
        }
    }
}

impl EventHandler<Pod> for GangCache {
    fn on_add(&self, pod: &Arc<Pod>) {
        self.on_pod_event(pod, true);
    }

    fn on_update(&self, _old: &Arc<Pod>, new: &Arc<Pod>) {
        if extension::gang_name_of(new).is_none() {
            return;
        }
        if new.is_terminated() {
            return;
        }
        self.on_pod_event(new, false);
    }

    fn on_delete(&self, pod: &Arc<Pod>) {
        let Some(gang_name) = extension::gang_name_of(pod) else {
            return;
        };
        let gang_id = get_id(&pod.metadata.namespace, &gang_name);
        let Some(gang) = self.get_gang(&gang_id) else {
            return;
        };

        // A deleted pod can no longer wait at permit.
        self.adapter.reject_waiting_pod(pod.uid(), "pod deleted");

        if gang.delete_pod(pod) {
            self.delete_gang(&gang_id);
            self.reap_group_if_orphaned(&gang);
        }
    }
}

impl EventHandler<PodGroup> for GangCache {
    fn on_add(&self, pg: &Arc<PodGroup>) {
        let gang_id = pg.id();
        let gang = self.get_or_create_gang(&gang_id);
        gang.try_init(pg.as_ref(), &self.args, &self.errors);
        if gang.is_gang_worth_requeue() {
            if let Some(child) = gang.pick_some_pending_child() {
                self.activate_pod(&gang_id, &child);
            }
        }
        self.install_group_info(&gang);
    }

    fn on_update(&self, _old: &Arc<PodGroup>, new: &Arc<PodGroup>) {
        let gang_id = new.id();
        let Some(gang) = self.get_gang(&gang_id) else {
            tracing::error!(gang = %gang_id, "gang does not exist on PodGroup update");
            return;
        };
        let worth_requeue_before = gang.is_gang_worth_requeue();
        gang.try_init(new.as_ref(), &self.args, &self.errors);
        // Only a false→true crossing warrants an activation push.
        if !worth_requeue_before && gang.is_gang_worth_requeue() {
            if let Some(child) = gang.pick_some_pending_child() {
                self.activate_pod(&gang_id, &child);
            }
        }
        self.install_group_info(&gang);
    }

    fn on_delete(&self, pg: &Arc<PodGroup>) {
        let gang_id = pg.id();
        let Some(gang) = self.get_gang(&gang_id) else {
            return;
        };
        gang.group_info().remove_waiting_gang(&gang.name);
        self.delete_gang(&gang_id);
        self.reap_group_if_orphaned(&gang);
    }
}
