// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Shared state of a gang group: the latching once-satisfied flag, the
//! set of gangs currently waiting at permit, and the representative-pod
//! election used to suppress duplicate activations.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

pub const REASON_POD_DELETED: &str = "PodDeleted";
pub const REASON_POD_BOUND: &str = "PodBound";
pub const REASON_GANG_REJECTED: &str = "GangRejected";

#[derive(Default)]
struct GroupState {
    /// Latching: set when any member gang sees a full allocation, never
    /// reset while the group lives.
    once_resource_satisfied: bool,
    /// Member gangs with at least one pod in the permit stage.
    waiting_gangs: BTreeSet<String>,
    /// At most one pod per group drives scheduling at a time.
    representative: Option<String>,
}

pub struct GangGroupInfo {
    pub group_id: String,
    pub gang_group: Vec<String>,
    initialized: AtomicBool,
    state: Mutex<GroupState>,
}

impl GangGroupInfo {
    pub fn new(group_id: String, gang_group: Vec<String>) -> Self {
        Self {
            group_id,
            gang_group,
            initialized: AtomicBool::new(false),
            state: Mutex::new(GroupState::default()),
        }
    }

    /// Placeholder installed on a freshly created gang before the cache
    /// resolves the real group.
    pub fn placeholder() -> Self {
        Self::new(String::new(), Vec::new())
    }

    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn set_resource_satisfied(&self) {
        let mut state = self.state.lock();
        if !state.once_resource_satisfied {
            state.once_resource_satisfied = true;
            tracing::info!(group = %self.group_id, "gang group resource satisfied");
        }
    }

    pub fn is_once_resource_satisfied(&self) -> bool {
        self.state.lock().once_resource_satisfied
    }

    pub fn add_waiting_gang(&self, gang_name: &str) {
        self.state.lock().waiting_gangs.insert(gang_name.to_string());
    }

    pub fn remove_waiting_gang(&self, gang_name: &str) {
        self.state.lock().waiting_gangs.remove(gang_name);
    }

    pub fn clear_waiting_gangs(&self) {
        self.state.lock().waiting_gangs.clear();
    }

    pub fn waiting_gang_count(&self) -> usize {
        self.state.lock().waiting_gangs.len()
    }

    /// Elect `pod_id` as the group representative if the seat is empty.
    /// Returns the representative after the call, which is `pod_id` only
    /// when the election succeeded.
    pub fn record_if_no_representative(&self, pod_id: &str) -> String {
        let mut state = self.state.lock();
        match &state.representative {
            Some(current) => current.clone(),
            None => {
                state.representative = Some(pod_id.to_string());
                pod_id.to_string()
            }
        }
    }

    /// Clear the representative seat if `pod_id` currently holds it.
    pub fn delete_if_representative(&self, pod_id: &str, reason: &str) {
        let mut state = self.state.lock();
        if state.representative.as_deref() == Some(pod_id) {
            tracing::debug!(
                group = %self.group_id,
                pod = pod_id,
                reason,
                "clearing group representative"
            );
            state.representative = None;
        }
    }

    pub fn clear_current_representative(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.representative.is_some() {
            tracing::debug!(group = %self.group_id, reason, "clearing group representative");
            state.representative = None;
        }
    }

    pub fn representative(&self) -> Option<String> {
        self.state.lock().representative.clone()
    }
}
