// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The gang side of the Permit extension point.
//!
//! A gang pod reaching Permit is moved to its gang's waiting-for-bind
//! set. When every gang of the group satisfies its match policy, the
//! whole group is released at once; otherwise the pod suspends for at
//! most the gang's wait time, and a timeout in strict mode rejects the
//! entire group.

use std::sync::Arc;
use std::time::Duration;

use koord_common::error::{Result, SchedulerError};
use koord_common::extension::GangMode;
use koord_common::objects::Pod;
use tokio::sync::oneshot;

use super::cache::GangCache;
use super::gang::Gang;
use super::group_info::REASON_GANG_REJECTED;
use crate::adapter::{PermitVerdict, SchedulerAdapter};

/// Outcome of the synchronous part of the permit call.
pub enum PermitDecision {
    Allow,
    Wait {
        verdict: oneshot::Receiver<PermitVerdict>,
        timeout: Duration,
    },
    Reject(String),
}

pub struct GangPermit {
    cache: Arc<GangCache>,
    adapter: Arc<SchedulerAdapter>,
}

impl GangPermit {
    pub fn new(cache: Arc<GangCache>, adapter: Arc<SchedulerAdapter>) -> Self {
        Self { cache, adapter }
    }

    /// Run the permit check for a pod. Non-gang pods pass through.
    pub fn permit(&self, pod: &Arc<Pod>) -> PermitDecision {
        let Some(gang) = self.cache.gang_of_pod(pod) else {
            return PermitDecision::Allow;
        };
        if !gang.is_initialized() {
            return PermitDecision::Reject(format!(
                "gang {} has not been initialized",
                gang.name
            ));
        }

        gang.add_assumed_pod(pod.clone());
        let group_info = gang.group_info();
        group_info.add_waiting_gang(&gang.name);

        let gang_group = gang.gang_group();
        let members = self.cache.gangs_in_group(&gang_group);
        let all_valid = members.len() == gang_group.len()
            && members.iter().all(|g| g.is_gang_valid_for_permit());

        if all_valid {
            self.allow_gang_group(&gang);
            PermitDecision::Allow
        } else {
            let verdict = self
                .adapter
                .waiting_pods()
                .insert(pod.clone(), Some(gang.gang_group_id()));
            PermitDecision::Wait {
                verdict,
                timeout: gang.wait_time(),
            }
        }
    }

    /// Release every waiter of the gang's group and latch satisfaction.
    pub fn allow_gang_group(&self, gang: &Arc<Gang>) {
        let group_info = gang.group_info();
        group_info.set_resource_satisfied();
        group_info.clear_waiting_gangs();
        let released = self
            .adapter
            .waiting_pods()
            .allow_group(&group_info.group_id);
        tracing::info!(
            gang = %gang.name,
            group = %group_info.group_id,
            released = released.len(),
            "gang group allowed"
        );
    }

    /// Reject every waiter of the gang's group and roll their gangs'
    /// permit state back to pending.
    pub fn reject_gang_group(&self, gang: &Arc<Gang>, reason: &str) {
        let group_info = gang.group_info();
        let released = self
            .adapter
            .waiting_pods()
            .reject_group(&group_info.group_id, reason);
        for pod in &released {
            if let Some(member) = self.cache.gang_of_pod(pod) {
                member.del_assumed_pod(pod);
            }
        }
        group_info.clear_waiting_gangs();
        group_info.clear_current_representative(REASON_GANG_REJECTED);
        tracing::info!(
            gang = %gang.name,
            group = %group_info.group_id,
            rejected = released.len(),
            reason,
            "gang group rejected"
        );
    }

    /// Drive a permit decision to completion. Suspends for at most the
    /// gang's wait time; a cancellation (channel drop, pod deletion,
    /// explicit reject) or timeout surfaces as unschedulable.
    pub async fn wait_for_verdict(
        &self,
        pod: &Arc<Pod>,
        decision: PermitDecision,
    ) -> Result<()> {
        match decision {
            PermitDecision::Allow => Ok(()),
            PermitDecision::Reject(reason) => Err(SchedulerError::unschedulable(reason)),
            PermitDecision::Wait { verdict, timeout } => {
                match tokio::time::timeout(timeout, verdict).await {
                    Ok(Ok(PermitVerdict::Allow)) => Ok(()),
                    Ok(Ok(PermitVerdict::Reject(reason))) => {
                        if let Some(gang) = self.cache.gang_of_pod(pod) {
                            gang.del_assumed_pod(pod);
                        }
                        Err(SchedulerError::unschedulable(reason))
                    }
                    Ok(Err(_)) => {
                        if let Some(gang) = self.cache.gang_of_pod(pod) {
                            gang.del_assumed_pod(pod);
                        }
                        Err(SchedulerError::unschedulable(format!(
                            "permit wait for pod {} was cancelled",
                            pod.id()
                        )))
                    }
                    Err(_) => {
                        self.on_wait_timeout(pod);
                        Err(SchedulerError::unschedulable(format!(
                            "pod {} timed out waiting for its gang",
                            pod.id()
                        )))
                    }
                }
            }
        }
    }

    /// Timeout handling: strict gangs take the whole group down with
    /// them, non-strict gangs fail alone.
    fn on_wait_timeout(&self, pod: &Arc<Pod>) {
        let Some(gang) = self.cache.gang_of_pod(pod) else {
            return;
        };
        match gang.mode() {
            GangMode::Strict => {
                let reason = format!(
                    "gang {} permit wait timed out, rejecting the gang group",
                    gang.name
                );
                self.reject_gang_group(&gang, &reason);
            }
            GangMode::NonStrict => {
                self.adapter
                    .waiting_pods()
                    .reject(pod.uid(), "gang permit wait timed out");
                gang.del_assumed_pod(pod);
            }
        }
    }
}
