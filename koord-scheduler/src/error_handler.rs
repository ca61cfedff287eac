// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The per-pod scheduling-failure path.
//!
//! Every failure removes the pod's nominated reservation, emits a
//! truncated warning event, and re-queues where appropriate. Reserve
//! pods additionally update their reservation's Unschedulable status
//! under bounded retry. Whatever path is taken, `done` is called on the
//! queue exactly once per attempt.

use std::collections::HashSet;
use std::sync::Arc;

use koord_common::config::ReservationArgs;
use koord_common::constants::NOTE_LENGTH_LIMIT;
use koord_common::error::{Result, SchedulerError};
use koord_common::extension;
use koord_common::objects::{Reservation, Uid};
use koord_util::retry::{retry_on, RetryPolicy};

use crate::adapter::{QueuedPodInfo, SchedulerAdapter, SchedulingQueue};
use crate::event_source::EventSource;
use crate::reservation::{
    is_reserve_pod, new_reserve_pod, reservation_level_message,
    reservation_name_of_reserve_pod,
};

pub const EVENT_TYPE_WARNING: &str = "Warning";
pub const REASON_FAILED_SCHEDULING: &str = "FailedScheduling";
/// Separate reason for reservation-level events so the platform does not
/// merge them with the per-node event.
pub const REASON_FAILED_SCHEDULING_RESERVATION: &str = "FailedScheduling-Reservation";

/// Sink for platform events.
pub trait EventRecorder: Send + Sync {
    fn event(&self, object: &str, event_type: &str, reason: &str, message: &str);
}

/// Recorder that writes events to the log only.
pub struct LogEventRecorder;

impl EventRecorder for LogEventRecorder {
    fn event(&self, object: &str, event_type: &str, reason: &str, message: &str) {
        tracing::warn!(object, event_type, reason, message, "event");
    }
}

/// Writes the Unschedulable status of a reservation back to the
/// platform. Conflicts and throttling surface as their error codes and
/// are retried by the caller.
pub trait ReservationStatusClient: Send + Sync {
    fn update_unschedulable(&self, name: &str, message: &str) -> Result<()>;
}

/// Status client that only logs; the durable write is someone else's.
pub struct LogStatusClient;

impl ReservationStatusClient for LogStatusClient {
    fn update_unschedulable(&self, name: &str, message: &str) -> Result<()> {
        tracing::info!(reservation = name, message, "reservation unschedulable");
        Ok(())
    }
}

/// Cap a message at the platform note length, marking the cut.
pub fn truncate_message(message: &str) -> String {
    if message.len() <= NOTE_LENGTH_LIMIT {
        return message.to_string();
    }
    let suffix = " ...";
    let mut cut = NOTE_LENGTH_LIMIT - suffix.len();
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &message[..cut], suffix)
}

/// Calls `done` on drop unless the requeue path already did.
struct DoneGuard<'a> {
    queue: &'a SchedulingQueue,
    uid: Uid,
    armed: bool,
}

impl<'a> DoneGuard<'a> {
    fn new(queue: &'a SchedulingQueue, uid: Uid) -> Self {
        Self {
            queue,
            uid,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.done(&self.uid);
        }
    }
}

pub struct ErrorHandler {
    adapter: Arc<SchedulerAdapter>,
    reservations: Arc<EventSource<Reservation>>,
    client: Arc<dyn ReservationStatusClient>,
    recorder: Arc<dyn EventRecorder>,
    scheduler_names: HashSet<String>,
    retry_policy: RetryPolicy,
}

impl ErrorHandler {
    pub fn new(
        adapter: Arc<SchedulerAdapter>,
        reservations: Arc<EventSource<Reservation>>,
        client: Arc<dyn ReservationStatusClient>,
        recorder: Arc<dyn EventRecorder>,
        scheduler_names: HashSet<String>,
        args: &ReservationArgs,
    ) -> Self {
        Self {
            adapter,
            reservations,
            client,
            recorder,
            scheduler_names,
            retry_policy: RetryPolicy::for_status_updates(args.status_update_retries),
        }
    }

    fn is_responsible(&self, reservation: &Reservation) -> bool {
        let name = if reservation.spec.scheduler_name.is_empty() {
            koord_common::constants::DEFAULT_SCHEDULER_NAME
        } else {
            &reservation.spec.scheduler_name
        };
        self.scheduler_names.contains(name)
    }

    /// Handle one failed scheduling attempt.
    pub async fn handle_scheduling_failure(
        &self,
        pod_info: QueuedPodInfo,
        err: &SchedulerError,
        nominated_node: Option<String>,
    ) {
        let pod = pod_info.pod.clone();

        // A failed attempt invalidates any nominated reservation.
        self.adapter
            .nominator()
            .delete_nominated_reserve_pod_or_reservation(&pod);

        if is_reserve_pod(&pod) {
            self.handle_reserve_pod_failure(pod_info, err, nominated_node)
                .await;
            return;
        }

        // A pod that asked for reservation affinity gets a second event
        // speaking in reservations rather than nodes.
        if extension::has_reservation_affinity(&pod) {
            if let Some(message) = reservation_level_message(&err.message) {
                self.recorder.event(
                    &pod.id(),
                    EVENT_TYPE_WARNING,
                    REASON_FAILED_SCHEDULING_RESERVATION,
                    &truncate_message(&message),
                );
            }
        }

        self.recorder.event(
            &pod.id(),
            EVENT_TYPE_WARNING,
            REASON_FAILED_SCHEDULING,
            &truncate_message(&err.message),
        );

        let cycle = self.adapter.scheduling_cycle();
        if let Err(e) = self.adapter.add_unschedulable_if_not_present(pod_info, cycle) {
            tracing::error!(pod = %pod.id(), error = %e, "failed to requeue pod");
        }
    }

    async fn handle_reserve_pod_failure(
        &self,
        mut pod_info: QueuedPodInfo,
        err: &SchedulerError,
        nominated_node: Option<String>,
    ) {
        let pod = pod_info.pod.clone();
        // `add_unschedulable_if_not_present` calls done internally, but
        // some paths below return before reaching it; the guard keeps
        // the call-count at exactly one either way.
        let mut done_guard = DoneGuard::new(self.adapter.queue(), pod.uid().clone());

        let Some(reservation_name) = reservation_name_of_reserve_pod(&pod) else {
            tracing::error!(pod = %pod.id(), "reserve pod carries no reservation name");
            return;
        };

        if err.is_unschedulable() {
            tracing::info!(
                reservation = %reservation_name,
                error = %err,
                "unable to schedule reservation, no fit, waiting"
            );
        } else {
            tracing::error!(
                reservation = %reservation_name,
                error = %err,
                "error scheduling reservation, retrying"
            );
        }

        // The watch store is the live view of the reservation.
        let Some(cached) = self.reservations.get(&reservation_name) else {
            tracing::info!(
                reservation = %reservation_name,
                "reservation no longer exists, dropping the failure"
            );
            return;
        };

        // The scheduler name can change in flight; never apply failure
        // state to someone else's reservation.
        if !self.is_responsible(&cached) {
            tracing::info!(
                reservation = %reservation_name,
                "reservation belongs to another scheduler, aborting failure handling"
            );
            return;
        }

        if let Some(node) = cached.node_name() {
            // The bind raced the failure; the mirror path takes over.
            tracing::info!(
                reservation = %reservation_name,
                node,
                "reservation already assigned, not requeueing"
            );
        } else {
            pod_info.pod = Arc::new(new_reserve_pod(&cached));
            let cycle = self.adapter.scheduling_cycle();
            match self.adapter.add_unschedulable_if_not_present(pod_info, cycle) {
                Ok(()) => done_guard.disarm(),
                Err(e) => {
                    // The failed insert already consumed the done call.
                    done_guard.disarm();
                    tracing::error!(
                        reservation = %reservation_name,
                        error = %e,
                        "failed to requeue reserve pod"
                    );
                }
            }
        }

        if let Some(node) = nominated_node {
            let reserve_pod = new_reserve_pod(&cached);
            self.adapter
                .nominator()
                .add_nominated_reserve_pod(&reserve_pod, &node);
        }

        self.recorder.event(
            &reservation_name,
            EVENT_TYPE_WARNING,
            REASON_FAILED_SCHEDULING,
            &truncate_message(&err.message),
        );

        self.update_reservation_status(&reservation_name, err).await;
    }

    /// Write the Unschedulable reason with bounded retry on conflict or
    /// throttling.
    async fn update_reservation_status(&self, name: &str, err: &SchedulerError) {
        let message = err.message.clone();
        let result = retry_on(
            &self.retry_policy,
            |e: &SchedulerError| e.is_conflict_or_throttled(),
            || {
                let message = message.clone();
                async move {
                    if self.reservations.get(name).is_none() {
                        // Gone between retries: nothing to update.
                        return Ok(());
                    }
                    self.client.update_unschedulable(name, &message)
                }
            },
        )
        .await;
        if let Err(e) = result {
            tracing::warn!(reservation = name, error = %e, "failed to update reservation status");
        }
    }
}
