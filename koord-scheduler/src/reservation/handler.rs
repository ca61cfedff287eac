// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Reservation event handling.
//!
//! An Available reservation with a node lives in the scheduler cache as
//! a synthetic reserve pod; a Pending one is scheduled like a pod
//! through the queue. The node binding of an Available reservation is
//! immutable; an attempted change is cache corruption and is rejected.

use std::collections::HashSet;
use std::sync::Arc;

use koord_common::constants::DEFAULT_SCHEDULER_NAME;
use koord_common::objects::Reservation;
use koord_util::counter::ErrorCounter;

use super::cache::ReservationCache;
use super::reserve_pod::{new_reserve_pod, validate_reservation};
use crate::adapter::SchedulerAdapter;
use crate::event_source::EventHandler;

pub struct ReservationHandler {
    adapter: Arc<SchedulerAdapter>,
    cache: Arc<ReservationCache>,
    /// Scheduler profiles this process is responsible for.
    scheduler_names: HashSet<String>,
    errors: Arc<ErrorCounter>,
}

impl ReservationHandler {
    pub fn new(
        adapter: Arc<SchedulerAdapter>,
        cache: Arc<ReservationCache>,
        scheduler_names: HashSet<String>,
        errors: Arc<ErrorCounter>,
    ) -> Self {
        Self {
            adapter,
            cache,
            scheduler_names,
            errors,
        }
    }

    pub fn is_responsible(&self, reservation: &Reservation) -> bool {
        let name = if reservation.spec.scheduler_name.is_empty() {
            DEFAULT_SCHEDULER_NAME
        } else {
            &reservation.spec.scheduler_name
        };
        self.scheduler_names.contains(name)
    }

    fn is_scheduled(reservation: &Reservation) -> bool {
        reservation.node_name().is_some()
    }

    // ─── Scheduled path: mirror into the pod cache ─────────────────────

    fn add_to_scheduler_cache(&self, reservation: &Arc<Reservation>) {
        if !reservation.is_available() || !Self::is_scheduled(reservation) {
            return;
        }
        if let Err(e) = validate_reservation(reservation) {
            self.errors.incr("reservation_spec");
            tracing::error!(
                reservation = %reservation.name(),
                error = %e,
                "not adding invalid reservation to the scheduler cache"
            );
            return;
        }
        tracing::debug!(
            reservation = %reservation.name(),
            uid = %reservation.uid(),
            node = ?reservation.node_name(),
            "adding reservation to the scheduler cache"
        );

        self.cache.update_reservation(reservation.clone());
        let reserve_pod = Arc::new(new_reserve_pod(reservation));
        if let Err(e) = self.adapter.cache().add_pod(reserve_pod.clone()) {
            tracing::error!(
                reservation = %reservation.name(),
                error = %e,
                "failed to add reserve pod to the scheduler cache"
            );
            return;
        }
        // Wake pods that may fit onto the reserved capacity.
        self.adapter.queue().assigned_pod_added(&reserve_pod);
    }

    fn update_in_scheduler_cache(&self, old: &Arc<Reservation>, new: &Arc<Reservation>) {
        if !Self::is_scheduled(new) {
            return;
        }

        // A delete followed by an immediate add of the same name can be
        // merged into one update; UID decides.
        if old.uid() != new.uid() {
            self.delete_from_scheduler_cache(old);
            self.add_to_scheduler_cache(new);
            return;
        }

        // Pending → Available. The reserve pod no longer schedules
        // through the queue; it becomes a cache mirror instead.
        if !old.is_available() && new.is_available() {
            self.adapter.queue().delete(&new_reserve_pod(old));
            self.add_to_scheduler_cache(new);
            return;
        }

        // Available → Succeeded/Failed.
        if old.is_available() && !new.is_available() {
            self.delete_from_scheduler_cache(new);
            return;
        }

        if !new.is_available() {
            return;
        }

        // Node binding is immutable once allocated; a change would
        // corrupt the cache.
        if old.node_name() != new.node_name() {
            self.errors.incr("reservation_node_mutation");
            tracing::error!(
                reservation = %new.name(),
                old_node = ?old.node_name(),
                new_node = ?new.node_name(),
                "rejecting node change of an allocated reservation"
            );
            return;
        }

        if let Err(e) = validate_reservation(new) {
            self.errors.incr("reservation_spec");
            tracing::error!(
                reservation = %new.name(),
                error = %e,
                "not updating invalid reservation in the scheduler cache"
            );
            return;
        }

        self.cache.update_reservation(new.clone());
        let old_mirror = Arc::new(new_reserve_pod(old));
        let new_mirror = Arc::new(new_reserve_pod(new));
        if let Err(e) = self.adapter.cache().update_pod(&old_mirror, new_mirror.clone()) {
            tracing::error!(
                reservation = %new.name(),
                error = %e,
                "failed to update reserve pod in the scheduler cache"
            );
            return;
        }
        self.adapter.queue().assigned_pod_added(&new_mirror);
    }

    fn delete_from_scheduler_cache(&self, reservation: &Arc<Reservation>) {
        if !Self::is_scheduled(reservation) {
            return;
        }
        let Some(info) = self.cache.delete_reservation(reservation) else {
            tracing::warn!(
                reservation = %reservation.name(),
                "reservation missing from the reservation cache on delete"
            );
            return;
        };

        let mut reserve_pod = new_reserve_pod(reservation);
        if self.adapter.cache().get_pod(reservation.uid()).is_some() {
            // Release allocated host ports back onto the mirror before
            // removal so the cache never leaks them across the delete.
            if !info.allocated_ports.is_empty() {
                let old = Arc::new(reserve_pod.clone());
                reserve_pod
                    .spec
                    .host_ports
                    .retain(|p| !info.allocated_ports.contains(p));
                if let Err(e) = self
                    .adapter
                    .cache()
                    .update_pod(&old, Arc::new(reserve_pod.clone()))
                {
                    tracing::error!(
                        reservation = %reservation.name(),
                        error = %e,
                        "failed to refresh reserve pod while releasing ports"
                    );
                }
            }

            if let Err(e) = self.adapter.cache().remove_pod(&reserve_pod) {
                tracing::error!(
                    reservation = %reservation.name(),
                    error = %e,
                    "failed to remove reserve pod from the scheduler cache"
                );
            } else {
                tracing::debug!(
                    reservation = %reservation.name(),
                    "removed reservation from the scheduler cache"
                );
            }

            self.adapter
                .queue()
                .move_all_to_active_or_backoff(crate::adapter::ASSIGNED_POD_DELETE);
        }
    }

    // ─── Unscheduled path: drive through the scheduling queue ──────────

    fn add_to_scheduling_queue(&self, reservation: &Arc<Reservation>) {
        tracing::debug!(reservation = %reservation.name(), "queueing unscheduled reservation");
        self.adapter
            .queue()
            .add(Arc::new(new_reserve_pod(reservation)));
    }

    fn update_in_scheduling_queue(&self, old: &Arc<Reservation>, new: &Arc<Reservation>) {
        // Identical object versions carry no new information.
        if old.metadata.resource_version == new.metadata.resource_version {
            return;
        }
        let new_mirror = Arc::new(new_reserve_pod(new));
        if self.adapter.cache().is_assumed_pod(new_mirror.uid()) {
            return;
        }
        let old_mirror = Arc::new(new_reserve_pod(old));
        self.adapter.queue().update(&old_mirror, new_mirror);
    }

    fn delete_from_scheduling_queue(&self, reservation: &Arc<Reservation>) {
        tracing::debug!(reservation = %reservation.name(), "dropping unscheduled reservation");
        let reserve_pod = new_reserve_pod(reservation);
        self.adapter.queue().delete(&reserve_pod);
        self.adapter
            .reject_waiting_pod(reserve_pod.uid(), "reservation deleted");
    }

    fn is_queue_candidate(&self, reservation: &Reservation) -> bool {
        self.is_responsible(reservation)
            && !reservation.is_available()
            && !reservation.is_terminal()
    }
}

impl EventHandler<Reservation> for ReservationHandler {
    fn on_add(&self, reservation: &Arc<Reservation>) {
        if reservation.is_available() {
            self.add_to_scheduler_cache(reservation);
        } else if self.is_queue_candidate(reservation) {
            self.add_to_scheduling_queue(reservation);
        }
    }

    fn on_update(&self, old: &Arc<Reservation>, new: &Arc<Reservation>) {
        if Self::is_scheduled(new) || Self::is_scheduled(old) {
            self.update_in_scheduler_cache(old, new);
            return;
        }
        if self.is_queue_candidate(new) {
            self.update_in_scheduling_queue(old, new);
        } else if new.is_terminal() {
            self.delete_from_scheduling_queue(new);
        }
    }

    fn on_delete(&self, reservation: &Arc<Reservation>) {
        if Self::is_scheduled(reservation) {
            self.delete_from_scheduler_cache(reservation);
        } else {
            self.delete_from_scheduling_queue(reservation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koord_common::objects::{ReservationOwner, ReservationPhase};
    use koord_common::resources::ResourceSet;

    fn handler() -> (Arc<SchedulerAdapter>, Arc<ReservationCache>, ReservationHandler) {
        let adapter = Arc::new(SchedulerAdapter::new());
        let cache = Arc::new(ReservationCache::new());
        let handler = ReservationHandler::new(
            adapter.clone(),
            cache.clone(),
            HashSet::from([DEFAULT_SCHEDULER_NAME.to_string()]),
            Arc::new(ErrorCounter::new()),
        );
        (adapter, cache, handler)
    }

    fn reservation(name: &str, phase: ReservationPhase, node: Option<&str>) -> Arc<Reservation> {
        let mut r = Reservation::default();
        r.metadata.name = name.to_string();
        r.metadata.uid = format!("uid-{name}");
        r.metadata.resource_version = 1;
        r.spec.resources = ResourceSet::of(&[("cpu", 2.0)]);
        r.spec.host_ports = vec![8080, 8081];
        r.spec.owners = vec![ReservationOwner::default()];
        r.status.phase = phase;
        r.status.node_name = node.map(|n| n.to_string());
        Arc::new(r)
    }

    fn park_unschedulable_pod(adapter: &Arc<SchedulerAdapter>, name: &str) {
        let mut pod = koord_common::objects::Pod::default();
        pod.metadata.name = name.to_string();
        pod.metadata.namespace = "ns".to_string();
        pod.metadata.uid = format!("uid-{name}");
        adapter.queue().add(Arc::new(pod));
        let info = adapter.queue().pop().unwrap();
        let cycle = adapter.queue().scheduling_cycle();
        adapter
            .queue()
            .add_unschedulable_if_not_present(info, cycle)
            .unwrap();
    }

    #[test]
    fn test_reservation_lifecycle_scenario() {
        // Pending → Available(node): mirror appears, dependents wake.
        // Available → Failed: mirror removed, unschedulable pods move.
        let (adapter, cache, handler) = handler();

        let pending = reservation("r1", ReservationPhase::Pending, None);
        handler.on_add(&pending);
        // Pending reservations schedule through the queue.
        assert_eq!(adapter.queue().num_active(), 1);
        assert!(adapter.cache().get_pod(pending.uid()).is_none());

        park_unschedulable_pod(&adapter, "waiter");
        assert_eq!(adapter.queue().num_unschedulable(), 1);

        let mut available = (*reservation("r1", ReservationPhase::Available, Some("n1"))).clone();
        available.metadata.resource_version = 2;
        let available = Arc::new(available);
        handler.on_update(&pending, &available);

        // The synthetic pod is in the cache on n1.
        let mirror = adapter.cache().get_pod(available.uid()).unwrap();
        assert_eq!(mirror.node_name(), Some("n1"));
        assert_eq!(cache.len(), 1);
        // The assigned-pod event moved the waiter back to active.
        assert_eq!(adapter.queue().num_unschedulable(), 0);

        park_unschedulable_pod(&adapter, "waiter-2");
        let mut failed = (*reservation("r1", ReservationPhase::Failed, Some("n1"))).clone();
        failed.metadata.resource_version = 3;
        let failed = Arc::new(failed);
        handler.on_update(&available, &failed);

        assert!(adapter.cache().get_pod(failed.uid()).is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(adapter.queue().num_unschedulable(), 0);
    }

    #[test]
    fn test_node_change_is_rejected() {
        let (adapter, _, handler) = handler();
        let r1 = reservation("r1", ReservationPhase::Available, Some("n1"));
        handler.on_add(&r1);

        let mut moved = (*reservation("r1", ReservationPhase::Available, Some("n2"))).clone();
        moved.metadata.resource_version = 2;
        let moved = Arc::new(moved);
        handler.on_update(&r1, &moved);

        // The cache still carries the original node.
        let mirror = adapter.cache().get_pod(r1.uid()).unwrap();
        assert_eq!(mirror.node_name(), Some("n1"));
    }

    #[test]
    fn test_uid_swap_is_delete_then_add() {
        let (adapter, cache, handler) = handler();
        let old = reservation("r1", ReservationPhase::Available, Some("n1"));
        handler.on_add(&old);
        cache.add_allocation(old.uid(), &ResourceSet::of(&[("cpu", 1.0)]), &[8080]);

        let mut replacement = Reservation::default();
        replacement.metadata.name = "r1".to_string();
        replacement.metadata.uid = "uid-r1-new".to_string();
        replacement.metadata.resource_version = 9;
        replacement.spec.resources = ResourceSet::of(&[("cpu", 2.0)]);
        replacement.spec.host_ports = vec![8080, 8081];
        replacement.spec.owners = vec![ReservationOwner::default()];
        replacement.status.phase = ReservationPhase::Available;
        replacement.status.node_name = Some("n1".to_string());
        let replacement = Arc::new(replacement);
        handler.on_update(&old, &replacement);

        // Old mirror gone, new mirror present with its full port set:
        // no ports leak across the swap.
        assert!(adapter.cache().get_pod(old.uid()).is_none());
        let mirror = adapter.cache().get_pod(replacement.uid()).unwrap();
        assert_eq!(mirror.spec.host_ports, vec![8080, 8081]);
        assert!(cache.get(old.uid()).is_none());
        assert!(cache.get(replacement.uid()).is_some());
    }

    #[test]
    fn test_invalid_reservation_is_not_cached() {
        let (adapter, _, handler) = handler();
        let mut invalid = (*reservation("r1", ReservationPhase::Available, Some("n1"))).clone();
        invalid.spec.owners.clear();
        handler.on_add(&Arc::new(invalid));
        assert!(adapter.cache().is_empty());
    }

    #[test]
    fn test_irresponsible_reservation_is_not_queued() {
        let (adapter, _, handler) = handler();
        let mut foreign = (*reservation("r1", ReservationPhase::Pending, None)).clone();
        foreign.spec.scheduler_name = "someone-else".to_string();
        handler.on_add(&Arc::new(foreign));
        assert_eq!(adapter.queue().num_active(), 0);
    }

    #[test]
    fn test_unscheduled_delete_rejects_waiting_pod() {
        let (adapter, _, handler) = handler();
        let pending = reservation("r1", ReservationPhase::Pending, None);
        handler.on_add(&pending);
        handler.on_delete(&pending);
        assert_eq!(adapter.queue().num_active(), 0);
    }
}
