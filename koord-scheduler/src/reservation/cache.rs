// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The reservation cache: per-UID reservation state shared between the
//! reservation plugin and the framework. A sharded map serializes
//! mutations per reservation UID; a delete-then-add with the same name
//! but a different UID is two independent entries.

use std::sync::Arc;

use dashmap::DashMap;
use koord_common::objects::{Reservation, Uid};
use koord_common::resources::ResourceSet;

/// Cached state of one reservation.
#[derive(Debug, Clone)]
pub struct ReservationInfo {
    pub reservation: Arc<Reservation>,
    /// Resources currently allocated out of the reservation.
    pub allocated: ResourceSet,
    /// Host ports currently allocated out of the reservation.
    pub allocated_ports: Vec<u32>,
}

#[derive(Default)]
pub struct ReservationCache {
    reservations: DashMap<Uid, ReservationInfo>,
}

impl ReservationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the reservation object, keeping any allocation state.
    pub fn update_reservation(&self, reservation: Arc<Reservation>) {
        self.reservations
            .entry(reservation.uid().clone())
            .and_modify(|info| info.reservation = reservation.clone())
            .or_insert_with(|| ReservationInfo {
                reservation,
                allocated: ResourceSet::new(),
                allocated_ports: Vec::new(),
            });
    }

    /// Record an allocation made out of the reservation by an owner pod.
    pub fn add_allocation(&self, uid: &Uid, resources: &ResourceSet, ports: &[u32]) {
        if let Some(mut info) = self.reservations.get_mut(uid) {
            info.allocated.add(resources);
            for port in ports {
                if !info.allocated_ports.contains(port) {
                    info.allocated_ports.push(*port);
                }
            }
        }
    }

    /// Release an allocation (owner pod gone).
    pub fn remove_allocation(&self, uid: &Uid, resources: &ResourceSet, ports: &[u32]) {
        if let Some(mut info) = self.reservations.get_mut(uid) {
            info.allocated.saturating_sub(resources);
            info.allocated_ports.retain(|p| !ports.contains(p));
        }
    }

    /// Drop the reservation, returning its final state.
    pub fn delete_reservation(&self, reservation: &Reservation) -> Option<ReservationInfo> {
        self.reservations
            .remove(reservation.uid())
            .map(|(_, info)| info)
    }

    pub fn get(&self, uid: &Uid) -> Option<ReservationInfo> {
        self.reservations.get(uid).map(|info| info.clone())
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(name: &str, uid: &str) -> Arc<Reservation> {
        let mut r = Reservation::default();
        r.metadata.name = name.to_string();
        r.metadata.uid = uid.to_string();
        Arc::new(r)
    }

    #[test]
    fn test_update_keeps_allocations() {
        let cache = ReservationCache::new();
        let r = reservation("r1", "uid-1");
        cache.update_reservation(r.clone());
        cache.add_allocation(
            &"uid-1".to_string(),
            &ResourceSet::of(&[("cpu", 1.0)]),
            &[8080],
        );

        // The object refreshes, the allocation survives.
        cache.update_reservation(r);
        let info = cache.get(&"uid-1".to_string()).unwrap();
        assert_eq!(info.allocated.get("cpu").to_f64(), 1.0);
        assert_eq!(info.allocated_ports, vec![8080]);
    }

    #[test]
    fn test_same_name_different_uid_are_independent() {
        let cache = ReservationCache::new();
        cache.update_reservation(reservation("r1", "uid-1"));
        cache.update_reservation(reservation("r1", "uid-2"));
        assert_eq!(cache.len(), 2);

        let removed = cache
            .delete_reservation(&reservation("r1", "uid-1"))
            .unwrap();
        assert_eq!(removed.reservation.uid(), "uid-1");
        assert!(cache.get(&"uid-2".to_string()).is_some());
    }

    #[test]
    fn test_remove_allocation() {
        let cache = ReservationCache::new();
        cache.update_reservation(reservation("r1", "uid-1"));
        let uid = "uid-1".to_string();
        cache.add_allocation(&uid, &ResourceSet::of(&[("cpu", 2.0)]), &[80, 443]);
        cache.remove_allocation(&uid, &ResourceSet::of(&[("cpu", 1.0)]), &[80]);

        let info = cache.get(&uid).unwrap();
        assert_eq!(info.allocated.get("cpu").to_f64(), 1.0);
        assert_eq!(info.allocated_ports, vec![443]);
    }
}
