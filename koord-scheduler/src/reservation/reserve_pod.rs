// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Synthetic "reserve pods": the in-scheduler materialization of a
//! reservation. The mirror shares the reservation's UID, resources,
//! host ports and node so framework components treat held capacity like
//! any other assigned pod.

use koord_common::constants::DEFAULT_SCHEDULER_NAME;
use koord_common::error::{Result, SchedulerError};
use koord_common::extension::{ANNOTATION_RESERVATION_NAME, ANNOTATION_RESERVE_POD};
use koord_common::objects::{ObjectMeta, Pod, Reservation};

/// Build the synthetic pod mirroring a reservation.
pub fn new_reserve_pod(reservation: &Reservation) -> Pod {
    let mut pod = Pod {
        metadata: ObjectMeta {
            name: reservation.name().to_string(),
            namespace: String::new(),
            uid: reservation.uid().clone(),
            labels: reservation.metadata.labels.clone(),
            annotations: reservation.metadata.annotations.clone(),
            creation_timestamp_ms: reservation.metadata.creation_timestamp_ms,
            resource_version: reservation.metadata.resource_version,
            deletion_timestamp_ms: reservation.metadata.deletion_timestamp_ms,
        },
        ..Default::default()
    };
    pod.metadata
        .annotations
        .insert(ANNOTATION_RESERVE_POD.to_string(), "true".to_string());
    pod.metadata.annotations.insert(
        ANNOTATION_RESERVATION_NAME.to_string(),
        reservation.name().to_string(),
    );
    pod.spec.scheduler_name = if reservation.spec.scheduler_name.is_empty() {
        DEFAULT_SCHEDULER_NAME.to_string()
    } else {
        reservation.spec.scheduler_name.clone()
    };
    pod.spec.resources = reservation.spec.resources.clone();
    pod.spec.host_ports = reservation.spec.host_ports.clone();
    pod.spec.node_name = reservation.node_name().map(|n| n.to_string());
    pod
}

pub fn is_reserve_pod(pod: &Pod) -> bool {
    pod.metadata.annotation(ANNOTATION_RESERVE_POD) == Some("true")
}

/// Name of the reservation behind a reserve pod.
pub fn reservation_name_of_reserve_pod(pod: &Pod) -> Option<String> {
    if !is_reserve_pod(pod) {
        return None;
    }
    pod.metadata
        .annotation(ANNOTATION_RESERVATION_NAME)
        .map(|n| n.to_string())
        .or_else(|| Some(pod.metadata.name.clone()))
}

/// Only structurally valid reservations enter the scheduler cache.
pub fn validate_reservation(reservation: &Reservation) -> Result<()> {
    if reservation.name().is_empty() {
        return Err(SchedulerError::invalid_spec("reservation has no name"));
    }
    if reservation.uid().is_empty() {
        return Err(SchedulerError::invalid_spec(format!(
            "reservation {} has no uid",
            reservation.name()
        )));
    }
    if reservation.spec.owners.is_empty() {
        return Err(SchedulerError::invalid_spec(format!(
            "reservation {} specifies no owners",
            reservation.name()
        )));
    }
    if reservation.spec.resources.is_zero() {
        return Err(SchedulerError::invalid_spec(format!(
            "reservation {} holds no resources",
            reservation.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use koord_common::objects::{ReservationOwner, ReservationPhase};
    use koord_common::resources::ResourceSet;

    fn reservation(name: &str) -> Reservation {
        let mut r = Reservation::default();
        r.metadata.name = name.to_string();
        r.metadata.uid = format!("uid-{name}");
        r.spec.resources = ResourceSet::of(&[("cpu", 2.0)]);
        r.spec.host_ports = vec![8080];
        r.spec.owners = vec![ReservationOwner::default()];
        r
    }

    #[test]
    fn test_reserve_pod_mirrors_reservation() {
        let mut r = reservation("r1");
        r.status.phase = ReservationPhase::Available;
        r.status.node_name = Some("n1".to_string());

        let pod = new_reserve_pod(&r);
        assert!(is_reserve_pod(&pod));
        assert_eq!(pod.uid(), "uid-r1");
        assert_eq!(pod.node_name(), Some("n1"));
        assert_eq!(pod.spec.resources.get("cpu").to_f64(), 2.0);
        assert_eq!(pod.spec.host_ports, vec![8080]);
        assert_eq!(
            reservation_name_of_reserve_pod(&pod).as_deref(),
            Some("r1")
        );
    }

    #[test]
    fn test_normal_pod_is_not_reserve_pod() {
        let pod = Pod::default();
        assert!(!is_reserve_pod(&pod));
        assert!(reservation_name_of_reserve_pod(&pod).is_none());
    }

    #[test]
    fn test_validation() {
        assert!(validate_reservation(&reservation("r1")).is_ok());

        let mut no_owner = reservation("r2");
        no_owner.spec.owners.clear();
        assert!(validate_reservation(&no_owner).is_err());

        let mut no_resources = reservation("r3");
        no_resources.spec.resources = ResourceSet::new();
        assert!(validate_reservation(&no_resources).is_err());

        let mut no_uid = reservation("r4");
        no_uid.metadata.uid = String::new();
        assert!(validate_reservation(&no_uid).is_err());
    }
}
