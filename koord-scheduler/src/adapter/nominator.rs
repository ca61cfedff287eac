// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The reservation nominator remembers a per-pod preferred node carried
//! over from preemption or reservation decisions across cycles.

use std::collections::HashMap;

use koord_common::objects::Pod;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct Nomination {
    pub node_name: String,
    pub reservation_name: Option<String>,
}

#[derive(Default)]
pub struct ReservationNominator {
    nominations: RwLock<HashMap<String, Nomination>>,
}

impl ReservationNominator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_nominated_reserve_pod(&self, pod: &Pod, node_name: &str) {
        if node_name.is_empty() {
            return;
        }
        self.nominations.write().insert(
            pod.id(),
            Nomination {
                node_name: node_name.to_string(),
                reservation_name: crate::reservation::reservation_name_of_reserve_pod(pod),
            },
        );
    }

    pub fn nominated_node_for(&self, pod: &Pod) -> Option<Nomination> {
        self.nominations.read().get(&pod.id()).cloned()
    }

    pub fn delete_nominated_reserve_pod_or_reservation(&self, pod: &Pod) {
        self.nominations.write().remove(&pod.id());
    }

    pub fn len(&self) -> usize {
        self.nominations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nominations.read().is_empty()
    }
}
