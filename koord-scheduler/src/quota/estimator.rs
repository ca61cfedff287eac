// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Pod usage estimation for quota accounting.
//!
//! Declared requests overstate real usage, so quota used/request
//! bookkeeping scales them by per-resource factors. The factor is
//! priority-independent; workloads may override it per pod via
//! annotation when customization is allowed.

use std::collections::HashMap;

use koord_common::constants::{RESOURCE_CPU, RESOURCE_MEMORY};
use koord_common::extension;
use koord_common::objects::Pod;
use koord_common::resources::{FixedPoint, ResourceSet};

/// Default CPU request assumed for pods that declare none (0.25 core).
const DEFAULT_CPU_REQUEST: f64 = 0.25;
/// Default memory request assumed for pods that declare none (200 MiB).
const DEFAULT_MEMORY_REQUEST: f64 = 200.0 * 1024.0 * 1024.0;

/// Estimates the resources a pod will actually consume.
pub trait PodRequestEstimator: Send + Sync {
    fn estimate(&self, pod: &Pod) -> ResourceSet;
}

/// Scaling-factor estimator: `estimated = request * factor / 100`.
pub struct DefaultEstimator {
    /// Resource name → scaling factor in percent.
    scaling_factors: HashMap<String, f64>,
    allow_customize: bool,
}

impl Default for DefaultEstimator {
    fn default() -> Self {
        Self::new(
            HashMap::from([
                (RESOURCE_CPU.to_string(), 85.0),
                (RESOURCE_MEMORY.to_string(), 70.0),
            ]),
            true,
        )
    }
}

impl DefaultEstimator {
    pub fn new(scaling_factors: HashMap<String, f64>, allow_customize: bool) -> Self {
        Self {
            scaling_factors,
            allow_customize,
        }
    }

    fn factors_for(&self, pod: &Pod) -> HashMap<String, f64> {
        let mut factors = if self.allow_customize {
            extension::custom_estimated_scaling_factors(pod).unwrap_or_default()
        } else {
            HashMap::new()
        };
        for (name, factor) in &self.scaling_factors {
            factors.entry(name.clone()).or_insert(*factor);
        }
        factors
    }
}

impl PodRequestEstimator for DefaultEstimator {
    fn estimate(&self, pod: &Pod) -> ResourceSet {
        let factors = self.factors_for(pod);
        let mut estimated = ResourceSet::new();

        for (name, amount) in pod.spec.resources.iter() {
            let factor = factors.get(name).copied().unwrap_or(100.0);
            estimated.set(name.to_string(), amount.scale(factor / 100.0));
        }

        // Requestless pods still occupy something.
        if estimated.get(RESOURCE_CPU).is_zero() {
            estimated.set(
                RESOURCE_CPU.to_string(),
                FixedPoint::from_f64(DEFAULT_CPU_REQUEST),
            );
        }
        if estimated.get(RESOURCE_MEMORY).is_zero() {
            estimated.set(
                RESOURCE_MEMORY.to_string(),
                FixedPoint::from_f64(DEFAULT_MEMORY_REQUEST),
            );
        }
        estimated
    }
}

/// Passthrough estimator: the declared request is the estimate. Used
/// where exact accounting matters more than load prediction.
pub struct RequestAsIsEstimator;

impl PodRequestEstimator for RequestAsIsEstimator {
    fn estimate(&self, pod: &Pod) -> ResourceSet {
        pod.spec.resources.clone()
    }
}
