// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Runtime-quota distribution among sibling quotas.
//!
//! Per resource dimension, every sibling first receives its min
//! (proportionally scaled down when the mins alone exceed the parent's
//! runtime and scaling is enabled). The parent's remaining capacity is
//! then lent to siblings with unmet demand, proportionally to their
//! deficit `min(request, max) − runtime`, with a name-ordered pass
//! absorbing integer rounding residue. The result always satisfies
//! `min ≤ runtime ≤ max` (modulo min scaling).

use koord_common::resources::{FixedPoint, ResourceSet};

/// One sibling's inputs for a single resource dimension.
#[derive(Debug, Clone)]
pub struct QuotaShare {
    pub min: FixedPoint,
    pub max: FixedPoint,
    pub request: FixedPoint,
}

/// Scale mins so that their sum fits `total`, preserving proportions.
/// Integer floor division guarantees the scaled sum never exceeds
/// `total`.
pub fn scaled_mins(mins: &[FixedPoint], total: FixedPoint) -> Vec<FixedPoint> {
    let sum: i128 = mins.iter().map(|m| m.raw() as i128).sum();
    if sum <= total.raw() as i128 || sum == 0 {
        return mins.to_vec();
    }
    mins.iter()
        .map(|m| {
            let scaled = (m.raw() as i128) * (total.raw() as i128) / sum;
            FixedPoint::from_raw(scaled as i64)
        })
        .collect()
}

/// Distribute `total` among siblings for one resource dimension.
/// `shares` must be ordered by quota name; rounding residue is granted
/// in that order. Returns one runtime value per share.
pub fn distribute(total: FixedPoint, shares: &[QuotaShare], scale_mins: bool) -> Vec<FixedPoint> {
    if shares.is_empty() {
        return Vec::new();
    }

    let mins: Vec<FixedPoint> = shares.iter().map(|s| s.min).collect();
    let mins = if scale_mins {
        scaled_mins(&mins, total)
    } else {
        mins
    };

    // Every sibling keeps its (possibly scaled) min.
    let mut runtimes = mins.clone();
    let granted: i128 = runtimes.iter().map(|r| r.raw() as i128).sum();
    let mut remaining = (total.raw() as i128) - granted;
    if remaining <= 0 {
        return runtimes;
    }

    // Unmet demand beyond min, bounded by max.
    let deficits: Vec<i128> = shares
        .iter()
        .zip(&mins)
        .map(|(share, min)| {
            let target = share.request.min(share.max).max(*min);
            (target.raw() as i128 - min.raw() as i128).max(0)
        })
        .collect();
    let total_deficit: i128 = deficits.iter().sum();
    if total_deficit == 0 {
        return runtimes;
    }

    if remaining >= total_deficit {
        // Everyone gets what they asked for; slack stays with the parent.
        for (runtime, deficit) in runtimes.iter_mut().zip(&deficits) {
            *runtime = FixedPoint::from_raw((runtime.raw() as i128 + deficit) as i64);
        }
        return runtimes;
    }

    // Proportional grant, floor-rounded.
    let budget = remaining;
    let mut grants: Vec<i128> = deficits
        .iter()
        .map(|deficit| deficit * budget / total_deficit)
        .collect();
    remaining -= grants.iter().sum::<i128>();

    // Hand the rounding residue out in name order.
    for (grant, deficit) in grants.iter_mut().zip(&deficits) {
        if remaining == 0 {
            break;
        }
        let headroom = deficit - *grant;
        let extra = headroom.min(remaining);
        *grant += extra;
        remaining -= extra;
    }

    for (runtime, grant) in runtimes.iter_mut().zip(&grants) {
        *runtime = FixedPoint::from_raw((runtime.raw() as i128 + grant) as i64);
    }
    runtimes
}

/// Multi-dimension wrapper: distribute each resource present in the
/// parent's runtime or any child's min/max/request.
pub fn distribute_resources(
    parent_runtime: &ResourceSet,
    children: &[(ResourceSet, ResourceSet, ResourceSet)], // (min, max, request), name-ordered
    scale_mins: bool,
) -> Vec<ResourceSet> {
    let mut names: Vec<String> = parent_runtime.iter().map(|(n, _)| n.to_string()).collect();
    for (min, max, request) in children {
        for set in [min, max, request] {
            for (name, _) in set.iter() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names.sort();

    let mut out = vec![ResourceSet::new(); children.len()];
    for name in &names {
        let shares: Vec<QuotaShare> = children
            .iter()
            .map(|(min, max, request)| QuotaShare {
                min: min.get(name),
                max: max.get(name),
                request: request.get(name),
            })
            .collect();
        let runtimes = distribute(parent_runtime.get(name), &shares, scale_mins);
        for (set, runtime) in out.iter_mut().zip(runtimes) {
            set.set(name.clone(), runtime);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(min: f64, max: f64, request: f64) -> QuotaShare {
        QuotaShare {
            min: FixedPoint::from_f64(min),
            max: FixedPoint::from_f64(max),
            request: FixedPoint::from_f64(request),
        }
    }

    fn f(v: f64) -> FixedPoint {
        FixedPoint::from_f64(v)
    }

    #[test]
    fn test_borrowing_between_siblings() {
        // Parent has 10 cpu. A(min=2,max=8,req=8) borrows B's slack,
        // B(min=2,max=8,req=0) keeps its min.
        let runtimes = distribute(f(10.0), &[share(2.0, 8.0, 8.0), share(2.0, 8.0, 0.0)], false);
        assert_eq!(runtimes[0], f(8.0));
        assert_eq!(runtimes[1], f(2.0));
    }

    #[test]
    fn test_runtime_clamped_by_max() {
        let runtimes = distribute(f(20.0), &[share(2.0, 8.0, 16.0), share(2.0, 8.0, 0.0)], false);
        assert_eq!(runtimes[0], f(8.0));
        assert_eq!(runtimes[1], f(2.0));
    }

    #[test]
    fn test_min_preserved_without_request() {
        let runtimes = distribute(f(10.0), &[share(4.0, 8.0, 0.0), share(4.0, 8.0, 0.0)], false);
        assert_eq!(runtimes[0], f(4.0));
        assert_eq!(runtimes[1], f(4.0));
    }

    #[test]
    fn test_proportional_split_of_scarce_capacity() {
        // 6 spare after mins; deficits are 6 and 3, so grants are 4 and 2.
        let runtimes = distribute(
            f(10.0),
            &[share(2.0, 10.0, 8.0), share(2.0, 10.0, 5.0)],
            false,
        );
        assert_eq!(runtimes[0], f(6.0));
        assert_eq!(runtimes[1], f(4.0));
        // Nothing was over- or under-distributed.
        assert_eq!(runtimes[0] + runtimes[1], f(10.0));
    }

    #[test]
    fn test_min_scaling() {
        // Mins sum to 8 with only 4 available: scaled proportionally.
        let runtimes = distribute(
            f(4.0),
            &[share(6.0, 10.0, 0.0), share(2.0, 10.0, 0.0)],
            true,
        );
        assert_eq!(runtimes[0], f(3.0));
        assert_eq!(runtimes[1], f(1.0));
        assert!(runtimes[0] + runtimes[1] <= f(4.0));
    }

    #[test]
    fn test_mins_exceed_total_without_scaling() {
        // Without scaling, mins are honored even past the total.
        let runtimes = distribute(
            f(4.0),
            &[share(6.0, 10.0, 0.0), share(2.0, 10.0, 0.0)],
            false,
        );
        assert_eq!(runtimes[0], f(6.0));
        assert_eq!(runtimes[1], f(2.0));
    }

    #[test]
    fn test_scaled_mins_sum_never_exceeds_total() {
        let mins = vec![f(3.0), f(3.0), f(1.0)];
        let scaled = scaled_mins(&mins, f(5.0));
        let sum: i64 = scaled.iter().map(|m| m.raw()).sum();
        assert!(sum <= f(5.0).raw());
        // Proportionality: the equal mins stay equal.
        assert_eq!(scaled[0], scaled[1]);
        assert!(scaled[2] < scaled[0]);
    }

    #[test]
    fn test_rounding_residue_goes_to_first_by_name() {
        // 1 unit of spare split across three equal deficits cannot be
        // proportional; the name-ordered mop-up decides.
        let spare = FixedPoint::from_raw(f(1.0).raw() + 1);
        let total = FixedPoint::from_raw(spare.raw() + 3 * f(1.0).raw());
        let shares = vec![
            share(1.0, 10.0, 10.0),
            share(1.0, 10.0, 10.0),
            share(1.0, 10.0, 10.0),
        ];
        let runtimes = distribute(total, &shares, false);
        let granted: i64 = runtimes.iter().map(|r| r.raw()).sum();
        assert_eq!(granted, total.raw());
        assert!(runtimes[0] >= runtimes[1]);
        assert!(runtimes[1] >= runtimes[2]);
    }

    #[test]
    fn test_distribute_resources_multi_dimension() {
        let parent = ResourceSet::of(&[("cpu", 10.0), ("memory", 100.0)]);
        let children = vec![
            (
                ResourceSet::of(&[("cpu", 2.0), ("memory", 10.0)]),
                ResourceSet::of(&[("cpu", 8.0), ("memory", 80.0)]),
                ResourceSet::of(&[("cpu", 8.0), ("memory", 20.0)]),
            ),
            (
                ResourceSet::of(&[("cpu", 2.0), ("memory", 10.0)]),
                ResourceSet::of(&[("cpu", 8.0), ("memory", 80.0)]),
                ResourceSet::of(&[("cpu", 0.0)]),
            ),
        ];
        let runtimes = distribute_resources(&parent, &children, false);
        assert_eq!(runtimes[0].get("cpu"), f(8.0));
        assert_eq!(runtimes[0].get("memory"), f(20.0));
        assert_eq!(runtimes[1].get("cpu"), f(2.0));
        assert_eq!(runtimes[1].get("memory"), f(10.0));
    }
}
