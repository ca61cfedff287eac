// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Resource vectors: FixedPoint arithmetic and ResourceSet.
//!
//! Quota accounting needs exact arithmetic over fractional quantities
//! (0.5 cpu), signed deltas (tree total adjustments), and deterministic
//! iteration (sibling tie-breaks by name). FixedPoint stores
//! `value * RESOURCE_UNIT_SCALING` as an integer; ResourceSet is a
//! name-ordered map of FixedPoint quantities.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;

use crate::constants::RESOURCE_UNIT_SCALING;

/// Fixed-point representation for fractional resource quantities.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPoint(i64);

impl FixedPoint {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(RESOURCE_UNIT_SCALING as i64);

    /// Create from a double value (multiply by scaling factor).
    pub fn from_f64(value: f64) -> Self {
        Self((value * RESOURCE_UNIT_SCALING as f64).round() as i64)
    }

    /// Create from the raw internal integer representation.
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Convert to double value.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / RESOURCE_UNIT_SCALING as f64
    }

    /// Raw internal representation.
    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Multiply by a scalar factor, rounding to the nearest unit.
    pub fn scale(self, factor: f64) -> Self {
        Self((self.0 as f64 * factor).round() as i64)
    }

    /// `self / other` as a float ratio. Returns 0 when `other` is zero.
    pub fn ratio_of(self, other: Self) -> f64 {
        if other.0 == 0 {
            0.0
        } else {
            self.0 as f64 / other.0 as f64
        }
    }
}

impl std::ops::Add for FixedPoint {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for FixedPoint {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for FixedPoint {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl std::ops::SubAssign for FixedPoint {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl std::ops::Neg for FixedPoint {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Debug for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedPoint({})", self.to_f64())
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

/// A set of named resources with fixed-point quantities.
///
/// Entries may be negative: deltas between totals are first-class values
/// here. Exact zeros are dropped so an empty set means "no resources".
#[derive(Clone, Default, PartialEq)]
pub struct ResourceSet {
    resources: BTreeMap<String, FixedPoint>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a map of resource name → double value, dropping
    /// non-positive entries.
    pub fn from_map(map: HashMap<String, f64>) -> Self {
        Self {
            resources: map
                .into_iter()
                .filter(|(_, v)| *v > 0.0)
                .map(|(k, v)| (k, FixedPoint::from_f64(v)))
                .collect(),
        }
    }

    /// Convenience constructor for literal vectors.
    pub fn of(pairs: &[(&str, f64)]) -> Self {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.set(name.to_string(), FixedPoint::from_f64(*value));
        }
        set
    }

    /// Quantity of a resource (zero if absent).
    pub fn get(&self, resource: &str) -> FixedPoint {
        self.resources
            .get(resource)
            .copied()
            .unwrap_or(FixedPoint::ZERO)
    }

    /// Set the quantity of a resource. An exact zero removes the entry.
    pub fn set(&mut self, resource: String, value: FixedPoint) {
        if value.is_zero() {
            self.resources.remove(&resource);
        } else {
            self.resources.insert(resource, value);
        }
    }

    /// Element-wise add.
    pub fn add(&mut self, other: &ResourceSet) {
        for (name, amount) in &other.resources {
            let value = self.get(name) + *amount;
            self.set(name.clone(), value);
        }
    }

    /// Element-wise signed subtract. Entries may go negative.
    pub fn sub(&mut self, other: &ResourceSet) {
        for (name, amount) in &other.resources {
            let value = self.get(name) - *amount;
            self.set(name.clone(), value);
        }
    }

    /// Element-wise subtract clamped at zero.
    pub fn saturating_sub(&mut self, other: &ResourceSet) {
        for (name, amount) in &other.resources {
            let value = self.get(name) - *amount;
            if value.is_negative() {
                self.resources.remove(name);
            } else {
                self.set(name.clone(), value);
            }
        }
    }

    /// `self - other` as a new signed vector.
    pub fn delta(&self, other: &ResourceSet) -> ResourceSet {
        let mut out = self.clone();
        out.sub(other);
        out
    }

    /// Element-wise minimum over the union of names (absent = zero).
    pub fn min_with(&self, other: &ResourceSet) -> ResourceSet {
        let mut out = ResourceSet::new();
        for name in self.union_names(other) {
            out.set(name.clone(), self.get(&name).min(other.get(&name)));
        }
        out
    }

    /// Element-wise maximum over the union of names (absent = zero).
    pub fn max_with(&self, other: &ResourceSet) -> ResourceSet {
        let mut out = ResourceSet::new();
        for name in self.union_names(other) {
            out.set(name.clone(), self.get(&name).max(other.get(&name)));
        }
        out
    }

    /// Check if this set has at least the resources in `other`.
    pub fn is_superset_of(&self, other: &ResourceSet) -> bool {
        other
            .resources
            .iter()
            .all(|(name, amount)| self.get(name) >= *amount)
    }

    /// True if `self` strictly exceeds `other` on any dimension.
    pub fn exceeds_any(&self, other: &ResourceSet) -> bool {
        self.resources
            .iter()
            .any(|(name, amount)| *amount > other.get(name))
    }

    /// Multiply every quantity by a scalar factor.
    pub fn scale(&self, factor: f64) -> ResourceSet {
        let mut out = ResourceSet::new();
        for (name, amount) in &self.resources {
            out.set(name.clone(), amount.scale(factor));
        }
        out
    }

    /// True if all entries are zero (i.e. the set is empty).
    pub fn is_zero(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterate over (name, quantity) pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FixedPoint)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Resource names of `self ∪ other`, in name order.
    pub fn union_names(&self, other: &ResourceSet) -> Vec<String> {
        let mut names: Vec<String> = self.resources.keys().cloned().collect();
        for name in other.resources.keys() {
            if !self.resources.contains_key(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    /// Convert to a map of resource name → double.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.resources
            .iter()
            .map(|(k, v)| (k.clone(), v.to_f64()))
            .collect()
    }
}

impl fmt::Debug for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.resources.iter().map(|(k, v)| (k, v.to_f64())))
            .finish()
    }
}

impl serde::Serialize for ResourceSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for ResourceSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, f64>::deserialize(deserializer)?;
        let mut set = ResourceSet::new();
        for (name, value) in map {
            set.set(name, FixedPoint::from_f64(value));
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_point_arithmetic() {
        let a = FixedPoint::from_f64(1.5);
        let b = FixedPoint::from_f64(0.5);
        assert_eq!((a + b).to_f64(), 2.0);
        assert_eq!((a - b).to_f64(), 1.0);
        assert_eq!((-b).to_f64(), -0.5);
    }

    #[test]
    fn test_fixed_point_precision() {
        // 0.0001 is the smallest representable unit (1/10000).
        let tiny = FixedPoint::from_f64(0.0001);
        assert_eq!(tiny.raw(), 1);
        assert!(!tiny.is_zero());
    }

    #[test]
    fn test_fixed_point_scale_and_ratio() {
        let v = FixedPoint::from_f64(8.0);
        assert_eq!(v.scale(0.5).to_f64(), 4.0);
        assert_eq!(v.ratio_of(FixedPoint::from_f64(16.0)), 0.5);
        assert_eq!(v.ratio_of(FixedPoint::ZERO), 0.0);
    }

    #[test]
    fn test_resource_set_signed_sub() {
        let mut a = ResourceSet::of(&[("cpu", 2.0)]);
        let b = ResourceSet::of(&[("cpu", 3.0), ("memory", 1.0)]);
        a.sub(&b);
        assert_eq!(a.get("cpu").to_f64(), -1.0);
        assert_eq!(a.get("memory").to_f64(), -1.0);
    }

    #[test]
    fn test_resource_set_saturating_sub() {
        let mut a = ResourceSet::of(&[("cpu", 2.0)]);
        let b = ResourceSet::of(&[("cpu", 3.0)]);
        a.saturating_sub(&b);
        assert!(a.get("cpu").is_zero());
        assert!(a.is_zero());
    }

    #[test]
    fn test_resource_set_superset_and_exceeds() {
        let avail = ResourceSet::of(&[("cpu", 4.0), ("memory", 8.0)]);
        let small = ResourceSet::of(&[("cpu", 2.0)]);
        let big = ResourceSet::of(&[("cpu", 5.0)]);
        assert!(avail.is_superset_of(&small));
        assert!(!avail.is_superset_of(&big));
        assert!(big.exceeds_any(&avail));
        assert!(!small.exceeds_any(&avail));
    }

    #[test]
    fn test_resource_set_min_max_with() {
        let a = ResourceSet::of(&[("cpu", 4.0), ("memory", 2.0)]);
        let b = ResourceSet::of(&[("cpu", 2.0), ("gpu", 1.0)]);
        let min = a.min_with(&b);
        assert_eq!(min.get("cpu").to_f64(), 2.0);
        assert!(min.get("memory").is_zero());
        assert!(min.get("gpu").is_zero());
        let max = a.max_with(&b);
        assert_eq!(max.get("cpu").to_f64(), 4.0);
        assert_eq!(max.get("gpu").to_f64(), 1.0);
    }

    #[test]
    fn test_resource_set_serde_roundtrip() {
        let a = ResourceSet::of(&[("cpu", 1.5), ("memory", 1024.0)]);
        let json = serde_json::to_string(&a).unwrap();
        let back: ResourceSet = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
