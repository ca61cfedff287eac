// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Plugin arguments loaded from a single configuration file (YAML or
//! JSON). Every field has a default so an empty file is a valid profile.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::resources::ResourceSet;

/// Arguments for the gang (coscheduling) subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoschedulingArgs {
    /// Default gang wait time in the Permit stage, seconds.
    pub default_timeout_seconds: u64,
    /// Number of event workers for the gang controller.
    pub controller_workers: u32,
}

impl Default for CoschedulingArgs {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 600,
            controller_workers: 1,
        }
    }
}

impl CoschedulingArgs {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }
}

/// Arguments for the elastic-quota subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ElasticQuotaArgs {
    /// Hysteresis before revoking pods of an over-used quota, seconds.
    pub delay_evict_time_seconds: u64,
    /// Interval of the used-vs-runtime revocation scan, seconds.
    pub revoke_pod_interval_seconds: u64,
    /// Max of the implicit default quota group.
    pub default_quota_group_max: ResourceSet,
    /// Max of the implicit system quota group.
    pub system_quota_group_max: ResourceSet,
    /// Namespace of the default/system quota groups.
    pub quota_group_namespace: String,
    /// Whether the revocation loop runs at all.
    pub monitor_all_quotas: bool,
    /// Also check every ancestor quota during revocation.
    pub enable_check_parent_quota: bool,
    /// If false, max is used instead of runtime for all checks.
    pub enable_runtime_quota: bool,
    /// Scale mins proportionally when their sum exceeds the total.
    pub enable_min_quota_scale: bool,
    /// Never revoke pods of the default quota group.
    pub disable_default_quota_preemption: bool,
}

impl Default for ElasticQuotaArgs {
    fn default() -> Self {
        Self {
            delay_evict_time_seconds: 300,
            revoke_pod_interval_seconds: 60,
            default_quota_group_max: ResourceSet::new(),
            system_quota_group_max: ResourceSet::new(),
            quota_group_namespace: "koordinator-system".to_string(),
            monitor_all_quotas: true,
            enable_check_parent_quota: false,
            enable_runtime_quota: true,
            enable_min_quota_scale: false,
            disable_default_quota_preemption: false,
        }
    }
}

impl ElasticQuotaArgs {
    pub fn delay_evict_time(&self) -> Duration {
        Duration::from_secs(self.delay_evict_time_seconds)
    }

    pub fn revoke_pod_interval(&self) -> Duration {
        Duration::from_secs(self.revoke_pod_interval_seconds)
    }
}

/// Arguments for the reservation subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReservationArgs {
    pub enable_preemption: bool,
    /// Minimum preemption candidates as a percentage of cluster size.
    pub min_candidate_nodes_percentage: u32,
    /// Absolute minimum number of preemption candidates.
    pub min_candidate_nodes_absolute: u32,
    /// Number of event workers for the reservation controller.
    pub controller_workers: u32,
    /// Expired/succeeded reservations are garbage collected after this.
    pub gc_duration_seconds: u64,
    /// Attempts for a reservation status write hitting a conflict or
    /// throttling before the failure is surfaced.
    pub status_update_retries: u32,
}

impl Default for ReservationArgs {
    fn default() -> Self {
        Self {
            enable_preemption: false,
            min_candidate_nodes_percentage: 10,
            min_candidate_nodes_absolute: 100,
            controller_workers: 1,
            gc_duration_seconds: 86400,
            status_update_retries: 5,
        }
    }
}

/// The scheduler profile: one section per plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub scheduler_name: Option<String>,
    pub coscheduling: CoschedulingArgs,
    pub elastic_quota: ElasticQuotaArgs,
    pub reservation: ReservationArgs,
}

impl SchedulerConfig {
    /// Load from a YAML or JSON file, decided by extension (`.json` is
    /// JSON, everything else parses as YAML, which is a JSON superset).
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::invalid_spec(format!("cannot read config {}: {e}", path.display()))
        })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&raw).map_err(|e| {
                SchedulerError::invalid_spec(format!("invalid config {}: {e}", path.display()))
            })
        } else {
            serde_yaml::from_str(&raw).map_err(|e| {
                SchedulerError::invalid_spec(format!("invalid config {}: {e}", path.display()))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.coscheduling.default_timeout_seconds, 600);
        assert_eq!(config.elastic_quota.revoke_pod_interval_seconds, 60);
        assert!(config.elastic_quota.monitor_all_quotas);
        assert!(config.elastic_quota.enable_runtime_quota);
        assert_eq!(config.reservation.gc_duration_seconds, 86400);
        assert_eq!(config.reservation.status_update_retries, 5);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
coscheduling:
  defaultTimeoutSeconds: 300
elasticQuota:
  enableMinQuotaScale: true
  defaultQuotaGroupMax:
    cpu: 64
    memory: 262144
"#;
        let config: SchedulerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.coscheduling.default_timeout_seconds, 300);
        assert!(config.elastic_quota.enable_min_quota_scale);
        assert_eq!(
            config
                .elastic_quota
                .default_quota_group_max
                .get("cpu")
                .to_f64(),
            64.0
        );
        // Untouched sections keep defaults.
        assert_eq!(config.reservation.min_candidate_nodes_percentage, 10);
    }

    #[test]
    fn test_json_profile() {
        let json = r#"{"schedulerName": "koord-scheduler", "reservation": {"enablePreemption": true}}"#;
        let config: SchedulerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.scheduler_name.as_deref(), Some("koord-scheduler"));
        assert!(config.reservation.enable_preemption);
    }
}
