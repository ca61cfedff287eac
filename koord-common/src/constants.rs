// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Scheduler-wide constants.

/// Precision of fractional resource quantities (1/10000).
pub const RESOURCE_UNIT_SCALING: i32 = 10000;

/// Default scheduler profile name.
pub const DEFAULT_SCHEDULER_NAME: &str = "koord-scheduler";

/// Name of the implicit default quota group in every quota tree.
pub const DEFAULT_QUOTA_NAME: &str = "koordinator-default-quota";

/// Name of the implicit system quota group in every quota tree.
pub const SYSTEM_QUOTA_NAME: &str = "koordinator-system-quota";

/// Name of the per-tree pseudo root quota.
pub const ROOT_QUOTA_NAME: &str = "koordinator-root-quota";

/// Namespace of the SLO ConfigMap.
pub const SLO_CONFIG_NAMESPACE: &str = "koordinator-system";

/// Name of the SLO ConfigMap.
pub const SLO_CONFIG_NAME: &str = "slo-controller-config";

/// Maximum length of an event note; longer messages are truncated.
pub const NOTE_LENGTH_LIMIT: usize = 1024;

/// Well-known resource names.
pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";

/// Version string.
pub const KOORD_VERSION: &str = "1.7.0";
