// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Quota hook plugins: extension callbacks invoked on quota spec
//! changes and full re-materialization. The manager drives the hooks;
//! hooks never mutate the tree directly.

use std::sync::Arc;

use koord_common::objects::ElasticQuota;

use super::quota_info::QuotaInfo;

pub trait QuotaHookPlugin: Send + Sync {
    /// A short identifier for logs.
    fn key(&self) -> &str;

    /// A quota spec was inserted or changed. `old` is absent on insert.
    fn on_quota_update(&self, old: Option<&QuotaInfo>, new: &QuotaInfo);

    /// The tree was rebuilt from a complete snapshot.
    fn on_reset(&self, quotas: &[Arc<ElasticQuota>]);
}
