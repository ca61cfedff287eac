// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Hierarchical elastic quota: min/max guarantees, runtime
//! recomputation, borrowing between siblings, revocation.

mod estimator;
mod group_quota_manager;
mod hook;
mod quota_info;
mod revoke;
mod runtime;
mod tree_hub;

pub use estimator::{DefaultEstimator, PodRequestEstimator, RequestAsIsEstimator};
pub use group_quota_manager::{GroupQuotaManager, QuotaUsageSnapshot};
pub use hook::QuotaHookPlugin;
pub use quota_info::{PodAttachment, QuotaInfo};
pub use revoke::{LogPodEvictor, PodEvictor, QuotaRevoker};
pub use runtime::{distribute, distribute_resources, scaled_mins, QuotaShare};
pub use tree_hub::QuotaTreeHub;
