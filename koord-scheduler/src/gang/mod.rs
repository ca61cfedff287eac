// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Gang (coscheduling) admission: all-or-nothing group scheduling.

mod cache;
#[allow(clippy::module_inception)]
mod gang;
mod group_info;
mod permit;

pub use cache::GangCache;
pub use gang::{Gang, GangInitSource, GangSource};
pub use group_info::{
    GangGroupInfo, REASON_GANG_REJECTED, REASON_POD_BOUND, REASON_POD_DELETED,
};
pub use permit::{GangPermit, PermitDecision};
