// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! The koord-scheduler core.
//!
//! Three tightly-coupled subsystems make up the decision engine:
//! gang (coscheduling) admission, hierarchical elastic quota, and
//! reservations. They are driven in parallel by typed watch event
//! sources and consult the shared scheduler adapter (scheduling queue,
//! pod cache, nominator) at designated extension points.

pub mod adapter;
pub mod error_handler;
pub mod event_source;
pub mod gang;
pub mod quota;
pub mod reservation;
pub mod scheduler;
