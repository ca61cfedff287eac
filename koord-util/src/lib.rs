// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Utility library for the koord-scheduler: bounded retry for
//! transiently-failing API writes, time helpers, and error counters.

pub mod counter;
pub mod retry;
pub mod time;
