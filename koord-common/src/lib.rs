// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Common types for the koord-scheduler: resource vectors, API object
//! models, annotation/label accessors, plugin configuration, errors.

pub mod config;
pub mod constants;
pub mod error;
pub mod extension;
pub mod hash;
pub mod objects;
pub mod resources;
