// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Reservations: first-class placeholders for future pod placement,
//! mirrored into the scheduler as synthetic reserve pods.

mod cache;
mod fit_message;
mod handler;
mod reserve_pod;

pub use cache::{ReservationCache, ReservationInfo};
pub use fit_message::reservation_level_message;
pub use handler::ReservationHandler;
pub use reserve_pod::{
    is_reserve_pod, new_reserve_pod, reservation_name_of_reserve_pod, validate_reservation,
};
