/*
 * This file is part of hpdstorm.
 *
 * Copyright (C) 2025 hpdstorm contributors
 *
 * hpdstorm is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * hpdstorm is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with hpdstorm. If not, see <https://www.gnu.org/licenses/>.
 */

//! hpdstorm - Display hot-plug storm simulator
//!
//! Drives the `hpd-core` hot-plug subsystem through JSON scenarios against
//! simulated display hardware and reports the resulting pin and connector
//! state.

pub mod logger;
pub mod scenario;
pub mod sim;

pub use scenario::{load_scenario, parse_scenario, Scenario, Step};
pub use sim::{Report, Simulation};
