//! # fleetlink-core
//!
//! Foundation types for the Fleetlink relay.
//!
//! This crate provides the shared vocabulary the other Fleetlink crates
//! depend on:
//!
//! - **Frames**: [`frame::parse_device_frame`] turns inbound device text into
//!   tagged telemetry objects
//! - **Commands**: [`command::CommandPayload`] and [`command::StreamCommand`]
//!   with validation shared by the HTTP and stream paths
//! - **Close policy**: [`close::CloseReason`] mapping policy closes to fixed
//!   WebSocket close codes
//! - **Retry**: [`retry::RetryPolicy`] bounded exponential backoff schedule
//! - **Views**: [`status::DeviceStatus`] read-only registry snapshot rows
//! - **Time**: [`time::utc_now`] and ISO-8601 rendering
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other fleetlink crates.

#![deny(unsafe_code)]

pub mod close;
pub mod command;
pub mod frame;
pub mod retry;
pub mod status;
pub mod time;
