// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod bus;
mod messages;

pub use bus::{ControlBus, RoomBus};
pub use messages::{ControlCommand, ControlMessage, DeviceEvent, StatusEvent, StreamStatus};

/// Topic names
pub mod topics {
    /// Inbound producer commands for a room
    pub fn control(room: &str) -> String {
        format!("room:{}:control", room)
    }

    /// Outbound publisher status and device events for a room
    pub fn status(room: &str) -> String {
        format!("room:{}:status", room)
    }
}
