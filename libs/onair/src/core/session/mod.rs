// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod encoding;
pub mod identity;
pub mod monitor;
pub mod negotiator;
pub mod publisher;
pub mod state;

pub use encoding::EncodingController;
pub use identity::{PublishEndpoint, StreamIdentity};
pub use monitor::{IceAction, IceMonitor};
pub use negotiator::{Negotiated, Negotiator};
pub use publisher::{Publisher, PublisherBuilder, PublisherHandle, SessionSettings};
pub use state::{SessionSnapshot, SessionState, TeardownRequest};
