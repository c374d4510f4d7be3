// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! ICE connection monitoring.
//!
//! [`spawn_ice_forwarder`] moves adapter ICE states into the publisher mailbox;
//! [`IceMonitor`] decides what each state means for the session.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::publisher::PublisherMessage;
use super::state::SessionState;
use crate::core::peer::IceConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceAction {
    None,
    /// First failure since the last connect: restart ICE and renegotiate.
    Restart,
    /// Failure with the restart budget spent.
    Fail,
    /// Transient loss; report, keep the session.
    ReportDisconnected,
    /// Back after a reported disconnect.
    Reconnected,
    /// Connection closed underneath us.
    Close,
}

/// Per-session restart budget and disconnect tracking.
#[derive(Debug, Default)]
pub struct IceMonitor {
    restart_spent: bool,
    disconnected: bool,
}

impl IceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_state(&mut self, ice: IceConnectionState, session: SessionState) -> IceAction {
        match ice {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                self.restart_spent = false;
                if std::mem::take(&mut self.disconnected) && session == SessionState::Live {
                    IceAction::Reconnected
                } else {
                    IceAction::None
                }
            }
            IceConnectionState::Failed if session == SessionState::Live => {
                if self.restart_spent {
                    IceAction::Fail
                } else {
                    self.restart_spent = true;
                    IceAction::Restart
                }
            }
            IceConnectionState::Disconnected if session == SessionState::Live => {
                self.disconnected = true;
                IceAction::ReportDisconnected
            }
            IceConnectionState::Closed if session.has_session() => IceAction::Close,
            _ => IceAction::None,
        }
    }
}

/// Forward ICE states tagged with `generation` until cancelled, the stream
/// ends or every publisher handle is gone.
pub(crate) fn spawn_ice_forwarder(
    mut events: mpsc::UnboundedReceiver<IceConnectionState>,
    generation: u64,
    mailbox: mpsc::WeakSender<PublisherMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let state = tokio::select! {
                () = cancel.cancelled() => break,
                state = events.recv() => match state {
                    Some(state) => state,
                    None => break,
                },
            };

            tracing::debug!("[IceMonitor] ICE connection state: {}", state);
            let Some(sender) = mailbox.upgrade() else {
                break;
            };
            let message = PublisherMessage::IceState { generation, state };
            tokio::select! {
                () = cancel.cancelled() => break,
                sent = sender.send(message) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("[IceMonitor] Forwarder for session {} exited", generation);
    })
}
