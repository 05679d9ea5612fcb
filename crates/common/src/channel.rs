//! Event channel from the USB session thread back to the caller
//!
//! The session runs on its own OS thread and must never block on a slow
//! consumer, so the channel is unbounded and sends are fire-and-forget.

use crate::device::{CandidateDevice, OutcomeKind};
use async_channel::{Receiver, Sender, TryRecvError, unbounded};
use tracing::debug;

/// How a USB session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The book was written and confirmed on the device
    Done,
    /// The device reported it has no room for the book
    DeviceOutOfSpace,
    /// Any other failure while sending
    FailureToSend,
    /// The session failed before a device could be selected
    UnableToConnect,
    /// The caller asked the session to stop
    Stopped,
}

impl SessionOutcome {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SessionOutcome::DeviceOutOfSpace
                | SessionOutcome::FailureToSend
                | SessionOutcome::UnableToConnect
        )
    }
}

/// Events emitted by a USB session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Exactly one ready device was found; sending starts next
    OneReadyDeviceFound { device: CandidateDevice },

    /// The latest enumeration pass did not yield a single ready device
    ///
    /// Emitted only when the kind of report changes from the previous pass.
    OneReadyDeviceNotFound {
        report: OutcomeKind,
        device_names: Vec<String>,
    },

    /// The session has ended; emitted exactly once per session
    Stopped { outcome: SessionOutcome },
}

/// Sending half, owned by the session thread
#[derive(Debug, Clone)]
pub struct SessionEventSender {
    tx: Sender<SessionEvent>,
}

impl SessionEventSender {
    /// Send an event; a closed channel just means nobody is listening
    pub fn send(&self, event: SessionEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("Session event not delivered: {}", e);
        }
    }
}

/// Receiving half, held by the caller
#[derive(Debug, Clone)]
pub struct SessionEvents {
    rx: Receiver<SessionEvent>,
}

impl SessionEvents {
    /// Receive the next event (async)
    pub async fn recv(&self) -> crate::Result<SessionEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event if one is already queued
    pub fn try_recv(&self) -> Option<SessionEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }
}

/// Create the event channel between a USB coordinator and its caller
pub fn create_session_channel() -> (SessionEventSender, SessionEvents) {
    let (tx, rx) = unbounded();
    (SessionEventSender { tx }, SessionEvents { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (tx, rx) = create_session_channel();
        tx.send(SessionEvent::OneReadyDeviceNotFound {
            report: OutcomeKind::NoDeviceFound,
            device_names: vec![],
        });
        tx.send(SessionEvent::Stopped {
            outcome: SessionOutcome::Stopped,
        });

        assert!(matches!(
            rx.try_recv(),
            Some(SessionEvent::OneReadyDeviceNotFound { .. })
        ));
        assert_eq!(
            rx.try_recv(),
            Some(SessionEvent::Stopped {
                outcome: SessionOutcome::Stopped
            })
        );
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = create_session_channel();
        drop(rx);
        tx.send(SessionEvent::Stopped {
            outcome: SessionOutcome::Done,
        });
    }

    #[test]
    fn test_error_outcomes() {
        assert!(SessionOutcome::DeviceOutOfSpace.is_error());
        assert!(SessionOutcome::UnableToConnect.is_error());
        assert!(!SessionOutcome::Done.is_error());
        assert!(!SessionOutcome::Stopped.is_error());
    }
}
