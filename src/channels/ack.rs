//! Acknowledgment waiter — correlates ack events with one sent message.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace, warn};

use super::{AckEvent, AckLevel, MessageHandle};

/// Scoped subscription to the session's ack events.
///
/// Unsubscribes when dropped, so every exit path of a wait releases it.
#[derive(Debug)]
pub struct AckSubscription {
    rx: broadcast::Receiver<AckEvent>,
}

impl AckSubscription {
    pub fn new(rx: broadcast::Receiver<AckEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Result<AckEvent, RecvError> {
        self.rx.recv().await
    }
}

impl Drop for AckSubscription {
    fn drop(&mut self) {
        trace!("Ack subscription released");
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckWait {
    /// A matching event reached the minimum level.
    Confirmed(AckLevel),
    /// Deadline passed (or the stream closed); carries the highest level
    /// seen in events for this message.
    TimedOut(AckLevel),
}

impl AckWait {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    pub fn level(&self) -> AckLevel {
        match self {
            Self::Confirmed(level) | Self::TimedOut(level) => *level,
        }
    }
}

/// Wait until `handle` is acknowledged at `min` or above, or `timeout` elapses.
///
/// Events for other messages are skipped. The subscription is consumed and
/// dropped before returning.
pub async fn wait_for_ack(
    mut subscription: AckSubscription,
    handle: &MessageHandle,
    min: AckLevel,
    timeout: Duration,
) -> AckWait {
    let deadline = tokio::time::Instant::now() + timeout;
    // Only events count; the level in the send response is not a confirmation.
    let mut last = AckLevel::Pending;

    loop {
        match tokio::time::timeout_at(deadline, subscription.recv()).await {
            Err(_) => {
                debug!(message_id = %handle.id, last = %last, "Ack wait timed out");
                return AckWait::TimedOut(last);
            }
            Ok(Ok(event)) => {
                if event.message_id != handle.id {
                    continue;
                }
                last = last.max(event.ack);
                if event.ack >= min {
                    debug!(message_id = %handle.id, ack = %event.ack, "Ack received");
                    return AckWait::Confirmed(event.ack);
                }
            }
            Ok(Err(RecvError::Lagged(skipped))) => {
                warn!(skipped, "Ack subscription lagged; some events were dropped");
            }
            Ok(Err(RecvError::Closed)) => {
                warn!(message_id = %handle.id, "Ack stream closed while waiting");
                return AckWait::TimedOut(last);
            }
        }
    }
}
