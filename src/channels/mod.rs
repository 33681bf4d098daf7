//! Chat transport abstraction and acknowledgment plumbing.

pub mod ack;
pub mod bridge;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::contacts::PhoneIdentity;
use crate::error::TransportError;

pub use ack::{AckSubscription, AckWait, wait_for_ack};
pub use bridge::BridgeTransport;

/// Default capacity of the acknowledgment broadcast channel.
const DEFAULT_ACK_CAPACITY: usize = 256;

/// Delivery stage of a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum AckLevel {
    /// Not yet on the server.
    Pending = 0,
    /// Received by the server.
    Server = 1,
    /// Delivered to the recipient's device.
    Device = 2,
    /// Read by the recipient.
    Read = 3,
}

impl AckLevel {
    /// Map a raw client ack code. `4` (played) counts as read; negative
    /// codes (errors) and anything unknown are rejected.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Server),
            2 => Some(Self::Device),
            3 | 4 => Some(Self::Read),
            _ => None,
        }
    }
}

impl TryFrom<i64> for AckLevel {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown ack level {code}"))
    }
}

impl From<AckLevel> for i64 {
    fn from(level: AckLevel) -> Self {
        level as i64
    }
}

impl fmt::Display for AckLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Server => "server",
            Self::Device => "device",
            Self::Read => "read",
        };
        f.write_str(name)
    }
}

/// Channel-native message id assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Channel-native chat address of a reachable recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub String);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returned by a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageHandle {
    pub id: MessageId,
    /// Ack level reported with the send response.
    #[serde(default = "pending")]
    pub ack: AckLevel,
}

fn pending() -> AckLevel {
    AckLevel::Pending
}

/// One acknowledgment update from the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEvent {
    pub message_id: MessageId,
    pub ack: AckLevel,
}

/// Fan-out of acknowledgment events to any number of waiters.
#[derive(Debug, Clone)]
pub struct AckBus {
    tx: broadcast::Sender<AckEvent>,
}

impl Default for AckBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AckBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_ACK_CAPACITY);
        Self { tx }
    }

    /// Broadcast an event. Dropped silently when nobody is waiting.
    pub fn publish(&self, event: AckEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> AckSubscription {
        AckSubscription::new(self.tx.subscribe())
    }

    /// Number of live subscriptions.
    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live chat session able to deliver messages.
///
/// Created once at startup and shared by every send of the run.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve once the session is paired and connected.
    async fn ready(&self) -> Result<(), TransportError>;

    /// Look up the chat address for an identity. `None` means the number
    /// has no account on this channel.
    async fn resolve_recipient(
        &self,
        identity: &PhoneIdentity,
    ) -> Result<Option<RecipientId>, TransportError>;

    async fn send_text(&self, to: &RecipientId, text: &str) -> Result<MessageHandle, TransportError>;

    async fn send_image(
        &self,
        to: &RecipientId,
        image: &Path,
        caption: &str,
    ) -> Result<MessageHandle, TransportError>;

    /// Start receiving acknowledgment events. Take the subscription before
    /// dispatching so no ack can be missed.
    fn subscribe_acks(&self) -> AckSubscription;

    /// Release session resources.
    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_levels_are_ordered() {
        assert!(AckLevel::Pending < AckLevel::Server);
        assert!(AckLevel::Server < AckLevel::Device);
        assert!(AckLevel::Device < AckLevel::Read);
    }

    #[test]
    fn ack_codes_map_to_levels() {
        assert_eq!(AckLevel::from_code(1), Some(AckLevel::Server));
        assert_eq!(AckLevel::from_code(4), Some(AckLevel::Read));
        assert_eq!(AckLevel::from_code(-1), None);
        assert_eq!(AckLevel::from_code(9), None);
    }

    #[test]
    fn handle_deserializes_numeric_ack() {
        let handle: MessageHandle = serde_json::from_str(r#"{"id":"true_519@c.us_ABC","ack":1}"#).unwrap();
        assert_eq!(handle.id, MessageId("true_519@c.us_ABC".into()));
        assert_eq!(handle.ack, AckLevel::Server);

        let handle: MessageHandle = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert_eq!(handle.ack, AckLevel::Pending);
    }

    #[test]
    fn bus_tracks_subscribers() {
        let bus = AckBus::new();
        assert_eq!(bus.subscribers(), 0);
        let sub = bus.subscribe();
        assert_eq!(bus.subscribers(), 1);
        drop(sub);
        assert_eq!(bus.subscribers(), 0);
    }
}
