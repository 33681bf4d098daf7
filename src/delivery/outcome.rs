//! Per-contact results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channels::AckLevel;

/// What happened when a message was dispatched to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendAttemptResult {
    /// The server acknowledged the message at or above the required level.
    Success { ack: AckLevel },
    /// The recipient has no account on the channel.
    NoWhatsApp,
    /// No qualifying acknowledgment arrived in time.
    AckTimeout { ack: AckLevel },
    /// The transport rejected the send.
    SendError { message: String },
}

/// Outcome tag written to the report and the send log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    SentText,
    SentImage,
    SkippedCooldown,
    NoWhatsapp,
    AckTimeout,
    SendError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SentText => "sent_text",
            Self::SentImage => "sent_image",
            Self::SkippedCooldown => "skipped_cooldown",
            Self::NoWhatsapp => "no_whatsapp",
            Self::AckTimeout => "ack_timeout",
            Self::SendError => "send_error",
        }
    }

    /// True for a confirmed send, the only outcome that starts a cooldown.
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::SentText | Self::SentImage)
    }

    /// True when a payload was actually dispatched to the transport.
    pub fn is_dispatched(&self) -> bool {
        matches!(
            self,
            Self::SentText | Self::SentImage | Self::AckTimeout | Self::SendError
        )
    }

    /// Default report detail for this outcome.
    pub fn default_detail(&self) -> &'static str {
        match self {
            Self::SkippedCooldown => "24h policy",
            Self::NoWhatsapp => "number has no WhatsApp account",
            Self::AckTimeout => "no server ACK received (slow connection or restriction)",
            Self::SendError => "unspecified error",
            Self::SentText | Self::SentImage => "",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SendAttemptResult {
    /// Map to the report tag, given whether the run is in image mode.
    pub fn outcome(&self, image: bool) -> Outcome {
        match self {
            Self::Success { .. } if image => Outcome::SentImage,
            Self::Success { .. } => Outcome::SentText,
            Self::NoWhatsApp => Outcome::NoWhatsapp,
            Self::AckTimeout { .. } => Outcome::AckTimeout,
            Self::SendError { .. } => Outcome::SendError,
        }
    }

    /// Report detail for this result.
    pub fn detail(&self, image: bool) -> String {
        match self {
            Self::SendError { message } if !message.trim().is_empty() => message.clone(),
            Self::AckTimeout { ack } => format!(
                "{} [last ack: {}]",
                Outcome::AckTimeout.default_detail(),
                ack
            ),
            other => other.outcome(image).default_detail().to_string(),
        }
    }
}
