//! WebSocket message types.
//!
//! Defines the message format for client-server communication. Inbound
//! control messages are `type`-tagged; outbound topic deliveries use the
//! envelope `{channel, event, payload, params?, timestamp}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::channels::{Channel, Event, Params};

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Authenticate the connection.
    Authenticate {
        /// Bearer token.
        token: String,
    },

    /// Subscribe to a channel.
    Subscribe {
        /// Channel name (e.g., "ORDERBOOK").
        channel: String,
        /// Optional scoping parameters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Params>,
    },

    /// Unsubscribe from a channel.
    Unsubscribe {
        /// Channel name.
        channel: String,
        /// Scoping parameters used when subscribing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Params>,
    },

    /// Ping message for keepalive.
    Ping,
}

impl ClientMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the frame is not a known control message.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Topic delivery sent to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Channel the event was published on.
    pub channel: Channel,
    /// Event name.
    pub event: Event,
    /// Event payload, possibly a compression envelope or a batch.
    pub payload: Value,
    /// Scoping parameters of the publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    /// Publish time in epoch milliseconds.
    pub timestamp: i64,
}

/// Reply to a control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Authentication succeeded.
    Authenticated {
        /// Authenticated user id.
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// Authentication failed.
    AuthenticationFailed {
        /// Failure reason.
        reason: String,
    },

    /// Subscription confirmed.
    Subscribed {
        /// Channel name.
        channel: Channel,
        /// Scoping parameters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Params>,
    },

    /// Unsubscription confirmed.
    Unsubscribed {
        /// Channel name.
        channel: Channel,
        /// Scoping parameters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Params>,
    },

    /// Subscription rejected.
    SubscriptionDenied {
        /// Requested channel name as sent by the client.
        channel: String,
        /// Denial reason.
        reason: String,
    },

    /// Generic error response.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },

    /// Pong response to ping.
    Pong,
}

/// Message sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Topic delivery.
    Event(Envelope),
    /// Control reply.
    Control(ControlMessage),
}

impl ServerMessage {
    /// Creates a topic delivery.
    #[must_use]
    pub fn event(
        channel: Channel,
        event: Event,
        payload: Value,
        params: Option<Params>,
        timestamp: i64,
    ) -> Self {
        Self::Event(Envelope {
            channel,
            event,
            payload,
            params,
            timestamp,
        })
    }

    /// Creates an authenticated message.
    #[must_use]
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self::Control(ControlMessage::Authenticated {
            user_id: user_id.into(),
        })
    }

    /// Creates an authentication failure message.
    #[must_use]
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::Control(ControlMessage::AuthenticationFailed {
            reason: reason.into(),
        })
    }

    /// Creates a subscribed message.
    #[must_use]
    pub fn subscribed(channel: Channel, params: Option<Params>) -> Self {
        Self::Control(ControlMessage::Subscribed { channel, params })
    }

    /// Creates an unsubscribed message.
    #[must_use]
    pub fn unsubscribed(channel: Channel, params: Option<Params>) -> Self {
        Self::Control(ControlMessage::Unsubscribed { channel, params })
    }

    /// Creates a subscription denial message.
    #[must_use]
    pub fn subscription_denied(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Control(ControlMessage::SubscriptionDenied {
            channel: channel.into(),
            reason: reason.into(),
        })
    }

    /// Creates an error message.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Control(ControlMessage::Error {
            code: code.into(),
            message: message.into(),
        })
    }

    /// Creates a pong message.
    #[must_use]
    pub const fn pong() -> Self {
        Self::Control(ControlMessage::Pong)
    }

    /// Returns the envelope if this is a topic delivery.
    #[must_use]
    pub const fn as_event(&self) -> Option<&Envelope> {
        match self {
            Self::Event(envelope) => Some(envelope),
            Self::Control(_) => None,
        }
    }
}
