//! Error types for the realtime layer.
//!
//! Every fallible operation returns one of these enums. None of them is fatal
//! to the process: the worst outcome is a dropped message or a delayed batch.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Category an error is counted under in the metrics collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport-level failures.
    Connection,
    /// Bad, expired or missing credentials.
    Authentication,
    /// Invalid channel or rate-limited subscription.
    Subscription,
    /// Malformed inbound payloads and serialization failures.
    Message,
}

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No token was supplied.
    #[error("missing token")]
    MissingToken,

    /// Token is not recognised.
    #[error("invalid token")]
    InvalidToken,

    /// Token was valid but has expired.
    #[error("token expired")]
    Expired,

    /// The connection is not registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(u64),
}

/// Subscription failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// Channel name is not part of the topic vocabulary.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    /// Rate limiter denied the request.
    #[error("rate limited: {remaining} remaining, window resets at {reset_at}")]
    RateLimited {
        /// Requests left in the current window.
        remaining: u32,
        /// When the current window ends.
        reset_at: DateTime<Utc>,
    },

    /// The connection is not registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(u64),
}

/// Inbound and outbound message failures.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Inbound frame could not be parsed.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Outbound payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Codec failures.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// Encoder failed.
    #[error("encode failed: {0}")]
    Encode(#[source] std::io::Error),

    /// Decoder failed.
    #[error("decode failed: {0}")]
    Decode(#[source] std::io::Error),

    /// Envelope data is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Envelope is missing fields or decompressed bytes are not JSON.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Envelope names an algorithm this build does not know.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Data store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query execution failed.
    #[error("query error: {0}")]
    Query(String),

    /// A row lacked a required column or had the wrong type.
    #[error("missing field: {0}")]
    MissingField(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Query(err.to_string())
    }
}

/// Top-level error for the realtime layer.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport-level failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Authentication failure.
    #[error("authentication error: {0}")]
    Authentication(#[from] AuthError),

    /// Subscription failure.
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// Message failure.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Compression failure.
    #[error("compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Data store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Decimal arithmetic over stored values exceeded the representable range.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),
}

impl FeedError {
    /// Returns the metrics category for this error, if it is counted.
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Connection(_) => Some(ErrorKind::Connection),
            Self::Authentication(_) => Some(ErrorKind::Authentication),
            Self::Subscription(_) => Some(ErrorKind::Subscription),
            Self::Message(_) => Some(ErrorKind::Message),
            Self::Compression(_) | Self::Store(_) | Self::Overflow(_) => None,
        }
    }
}

/// Result alias for realtime operations.
pub type Result<T> = std::result::Result<T, FeedError>;
