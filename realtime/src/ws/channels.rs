//! Topic vocabulary for WebSocket subscriptions.
//!
//! Provides the closed set of channels and events, subscription scoping
//! parameters, and the canonical topic key used for batching and fan-out.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SubscriptionError;

/// Channel clients subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// Order book snapshots.
    Orderbook,
    /// Ticker statistics.
    Ticker,
    /// Trade events.
    Trades,
    /// Per-account balance and order events.
    Wallet,
    /// Peer presence.
    Peer,
}

impl Channel {
    /// All channels.
    pub const ALL: [Self; 5] = [
        Self::Orderbook,
        Self::Ticker,
        Self::Trades,
        Self::Wallet,
        Self::Peer,
    ];

    /// Returns the channel name as sent on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Orderbook => "ORDERBOOK",
            Self::Ticker => "TICKER",
            Self::Trades => "TRADES",
            Self::Wallet => "WALLET",
            Self::Peer => "PEER",
        }
    }

    /// Parses a channel name.
    ///
    /// Accepts any letter case.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` if the name is not part of the vocabulary.
    pub fn parse(name: &str) -> Result<Self, SubscriptionError> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| SubscriptionError::InvalidChannel(name.to_string()))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Event published on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// Full order book snapshot.
    OrderbookUpdate,
    /// Ticker statistics update.
    TickerUpdate,
    /// A trade was created.
    TradeCreated,
    /// A trade was settled.
    TradeCompleted,
    /// Account balances changed.
    BalanceUpdate,
    /// An order owned by the account changed.
    OrderUpdate,
    /// A peer came online.
    PeerConnected,
    /// A peer went offline.
    PeerDisconnected,
    /// Full list of online peers.
    PeerList,
}

impl Event {
    /// Returns the event name as sent on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OrderbookUpdate => "ORDERBOOK_UPDATE",
            Self::TickerUpdate => "TICKER_UPDATE",
            Self::TradeCreated => "TRADE_CREATED",
            Self::TradeCompleted => "TRADE_COMPLETED",
            Self::BalanceUpdate => "BALANCE_UPDATE",
            Self::OrderUpdate => "ORDER_UPDATE",
            Self::PeerConnected => "PEER_CONNECTED",
            Self::PeerDisconnected => "PEER_DISCONNECTED",
            Self::PeerList => "PEER_LIST",
        }
    }

    /// Returns the channel this event belongs to.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::OrderbookUpdate => Channel::Orderbook,
            Self::TickerUpdate => Channel::Ticker,
            Self::TradeCreated | Self::TradeCompleted => Channel::Trades,
            Self::BalanceUpdate | Self::OrderUpdate => Channel::Wallet,
            Self::PeerConnected | Self::PeerDisconnected | Self::PeerList => Channel::Peer,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription scoping parameters, e.g. `{baseAsset, quoteAsset}`.
///
/// Keys are kept sorted so two maps with the same entries serialize
/// identically. Scalar JSON values are stored as their text form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>")]
pub struct Params(BTreeMap<String, String>);

impl Params {
    /// Creates empty params.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `{baseAsset, quoteAsset}` params for a trading pair.
    #[must_use]
    pub fn pair(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self::new()
            .with("baseAsset", base)
            .with("quoteAsset", quote)
    }

    /// Adds an entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the canonical JSON form.
    #[must_use]
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl TryFrom<BTreeMap<String, Value>> for Params {
    type Error = String;

    fn try_from(map: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        map.into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k, s)),
                Value::Number(n) => Ok((k, n.to_string())),
                Value::Bool(b) => Ok((k, b.to_string())),
                Value::Null | Value::Array(_) | Value::Object(_) => {
                    Err(format!("param {k} must be a scalar"))
                }
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Self)
    }
}

/// A `(channel, params)` subscription entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription {
    /// Subscribed channel.
    pub channel: Channel,
    /// Optional scoping parameters.
    pub params: Option<Params>,
}

impl Subscription {
    /// Creates a subscription entry. Empty params are treated as absent.
    #[must_use]
    pub fn new(channel: Channel, params: Option<Params>) -> Self {
        Self {
            channel,
            params: params.filter(|p| !p.is_empty()),
        }
    }

    /// Returns true if a publish on `channel` with `params` targets this
    /// subscription.
    ///
    /// A publish without params reaches every subscription on the channel;
    /// a scoped publish reaches only identically scoped subscriptions.
    #[must_use]
    pub fn matches(&self, channel: Channel, params: Option<&Params>) -> bool {
        if self.channel != channel {
            return false;
        }
        match params {
            None => true,
            Some(p) => self.params.as_ref() == Some(p),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.params {
            Some(p) => write!(f, "{}{}", self.channel, p.canonical()),
            None => write!(f, "{}", self.channel),
        }
    }
}

/// Canonical `(channel, event, params)` identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey(String);

impl TopicKey {
    /// Derives the key for a topic.
    #[must_use]
    pub fn new(channel: Channel, event: Event, params: Option<&Params>) -> Self {
        match params.filter(|p| !p.is_empty()) {
            Some(p) => Self(format!("{}:{}:{}", channel, event, p.canonical())),
            None => Self(format!("{}:{}", channel, event)),
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
