//! Market data store.
//!
//! Provides the read-side queries the publishers need, plus an in-memory
//! implementation used by tests and the standalone server.

pub mod postgres;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ws::channels::Params;

pub use postgres::PgStore;

/// A base/quote asset pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingPair {
    /// Base asset symbol.
    pub base_asset: String,
    /// Quote asset symbol.
    pub quote_asset: String,
}

impl TradingPair {
    /// Creates a trading pair.
    #[must_use]
    pub fn new(base_asset: impl Into<String>, quote_asset: impl Into<String>) -> Self {
        Self {
            base_asset: base_asset.into(),
            quote_asset: quote_asset.into(),
        }
    }

    /// Returns the `{baseAsset, quoteAsset}` subscription params.
    #[must_use]
    pub fn params(&self) -> Params {
        Params::pair(&self.base_asset, &self.quote_asset)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base_asset, self.quote_asset)
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy order (bid).
    Buy,
    /// Sell order (ask).
    Sell,
}

impl Side {
    /// Returns the side as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Parses a stored side name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "buy" | "bid" => Some(Self::Buy),
            "sell" | "ask" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Resting on the book.
    Open,
    /// Partially filled, still resting.
    Partial,
    /// Fully filled.
    Filled,
    /// Cancelled by the owner.
    Cancelled,
}

impl OrderStatus {
    /// Returns the status as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Partial => "partial",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a stored status name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "partial" => Some(Self::Partial),
            "filled" => Some(Self::Filled),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true if the order still rests on the book.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open | Self::Partial)
    }
}

/// An order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order ID.
    pub id: String,
    /// Owner user id.
    pub user_id: String,
    /// Base asset symbol.
    pub base_asset: String,
    /// Quote asset symbol.
    pub quote_asset: String,
    /// Order side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Remaining amount.
    pub amount: Decimal,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Returns true if the order belongs to `pair`.
    #[must_use]
    pub fn is_for(&self, pair: &TradingPair) -> bool {
        self.base_asset == pair.base_asset && self.quote_asset == pair.quote_asset
    }

    /// Returns the order's trading pair.
    #[must_use]
    pub fn pair(&self) -> TradingPair {
        TradingPair::new(&self.base_asset, &self.quote_asset)
    }
}

/// An executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Trade ID.
    pub id: String,
    /// Base asset symbol.
    pub base_asset: String,
    /// Quote asset symbol.
    pub quote_asset: String,
    /// Execution price.
    pub price: Decimal,
    /// Executed amount.
    pub amount: Decimal,
    /// Buyer user id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_id: Option<String>,
    /// Seller user id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,
    /// Execution time.
    pub created_at: DateTime<Utc>,
}

impl Trade {
    /// Returns true if the trade belongs to `pair`.
    #[must_use]
    pub fn is_for(&self, pair: &TradingPair) -> bool {
        self.base_asset == pair.base_asset && self.quote_asset == pair.quote_asset
    }

    /// Returns the trade's trading pair.
    #[must_use]
    pub fn pair(&self) -> TradingPair {
        TradingPair::new(&self.base_asset, &self.quote_asset)
    }
}

/// Balance of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    /// Asset symbol.
    pub asset: String,
    /// Amount free to trade.
    pub available: Decimal,
    /// Amount locked in open orders.
    pub locked: Decimal,
}

impl Balance {
    /// Returns available plus locked, or `None` on overflow.
    #[must_use]
    pub fn total(&self) -> Option<Decimal> {
        self.available.checked_add(self.locked)
    }
}

/// An online peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Peer ID.
    pub id: String,
    /// Network address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Time the peer came online.
    pub connected_at: DateTime<Utc>,
}

/// Read-side queries backing the publishers.
#[async_trait]
pub trait DataStore: Send + Sync + fmt::Debug {
    /// Returns open orders on one side of a pair's book.
    async fn open_orders(&self, pair: &TradingPair, side: Side) -> Result<Vec<Order>, StoreError>;

    /// Returns trades on a pair at or after `since`, oldest first.
    async fn trades_since(
        &self,
        pair: &TradingPair,
        since: DateTime<Utc>,
    ) -> Result<Vec<Trade>, StoreError>;

    /// Returns every pair with orders or trades.
    async fn trading_pairs(&self) -> Result<Vec<TradingPair>, StoreError>;

    /// Returns a user's balances.
    async fn balances(&self, user_id: &str) -> Result<Vec<Balance>, StoreError>;

    /// Returns the peers currently online.
    async fn online_peers(&self) -> Result<Vec<Peer>, StoreError>;
}

/// In-memory data store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pairs: RwLock<BTreeSet<TradingPair>>,
    orders: RwLock<Vec<Order>>,
    trades: RwLock<Vec<Trade>>,
    balances: RwLock<HashMap<String, Vec<Balance>>>,
    peers: RwLock<HashMap<String, Peer>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a trading pair.
    pub fn add_pair(&self, pair: TradingPair) {
        self.pairs.write().insert(pair);
    }

    /// Inserts or replaces an order.
    pub fn upsert_order(&self, order: Order) {
        self.pairs.write().insert(order.pair());
        let mut orders = self.orders.write();
        match orders.iter_mut().find(|o| o.id == order.id) {
            Some(existing) => *existing = order,
            None => orders.push(order),
        }
    }

    /// Removes an order. Returns true if it existed.
    pub fn remove_order(&self, order_id: &str) -> bool {
        let mut orders = self.orders.write();
        let before = orders.len();
        orders.retain(|o| o.id != order_id);
        orders.len() != before
    }

    /// Records a trade.
    pub fn record_trade(&self, trade: Trade) {
        self.pairs.write().insert(trade.pair());
        self.trades.write().push(trade);
    }

    /// Sets a user's balance for one asset.
    pub fn set_balance(&self, user_id: impl Into<String>, balance: Balance) {
        let mut balances = self.balances.write();
        let entries = balances.entry(user_id.into()).or_default();
        match entries.iter_mut().find(|b| b.asset == balance.asset) {
            Some(existing) => *existing = balance,
            None => entries.push(balance),
        }
    }

    /// Marks a peer online.
    pub fn peer_online(&self, peer: Peer) {
        self.peers.write().insert(peer.id.clone(), peer);
    }

    /// Marks a peer offline. Returns the peer if it was online.
    pub fn peer_offline(&self, peer_id: &str) -> Option<Peer> {
        self.peers.write().remove(peer_id)
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn open_orders(&self, pair: &TradingPair, side: Side) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .iter()
            .filter(|o| o.is_for(pair) && o.side == side && o.status.is_open())
            .cloned()
            .collect();

        match side {
            Side::Buy => orders.sort_by(|a, b| b.price.cmp(&a.price)),
            Side::Sell => orders.sort_by(|a, b| a.price.cmp(&b.price)),
        }
        Ok(orders)
    }

    async fn trades_since(
        &self,
        pair: &TradingPair,
        since: DateTime<Utc>,
    ) -> Result<Vec<Trade>, StoreError> {
        let mut trades: Vec<Trade> = self
            .trades
            .read()
            .iter()
            .filter(|t| t.is_for(pair) && t.created_at >= since)
            .cloned()
            .collect();

        trades.sort_by_key(|t| t.created_at);
        Ok(trades)
    }

    async fn trading_pairs(&self) -> Result<Vec<TradingPair>, StoreError> {
        Ok(self.pairs.read().iter().cloned().collect())
    }

    async fn balances(&self, user_id: &str) -> Result<Vec<Balance>, StoreError> {
        Ok(self
            .balances
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn online_peers(&self) -> Result<Vec<Peer>, StoreError> {
        let mut peers: Vec<Peer> = self.peers.read().values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(peers)
    }
}
