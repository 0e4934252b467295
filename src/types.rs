//! Core types for the copy trading bot

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for TradeSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(anyhow::anyhow!("Unknown trade side: {}", other)),
        }
    }
}

/// Feed fields sent as `null` decode like missing keys
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Activity entry as returned by the data API feed
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub activity_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub transaction_hash: String,
    /// Unix seconds
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub condition_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub asset: String,
    /// Empty for non-trade activity
    #[serde(default, deserialize_with = "null_as_default")]
    pub side: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub price: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub usdc_size: Decimal,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

impl ActivityEntry {
    pub fn is_trade(&self) -> bool {
        self.activity_type.eq_ignore_ascii_case("TRADE")
    }

    /// Validate a feed entry into a ledger insert. Entries missing the
    /// fields a replica needs are rejected.
    pub fn to_new_trade(&self, target_wallet: &str) -> Option<NewTrade> {
        if self.transaction_hash.is_empty() || self.asset.is_empty() {
            return None;
        }

        Some(NewTrade {
            transaction_hash: self.transaction_hash.clone(),
            target_wallet: target_wallet.to_lowercase(),
            condition_id: self.condition_id.clone(),
            asset: self.asset.clone(),
            side: self.side.parse().ok()?,
            size: self.size,
            price: self.price,
            usdc_size: self.usdc_size,
            timestamp: self.timestamp,
            title: self.title.clone(),
            outcome: self.outcome.clone(),
        })
    }
}

/// Trade about to be appended to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub transaction_hash: String,
    pub target_wallet: String,
    pub condition_id: String,
    pub asset: String,
    pub side: TradeSide,
    pub size: Decimal,
    pub price: Decimal,
    pub usdc_size: Decimal,
    pub timestamp: i64,
    pub title: Option<String>,
    pub outcome: Option<String>,
}

impl NewTrade {
    pub fn snapshot(&self) -> TradeSnapshot {
        TradeSnapshot {
            asset: self.asset.clone(),
            side: self.side,
            size: self.size,
            price: self.price,
            usdc_size: self.usdc_size,
        }
    }
}

/// Ledger record of an observed target-wallet trade
#[derive(Debug, Clone, Serialize)]
pub struct TradeActivity {
    pub transaction_hash: String,
    pub target_wallet: String,
    pub condition_id: String,
    pub asset: String,
    pub side: TradeSide,
    pub size: Decimal,
    pub price: Decimal,
    pub usdc_size: Decimal,
    pub timestamp: i64,
    pub title: Option<String>,
    pub outcome: Option<String>,
    pub processed: bool,
    pub attempt_count: i64,
    pub detected_at: DateTime<Utc>,
}

impl TradeActivity {
    pub fn snapshot(&self) -> TradeSnapshot {
        TradeSnapshot {
            asset: self.asset.clone(),
            side: self.side,
            size: self.size,
            price: self.price,
            usdc_size: self.usdc_size,
        }
    }
}

/// Trade details carried by stats events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSnapshot {
    pub asset: String,
    pub side: TradeSide,
    pub size: Decimal,
    pub price: Decimal,
    pub usdc_size: Decimal,
}

impl TradeSnapshot {
    pub fn sell(asset: &str, size: Decimal, price: Decimal) -> Self {
        Self {
            asset: asset.to_string(),
            side: TradeSide::Sell,
            size,
            price,
            usdc_size: size * price,
        }
    }
}

/// Live position from the positions feed. Refetched every cycle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(default, deserialize_with = "null_as_default")]
    pub asset: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub condition_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub outcome: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_value: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cur_price: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    pub redeemable: bool,
}

/// One price level of an order book
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Order book snapshot for an asset
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub bids: Vec<OrderLevel>,
    pub asks: Vec<OrderLevel>,
}

impl OrderBook {
    /// Highest-priced bid, whatever order the levels arrive in
    pub fn best_bid(&self) -> Option<&OrderLevel> {
        self.bids.iter().fold(None, |best, level| match best {
            Some(b) if b.price >= level.price => Some(b),
            _ => Some(level),
        })
    }
}

/// Decimal places the exchange accepts for share amounts and prices
pub const LOT_DECIMALS: u32 = 2;

/// Largest amount the exchange will accept that does not exceed `amount`
pub fn lot_size(amount: Decimal) -> Decimal {
    amount.trunc_with_scale(LOT_DECIMALS)
}

/// Order type understood by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// Fill-or-kill: fills completely at once or not at all
    Fok,
    /// Fill-and-kill: fills what it can at once, cancels the rest
    Fak,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Fok => write!(f, "FOK"),
            OrderType::Fak => write!(f, "FAK"),
        }
    }
}

/// Order submitted to the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: TradeSide,
    pub asset: String,
    /// Shares
    pub amount: Decimal,
    pub price: Decimal,
    pub order_type: OrderType,
}

/// Exchange reply to an order
#[derive(Debug, Clone, Default)]
pub struct OrderResponse {
    pub success: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
}
