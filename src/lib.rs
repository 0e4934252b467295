//! Polymarket Copy Trading Bot Library
//!
//! Mirrors a target wallet's trades into a bot wallet:
//!
//! 1. **Trade Monitor** polls the target's activity feed and appends new
//!    trades to a SQLite ledger.
//! 2. **Trade Executor** drains the ledger, sizes each replica pro-rata to the
//!    bot's capital and enforces a per-position portfolio limit.
//! 3. **Stop-Loss Guard** liquidates positions priced below a floor by walking
//!    the live order book in fill-or-kill chunks.
//! 4. **Auto-Redeemer** sweeps settled positions on a long interval.
//!
//! A stats service records every trade lifecycle event over a rolling 24h
//! window and persists periodic snapshots.

pub mod config;
pub mod db;
pub mod error;
pub mod risk;
pub mod services;
pub mod types;

pub use config::Config;
pub use db::Database;
pub use error::{FetchError, OrderError};
pub use types::{OrderBook, OrderRequest, OrderResponse, Position, TradeActivity, TradeSide};
