//! Background services for the copy trading bot

pub mod auto_redeemer;
pub mod balance;
pub mod data_api;
pub mod exchange;
pub mod scheduler;
pub mod stats;
pub mod stop_loss;
pub mod trade_executor;
pub mod trade_monitor;

#[cfg(test)]
pub(crate) mod fakes;

pub use auto_redeemer::{AutoRedeemer, RedemptionSummary};
pub use balance::{BalanceOracle, UsdcBalanceOracle};
pub use data_api::{DataApiClient, DataFeed};
pub use exchange::{ClobExchange, Exchange, RedemptionMethod};
pub use scheduler::run_every;
pub use stats::{HealthStatus, JsonStatsStore, StatsService, StatsSnapshot, StatsStore, TradeEvent, TradeEventKind};
pub use stop_loss::StopLossGuard;
pub use trade_executor::{SkipReason, TradeExecutor};
pub use trade_monitor::TradeMonitor;
