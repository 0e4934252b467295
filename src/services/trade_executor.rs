//! Trade replication
//!
//! Drains pending ledger records one at a time. Each record is either
//! skipped by a business rule, replicated at pro-rata size, or left pending
//! with one more attempt on its counter.

use crate::config::Config;
use crate::db::Database;
use crate::error::OrderError;
use crate::risk::{portfolio_value, pro_rata_value, RiskState};
use crate::services::balance::BalanceOracle;
use crate::services::data_api::DataFeed;
use crate::services::exchange::Exchange;
use crate::services::scheduler::sleep_or_shutdown;
use crate::services::stats::StatsService;
use crate::types::{OrderRequest, OrderType, TradeActivity, TradeSide};
use anyhow::{anyhow, bail, Result};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Wait after a ledger query fails before trying again
const STORE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Business-rule filters. A skipped trade is terminal, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    BelowThreshold,
    PositionLimit,
    NoPositionToSell,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BelowThreshold => write!(f, "below threshold"),
            SkipReason::PositionLimit => write!(f, "position limit"),
            SkipReason::NoPositionToSell => write!(f, "no position to sell"),
        }
    }
}

enum Replication {
    Executed(Duration),
    Skipped(SkipReason),
}

pub struct TradeExecutor {
    db: Arc<Database>,
    feed: Arc<dyn DataFeed>,
    balances: Arc<dyn BalanceOracle>,
    exchange: Arc<dyn Exchange>,
    stats: Arc<StatsService>,
    target_wallet: String,
    bot_wallet: String,
    retry_limit: i64,
    min_usdc_threshold: Decimal,
    max_position_limit_pct: Decimal,
    idle: Duration,
}

impl TradeExecutor {
    pub fn new(
        db: Arc<Database>,
        feed: Arc<dyn DataFeed>,
        balances: Arc<dyn BalanceOracle>,
        exchange: Arc<dyn Exchange>,
        stats: Arc<StatsService>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            feed,
            balances,
            exchange,
            stats,
            target_wallet: config.target_wallet.to_lowercase(),
            bot_wallet: config.bot_wallet.to_lowercase(),
            retry_limit: config.retry_limit,
            min_usdc_threshold: config.min_usdc_threshold,
            max_position_limit_pct: config.max_position_limit_pct,
            idle: config.executor_idle,
        }
    }

    /// Process every pending trade once, oldest first. Returns how many were
    /// handled.
    pub async fn cycle(&self) -> Result<usize> {
        let pending = self.db.pending_trades(&self.target_wallet, self.retry_limit).await?;
        let count = pending.len();

        for trade in pending {
            self.process(&trade).await?;
        }

        Ok(count)
    }

    /// Errors returned here come from the ledger itself; replication errors
    /// are recorded against the trade.
    ///
    /// The trade is claimed before any order goes out, so a ledger failure
    /// after a fill can never put the same order on the book twice. A failed
    /// attempt hands the claim back.
    async fn process(&self, trade: &TradeActivity) -> Result<()> {
        if trade.usdc_size < self.min_usdc_threshold {
            debug!(
                "[Executor] {} below threshold (${} < ${})",
                trade.transaction_hash, trade.usdc_size, self.min_usdc_threshold
            );
            return self.finish_skipped(trade, SkipReason::BelowThreshold).await;
        }

        if !self.db.mark_processed(&trade.transaction_hash).await? {
            warn!("[Executor] {} was claimed elsewhere", trade.transaction_hash);
            return Ok(());
        }

        match self.replicate(trade).await {
            Ok(Replication::Executed(elapsed)) => {
                info!(
                    "[Executor] Replicated {} {} in {}ms",
                    trade.side,
                    trade.transaction_hash,
                    elapsed.as_millis()
                );
                self.stats.trade_executed(trade.snapshot(), elapsed).await;
            }
            Ok(Replication::Skipped(reason)) => {
                info!("[Executor] Skipped {}: {}", trade.transaction_hash, reason);
                self.stats.trade_skipped(trade.snapshot(), reason.to_string()).await;
            }
            Err(e) => {
                self.stats.trade_failed(trade.snapshot(), e.to_string()).await;
                let attempts = self.db.increment_attempts(&trade.transaction_hash).await?;
                warn!(
                    "[Executor] Attempt {}/{} for {} failed: {:#}",
                    attempts, self.retry_limit, trade.transaction_hash, e
                );
                if attempts >= self.retry_limit {
                    error!(
                        "[Executor] Giving up on {} after {} attempts",
                        trade.transaction_hash, attempts
                    );
                }
            }
        }

        Ok(())
    }

    async fn finish_skipped(&self, trade: &TradeActivity, reason: SkipReason) -> Result<()> {
        if self.db.mark_processed(&trade.transaction_hash).await? {
            info!("[Executor] Skipped {}: {}", trade.transaction_hash, reason);
            self.stats.trade_skipped(trade.snapshot(), reason.to_string()).await;
        }
        Ok(())
    }

    async fn replicate(&self, trade: &TradeActivity) -> Result<Replication> {
        let started = Instant::now();

        let (bot_positions, target_positions, bot_balance, target_balance) = tokio::try_join!(
            self.feed.positions(&self.bot_wallet),
            self.feed.positions(&self.target_wallet),
            self.balances.usdc_balance(&self.bot_wallet),
            self.balances.usdc_balance(&self.target_wallet),
        )?;

        let proposed_value = pro_rata_value(trade.usdc_size, bot_balance, target_balance)
            .ok_or_else(|| anyhow!("target wallet has no capital to scale against"))?;

        let risk = RiskState {
            total_portfolio_value: portfolio_value(bot_balance, &bot_positions),
            current_position_value: bot_positions
                .iter()
                .filter(|p| p.condition_id == trade.condition_id)
                .map(|p| p.current_value)
                .sum(),
            proposed_value,
        };

        let target_held: Decimal = target_positions
            .iter()
            .filter(|p| p.asset == trade.asset)
            .map(|p| p.size)
            .sum();
        debug!(
            "[Executor] {}: bot ${} / target ${} (holds {}), proposed ${}, position {}% -> {}%",
            trade.transaction_hash,
            bot_balance,
            target_balance,
            target_held,
            proposed_value.round_dp(2),
            risk.current_pct().round_dp(2),
            risk.projected_pct().round_dp(2)
        );

        if risk.exceeds(self.max_position_limit_pct) {
            return Ok(Replication::Skipped(SkipReason::PositionLimit));
        }

        if trade.price <= Decimal::ZERO {
            bail!("invalid trade price {}", trade.price);
        }
        let pro_rata_shares = proposed_value / trade.price;

        let amount = match trade.side {
            TradeSide::Buy => pro_rata_shares,
            TradeSide::Sell => {
                let held: Decimal = bot_positions
                    .iter()
                    .filter(|p| p.asset == trade.asset)
                    .map(|p| p.size)
                    .sum();
                if held <= Decimal::ZERO {
                    return Ok(Replication::Skipped(SkipReason::NoPositionToSell));
                }
                pro_rata_shares.min(held)
            }
        };

        let order = OrderRequest {
            side: trade.side,
            asset: trade.asset.clone(),
            amount,
            price: trade.price,
            order_type: OrderType::Fok,
        };

        let response = self.exchange.place_order(&order).await?;
        if !response.success {
            let message = response.error.as_deref().unwrap_or("order not filled");
            return Err(OrderError::from_message(message).into());
        }

        Ok(Replication::Executed(started.elapsed()))
    }

    /// Drain the ledger continuously until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("[Executor] Started (retry limit {})", self.retry_limit);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.cycle().await {
                Ok(0) => {
                    debug!("[Executor] No pending trades");
                    if self.idle.is_zero() {
                        tokio::task::yield_now().await;
                    } else if sleep_or_shutdown(self.idle, &mut shutdown).await {
                        break;
                    }
                }
                Ok(n) => debug!("[Executor] Handled {} trades", n),
                Err(e) => {
                    error!("[Executor] Ledger error: {:#}", e);
                    if sleep_or_shutdown(STORE_ERROR_BACKOFF, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("[Executor] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::db::sample_trade;
    use crate::services::fakes::{position, FakeBalances, FakeExchange, FakeFeed, MemoryStatsStore};
    use crate::services::stats::TradeEventKind;
    use crate::types::{NewTrade, OrderBook, OrderResponse};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    struct Harness {
        executor: TradeExecutor,
        db: Arc<Database>,
        feed: Arc<FakeFeed>,
        balances: Arc<FakeBalances>,
        exchange: Arc<FakeExchange>,
        stats: Arc<StatsService>,
        config: Config,
    }

    async fn harness() -> Harness {
        let config = test_config();
        let db = Arc::new(Database::in_memory().await.unwrap());
        let feed = Arc::new(FakeFeed::default());
        let balances = Arc::new(FakeBalances::default());
        let exchange = Arc::new(FakeExchange::default());
        let stats = Arc::new(StatsService::new(Arc::new(MemoryStatsStore::default())));
        let executor = TradeExecutor::new(
            db.clone(),
            feed.clone(),
            balances.clone(),
            exchange.clone(),
            stats.clone(),
            &config,
        );
        Harness { executor, db, feed, balances, exchange, stats, config }
    }

    async fn kinds(stats: &StatsService) -> Vec<(TradeEventKind, Option<String>)> {
        stats.events().await.into_iter().map(|e| (e.kind, e.reason)).collect()
    }

    #[tokio::test]
    async fn test_below_threshold_skips_without_collaborator_calls() {
        let h = harness().await;
        h.db.insert_trade_if_absent(&sample_trade("0xsmall", dec!(5))).await.unwrap();

        assert_eq!(h.executor.cycle().await.unwrap(), 1);

        let stored = h.db.get_trade("0xsmall").await.unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.attempt_count, 0);
        assert_eq!(
            kinds(&h.stats).await,
            vec![(TradeEventKind::Skipped, Some("below threshold".to_string()))]
        );
        assert_eq!(h.feed.position_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.balances.calls.load(Ordering::SeqCst), 0);
        assert!(h.exchange.orders().is_empty());
    }

    #[tokio::test]
    async fn test_position_limit_skip() {
        let h = harness().await;
        // Bot: 900 USDC + 100 in this market = 1000 total.
        // Target: 1700 + 100 traded, so proposed = 100 * 900 / 1800 = 50.
        // (100 + 50) / 1000 = 15% > 10%
        h.balances.set(&h.config.bot_wallet, dec!(900));
        h.balances.set(&h.config.target_wallet, dec!(1700));
        h.feed.set_positions(
            &h.config.bot_wallet,
            vec![position("4242", "0xcondition", dec!(200), dec!(0.5))],
        );
        h.db.insert_trade_if_absent(&sample_trade("0xbig", dec!(100))).await.unwrap();

        h.executor.cycle().await.unwrap();

        let stored = h.db.get_trade("0xbig").await.unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(
            kinds(&h.stats).await,
            vec![(TradeEventKind::Skipped, Some("position limit".to_string()))]
        );
        assert!(h.exchange.orders().is_empty());
    }

    #[tokio::test]
    async fn test_buy_is_replicated_at_pro_rata_size() {
        let h = harness().await;
        h.balances.set(&h.config.bot_wallet, dec!(1000));
        h.balances.set(&h.config.target_wallet, dec!(9000));
        h.db.insert_trade_if_absent(&sample_trade("0xbuy", dec!(100))).await.unwrap();

        h.executor.cycle().await.unwrap();

        let orders = h.exchange.orders();
        assert_eq!(orders.len(), 1);
        let expected_value = pro_rata_value(dec!(100), dec!(1000), dec!(9000)).unwrap();
        assert_eq!(orders[0].side, TradeSide::Buy);
        assert_eq!(orders[0].order_type, OrderType::Fok);
        assert_eq!(orders[0].price, dec!(0.5));
        assert_eq!(orders[0].amount, expected_value / dec!(0.5));

        let stored = h.db.get_trade("0xbuy").await.unwrap().unwrap();
        assert!(stored.processed);
        let events = h.stats.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TradeEventKind::Executed);
        assert!(events[0].execution_time_ms.is_some());
    }

    fn sell_trade(hash: &str) -> NewTrade {
        // 200 shares @ 0.5 = $100
        let mut trade = sample_trade(hash, dec!(100));
        trade.side = TradeSide::Sell;
        trade
    }

    #[tokio::test]
    async fn test_sell_is_scaled_pro_rata() {
        let h = harness().await;
        h.balances.set(&h.config.bot_wallet, dec!(10000));
        h.balances.set(&h.config.target_wallet, dec!(90000));
        h.feed.set_positions(
            &h.config.bot_wallet,
            vec![position("4242", "0xcondition", dec!(100), dec!(0.5))],
        );
        h.db.insert_trade_if_absent(&sell_trade("0xsell")).await.unwrap();

        h.executor.cycle().await.unwrap();

        let orders = h.exchange.orders();
        assert_eq!(orders.len(), 1);
        let expected = pro_rata_value(dec!(100), dec!(10000), dec!(90000)).unwrap() / dec!(0.5);
        assert_eq!(orders[0].side, TradeSide::Sell);
        assert_eq!(orders[0].amount, expected);
        assert!(orders[0].amount < dec!(23));
    }

    #[tokio::test]
    async fn test_sell_is_capped_at_bot_holding() {
        let h = harness().await;
        h.balances.set(&h.config.bot_wallet, dec!(10000));
        h.balances.set(&h.config.target_wallet, dec!(90000));
        // Pro-rata would sell ~22.2 shares; the bot only holds 10
        h.feed.set_positions(
            &h.config.bot_wallet,
            vec![position("4242", "0xcondition", dec!(10), dec!(0.5))],
        );
        h.db.insert_trade_if_absent(&sell_trade("0xsell")).await.unwrap();

        h.executor.cycle().await.unwrap();

        let orders = h.exchange.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, TradeSide::Sell);
        assert_eq!(orders[0].amount, dec!(10));
    }

    #[tokio::test]
    async fn test_sell_without_holding_is_skipped() {
        let h = harness().await;
        h.balances.set(&h.config.bot_wallet, dec!(1000));
        h.balances.set(&h.config.target_wallet, dec!(9000));
        h.db.insert_trade_if_absent(&sell_trade("0xsell")).await.unwrap();

        h.executor.cycle().await.unwrap();

        assert!(h.exchange.orders().is_empty());
        assert!(h.db.get_trade("0xsell").await.unwrap().unwrap().processed);
        assert_eq!(
            kinds(&h.stats).await,
            vec![(TradeEventKind::Skipped, Some("no position to sell".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_always_failing_trade_is_abandoned_after_retry_limit() {
        let h = harness().await;
        *h.balances.fail.lock().unwrap() = true;
        h.db.insert_trade_if_absent(&sample_trade("0xdoomed", dec!(100))).await.unwrap();

        for _ in 0..5 {
            h.executor.cycle().await.unwrap();
        }

        let stored = h.db.get_trade("0xdoomed").await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, h.config.retry_limit);
        assert!(!stored.processed);
        assert!(h.db.pending_trades(&h.config.target_wallet, h.config.retry_limit).await.unwrap().is_empty());

        let failed = h
            .stats
            .events()
            .await
            .iter()
            .filter(|e| e.kind == TradeEventKind::Failed)
            .count();
        assert_eq!(failed as i64, h.config.retry_limit);
    }

    #[tokio::test]
    async fn test_unsuccessful_order_counts_as_failed_attempt() {
        let h = harness().await;
        h.balances.set(&h.config.bot_wallet, dec!(1000));
        h.balances.set(&h.config.target_wallet, dec!(9000));
        h.exchange.push_reply(OrderResponse {
            success: false,
            order_id: None,
            error: Some("not enough balance / allowance".to_string()),
        });
        h.db.insert_trade_if_absent(&sample_trade("0xreject", dec!(100))).await.unwrap();

        h.executor.cycle().await.unwrap();

        let stored = h.db.get_trade("0xreject").await.unwrap().unwrap();
        assert!(!stored.processed);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(
            kinds(&h.stats).await,
            vec![(TradeEventKind::Failed, Some("insufficient balance".to_string()))]
        );

        // Second cycle succeeds with the default reply
        h.executor.cycle().await.unwrap();
        assert!(h.db.get_trade("0xreject").await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn test_zero_target_capital_is_a_failure() {
        let h = harness().await;
        h.balances.set(&h.config.bot_wallet, dec!(1000));
        h.db.insert_trade_if_absent(&sample_trade("0xodd", dec!(10))).await.unwrap();
        // Negative target balance cannot happen on chain; force the degenerate sum
        h.balances.set(&h.config.target_wallet, dec!(-10));

        h.executor.cycle().await.unwrap();

        let stored = h.db.get_trade("0xodd").await.unwrap().unwrap();
        assert!(!stored.processed);
        assert_eq!(stored.attempt_count, 1);
        assert!(h.exchange.orders().is_empty());
    }

    /// Fills every order, then takes the ledger down
    struct LedgerDroppingExchange {
        db: Arc<Database>,
        orders: std::sync::Mutex<Vec<OrderRequest>>,
    }

    #[async_trait]
    impl Exchange for LedgerDroppingExchange {
        async fn order_book(&self, _asset: &str) -> Result<OrderBook> {
            Ok(OrderBook::default())
        }

        async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
            self.orders.lock().unwrap().push(order.clone());
            self.db.close().await;
            Ok(OrderResponse {
                success: true,
                order_id: Some("filled".to_string()),
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn test_ledger_outage_after_fill_never_resubmits() {
        let config = test_config();
        let db = Arc::new(Database::in_memory().await.unwrap());
        let feed = Arc::new(FakeFeed::default());
        let balances = Arc::new(FakeBalances::default());
        balances.set(&config.bot_wallet, dec!(1000));
        balances.set(&config.target_wallet, dec!(9000));
        let exchange = Arc::new(LedgerDroppingExchange {
            db: db.clone(),
            orders: std::sync::Mutex::new(Vec::new()),
        });
        let stats = Arc::new(StatsService::new(Arc::new(MemoryStatsStore::default())));
        let executor = TradeExecutor::new(db.clone(), feed, balances, exchange.clone(), stats.clone(), &config);
        db.insert_trade_if_absent(&sample_trade("0xonce", dec!(100))).await.unwrap();

        // The fill is accounted even though the ledger is gone afterwards
        assert_eq!(executor.cycle().await.unwrap(), 1);
        let events = stats.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TradeEventKind::Executed);

        // Later drains fail on the ledger and place nothing
        for _ in 0..3 {
            assert!(executor.cycle().await.is_err());
        }
        assert_eq!(exchange.orders.lock().unwrap().len(), 1);
    }
}
