//! Redemption of settled positions

use crate::config::Config;
use crate::services::data_api::DataFeed;
use crate::services::exchange::{Exchange, RedemptionMethod};
use crate::services::scheduler::run_every;
use crate::types::Position;
use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Pause between redemptions to stay under exchange rate limits
const REDEMPTION_PAUSE: Duration = Duration::from_secs(2);

/// Tally of one redemption sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedemptionSummary {
    pub redeemed: usize,
    pub manual: usize,
    pub failed: usize,
}

pub struct AutoRedeemer {
    feed: Arc<dyn DataFeed>,
    exchange: Arc<dyn Exchange>,
    method: RedemptionMethod,
    bot_wallet: String,
    pause: Duration,
}

impl AutoRedeemer {
    /// The exchange's redemption capability is resolved here, once
    pub fn new(feed: Arc<dyn DataFeed>, exchange: Arc<dyn Exchange>, config: &Config) -> Self {
        let method = exchange.redemption_method();
        if method == RedemptionMethod::Manual {
            warn!("[Redeemer] Exchange has no redemption endpoint; settled positions need manual redemption");
        }

        Self {
            feed,
            exchange,
            method,
            bot_wallet: config.bot_wallet.to_lowercase(),
            pause: REDEMPTION_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn method(&self) -> RedemptionMethod {
        self.method
    }

    /// Redeem every settled position the bot still holds
    pub async fn redeem_all(&self) -> Result<RedemptionSummary> {
        let positions = self.feed.positions(&self.bot_wallet).await?;
        let redeemable: Vec<&Position> = positions
            .iter()
            .filter(|p| p.redeemable && p.size > Decimal::ZERO)
            .collect();

        let mut summary = RedemptionSummary::default();
        if redeemable.is_empty() {
            info!("[Redeemer] No redeemable positions");
            return Ok(summary);
        }

        info!("[Redeemer] Found {} redeemable positions", redeemable.len());

        for (i, position) in redeemable.iter().enumerate() {
            info!(
                "[Redeemer] {} ({}): {} shares worth ${}",
                position.title, position.outcome, position.size, position.current_value
            );

            let result = match self.method {
                RedemptionMethod::Redeem => self.exchange.redeem_position(&position.asset).await.map(Some),
                RedemptionMethod::Settle => self.exchange.settle_position(&position.asset).await.map(Some),
                RedemptionMethod::Manual => Ok(None),
            };

            match result {
                Ok(Some(reference)) => {
                    info!("[Redeemer] Redeemed {}: {}", position.asset, reference);
                    summary.redeemed += 1;
                }
                Ok(None) => {
                    warn!(
                        "[Redeemer] Manual redemption required for asset {} at https://polymarket.com/",
                        position.asset
                    );
                    summary.manual += 1;
                }
                Err(e) => {
                    error!("[Redeemer] Failed to redeem {}: {:#}", position.asset, e);
                    summary.failed += 1;
                }
            }

            if i + 1 < redeemable.len() {
                tokio::time::sleep(self.pause).await;
            }
        }

        info!(
            "[Redeemer] Sweep done: {} redeemed, {} manual, {} failed",
            summary.redeemed, summary.manual, summary.failed
        );
        Ok(summary)
    }

    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) {
        run_every("Redeemer", interval, shutdown, || {
            let redeemer = self.clone();
            async move { redeemer.redeem_all().await.map(|_| ()) }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::services::fakes::{position, FakeExchange, FakeFeed};
    use rust_decimal_macros::dec;

    fn settled(asset: &str, size: Decimal) -> Position {
        let mut p = position(asset, "0xc", size, dec!(1));
        p.redeemable = true;
        p
    }

    fn redeemer(method: RedemptionMethod) -> (AutoRedeemer, Arc<FakeFeed>, Arc<FakeExchange>) {
        let config = test_config();
        let feed = Arc::new(FakeFeed::default());
        feed.set_positions(
            &config.bot_wallet,
            vec![
                settled("1", dec!(10)),
                position("2", "0xd", dec!(10), dec!(0.5)),
                settled("3", dec!(4)),
                settled("4", Decimal::ZERO),
            ],
        );
        let exchange = Arc::new(FakeExchange::new(method));
        let redeemer = AutoRedeemer::new(feed.clone(), exchange.clone(), &config).with_pause(Duration::ZERO);
        (redeemer, feed, exchange)
    }

    #[tokio::test]
    async fn test_settle_only_exchange_settles_each_redeemable_position_once() {
        let (redeemer, _feed, exchange) = redeemer(RedemptionMethod::Settle);
        assert_eq!(redeemer.method(), RedemptionMethod::Settle);

        let summary = redeemer.redeem_all().await.unwrap();

        assert_eq!(*exchange.settled.lock().unwrap(), vec!["1".to_string(), "3".to_string()]);
        assert!(exchange.redeemed.lock().unwrap().is_empty());
        assert_eq!(summary, RedemptionSummary { redeemed: 2, manual: 0, failed: 0 });
    }

    #[tokio::test]
    async fn test_redeem_capability_takes_priority() {
        let (redeemer, _feed, exchange) = redeemer(RedemptionMethod::Redeem);

        redeemer.redeem_all().await.unwrap();

        assert_eq!(exchange.redeemed.lock().unwrap().len(), 2);
        assert!(exchange.settled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_fallback_makes_no_calls() {
        let (redeemer, _feed, exchange) = redeemer(RedemptionMethod::Manual);

        let summary = redeemer.redeem_all().await.unwrap();

        assert_eq!(summary, RedemptionSummary { redeemed: 0, manual: 2, failed: 0 });
        assert!(exchange.redeemed.lock().unwrap().is_empty());
        assert!(exchange.settled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_wallet_is_a_no_op() {
        let config = test_config();
        let feed = Arc::new(FakeFeed::default());
        let exchange = Arc::new(FakeExchange::new(RedemptionMethod::Settle));
        let redeemer = AutoRedeemer::new(feed, exchange.clone(), &config);

        assert_eq!(redeemer.redeem_all().await.unwrap(), RedemptionSummary::default());
        assert!(exchange.settled.lock().unwrap().is_empty());
    }
}
