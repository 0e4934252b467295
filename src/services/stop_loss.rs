//! Stop-loss liquidation
//!
//! Walks the bot's live positions on a fixed interval. Any position priced
//! below the stop-loss line is sold into the best bid in fill-or-kill chunks,
//! refreshing the book between chunks, until it is gone or the book dries up.

use crate::config::Config;
use crate::services::data_api::DataFeed;
use crate::services::exchange::Exchange;
use crate::services::scheduler::run_every;
use crate::services::stats::StatsService;
use crate::types::{lot_size, OrderRequest, OrderType, Position, TradeSide, TradeSnapshot};
use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause before refetching the book between chunks
const REFETCH_PAUSE: Duration = Duration::from_secs(1);

/// Result of walking the book for one position
#[derive(Debug, Clone, PartialEq)]
pub struct Liquidation {
    pub total_sold: Decimal,
    /// Bid price of the last chunk that filled
    pub last_price: Decimal,
    pub failure: Option<String>,
}

pub struct StopLossGuard {
    feed: Arc<dyn DataFeed>,
    exchange: Arc<dyn Exchange>,
    stats: Arc<StatsService>,
    bot_wallet: String,
    stop_loss_price: Decimal,
    refetch_pause: Duration,
}

impl StopLossGuard {
    pub fn new(feed: Arc<dyn DataFeed>, exchange: Arc<dyn Exchange>, stats: Arc<StatsService>, config: &Config) -> Self {
        Self {
            feed,
            exchange,
            stats,
            bot_wallet: config.bot_wallet.to_lowercase(),
            stop_loss_price: config.stop_loss_price,
            refetch_pause: REFETCH_PAUSE,
        }
    }

    pub fn with_refetch_pause(mut self, pause: Duration) -> Self {
        self.refetch_pause = pause;
        self
    }

    /// Check every open position once and liquidate the ones below the line.
    /// Returns the number of positions that triggered.
    pub async fn check_and_sell(&self) -> Result<usize> {
        let positions = self.feed.positions(&self.bot_wallet).await?;

        let triggered: Vec<&Position> = positions
            .iter()
            .filter(|p| p.size > Decimal::ZERO && !p.redeemable)
            .filter(|p| p.cur_price < self.stop_loss_price)
            .filter(|p| {
                let sellable = !lot_size(p.size).is_zero();
                if !sellable {
                    debug!("[Stop-Loss] {} holds {} shares, below one lot", p.asset, p.size);
                }
                sellable
            })
            .collect();

        for position in &triggered {
            warn!(
                "[Stop-Loss] Triggered for {} ({}): price {} < {}, size {}",
                position.title, position.outcome, position.cur_price, self.stop_loss_price, position.size
            );

            // One position's failure never blocks the rest
            if let Err(e) = self.liquidate(position).await {
                error!("[Stop-Loss] Liquidation of {} failed: {:#}", position.asset, e);
                self.stats
                    .trade_failed(exposure(position), format!("stop-loss: {}", e))
                    .await;
            }
        }

        Ok(triggered.len())
    }

    async fn liquidate(&self, position: &Position) -> Result<()> {
        let started = Instant::now();
        let book = self.exchange.order_book(&position.asset).await?;

        let Some(best) = book.best_bid() else {
            warn!("[Stop-Loss] No bids for {}, position stays exposed", position.asset);
            self.stats.trade_failed(exposure(position), "no bids").await;
            return Ok(());
        };

        let result = self.walk_book(position, best.price, best.size).await;

        if result.total_sold > Decimal::ZERO {
            info!(
                "[Stop-Loss] Sold {} of {} shares of {} (last bid {})",
                result.total_sold, position.size, position.asset, result.last_price
            );
            self.stats
                .trade_executed(
                    TradeSnapshot::sell(&position.asset, result.total_sold, result.last_price),
                    started.elapsed(),
                )
                .await;
        }

        if let Some(reason) = result.failure {
            let unsold = position.size - result.total_sold;
            warn!("[Stop-Loss] {} stopped with {} unsold: {}", position.asset, unsold, reason);
            self.stats
                .trade_failed(TradeSnapshot::sell(&position.asset, unsold, position.cur_price), reason)
                .await;
        }

        Ok(())
    }

    /// Greedy best-bid walk. Each chunk is fill-or-kill for
    /// `min(remaining, bid size)` at the bid price, cut down to whole lots.
    /// A remainder smaller than one lot is left in place.
    async fn walk_book(&self, position: &Position, mut price: Decimal, mut depth: Decimal) -> Liquidation {
        let mut remaining = position.size;
        let mut result = Liquidation {
            total_sold: Decimal::ZERO,
            last_price: price,
            failure: None,
        };

        while !lot_size(remaining).is_zero() {
            let chunk = lot_size(remaining.min(depth));
            if chunk <= Decimal::ZERO {
                result.failure = Some("stop-loss: best bid has no size".to_string());
                break;
            }

            let order = OrderRequest {
                side: TradeSide::Sell,
                asset: position.asset.clone(),
                amount: chunk,
                price,
                order_type: OrderType::Fok,
            };

            info!("[Stop-Loss] Selling {} shares of {} at {}", chunk, position.asset, price);
            match self.exchange.place_order(&order).await {
                Ok(response) if response.success => {
                    remaining -= chunk;
                    result.total_sold += chunk;
                    result.last_price = price;
                }
                Ok(response) => {
                    result.failure = Some(format!(
                        "stop-loss: order not filled: {}",
                        response.error.unwrap_or_else(|| "unknown".to_string())
                    ));
                    break;
                }
                Err(e) => {
                    result.failure = Some(format!("stop-loss: {}", e));
                    break;
                }
            }

            if lot_size(remaining).is_zero() {
                break;
            }

            tokio::time::sleep(self.refetch_pause).await;
            match self.exchange.order_book(&position.asset).await {
                Ok(book) => match book.best_bid() {
                    Some(next) => {
                        price = next.price;
                        depth = next.size;
                    }
                    None => {
                        info!("[Stop-Loss] Book for {} is empty, accepting partial fill", position.asset);
                        break;
                    }
                },
                Err(e) => {
                    result.failure = Some(format!("stop-loss: book refetch failed: {}", e));
                    break;
                }
            }
        }

        result
    }

    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) {
        info!(
            "[Stop-Loss] Protection active: threshold {}, interval {:?}",
            self.stop_loss_price, interval
        );

        run_every("Stop-Loss", interval, shutdown, || {
            let guard = self.clone();
            async move { guard.check_and_sell().await.map(|_| ()) }
        })
        .await;
    }
}

/// Whole position at its mark price, for failure events
fn exposure(position: &Position) -> TradeSnapshot {
    TradeSnapshot::sell(&position.asset, position.size, position.cur_price)
}
