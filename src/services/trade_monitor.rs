//! Target wallet activity poller
//!
//! Reads the target's activity feed, keeps recent trades and appends every
//! transaction hash it has not seen before to the ledger.

use crate::config::Config;
use crate::db::Database;
use crate::services::data_api::DataFeed;
use crate::services::scheduler::run_every;
use crate::services::stats::StatsService;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct TradeMonitor {
    db: Arc<Database>,
    feed: Arc<dyn DataFeed>,
    stats: Arc<StatsService>,
    target_wallet: String,
    max_trade_age_secs: i64,
}

impl TradeMonitor {
    pub fn new(db: Arc<Database>, feed: Arc<dyn DataFeed>, stats: Arc<StatsService>, config: &Config) -> Self {
        Self {
            db,
            feed,
            stats,
            target_wallet: config.target_wallet.to_lowercase(),
            max_trade_age_secs: config.max_trade_age_hours * 3600,
        }
    }

    /// Poll the activity feed once. Returns the number of newly recorded trades.
    ///
    /// Entries are handled one at a time so two sightings of the same hash in
    /// one response cannot race each other into the ledger.
    pub async fn poll(&self) -> Result<usize> {
        let entries = self.feed.activity(&self.target_wallet).await?;
        let cutoff = Utc::now().timestamp() - self.max_trade_age_secs;

        let mut recorded = 0;
        for entry in entries.iter().filter(|e| e.is_trade()) {
            if entry.timestamp < cutoff {
                continue;
            }

            let Some(trade) = entry.to_new_trade(&self.target_wallet) else {
                debug!("[Monitor] Ignoring malformed entry {:?}", entry.transaction_hash);
                continue;
            };

            if self.db.insert_trade_if_absent(&trade).await? {
                info!(
                    "[Monitor] New trade {}: {} {} @ {} (${}) {}",
                    trade.transaction_hash,
                    trade.side,
                    trade.size,
                    trade.price,
                    trade.usdc_size,
                    trade.title.as_deref().unwrap_or("")
                );
                self.stats.trade_detected(trade.snapshot()).await;
                recorded += 1;
            }
        }

        if recorded > 0 {
            debug!("[Monitor] Recorded {} new trades", recorded);
        }
        Ok(recorded)
    }

    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) {
        info!("[Monitor] Watching {}", self.target_wallet);

        run_every("Monitor", interval, shutdown, || {
            let monitor = self.clone();
            async move { monitor.poll().await.map(|_| ()) }
        })
        .await;
    }
}
