//! Polymarket Copy Trading Bot
//!
//! Configured entirely from the environment (see `Config::from_env`).

use anyhow::{Context, Result};
use polymarket_copy_bot::services::{
    AutoRedeemer, ClobExchange, DataApiClient, JsonStatsStore, StatsService, StopLossGuard, TradeExecutor,
    TradeMonitor, UsdcBalanceOracle,
};
use polymarket_copy_bot::{Config, Database};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides, e.g. RUST_LOG=polymarket_copy_bot=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env()?;
    print_banner(&config);

    let db = Arc::new(
        Database::new(&config.database_path)
            .await
            .context("Failed to open trade ledger")?,
    );
    let recorded = db.count_trades(&config.target_wallet).await?;
    let abandoned = db.abandoned_trades(&config.target_wallet, config.retry_limit).await?;
    info!("Ledger holds {} trades for the target wallet", recorded);
    if !abandoned.is_empty() {
        warn!(
            "{} trades exhausted their {} attempts and will not be retried",
            abandoned.len(),
            config.retry_limit
        );
        for trade in &abandoned {
            warn!(
                "  {} {} {} @ {} (${})",
                trade.transaction_hash, trade.side, trade.size, trade.price, trade.usdc_size
            );
        }
    }

    let exchange = Arc::new(ClobExchange::connect(&config).await?);
    let feed = Arc::new(DataApiClient::new(&config.data_api_url, config.http_timeout)?);
    let balances = Arc::new(UsdcBalanceOracle::new(
        &config.polygon_rpc_url,
        &config.usdc_contract,
        config.http_timeout,
    )?);

    let stats = Arc::new(StatsService::new(Arc::new(JsonStatsStore::new(&config.stats_dir))));
    if let Err(e) = stats.start().await {
        warn!("[Stats] Could not restore persisted stats: {:#}", e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = Arc::new(TradeMonitor::new(db.clone(), feed.clone(), stats.clone(), &config));
    tokio::spawn(monitor.run(config.fetch_interval, shutdown_rx.clone()));

    let executor = Arc::new(TradeExecutor::new(
        db.clone(),
        feed.clone(),
        balances,
        exchange.clone(),
        stats.clone(),
        &config,
    ));
    tokio::spawn(executor.run(shutdown_rx.clone()));

    let guard = Arc::new(StopLossGuard::new(feed.clone(), exchange.clone(), stats.clone(), &config));
    tokio::spawn(guard.run(config.stop_loss_interval, shutdown_rx.clone()));

    let redeemer = Arc::new(AutoRedeemer::new(feed, exchange, &config));
    tokio::spawn(redeemer.run(config.redemption_interval, shutdown_rx.clone()));

    tokio::spawn(stats.clone().run_autosave(config.stats_save_interval, shutdown_rx.clone()));
    tokio::spawn(stats.clone().run_reporter(config.stats_report_interval, shutdown_rx));

    info!("All services started. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Err(e) = stats.stop().await {
        error!("[Stats] Failed to save final snapshot: {:#}", e);
    }
    db.close().await;

    Ok(())
}

fn print_banner(config: &Config) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║       POLYMARKET COPY TRADING BOT                            ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Target wallet: {:<44} ║", config.target_wallet);
    println!("║  Bot wallet:    {:<44} ║", config.bot_wallet);
    println!("║  Min trade:     ${:<43} ║", config.min_usdc_threshold);
    println!("║  Max position:  {:<44} ║", format!("{}%", config.max_position_limit_pct));
    println!("║  Stop-loss:     ${:<43} ║", config.stop_loss_price);
    println!("║  Retry limit:   {:<44} ║", config.retry_limit);
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}
