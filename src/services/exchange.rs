//! Exchange session: order books, order placement and redemption capability

use crate::config::Config;
use crate::error::{FetchError, OrderError};
use crate::types::{lot_size, OrderBook, OrderLevel, OrderRequest, OrderResponse, OrderType, TradeSide};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, info, warn, Instrument};

use alloy::primitives::U256;
use alloy::signers::{local::PrivateKeySigner, Signer};
use polymarket_client_sdk::auth::state::Authenticated;
use polymarket_client_sdk::auth::Normal;
use polymarket_client_sdk::clob::types::{Amount, OrderType as ClobOrderType, Side as ClobSide, SignatureType};
use polymarket_client_sdk::clob::{Client as ClobClient, Config as ClobConfig};

/// Polygon chain ID for signing
const POLYGON_CHAIN_ID: u64 = 137;

/// How settled positions can be converted back to collateral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedemptionMethod {
    /// Dedicated redeem call
    Redeem,
    /// Settlement call
    Settle,
    /// No automated path; the operator redeems by hand
    Manual,
}

/// Exchange operations the control loops depend on
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Live order book for an asset
    async fn order_book(&self, asset: &str) -> Result<OrderBook>;

    /// Build, sign and submit a market order priced at `order.price`
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse>;

    /// Which redemption mechanism this session supports
    fn redemption_method(&self) -> RedemptionMethod {
        RedemptionMethod::Manual
    }

    async fn redeem_position(&self, asset: &str) -> Result<String> {
        bail!("Redeem not supported for asset {}", asset)
    }

    async fn settle_position(&self, asset: &str) -> Result<String> {
        bail!("Settle not supported for asset {}", asset)
    }
}

#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    #[serde(default)]
    bids: Vec<OrderbookLevel>,
    #[serde(default)]
    asks: Vec<OrderbookLevel>,
}

#[derive(Debug, Deserialize)]
struct OrderbookLevel {
    price: String,
    size: String,
}

impl OrderbookResponse {
    fn into_book(self) -> Result<OrderBook> {
        Ok(OrderBook {
            bids: parse_levels(self.bids)?,
            asks: parse_levels(self.asks)?,
        })
    }
}

fn parse_levels(levels: Vec<OrderbookLevel>) -> Result<Vec<OrderLevel>> {
    levels
        .into_iter()
        .map(|level| {
            Ok(OrderLevel {
                price: Decimal::from_str(&level.price)
                    .with_context(|| format!("Invalid book price: {}", level.price))?,
                size: Decimal::from_str(&level.size)
                    .with_context(|| format!("Invalid book size: {}", level.size))?,
            })
        })
        .collect()
}

/// Authenticated CLOB session for the bot wallet
pub struct ClobExchange {
    client: ClobClient<Authenticated<Normal>>,
    signer: PrivateKeySigner,
    http: reqwest::Client,
    clob_url: String,
}

impl ClobExchange {
    /// Derive API credentials and open an authenticated session
    pub async fn connect(config: &Config) -> Result<Self> {
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .context("Failed to parse private key")?;
        let signer = signer.with_chain_id(Some(POLYGON_CHAIN_ID));

        let clob_config = ClobConfig::builder().use_server_time(true).build();

        // Credential derivation is chatty; keep it in its own span at debug level
        let client = async {
            debug!("Deriving CLOB API credentials...");
            let client = ClobClient::new(&config.clob_url, clob_config)
                .context("Failed to create CLOB client")?
                .authentication_builder(&signer)
                .signature_type(SignatureType::GnosisSafe)
                .authenticate()
                .await
                .context("Failed to authenticate with CLOB")?;
            Ok::<_, anyhow::Error>(client)
        }
        .instrument(tracing::debug_span!("clob_auth"))
        .await?;

        info!(
            "CLOB session ready for signer {:?} (bot wallet {})",
            signer.address(),
            config.bot_wallet
        );

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            signer,
            http,
            clob_url: config.clob_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_book(&self, asset: &str) -> Result<OrderBook> {
        let url = format!("{}/book?token_id={}", self.clob_url, asset);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body }.into());
        }

        let book: OrderbookResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        book.into_book()
    }
}

#[async_trait]
impl Exchange for ClobExchange {
    async fn order_book(&self, asset: &str) -> Result<OrderBook> {
        self.fetch_book(asset)
            .await
            .with_context(|| format!("Failed to fetch order book for {}", asset))
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
        let token_id = U256::from_str_radix(&order.asset, 10).context("Failed to parse token ID")?;

        // The CLOB rejects prices finer than the tick and amounts beyond 2 decimals
        let price = lot_size(order.price);
        let shares = lot_size(order.amount);
        if shares.is_zero() {
            bail!("Order size {} rounds to zero", order.amount);
        }

        // Buys are sized in USDC, sells in shares
        let (side, amount) = match order.side {
            TradeSide::Buy => (
                ClobSide::Buy,
                Amount::usdc(lot_size(shares * price)).context("Failed to create USDC amount")?,
            ),
            TradeSide::Sell => (
                ClobSide::Sell,
                Amount::shares(shares).context("Failed to create shares amount")?,
            ),
        };
        let order_type = match order.order_type {
            OrderType::Fok => ClobOrderType::FOK,
            OrderType::Fak => ClobOrderType::FAK,
        };

        debug!(
            "Placing {} {}: token={}, price={}, shares={}",
            order.order_type, order.side, order.asset, price, shares
        );

        let signable = self
            .client
            .market_order()
            .token_id(token_id)
            .amount(amount)
            .side(side)
            .price(price)
            .order_type(order_type)
            .build()
            .await
            .context("Failed to build order")?;

        let signed_order = self
            .client
            .sign(&self.signer, signable)
            .await
            .context("Failed to sign order")?;

        let response = match self.client.post_order(signed_order).await {
            Ok(response) => response,
            Err(e) => {
                let rejection = OrderError::from_message(&e.to_string());
                if rejection.is_retryable() {
                    warn!("Order for {} rate limited", order.asset);
                } else {
                    warn!("Order for {} rejected: {}", order.asset, e);
                }
                return Err(rejection.into());
            }
        };

        let order_id = Some(response.order_id.clone()).filter(|id| !id.is_empty());
        info!(
            "Order {} {} {} @ {}: success={} id={:?}",
            order.side, shares, order.asset, price, response.success, order_id
        );

        Ok(OrderResponse {
            success: response.success,
            order_id,
            error: response.error_msg.clone(),
        })
    }
}
