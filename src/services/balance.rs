//! USDC balance oracle over Polygon JSON-RPC

use crate::error::FetchError;
use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

/// USDC has 6 decimals
const USDC_DECIMALS: u32 = 6;

sol! {
    function balanceOf(address owner) external view returns (uint256);
}

/// Source of wallet USDC balances
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn usdc_balance(&self, wallet: &str) -> Result<Decimal>;
}

/// Reads ERC-20 `balanceOf` through `eth_call`
pub struct UsdcBalanceOracle {
    client: reqwest::Client,
    rpc_url: String,
    usdc_contract: Address,
}

impl UsdcBalanceOracle {
    pub fn new(rpc_url: &str, usdc_contract: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let usdc_contract = Address::from_str(usdc_contract).context("Invalid USDC contract address")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            usdc_contract,
        })
    }
}

#[async_trait]
impl BalanceOracle for UsdcBalanceOracle {
    async fn usdc_balance(&self, wallet: &str) -> Result<Decimal> {
        let owner = Address::from_str(wallet).with_context(|| format!("Invalid wallet address: {}", wallet))?;
        let calldata = format!("0x{}", hex::encode(balanceOfCall { owner }.abi_encode()));

        let rpc_payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_call",
            "params": [{
                "to": format!("{:?}", self.usdc_contract),
                "data": calldata,
            }, "latest"],
            "id": 1
        });

        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&rpc_payload)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))
            .with_context(|| format!("Balance query failed for {}", wallet))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        if let Some(error) = json.get("error") {
            return Err(FetchError::Rpc(error.to_string()).into());
        }

        let result = json["result"]
            .as_str()
            .ok_or_else(|| FetchError::Rpc("missing result".to_string()))?;

        scale_raw_balance(result)
    }
}

/// Convert a hex-encoded raw token amount into whole USDC
pub fn scale_raw_balance(raw_hex: &str) -> Result<Decimal> {
    let hex_str = raw_hex.strip_prefix("0x").unwrap_or(raw_hex);
    if hex_str.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let raw = U256::from_str_radix(hex_str, 16).context("Invalid balance encoding")?;
    let mut amount = Decimal::from_str(&raw.to_string()).context("Balance out of range")?;
    amount.set_scale(USDC_DECIMALS)?;

    Ok(amount.normalize())
}
