//! In-memory collaborators for service tests

use crate::services::balance::BalanceOracle;
use crate::services::data_api::DataFeed;
use crate::services::exchange::{Exchange, RedemptionMethod};
use crate::services::stats::{StatsSnapshot, StatsStore, TradeEvent};
use crate::types::{ActivityEntry, OrderBook, OrderLevel, OrderRequest, OrderResponse, Position};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn position(asset: &str, condition_id: &str, size: Decimal, cur_price: Decimal) -> Position {
    Position {
        asset: asset.to_string(),
        condition_id: condition_id.to_string(),
        title: format!("Market {}", asset),
        outcome: "Yes".to_string(),
        size,
        current_value: size * cur_price,
        cur_price,
        redeemable: false,
    }
}

pub fn book(bids: &[(Decimal, Decimal)]) -> OrderBook {
    OrderBook {
        bids: bids
            .iter()
            .map(|&(price, size)| OrderLevel { price, size })
            .collect(),
        asks: Vec::new(),
    }
}

#[derive(Default)]
pub struct FakeFeed {
    pub activity: Mutex<HashMap<String, Vec<ActivityEntry>>>,
    pub positions: Mutex<HashMap<String, Vec<Position>>>,
    pub fail_activity: Mutex<bool>,
    pub activity_calls: AtomicUsize,
    pub position_calls: AtomicUsize,
}

impl FakeFeed {
    pub fn set_activity(&self, user: &str, entries: Vec<ActivityEntry>) {
        self.activity.lock().unwrap().insert(user.to_lowercase(), entries);
    }

    pub fn set_positions(&self, user: &str, positions: Vec<Position>) {
        self.positions.lock().unwrap().insert(user.to_lowercase(), positions);
    }
}

#[async_trait]
impl DataFeed for FakeFeed {
    async fn activity(&self, user: &str) -> Result<Vec<ActivityEntry>> {
        self.activity_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_activity.lock().unwrap() {
            bail!("activity feed unavailable");
        }
        Ok(self.activity.lock().unwrap().get(&user.to_lowercase()).cloned().unwrap_or_default())
    }

    async fn positions(&self, user: &str) -> Result<Vec<Position>> {
        self.position_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.positions.lock().unwrap().get(&user.to_lowercase()).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeBalances {
    pub balances: Mutex<HashMap<String, Decimal>>,
    pub fail: Mutex<bool>,
    pub calls: AtomicUsize,
}

impl FakeBalances {
    pub fn set(&self, wallet: &str, balance: Decimal) {
        self.balances.lock().unwrap().insert(wallet.to_lowercase(), balance);
    }
}

#[async_trait]
impl BalanceOracle for FakeBalances {
    async fn usdc_balance(&self, wallet: &str) -> Result<Decimal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock().unwrap() {
            bail!("rpc unavailable");
        }
        Ok(self.balances.lock().unwrap().get(&wallet.to_lowercase()).copied().unwrap_or_default())
    }
}

/// Exchange with scripted books and order replies. Once the scripted books
/// run out every request sees an empty book; once the scripted replies run
/// out every order succeeds.
pub struct FakeExchange {
    pub books: Mutex<VecDeque<Result<OrderBook, String>>>,
    pub replies: Mutex<VecDeque<Result<OrderResponse, String>>>,
    pub orders: Mutex<Vec<OrderRequest>>,
    pub book_calls: AtomicUsize,
    pub method: RedemptionMethod,
    pub redeemed: Mutex<Vec<String>>,
    pub settled: Mutex<Vec<String>>,
}

impl FakeExchange {
    pub fn new(method: RedemptionMethod) -> Self {
        Self {
            books: Mutex::new(VecDeque::new()),
            replies: Mutex::new(VecDeque::new()),
            orders: Mutex::new(Vec::new()),
            book_calls: AtomicUsize::new(0),
            method,
            redeemed: Mutex::new(Vec::new()),
            settled: Mutex::new(Vec::new()),
        }
    }

    pub fn push_book(&self, book: OrderBook) {
        self.books.lock().unwrap().push_back(Ok(book));
    }

    pub fn push_book_error(&self, message: &str) {
        self.books.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn push_reply(&self, reply: OrderResponse) {
        self.replies.lock().unwrap().push_back(Ok(reply));
    }

    pub fn push_order_error(&self, message: &str) {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }
}

impl Default for FakeExchange {
    fn default() -> Self {
        Self::new(RedemptionMethod::Manual)
    }
}

#[async_trait]
impl Exchange for FakeExchange {
    async fn order_book(&self, _asset: &str) -> Result<OrderBook> {
        self.book_calls.fetch_add(1, Ordering::SeqCst);
        match self.books.lock().unwrap().pop_front() {
            Some(Ok(book)) => Ok(book),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(OrderBook::default()),
        }
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
        self.orders.lock().unwrap().push(order.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(OrderResponse {
                success: true,
                order_id: Some(format!("order-{}", self.orders.lock().unwrap().len())),
                error: None,
            }),
        }
    }

    fn redemption_method(&self) -> RedemptionMethod {
        self.method
    }

    async fn redeem_position(&self, asset: &str) -> Result<String> {
        if self.method != RedemptionMethod::Redeem {
            bail!("redeem not available");
        }
        self.redeemed.lock().unwrap().push(asset.to_string());
        Ok(format!("0xredeem{}", asset))
    }

    async fn settle_position(&self, asset: &str) -> Result<String> {
        if self.method != RedemptionMethod::Settle {
            bail!("settle not available");
        }
        self.settled.lock().unwrap().push(asset.to_string());
        Ok(format!("0xsettle{}", asset))
    }
}

#[derive(Default)]
pub struct MemoryStatsStore {
    pub snapshot: Mutex<Option<StatsSnapshot>>,
    pub events: Mutex<Vec<TradeEvent>>,
}

#[async_trait]
impl StatsStore for MemoryStatsStore {
    async fn load_snapshot(&self) -> Result<Option<StatsSnapshot>> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn save_snapshot(&self, snapshot: &StatsSnapshot) -> Result<()> {
        *self.snapshot.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    async fn load_events(&self) -> Result<Vec<TradeEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn save_events(&self, events: &[TradeEvent]) -> Result<()> {
        *self.events.lock().unwrap() = events.to_vec();
        Ok(())
    }
}
