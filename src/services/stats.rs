//! Trade lifecycle statistics
//!
//! Keeps a rolling 24h log of trade events, derives the aggregate snapshot on
//! demand and persists both through a [`StatsStore`]. Process gauges (uptime,
//! memory, cpu) are sampled whenever a snapshot is computed.

use crate::services::scheduler::{run_every, sleep_or_shutdown};
use crate::types::TradeSnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

/// Events older than this are dropped from the window
const RETENTION_HOURS: i64 = 24;

/// Distinct failure reasons kept in the persisted error list
const MAX_TRACKED_ERRORS: usize = 50;

const SNAPSHOT_FILE: &str = "monitoring.json";
const EVENTS_FILE: &str = "trade_logs.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeEventKind {
    Detected,
    Executed,
    Failed,
    Skipped,
}

/// One step in a trade's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TradeEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub trade: TradeSnapshot,
}

impl TradeEvent {
    pub fn new(kind: TradeEventKind, trade: TradeSnapshot) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            reason: None,
            execution_time_ms: None,
            trade,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time_ms = Some(elapsed.as_millis() as u64);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    #[default]
    Running,
    Stopped,
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Running => write!(f, "RUNNING"),
            HealthStatus::Stopped => write!(f, "STOPPED"),
            HealthStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Aggregates over the rolling window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WindowStats {
    pub trades_detected: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub trades_skipped: u64,
    /// Executed over detected, in percent
    pub success_rate: Decimal,
    pub average_execution_time_ms: u64,
    pub most_common_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TradingActivity {
    #[serde(rename = "last24h")]
    pub last_24h: WindowStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BotHealth {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub memory_usage_mb: u64,
    pub cpu_usage_pct: f32,
    pub last_activity: String,
}

impl Default for BotHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Running,
            uptime_seconds: 0,
            memory_usage_mb: 0,
            cpu_usage_pct: 0.0,
            last_activity: "Just started".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCount {
    pub message: String,
    pub count: u64,
}

/// Persisted aggregate view. Every field defaults, so documents written by
/// older builds load with new fields at their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub trading_activity: TradingActivity,
    pub bot_health: BotHealth,
    pub errors: Vec<ErrorCount>,
    pub last_updated: DateTime<Utc>,
}

/// Persistence port for the stats documents
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn load_snapshot(&self) -> Result<Option<StatsSnapshot>>;
    async fn save_snapshot(&self, snapshot: &StatsSnapshot) -> Result<()>;
    async fn load_events(&self) -> Result<Vec<TradeEvent>>;
    async fn save_events(&self, events: &[TradeEvent]) -> Result<()>;
}

/// Pretty JSON documents under one directory, overwritten on every save
pub struct JsonStatsStore {
    dir: PathBuf,
}

impl JsonStatsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.dir.join(name);
        let json = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[async_trait]
impl StatsStore for JsonStatsStore {
    async fn load_snapshot(&self) -> Result<Option<StatsSnapshot>> {
        self.read_json(SNAPSHOT_FILE).await
    }

    async fn save_snapshot(&self, snapshot: &StatsSnapshot) -> Result<()> {
        self.write_json(SNAPSHOT_FILE, snapshot).await
    }

    async fn load_events(&self) -> Result<Vec<TradeEvent>> {
        Ok(self.read_json(EVENTS_FILE).await?.unwrap_or_default())
    }

    async fn save_events(&self, events: &[TradeEvent]) -> Result<()> {
        self.write_json(EVENTS_FILE, events).await
    }
}

struct StatsState {
    snapshot: StatsSnapshot,
    events: Vec<TradeEvent>,
    system: System,
}

/// Shared statistics component
pub struct StatsService {
    store: Arc<dyn StatsStore>,
    state: RwLock<StatsState>,
    started_at: Instant,
}

impl StatsService {
    pub fn new(store: Arc<dyn StatsStore>) -> Self {
        Self {
            store,
            state: RwLock::new(StatsState {
                snapshot: StatsSnapshot::default(),
                events: Vec::new(),
                system: System::new(),
            }),
            started_at: Instant::now(),
        }
    }

    /// Restore persisted state. Health always comes back as RUNNING.
    pub async fn start(&self) -> Result<()> {
        let loaded = self.store.load_snapshot().await?;
        let events = self.store.load_events().await?;

        let mut state = self.state.write().await;
        if let Some(snapshot) = loaded {
            state.snapshot = snapshot;
        }
        state.snapshot.bot_health.status = HealthStatus::Running;
        state.events = events;
        prune_events(&mut state.events, Utc::now());

        info!("[Stats] Started with {} events in the 24h window", state.events.len());
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.set_status(HealthStatus::Stopped).await
    }

    /// Change health status and persist immediately
    pub async fn set_status(&self, status: HealthStatus) -> Result<()> {
        self.state.write().await.snapshot.bot_health.status = status;
        self.save().await
    }

    pub async fn trade_detected(&self, trade: TradeSnapshot) {
        self.record_event(TradeEvent::new(TradeEventKind::Detected, trade)).await;
    }

    pub async fn trade_executed(&self, trade: TradeSnapshot, elapsed: Duration) {
        self.record_event(TradeEvent::new(TradeEventKind::Executed, trade).with_execution_time(elapsed))
            .await;
    }

    pub async fn trade_failed(&self, trade: TradeSnapshot, reason: impl Into<String>) {
        self.record_event(TradeEvent::new(TradeEventKind::Failed, trade).with_reason(reason))
            .await;
    }

    pub async fn trade_skipped(&self, trade: TradeSnapshot, reason: impl Into<String>) {
        self.record_event(TradeEvent::new(TradeEventKind::Skipped, trade).with_reason(reason))
            .await;
    }

    pub async fn record_event(&self, event: TradeEvent) {
        let mut state = self.state.write().await;

        if event.kind == TradeEventKind::Failed {
            if let Some(reason) = &event.reason {
                track_error(&mut state.snapshot.errors, reason);
            }
        }

        state.snapshot.bot_health.last_activity = "Just now".to_string();
        state.events.push(event);
    }

    /// Events currently in the window
    pub async fn events(&self) -> Vec<TradeEvent> {
        let mut state = self.state.write().await;
        prune_events(&mut state.events, Utc::now());
        state.events.clone()
    }

    /// Recompute the aggregate view. Prunes the window first.
    pub async fn snapshot(&self) -> StatsSnapshot {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let state = &mut *state;

        prune_events(&mut state.events, now);
        state.snapshot.trading_activity.last_24h = window_stats(&state.events);

        let health = &mut state.snapshot.bot_health;
        health.uptime_seconds = self.started_at.elapsed().as_secs();
        let (memory_mb, cpu) = sample_process(&mut state.system);
        health.memory_usage_mb = memory_mb;
        health.cpu_usage_pct = cpu;
        if let Some(last) = state.events.last() {
            health.last_activity = format_ago(now - last.timestamp);
        }

        state.snapshot.last_updated = now;
        state.snapshot.clone()
    }

    /// Write both documents through the store
    pub async fn save(&self) -> Result<()> {
        let snapshot = self.snapshot().await;
        let events = self.state.read().await.events.clone();

        self.store.save_snapshot(&snapshot).await?;
        self.store.save_events(&events).await?;
        debug!("[Stats] Saved snapshot and {} events", events.len());
        Ok(())
    }

    /// Log the current snapshot
    pub async fn report(&self) {
        let s = self.snapshot().await;
        let w = &s.trading_activity.last_24h;
        let h = &s.bot_health;

        info!("[Stats] ===== MONITORING REPORT =====");
        info!(
            "[Stats] Last 24h: detected={} executed={} ({}%) failed={} skipped={}",
            w.trades_detected, w.trades_executed, w.success_rate, w.trades_failed, w.trades_skipped
        );
        info!(
            "[Stats] Avg execution: {:.1}s | Most common error: {}",
            w.average_execution_time_ms as f64 / 1000.0,
            w.most_common_error.as_deref().unwrap_or("None")
        );
        info!(
            "[Stats] Health: {} | Uptime: {} | Memory: {}MB | CPU: {:.1}% | Last activity: {}",
            h.status,
            format_uptime(h.uptime_seconds),
            h.memory_usage_mb,
            h.cpu_usage_pct,
            h.last_activity
        );
    }

    /// Persist periodically until shutdown
    pub async fn run_autosave(self: Arc<Self>, interval: Duration, shutdown: watch::Receiver<bool>) {
        run_every("Stats", interval, shutdown, || {
            let stats = self.clone();
            async move { stats.save().await }
        })
        .await;
    }

    /// Log the report periodically until shutdown
    pub async fn run_reporter(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        // Skip the immediate report; the banner already covers startup
        if sleep_or_shutdown(interval, &mut shutdown).await {
            return;
        }

        run_every("Stats", interval, shutdown, || {
            let stats = self.clone();
            async move {
                stats.report().await;
                Ok(())
            }
        })
        .await;
    }
}

/// Keep only events newer than the retention window
fn prune_events(events: &mut Vec<TradeEvent>, now: DateTime<Utc>) {
    let cutoff = now - ChronoDuration::hours(RETENTION_HOURS);
    let before = events.len();
    events.retain(|e| e.timestamp > cutoff);

    if events.len() != before {
        debug!("[Stats] Pruned {} expired events", before - events.len());
    }
}

fn window_stats(events: &[TradeEvent]) -> WindowStats {
    let count = |kind: TradeEventKind| events.iter().filter(|e| e.kind == kind).count() as u64;
    let detected = count(TradeEventKind::Detected);
    let executed = count(TradeEventKind::Executed);

    let success_rate = if detected == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(executed) / Decimal::from(detected) * Decimal::ONE_HUNDRED).round_dp(1)
    };

    // Sub-millisecond executions carry no timing
    let durations: Vec<u64> = events
        .iter()
        .filter_map(|e| e.execution_time_ms)
        .filter(|&ms| ms > 0)
        .collect();
    let average_execution_time_ms = if durations.is_empty() {
        0
    } else {
        durations.iter().sum::<u64>() / durations.len() as u64
    };

    WindowStats {
        trades_detected: detected,
        trades_executed: executed,
        trades_failed: count(TradeEventKind::Failed),
        trades_skipped: count(TradeEventKind::Skipped),
        success_rate,
        average_execution_time_ms,
        most_common_error: most_common_error(events),
    }
}

/// Most frequent failure reason. On a tie the reason seen first wins.
fn most_common_error(events: &[TradeEvent]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for reason in events
        .iter()
        .filter(|e| e.kind == TradeEventKind::Failed)
        .filter_map(|e| e.reason.as_deref())
    {
        match counts.iter_mut().find(|(r, _)| *r == reason) {
            Some((_, n)) => *n += 1,
            None => counts.push((reason, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (reason, n) in counts {
        if best.map_or(true, |(_, max)| n > max) {
            best = Some((reason, n));
        }
    }
    best.map(|(reason, _)| reason.to_string())
}

fn track_error(errors: &mut Vec<ErrorCount>, reason: &str) {
    if let Some(entry) = errors.iter_mut().find(|e| e.message == reason) {
        entry.count += 1;
        return;
    }

    if errors.len() >= MAX_TRACKED_ERRORS {
        warn!("[Stats] Error list full, dropping oldest entry");
        errors.remove(0);
    }
    errors.push(ErrorCount {
        message: reason.to_string(),
        count: 1,
    });
}

/// Resident memory in MB and cpu percent of this process
fn sample_process(system: &mut System) -> (u64, f32) {
    let pid = Pid::from_u32(std::process::id());
    system.refresh_process(pid);

    match system.process(pid) {
        Some(process) => (process.memory() / 1024 / 1024, process.cpu_usage()),
        None => (0, 0.0),
    }
}

fn format_ago(elapsed: ChronoDuration) -> String {
    let secs = elapsed.num_seconds().max(0);
    if secs < 60 {
        format!("{} seconds ago", secs)
    } else {
        format!("{} minutes ago", secs / 60)
    }
}

fn format_uptime(secs: u64) -> String {
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}
