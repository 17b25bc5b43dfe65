//! REST client for the broker bridge service.
//!
//! The bridge exposes candles and order placement over a small JSON API:
//! `POST /api/candles {active, size, count}` and
//! `POST /api/trade {active, amount, direction, duration}`. Both answer with
//! an error until the bridge holds a broker session, opened through
//! `POST /api/connect {email, password, practice}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BrokerExecutor, CandleSource, Priority};
use crate::config::BridgeCredentials;
use crate::error::{AppError, Result};
use crate::services::clock::Clock;
use crate::services::rate_governor::RateGovernor;
use crate::types::{sanitize_series, Candle, ExecutionResult, Signal, Timeframe};

const PROVIDER: &str = "bridge";
/// Largest window the bridge serves in one call.
const MAX_CANDLES_PER_REQUEST: usize = 1000;

#[derive(Debug, Serialize)]
struct CandlesRequest<'a> {
    active: &'a str,
    size: i64,
    count: usize,
}

/// Candle as returned by the bridge (epoch seconds, min/max naming).
#[derive(Debug, Deserialize)]
struct BridgeCandle {
    from: i64,
    open: f64,
    close: f64,
    min: f64,
    max: f64,
    #[serde(default)]
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<BridgeCandle>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct TradeRequest<'a> {
    active: &'a str,
    amount: f64,
    direction: &'static str,
    /// Minutes.
    duration: i64,
}

#[derive(Debug, Deserialize)]
struct TradeResponse {
    #[serde(default)]
    success: bool,
    order_id: Option<serde_json::Value>,
    message: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ConnectRequest<'a> {
    email: &'a str,
    password: &'a str,
    practice: bool,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    #[serde(default)]
    success: bool,
    message: Option<String>,
    /// `PRACTICE` or `REAL`.
    balance_type: Option<String>,
    error: Option<String>,
}

impl ConnectResponse {
    /// Account type of the opened session.
    fn into_result(self) -> Result<String> {
        if self.success {
            return Ok(self.balance_type.unwrap_or_else(|| "UNKNOWN".to_string()));
        }
        let reason = self
            .message
            .or(self.error)
            .unwrap_or_else(|| "bridge refused connection".to_string());
        Err(AppError::ExternalApi(reason))
    }
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Option<f64>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeHealth {
    pub status: String,
    #[serde(default)]
    pub connected: bool,
}

/// Map bridge candles to `Candle`s, flagging those still open at `now_ms`.
fn to_candles(raw: Vec<BridgeCandle>, timeframe: Timeframe, now_ms: i64) -> Vec<Candle> {
    let candles = raw
        .into_iter()
        .map(|c| {
            let timestamp = c.from * 1000;
            Candle {
                timestamp,
                open: c.open,
                high: c.max,
                low: c.min,
                close: c.close,
                volume: c.volume,
                closed: timestamp + timeframe.period_ms() <= now_ms,
            }
        })
        .filter(Candle::is_valid)
        .collect();
    sanitize_series(candles)
}

/// Bridge REST client.
#[derive(Clone)]
pub struct BridgeClient {
    client: Client,
    base_url: String,
    governor: Arc<RateGovernor>,
    clock: Arc<dyn Clock>,
}

impl BridgeClient {
    /// Create a new bridge client.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        governor: Arc<RateGovernor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let client = Client::builder()
            .user_agent("Augur/0.1 (Signal Engine)")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            governor,
            clock,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Bridge liveness and session state.
    pub async fn health(&self) -> Result<BridgeHealth> {
        self.governor.acquire(PROVIDER, Priority::Routine).await?;
        let health = self
            .client
            .get(self.url("/api/health"))
            .send()
            .await?
            .json::<BridgeHealth>()
            .await?;
        Ok(health)
    }

    /// Log the bridge into the broker. Returns the account type.
    pub async fn connect(&self, credentials: &BridgeCredentials) -> Result<String> {
        self.governor.acquire(PROVIDER, Priority::Critical).await?;
        info!(
            "Connecting bridge as {} ({} account)",
            credentials.email,
            if credentials.practice { "practice" } else { "real" }
        );

        let request = ConnectRequest {
            email: &credentials.email,
            password: &credentials.password,
            practice: credentials.practice,
        };
        let response = self
            .client
            .post(self.url("/api/connect"))
            .json(&request)
            .send()
            .await?;

        // Failures carry the same JSON body with a 4xx/5xx status
        let status = response.status();
        let text = response.text().await?;
        let body: ConnectResponse = serde_json::from_str(&text).map_err(|_| {
            let snippet: String = text.chars().take(200).collect();
            AppError::ExternalApi(format!("bridge connect returned {}: {}", status, snippet))
        })?;

        let account = body.into_result()?;
        info!("Bridge connected to {} account", account);
        Ok(account)
    }

    /// Account balance.
    pub async fn balance(&self) -> Result<f64> {
        self.governor.acquire(PROVIDER, Priority::Routine).await?;
        let response: BalanceResponse = self
            .client
            .get(self.url("/api/balance"))
            .send()
            .await?
            .json()
            .await?;
        match (response.balance, response.error) {
            (Some(balance), _) => Ok(balance),
            (None, Some(e)) => Err(AppError::ExternalApi(e)),
            (None, None) => Err(AppError::ExternalApi("balance missing".to_string())),
        }
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
        priority: Priority,
    ) -> Result<Vec<Candle>> {
        self.governor.acquire(PROVIDER, priority).await?;

        let request = CandlesRequest {
            active: symbol,
            size: timeframe.seconds(),
            count: count.clamp(1, MAX_CANDLES_PER_REQUEST),
        };
        let response = self
            .client
            .post(self.url("/api/candles"))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            warn!("Bridge candles returned {}: {}", status, snippet);
            return Err(AppError::ExternalApi(format!("bridge candles error: {}", status)));
        }

        let body: CandlesResponse = response.json().await?;
        if let Some(e) = body.error {
            return Err(AppError::ExternalApi(e));
        }

        let candles = to_candles(body.candles, timeframe, self.clock.now_ms());
        debug!("Bridge returned {} {} candles for {}", candles.len(), timeframe, symbol);
        Ok(candles)
    }
}

#[async_trait]
impl CandleSource for BridgeClient {
    async fn fetch_recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        self.fetch_candles(symbol, timeframe, count, Priority::Routine)
            .await
    }

    async fn fetch_candle_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        timestamp: i64,
        priority: Priority,
    ) -> Result<Option<Candle>> {
        // The bridge only serves trailing windows; size one to reach back to `timestamp`
        let current = timeframe.period_start(self.clock.now_ms());
        let periods_back = ((current - timestamp) / timeframe.period_ms()).max(0) as usize;
        let candles = self
            .fetch_candles(symbol, timeframe, periods_back + 2, priority)
            .await?;
        Ok(candles.into_iter().find(|c| c.timestamp == timestamp))
    }
}

#[async_trait]
impl BrokerExecutor for BridgeClient {
    async fn execute_signal(&self, signal: &Signal, risk_amount: f64) -> Result<ExecutionResult> {
        self.governor.acquire(PROVIDER, Priority::Critical).await?;

        let request = TradeRequest {
            active: &signal.symbol,
            amount: risk_amount,
            direction: signal.direction.as_option_side(),
            duration: (signal.timeframe.seconds() / 60).max(1),
        };
        info!(
            "Placing {} {} ${} for {}min (signal {})",
            request.direction, request.active, request.amount, request.duration, signal.id
        );

        let response: TradeResponse = self
            .client
            .post(self.url("/api/trade"))
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        let order_id = response.order_id.map(|id| match id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });

        Ok(ExecutionResult {
            success: response.success,
            order_id,
            executed_price: response.success.then_some(signal.price),
            executed_qty: response.success.then_some(risk_amount),
            message: response.message.or(response.error),
            executed_at: self.clock.now_ms(),
        })
    }
}
