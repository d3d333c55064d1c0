use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Interval, Period, PriceBar, PriceSeries};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 ",
    "(KHTML, like Gecko) Chrome/124.0 Safari/537.36"
);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid symbol {0:?}")]
    InvalidSymbol(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    Http(StatusCode),
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("no rows returned")]
    Empty,
    #[error("response has no close prices")]
    MissingClose,
}

/// One row as the market-data service reports it. Any field may be missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRow {
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
}

/// Source of historical price rows for one symbol.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn history(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<Vec<RawRow>, FetchError>;
}

#[derive(Debug)]
pub enum FetchOutcome {
    Found(PriceSeries),
    NotFound(FetchError),
}

impl FetchOutcome {
    pub fn series(self) -> Option<PriceSeries> {
        match self {
            FetchOutcome::Found(series) => Some(series),
            FetchOutcome::NotFound(_) => None,
        }
    }
}

fn symbol_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9.^=\-]{1,20}$").expect("static regex"))
}

/// Trims and upper-cases a ticker, rejecting anything that cannot be one.
pub fn normalize_symbol(symbol: &str) -> Result<String, FetchError> {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol_pattern().is_match(&symbol) {
        Ok(symbol)
    } else {
        Err(FetchError::InvalidSymbol(symbol))
    }
}

/// Turns raw rows into a clean series. Rows without a close or any other
/// price are dropped; an empty or close-less result is an error.
pub fn rows_to_series(rows: Vec<RawRow>) -> Result<PriceSeries, FetchError> {
    if rows.is_empty() {
        return Err(FetchError::Empty);
    }
    if rows.iter().all(|r| r.close.is_none()) {
        return Err(FetchError::MissingClose);
    }

    let bars = rows.into_iter().filter_map(|row| {
        Some(PriceBar {
            timestamp: DateTime::<Utc>::from_timestamp(row.timestamp, 0)?,
            open: row.open?,
            high: row.high?,
            low: row.low?,
            close: row.close?,
        })
    });

    let series = PriceSeries::from_bars(bars);
    if series.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok(series)
}

/// Fetches and cleans the history of one symbol. Never fails: every problem
/// ends up as [`FetchOutcome::NotFound`] carrying the reason.
pub async fn fetch(
    source: &dyn HistorySource,
    symbol: &str,
    period: Period,
    interval: Interval,
) -> FetchOutcome {
    let result = match normalize_symbol(symbol) {
        Ok(symbol) => source
            .history(&symbol, period, interval)
            .await
            .and_then(rows_to_series),
        Err(e) => Err(e),
    };

    match result {
        Ok(series) => {
            log::info!("fetched {} bars for {} ({}/{})", series.len(), symbol, period, interval);
            FetchOutcome::Found(series)
        }
        Err(e) => {
            log::warn!("no data for {}: {}", symbol, e);
            FetchOutcome::NotFound(e)
        }
    }
}

// --- Yahoo chart endpoint ---

pub struct YahooChartSource {
    client: Client,
    base_url: String,
}

impl YahooChartSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::with_base_url(CHART_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl HistorySource for YahooChartSource {
    async fn history(
        &self,
        symbol: &str,
        period: Period,
        interval: Interval,
    ) -> Result<Vec<RawRow>, FetchError> {
        let url = format!("{}/{}", self.base_url, symbol);
        let query = [
            ("range", period.as_str()),
            ("interval", interval.as_str()),
            ("includePrePost", "false"),
        ];

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        classify_response(status, &body)
    }
}

/// Maps a chart response to rows or to the reason there are none.
pub fn classify_response(status: StatusCode, body: &[u8]) -> Result<Vec<RawRow>, FetchError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited);
    }

    // Unknown symbols come back as 404 with a JSON error body.
    match parse_chart(body) {
        Ok(rows) => Ok(rows),
        Err(e) if status.is_success() => Err(e),
        Err(FetchError::Upstream(msg)) => Err(FetchError::Upstream(msg)),
        Err(_) => Err(FetchError::Http(status)),
    }
}

// --- Payload decoding ---

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug, Default)]
struct Quote {
    #[serde(default)]
    open: Vec<LenientF64>,
    #[serde(default)]
    high: Vec<LenientF64>,
    #[serde(default)]
    low: Vec<LenientF64>,
    #[serde(default)]
    close: Option<Vec<LenientF64>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LenientF64(Option<f64>);

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = LenientF64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, null, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(LenientF64(Some(v)))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(LenientF64(Some(v as f64)))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(LenientF64(Some(v as f64)))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(LenientF64(None))
        } else {
            v.trim().parse::<f64>().map(|f| LenientF64(Some(f))).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(LenientF64(None))
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(LenientF64(None))
    }
}

impl<'de> Deserialize<'de> for LenientF64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientF64Visitor)
    }
}

fn column(values: &[LenientF64], i: usize) -> Option<f64> {
    values.get(i).and_then(|v| v.0)
}

/// Decodes a chart response body into raw rows.
pub fn parse_chart(body: &[u8]) -> Result<Vec<RawRow>, FetchError> {
    let envelope: ChartEnvelope =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    if let Some(err) = envelope.chart.error {
        let msg = err
            .description
            .or(err.code)
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(FetchError::Upstream(msg));
    }

    let result = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or(FetchError::Empty)?;

    if result.timestamp.is_empty() {
        return Err(FetchError::Empty);
    }

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let close = quote.close.ok_or(FetchError::MissingClose)?;

    let rows = result
        .timestamp
        .iter()
        .enumerate()
        .map(|(i, &timestamp)| RawRow {
            timestamp,
            open: column(&quote.open, i),
            high: column(&quote.high, i),
            low: column(&quote.low, i),
            close: column(&close, i),
        })
        .collect();

    Ok(rows)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;

    /// Serves canned rows per symbol; unknown symbols fail like a 404.
    #[derive(Default)]
    pub struct FakeSource {
        pub rows: HashMap<String, Vec<RawRow>>,
    }

    impl FakeSource {
        pub fn with(mut self, symbol: &str, closes: &[f64]) -> Self {
            let rows = closes
                .iter()
                .enumerate()
                .map(|(i, &c)| RawRow {
                    timestamp: 1_704_067_200 + i as i64 * 86_400,
                    open: Some(c),
                    high: Some(c),
                    low: Some(c),
                    close: Some(c),
                })
                .collect();
            self.rows.insert(symbol.to_string(), rows);
            self
        }
    }

    #[async_trait]
    impl HistorySource for FakeSource {
        async fn history(
            &self,
            symbol: &str,
            _period: Period,
            _interval: Interval,
        ) -> Result<Vec<RawRow>, FetchError> {
            self.rows
                .get(symbol)
                .cloned()
                .ok_or(FetchError::Http(StatusCode::NOT_FOUND))
        }
    }
}
