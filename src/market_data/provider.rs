// =============================================================================
// Market Data Provider — OHLCV bars over the Yahoo Finance chart API
// =============================================================================
//
// One bulk `fetch` per cycle; an in-process TTL cache (60 s) absorbs
// intra-cycle re-reads. Failures for individual symbols are dropped silently
// and callers tolerate missing keys — a symbol with no bars is simply omitted
// from that cycle.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::market_data::{Bar, BarSeries};

/// How long a fetched batch stays valid for identical re-requests.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Per-request timeout for the chart endpoint.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Wire format (subset of the chart response we care about)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize, Default)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

struct CacheEntry {
    fetched_at: Instant,
    data: HashMap<String, BarSeries>,
}

/// HTTP market-data provider with an in-process TTL cache keyed by
/// (sorted symbol set, interval, lookback).
pub struct MarketDataProvider {
    client: reqwest::Client,
    base_url: String,
    interval: String,
    lookback: String,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl MarketDataProvider {
    pub fn new(interval: impl Into<String>, lookback: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent("Mozilla/5.0")
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: "https://query1.finance.yahoo.com".to_string(),
            interval: interval.into(),
            lookback: lookback.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(&self, symbols: &[String]) -> String {
        let mut sorted: Vec<&str> = symbols.iter().map(|s| s.as_str()).collect();
        sorted.sort_unstable();
        format!("{}|{}|{}", sorted.join(","), self.interval, self.lookback)
    }

    /// Fetch bars for every symbol in `symbols`. Symbols that fail to download
    /// or parse are omitted from the result.
    pub async fn fetch(&self, symbols: &[String]) -> HashMap<String, BarSeries> {
        if symbols.is_empty() {
            return HashMap::new();
        }

        let key = self.cache_key(symbols);
        {
            let cache = self.cache.read();
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < CACHE_TTL {
                    debug!(symbols = symbols.len(), "market data served from cache");
                    return entry.data.clone();
                }
            }
        }

        let mut data = HashMap::new();
        for sym in symbols {
            match self.fetch_symbol(sym).await {
                Some(series) if !series.is_empty() => {
                    data.insert(sym.clone(), series);
                }
                _ => {
                    warn!(symbol = %sym, "no bars fetched — symbol dropped this cycle");
                }
            }
        }

        self.cache.write().insert(
            key,
            CacheEntry {
                fetched_at: Instant::now(),
                data: data.clone(),
            },
        );

        debug!(
            requested = symbols.len(),
            fetched = data.len(),
            "market data fetch complete"
        );
        data
    }

    async fn fetch_symbol(&self, symbol: &str) -> Option<BarSeries> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .query(&[("interval", self.interval.as_str()), ("range", self.lookback.as_str())])
            .send()
            .await
            .map_err(|e| warn!(symbol, error = %e, "chart request failed"))
            .ok()?;

        if !resp.status().is_success() {
            warn!(symbol, status = %resp.status(), "chart request rejected");
            return None;
        }

        let body: ChartResponse = resp
            .json()
            .await
            .map_err(|e| warn!(symbol, error = %e, "chart response parse failed"))
            .ok()?;

        parse_chart(symbol, body)
    }
}

/// Convert a decoded chart response into a `BarSeries`. Bars with any missing
/// OHLC field are skipped.
fn parse_chart(symbol: &str, body: ChartResponse) -> Option<BarSeries> {
    let result = body.chart.result?.into_iter().next()?;
    let quote = result.indicators.quote.into_iter().next()?;

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let (open, high, low, close) = match (
            quote.open.get(i).copied().flatten(),
            quote.high.get(i).copied().flatten(),
            quote.low.get(i).copied().flatten(),
            quote.close.get(i).copied().flatten(),
        ) {
            (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
            _ => continue,
        };
        let volume = quote.volume.get(i).copied().flatten().unwrap_or(0.0);
        let ts = Utc.timestamp_opt(ts, 0).single()?;
        bars.push(Bar {
            ts,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    Some(BarSeries::new(symbol, bars))
}
