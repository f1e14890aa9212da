// =============================================================================
// Sector map + sector-news sentiment filter
// =============================================================================
//
// Maps tickers to coarse sectors, scrapes sector-level headlines from Google
// News RSS, and scores them with the same keyword lexicon the per-symbol news
// signal uses. Scores are cached for ten minutes so repeated risk checks in
// one cycle (or adjacent cycles) do not hammer the feed.
//
// Unknown sectors and ETFs always pass the filter.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::signals::news::{extract_titles, keyword_score};

/// Sector score cache lifetime.
const CACHE_TTL: Duration = Duration::from_secs(600);

/// Per-scrape timeout.
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// Headlines scored per sector.
const MAX_HEADLINES: usize = 10;

// ---------------------------------------------------------------------------
// Static sector map
// ---------------------------------------------------------------------------

const SECTOR_MAP: &[(&str, &str)] = &[
    ("AAPL", "Big Tech"),
    ("MSFT", "Big Tech"),
    ("GOOGL", "Big Tech"),
    ("AMZN", "Big Tech"),
    ("META", "Big Tech"),
    ("NVDA", "Semiconductors"),
    ("AMD", "Semiconductors"),
    ("INTC", "Semiconductors"),
    ("AVGO", "Semiconductors"),
    ("MU", "Semiconductors"),
    ("TSLA", "EV/Auto"),
    ("RIVN", "EV/Auto"),
    ("LCID", "EV/Auto"),
    ("COIN", "Crypto/AI Infra"),
    ("MSTR", "Crypto/AI Infra"),
    ("MARA", "Crypto/AI Infra"),
    ("RIOT", "Crypto/AI Infra"),
    ("HUT", "Crypto/AI Infra"),
    ("IREN", "Crypto/AI Infra"),
    ("CORZ", "Crypto/AI Infra"),
    ("BITF", "Crypto/AI Infra"),
    ("JPM", "Banks"),
    ("BAC", "Banks"),
    ("GS", "Banks"),
    ("XOM", "Energy"),
    ("CVX", "Energy"),
    ("PFE", "Pharma"),
    ("MRNA", "Pharma"),
    ("SPY", "ETF"),
    ("QQQ", "ETF"),
    ("IWM", "ETF"),
];

const SECTOR_QUERIES: &[(&str, &str)] = &[
    ("Big Tech", "big tech stocks"),
    ("Semiconductors", "semiconductor stocks chips"),
    ("EV/Auto", "electric vehicle stocks"),
    ("Crypto/AI Infra", "bitcoin mining stocks crypto"),
    ("Banks", "bank stocks financial sector"),
    ("Energy", "oil energy stocks"),
    ("Pharma", "pharma biotech stocks"),
];

/// Sector for a ticker, if mapped.
pub fn get_sector(symbol: &str) -> Option<&'static str> {
    SECTOR_MAP
        .iter()
        .find(|(sym, _)| *sym == symbol)
        .map(|(_, sector)| *sector)
}

// ---------------------------------------------------------------------------
// Sector sentiment
// ---------------------------------------------------------------------------

struct CachedScore {
    score: f64,
    at: Instant,
}

/// Outcome of the sector filter for one symbol.
#[derive(Debug, Clone)]
pub struct SectorVerdict {
    pub passed: bool,
    pub reason: String,
    pub score: f64,
}

pub struct SectorFilter {
    client: reqwest::Client,
    threshold: f64,
    cache: RwLock<HashMap<String, CachedScore>>,
}

impl SectorFilter {
    pub fn new(threshold: f64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SCRAPE_TIMEOUT)
            .user_agent("Mozilla/5.0")
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            threshold,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether `symbol` passes the sector-sentiment gate.
    pub async fn check(&self, symbol: &str) -> SectorVerdict {
        let Some(sector) = get_sector(symbol) else {
            return SectorVerdict {
                passed: true,
                reason: "unknown sector".to_string(),
                score: 0.0,
            };
        };

        if sector == "ETF" {
            return SectorVerdict {
                passed: true,
                reason: "ETF (no sector filter)".to_string(),
                score: 0.0,
            };
        }

        let score = self.sector_sentiment(sector).await;

        if score < self.threshold {
            let reason = format!(
                "sector '{sector}' sentiment {score:.3} < threshold {:.3}",
                self.threshold
            );
            warn!(symbol, %reason, "sector filter blocked entry");
            return SectorVerdict {
                passed: false,
                reason,
                score,
            };
        }

        SectorVerdict {
            passed: true,
            reason: format!("sector '{sector}' sentiment {score:.3} OK"),
            score,
        }
    }

    async fn sector_sentiment(&self, sector: &str) -> f64 {
        if let Some(cached) = self.cache.read().get(sector) {
            if cached.at.elapsed() < CACHE_TTL {
                return cached.score;
            }
        }

        let query = SECTOR_QUERIES
            .iter()
            .find(|(s, _)| *s == sector)
            .map(|(_, q)| *q);

        let score = match query {
            Some(q) => self.scrape_and_score(q).await,
            None => 0.0,
        };

        self.cache.write().insert(
            sector.to_string(),
            CachedScore {
                score,
                at: Instant::now(),
            },
        );
        score
    }

    async fn scrape_and_score(&self, query: &str) -> f64 {
        let encoded = query.replace(' ', "+");
        let url =
            format!("https://news.google.com/rss/search?q={encoded}&hl=en-US&gl=US&ceid=US:en");

        let xml = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => body,
                Err(_) => return 0.0,
            },
            Ok(_) | Err(_) => return 0.0,
        };

        let titles = extract_titles(&xml);
        if titles.is_empty() {
            return 0.0;
        }

        let scores: Vec<f64> = titles
            .iter()
            .take(MAX_HEADLINES)
            .map(|t| keyword_score(t))
            .collect();
        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        debug!(query, headlines = scores.len(), avg, "sector sentiment scored");
        avg
    }
}
