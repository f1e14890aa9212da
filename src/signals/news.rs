// =============================================================================
// News sentiment signal — keyword-lexicon scoring over scraped headlines
// =============================================================================
//
// Headlines come from a Google News RSS query per symbol. Each headline is
// scored against signed lexicons (strong / medium / weak terms); a negator in
// the preceding three tokens flips polarity, and terms present in both
// lexicons are ignored as ambiguous. Duplicate headlines are dropped via a
// SHA-256 hash over the normalized title text.
//
// A structured sentiment provider can be switched in via `news.structured`;
// the keyword path remains the fallback whenever it yields nothing.
//
// All failures are swallowed: the signal degrades to 0.0 (neutral) and the
// run continues.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::NewsConfig;

/// Per-scrape timeout.
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// How many deduplicated headlines feed the score.
const MAX_HEADLINES: usize = 5;

/// Tokens that flip the polarity of a matched term when they appear in the
/// three preceding tokens.
const NEGATORS: &[&str] = &["not", "no", "never", "without", "fails", "failed", "denies"];

const STRONG_POSITIVE: &[&str] = &[
    "surge", "surges", "soars", "soar", "skyrockets", "breakout", "upgrade", "upgrades",
    "beats", "record", "blowout", "rally", "rallies",
];
const MEDIUM_POSITIVE: &[&str] = &[
    "gains", "gain", "rises", "rise", "climbs", "climb", "jumps", "jump", "bullish",
    "outperform", "buy", "strong", "growth", "profit", "wins", "win",
];
const WEAK_POSITIVE: &[&str] = &["up", "higher", "positive", "improves", "steady", "optimistic"];

const STRONG_NEGATIVE: &[&str] = &[
    "plunge", "plunges", "crash", "crashes", "collapse", "collapses", "downgrade",
    "downgrades", "fraud", "bankruptcy", "lawsuit", "selloff",
];
const MEDIUM_NEGATIVE: &[&str] = &[
    "falls", "fall", "drops", "drop", "slides", "slide", "sinks", "sink", "bearish",
    "underperform", "sell", "weak", "misses", "miss", "loss", "losses", "cuts", "cut",
];
const WEAK_NEGATIVE: &[&str] = &["down", "lower", "negative", "slips", "slip", "cautious", "concerns"];

// ---------------------------------------------------------------------------
// Keyword scoring
// ---------------------------------------------------------------------------

fn lexicon_weight(token: &str) -> Option<f64> {
    let positive = if STRONG_POSITIVE.contains(&token) {
        Some(1.0)
    } else if MEDIUM_POSITIVE.contains(&token) {
        Some(0.6)
    } else if WEAK_POSITIVE.contains(&token) {
        Some(0.3)
    } else {
        None
    };

    let negative = if STRONG_NEGATIVE.contains(&token) {
        Some(-1.0)
    } else if MEDIUM_NEGATIVE.contains(&token) {
        Some(-0.6)
    } else if WEAK_NEGATIVE.contains(&token) {
        Some(-0.3)
    } else {
        None
    };

    // A term present in both lexicons is ambiguous — ignore it.
    match (positive, negative) {
        (Some(_), Some(_)) => None,
        (Some(w), None) => Some(w),
        (None, Some(w)) => Some(w),
        (None, None) => None,
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Score one headline in [-1, +1] using the signed lexicons.
pub fn keyword_score(headline: &str) -> f64 {
    let tokens = tokenize(headline);
    let mut total = 0.0;
    let mut hits = 0usize;

    for (i, token) in tokens.iter().enumerate() {
        let Some(mut weight) = lexicon_weight(token) else {
            continue;
        };

        // Negator window: the last three tokens before the match.
        let window_start = i.saturating_sub(3);
        if tokens[window_start..i]
            .iter()
            .any(|t| NEGATORS.contains(&t.as_str()))
        {
            weight = -weight;
        }

        total += weight;
        hits += 1;
    }

    if hits == 0 {
        return 0.0;
    }
    (total / hits as f64).clamp(-1.0, 1.0)
}

/// Normalized dedup hash: SHA-256 over the lowercased alphanumeric collapse
/// of the headline.
pub fn headline_hash(headline: &str) -> String {
    let normalized: String = headline
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

// ---------------------------------------------------------------------------
// RSS title extraction
// ---------------------------------------------------------------------------

/// Pull `<title>` payloads out of an RSS document, CDATA-aware. The feed's
/// own channel title ("Google News") is filtered out.
pub fn extract_titles(xml: &str) -> Vec<String> {
    let mut titles = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find("<title>") {
        rest = &rest[start + "<title>".len()..];
        let Some(end) = rest.find("</title>") else {
            break;
        };
        let raw = &rest[..end];
        rest = &rest[end + "</title>".len()..];

        let inner = raw
            .trim()
            .strip_prefix("<![CDATA[")
            .and_then(|s| s.strip_suffix("]]>"))
            .unwrap_or(raw)
            .trim();

        let unescaped = inner
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'");

        if unescaped.is_empty() || unescaped.eq_ignore_ascii_case("google news") {
            continue;
        }
        titles.push(unescaped);
    }

    titles
}

// ---------------------------------------------------------------------------
// Structured provider wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StructuredSentiment {
    #[serde(default)]
    sentiment: Option<f64>,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Fetches and scores news per symbol, with a per-run cache so the same
/// symbol is never scraped twice in one cycle.
pub struct NewsAgent {
    client: reqwest::Client,
    cfg: NewsConfig,
    cache: RwLock<HashMap<String, f64>>,
}

impl NewsAgent {
    pub fn new(cfg: NewsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SCRAPE_TIMEOUT)
            .user_agent("Mozilla/5.0")
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            cfg,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Sentiment score for `symbol` in [-1, +1]; 0.0 when no usable news.
    pub async fn sentiment(&self, symbol: &str) -> f64 {
        if let Some(&cached) = self.cache.read().get(symbol) {
            return cached;
        }

        let mut score = None;
        if self.cfg.structured && !self.cfg.structured_url.is_empty() {
            score = self.structured_sentiment(symbol).await;
        }
        let score = match score {
            Some(s) => s,
            None => self.keyword_sentiment(symbol).await,
        };

        self.cache.write().insert(symbol.to_string(), score);
        score
    }

    async fn structured_sentiment(&self, symbol: &str) -> Option<f64> {
        let resp = self
            .client
            .get(&self.cfg.structured_url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| debug!(symbol, error = %e, "structured sentiment request failed"))
            .ok()?;

        if !resp.status().is_success() {
            return None;
        }
        let body: StructuredSentiment = resp.json().await.ok()?;
        let s = body.sentiment?;
        if s.is_finite() {
            Some(s.clamp(-1.0, 1.0))
        } else {
            None
        }
    }

    async fn keyword_sentiment(&self, symbol: &str) -> f64 {
        let url = format!(
            "https://news.google.com/rss/search?q={}+stock&hl=en-US&gl=US&ceid=US:en",
            symbol
        );

        let xml = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(symbol, error = %e, "news body read failed");
                    return 0.0;
                }
            },
            Ok(resp) => {
                warn!(symbol, status = %resp.status(), "news request rejected");
                return 0.0;
            }
            Err(e) => {
                warn!(symbol, error = %e, "news request failed");
                return 0.0;
            }
        };

        let titles = extract_titles(&xml);
        let mut seen = HashSet::new();
        let mut scores = Vec::new();

        for title in titles {
            if !seen.insert(headline_hash(&title)) {
                continue;
            }
            scores.push(keyword_score(&title));
            if scores.len() >= MAX_HEADLINES {
                break;
            }
        }

        if scores.is_empty() {
            return 0.0;
        }
        let avg = scores.iter().sum::<f64>() / scores.len() as f64;
        debug!(symbol, headlines = scores.len(), avg, "news sentiment scored");
        avg
    }
}
