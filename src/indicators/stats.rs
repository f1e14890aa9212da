// =============================================================================
// Small statistics helpers — SMA, return series, volatility, correlation
// =============================================================================

/// Simple moving average of the last `period` values. `None` if there is not
/// enough history or `period` is zero.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let tail = &values[values.len() - period..];
    Some(tail.iter().sum::<f64>() / period as f64)
}

/// Bar-to-bar percentage changes. Entries with a non-positive base are
/// skipped.
pub fn pct_changes(closes: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(closes.len().saturating_sub(1));
    for w in closes.windows(2) {
        if w[0] > 0.0 {
            out.push((w[1] - w[0]) / w[0]);
        }
    }
    out
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Annualized volatility of a close series: std of bar returns × √252.
pub fn annualized_vol(closes: &[f64]) -> f64 {
    let returns = pct_changes(closes);
    std_dev(&returns) * (252.0f64).sqrt()
}

/// Pearson correlation between two close series, computed on tail-aligned
/// percentage-change returns. Returns 0.0 (treated as independent) when the
/// overlap is shorter than 5 points or either side is degenerate.
pub fn tail_correlation(a: &[f64], b: &[f64]) -> f64 {
    let min_len = a.len().min(b.len());
    if min_len < 5 {
        return 0.0;
    }

    let ra = pct_changes(&a[a.len() - min_len..]);
    let rb = pct_changes(&b[b.len() - min_len..]);
    let n = ra.len().min(rb.len());
    if n < 5 {
        return 0.0;
    }
    let ra = &ra[..n];
    let rb = &rb[..n];

    let mean_a = ra.iter().sum::<f64>() / n as f64;
    let mean_b = rb.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = ra[i] - mean_a;
        let db = rb[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }

    let corr = cov / (var_a.sqrt() * var_b.sqrt());
    if corr.is_finite() {
        corr
    } else {
        0.0
    }
}
