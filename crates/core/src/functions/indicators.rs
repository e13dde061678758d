//! Technical indicators over close series (oldest first).

use serde::Serialize;
use std::collections::BTreeMap;

pub const FIBONACCI_RATIOS: [(&str, f64); 7] = [
    ("0.0", 0.0),
    ("0.236", 0.236),
    ("0.382", 0.382),
    ("0.5", 0.5),
    ("0.618", 0.618),
    ("0.786", 0.786),
    ("1.0", 1.0),
];

pub fn sma(prices: &[f64], window: usize) -> Option<f64> {
    if window == 0 || prices.len() < window {
        return None;
    }
    let slice = &prices[prices.len() - window..];
    Some(slice.iter().sum::<f64>() / window as f64)
}

/// EMA seeded with the SMA of the first `window` prices; one value per price from index `window - 1`.
fn ema_series(prices: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || prices.len() < window {
        return Vec::new();
    }
    let k = 2.0 / (window as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len() - window + 1);
    let mut prev = prices[..window].iter().sum::<f64>() / window as f64;
    out.push(prev);
    for price in &prices[window..] {
        prev = price * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

pub fn ema(prices: &[f64], window: usize) -> Option<f64> {
    ema_series(prices, window).last().copied()
}

/// Simple-average RSI over the last `window` changes.
pub fn rsi(prices: &[f64], window: usize) -> Option<f64> {
    if window == 0 || prices.len() <= window {
        return None;
    }
    let slice = &prices[prices.len() - window - 1..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in slice.windows(2) {
        let diff = pair[1] - pair[0];
        if diff > 0.0 {
            gains += diff;
        } else {
            losses -= diff;
        }
    }
    if gains + losses == 0.0 {
        return Some(50.0);
    }
    let rs = gains / losses.max(1e-9);
    Some(100.0 - (100.0 / (1.0 + rs)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    /// `BULLISH` when the MACD line is above its signal line.
    pub trend: &'static str,
}

pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast >= slow {
        return None;
    }
    let fast_series = ema_series(prices, fast);
    let slow_series = ema_series(prices, slow);
    if slow_series.is_empty() {
        return None;
    }
    // Align the fast series with the slow one; both end at the last price.
    let offset = fast_series.len() - slow_series.len();
    let line: Vec<f64> = slow_series
        .iter()
        .zip(&fast_series[offset..])
        .map(|(s, f)| f - s)
        .collect();
    let signal_value = ema(&line, signal)?;
    let macd_value = *line.last()?;
    Some(Macd {
        macd: macd_value,
        signal: signal_value,
        histogram: macd_value - signal_value,
        trend: if macd_value >= signal_value { "BULLISH" } else { "BEARISH" },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger(prices: &[f64], window: usize, width: f64) -> Option<Bollinger> {
    let middle = sma(prices, window)?;
    let slice = &prices[prices.len() - window..];
    let variance = slice.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / window as f64;
    let band = variance.sqrt() * width;
    Some(Bollinger {
        upper: middle + band,
        middle,
        lower: middle - band,
    })
}

/// Retracement levels between the series low (`0.0`) and high (`1.0`).
pub fn fibonacci(prices: &[f64]) -> Option<BTreeMap<String, f64>> {
    let low = prices.iter().copied().reduce(f64::min)?;
    let high = prices.iter().copied().reduce(f64::max)?;
    Some(
        FIBONACCI_RATIOS
            .iter()
            .map(|(label, ratio)| (label.to_string(), low + (high - low) * ratio))
            .collect(),
    )
}
