//! RSI-2 graduated scoring for mean-reversion setups.
//!
//! A 2-period RSI pinned to an extreme is the classic short-horizon
//! mean-reversion trigger; the graduated bands award more points the
//! deeper the extreme.

use super::relative_strength_index;

#[derive(Debug, Clone, Copy)]
pub struct Rsi2Analysis {
    pub value: f64,
    pub long_score: i32,
    pub short_score: i32,
}

/// Oversold bands for the long side.
pub fn score_for_long(rsi: f64) -> i32 {
    if rsi < 5.0 {
        20 // extreme panic
    } else if rsi < 15.0 {
        15
    } else if rsi < 30.0 {
        10
    } else if rsi < 50.0 {
        5
    } else {
        0
    }
}

/// Overbought bands for the short side, mirrored around 50.
pub fn score_for_short(rsi: f64) -> i32 {
    if rsi > 95.0 {
        20
    } else if rsi > 85.0 {
        15
    } else if rsi > 70.0 {
        10
    } else if rsi > 50.0 {
        5
    } else {
        0
    }
}

pub fn analyze_rsi2(closes: &[f64]) -> Rsi2Analysis {
    let series = relative_strength_index(closes, 2);
    let value = series
        .iter()
        .rev()
        .find(|v| !v.is_nan())
        .copied()
        .unwrap_or(50.0);

    Rsi2Analysis {
        value,
        long_score: score_for_long(value),
        short_score: score_for_short(value),
    }
}
