//! CCI zone and momentum analysis over a bar window.

use super::commodity_channel_index;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CciZone {
    Overbought,
    Oversold,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CciDirection {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CciSignal {
    MomentumBullish,
    MomentumBearish,
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct CciAnalysis {
    pub value: f64,
    pub zone: CciZone,
    pub direction: CciDirection,
    pub signal: CciSignal,
}

impl Default for CciAnalysis {
    fn default() -> Self {
        Self {
            value: 0.0,
            zone: CciZone::Neutral,
            direction: CciDirection::Flat,
            signal: CciSignal::None,
        }
    }
}

/// Direction threshold: CCI moves under ±5 points are treated as flat noise.
const DIRECTION_THRESHOLD: f64 = 5.0;

pub fn analyze_cci(high: &[f64], low: &[f64], close: &[f64], period: usize) -> CciAnalysis {
    let series = commodity_channel_index(high, low, close, period);
    let valid: Vec<f64> = series.iter().copied().filter(|v| !v.is_nan()).collect();

    let Some(&value) = valid.last() else {
        return CciAnalysis::default();
    };

    let zone = if value > 100.0 {
        CciZone::Overbought
    } else if value < -100.0 {
        CciZone::Oversold
    } else {
        CciZone::Neutral
    };

    let (direction, signal) = match valid.get(valid.len().wrapping_sub(2)) {
        Some(&prev) => {
            let delta = value - prev;
            let direction = if delta > DIRECTION_THRESHOLD {
                CciDirection::Rising
            } else if delta < -DIRECTION_THRESHOLD {
                CciDirection::Falling
            } else {
                CciDirection::Flat
            };
            let signal = if prev <= 100.0 && value > 100.0 {
                CciSignal::MomentumBullish
            } else if prev >= -100.0 && value < -100.0 {
                CciSignal::MomentumBearish
            } else {
                CciSignal::None
            };
            (direction, signal)
        }
        None => (CciDirection::Flat, CciSignal::None),
    };

    CciAnalysis {
        value,
        zone,
        direction,
        signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overbought_zone_on_strong_uptrend() {
        let highs: Vec<f64> = (100..125).map(f64::from).collect();
        let lows: Vec<f64> = (90..115).map(f64::from).collect();
        let closes: Vec<f64> = (95..120).map(f64::from).collect();
        let result = analyze_cci(&highs, &lows, &closes, 14);
        assert_eq!(result.zone, CciZone::Overbought);
        assert!(result.value > 100.0);
    }

    #[test]
    fn oversold_zone_on_strong_downtrend() {
        let highs: Vec<f64> = (0..25).map(|i| 125.0 - f64::from(i)).collect();
        let lows: Vec<f64> = (0..25).map(|i| 115.0 - f64::from(i)).collect();
        let closes: Vec<f64> = (0..25).map(|i| 120.0 - f64::from(i)).collect();
        let result = analyze_cci(&highs, &lows, &closes, 14);
        assert_eq!(result.zone, CciZone::Oversold);
        assert!(result.value < -100.0);
    }

    #[test]
    fn neutral_zone_and_flat_on_sideways() {
        let highs = vec![105.0; 25];
        let lows = vec![95.0; 25];
        let closes = vec![100.0; 25];
        let result = analyze_cci(&highs, &lows, &closes, 14);
        assert_eq!(result.zone, CciZone::Neutral);
        assert_eq!(result.direction, CciDirection::Flat);
        assert_eq!(result.signal, CciSignal::None);
    }

    #[test]
    fn bullish_crossing_flags_momentum() {
        let mut highs = vec![100.0; 15];
        let mut lows = vec![95.0; 15];
        let mut closes = vec![98.0; 15];
        highs.extend([110.0, 115.0, 120.0, 125.0, 130.0]);
        lows.extend([105.0, 110.0, 115.0, 120.0, 125.0]);
        closes.extend([108.0, 113.0, 118.0, 123.0, 128.0]);
        let result = analyze_cci(&highs, &lows, &closes, 14);
        assert!(result.zone == CciZone::Overbought || result.signal == CciSignal::MomentumBullish);
    }

    #[test]
    fn bearish_crossing_flags_momentum() {
        let mut highs = vec![105.0; 15];
        let mut lows = vec![95.0; 15];
        let mut closes = vec![100.0; 15];
        highs.extend([95.0, 90.0, 85.0, 80.0, 75.0]);
        lows.extend([90.0, 85.0, 80.0, 75.0, 70.0]);
        closes.extend([92.0, 87.0, 82.0, 77.0, 72.0]);
        let result = analyze_cci(&highs, &lows, &closes, 14);
        assert!(result.zone == CciZone::Oversold || result.signal == CciSignal::MomentumBearish);
    }

    #[test]
    fn insufficient_data_yields_defaults() {
        let result = analyze_cci(&[100.0, 101.0], &[95.0, 96.0], &[98.0, 99.0], 14);
        assert_eq!(result.value, 0.0);
        assert_eq!(result.zone, CciZone::Neutral);
        assert_eq!(result.direction, CciDirection::Flat);
        assert_eq!(result.signal, CciSignal::None);
    }
}
