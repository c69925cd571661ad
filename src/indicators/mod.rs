//! Technical indicator math.
//!
//! Pure functions over f64 slices. Outputs are aligned with their inputs:
//! positions with insufficient lookback hold `NAN` rather than shrinking
//! the vector, so callers can index by bar offset.

pub mod candles;
pub mod cci;
pub mod rsi2;

pub fn simple_moving_average(prices: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }
    let mut sum: f64 = prices[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..prices.len() {
        sum += prices[i] - prices[i - period];
        out[i] = sum / period as f64;
    }
    out
}

pub fn exponential_moving_average(prices: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    // Seed with the SMA of the first window.
    let mut ema: f64 = prices[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = ema;
    for i in period..prices.len() {
        ema = alpha * prices[i] + (1.0 - alpha) * ema;
        out[i] = ema;
    }
    out
}

pub fn typical_price(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    high.iter()
        .zip(low)
        .zip(close)
        .map(|((h, l), c)| (h + l + c) / 3.0)
        .collect()
}

/// Relative Strength Index with Wilder smoothing. `period = 2` gives RSI-2.
pub fn relative_strength_index(prices: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let change = prices[i] - prices[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            return 50.0;
        }
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Commodity Channel Index with the conventional 0.015 scaling constant.
/// A zero mean-absolute-deviation (flat market) yields 0, not a division
/// error.
pub fn commodity_channel_index(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
) -> Vec<f64> {
    let tp = typical_price(high, low, close);
    let mut out = vec![f64::NAN; tp.len()];
    if period == 0 || tp.len() < period {
        return out;
    }
    let sma = simple_moving_average(&tp, period);
    for i in (period - 1)..tp.len() {
        let window = &tp[i + 1 - period..=i];
        let mean = sma[i];
        let mad = window.iter().map(|v| (v - mean).abs()).sum::<f64>() / period as f64;
        out[i] = if mad == 0.0 {
            0.0
        } else {
            (tp[i] - mean) / (0.015 * mad)
        };
    }
    out
}

/// Average True Range with Wilder smoothing.
pub fn average_true_range(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let n = high.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return out;
    }

    let mut tr = vec![0.0; n];
    tr[0] = high[0] - low[0];
    for i in 1..n {
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        tr[i] = hl.max(hc).max(lc);
    }

    let mut atr: f64 = tr[1..=period].iter().sum::<f64>() / period as f64;
    out[period] = atr;
    for i in (period + 1)..n {
        atr = (atr * (period as f64 - 1.0) + tr[i]) / period as f64;
        out[i] = atr;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_basic() {
        let sma = simple_moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert!(sma[0].is_nan());
        assert!(sma[1].is_nan());
        assert!((sma[2] - 2.0).abs() < 1e-10);
        assert!((sma[3] - 3.0).abs() < 1e-10);
        assert!((sma[4] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn sma_period_one_is_identity() {
        let prices = [10.0, 20.0, 30.0];
        let sma = simple_moving_average(&prices, 1);
        assert_eq!(sma, prices.to_vec());
    }

    #[test]
    fn sma_insufficient_data_all_nan() {
        let sma = simple_moving_average(&[1.0, 2.0], 5);
        assert!(sma.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn sma_period_equal_to_length() {
        let sma = simple_moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 5);
        assert!(sma[3].is_nan());
        assert!((sma[4] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn ema_seeds_with_sma_then_smooths() {
        let ema = exponential_moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert!((ema[2] - 2.0).abs() < 1e-10);
        // alpha = 0.5: 0.5*4 + 0.5*2 = 3
        assert!((ema[3] - 3.0).abs() < 1e-10);
        assert!((ema[4] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn typical_price_is_hlc_mean() {
        let tp = typical_price(&[12.0], &[6.0], &[9.0]);
        assert!((tp[0] - 9.0).abs() < 1e-10);
    }

    #[test]
    fn rsi_uptrend_above_50() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + f64::from(i)).collect();
        let rsi = relative_strength_index(&prices, 14);
        assert!(rsi[29] > 50.0);
        // Monotone gains with no losses pin RSI to 100.
        assert!((rsi[29] - 100.0).abs() < 1e-10);
    }

    #[test]
    fn rsi_downtrend_below_50() {
        let prices: Vec<f64> = (0..30).map(|i| 200.0 - f64::from(i)).collect();
        let rsi = relative_strength_index(&prices, 14);
        assert!(rsi[29] < 50.0);
    }

    #[test]
    fn rsi_flat_is_50() {
        let prices = vec![100.0; 20];
        let rsi = relative_strength_index(&prices, 14);
        assert!((rsi[19] - 50.0).abs() < 1e-10);
    }

    #[test]
    fn rsi_bounded() {
        let prices: Vec<f64> = (0..60)
            .map(|i| 100.0 + 10.0 * f64::from(i % 7) - 3.0 * f64::from(i % 3))
            .collect();
        for v in relative_strength_index(&prices, 14) {
            if !v.is_nan() {
                assert!((0.0..=100.0).contains(&v));
            }
        }
    }

    #[test]
    fn cci_uptrend_overbought() {
        let highs: Vec<f64> = (100..125).map(f64::from).collect();
        let lows: Vec<f64> = (90..115).map(f64::from).collect();
        let closes: Vec<f64> = (95..120).map(f64::from).collect();
        let cci = commodity_channel_index(&highs, &lows, &closes, 14);
        assert!(*cci.last().unwrap() > 100.0);
    }

    #[test]
    fn cci_downtrend_oversold() {
        let highs: Vec<f64> = (0..25).map(|i| 125.0 - f64::from(i)).collect();
        let lows: Vec<f64> = (0..25).map(|i| 115.0 - f64::from(i)).collect();
        let closes: Vec<f64> = (0..25).map(|i| 120.0 - f64::from(i)).collect();
        let cci = commodity_channel_index(&highs, &lows, &closes, 14);
        assert!(*cci.last().unwrap() < -100.0);
    }

    #[test]
    fn cci_flat_market_is_zero() {
        let highs = vec![105.0; 25];
        let lows = vec![95.0; 25];
        let closes = vec![100.0; 25];
        let cci = commodity_channel_index(&highs, &lows, &closes, 14);
        assert!((cci.last().unwrap()).abs() < 1e-10);
    }

    #[test]
    fn atr_constant_range() {
        // Every bar spans exactly 10 points with no gaps.
        let highs = vec![110.0; 30];
        let lows = vec![100.0; 30];
        let closes = vec![105.0; 30];
        let atr = average_true_range(&highs, &lows, &closes, 14);
        assert!((atr.last().unwrap() - 10.0).abs() < 1e-10);
    }

    #[test]
    fn atr_accounts_for_gaps() {
        // Second bar gaps up: TR includes |high - prev close|.
        let highs = [102.0, 120.0];
        let lows = [98.0, 115.0];
        let closes = [100.0, 118.0];
        let atr = average_true_range(&highs, &lows, &closes, 1);
        // TR[1] = max(5, |120-100|, |115-100|) = 20
        assert!((atr[1] - 20.0).abs() < 1e-10);
    }
}
