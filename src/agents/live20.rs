//! Live 20 mean-reversion agent.
//!
//! Five criteria over a ~20-day window, each contributing up to 20 points
//! per side: trend context (MA20 slope), MA20 stretch (graduated pullback),
//! candle reversal pattern, volume expansion, and momentum (CCI zones or
//! graduated RSI-2). A side needs the higher score and at least three
//! aligned criteria to become a setup; the arena BUY additionally requires
//! `score >= min_buy_score`.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;

use super::{Agent, AgentAction, AgentDecision, Direction};
use crate::data::PriceBar;
use crate::engine::types::AgentConfig;
use crate::error::{Error, Result};
use crate::indicators::candles::{detect_pattern, Candle, CandlePattern};
use crate::indicators::cci::analyze_cci;
use crate::indicators::rsi2::analyze_rsi2;
use crate::indicators::{average_true_range, simple_moving_average};

const MA_PERIOD: usize = 20;
const SLOPE_LOOKBACK: usize = 5;
const ATR_PERIOD: usize = 14;
/// Criteria aligned with a side are those contributing at least this many
/// points to it.
const ALIGNMENT_THRESHOLD: i32 = 10;
const REQUIRED_ALIGNED: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentumAlgo {
    Cci,
    Rsi2,
}

impl MomentumAlgo {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "cci" => Ok(Self::Cci),
            "rsi2" => Ok(Self::Rsi2),
            other => Err(Error::validation(format!(
                "unknown scoring_algorithm '{other}' (expected 'cci' or 'rsi2')"
            ))),
        }
    }
}

/// Per-symbol analysis outcome, consumed by both the arena agent contract
/// and the Live20 screening worker.
#[derive(Debug, Clone)]
pub struct Live20Analysis {
    pub direction: Direction,
    pub score: i32,
    pub long_score: i32,
    pub short_score: i32,
    pub trend_aligned: bool,
    pub ma20_distance_pct: Option<f64>,
    pub candle_pattern: Option<CandlePattern>,
    pub volume_signal: bool,
    pub momentum: f64,
    pub atr_pct: Option<f64>,
    pub reasoning: String,
}

impl Live20Analysis {
    fn no_setup(reason: &str) -> Self {
        Self {
            direction: Direction::NoSetup,
            score: 0,
            long_score: 0,
            short_score: 0,
            trend_aligned: false,
            ma20_distance_pct: None,
            candle_pattern: None,
            volume_signal: false,
            momentum: 0.0,
            atr_pct: None,
            reasoning: reason.to_string(),
        }
    }
}

pub struct Live20Agent {
    min_buy_score: i32,
    momentum: MomentumAlgo,
}

impl Live20Agent {
    pub fn new(min_buy_score: i32, momentum: MomentumAlgo) -> Self {
        Self {
            min_buy_score,
            momentum,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self::new(
            config.min_buy_score,
            MomentumAlgo::parse(&config.scoring_algorithm)?,
        ))
    }

    /// Run the five-criteria analysis over ascending bars.
    pub fn analyze(&self, bars: &[PriceBar]) -> Live20Analysis {
        if bars.len() < MA_PERIOD + SLOPE_LOOKBACK {
            return Live20Analysis::no_setup("insufficient history");
        }

        let closes: Vec<f64> = bars.iter().map(|b| decimal_f64(b.close)).collect();
        let highs: Vec<f64> = bars.iter().map(|b| decimal_f64(b.high)).collect();
        let lows: Vec<f64> = bars.iter().map(|b| decimal_f64(b.low)).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();

        let ma20 = simple_moving_average(&closes, MA_PERIOD);
        let last = closes.len() - 1;
        let ma_now = ma20[last];
        let ma_then = ma20[last - SLOPE_LOOKBACK];
        if ma_now.is_nan() || ma_then.is_nan() {
            return Live20Analysis::no_setup("insufficient history");
        }

        let mut long_score = 0;
        let mut short_score = 0;
        let mut long_aligned = 0;
        let mut short_aligned = 0;
        let mut notes: Vec<String> = Vec::new();

        let mut tally = |long: i32, short: i32| {
            long_score += long;
            short_score += short;
            if long >= ALIGNMENT_THRESHOLD {
                long_aligned += 1;
            }
            if short >= ALIGNMENT_THRESHOLD {
                short_aligned += 1;
            }
        };

        // 1. Trend context: pullbacks are bought in uptrends, bounces sold
        // in downtrends.
        let ma_rising = ma_now > ma_then;
        tally(if ma_rising { 20 } else { 0 }, if ma_rising { 0 } else { 20 });
        notes.push(format!("MA20 {}", if ma_rising { "rising" } else { "falling" }));

        // 2. MA20 stretch, graduated by how far price has pulled away.
        let distance_pct = (closes[last] - ma_now) / ma_now * 100.0;
        let (long_pts, short_pts) = stretch_points(distance_pct);
        tally(long_pts, short_pts);
        notes.push(format!("{distance_pct:+.2}% vs MA20"));

        // 3. Candle reversal pattern.
        let candle_pattern = {
            let prev = bars.len().checked_sub(2).map(|i| bar_candle(&bars[i]));
            detect_pattern(prev.as_ref(), &bar_candle(&bars[last]))
        };
        match candle_pattern {
            Some(p) if p.is_bullish() => {
                tally(20, 0);
                notes.push(p.as_str().to_string());
            }
            Some(p) => {
                tally(0, 20);
                notes.push(p.as_str().to_string());
            }
            None => tally(0, 0),
        }

        // 4. Volume expansion confirms either side.
        let avg_volume =
            volumes[volumes.len() - MA_PERIOD..].iter().sum::<f64>() / MA_PERIOD as f64;
        let volume_ratio = if avg_volume > 0.0 {
            volumes[last] / avg_volume
        } else {
            0.0
        };
        let volume_signal = volume_ratio >= 1.5;
        let volume_pts = if volume_signal {
            20
        } else if volume_ratio >= 1.2 {
            10
        } else {
            0
        };
        tally(volume_pts, volume_pts);
        if volume_pts > 0 {
            notes.push(format!("volume {volume_ratio:.1}x"));
        }

        // 5. Momentum.
        let momentum = match self.momentum {
            MomentumAlgo::Cci => {
                let cci = analyze_cci(&highs, &lows, &closes, MA_PERIOD);
                tally(cci_long_points(cci.value), cci_short_points(cci.value));
                notes.push(format!("CCI {:.0}", cci.value));
                cci.value
            }
            MomentumAlgo::Rsi2 => {
                let rsi = analyze_rsi2(&closes);
                tally(rsi.long_score, rsi.short_score);
                notes.push(format!("RSI-2 {:.1}", rsi.value));
                rsi.value
            }
        };

        let direction = if long_score > short_score && long_aligned >= REQUIRED_ALIGNED {
            Direction::Long
        } else if short_score > long_score && short_aligned >= REQUIRED_ALIGNED {
            Direction::Short
        } else {
            Direction::NoSetup
        };
        let score = match direction {
            Direction::Long => long_score,
            Direction::Short => short_score,
            Direction::NoSetup => long_score.max(short_score),
        };

        let atr = average_true_range(&highs, &lows, &closes, ATR_PERIOD);
        let atr_pct = atr
            .last()
            .filter(|v| !v.is_nan() && closes[last] > 0.0)
            .map(|v| v / closes[last] * 100.0);

        Live20Analysis {
            direction,
            score,
            long_score,
            short_score,
            trend_aligned: match direction {
                Direction::Long => ma_rising,
                Direction::Short => !ma_rising,
                Direction::NoSetup => false,
            },
            ma20_distance_pct: Some(distance_pct),
            candle_pattern,
            volume_signal,
            momentum,
            atr_pct,
            reasoning: format!("{}: {}", direction.as_str(), notes.join(", ")),
        }
    }
}

impl Agent for Live20Agent {
    fn name(&self) -> &'static str {
        "live20"
    }

    fn required_lookback_days(&self) -> usize {
        MA_PERIOD + SLOPE_LOOKBACK + ATR_PERIOD
    }

    fn evaluate(
        &self,
        _symbol: &str,
        history: &[PriceBar],
        _current_date: NaiveDate,
        has_open_position: bool,
    ) -> AgentDecision {
        if has_open_position {
            return AgentDecision {
                action: AgentAction::Hold,
                score: None,
                reasoning: None,
            };
        }

        let analysis = self.analyze(history);
        if analysis.direction == Direction::Long && analysis.score >= self.min_buy_score {
            AgentDecision {
                action: AgentAction::Buy,
                score: Some(analysis.score),
                reasoning: Some(analysis.reasoning),
            }
        } else {
            AgentDecision {
                action: AgentAction::NoSignal,
                score: Some(analysis.score),
                reasoning: Some(analysis.reasoning),
            }
        }
    }
}

/// Graduated pullback scoring for distance from MA20, in percent.
fn stretch_points(distance_pct: f64) -> (i32, i32) {
    let long = if distance_pct <= -4.0 {
        20
    } else if distance_pct <= -2.5 {
        15
    } else if distance_pct <= -1.0 {
        10
    } else if distance_pct < 0.0 {
        5
    } else {
        0
    };
    let short = if distance_pct >= 4.0 {
        20
    } else if distance_pct >= 2.5 {
        15
    } else if distance_pct >= 1.0 {
        10
    } else if distance_pct > 0.0 {
        5
    } else {
        0
    };
    (long, short)
}

fn cci_long_points(value: f64) -> i32 {
    if value < -100.0 {
        20
    } else if value < -50.0 {
        10
    } else if value < 0.0 {
        5
    } else {
        0
    }
}

fn cci_short_points(value: f64) -> i32 {
    if value > 100.0 {
        20
    } else if value > 50.0 {
        10
    } else if value > 0.0 {
        5
    } else {
        0
    }
}

fn bar_candle(bar: &PriceBar) -> Candle {
    Candle {
        open: decimal_f64(bar.open),
        high: decimal_f64(bar.high),
        low: decimal_f64(bar.low),
        close: decimal_f64(bar.close),
    }
}

fn decimal_f64(d: rust_decimal::Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}
