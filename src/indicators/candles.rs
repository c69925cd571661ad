//! Single- and two-candle reversal patterns used by the live20 criteria.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandlePattern {
    Hammer,
    BullishEngulfing,
    ShootingStar,
    BearishEngulfing,
}

impl CandlePattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hammer => "hammer",
            Self::BullishEngulfing => "bullish_engulfing",
            Self::ShootingStar => "shooting_star",
            Self::BearishEngulfing => "bearish_engulfing",
        }
    }

    pub fn is_bullish(self) -> bool {
        matches!(self, Self::Hammer | Self::BullishEngulfing)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    fn lower_shadow(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    fn upper_shadow(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Detect a reversal pattern from the last one or two candles.
/// Two-candle patterns (engulfing) take precedence over single-candle ones.
pub fn detect_pattern(prev: Option<&Candle>, last: &Candle) -> Option<CandlePattern> {
    if let Some(prev) = prev {
        if is_bullish_engulfing(prev, last) {
            return Some(CandlePattern::BullishEngulfing);
        }
        if is_bearish_engulfing(prev, last) {
            return Some(CandlePattern::BearishEngulfing);
        }
    }
    if is_hammer(last) {
        return Some(CandlePattern::Hammer);
    }
    if is_shooting_star(last) {
        return Some(CandlePattern::ShootingStar);
    }
    None
}

/// Long lower shadow (>= 2x body), little upper shadow.
fn is_hammer(c: &Candle) -> bool {
    let body = c.body();
    body > 0.0 && c.lower_shadow() >= 2.0 * body && c.upper_shadow() <= body
}

/// Long upper shadow (>= 2x body), little lower shadow.
fn is_shooting_star(c: &Candle) -> bool {
    let body = c.body();
    body > 0.0 && c.upper_shadow() >= 2.0 * body && c.lower_shadow() <= body
}

fn is_bullish_engulfing(prev: &Candle, cur: &Candle) -> bool {
    prev.is_bearish() && cur.is_bullish() && cur.open <= prev.close && cur.close >= prev.open
}

fn is_bearish_engulfing(prev: &Candle, cur: &Candle) -> bool {
    prev.is_bullish() && cur.is_bearish() && cur.open >= prev.close && cur.close <= prev.open
}
