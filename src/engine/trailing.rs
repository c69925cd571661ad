//! Fixed-percentage trailing stop.
//!
//! The stop ratchets with the highest price seen since entry and never
//! moves down. A bar whose low touches the stop triggers an exit at the
//! stop price, modelling a resting stop order filled at its trigger.

use rust_decimal::Decimal;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopUpdate {
    pub highest_price: Decimal,
    pub stop_price: Decimal,
    pub triggered: bool,
    pub trigger_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy)]
pub struct FixedPercentTrailingStop {
    trail_pct: Decimal,
}

impl FixedPercentTrailingStop {
    pub fn new(trail_pct: Decimal) -> Result<Self> {
        if trail_pct <= Decimal::ZERO || trail_pct >= Decimal::ONE_HUNDRED {
            return Err(Error::validation(format!(
                "trailing stop percentage must be between 0 and 100, got {trail_pct}"
            )));
        }
        Ok(Self { trail_pct })
    }

    pub fn trail_pct(&self) -> Decimal {
        self.trail_pct
    }

    fn factor(&self) -> Decimal {
        Decimal::ONE - self.trail_pct / Decimal::ONE_HUNDRED
    }

    /// State at entry: highest = entry price, stop = entry × (1 − pct).
    pub fn initial(&self, entry_price: Decimal) -> (Decimal, Decimal) {
        (entry_price, (entry_price * self.factor()).round_dp(4))
    }

    /// Advance the stop for one bar.
    ///
    /// The trigger check runs against the stop carried into the day: a
    /// resting stop order sits at yesterday's level, so today's high cannot
    /// tighten it against today's own low. Only an untriggered bar ratchets
    /// the stop for tomorrow.
    pub fn update(
        &self,
        current_high: Decimal,
        current_low: Decimal,
        previous_highest: Decimal,
        previous_stop: Decimal,
    ) -> StopUpdate {
        if current_low <= previous_stop {
            return StopUpdate {
                highest_price: previous_highest,
                stop_price: previous_stop,
                triggered: true,
                trigger_price: Some(previous_stop),
            };
        }

        let new_highest = previous_highest.max(current_high);
        let candidate = (new_highest * self.factor()).round_dp(4);
        // Monotone: the stop never moves down.
        let new_stop = previous_stop.max(candidate);

        StopUpdate {
            highest_price: new_highest,
            stop_price: new_stop,
            triggered: false,
            trigger_price: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_out_of_range_percentages() {
        assert!(FixedPercentTrailingStop::new(dec!(0)).is_err());
        assert!(FixedPercentTrailingStop::new(dec!(-5)).is_err());
        assert!(FixedPercentTrailingStop::new(dec!(100)).is_err());
        assert!(FixedPercentTrailingStop::new(dec!(150)).is_err());
        assert!(FixedPercentTrailingStop::new(dec!(0.01)).is_ok());
        assert!(FixedPercentTrailingStop::new(dec!(99.99)).is_ok());
    }

    #[test]
    fn initial_stop_5_percent() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let (highest, price) = stop.initial(dec!(100.00));
        assert_eq!(highest, dec!(100.00));
        assert_eq!(price, dec!(95.0000));
    }

    #[test]
    fn initial_stop_quantised_to_4dp() {
        let stop = FixedPercentTrailingStop::new(dec!(7)).unwrap();
        let (_, price) = stop.initial(dec!(123.45));
        assert_eq!(price, dec!(114.8085));
    }

    #[test]
    fn new_high_raises_stop() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let update = stop.update(dec!(110), dec!(105), dec!(100), dec!(95));
        assert!(!update.triggered);
        assert_eq!(update.highest_price, dec!(110));
        assert_eq!(update.stop_price, dec!(104.5000));
        assert_eq!(update.trigger_price, None);
    }

    #[test]
    fn no_new_high_keeps_stop() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let update = stop.update(dec!(108), dec!(106), dec!(110), dec!(104.50));
        assert!(!update.triggered);
        assert_eq!(update.highest_price, dec!(110));
        assert_eq!(update.stop_price, dec!(104.50));
    }

    #[test]
    fn stop_never_moves_down() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        // Candidate from a 106 high would be 100.70, below the current
        // stop: the stop holds at its previous level.
        let update = stop.update(dec!(106), dec!(105), dec!(110), dec!(104.50));
        assert!(!update.triggered);
        assert_eq!(update.stop_price, dec!(104.50));
        assert_eq!(update.highest_price, dec!(110));
    }

    #[test]
    fn trigger_preserves_carried_state() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        // The bar makes a new high AND takes out the stop: the exit fills
        // at the carried stop, and the new high does not tighten it first.
        let update = stop.update(dec!(115), dec!(104), dec!(110), dec!(104.50));
        assert!(update.triggered);
        assert_eq!(update.trigger_price, Some(dec!(104.50)));
        assert_eq!(update.highest_price, dec!(110));
        assert_eq!(update.stop_price, dec!(104.50));
    }

    #[test]
    fn triggers_when_low_touches_stop() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let update = stop.update(dec!(106), dec!(104.50), dec!(110), dec!(104.50));
        assert!(update.triggered);
        assert_eq!(update.trigger_price, Some(dec!(104.50)));
    }

    #[test]
    fn triggers_when_low_breaks_stop() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let update = stop.update(dec!(106), dec!(103), dec!(110), dec!(104.50));
        assert!(update.triggered);
        // Exit at the stop price, not the low.
        assert_eq!(update.trigger_price, Some(dec!(104.50)));
    }

    #[test]
    fn no_trigger_when_low_above_stop() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let update = stop.update(dec!(108), dec!(105), dec!(110), dec!(104.50));
        assert!(!update.triggered);
        assert_eq!(update.trigger_price, None);
    }

    #[test]
    fn gap_down_exits_at_stop_price() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let (highest, price) = stop.initial(dec!(100.00));
        // Whole bar gaps below the stop.
        let update = stop.update(dec!(92), dec!(90), highest, price);
        assert!(update.triggered);
        assert_eq!(update.trigger_price, Some(dec!(95.0000)));
    }

    #[test]
    fn full_lifecycle_locks_in_gains() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let (mut highest, mut price) = stop.initial(dec!(100.00));
        assert_eq!(price, dec!(95.0000));

        // Rise to 105.
        let update = stop.update(dec!(105), dec!(101), highest, price);
        assert!(!update.triggered);
        assert_eq!(update.stop_price, dec!(99.7500));
        (highest, price) = (update.highest_price, update.stop_price);

        // Rise to 110.
        let update = stop.update(dec!(110), dec!(104), highest, price);
        assert!(!update.triggered);
        assert_eq!(update.stop_price, dec!(104.5000));
        (highest, price) = (update.highest_price, update.stop_price);

        // Consolidation: stop holds.
        let update = stop.update(dec!(108), dec!(106), highest, price);
        assert!(!update.triggered);
        assert_eq!(update.stop_price, dec!(104.5000));
        (highest, price) = (update.highest_price, update.stop_price);

        // Drop through the stop: exit at 104.50 for a locked-in gain.
        let update = stop.update(dec!(107), dec!(103), highest, price);
        assert!(update.triggered);
        assert_eq!(update.trigger_price, Some(dec!(104.5000)));
    }

    #[test]
    fn monotonicity_over_random_walk() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let (mut highest, mut price) = stop.initial(dec!(100.00));
        let highs = [102, 104, 101, 106, 103, 108, 107, 111, 109, 112];
        let mut last_stop = price;
        for h in highs {
            let high = Decimal::from(h);
            let low = high - dec!(1);
            let update = stop.update(high, low, highest, price);
            assert!(update.stop_price >= last_stop, "stop moved down");
            last_stop = update.stop_price;
            if update.triggered {
                break;
            }
            (highest, price) = (update.highest_price, update.stop_price);
        }
    }

    #[test]
    fn consecutive_new_highs() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let (mut highest, mut price) = stop.initial(dec!(100.00));
        for h in [105, 110, 115, 120, 125] {
            let high = Decimal::from(h);
            let update = stop.update(high, high - dec!(3), highest, price);
            assert!(!update.triggered);
            (highest, price) = (update.highest_price, update.stop_price);
        }
        assert_eq!(highest, dec!(125));
        assert_eq!(price, dec!(118.7500));
    }

    #[test]
    fn penny_stock_precision() {
        let stop = FixedPercentTrailingStop::new(dec!(5)).unwrap();
        let (highest, price) = stop.initial(dec!(0.50));
        assert_eq!(price, dec!(0.4750));
        let update = stop.update(dec!(0.60), dec!(0.55), highest, price);
        assert_eq!(update.stop_price, dec!(0.5700));
    }
}
