//! Completion metrics computed when a simulation finishes.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::types::ArenaPosition;

/// Cap applied when there are no losing trades; keeps the value finite and
/// JSON-representable.
const MAX_PROFIT_FACTOR: Decimal = Decimal::from_parts(9_999_900, 0, 0, false, 4);

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionStats {
    pub final_equity: Decimal,
    pub total_return_pct: Decimal,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub max_drawdown_pct: Decimal,
    pub avg_hold_days: Option<Decimal>,
    pub avg_win_pnl: Option<Decimal>,
    pub avg_loss_pnl: Option<Decimal>,
    pub profit_factor: Option<Decimal>,
    pub sharpe_ratio: Option<Decimal>,
    pub total_realized_pnl: Decimal,
}

/// Aggregate closed-position and equity-curve metrics.
///
/// `equity_curve` is the per-day snapshot equity (day order);
/// `daily_returns_pct` the matching daily returns. Trades are closed
/// positions that actually held shares (unfilled signals do not count).
pub fn compute_completion(
    initial_capital: Decimal,
    final_equity: Decimal,
    positions: &[ArenaPosition],
    equity_curve: &[Decimal],
    daily_returns_pct: &[Decimal],
) -> CompletionStats {
    let trades: Vec<&ArenaPosition> = positions
        .iter()
        .filter(|p| p.is_closed() && p.shares.unwrap_or(0) > 0)
        .collect();

    let total_trades = trades.len() as i32;
    let mut winning_trades = 0;
    let mut win_sum = Decimal::ZERO;
    let mut loss_sum = Decimal::ZERO;
    let mut win_count = 0i64;
    let mut loss_count = 0i64;
    let mut total_realized = Decimal::ZERO;
    let mut hold_days_sum = 0i64;
    let mut hold_count = 0i64;

    for trade in &trades {
        let pnl = trade.realized_pnl.unwrap_or(Decimal::ZERO);
        total_realized += pnl;
        if pnl > Decimal::ZERO {
            winning_trades += 1;
            win_count += 1;
            win_sum += pnl;
        } else if pnl < Decimal::ZERO {
            loss_count += 1;
            loss_sum += pnl;
        }
        if let (Some(entry), Some(exit)) = (trade.entry_date, trade.exit_date) {
            hold_days_sum += (exit - entry).num_days();
            hold_count += 1;
        }
    }

    let total_return_pct = if initial_capital > Decimal::ZERO {
        ((final_equity / initial_capital - Decimal::ONE) * Decimal::ONE_HUNDRED).round_dp(4)
    } else {
        Decimal::ZERO
    };

    let avg_win_pnl = (win_count > 0).then(|| (win_sum / Decimal::from(win_count)).round_dp(2));
    let avg_loss_pnl =
        (loss_count > 0).then(|| (loss_sum / Decimal::from(loss_count)).round_dp(2));
    let avg_hold_days =
        (hold_count > 0).then(|| (Decimal::from(hold_days_sum) / Decimal::from(hold_count)).round_dp(2));

    let profit_factor = if total_trades == 0 {
        None
    } else if loss_sum < Decimal::ZERO {
        Some((win_sum / loss_sum.abs()).round_dp(4).min(MAX_PROFIT_FACTOR))
    } else if win_sum > Decimal::ZERO {
        Some(MAX_PROFIT_FACTOR)
    } else {
        Some(Decimal::ZERO)
    };

    CompletionStats {
        final_equity: final_equity.round_dp(2),
        total_return_pct,
        total_trades,
        winning_trades,
        max_drawdown_pct: max_drawdown_pct(equity_curve),
        avg_hold_days,
        avg_win_pnl,
        avg_loss_pnl,
        profit_factor,
        sharpe_ratio: sharpe_ratio(daily_returns_pct),
        total_realized_pnl: total_realized.round_dp(2),
    }
}

/// Largest peak-to-trough decline over the equity curve, in percent.
pub fn max_drawdown_pct(equity_curve: &[Decimal]) -> Decimal {
    let mut peak = Decimal::ZERO;
    let mut max_dd = Decimal::ZERO;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > Decimal::ZERO {
            let dd = (peak - equity) / peak * Decimal::ONE_HUNDRED;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd.round_dp(4)
}

/// Annualised Sharpe over daily returns (sample standard deviation, no
/// risk-free adjustment). None with fewer than two observations or a flat
/// return series.
pub fn sharpe_ratio(daily_returns_pct: &[Decimal]) -> Option<Decimal> {
    if daily_returns_pct.len() < 2 {
        return None;
    }
    let returns: Vec<f64> = daily_returns_pct
        .iter()
        .map(|r| r.to_f64().unwrap_or(0.0) / 100.0)
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 {
        return None;
    }

    let sharpe = mean / std * TRADING_DAYS_PER_YEAR.sqrt();
    Decimal::from_f64_retain(sharpe).map(|d| d.round_dp(4))
}
