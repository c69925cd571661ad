//! Portfolio selection strategies.
//!
//! A selector takes the day's qualifying BUY signals plus current exposure
//! and returns the ordered subset to actually enter. Selectors are pure and
//! resolved by name from a closed registry.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct QualifyingSignal {
    pub symbol: String,
    pub score: i32,
    pub sector: Option<String>,
    pub atr_pct: Option<f64>,
}

pub trait PortfolioSelector: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn select(
        &self,
        signals: &[QualifyingSignal],
        existing_sector_counts: &HashMap<String, usize>,
        current_open_count: usize,
        max_per_sector: Option<usize>,
        max_open_positions: Option<usize>,
    ) -> Vec<QualifyingSignal>;
}

pub struct SelectorInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub const SELECTOR_CATALOG: &[SelectorInfo] = &[
    SelectorInfo {
        name: "none",
        description: "Signals in arrival order, no filtering.",
    },
    SelectorInfo {
        name: "score_sector_low_atr",
        description: "Score descending, ties by lowest ATR, sector caps applied.",
    },
    SelectorInfo {
        name: "score_sector_high_atr",
        description: "Score descending, ties by highest ATR, sector caps applied.",
    },
    SelectorInfo {
        name: "score_sector_moderate_atr",
        description: "Prefers the middle ATR tercile, then score descending, sector caps applied.",
    },
];

pub fn get_selector(name: &str) -> Option<&'static dyn PortfolioSelector> {
    match name {
        "none" => Some(&NoneSelector),
        "score_sector_low_atr" => Some(&ScoreSectorAtr { prefer_low: true }),
        "score_sector_high_atr" => Some(&ScoreSectorAtr { prefer_low: false }),
        "score_sector_moderate_atr" => Some(&ModerateAtr),
        _ => None,
    }
}

struct NoneSelector;

impl PortfolioSelector for NoneSelector {
    fn name(&self) -> &'static str {
        "none"
    }

    fn description(&self) -> &'static str {
        "Signals in arrival order, no filtering."
    }

    fn select(
        &self,
        signals: &[QualifyingSignal],
        _existing_sector_counts: &HashMap<String, usize>,
        _current_open_count: usize,
        _max_per_sector: Option<usize>,
        _max_open_positions: Option<usize>,
    ) -> Vec<QualifyingSignal> {
        signals.to_vec()
    }
}

struct ScoreSectorAtr {
    prefer_low: bool,
}

impl PortfolioSelector for ScoreSectorAtr {
    fn name(&self) -> &'static str {
        if self.prefer_low {
            "score_sector_low_atr"
        } else {
            "score_sector_high_atr"
        }
    }

    fn description(&self) -> &'static str {
        if self.prefer_low {
            "Score descending, ties by lowest ATR, sector caps applied."
        } else {
            "Score descending, ties by highest ATR, sector caps applied."
        }
    }

    fn select(
        &self,
        signals: &[QualifyingSignal],
        existing_sector_counts: &HashMap<String, usize>,
        current_open_count: usize,
        max_per_sector: Option<usize>,
        max_open_positions: Option<usize>,
    ) -> Vec<QualifyingSignal> {
        let mut ordered = signals.to_vec();
        ordered.sort_by(|a, b| {
            b.score.cmp(&a.score).then_with(|| {
                let a_atr = a.atr_pct.unwrap_or(f64::MAX);
                let b_atr = b.atr_pct.unwrap_or(f64::MAX);
                let cmp = a_atr.partial_cmp(&b_atr).unwrap_or(std::cmp::Ordering::Equal);
                if self.prefer_low { cmp } else { cmp.reverse() }
            })
        });
        apply_caps(
            ordered,
            existing_sector_counts,
            current_open_count,
            max_per_sector,
            max_open_positions,
        )
    }
}

struct ModerateAtr;

impl PortfolioSelector for ModerateAtr {
    fn name(&self) -> &'static str {
        "score_sector_moderate_atr"
    }

    fn description(&self) -> &'static str {
        "Prefers the middle ATR tercile, then score descending, sector caps applied."
    }

    fn select(
        &self,
        signals: &[QualifyingSignal],
        existing_sector_counts: &HashMap<String, usize>,
        current_open_count: usize,
        max_per_sector: Option<usize>,
        max_open_positions: Option<usize>,
    ) -> Vec<QualifyingSignal> {
        // Tercile boundaries over the candidates that carry an ATR.
        let mut atrs: Vec<f64> = signals.iter().filter_map(|s| s.atr_pct).collect();
        atrs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let in_middle = |signal: &QualifyingSignal| -> bool {
            let Some(atr) = signal.atr_pct else {
                return false;
            };
            if atrs.len() < 3 {
                return true;
            }
            let lower = atrs[atrs.len() / 3];
            let upper = atrs[atrs.len() * 2 / 3];
            atr >= lower && atr < upper
        };

        let mut ordered = signals.to_vec();
        ordered.sort_by(|a, b| {
            in_middle(b)
                .cmp(&in_middle(a))
                .then_with(|| b.score.cmp(&a.score))
        });
        apply_caps(
            ordered,
            existing_sector_counts,
            current_open_count,
            max_per_sector,
            max_open_positions,
        )
    }
}

/// Walk the ordered candidates enforcing the open-position and per-sector
/// caps against both existing exposure and picks made in this pass.
fn apply_caps(
    ordered: Vec<QualifyingSignal>,
    existing_sector_counts: &HashMap<String, usize>,
    current_open_count: usize,
    max_per_sector: Option<usize>,
    max_open_positions: Option<usize>,
) -> Vec<QualifyingSignal> {
    let mut sector_counts = existing_sector_counts.clone();
    let mut open_count = current_open_count;
    let mut selected = Vec::new();

    for signal in ordered {
        if let Some(max_open) = max_open_positions {
            if open_count >= max_open {
                break;
            }
        }
        if let (Some(cap), Some(sector)) = (max_per_sector, signal.sector.as_deref()) {
            let count = sector_counts.entry(sector.to_string()).or_insert(0);
            if *count >= cap {
                continue;
            }
            *count += 1;
        }
        open_count += 1;
        selected.push(signal);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(symbol: &str, score: i32, sector: &str, atr: f64) -> QualifyingSignal {
        QualifyingSignal {
            symbol: symbol.into(),
            score,
            sector: Some(sector.into()),
            atr_pct: Some(atr),
        }
    }

    fn symbols(selected: &[QualifyingSignal]) -> Vec<&str> {
        selected.iter().map(|s| s.symbol.as_str()).collect()
    }

    #[test]
    fn registry_resolves_catalog() {
        for info in SELECTOR_CATALOG {
            assert_eq!(get_selector(info.name).unwrap().name(), info.name);
        }
        assert!(get_selector("martingale").is_none());
    }

    #[test]
    fn none_selector_passes_through() {
        let signals = vec![
            signal("A", 60, "XLK", 3.0),
            signal("B", 90, "XLK", 1.0),
        ];
        let selected =
            get_selector("none")
                .unwrap()
                .select(&signals, &HashMap::new(), 0, Some(1), Some(1));
        assert_eq!(symbols(&selected), vec!["A", "B"]);
    }

    #[test]
    fn low_atr_orders_by_score_then_atr_asc() {
        let signals = vec![
            signal("A", 80, "XLK", 5.0),
            signal("B", 90, "XLE", 2.0),
            signal("C", 80, "XLV", 1.0),
        ];
        let selected = get_selector("score_sector_low_atr").unwrap().select(
            &signals,
            &HashMap::new(),
            0,
            None,
            None,
        );
        assert_eq!(symbols(&selected), vec!["B", "C", "A"]);
    }

    #[test]
    fn high_atr_orders_by_score_then_atr_desc() {
        let signals = vec![
            signal("A", 80, "XLK", 5.0),
            signal("B", 90, "XLE", 2.0),
            signal("C", 80, "XLV", 1.0),
        ];
        let selected = get_selector("score_sector_high_atr").unwrap().select(
            &signals,
            &HashMap::new(),
            0,
            None,
            None,
        );
        assert_eq!(symbols(&selected), vec!["B", "A", "C"]);
    }

    #[test]
    fn sector_cap_enforced_against_existing_exposure() {
        let signals = vec![
            signal("A", 90, "XLK", 1.0),
            signal("B", 85, "XLK", 2.0),
            signal("C", 70, "XLE", 3.0),
        ];
        let existing = HashMap::from([("XLK".to_string(), 1usize)]);
        let selected = get_selector("score_sector_low_atr").unwrap().select(
            &signals,
            &existing,
            1,
            Some(2),
            None,
        );
        // XLK already holds 1: only one more XLK admitted.
        assert_eq!(symbols(&selected), vec!["A", "C"]);
    }

    #[test]
    fn max_open_positions_bounds_total() {
        let signals = vec![
            signal("A", 90, "XLK", 1.0),
            signal("B", 85, "XLE", 2.0),
            signal("C", 80, "XLV", 3.0),
        ];
        let selected = get_selector("score_sector_low_atr").unwrap().select(
            &signals,
            &HashMap::new(),
            2,
            None,
            Some(3),
        );
        assert_eq!(symbols(&selected), vec!["A"]);
    }

    #[test]
    fn max_open_already_reached_selects_nothing() {
        let signals = vec![signal("A", 90, "XLK", 1.0)];
        let selected = get_selector("score_sector_low_atr").unwrap().select(
            &signals,
            &HashMap::new(),
            5,
            None,
            Some(5),
        );
        assert!(selected.is_empty());
    }

    #[test]
    fn moderate_atr_prefers_middle_tercile() {
        let signals = vec![
            signal("LOW", 95, "XLK", 1.0),
            signal("MID", 80, "XLE", 5.0),
            signal("HIGH", 90, "XLV", 9.0),
        ];
        let selected = get_selector("score_sector_moderate_atr").unwrap().select(
            &signals,
            &HashMap::new(),
            0,
            None,
            None,
        );
        assert_eq!(selected[0].symbol, "MID");
    }

    #[test]
    fn missing_sector_is_not_capped() {
        let mut no_sector = signal("A", 90, "XLK", 1.0);
        no_sector.sector = None;
        let selected = get_selector("score_sector_low_atr").unwrap().select(
            &[no_sector],
            &HashMap::new(),
            0,
            Some(0),
            None,
        );
        assert_eq!(selected.len(), 1);
    }
}
