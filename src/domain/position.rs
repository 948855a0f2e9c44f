//! ATR trailing stops for open lots.

use crate::domain::ledger::TradeId;

#[derive(Debug, Clone, PartialEq)]
pub struct StopLossConfig {
    pub enabled: bool,
    pub trailing: bool,
    pub atr_multiplier: f64,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        StopLossConfig {
            enabled: true,
            trailing: true,
            atr_multiplier: 2.0,
        }
    }
}

/// Where a lot sits in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotPhase {
    Open,
    Trailing,
    Closed,
}

/// A long lot with an active stop.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub lot_id: TradeId,
    pub entry_price: f64,
    pub entry_atr: f64,
    pub stop_level: f64,
    pub trailing_extreme: f64,
    pub trailing_active: bool,
}

impl OpenPosition {
    pub fn new(lot_id: TradeId, entry_price: f64, entry_atr: f64, multiplier: f64) -> Self {
        OpenPosition {
            lot_id,
            entry_price,
            entry_atr,
            stop_level: entry_price - entry_atr * multiplier,
            trailing_extreme: entry_price,
            trailing_active: false,
        }
    }

    pub fn phase(&self) -> LotPhase {
        if self.trailing_active {
            LotPhase::Trailing
        } else {
            LotPhase::Open
        }
    }

    /// Ratchet the stop after a new high. The stop never moves down.
    pub fn trail(&mut self, price: f64, current_atr: f64, multiplier: f64) -> bool {
        if price <= self.trailing_extreme {
            return false;
        }
        self.trailing_extreme = price;
        self.trailing_active = true;
        let candidate = price - current_atr * multiplier;
        if candidate > self.stop_level {
            self.stop_level = candidate;
            true
        } else {
            false
        }
    }

    pub fn is_breached(&self, price: f64) -> bool {
        price <= self.stop_level
    }

    pub fn unrealized_pct(&self, price: f64) -> f64 {
        if self.entry_price > 0.0 {
            (price - self.entry_price) / self.entry_price * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn initial_stop_sits_below_entry() {
        let pos = OpenPosition::new(1, 100.0, 2.5, 2.0);
        assert!((pos.stop_level - 95.0).abs() < f64::EPSILON);
        assert_eq!(pos.phase(), LotPhase::Open);
        assert!(pos.is_breached(95.0));
        assert!(!pos.is_breached(95.01));
    }

    #[test]
    fn trailing_moves_up_on_new_high() {
        let mut pos = OpenPosition::new(1, 100.0, 2.0, 2.0);
        assert!(pos.trail(110.0, 2.0, 2.0));
        assert!((pos.stop_level - 106.0).abs() < f64::EPSILON);
        assert_eq!(pos.phase(), LotPhase::Trailing);
    }

    #[test]
    fn lower_price_does_not_move_stop() {
        let mut pos = OpenPosition::new(1, 100.0, 2.0, 2.0);
        pos.trail(110.0, 2.0, 2.0);
        assert!(!pos.trail(105.0, 0.1, 2.0));
        assert!((pos.stop_level - 106.0).abs() < f64::EPSILON);
    }

    #[test]
    fn wider_atr_on_new_high_keeps_old_stop() {
        let mut pos = OpenPosition::new(1, 100.0, 1.0, 2.0);
        pos.trail(104.0, 1.0, 2.0);
        assert!(!pos.trail(105.0, 5.0, 2.0));
        assert!((pos.stop_level - 102.0).abs() < f64::EPSILON);
        assert!((pos.trailing_extreme - 105.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrealized_pct() {
        let pos = OpenPosition::new(1, 100.0, 1.0, 2.0);
        assert!((pos.unrealized_pct(110.0) - 10.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn stop_never_decreases(steps in proptest::collection::vec((50.0f64..200.0, 0.01f64..20.0), 1..100)) {
            let mut pos = OpenPosition::new(1, 100.0, 2.0, 2.0);
            let mut last = pos.stop_level;
            for (price, atr) in steps {
                pos.trail(price, atr, 2.0);
                prop_assert!(pos.stop_level >= last);
                last = pos.stop_level;
            }
        }
    }
}
