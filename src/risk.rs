//! Portfolio risk calculations
//!
//! Pure functions used by the trade executor to size replicas and enforce the
//! per-position concentration limit.

use crate::types::Position;
use rust_decimal::Decimal;

/// Total portfolio value: USDC balance plus the current value of all positions
pub fn portfolio_value(balance: Decimal, positions: &[Position]) -> Decimal {
    balance + positions.iter().map(|p| p.current_value).sum::<Decimal>()
}

/// Position size as a percentage of the portfolio (0 for an empty portfolio)
pub fn position_percentage(value: Decimal, total: Decimal) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }
    value / total * Decimal::ONE_HUNDRED
}

/// Whether adding `proposed` to `current` pushes the position above `max_pct`
pub fn exceeds_limit(current: Decimal, proposed: Decimal, total: Decimal, max_pct: Decimal) -> bool {
    position_percentage(current + proposed, total) > max_pct
}

/// Pro-rata replica value: the target's trade scaled by the bot's capital
/// relative to the target's capital after the trade.
///
/// Returns `None` when the target has no capital to scale against.
pub fn pro_rata_value(usdc_size: Decimal, bot_balance: Decimal, target_balance: Decimal) -> Option<Decimal> {
    let ratio = bot_balance.checked_div(target_balance + usdc_size)?;
    Some(usdc_size * ratio)
}

/// Snapshot of the risk inputs for one trade
#[derive(Debug, Clone, PartialEq)]
pub struct RiskState {
    pub total_portfolio_value: Decimal,
    pub current_position_value: Decimal,
    pub proposed_value: Decimal,
}

impl RiskState {
    pub fn current_pct(&self) -> Decimal {
        position_percentage(self.current_position_value, self.total_portfolio_value)
    }

    pub fn projected_pct(&self) -> Decimal {
        position_percentage(
            self.current_position_value + self.proposed_value,
            self.total_portfolio_value,
        )
    }

    pub fn exceeds(&self, max_pct: Decimal) -> bool {
        exceeds_limit(
            self.current_position_value,
            self.proposed_value,
            self.total_portfolio_value,
            max_pct,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(value: Decimal) -> Position {
        Position {
            asset: "1".to_string(),
            condition_id: "0xc".to_string(),
            title: String::new(),
            outcome: String::new(),
            size: dec!(1),
            current_value: value,
            cur_price: dec!(0.5),
            redeemable: false,
        }
    }

    #[test]
    fn test_portfolio_value_sums_positions() {
        let positions = vec![position(dec!(100)), position(dec!(250.5))];
        assert_eq!(portfolio_value(dec!(649.5), &positions), dec!(1000));
        assert_eq!(portfolio_value(dec!(10), &[]), dec!(10));
    }

    #[test]
    fn test_position_percentage_of_empty_portfolio_is_zero() {
        assert_eq!(position_percentage(dec!(50), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(position_percentage(dec!(50), dec!(200)), dec!(25));
    }

    #[test]
    fn test_position_limit_breach() {
        // 150 / 1000 = 15% > 10%
        assert!(exceeds_limit(dec!(100), dec!(50), dec!(1000), dec!(10)));
        // exactly at the limit is allowed
        assert!(!exceeds_limit(dec!(50), dec!(50), dec!(1000), dec!(10)));
        // empty portfolio never trips the limit
        assert!(!exceeds_limit(dec!(100), dec!(50), Decimal::ZERO, dec!(10)));
    }

    #[test]
    fn test_pro_rata_scales_by_post_trade_capital() {
        // bot 100, target 900 + 100 traded: 100 * (100 / 1000) = 10
        assert_eq!(pro_rata_value(dec!(100), dec!(100), dec!(900)), Some(dec!(10)));
        assert_eq!(pro_rata_value(Decimal::ZERO, dec!(100), Decimal::ZERO), None);
    }

    #[test]
    fn test_risk_state_percentages() {
        let state = RiskState {
            total_portfolio_value: dec!(1000),
            current_position_value: dec!(100),
            proposed_value: dec!(50),
        };
        assert_eq!(state.current_pct(), dec!(10));
        assert_eq!(state.projected_pct(), dec!(15));
        assert!(state.exceeds(dec!(10)));
    }
}
