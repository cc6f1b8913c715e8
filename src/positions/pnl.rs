//! Weighted-average and P&L formulas (spec §4.4), independent of storage so
//! they can be unit tested without a database.

use rust_decimal::Decimal;

use crate::domain::ChargeBreakdown;

/// `new_price = (old_value + fill_qty * fill_price) / (old_qty + fill_qty)`.
pub fn weighted_average_price(old_qty: i64, old_value: Decimal, fill_qty: i64, fill_price: Decimal) -> Decimal {
    let new_qty = old_qty + fill_qty;
    if new_qty == 0 {
        return Decimal::ZERO;
    }
    (old_value + Decimal::from(fill_qty) * fill_price) / Decimal::from(new_qty)
}

/// `realized = (sell_price_avg - buy_price_avg) * min(buy_qty, sell_qty)`,
/// zero until both sides are non-empty.
pub fn realized_pnl(buy_qty: i64, buy_price: Decimal, sell_qty: i64, sell_price: Decimal) -> Decimal {
    if buy_qty == 0 || sell_qty == 0 {
        return Decimal::ZERO;
    }
    let closed_qty = buy_qty.min(sell_qty);
    (sell_price - buy_price) * Decimal::from(closed_qty)
}

/// Mark-to-market on the open (signed) quantity against the matching side's
/// weighted average.
pub fn unrealized_pnl(net_quantity: i64, buy_price: Decimal, sell_price: Decimal, last_price: Decimal) -> Decimal {
    if net_quantity > 0 {
        (last_price - buy_price) * Decimal::from(net_quantity)
    } else if net_quantity < 0 {
        (sell_price - last_price) * Decimal::from(-net_quantity)
    } else {
        Decimal::ZERO
    }
}

pub fn total_pnl(realized: Decimal, unrealized: Decimal) -> Decimal {
    realized + unrealized
}

pub fn net_pnl(total: Decimal, charges: &ChargeBreakdown) -> Decimal {
    total - charges.total()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn weighted_average_blends_fills() {
        let avg = weighted_average_price(10, dec!(25000), 10, dec!(2600));
        assert_eq!(avg, dec!(2550));
    }

    #[test]
    fn realized_pnl_is_zero_until_both_sides_filled() {
        assert_eq!(realized_pnl(10, dec!(100), 0, dec!(0)), Decimal::ZERO);
    }

    #[test]
    fn realized_pnl_uses_min_closed_quantity() {
        let pnl = realized_pnl(10, dec!(100), 6, dec!(110));
        assert_eq!(pnl, dec!(60));
    }

    #[test]
    fn unrealized_marks_long_and_short_correctly() {
        assert_eq!(unrealized_pnl(10, dec!(100), dec!(0), dec!(110)), dec!(100));
        assert_eq!(unrealized_pnl(-10, dec!(0), dec!(100), dec!(90)), dec!(100));
        assert_eq!(unrealized_pnl(0, dec!(100), dec!(100), dec!(110)), Decimal::ZERO);
    }
}
