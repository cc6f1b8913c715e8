//! Zerodha brokerage/tax fee table (spec §4.4, §9: "keep the policy table in
//! a single module... use fixed-precision arithmetic end-to-end"), grounded
//! on `brokerage_service.py`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{ChargeBreakdown, ProductType, TransactionType};

const EQUITY_INTRADAY_BROKERAGE_MAX: Decimal = dec!(20.0);
const EQUITY_INTRADAY_BROKERAGE_RATE: Decimal = dec!(0.0003);
const FO_BROKERAGE_FLAT: Decimal = dec!(20.0);

const STT_EQUITY_DELIVERY: Decimal = dec!(0.001);
const STT_EQUITY_INTRADAY: Decimal = dec!(0.00025);
const STT_FO_FUTURES: Decimal = dec!(0.0001);
const STT_FO_OPTIONS: Decimal = dec!(0.0005);

const EXCHANGE_CHARGES_EQUITY: Decimal = dec!(0.0000325);
const EXCHANGE_CHARGES_FO: Decimal = dec!(0.00005);

const GST_RATE: Decimal = dec!(0.18);
const SEBI_CHARGES_PER_CRORE: Decimal = dec!(10.0);
const ONE_CRORE: Decimal = dec!(10_000_000);
const STAMP_DUTY_RATE: Decimal = dec!(0.00003);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentType {
    Equity,
    Future,
    CallOption,
    PutOption,
}

fn is_fo(exchange: &str, instrument_type: InstrumentType) -> bool {
    matches!(exchange, "NFO" | "BFO" | "MCX" | "CDS")
        || matches!(instrument_type, InstrumentType::Future | InstrumentType::CallOption | InstrumentType::PutOption)
}

fn quantize(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Brokerage/tax breakdown for one side (buy or sell) of one fill.
pub fn calculate_brokerage(
    exchange: &str,
    product_type: ProductType,
    transaction_type: TransactionType,
    quantity: i64,
    price: Decimal,
    instrument_type: InstrumentType,
) -> ChargeBreakdown {
    let trade_value = Decimal::from(quantity) * price;
    let fo = is_fo(exchange, instrument_type);

    // Mirrors the original's if/elif chain exactly: non-FO NRML (equity,
    // not futures/options) falls through with brokerage left at zero.
    let brokerage = if fo {
        FO_BROKERAGE_FLAT
    } else if product_type == ProductType::MIS {
        (trade_value * EQUITY_INTRADAY_BROKERAGE_RATE).min(EQUITY_INTRADAY_BROKERAGE_MAX)
    } else {
        Decimal::ZERO
    };

    let is_sell = transaction_type == TransactionType::Sell;
    let stt = if fo {
        match instrument_type {
            InstrumentType::Future if is_sell => trade_value * STT_FO_FUTURES,
            InstrumentType::CallOption | InstrumentType::PutOption if is_sell => trade_value * STT_FO_OPTIONS,
            _ => Decimal::ZERO,
        }
    } else {
        match product_type {
            ProductType::CNC => trade_value * STT_EQUITY_DELIVERY,
            ProductType::MIS if is_sell => trade_value * STT_EQUITY_INTRADAY,
            _ => Decimal::ZERO,
        }
    };

    let exchange_charges = trade_value * if fo { EXCHANGE_CHARGES_FO } else { EXCHANGE_CHARGES_EQUITY };

    let turnover_in_crores = trade_value / ONE_CRORE;
    let sebi_charges = turnover_in_crores * SEBI_CHARGES_PER_CRORE;

    let stamp_duty = if transaction_type == TransactionType::Buy {
        trade_value * STAMP_DUTY_RATE
    } else {
        Decimal::ZERO
    };

    let gst = (brokerage + exchange_charges) * GST_RATE;

    ChargeBreakdown {
        brokerage: quantize(brokerage),
        stt: quantize(stt),
        exchange_charges: quantize(exchange_charges),
        gst: quantize(gst),
        sebi_charges: quantize(sebi_charges),
        stamp_duty: quantize(stamp_duty),
    }
}

/// Aggregate charges from running buy/sell totals, used when a position
/// only has running values rather than individual fills.
pub fn calculate_position_charges(
    exchange: &str,
    product_type: ProductType,
    buy_quantity: i64,
    buy_value: Decimal,
    sell_quantity: i64,
    sell_value: Decimal,
    instrument_type: InstrumentType,
) -> ChargeBreakdown {
    let mut total = ChargeBreakdown::default();

    if buy_quantity > 0 && buy_value > Decimal::ZERO {
        let avg_buy_price = buy_value / Decimal::from(buy_quantity);
        let buy_charges = calculate_brokerage(
            exchange,
            product_type,
            TransactionType::Buy,
            buy_quantity,
            avg_buy_price,
            instrument_type,
        );
        total = add(total, buy_charges);
    }

    if sell_quantity > 0 && sell_value > Decimal::ZERO {
        let avg_sell_price = sell_value / Decimal::from(sell_quantity);
        let sell_charges = calculate_brokerage(
            exchange,
            product_type,
            TransactionType::Sell,
            sell_quantity,
            avg_sell_price,
            instrument_type,
        );
        total = add(total, sell_charges);
    }

    total
}

fn add(a: ChargeBreakdown, b: ChargeBreakdown) -> ChargeBreakdown {
    ChargeBreakdown {
        brokerage: a.brokerage + b.brokerage,
        stt: a.stt + b.stt,
        exchange_charges: a.exchange_charges + b.exchange_charges,
        gst: a.gst + b.gst,
        sebi_charges: a.sebi_charges + b.sebi_charges,
        stamp_duty: a.stamp_duty + b.stamp_duty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cnc_delivery_has_zero_brokerage() {
        let charges = calculate_brokerage(
            "NSE",
            ProductType::CNC,
            TransactionType::Buy,
            10,
            dec!(2500),
            InstrumentType::Equity,
        );
        assert_eq!(charges.brokerage, Decimal::ZERO);
        assert_eq!(charges.stt, quantize(dec!(25000) * STT_EQUITY_DELIVERY));
    }

    #[test]
    fn mis_brokerage_is_capped_at_twenty() {
        let charges = calculate_brokerage(
            "NSE",
            ProductType::MIS,
            TransactionType::Sell,
            10_000,
            dec!(2500),
            InstrumentType::Equity,
        );
        assert_eq!(charges.brokerage, dec!(20.00));
    }

    #[test]
    fn fo_brokerage_is_flat_twenty_regardless_of_value() {
        let charges = calculate_brokerage(
            "NFO",
            ProductType::NRML,
            TransactionType::Buy,
            50,
            dec!(100),
            InstrumentType::Future,
        );
        assert_eq!(charges.brokerage, dec!(20.00));
    }

    #[test]
    fn stamp_duty_applies_only_on_buy_side() {
        let buy = calculate_brokerage(
            "NSE",
            ProductType::CNC,
            TransactionType::Buy,
            10,
            dec!(100),
            InstrumentType::Equity,
        );
        let sell = calculate_brokerage(
            "NSE",
            ProductType::CNC,
            TransactionType::Sell,
            10,
            dec!(100),
            InstrumentType::Equity,
        );
        assert!(buy.stamp_duty > Decimal::ZERO);
        assert_eq!(sell.stamp_duty, Decimal::ZERO);
    }
}
