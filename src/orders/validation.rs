//! Request validation and pre-trade risk checks (spec §4.1, §7).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::RiskPolicy;
use crate::domain::{OrderType, OrderVariety, ProductType, TransactionType};
use crate::error::{AppError, AppResult, FieldError};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub transaction_type: TransactionType,
    pub order_type: OrderType,
    pub product_type: ProductType,
    #[serde(default)]
    pub variety: Option<OrderVariety>,
    pub quantity: i64,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub disclosed_quantity: Option<i64>,
    #[serde(default)]
    pub validity: Option<String>,
    pub strategy_id: Option<i64>,
    pub portfolio_id: Option<i64>,
    pub execution_id: Option<String>,
    pub tag: Option<String>,
    pub lot_size: Option<i64>,
}

/// Snapshot of the account state a risk check needs, assembled by the
/// caller from the Position/Ledger repositories before `Place` runs.
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub available_margin: Decimal,
    pub existing_symbol_exposure: Decimal,
    pub total_exposure: Decimal,
    pub realized_pnl_today: Decimal,
}

/// Structural validation: malformed/out-of-range fields (spec §7
/// ValidationError). Returns every violation at once so the caller gets one
/// 422 with a full `validation_errors` list instead of one round-trip per
/// field.
pub fn validate_structure(req: &PlaceOrderRequest) -> AppResult<()> {
    let mut errors = Vec::new();

    if req.quantity < 1 {
        errors.push(FieldError {
            field: "quantity".into(),
            message: "must be >= 1".into(),
        });
    }
    if let Some(lot) = req.lot_size {
        if lot > 0 && req.quantity % lot != 0 {
            errors.push(FieldError {
                field: "quantity".into(),
                message: format!("must be a multiple of lot size {lot}"),
            });
        }
    }
    if matches!(req.order_type, OrderType::Limit) && req.price.is_none() {
        errors.push(FieldError {
            field: "price".into(),
            message: "required for LIMIT orders".into(),
        });
    }
    if matches!(req.order_type, OrderType::Sl | OrderType::SlM) && req.trigger_price.is_none() {
        errors.push(FieldError {
            field: "trigger_price".into(),
            message: "required for SL/SL-M orders".into(),
        });
    }
    if let Some(price) = req.price {
        if price <= Decimal::ZERO {
            errors.push(FieldError {
                field: "price".into(),
                message: "must be > 0".into(),
            });
        }
    }
    if req.symbol.trim().is_empty() {
        errors.push(FieldError {
            field: "symbol".into(),
            message: "required".into(),
        });
    }
    if req.exchange.trim().is_empty() {
        errors.push(FieldError {
            field: "exchange".into(),
            message: "required".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::ValidationMany(errors))
    }
}

/// Pre-trade risk checks (spec §4.1): order-value cap, margin vs
/// requested×margin_multiplier, per-symbol exposure cap, concentration cap,
/// daily-loss breach. Run only after structural validation passes.
pub fn check_risk(
    req: &PlaceOrderRequest,
    policy: &RiskPolicy,
    ctx: &RiskContext,
) -> AppResult<()> {
    if req.quantity as u64 > policy.max_order_quantity {
        return Err(AppError::Validation(format!(
            "quantity {} exceeds max_order_quantity {}",
            req.quantity, policy.max_order_quantity
        )));
    }

    let reference_price = req.price.unwrap_or(Decimal::ZERO);
    let order_value = reference_price * Decimal::from(req.quantity);

    if req.price.is_some() && order_value > policy.max_order_value {
        return Err(AppError::Validation(format!(
            "order value {order_value} exceeds max_order_value {}",
            policy.max_order_value
        )));
    }

    let required_margin = order_value * policy.margin_multiplier;
    if req.price.is_some() && required_margin > ctx.available_margin {
        return Err(AppError::Validation(format!(
            "required margin {required_margin} exceeds available margin {}",
            ctx.available_margin
        )));
    }

    let new_symbol_exposure = ctx.existing_symbol_exposure + order_value;
    if new_symbol_exposure > policy.per_symbol_exposure_cap {
        return Err(AppError::Validation(format!(
            "symbol exposure {new_symbol_exposure} exceeds cap {}",
            policy.per_symbol_exposure_cap
        )));
    }

    let new_total_exposure = ctx.total_exposure + order_value;
    if new_total_exposure > Decimal::ZERO {
        let concentration = new_symbol_exposure / new_total_exposure;
        if concentration > policy.concentration_cap {
            return Err(AppError::Validation(format!(
                "concentration {concentration} exceeds cap {}",
                policy.concentration_cap
            )));
        }
    }

    if ctx.realized_pnl_today < Decimal::ZERO
        && ctx.realized_pnl_today.abs() >= policy.daily_loss_limit
    {
        return Err(AppError::Validation(format!(
            "daily loss {} has reached the limit {}",
            ctx.realized_pnl_today.abs(),
            policy.daily_loss_limit
        )));
    }

    Ok(())
}

#[derive(Debug, Serialize)]
pub struct BatchPlaceRequest {
    pub orders: Vec<PlaceOrderRequest>,
    #[serde(default)]
    pub atomic: bool,
}

pub const MAX_BATCH_SIZE: usize = 20;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_req() -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: "RELIANCE".into(),
            exchange: "NSE".into(),
            transaction_type: TransactionType::Buy,
            order_type: OrderType::Limit,
            product_type: ProductType::CNC,
            variety: None,
            quantity: 10,
            price: Some(dec!(2500)),
            trigger_price: None,
            disclosed_quantity: None,
            validity: None,
            strategy_id: Some(42),
            portfolio_id: None,
            execution_id: None,
            tag: None,
            lot_size: None,
        }
    }

    fn base_ctx() -> RiskContext {
        RiskContext {
            available_margin: dec!(1_000_000),
            existing_symbol_exposure: dec!(0),
            total_exposure: dec!(0),
            realized_pnl_today: dec!(0),
        }
    }

    #[test]
    fn accepts_well_formed_limit_order() {
        assert!(validate_structure(&base_req()).is_ok());
    }

    #[test]
    fn rejects_limit_order_without_price() {
        let mut req = base_req();
        req.price = None;
        let err = validate_structure(&req).unwrap_err();
        assert!(matches!(err, AppError::ValidationMany(_)));
    }

    #[test]
    fn rejects_quantity_not_multiple_of_lot_size() {
        let mut req = base_req();
        req.lot_size = Some(25);
        req.quantity = 10;
        assert!(validate_structure(&req).is_err());
    }

    #[test]
    fn accepts_quantity_at_max_rejects_over_max() {
        let policy = RiskPolicy {
            max_order_quantity: 100,
            ..RiskPolicy::default()
        };
        let ctx = base_ctx();
        let mut req = base_req();
        req.quantity = 100;
        req.price = None;
        assert!(check_risk(&req, &policy, &ctx).is_ok());
        req.quantity = 101;
        assert!(check_risk(&req, &policy, &ctx).is_err());
    }

    #[test]
    fn rejects_when_concentration_cap_breached() {
        let policy = RiskPolicy {
            concentration_cap: dec!(0.10),
            ..RiskPolicy::default()
        };
        let mut ctx = base_ctx();
        ctx.total_exposure = dec!(100_000);
        let req = base_req();
        assert!(check_risk(&req, &policy, &ctx).is_err());
    }

    #[test]
    fn rejects_when_daily_loss_limit_already_breached() {
        let policy = RiskPolicy::default();
        let mut ctx = base_ctx();
        ctx.realized_pnl_today = -policy.daily_loss_limit;
        let req = base_req();
        assert!(check_risk(&req, &policy, &ctx).is_err());
    }
}
