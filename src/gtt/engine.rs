//! GTT (Good-Till-Triggered) engine: Place/Modify/Cancel/Sync, mirroring the
//! broker-first discipline of `orders::OrderEngine::modify`/`cancel` (spec §6).

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::broker::{BrokerGttRequest, BrokerPool};
use crate::context::RequestContext;
use crate::domain::{GttOrder, GttOrderLeg, GttStatus, GttType};
use crate::error::{AppError, AppResult};

use super::repo::GttRepo;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaceGttRequest {
    pub gtt_type: GttType,
    pub symbol: String,
    pub exchange: String,
    pub trigger_prices: Vec<Decimal>,
    pub last_price: Decimal,
    pub orders: Vec<GttOrderLeg>,
}

pub struct GttEngine {
    repo: GttRepo,
    brokers: Arc<dyn BrokerPool>,
}

impl GttEngine {
    pub fn new(repo: GttRepo, brokers: Arc<dyn BrokerPool>) -> Self {
        Self { repo, brokers }
    }

    fn load_owned(&self, ctx: &RequestContext, id: i64) -> AppResult<GttOrder> {
        let gtt = self
            .repo
            .get(id)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::NotFound(format!("gtt order {id} not found")))?;
        if !ctx.can_access(gtt.trading_account_id) {
            return Err(AppError::Forbidden(format!("trading account {} not accessible", gtt.trading_account_id)));
        }
        Ok(gtt)
    }

    /// Validates trigger-price arity (spec §3: single ⇒ 1 price, two-leg ⇒ 2)
    /// before ever reaching the broker.
    fn validate(req: &PlaceGttRequest) -> AppResult<()> {
        let expected = match req.gtt_type {
            GttType::Single => 1,
            GttType::TwoLeg => 2,
        };
        if req.trigger_prices.len() != expected {
            return Err(AppError::Validation(format!(
                "{:?} GTT requires {expected} trigger price(s), got {}",
                req.gtt_type,
                req.trigger_prices.len()
            )));
        }
        if req.orders.is_empty() {
            return Err(AppError::Validation("GTT requires at least one follow-on order".into()));
        }
        Ok(())
    }

    pub async fn place(&self, ctx: &RequestContext, req: PlaceGttRequest) -> AppResult<GttOrder> {
        Self::validate(&req)?;

        let local = self
            .repo
            .insert(
                ctx.trading_account_id,
                req.gtt_type,
                &req.symbol,
                &req.exchange,
                &req.trigger_prices,
                req.last_price,
                &req.orders,
            )
            .map_err(AppError::Internal)?;

        let broker = self.brokers.get(ctx.trading_account_id);
        let broker_req = to_broker_request(&req);
        match broker.place_gtt(&broker_req).await {
            Ok(response) => {
                self.repo
                    .set_broker_gtt_id(local.id, &response.broker_gtt_id)
                    .map_err(AppError::Internal)?;
            }
            Err(err) => {
                self.repo.set_status(local.id, GttStatus::Cancelled).map_err(AppError::Internal)?;
                return Err(AppError::Broker {
                    message: err.to_string(),
                    response: serde_json::Value::Null,
                });
            }
        }

        self.repo
            .get(local.id)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("gtt order {} vanished after place", local.id)))
    }

    pub async fn modify(
        &self,
        ctx: &RequestContext,
        id: i64,
        trigger_prices: Option<Vec<Decimal>>,
        last_price: Option<Decimal>,
        orders: Option<Vec<GttOrderLeg>>,
    ) -> AppResult<GttOrder> {
        let gtt = self.load_owned(ctx, id)?;
        if !gtt.status.is_modifiable() {
            return Err(AppError::Conflict(format!("gtt {id} in status {:?} cannot be modified", gtt.status)));
        }
        let broker_gtt_id = gtt
            .broker_gtt_id
            .clone()
            .ok_or_else(|| AppError::Conflict("gtt has no broker_gtt_id yet".into()))?;

        let merged = PlaceGttRequest {
            gtt_type: gtt.gtt_type,
            symbol: gtt.symbol.clone(),
            exchange: gtt.exchange.clone(),
            trigger_prices: trigger_prices.clone().unwrap_or_else(|| gtt.trigger_prices.clone()),
            last_price: last_price.unwrap_or(gtt.last_price),
            orders: orders.clone().unwrap_or_else(|| gtt.orders.clone()),
        };
        Self::validate(&merged)?;

        let broker = self.brokers.get(ctx.trading_account_id);
        broker
            .modify_gtt(&broker_gtt_id, &to_broker_request(&merged))
            .await
            .map_err(|e| AppError::Broker { message: e.to_string(), response: serde_json::Value::Null })?;

        self.repo
            .apply_modification(
                id,
                trigger_prices.as_deref(),
                last_price,
                orders.as_deref(),
            )
            .map_err(AppError::Internal)?;

        self.repo
            .get(id)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("gtt order {id} vanished after modify")))
    }

    pub async fn cancel(&self, ctx: &RequestContext, id: i64) -> AppResult<GttOrder> {
        let gtt = self.load_owned(ctx, id)?;
        if !gtt.status.is_modifiable() {
            return Err(AppError::Conflict(format!("gtt {id} in status {:?} cannot be cancelled", gtt.status)));
        }
        let broker_gtt_id = gtt
            .broker_gtt_id
            .clone()
            .ok_or_else(|| AppError::Conflict("gtt has no broker_gtt_id yet".into()))?;

        let broker = self.brokers.get(ctx.trading_account_id);
        broker
            .cancel_gtt(&broker_gtt_id)
            .await
            .map_err(|e| AppError::Broker { message: e.to_string(), response: serde_json::Value::Null })?;

        self.repo.set_status(id, GttStatus::Cancelled).map_err(AppError::Internal)?;

        self.repo
            .get(id)
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("gtt order {id} vanished after cancel")))
    }

    pub fn get(&self, ctx: &RequestContext, id: i64) -> AppResult<GttOrder> {
        self.load_owned(ctx, id)
    }

    pub fn list(&self, ctx: &RequestContext) -> AppResult<Vec<GttOrder>> {
        self.repo.list(ctx.trading_account_id).map_err(AppError::Internal)
    }
}

fn to_broker_request(req: &PlaceGttRequest) -> BrokerGttRequest {
    BrokerGttRequest {
        gtt_type: match req.gtt_type {
            GttType::Single => "single".into(),
            GttType::TwoLeg => "two-leg".into(),
        },
        symbol: req.symbol.clone(),
        exchange: req.exchange.clone(),
        trigger_prices: req.trigger_prices.clone(),
        last_price: req.last_price,
        orders: req.orders.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_trigger_price_count() {
        let req = PlaceGttRequest {
            gtt_type: GttType::TwoLeg,
            symbol: "TCS".into(),
            exchange: "NSE".into(),
            trigger_prices: vec![rust_decimal_macros::dec!(90)],
            last_price: rust_decimal_macros::dec!(100),
            orders: vec![],
        };
        assert!(GttEngine::validate(&req).is_err());
    }
}
