//! Account-lifecycle event handler (spec §4.8): reacts to an external
//! account event stream, cancelling orders and closing positions inside one
//! transaction per event so a partial failure rolls back cleanly.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::audit::Actor;
use crate::db::Pool;
use crate::orders::OrderRepo;
use crate::positions::PositionRepo;

#[derive(Debug, Clone)]
pub enum AccountEvent {
    AccountCreated {
        trading_account_id: i64,
        correlation_id: String,
    },
    AccountDeactivated {
        trading_account_id: i64,
        correlation_id: String,
    },
    AccountDeleted {
        trading_account_id: i64,
        timestamp: DateTime<Utc>,
        correlation_id: String,
    },
    MembershipRevoked {
        trading_account_id: i64,
        member_user_id: String,
        correlation_id: String,
    },
}

pub struct AccountEventHandler {
    db: Pool,
}

impl AccountEventHandler {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }

    pub fn handle(&self, event: &AccountEvent) -> Result<()> {
        match event {
            AccountEvent::AccountCreated { trading_account_id, correlation_id } => {
                info!(trading_account_id, correlation_id, "account created");
                Ok(())
            }
            AccountEvent::AccountDeactivated { trading_account_id, correlation_id } => {
                self.cancel_all(*trading_account_id, None, "Account deactivated", correlation_id)
            }
            AccountEvent::AccountDeleted { trading_account_id, timestamp, correlation_id } => {
                self.db.with_transaction(|txn| {
                    let cancelled = OrderRepo::cancel_non_terminal_in_txn(txn, *trading_account_id, None)?;
                    for (order_id, old_status) in &cancelled {
                        crate::audit::AuditLog::record_in_txn(
                            txn,
                            *order_id,
                            Some(*old_status),
                            crate::domain::OrderStatus::Cancelled,
                            Actor::System("account_event_handler"),
                            Some("Account deleted"),
                        )?;
                    }
                    let closed = PositionRepo::close_all_open_in_txn(txn, *trading_account_id, *timestamp)?;
                    info!(
                        trading_account_id,
                        correlation_id,
                        cancelled = cancelled.len(),
                        closed,
                        "account deleted: orders cancelled, positions closed, trades retained"
                    );
                    Ok(())
                })
            }
            AccountEvent::MembershipRevoked { trading_account_id, member_user_id, correlation_id } => {
                self.cancel_all(*trading_account_id, Some(member_user_id), "Membership revoked", correlation_id)
            }
        }
    }

    fn cancel_all(&self, trading_account_id: i64, user_id: Option<&str>, reason: &str, correlation_id: &str) -> Result<()> {
        self.db.with_transaction(|txn| {
            let cancelled = OrderRepo::cancel_non_terminal_in_txn(txn, trading_account_id, user_id)?;
            for (order_id, old_status) in &cancelled {
                crate::audit::AuditLog::record_in_txn(
                    txn,
                    *order_id,
                    Some(*old_status),
                    crate::domain::OrderStatus::Cancelled,
                    Actor::System("account_event_handler"),
                    Some(reason),
                )?;
            }
            if cancelled.is_empty() {
                warn!(trading_account_id, correlation_id, "account event with no non-terminal orders to cancel");
            } else {
                info!(trading_account_id, correlation_id, cancelled = cancelled.len(), reason, "cancelled non-terminal orders");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderSource, OrderType, OrderVariety, ProductType, TransactionType};

    fn seed_order(db: &Pool, trading_account_id: i64, user_id: &str) -> i64 {
        db.with_transaction(|txn| {
            OrderRepo::insert_pending(
                txn, user_id, trading_account_id, None, None, None, OrderSource::Manual, "TCS", "NSE",
                TransactionType::Buy, OrderType::Limit, ProductType::CNC, OrderVariety::Regular,
                10, Some(rust_decimal_macros::dec!(100)), None, None, "DAY", None, None,
            )
        })
        .unwrap()
    }

    #[test]
    fn deactivation_cancels_non_terminal_orders() {
        let db = Pool::open_in_memory().unwrap();
        let order_id = seed_order(&db, 1, "u1");
        let handler = AccountEventHandler::new(db.clone());

        handler
            .handle(&AccountEvent::AccountDeactivated { trading_account_id: 1, correlation_id: "c1".into() })
            .unwrap();

        let order = OrderRepo::new(db).get(order_id).unwrap().unwrap();
        assert_eq!(order.status, crate::domain::OrderStatus::Cancelled);
    }

    #[test]
    fn membership_revoked_only_cancels_that_users_orders() {
        let db = Pool::open_in_memory().unwrap();
        let order_a = seed_order(&db, 1, "u1");
        let order_b = seed_order(&db, 1, "u2");
        let handler = AccountEventHandler::new(db.clone());

        handler
            .handle(&AccountEvent::MembershipRevoked {
                trading_account_id: 1,
                member_user_id: "u1".into(),
                correlation_id: "c2".into(),
            })
            .unwrap();

        let repo = OrderRepo::new(db);
        assert_eq!(repo.get(order_a).unwrap().unwrap().status, crate::domain::OrderStatus::Cancelled);
        assert_eq!(repo.get(order_b).unwrap().unwrap().status, crate::domain::OrderStatus::Pending);
    }
}
