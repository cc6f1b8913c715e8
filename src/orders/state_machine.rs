//! Order status transition table (spec §4.1). Every status mutation in the
//! crate must go through `can_transition`; nothing sets `order.status`
//! directly.

use crate::domain::OrderStatus;

/// `None` for `from` models the nil → PENDING creation edge.
pub fn can_transition(from: Option<OrderStatus>, to: OrderStatus) -> bool {
    use OrderStatus::*;
    match (from, to) {
        (None, Pending) => true,
        (Some(Pending), Submitted | Rejected) => true,
        (Some(Submitted), Open | Complete | Rejected | Cancelled | TriggerPending) => true,
        (Some(Open), Complete | Cancelled | Rejected) => true,
        (Some(TriggerPending), Open | Cancelled) => true,
        _ => false,
    }
}

/// Reconciliation is exempted from the table: it may drive any non-terminal
/// order into any broker-reported state (spec §4.1, §4.6).
pub fn can_transition_via_reconciliation(from: OrderStatus, to: OrderStatus) -> bool {
    !from.is_terminal() || from == to
}

pub const MODIFIABLE: [OrderStatus; 3] = [OrderStatus::Pending, OrderStatus::Submitted, OrderStatus::Open];
pub const CANCELLABLE: [OrderStatus; 4] = [
    OrderStatus::Pending,
    OrderStatus::Submitted,
    OrderStatus::Open,
    OrderStatus::TriggerPending,
];

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn creation_edge_only_reaches_pending() {
        assert!(can_transition(None, Pending));
        assert!(!can_transition(None, Submitted));
    }

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        for terminal in [Complete, Cancelled, Rejected] {
            for to in [Pending, Submitted, Open, TriggerPending, Complete, Cancelled, Rejected] {
                assert!(!can_transition(Some(terminal), to), "{terminal:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn matches_the_documented_table() {
        assert!(can_transition(Some(Pending), Submitted));
        assert!(can_transition(Some(Pending), Rejected));
        assert!(!can_transition(Some(Pending), Open));
        assert!(can_transition(Some(Submitted), TriggerPending));
        assert!(can_transition(Some(TriggerPending), Open));
        assert!(can_transition(Some(TriggerPending), Cancelled));
        assert!(!can_transition(Some(TriggerPending), Complete));
    }
}
