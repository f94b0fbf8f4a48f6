use shared::message::EngineEvent;
use shared::models::{Order, OrderStatus};
use shared::util::now_millis;

use crate::common::{EngineError, EngineResult};

/// Applies legal lifecycle transitions to an order
///
/// Only edges allowed by [`OrderStatus::can_transition_to`] are applied;
/// nothing returns to `Pending` and terminal states stay terminal.
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Transition in place, stamping timestamps and the error message
    pub fn transition(
        order: &mut Order,
        to: OrderStatus,
        reason: Option<String>,
    ) -> EngineResult<EngineEvent> {
        let from = order.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidOrderState {
                order_no: order.order_no.clone(),
                from,
                to,
            });
        }

        let now = now_millis();
        match to {
            OrderStatus::Processing => {
                order.start_time.get_or_insert(now);
                order.error_message = None;
            }
            OrderStatus::Completed | OrderStatus::Cancelled => {
                order.complete_time = Some(now);
            }
            OrderStatus::Exception => {
                order.error_message = reason.clone();
            }
            OrderStatus::Pending => {}
        }
        order.status = to;

        Ok(EngineEvent::OrderStatusChanged {
            order_no: order.order_no.clone(),
            from,
            to,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{OrderPriority, OrderSource};

    fn order(status: OrderStatus) -> Order {
        Order {
            order_no: "VO1".into(),
            source: OrderSource::Manual,
            source_order_id: None,
            patient_ref: None,
            vaccine_id: 1,
            quantity: 1,
            dose_number: 1,
            priority: OrderPriority::Normal,
            status,
            error_message: None,
            receive_time: 0,
            start_time: None,
            complete_time: None,
            operator_id: None,
            deleted_at: None,
        }
    }

    #[test]
    fn happy_path_stamps_times() {
        let mut o = order(OrderStatus::Pending);
        OrderStateMachine::transition(&mut o, OrderStatus::Processing, None).unwrap();
        assert!(o.start_time.is_some());
        OrderStateMachine::transition(&mut o, OrderStatus::Completed, None).unwrap();
        assert!(o.complete_time.is_some());
    }

    #[test]
    fn exception_records_reason_and_resume_clears_it() {
        let mut o = order(OrderStatus::Processing);
        let event =
            OrderStateMachine::transition(&mut o, OrderStatus::Exception, Some("jam".into()))
                .unwrap();
        assert!(matches!(
            event,
            EngineEvent::OrderStatusChanged { to: OrderStatus::Exception, .. }
        ));
        assert_eq!(o.error_message.as_deref(), Some("jam"));
        OrderStateMachine::transition(&mut o, OrderStatus::Processing, None).unwrap();
        assert!(o.error_message.is_none());
    }

    #[test]
    fn illegal_edges_are_rejected() {
        use OrderStatus::*;
        let all = [Pending, Processing, Completed, Cancelled, Exception];
        for from in all {
            for to in all {
                let mut o = order(from);
                let ok = OrderStateMachine::transition(&mut o, to, None).is_ok();
                assert_eq!(ok, from.can_transition_to(to), "{:?} -> {:?}", from, to);
                if !ok {
                    assert_eq!(o.status, from);
                }
            }
        }
        for terminal in [Completed, Cancelled] {
            for to in all {
                assert!(!terminal.can_transition_to(to));
            }
        }
        for from in all {
            assert!(!from.can_transition_to(Pending));
        }
    }
}
