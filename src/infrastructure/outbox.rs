use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::order::{Order, OrderDetail, OrderStatus};

/// Debezium's EventRouter SMT derives the Kafka topic from this value.
pub const AGGREGATE_TYPE: &str = "Order";

#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub aggregate_id: Uuid,
    pub event_type: &'static str,
    pub payload: Value,
}

pub fn order_created(order: &Order, details: &[OrderDetail]) -> OrderEvent {
    let lines: Vec<Value> = details
        .iter()
        .map(|d| {
            json!({
                "product_id": d.product_id,
                "variant_id": d.variant_id,
                "quantity": d.quantity,
                "unit_price": d.unit_price,
                "line_price": d.line_price
            })
        })
        .collect();

    OrderEvent {
        aggregate_id: order.id,
        event_type: "OrderCreated",
        payload: json!({
            "order_id": order.id,
            "user_id": order.user_id,
            "voucher_id": order.voucher_id,
            "payment_method": order.payment_method.as_str(),
            "payment_status": order.payment_status.as_str(),
            "order_status": order.order_status.as_str(),
            "total_amount": order.total_amount,
            "discount_amount": order.discount_amount,
            "final_total": order.final_total,
            "lines": lines
        }),
    }
}

pub fn payment_changed(order: &Order) -> OrderEvent {
    OrderEvent {
        aggregate_id: order.id,
        event_type: order.payment_status.event_type(),
        payload: json!({
            "order_id": order.id,
            "user_id": order.user_id,
            "payment_status": order.payment_status.as_str(),
            "transaction_id": order.transaction_id,
            "total_payment": order.total_payment
        }),
    }
}

pub fn status_changed(order: &Order, from: OrderStatus) -> OrderEvent {
    OrderEvent {
        aggregate_id: order.id,
        event_type: "OrderStatusChanged",
        payload: json!({
            "order_id": order.id,
            "user_id": order.user_id,
            "from": from.as_str(),
            "to": order.order_status.as_str(),
            "payment_status": order.payment_status.as_str()
        }),
    }
}
