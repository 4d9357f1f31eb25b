use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{NewOrder, Order, OrderDetail, ShippingInfo};
use crate::domain::voucher::Voucher;
use crate::schema::{order_details, order_outbox, orders, vouchers};

use super::outbox::{OrderEvent, AGGREGATE_TYPE};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub voucher_id: Option<Uuid>,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub final_total: i64,
    pub total_payment: i64,
    pub recipient_name: String,
    pub phone: String,
    pub address: String,
    pub note: Option<String>,
    pub payment_method: String,
    pub payment_status: String,
    pub order_status: String,
    pub transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub payment_attempts: i32,
    pub payment_gateway_response: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DomainError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            voucher_id: row.voucher_id,
            total_amount: row.total_amount,
            discount_amount: row.discount_amount,
            final_total: row.final_total,
            total_payment: row.total_payment,
            shipping: ShippingInfo {
                recipient_name: row.recipient_name,
                phone: row.phone,
                address: row.address,
                note: row.note,
            },
            payment_method: row.payment_method.parse()?,
            payment_status: row.payment_status.parse()?,
            order_status: row.order_status.parse()?,
            transaction_id: row.transaction_id,
            payment_url: row.payment_url,
            payment_attempts: row.payment_attempts,
            payment_gateway_response: row.payment_gateway_response,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrderRow<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub voucher_id: Option<Uuid>,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub final_total: i64,
    pub total_payment: i64,
    pub recipient_name: &'a str,
    pub phone: &'a str,
    pub address: &'a str,
    pub note: Option<&'a str>,
    pub payment_method: &'static str,
    pub payment_status: &'static str,
    pub order_status: &'static str,
}

impl<'a> NewOrderRow<'a> {
    pub fn from_domain(order: &'a NewOrder, initial: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            voucher_id: order.voucher_id,
            total_amount: order.totals.total_amount,
            discount_amount: order.totals.discount_amount,
            final_total: order.totals.final_total,
            total_payment: order.totals.total_payment,
            recipient_name: &order.shipping.recipient_name,
            phone: &order.shipping.phone,
            address: &order.shipping.address,
            note: order.shipping.note.as_deref(),
            payment_method: order.payment_method.as_str(),
            payment_status: initial.payment_status.as_str(),
            order_status: initial.order_status.as_str(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = order_details)]
#[diesel(belongs_to(OrderRow, foreign_key = order_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderDetailRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: String,
    pub name: String,
    pub size: Option<String>,
    pub color: Option<String>,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_price: i64,
    pub line_no: i32,
    pub created_at: DateTime<Utc>,
}

impl From<OrderDetailRow> for OrderDetail {
    fn from(row: OrderDetailRow) -> Self {
        OrderDetail {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            name: row.name,
            size: row.size,
            color: row.color,
            unit_price: row.unit_price,
            quantity: row.quantity,
            line_price: row.line_price,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = order_details)]
pub struct NewOrderDetailRow<'a> {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: &'a str,
    pub name: &'a str,
    pub size: Option<&'a str>,
    pub color: Option<&'a str>,
    pub unit_price: i64,
    pub quantity: i32,
    pub line_price: i64,
    pub line_no: i32,
}

impl<'a> NewOrderDetailRow<'a> {
    /// `line_no` is the 1-based position of the line in the order.
    pub fn from_domain(detail: &'a OrderDetail, line_no: i32) -> Self {
        Self {
            id: detail.id,
            order_id: detail.order_id,
            product_id: detail.product_id,
            variant_id: &detail.variant_id,
            name: &detail.name,
            size: detail.size.as_deref(),
            color: detail.color.as_deref(),
            unit_price: detail.unit_price,
            quantity: detail.quantity,
            line_price: detail.line_price,
            line_no,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = vouchers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VoucherRow {
    pub id: Uuid,
    pub code: String,
    pub discount: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub quantity: i32,
    pub min_order_amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<VoucherRow> for Voucher {
    type Error = DomainError;

    fn try_from(row: VoucherRow) -> Result<Self, Self::Error> {
        Ok(Voucher {
            id: row.id,
            code: row.code,
            discount: row.discount,
            start_date: row.start_date,
            end_date: row.end_date,
            quantity: row.quantity,
            min_order_amount: row.min_order_amount,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<Voucher> for VoucherRow {
    fn from(v: Voucher) -> Self {
        VoucherRow {
            id: v.id,
            code: v.code,
            discount: v.discount,
            start_date: v.start_date,
            end_date: v.end_date,
            quantity: v.quantity,
            min_order_amount: v.min_order_amount,
            status: v.status.as_str().to_string(),
            created_at: v.created_at,
            updated_at: v.updated_at,
        }
    }
}

/// Columns an administrative edit may rewrite. `code` and `created_at` are fixed.
#[derive(Debug, AsChangeset)]
#[diesel(table_name = vouchers)]
pub struct VoucherChangeset<'a> {
    pub discount: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub quantity: i32,
    pub min_order_amount: i64,
    pub status: &'a str,
    pub updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Voucher> for VoucherChangeset<'a> {
    fn from(v: &'a Voucher) -> Self {
        VoucherChangeset {
            discount: v.discount,
            start_date: v.start_date,
            end_date: v.end_date,
            quantity: v.quantity,
            min_order_amount: v.min_order_amount,
            status: v.status.as_str(),
            updated_at: v.updated_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = order_outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEventRow {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = order_outbox)]
pub struct NewOutboxEventRow {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
}

impl From<OrderEvent> for NewOutboxEventRow {
    fn from(event: OrderEvent) -> Self {
        NewOutboxEventRow {
            id: Uuid::new_v4(),
            aggregate_type: AGGREGATE_TYPE.to_string(),
            aggregate_id: event.aggregate_id.to_string(),
            event_type: event.event_type.to_string(),
            payload: event.payload,
        }
    }
}
