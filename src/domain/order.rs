use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::errors::DomainError;
use super::voucher::VoucherRef;

// ── Status axes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Gateway,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
            PaymentMethod::Gateway => "gateway",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
            "gateway" => Ok(PaymentMethod::Gateway),
            other => Err(DomainError::Internal(format!("unknown payment method '{other}'"))),
        }
    }
}

/// Payment axis. Leaves `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Result of checking a requested payment transition against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTransitionCheck {
    Apply,
    AlreadyFinalized,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// The first terminal decision wins: a repeat of the same decision is a
    /// no-op, a different one is a conflict.
    pub fn check_transition(self, to: PaymentStatus) -> Result<PaymentTransitionCheck, DomainError> {
        if !to.is_terminal() {
            return Err(DomainError::Validation(
                "payment can only move to a terminal status".to_string(),
            ));
        }
        match self {
            PaymentStatus::Pending => Ok(PaymentTransitionCheck::Apply),
            current if current == to => Ok(PaymentTransitionCheck::AlreadyFinalized),
            current => Err(DomainError::PaymentConflict {
                current,
                requested: to,
            }),
        }
    }

    pub(crate) fn event_type(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PaymentPending",
            PaymentStatus::Completed => "PaymentCompleted",
            PaymentStatus::Failed => "PaymentFailed",
            PaymentStatus::Cancelled => "PaymentCancelled",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Completed" => Ok(PaymentStatus::Completed),
            "Failed" => Ok(PaymentStatus::Failed),
            "Cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(DomainError::Internal(format!("unknown payment status '{other}'"))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fulfillment axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum OrderStatus {
    Processing,
    Packaging,
    Shipping,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Processing => "Processing",
            OrderStatus::Packaging => "Packaging",
            OrderStatus::Shipping => "Shipping",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    fn step(self) -> Option<u8> {
        match self {
            OrderStatus::Processing => Some(0),
            OrderStatus::Packaging => Some(1),
            OrderStatus::Shipping => Some(2),
            OrderStatus::Completed => Some(3),
            OrderStatus::Cancelled => None,
        }
    }

    /// One step forward along Processing → Packaging → Shipping → Completed,
    /// or a side exit to Cancelled from any non-terminal state.
    pub fn can_advance_to(self, to: OrderStatus) -> bool {
        if to == OrderStatus::Cancelled {
            return !self.is_terminal();
        }
        match (self.step(), to.step()) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Processing" => Ok(OrderStatus::Processing),
            "Packaging" => Ok(OrderStatus::Packaging),
            "Shipping" => Ok(OrderStatus::Shipping),
            "Completed" => Ok(OrderStatus::Completed),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::Internal(format!("unknown order status '{other}'"))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Inputs ───────────────────────────────────────────────────────────────────

/// Column widths of the order tables, in characters.
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_VARIANT_LEN: usize = 64;
pub const MAX_ATTRIBUTE_LEN: usize = 32;

fn check_len(field: &str, value: &str, max: usize) -> Result<(), DomainError> {
    if value.chars().count() > max {
        return Err(DomainError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub variant_id: String,
    pub name: String,
    pub size: Option<String>,
    pub color: Option<String>,
    pub unit_price: i64,
    pub quantity: i32,
}

/// Shipping snapshot copied onto the order at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShippingInfo {
    pub recipient_name: String,
    pub phone: String,
    pub address: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub user_id: Uuid,
    pub voucher: Option<VoucherRef>,
    pub lines: Vec<OrderLineInput>,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
}

impl OrderDraft {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.user_id.is_nil() {
            return Err(DomainError::Validation("user id is required".to_string()));
        }
        if self.lines.is_empty() {
            return Err(DomainError::Validation(
                "an order needs at least one line".to_string(),
            ));
        }
        for line in &self.lines {
            if line.quantity <= 0 {
                return Err(DomainError::Validation(format!(
                    "quantity for '{}' must be positive",
                    line.name
                )));
            }
            if line.unit_price < 0 {
                return Err(DomainError::Validation(format!(
                    "unit price for '{}' must not be negative",
                    line.name
                )));
            }
            if line.variant_id.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "variant is required for '{}'",
                    line.name
                )));
            }
            check_len("product name", &line.name, MAX_NAME_LEN)?;
            check_len("variant", &line.variant_id, MAX_VARIANT_LEN)?;
            check_len("size", line.size.as_deref().unwrap_or_default(), MAX_ATTRIBUTE_LEN)?;
            check_len("color", line.color.as_deref().unwrap_or_default(), MAX_ATTRIBUTE_LEN)?;
        }
        let shipping = &self.shipping;
        for (field, value) in [
            ("recipient name", &shipping.recipient_name),
            ("phone", &shipping.phone),
            ("address", &shipping.address),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::Validation(format!("{field} is required")));
            }
        }
        check_len("recipient name", &shipping.recipient_name, MAX_NAME_LEN)?;
        check_len("phone", &shipping.phone, MAX_PHONE_LEN)
    }

    pub fn total_amount(&self) -> Result<i64, DomainError> {
        self.lines.iter().try_fold(0i64, |acc, line| {
            line_price(line.unit_price, line.quantity)
                .and_then(|price| acc.checked_add(price))
                .ok_or_else(|| DomainError::Validation("order total overflows".to_string()))
        })
    }
}

pub fn line_price(unit_price: i64, quantity: i32) -> Option<i64> {
    unit_price.checked_mul(i64::from(quantity))
}

/// Monetary fields of an order. `final_total == total_amount - discount_amount`
/// and `final_total >= 0` hold by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub total_amount: i64,
    pub discount_amount: i64,
    pub final_total: i64,
    pub total_payment: i64,
}

impl OrderTotals {
    pub fn new(total_amount: i64, discount: i64) -> Result<Self, DomainError> {
        if total_amount < 0 || discount < 0 {
            return Err(DomainError::Validation(
                "amounts must not be negative".to_string(),
            ));
        }
        let discount_amount = discount.min(total_amount);
        let final_total = total_amount - discount_amount;
        Ok(Self {
            total_amount,
            discount_amount,
            final_total,
            total_payment: final_total,
        })
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderDetail {
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
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub voucher_id: Option<Uuid>,
    pub totals: OrderTotals,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    pub details: Vec<OrderDetail>,
}

impl NewOrder {
    /// The record as first persisted: payment pending, fulfillment processing.
    pub fn to_order(&self, now: DateTime<Utc>) -> Order {
        Order {
            id: self.id,
            user_id: self.user_id,
            voucher_id: self.voucher_id,
            total_amount: self.totals.total_amount,
            discount_amount: self.totals.discount_amount,
            final_total: self.totals.final_total,
            total_payment: self.totals.total_payment,
            shipping: self.shipping.clone(),
            payment_method: self.payment_method,
            payment_status: PaymentStatus::Pending,
            order_status: OrderStatus::Processing,
            transaction_id: None,
            payment_url: None,
            payment_attempts: 0,
            payment_gateway_response: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub voucher_id: Option<Uuid>,
    pub total_amount: i64,
    pub discount_amount: i64,
    pub final_total: i64,
    pub total_payment: i64,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub transaction_id: Option<String>,
    pub payment_url: Option<String>,
    pub payment_attempts: i32,
    #[schema(value_type = Option<Object>)]
    pub payment_gateway_response: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a fulfillment transition changes on the order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FulfillmentPlan {
    pub order_status: OrderStatus,
    pub payment_status: Option<PaymentStatus>,
    pub release_voucher: bool,
}

impl Order {
    /// Gateway orders must be paid before leaving Processing; cash-on-delivery
    /// orders settle their payment when delivered and void it when cancelled.
    pub fn plan_fulfillment(&self, to: OrderStatus) -> Result<FulfillmentPlan, DomainError> {
        if !self.order_status.can_advance_to(to) {
            return Err(DomainError::InvalidTransition {
                from: self.order_status,
                to,
            });
        }

        let pending = self.payment_status == PaymentStatus::Pending;
        match to {
            OrderStatus::Cancelled => Ok(FulfillmentPlan {
                order_status: to,
                payment_status: pending.then_some(PaymentStatus::Cancelled),
                release_voucher: pending && self.voucher_id.is_some(),
            }),
            _ if self.payment_method == PaymentMethod::Gateway
                && self.payment_status != PaymentStatus::Completed =>
            {
                Err(DomainError::PaymentRequired)
            }
            OrderStatus::Completed if self.payment_method == PaymentMethod::CashOnDelivery => {
                Ok(FulfillmentPlan {
                    order_status: to,
                    payment_status: pending.then_some(PaymentStatus::Completed),
                    release_voucher: false,
                })
            }
            _ => Ok(FulfillmentPlan {
                order_status: to,
                payment_status: None,
                release_voucher: false,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderView {
    pub order: Order,
    pub details: Vec<OrderDetail>,
}

#[derive(Debug, Clone)]
pub struct ListResult {
    pub items: Vec<Order>,
    pub total: i64,
}

/// Outcome of a payment compare-and-set on the order store.
#[derive(Debug, Clone)]
pub enum PaymentTransition {
    Applied(Order),
    AlreadyFinalized(Order),
}

impl PaymentTransition {
    pub fn order(&self) -> &Order {
        match self {
            PaymentTransition::Applied(order) | PaymentTransition::AlreadyFinalized(order) => order,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FulfillmentChange {
    pub order: Order,
    pub release_voucher: Option<Uuid>,
}

/// Gateway correlation written when a payment request is (re)issued.
#[derive(Debug, Clone)]
pub struct PaymentAttempt {
    pub attempt: i32,
    pub transaction_id: String,
    pub payment_url: String,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn shipping() -> ShippingInfo {
        ShippingInfo {
            recipient_name: "Nguyen Van A".to_string(),
            phone: "0901234567".to_string(),
            address: "12 Le Loi, District 1, HCMC".to_string(),
            note: None,
        }
    }

    pub fn line(unit_price: i64, quantity: i32) -> OrderLineInput {
        OrderLineInput {
            product_id: Uuid::new_v4(),
            variant_id: "TEE-M-BLACK".to_string(),
            name: "Basic tee".to_string(),
            size: Some("M".to_string()),
            color: Some("black".to_string()),
            unit_price,
            quantity,
        }
    }

    pub fn order(method: PaymentMethod, payment: PaymentStatus, status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            voucher_id: Some(Uuid::new_v4()),
            total_amount: 500_000,
            discount_amount: 50_000,
            final_total: 450_000,
            total_payment: 450_000,
            shipping: shipping(),
            payment_method: method,
            payment_status: payment,
            order_status: status,
            transaction_id: None,
            payment_url: None,
            payment_attempts: 0,
            payment_gateway_response: None,
            created_at: now,
            updated_at: now,
        }
    }
}
