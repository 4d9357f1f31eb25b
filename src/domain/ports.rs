use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::errors::DomainError;
use super::order::{
    FulfillmentChange, ListResult, NewOrder, Order, OrderStatus, OrderView, PaymentAttempt,
    PaymentStatus, PaymentTransition,
};
use super::voucher::{Voucher, VoucherChanges};

/// Order store. Every mutation is a conditional update on a single order.
pub trait OrderRepository: Send + Sync + 'static {
    fn create(&self, order: NewOrder) -> Result<Order, DomainError>;
    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError>;
    fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>, DomainError>;
    fn list(&self, page: i64, limit: i64) -> Result<ListResult, DomainError>;

    /// Stores new gateway correlation, but only while the payment is pending
    /// and `payment_attempts` still equals `attempt - 1`.
    fn attach_payment_attempt(&self, id: Uuid, attempt: PaymentAttempt) -> Result<Order, DomainError>;

    /// Pending → `to`. Repeating the recorded terminal status yields
    /// `AlreadyFinalized`; a different terminal status is `PaymentConflict`.
    fn transition_payment(
        &self,
        id: Uuid,
        to: PaymentStatus,
        correlation: &Value,
    ) -> Result<PaymentTransition, DomainError>;

    /// Audit copy of the last gateway payload. Never used for decisions.
    fn record_gateway_response(&self, id: Uuid, payload: &Value) -> Result<(), DomainError>;

    fn advance_fulfillment(&self, id: Uuid, to: OrderStatus) -> Result<FulfillmentChange, DomainError>;

    /// Gateway orders still pending payment that were last touched before `cutoff`.
    fn find_stale_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, DomainError>;
}

/// Voucher ledger storage.
pub trait VoucherRepository: Send + Sync + 'static {
    fn insert(&self, voucher: Voucher) -> Result<Voucher, DomainError>;
    /// Applies an administrative edit under a row lock so it never overwrites
    /// a concurrent redemption.
    fn update(&self, id: Uuid, changes: &VoucherChanges, now: DateTime<Utc>) -> Result<Voucher, DomainError>;
    fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>, DomainError>;
    fn find_by_code(&self, code: &str) -> Result<Option<Voucher>, DomainError>;
    fn list(&self, page: i64, limit: i64) -> Result<(Vec<Voucher>, i64), DomainError>;

    /// Decrements `quantity` in one conditional update that re-checks the
    /// raw fields at `now`. Zero rows affected is `OutOfStock`.
    fn redeem(&self, id: Uuid, now: DateTime<Utc>) -> Result<Voucher, DomainError>;
    fn release(&self, id: Uuid) -> Result<Voucher, DomainError>;

    /// Rewrites the cached `status` of rows that drifted. Returns rows touched.
    fn refresh_statuses(&self, now: DateTime<Utc>) -> Result<usize, DomainError>;
}

impl<T: OrderRepository + ?Sized> OrderRepository for Arc<T> {
    fn create(&self, order: NewOrder) -> Result<Order, DomainError> {
        (**self).create(order)
    }
    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError> {
        (**self).find_by_id(id)
    }
    fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>, DomainError> {
        (**self).find_by_transaction_id(transaction_id)
    }
    fn list(&self, page: i64, limit: i64) -> Result<ListResult, DomainError> {
        (**self).list(page, limit)
    }
    fn attach_payment_attempt(&self, id: Uuid, attempt: PaymentAttempt) -> Result<Order, DomainError> {
        (**self).attach_payment_attempt(id, attempt)
    }
    fn transition_payment(
        &self,
        id: Uuid,
        to: PaymentStatus,
        correlation: &Value,
    ) -> Result<PaymentTransition, DomainError> {
        (**self).transition_payment(id, to, correlation)
    }
    fn record_gateway_response(&self, id: Uuid, payload: &Value) -> Result<(), DomainError> {
        (**self).record_gateway_response(id, payload)
    }
    fn advance_fulfillment(&self, id: Uuid, to: OrderStatus) -> Result<FulfillmentChange, DomainError> {
        (**self).advance_fulfillment(id, to)
    }
    fn find_stale_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, DomainError> {
        (**self).find_stale_pending(cutoff, limit)
    }
}

impl<T: VoucherRepository + ?Sized> VoucherRepository for Arc<T> {
    fn insert(&self, voucher: Voucher) -> Result<Voucher, DomainError> {
        (**self).insert(voucher)
    }
    fn update(&self, id: Uuid, changes: &VoucherChanges, now: DateTime<Utc>) -> Result<Voucher, DomainError> {
        (**self).update(id, changes, now)
    }
    fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>, DomainError> {
        (**self).find_by_id(id)
    }
    fn find_by_code(&self, code: &str) -> Result<Option<Voucher>, DomainError> {
        (**self).find_by_code(code)
    }
    fn list(&self, page: i64, limit: i64) -> Result<(Vec<Voucher>, i64), DomainError> {
        (**self).list(page, limit)
    }
    fn redeem(&self, id: Uuid, now: DateTime<Utc>) -> Result<Voucher, DomainError> {
        (**self).redeem(id, now)
    }
    fn release(&self, id: Uuid) -> Result<Voucher, DomainError> {
        (**self).release(id)
    }
    fn refresh_statuses(&self, now: DateTime<Utc>) -> Result<usize, DomainError> {
        (**self).refresh_statuses(now)
    }
}
