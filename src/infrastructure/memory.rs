//! Process-local adapters behind the same ports as the Postgres ones. A
//! single mutex per store plays the part of the row lock, so every operation
//! keeps the same compare-and-set semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{
    FulfillmentChange, ListResult, NewOrder, Order, OrderDetail, OrderStatus, OrderView,
    PaymentAttempt, PaymentMethod, PaymentStatus, PaymentTransition, PaymentTransitionCheck,
};
use crate::domain::ports::{OrderRepository, VoucherRepository};
use crate::domain::voucher::{EffectiveStatus, Voucher, VoucherChanges, VoucherStatus};

use super::outbox::{self, OrderEvent};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, DomainError> {
    mutex
        .lock()
        .map_err(|_| DomainError::Internal("in-memory store poisoned".to_string()))
}

fn page_bounds(len: usize, page: i64, limit: i64) -> (usize, usize) {
    let start = usize::try_from((page - 1).max(0) * limit.max(0)).unwrap_or(usize::MAX);
    let start = start.min(len);
    let end = start.saturating_add(usize::try_from(limit.max(0)).unwrap_or(0)).min(len);
    (start, end)
}

// ── Orders ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct OrderState {
    orders: HashMap<Uuid, Order>,
    details: HashMap<Uuid, Vec<OrderDetail>>,
    /// Insertion order, oldest first.
    sequence: Vec<Uuid>,
    events: Vec<OrderEvent>,
}

impl OrderState {
    fn get_mut(&mut self, id: Uuid) -> Result<&mut Order, DomainError> {
        self.orders.get_mut(&id).ok_or(DomainError::NotFound)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<Mutex<OrderState>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outbox events recorded so far, oldest first.
    pub fn events(&self) -> Result<Vec<OrderEvent>, DomainError> {
        Ok(lock(&self.state)?.events.clone())
    }

    /// Rewinds `updated_at`, standing in for wall-clock time passing.
    pub fn backdate(&self, id: Uuid, updated_at: DateTime<Utc>) -> Result<(), DomainError> {
        lock(&self.state)?.get_mut(id)?.updated_at = updated_at;
        Ok(())
    }
}

impl OrderRepository for InMemoryOrderRepository {
    fn create(&self, order: NewOrder) -> Result<Order, DomainError> {
        let mut state = lock(&self.state)?;
        if state.orders.contains_key(&order.id) {
            return Err(DomainError::Internal(format!("duplicate order id {}", order.id)));
        }
        let created = order.to_order(Utc::now());
        state.events.push(outbox::order_created(&created, &order.details));
        state.orders.insert(created.id, created.clone());
        state.details.insert(created.id, order.details);
        state.sequence.push(created.id);
        Ok(created)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError> {
        let state = lock(&self.state)?;
        Ok(state.orders.get(&id).map(|order| OrderView {
            order: order.clone(),
            details: state.details.get(&id).cloned().unwrap_or_default(),
        }))
    }

    fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>, DomainError> {
        let state = lock(&self.state)?;
        Ok(state
            .orders
            .values()
            .find(|o| o.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    fn list(&self, page: i64, limit: i64) -> Result<ListResult, DomainError> {
        let state = lock(&self.state)?;
        let newest_first: Vec<&Uuid> = state.sequence.iter().rev().collect();
        let (start, end) = page_bounds(newest_first.len(), page, limit);
        Ok(ListResult {
            items: newest_first[start..end]
                .iter()
                .filter_map(|id| state.orders.get(id).cloned())
                .collect(),
            total: state.sequence.len() as i64,
        })
    }

    fn attach_payment_attempt(&self, id: Uuid, attempt: PaymentAttempt) -> Result<Order, DomainError> {
        let mut state = lock(&self.state)?;
        let order = state.get_mut(id)?;
        if order.payment_status.is_terminal() {
            return Err(DomainError::PaymentFinalized(order.payment_status));
        }
        if order.payment_attempts != attempt.attempt - 1 {
            return Err(DomainError::ConcurrentModification);
        }
        order.transaction_id = Some(attempt.transaction_id);
        order.payment_url = Some(attempt.payment_url);
        order.payment_attempts = attempt.attempt;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    fn transition_payment(
        &self,
        id: Uuid,
        to: PaymentStatus,
        correlation: &Value,
    ) -> Result<PaymentTransition, DomainError> {
        let mut state = lock(&self.state)?;
        let order = state.get_mut(id)?;
        match order.payment_status.check_transition(to)? {
            PaymentTransitionCheck::AlreadyFinalized => Ok(PaymentTransition::AlreadyFinalized(order.clone())),
            PaymentTransitionCheck::Apply => {
                order.payment_status = to;
                order.payment_gateway_response = Some(correlation.clone());
                order.updated_at = Utc::now();
                let updated = order.clone();
                state.events.push(outbox::payment_changed(&updated));
                Ok(PaymentTransition::Applied(updated))
            }
        }
    }

    fn record_gateway_response(&self, id: Uuid, payload: &Value) -> Result<(), DomainError> {
        let mut state = lock(&self.state)?;
        state.get_mut(id)?.payment_gateway_response = Some(payload.clone());
        Ok(())
    }

    fn advance_fulfillment(&self, id: Uuid, to: OrderStatus) -> Result<FulfillmentChange, DomainError> {
        let mut state = lock(&self.state)?;
        let order = state.get_mut(id)?;
        let from = order.order_status;
        let plan = order.plan_fulfillment(to)?;

        order.order_status = plan.order_status;
        if let Some(payment_status) = plan.payment_status {
            order.payment_status = payment_status;
        }
        order.updated_at = Utc::now();
        let updated = order.clone();

        state.events.push(outbox::status_changed(&updated, from));
        if plan.payment_status.is_some() {
            state.events.push(outbox::payment_changed(&updated));
        }
        Ok(FulfillmentChange {
            release_voucher: if plan.release_voucher { updated.voucher_id } else { None },
            order: updated,
        })
    }

    fn find_stale_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, DomainError> {
        let state = lock(&self.state)?;
        let mut stale: Vec<Order> = state
            .orders
            .values()
            .filter(|o| {
                o.payment_method == PaymentMethod::Gateway
                    && o.payment_status == PaymentStatus::Pending
                    && o.order_status != OrderStatus::Cancelled
                    && o.updated_at < cutoff
            })
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.updated_at);
        stale.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(stale)
    }
}

// ── Vouchers ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct VoucherState {
    vouchers: HashMap<Uuid, Voucher>,
    sequence: Vec<Uuid>,
}

#[derive(Clone, Default)]
pub struct InMemoryVoucherRepository {
    state: Arc<Mutex<VoucherState>>,
}

impl InMemoryVoucherRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoucherRepository for InMemoryVoucherRepository {
    fn insert(&self, voucher: Voucher) -> Result<Voucher, DomainError> {
        let mut state = lock(&self.state)?;
        if state.vouchers.values().any(|v| v.code == voucher.code) {
            return Err(DomainError::DuplicateVoucherCode(voucher.code));
        }
        state.sequence.push(voucher.id);
        state.vouchers.insert(voucher.id, voucher.clone());
        Ok(voucher)
    }

    fn update(&self, id: Uuid, changes: &VoucherChanges, now: DateTime<Utc>) -> Result<Voucher, DomainError> {
        let mut state = lock(&self.state)?;
        let current = state.vouchers.get_mut(&id).ok_or(DomainError::VoucherNotFound)?;
        *current = changes.apply(current, now)?;
        Ok(current.clone())
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>, DomainError> {
        Ok(lock(&self.state)?.vouchers.get(&id).cloned())
    }

    fn find_by_code(&self, code: &str) -> Result<Option<Voucher>, DomainError> {
        Ok(lock(&self.state)?
            .vouchers
            .values()
            .find(|v| v.code == code)
            .cloned())
    }

    fn list(&self, page: i64, limit: i64) -> Result<(Vec<Voucher>, i64), DomainError> {
        let state = lock(&self.state)?;
        let newest_first: Vec<&Uuid> = state.sequence.iter().rev().collect();
        let (start, end) = page_bounds(newest_first.len(), page, limit);
        let items = newest_first[start..end]
            .iter()
            .filter_map(|id| state.vouchers.get(id).cloned())
            .collect();
        Ok((items, state.sequence.len() as i64))
    }

    fn redeem(&self, id: Uuid, now: DateTime<Utc>) -> Result<Voucher, DomainError> {
        let mut state = lock(&self.state)?;
        let voucher = state.vouchers.get_mut(&id).ok_or(DomainError::VoucherNotFound)?;
        if voucher.effective_status(now) != EffectiveStatus::Active {
            return Err(DomainError::OutOfStock);
        }
        voucher.quantity -= 1;
        voucher.updated_at = now;
        Ok(voucher.clone())
    }

    fn release(&self, id: Uuid) -> Result<Voucher, DomainError> {
        let mut state = lock(&self.state)?;
        let voucher = state.vouchers.get_mut(&id).ok_or(DomainError::VoucherNotFound)?;
        voucher.quantity += 1;
        voucher.updated_at = Utc::now();
        if voucher.status == VoucherStatus::OutOfStock && voucher.quantity > 0 {
            voucher.status = VoucherStatus::Active;
        }
        Ok(voucher.clone())
    }

    fn refresh_statuses(&self, now: DateTime<Utc>) -> Result<usize, DomainError> {
        let mut state = lock(&self.state)?;
        let mut touched = 0;
        for voucher in state.vouchers.values_mut() {
            let refreshed = voucher.refreshed_status(now);
            if refreshed != voucher.status {
                voucher.status = refreshed;
                voucher.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_clamp_to_length() {
        assert_eq!(page_bounds(5, 1, 3), (0, 3));
        assert_eq!(page_bounds(5, 2, 3), (3, 5));
        assert_eq!(page_bounds(5, 3, 3), (5, 5));
        assert_eq!(page_bounds(0, 1, 20), (0, 0));
    }
}
