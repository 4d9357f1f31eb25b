use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{Order, PaymentAttempt, PaymentMethod, PaymentStatus, PaymentTransition};
use crate::domain::payment::{outcome_for, CallbackChannel, PaymentRequest, ReconciliationOutcome};
use crate::domain::ports::{OrderRepository, VoucherRepository};
use crate::gateway::{self, GatewayConfig};

use super::voucher_ledger::VoucherLedger;

/// Orders expired per sweep pass.
const STALE_BATCH: i64 = 100;

/// Gateway correlation key for one payment attempt of an order.
pub fn transaction_ref(order_id: Uuid, attempt: i32) -> String {
    format!("{}-{}", order_id.simple(), attempt)
}

pub struct PaymentReconciler<O, V> {
    orders: O,
    vouchers: VoucherLedger<V>,
    gateway: GatewayConfig,
}

impl<O: Clone, V: Clone> Clone for PaymentReconciler<O, V> {
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            vouchers: self.vouchers.clone(),
            gateway: self.gateway.clone(),
        }
    }
}

impl<O: OrderRepository, V: VoucherRepository> PaymentReconciler<O, V> {
    pub fn new(orders: O, vouchers: VoucherLedger<V>, gateway: GatewayConfig) -> Self {
        Self {
            orders,
            vouchers,
            gateway,
        }
    }

    /// Issues a signed redirect for the order's next payment attempt. Each call
    /// bumps `payment_attempts`, so older references stop resolving.
    pub fn create_payment_request(
        &self,
        order_id: Uuid,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentRequest, DomainError> {
        let order = self
            .orders
            .find_by_id(order_id)?
            .ok_or(DomainError::NotFound)?
            .order;
        if order.payment_method != PaymentMethod::Gateway {
            return Err(DomainError::Validation(
                "order is not paid through the gateway".to_string(),
            ));
        }
        if order.payment_status.is_terminal() {
            return Err(DomainError::PaymentFinalized(order.payment_status));
        }

        let attempt = order.payment_attempts + 1;
        let txn_ref = transaction_ref(order.id, attempt);
        let payment_url = gateway::build_payment_url(
            &self.gateway,
            &txn_ref,
            order.total_payment,
            &format!("Payment for order {}", order.id),
            client_ip,
            now,
        )?;
        self.orders.attach_payment_attempt(
            order.id,
            PaymentAttempt {
                attempt,
                transaction_id: txn_ref.clone(),
                payment_url: payment_url.clone(),
            },
        )?;
        info!("payment attempt {attempt} issued for order {} as {txn_ref}", order.id);

        Ok(PaymentRequest {
            order_id: order.id,
            transaction_id: txn_ref,
            redirect_url: payment_url,
        })
    }

    /// Applies a gateway callback. Both channels run the same steps, and a
    /// callback repeating an already-recorded decision is a successful replay.
    pub fn handle_callback(
        &self,
        params: &BTreeMap<String, String>,
        channel: CallbackChannel,
    ) -> Result<ReconciliationOutcome, DomainError> {
        let callback = gateway::parse_callback(params, &self.gateway.secret).map_err(|e| {
            warn!("{channel} callback rejected: {e}");
            e
        })?;

        let order = self
            .orders
            .find_by_transaction_id(&callback.txn_ref)?
            .ok_or_else(|| {
                warn!("{channel} callback for unknown transaction {}", callback.txn_ref);
                DomainError::UnknownTransaction(callback.txn_ref.clone())
            })?;
        let payload = gateway::payload_json(params);

        if callback.amount != order.total_payment {
            warn!(
                "{channel} callback for order {} reports amount {}, expected {}",
                order.id, callback.amount, order.total_payment
            );
            let recorded = self.fail_on_mismatch(&order, &payload)?;
            return Err(DomainError::AmountMismatch {
                expected: order.total_payment,
                actual: callback.amount,
                recorded,
            });
        }

        let outcome = outcome_for(&callback.response_code);
        match self.orders.transition_payment(order.id, outcome, &payload) {
            Ok(PaymentTransition::Applied(updated)) => {
                info!(
                    "{channel} callback moved order {} payment to {outcome} (code {})",
                    updated.id, callback.response_code
                );
                if outcome != PaymentStatus::Completed {
                    if let Some(voucher_id) = updated.voucher_id {
                        self.vouchers.release_or_log(voucher_id, updated.id);
                    }
                }
                Ok(ReconciliationOutcome {
                    order_id: updated.id,
                    payment_status: updated.payment_status,
                    replayed: false,
                })
            }
            Ok(PaymentTransition::AlreadyFinalized(current)) => {
                info!("{channel} callback replayed {outcome} for order {}", current.id);
                self.record_or_log(current.id, &payload);
                Ok(ReconciliationOutcome {
                    order_id: current.id,
                    payment_status: current.payment_status,
                    replayed: true,
                })
            }
            Err(DomainError::PaymentConflict { current, requested }) => {
                warn!(
                    "{channel} callback for order {} claims {requested}, already recorded {current}",
                    order.id
                );
                self.record_or_log(order.id, &payload);
                Err(DomainError::ReconciliationConflict {
                    recorded: current,
                    claimed: requested,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Fails gateway orders whose payment has sat in `Pending` for longer than
    /// `timeout`. Returns how many this pass moved.
    pub fn expire_stale_payments(&self, now: DateTime<Utc>, timeout: Duration) -> Result<usize, DomainError> {
        let stale = self.orders.find_stale_pending(now - timeout, STALE_BATCH)?;
        let mut expired = 0;
        for order in stale {
            let reason = json!({ "reason": "payment_timeout", "expired_at": now });
            match self.orders.transition_payment(order.id, PaymentStatus::Failed, &reason) {
                Ok(PaymentTransition::Applied(updated)) => {
                    info!("order {} payment timed out", updated.id);
                    if let Some(voucher_id) = updated.voucher_id {
                        self.vouchers.release_or_log(voucher_id, updated.id);
                    }
                    expired += 1;
                }
                // A callback got there first.
                Ok(PaymentTransition::AlreadyFinalized(_)) | Err(DomainError::PaymentConflict { .. }) => {}
                Err(e) => error!("failed to expire payment of order {}: {e}", order.id),
            }
        }
        Ok(expired)
    }

    /// A signed payload whose amount disagrees with the order is never allowed
    /// to complete it. A still-pending payment is failed; a finalized one keeps
    /// its decision and only gains the audit copy.
    /// Returns the payment status the order ends up with.
    fn fail_on_mismatch(&self, order: &Order, payload: &Value) -> Result<PaymentStatus, DomainError> {
        if order.payment_status.is_terminal() {
            self.record_or_log(order.id, payload);
            return Ok(order.payment_status);
        }
        match self.orders.transition_payment(order.id, PaymentStatus::Failed, payload) {
            Ok(PaymentTransition::Applied(updated)) => {
                if let Some(voucher_id) = updated.voucher_id {
                    self.vouchers.release_or_log(voucher_id, updated.id);
                }
                Ok(updated.payment_status)
            }
            Ok(PaymentTransition::AlreadyFinalized(current)) => {
                self.record_or_log(order.id, payload);
                Ok(current.payment_status)
            }
            Err(DomainError::PaymentConflict { current, .. }) => {
                self.record_or_log(order.id, payload);
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    fn record_or_log(&self, order_id: Uuid, payload: &Value) {
        if let Err(e) = self.orders.record_gateway_response(order_id, payload) {
            error!("failed to store gateway payload for order {order_id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;
    use crate::application::order_service::fixtures::draft;
    use crate::application::order_service::OrderService;
    use crate::domain::order::OrderStatus;
    use crate::domain::voucher::fixtures::voucher;
    use crate::domain::voucher::Voucher;
    use crate::gateway::fixtures::{config, signed_callback};
    use crate::infrastructure::memory::{InMemoryOrderRepository, InMemoryVoucherRepository};

    struct Harness {
        orders: InMemoryOrderRepository,
        vouchers: InMemoryVoucherRepository,
        voucher: Voucher,
        service: OrderService<InMemoryOrderRepository, InMemoryVoucherRepository>,
        reconciler: PaymentReconciler<InMemoryOrderRepository, InMemoryVoucherRepository>,
    }

    impl Harness {
        fn new() -> Self {
            let orders = InMemoryOrderRepository::new();
            let vouchers = InMemoryVoucherRepository::new();
            let voucher = vouchers.insert(voucher(3, Utc::now())).unwrap();
            let ledger = VoucherLedger::new(vouchers.clone());
            Self {
                service: OrderService::new(orders.clone(), ledger.clone()),
                reconciler: PaymentReconciler::new(orders.clone(), ledger, config()),
                orders,
                vouchers,
                voucher,
            }
        }

        /// Gateway order for 500 000 with the voucher applied, plus its first
        /// payment reference.
        fn checkout(&self) -> (Uuid, String) {
            let order = self
                .service
                .create_order(draft(PaymentMethod::Gateway, Some("SALE50K")), Utc::now())
                .unwrap()
                .order;
            let request = self
                .reconciler
                .create_payment_request(order.id, "127.0.0.1", Utc::now())
                .unwrap();
            (order.id, request.transaction_id)
        }

        fn order(&self, id: Uuid) -> Order {
            self.orders.find_by_id(id).unwrap().unwrap().order
        }

        fn voucher_quantity(&self) -> i32 {
            self.vouchers.find_by_id(self.voucher.id).unwrap().unwrap().quantity
        }
    }

    #[test]
    fn payment_request_is_signed_and_stored() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        assert_eq!(txn_ref, transaction_ref(id, 1));

        let order = h.order(id);
        assert_eq!(order.transaction_id.as_deref(), Some(txn_ref.as_str()));
        assert_eq!(order.payment_attempts, 1);
        let url = order.payment_url.unwrap();
        assert!(url.starts_with(&config().pay_url));
        assert!(url.contains("amount=450000"));
        assert!(url.contains("secure_hash="));
    }

    #[test]
    fn regenerating_request_retires_the_old_reference() {
        let h = Harness::new();
        let (id, first) = h.checkout();
        let second = h
            .reconciler
            .create_payment_request(id, "127.0.0.1", Utc::now())
            .unwrap()
            .transaction_id;
        assert_ne!(first, second);

        assert!(matches!(
            h.reconciler
                .handle_callback(&signed_callback(&first, 450_000, "00"), CallbackChannel::AsyncNotify),
            Err(DomainError::UnknownTransaction(_))
        ));
        let outcome = h
            .reconciler
            .handle_callback(&signed_callback(&second, 450_000, "00"), CallbackChannel::AsyncNotify)
            .unwrap();
        assert_eq!(outcome.payment_status, PaymentStatus::Completed);
    }

    #[test]
    fn payment_request_rejects_cash_and_finalized_orders() {
        let h = Harness::new();
        let cod = h
            .service
            .create_order(draft(PaymentMethod::CashOnDelivery, None), Utc::now())
            .unwrap()
            .order;
        assert!(matches!(
            h.reconciler.create_payment_request(cod.id, "127.0.0.1", Utc::now()),
            Err(DomainError::Validation(_))
        ));

        let (id, txn_ref) = h.checkout();
        h.reconciler
            .handle_callback(&signed_callback(&txn_ref, 450_000, "00"), CallbackChannel::SyncReturn)
            .unwrap();
        assert!(matches!(
            h.reconciler.create_payment_request(id, "127.0.0.1", Utc::now()),
            Err(DomainError::PaymentFinalized(PaymentStatus::Completed))
        ));
        assert!(matches!(
            h.reconciler.create_payment_request(Uuid::new_v4(), "127.0.0.1", Utc::now()),
            Err(DomainError::NotFound)
        ));
    }

    #[test]
    fn full_lifecycle() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        assert_eq!(h.order(id).final_total, 450_000);
        assert_eq!(h.voucher_quantity(), 2);

        let outcome = h
            .reconciler
            .handle_callback(&signed_callback(&txn_ref, 450_000, "00"), CallbackChannel::SyncReturn)
            .unwrap();
        assert_eq!(
            outcome,
            ReconciliationOutcome {
                order_id: id,
                payment_status: PaymentStatus::Completed,
                replayed: false
            }
        );
        assert!(h.order(id).payment_gateway_response.is_some());

        for step in [OrderStatus::Packaging, OrderStatus::Shipping, OrderStatus::Completed] {
            assert_eq!(h.service.advance_fulfillment(id, step).unwrap().order_status, step);
        }
        assert!(matches!(
            h.service.advance_fulfillment(id, OrderStatus::Processing),
            Err(DomainError::InvalidTransition {
                from: OrderStatus::Completed,
                to: OrderStatus::Processing
            })
        ));
        assert_eq!(h.voucher_quantity(), 2);

        let kinds: Vec<_> = h.orders.events().unwrap().iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            [
                "OrderCreated",
                "PaymentCompleted",
                "OrderStatusChanged",
                "OrderStatusChanged",
                "OrderStatusChanged"
            ]
        );
    }

    #[test]
    fn duplicate_completed_callback_is_a_replay() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        let params = signed_callback(&txn_ref, 450_000, "00");

        let first = h.reconciler.handle_callback(&params, CallbackChannel::SyncReturn).unwrap();
        let second = h.reconciler.handle_callback(&params, CallbackChannel::AsyncNotify).unwrap();
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.payment_status, PaymentStatus::Completed);
        assert_eq!(h.order(id).payment_status, PaymentStatus::Completed);
        assert_eq!(h.voucher_quantity(), 2);

        let payments = h
            .orders
            .events()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == "PaymentCompleted")
            .count();
        assert_eq!(payments, 1);
    }

    #[test]
    fn duplicate_failure_releases_voucher_once() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        let params = signed_callback(&txn_ref, 450_000, "51");

        h.reconciler.handle_callback(&params, CallbackChannel::AsyncNotify).unwrap();
        let replay = h.reconciler.handle_callback(&params, CallbackChannel::SyncReturn).unwrap();
        assert!(replay.replayed);
        assert_eq!(h.order(id).payment_status, PaymentStatus::Failed);
        assert_eq!(h.voucher_quantity(), 3);
    }

    #[test]
    fn customer_cancel_code_cancels_payment() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        h.reconciler
            .handle_callback(&signed_callback(&txn_ref, 450_000, "24"), CallbackChannel::SyncReturn)
            .unwrap();
        assert_eq!(h.order(id).payment_status, PaymentStatus::Cancelled);
        assert_eq!(h.voucher_quantity(), 3);
    }

    #[test]
    fn first_terminal_decision_wins() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        h.reconciler
            .handle_callback(&signed_callback(&txn_ref, 450_000, "00"), CallbackChannel::SyncReturn)
            .unwrap();

        assert!(matches!(
            h.reconciler
                .handle_callback(&signed_callback(&txn_ref, 450_000, "51"), CallbackChannel::AsyncNotify),
            Err(DomainError::ReconciliationConflict {
                recorded: PaymentStatus::Completed,
                claimed: PaymentStatus::Failed
            })
        ));
        assert_eq!(h.order(id).payment_status, PaymentStatus::Completed);
        assert_eq!(h.voucher_quantity(), 2);
    }

    #[test]
    fn failure_then_success_keeps_failure() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        h.reconciler
            .handle_callback(&signed_callback(&txn_ref, 450_000, "51"), CallbackChannel::AsyncNotify)
            .unwrap();
        assert!(matches!(
            h.reconciler
                .handle_callback(&signed_callback(&txn_ref, 450_000, "00"), CallbackChannel::SyncReturn),
            Err(DomainError::ReconciliationConflict { .. })
        ));
        assert_eq!(h.order(id).payment_status, PaymentStatus::Failed);
    }

    #[test]
    fn tampered_amount_forces_failure() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        assert!(matches!(
            h.reconciler
                .handle_callback(&signed_callback(&txn_ref, 1_000, "00"), CallbackChannel::AsyncNotify),
            Err(DomainError::AmountMismatch {
                expected: 450_000,
                actual: 1_000,
                recorded: PaymentStatus::Failed
            })
        ));
        assert_eq!(h.order(id).payment_status, PaymentStatus::Failed);
        assert_eq!(h.voucher_quantity(), 3);

        // The genuine callback arriving later cannot complete it.
        assert!(h
            .reconciler
            .handle_callback(&signed_callback(&txn_ref, 450_000, "00"), CallbackChannel::SyncReturn)
            .is_err());
        assert_eq!(h.order(id).payment_status, PaymentStatus::Failed);
    }

    #[test]
    fn tampered_amount_after_completion_keeps_completion() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        h.reconciler
            .handle_callback(&signed_callback(&txn_ref, 450_000, "00"), CallbackChannel::SyncReturn)
            .unwrap();
        assert!(matches!(
            h.reconciler
                .handle_callback(&signed_callback(&txn_ref, 1_000, "00"), CallbackChannel::AsyncNotify),
            Err(DomainError::AmountMismatch {
                recorded: PaymentStatus::Completed,
                ..
            })
        ));
        assert_eq!(h.order(id).payment_status, PaymentStatus::Completed);
        assert_eq!(h.voucher_quantity(), 2);
    }

    #[test]
    fn bad_signature_changes_nothing() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        let mut params = signed_callback(&txn_ref, 450_000, "00");
        params.insert("response_code".to_string(), "51".to_string());

        assert!(matches!(
            h.reconciler.handle_callback(&params, CallbackChannel::AsyncNotify),
            Err(DomainError::InvalidSignature)
        ));
        let order = h.order(id);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert!(order.payment_gateway_response.is_none());
        assert_eq!(h.voucher_quantity(), 2);
    }

    #[test]
    fn unknown_transaction_is_reported() {
        let h = Harness::new();
        assert!(matches!(
            h.reconciler
                .handle_callback(&signed_callback("nope-1", 450_000, "00"), CallbackChannel::AsyncNotify),
            Err(DomainError::UnknownTransaction(r)) if r == "nope-1"
        ));
    }

    #[test]
    fn both_channels_racing_converge() {
        let h = Harness::new();
        let (id, txn_ref) = h.checkout();
        let params = signed_callback(&txn_ref, 450_000, "51");
        let barrier = Arc::new(Barrier::new(2));

        let outcomes: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = [CallbackChannel::SyncReturn, CallbackChannel::AsyncNotify]
                .into_iter()
                .map(|channel| {
                    let barrier = Arc::clone(&barrier);
                    let reconciler = &h.reconciler;
                    let params = &params;
                    s.spawn(move || {
                        barrier.wait();
                        reconciler.handle_callback(params, channel)
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);
        assert!(outcomes.iter().all(|o| o.payment_status == PaymentStatus::Failed));
        assert_eq!(h.order(id).payment_status, PaymentStatus::Failed);
        assert_eq!(h.voucher_quantity(), 3);
    }

    #[test]
    fn stale_pending_payments_time_out_once() {
        let h = Harness::new();
        let (id, _) = h.checkout();
        let (fresh, _) = h.checkout();
        let now = Utc::now();
        h.orders.backdate(id, now - Duration::hours(1)).unwrap();
        assert_eq!(h.voucher_quantity(), 1);

        assert_eq!(h.reconciler.expire_stale_payments(now, Duration::minutes(30)).unwrap(), 1);
        assert_eq!(h.order(id).payment_status, PaymentStatus::Failed);
        assert_eq!(h.order(fresh).payment_status, PaymentStatus::Pending);
        assert_eq!(h.voucher_quantity(), 2);

        assert_eq!(h.reconciler.expire_stale_payments(now, Duration::minutes(30)).unwrap(), 0);
        assert_eq!(h.voucher_quantity(), 2);
    }
}
