use std::sync::Arc;
use std::time::Duration;

use crate::application::order_service::OrderService;
use crate::application::payment_reconciler::PaymentReconciler;
use crate::application::voucher_ledger::VoucherLedger;
use crate::domain::ports::{OrderRepository, VoucherRepository};
use crate::gateway::GatewayConfig;

pub type SharedOrders = Arc<dyn OrderRepository>;
pub type SharedVouchers = Arc<dyn VoucherRepository>;

/// Everything the handlers and the sweep share. Storage sits behind the
/// ports, so the same state runs over Postgres or the in-memory stores.
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService<SharedOrders, SharedVouchers>,
    pub vouchers: VoucherLedger<SharedVouchers>,
    pub payments: PaymentReconciler<SharedOrders, SharedVouchers>,
    pub checkout_result_url: String,
    pub callback_timeout: Duration,
}

impl AppState {
    pub fn new(
        orders: SharedOrders,
        vouchers: SharedVouchers,
        gateway: GatewayConfig,
        checkout_result_url: String,
        callback_timeout: Duration,
    ) -> Self {
        let ledger = VoucherLedger::new(vouchers);
        Self {
            orders: OrderService::new(Arc::clone(&orders), ledger.clone()),
            payments: PaymentReconciler::new(orders, ledger.clone(), gateway),
            vouchers: ledger,
            checkout_result_url,
            callback_timeout,
        }
    }
}
