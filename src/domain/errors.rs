use thiserror::Error;

use super::order::{OrderStatus, PaymentStatus};
use super::voucher::EffectiveStatus;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Order not found")]
    NotFound,
    #[error("Invalid input: {0}")]
    Validation(String),

    // Order store
    #[error("Payment is already {current}, cannot record {requested}")]
    PaymentConflict {
        current: PaymentStatus,
        requested: PaymentStatus,
    },
    #[error("Payment is already {0}")]
    PaymentFinalized(PaymentStatus),
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Order must be paid before it leaves Processing")]
    PaymentRequired,
    #[error("Order was modified concurrently")]
    ConcurrentModification,

    // Voucher ledger
    #[error("Voucher not found")]
    VoucherNotFound,
    #[error("Voucher is not active ({0})")]
    VoucherNotActive(EffectiveStatus),
    #[error("Order amount {amount} is below the voucher minimum of {minimum}")]
    BelowMinimum { minimum: i64, amount: i64 },
    #[error("Voucher is out of stock")]
    OutOfStock,
    #[error("Voucher code {0} already exists")]
    DuplicateVoucherCode(String),

    // Payment reconciliation
    #[error("Invalid gateway signature")]
    InvalidSignature,
    #[error("Unknown transaction {0}")]
    UnknownTransaction(String),
    #[error("Amount mismatch: expected {expected}, gateway reported {actual}")]
    AmountMismatch {
        expected: i64,
        actual: i64,
        /// Payment status the order holds once the mismatch is handled.
        recorded: PaymentStatus,
    },
    #[error("Payment already recorded as {recorded}, callback claims {claimed}")]
    ReconciliationConflict {
        recorded: PaymentStatus,
        claimed: PaymentStatus,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}
