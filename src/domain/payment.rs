use std::fmt;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::order::PaymentStatus;

/// Gateway response code for a successful charge.
pub const RESPONSE_SUCCESS: &str = "00";
/// Gateway response code for a customer who abandoned the payment page.
pub const RESPONSE_CUSTOMER_CANCELLED: &str = "24";

/// The two delivery paths a gateway uses for the same payment result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackChannel {
    SyncReturn,
    AsyncNotify,
}

impl fmt::Display for CallbackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallbackChannel::SyncReturn => "sync-return",
            CallbackChannel::AsyncNotify => "async-notify",
        })
    }
}

/// Maps a gateway response code onto a terminal payment status.
pub fn outcome_for(response_code: &str) -> PaymentStatus {
    match response_code {
        RESPONSE_SUCCESS => PaymentStatus::Completed,
        RESPONSE_CUSTOMER_CANCELLED => PaymentStatus::Cancelled,
        _ => PaymentStatus::Failed,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub transaction_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationOutcome {
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
    /// `true` when the callback repeated an already-recorded decision.
    pub replayed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_gateway_codes() {
        assert_eq!(outcome_for("00"), PaymentStatus::Completed);
        assert_eq!(outcome_for("24"), PaymentStatus::Cancelled);
        assert_eq!(outcome_for("51"), PaymentStatus::Failed);
        assert_eq!(outcome_for(""), PaymentStatus::Failed);
    }
}
