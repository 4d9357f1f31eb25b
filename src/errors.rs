use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use log::error;
use thiserror::Error;

use crate::domain::errors::DomainError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    NotFound { reason: &'static str, message: String },

    #[error("{message}")]
    BadRequest { reason: &'static str, message: String },

    #[error("{message}")]
    Conflict { reason: &'static str, message: String },

    #[error("{message}")]
    Unprocessable { reason: &'static str, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable code a client can branch on, independent of the message text.
pub fn reason_code(e: &DomainError) -> &'static str {
    match e {
        DomainError::NotFound => "order_not_found",
        DomainError::Validation(_) => "invalid_input",
        DomainError::PaymentConflict { .. } => "payment_conflict",
        DomainError::PaymentFinalized(_) => "payment_finalized",
        DomainError::InvalidTransition { .. } => "invalid_transition",
        DomainError::PaymentRequired => "payment_required",
        DomainError::ConcurrentModification => "concurrent_modification",
        DomainError::VoucherNotFound => "voucher_not_found",
        DomainError::VoucherNotActive(status) => status.as_str(),
        DomainError::BelowMinimum { .. } => "below_minimum",
        DomainError::OutOfStock => "out_of_stock",
        DomainError::DuplicateVoucherCode(_) => "duplicate_code",
        DomainError::InvalidSignature => "invalid_signature",
        DomainError::UnknownTransaction(_) => "unknown_transaction",
        DomainError::AmountMismatch { .. } => "amount_mismatch",
        DomainError::ReconciliationConflict { .. } => "reconciliation_conflict",
        DomainError::Internal(_) => "internal",
    }
}

impl From<DomainError> for AppError {
    fn from(e: DomainError) -> Self {
        let reason = reason_code(&e);
        let message = e.to_string();
        match e {
            DomainError::NotFound | DomainError::VoucherNotFound | DomainError::UnknownTransaction(_) => {
                AppError::NotFound { reason, message }
            }
            DomainError::Validation(_) | DomainError::InvalidSignature => {
                AppError::BadRequest { reason, message }
            }
            DomainError::PaymentConflict { .. }
            | DomainError::PaymentFinalized(_)
            | DomainError::InvalidTransition { .. }
            | DomainError::ConcurrentModification
            | DomainError::DuplicateVoucherCode(_)
            | DomainError::ReconciliationConflict { .. } => AppError::Conflict { reason, message },
            DomainError::PaymentRequired
            | DomainError::VoucherNotActive(_)
            | DomainError::BelowMinimum { .. }
            | DomainError::OutOfStock
            | DomainError::AmountMismatch { .. } => AppError::Unprocessable { reason, message },
            DomainError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::NotFound { reason, .. }
            | AppError::BadRequest { reason, .. }
            | AppError::Conflict { reason, .. }
            | AppError::Unprocessable { reason, .. } => {
                HttpResponse::build(self.status_code()).json(serde_json::json!({
                    "error": self.to_string(),
                    "reason": reason
                }))
            }
            AppError::Internal(detail) => {
                error!("request failed: {detail}");
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Internal server error",
                    "reason": "internal"
                }))
            }
        }
    }
}
