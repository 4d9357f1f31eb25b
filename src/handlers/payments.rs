//! Gateway callback endpoints. Both hand the raw parameters to the reconciler
//! and differ only in how they answer: the shopper's browser gets a redirect,
//! the gateway's server push gets an acknowledgement code.

use std::collections::BTreeMap;

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use log::warn;
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::errors::DomainError;
use crate::domain::order::PaymentStatus;
use crate::domain::payment::{CallbackChannel, ReconciliationOutcome};
use crate::errors::reason_code;
use crate::state::AppState;

/// Acknowledgement body the gateway expects from the notify endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct NotifyAck {
    #[serde(rename = "RspCode")]
    pub rsp_code: &'static str,
    #[serde(rename = "Message")]
    pub message: &'static str,
}

impl NotifyAck {
    fn new(rsp_code: &'static str, message: &'static str) -> Self {
        Self { rsp_code, message }
    }
}

/// Decodes callback parameters from a urlencoded query string or form body.
/// Unreadable input cannot carry a valid signature, so it is refused as one.
fn callback_params(
    raw: &str,
    channel: CallbackChannel,
) -> Result<BTreeMap<String, String>, DomainError> {
    web::Query::<BTreeMap<String, String>>::from_query(raw)
        .map(web::Query::into_inner)
        .map_err(|e| {
            warn!("{channel} callback parameters unreadable: {e}");
            DomainError::InvalidSignature
        })
}

/// Runs the reconciler under the callback deadline. Running out of time is
/// reported as `Internal`; the work itself keeps going and stays idempotent.
async fn reconcile(
    state: web::Data<AppState>,
    raw: &str,
    channel: CallbackChannel,
) -> Result<ReconciliationOutcome, DomainError> {
    let params = callback_params(raw, channel)?;
    let deadline = state.callback_timeout;
    let work = web::block(move || state.payments.handle_callback(&params, channel));
    match tokio::time::timeout(deadline, work).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(DomainError::Internal(e.to_string())),
        Err(_) => {
            warn!("{channel} callback not decided within {deadline:?}");
            Err(DomainError::Internal("callback deadline exceeded".to_string()))
        }
    }
}

fn ack_for(result: &Result<ReconciliationOutcome, DomainError>) -> NotifyAck {
    match result {
        Ok(_) => NotifyAck::new("00", "Confirm Success"),
        Err(DomainError::UnknownTransaction(_)) => NotifyAck::new("01", "Order not found"),
        Err(DomainError::ReconciliationConflict { .. }) => NotifyAck::new("02", "Order already confirmed"),
        Err(DomainError::AmountMismatch { .. }) => NotifyAck::new("04", "Invalid amount"),
        Err(DomainError::InvalidSignature) => NotifyAck::new("97", "Invalid signature"),
        Err(_) => NotifyAck::new("99", "Unknown error"),
    }
}

/// Where the shopper lands after the gateway sends them back.
fn result_location(base: &str, result: &Result<ReconciliationOutcome, DomainError>) -> String {
    let mut query = Vec::new();
    let status = match result {
        Ok(outcome) => {
            query.push(format!("order_id={}", outcome.order_id));
            outcome.payment_status
        }
        // The first decision stands, so it is what the shopper should see.
        Err(DomainError::ReconciliationConflict { recorded, .. }) => *recorded,
        Err(DomainError::AmountMismatch { recorded, .. }) => *recorded,
        Err(_) => PaymentStatus::Pending,
    };
    query.push(format!("payment_status={status}"));
    if let Err(e) = result {
        query.push(format!("reason={}", urlencoding::encode(reason_code(e))));
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{}", query.join("&"))
}

/// GET /payments/return
///
/// The gateway redirects the shopper here with the signed result in the query
/// string.
#[utoipa::path(
    get,
    path = "/payments/return",
    responses(
        (status = 302, description = "Redirect to the storefront result page"),
    ),
    tag = "payments"
)]
pub async fn payment_return(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let location = {
        let base = state.checkout_result_url.clone();
        let result = reconcile(state, req.query_string(), CallbackChannel::SyncReturn).await;
        result_location(&base, &result)
    };
    HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .finish()
}

/// GET /payments/notify
///
/// Server-to-server notification. Always answers `200`; the outcome is in
/// `RspCode`, and `99` asks the gateway to retry.
#[utoipa::path(
    get,
    path = "/payments/notify",
    responses(
        (status = 200, description = "Acknowledgement", body = NotifyAck),
    ),
    tag = "payments"
)]
pub async fn notify_get(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let result = reconcile(state, req.query_string(), CallbackChannel::AsyncNotify).await;
    HttpResponse::Ok().json(ack_for(&result))
}

/// POST /payments/notify
///
/// Same as the GET form, with the parameters form-encoded in the body. The
/// body is decoded whatever its content type, so the gateway always gets an
/// acknowledgement back.
#[utoipa::path(
    post,
    path = "/payments/notify",
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Acknowledgement", body = NotifyAck),
    ),
    tag = "payments"
)]
pub async fn notify_post(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let raw = String::from_utf8_lossy(&body);
    let result = reconcile(state, &raw, CallbackChannel::AsyncNotify).await;
    HttpResponse::Ok().json(ack_for(&result))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn ack_codes_follow_gateway_contract() {
        let ok = Ok(ReconciliationOutcome {
            order_id: Uuid::new_v4(),
            payment_status: PaymentStatus::Completed,
            replayed: true,
        });
        assert_eq!(ack_for(&ok).rsp_code, "00");
        assert_eq!(ack_for(&Err(DomainError::UnknownTransaction("x".into()))).rsp_code, "01");
        assert_eq!(
            ack_for(&Err(DomainError::ReconciliationConflict {
                recorded: PaymentStatus::Completed,
                claimed: PaymentStatus::Failed
            }))
            .rsp_code,
            "02"
        );
        assert_eq!(
            ack_for(&Err(DomainError::AmountMismatch {
                expected: 450_000,
                actual: 1,
                recorded: PaymentStatus::Failed
            }))
            .rsp_code,
            "04"
        );
        assert_eq!(ack_for(&Err(DomainError::InvalidSignature)).rsp_code, "97");
        assert_eq!(ack_for(&Err(DomainError::Internal("db".into()))).rsp_code, "99");
    }

    #[test]
    fn ack_serializes_with_gateway_field_names() {
        let json = serde_json::to_value(NotifyAck::new("00", "Confirm Success")).unwrap();
        assert_eq!(json, serde_json::json!({"RspCode": "00", "Message": "Confirm Success"}));
    }

    #[test]
    fn result_location_carries_outcome() {
        let id = Uuid::new_v4();
        let ok = Ok(ReconciliationOutcome {
            order_id: id,
            payment_status: PaymentStatus::Completed,
            replayed: false,
        });
        assert_eq!(
            result_location("https://shop.test/checkout/result", &ok),
            format!("https://shop.test/checkout/result?order_id={id}&payment_status=Completed")
        );
    }

    #[test]
    fn amount_mismatch_shows_the_stored_status() {
        let mismatch = |recorded| {
            Err(DomainError::AmountMismatch {
                expected: 450_000,
                actual: 1_000,
                recorded,
            })
        };
        assert_eq!(
            result_location("/result", &mismatch(PaymentStatus::Completed)),
            "/result?payment_status=Completed&reason=amount_mismatch"
        );
        assert_eq!(
            result_location("/result", &mismatch(PaymentStatus::Failed)),
            "/result?payment_status=Failed&reason=amount_mismatch"
        );
    }

    #[test]
    fn callback_params_decode_urlencoded_pairs() {
        let params = callback_params("txn_ref=abc-1&bank_code=N%20CB", CallbackChannel::AsyncNotify).unwrap();
        assert_eq!(params["txn_ref"], "abc-1");
        assert_eq!(params["bank_code"], "N CB");
    }

    #[test]
    fn undecided_callback_shows_pending() {
        let location = result_location("/result?lang=vi", &Err(DomainError::InvalidSignature));
        assert_eq!(
            location,
            "/result?lang=vi&payment_status=Pending&reason=invalid_signature"
        );
    }
}
