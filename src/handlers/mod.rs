pub mod orders;
pub mod payments;
pub mod vouchers;

use actix_web::web;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::domain::errors::DomainError;
use crate::errors::AppError;

/// Runs a service call on the blocking pool.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, DomainError> + Send + 'static,
    T: Send + 'static,
{
    web::block(f)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(AppError::from)
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// Page number (1-based). Defaults to 1.
    #[serde(default = "default_page")]
    pub page: i64,
    /// Number of items per page. Defaults to 20, maximum 100.
    #[serde(default = "default_limit")]
    pub limit: i64,
}

impl PageParams {
    pub fn clamped(&self) -> (i64, i64) {
        (self.page.max(1), self.limit.clamp(1, 100))
    }
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/orders")
            .route("", web::post().to(orders::create_order))
            .route("", web::get().to(orders::list_orders))
            .route("/{id}", web::get().to(orders::get_order))
            .route("/{id}/payment", web::post().to(orders::create_payment))
            .route("/{id}/fulfillment", web::patch().to(orders::advance_fulfillment)),
    )
    .service(
        web::scope("/vouchers")
            .route("", web::post().to(vouchers::create_voucher))
            .route("", web::get().to(vouchers::list_vouchers))
            .route("/validate", web::post().to(vouchers::validate_voucher))
            .route("/refresh", web::post().to(vouchers::refresh_vouchers))
            .route("/{id}", web::get().to(vouchers::get_voucher))
            .route("/{id}", web::patch().to(vouchers::update_voucher)),
    )
    .service(
        web::scope("/payments")
            .route("/return", web::get().to(payments::payment_return))
            .route("/notify", web::get().to(payments::notify_get))
            .route("/notify", web::post().to(payments::notify_post)),
    );
}
