use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::application::voucher_ledger::VoucherCheck;
use crate::domain::voucher::{EffectiveStatus, NewVoucher, Voucher, VoucherChanges};
use crate::errors::AppError;
use crate::state::AppState;

use super::{blocking, PageParams};

/// A voucher with its validity computed at read time.
#[derive(Debug, Serialize, ToSchema)]
pub struct VoucherResponse {
    #[serde(flatten)]
    pub voucher: Voucher,
    pub effective_status: EffectiveStatus,
}

impl VoucherResponse {
    fn at(voucher: Voucher, now: DateTime<Utc>) -> Self {
        Self {
            effective_status: voucher.effective_status(now),
            voucher,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListVouchersResponse {
    pub items: Vec<VoucherResponse>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateVoucherRequest {
    pub code: String,
    pub order_amount: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub updated: usize,
}

/// POST /vouchers
#[utoipa::path(
    post,
    path = "/vouchers",
    request_body = NewVoucher,
    responses(
        (status = 201, description = "Voucher created", body = VoucherResponse),
        (status = 400, description = "Invalid voucher"),
        (status = 409, description = "Code already in use"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "vouchers"
)]
pub async fn create_voucher(
    state: web::Data<AppState>,
    body: web::Json<NewVoucher>,
) -> Result<HttpResponse, AppError> {
    let input = body.into_inner();
    let now = Utc::now();
    let voucher = blocking(move || state.vouchers.create_voucher(input, now)).await?;
    Ok(HttpResponse::Created().json(VoucherResponse::at(voucher, now)))
}

/// GET /vouchers
#[utoipa::path(
    get,
    path = "/vouchers",
    params(PageParams),
    responses(
        (status = 200, description = "Paginated list of vouchers", body = ListVouchersResponse),
        (status = 500, description = "Internal server error"),
    ),
    tag = "vouchers"
)]
pub async fn list_vouchers(
    state: web::Data<AppState>,
    query: web::Query<PageParams>,
) -> Result<HttpResponse, AppError> {
    let (page, limit) = query.clamped();
    let (items, total) = blocking(move || state.vouchers.list_vouchers(page, limit)).await?;
    let now = Utc::now();
    Ok(HttpResponse::Ok().json(ListVouchersResponse {
        items: items.into_iter().map(|v| VoucherResponse::at(v, now)).collect(),
        total,
        page,
        limit,
    }))
}

/// GET /vouchers/{id}
#[utoipa::path(
    get,
    path = "/vouchers/{id}",
    params(
        ("id" = Uuid, Path, description = "Voucher UUID"),
    ),
    responses(
        (status = 200, description = "Voucher found", body = VoucherResponse),
        (status = 404, description = "Voucher not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "vouchers"
)]
pub async fn get_voucher(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let voucher = blocking(move || state.vouchers.get_voucher(id)).await?;
    Ok(HttpResponse::Ok().json(VoucherResponse::at(voucher, Utc::now())))
}

/// PATCH /vouchers/{id}
///
/// Partial edit. `inactive: true` is how a voucher is withdrawn; there is no
/// delete.
#[utoipa::path(
    patch,
    path = "/vouchers/{id}",
    params(
        ("id" = Uuid, Path, description = "Voucher UUID"),
    ),
    request_body = VoucherChanges,
    responses(
        (status = 200, description = "Voucher updated", body = VoucherResponse),
        (status = 400, description = "Invalid change"),
        (status = 404, description = "Voucher not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "vouchers"
)]
pub async fn update_voucher(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<VoucherChanges>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let changes = body.into_inner();
    let now = Utc::now();
    let voucher = blocking(move || state.vouchers.update_voucher(id, &changes, now)).await?;
    Ok(HttpResponse::Ok().json(VoucherResponse::at(voucher, now)))
}

/// POST /vouchers/validate
///
/// Checkout preview. Business rejections come back as `200` with
/// `valid: false` and a reason code.
#[utoipa::path(
    post,
    path = "/vouchers/validate",
    request_body = ValidateVoucherRequest,
    responses(
        (status = 200, description = "Validation result", body = VoucherCheck),
        (status = 500, description = "Internal server error"),
    ),
    tag = "vouchers"
)]
pub async fn validate_voucher(
    state: web::Data<AppState>,
    body: web::Json<ValidateVoucherRequest>,
) -> Result<HttpResponse, AppError> {
    let ValidateVoucherRequest { code, order_amount } = body.into_inner();
    let check = blocking(move || state.vouchers.check_voucher(&code, order_amount, Utc::now())).await?;
    Ok(HttpResponse::Ok().json(check))
}

/// POST /vouchers/refresh
#[utoipa::path(
    post,
    path = "/vouchers/refresh",
    responses(
        (status = 200, description = "Cached statuses refreshed", body = RefreshResponse),
        (status = 500, description = "Internal server error"),
    ),
    tag = "vouchers"
)]
pub async fn refresh_vouchers(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let updated = blocking(move || state.vouchers.refresh_statuses(Utc::now())).await?;
    Ok(HttpResponse::Ok().json(RefreshResponse { updated }))
}
