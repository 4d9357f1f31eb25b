use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::order::{
    Order, OrderDetail, OrderDraft, OrderLineInput, OrderStatus, OrderView, PaymentMethod,
    ShippingInfo,
};
use crate::domain::payment::PaymentRequest;
use crate::domain::voucher::VoucherRef;
use crate::errors::AppError;
use crate::state::AppState;

use super::{blocking, PageParams};

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderLineRequest {
    pub product_id: Uuid,
    pub variant_id: String,
    pub name: String,
    pub size: Option<String>,
    pub color: Option<String>,
    /// Whole VND.
    pub unit_price: i64,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    /// Takes precedence over `voucher_code` when both are sent.
    pub voucher_id: Option<Uuid>,
    pub voucher_code: Option<String>,
    pub lines: Vec<CreateOrderLineRequest>,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
}

impl From<CreateOrderRequest> for OrderDraft {
    fn from(req: CreateOrderRequest) -> Self {
        let voucher = match (req.voucher_id, req.voucher_code) {
            (Some(id), _) => Some(VoucherRef::Id(id)),
            (None, Some(code)) if !code.trim().is_empty() => Some(VoucherRef::Code(code)),
            _ => None,
        };
        OrderDraft {
            user_id: req.user_id,
            voucher,
            lines: req
                .lines
                .into_iter()
                .map(|l| OrderLineInput {
                    product_id: l.product_id,
                    variant_id: l.variant_id,
                    name: l.name,
                    size: l.size,
                    color: l.color,
                    unit_price: l.unit_price,
                    quantity: l.quantity,
                })
                .collect(),
            shipping: req.shipping,
            payment_method: req.payment_method,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub details: Vec<OrderDetail>,
}

impl From<OrderView> for OrderResponse {
    fn from(view: OrderView) -> Self {
        Self {
            order: view.order,
            details: view.details,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListOrdersResponse {
    pub items: Vec<Order>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FulfillmentRequest {
    pub order_status: OrderStatus,
}

fn client_ip(req: &HttpRequest) -> String {
    let info = req.connection_info();
    let raw = info.realip_remote_addr().unwrap_or("127.0.0.1");
    raw.parse::<std::net::SocketAddr>()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /orders
///
/// Prices the cart, reserves the voucher if one is given and stores the order
/// with payment `Pending` and fulfillment `Processing`. The order, its lines
/// and the `OrderCreated` outbox event are written in one transaction.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 400, description = "Invalid order"),
        (status = 404, description = "Voucher not found"),
        (status = 422, description = "Voucher rejected"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn create_order(
    state: web::Data<AppState>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let draft = OrderDraft::from(body.into_inner());
    let view = blocking(move || state.orders.create_order(draft, Utc::now())).await?;
    Ok(HttpResponse::Created().json(OrderResponse::from(view)))
}

/// GET /orders/{id}
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "Order not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn get_order(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let view = blocking(move || state.orders.get_order(id)).await?;
    Ok(HttpResponse::Ok().json(OrderResponse::from(view)))
}

/// GET /orders
///
/// Newest first, without lines.
#[utoipa::path(
    get,
    path = "/orders",
    params(PageParams),
    responses(
        (status = 200, description = "Paginated list of orders", body = ListOrdersResponse),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn list_orders(
    state: web::Data<AppState>,
    query: web::Query<PageParams>,
) -> Result<HttpResponse, AppError> {
    let (page, limit) = query.clamped();
    let result = blocking(move || state.orders.list_orders(page, limit)).await?;
    Ok(HttpResponse::Ok().json(ListOrdersResponse {
        items: result.items,
        total: result.total,
        page,
        limit,
    }))
}

/// POST /orders/{id}/payment
///
/// Issues a fresh signed gateway redirect. Any earlier redirect for the same
/// order stops being accepted.
#[utoipa::path(
    post,
    path = "/orders/{id}/payment",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Payment request issued", body = PaymentRequest),
        (status = 400, description = "Order is not a gateway order"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Payment already finalized"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn create_payment(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let ip = client_ip(&req);
    let request = blocking(move || state.payments.create_payment_request(id, &ip, Utc::now())).await?;
    Ok(HttpResponse::Ok().json(request))
}

/// PATCH /orders/{id}/fulfillment
///
/// Moves the order one step along its fulfillment track, or cancels it.
#[utoipa::path(
    patch,
    path = "/orders/{id}/fulfillment",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
    ),
    request_body = FulfillmentRequest,
    responses(
        (status = 200, description = "Order updated", body = Order),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Transition not allowed"),
        (status = 422, description = "Order must be paid first"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn advance_fulfillment(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<FulfillmentRequest>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let to = body.into_inner().order_status;
    let order = blocking(move || state.orders.advance_fulfillment(id, to)).await?;
    Ok(HttpResponse::Ok().json(order))
}
