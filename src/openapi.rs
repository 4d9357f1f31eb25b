use utoipa::OpenApi;

use crate::application::voucher_ledger::VoucherCheck;
use crate::domain::order::{Order, OrderDetail, OrderStatus, PaymentMethod, PaymentStatus, ShippingInfo};
use crate::domain::payment::PaymentRequest;
use crate::domain::voucher::{EffectiveStatus, NewVoucher, Voucher, VoucherChanges, VoucherStatus};
use crate::handlers::{orders, payments, vouchers};

#[derive(OpenApi)]
#[openapi(
    info(title = "Storefront checkout", description = "Orders, vouchers and gateway payment reconciliation"),
    paths(
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        orders::create_payment,
        orders::advance_fulfillment,
        vouchers::create_voucher,
        vouchers::list_vouchers,
        vouchers::get_voucher,
        vouchers::update_voucher,
        vouchers::validate_voucher,
        vouchers::refresh_vouchers,
        payments::payment_return,
        payments::notify_get,
        payments::notify_post,
    ),
    components(schemas(
        Order,
        OrderDetail,
        OrderStatus,
        PaymentMethod,
        PaymentStatus,
        ShippingInfo,
        PaymentRequest,
        Voucher,
        VoucherStatus,
        EffectiveStatus,
        NewVoucher,
        VoucherChanges,
        VoucherCheck,
        orders::CreateOrderRequest,
        orders::CreateOrderLineRequest,
        orders::OrderResponse,
        orders::ListOrdersResponse,
        orders::FulfillmentRequest,
        vouchers::VoucherResponse,
        vouchers::ListVouchersResponse,
        vouchers::ValidateVoucherRequest,
        vouchers::RefreshResponse,
        payments::NotifyAck,
    )),
    tags(
        (name = "orders", description = "Checkout and fulfillment"),
        (name = "vouchers", description = "Voucher administration and validation"),
        (name = "payments", description = "Gateway callbacks"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/orders",
            "/orders/{id}",
            "/orders/{id}/payment",
            "/orders/{id}/fulfillment",
            "/vouchers",
            "/vouchers/{id}",
            "/vouchers/validate",
            "/vouchers/refresh",
            "/payments/return",
            "/payments/notify",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
