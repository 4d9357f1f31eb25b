use chrono::{DateTime, Utc};
use log::info;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::order::{
    line_price, ListResult, NewOrder, Order, OrderDetail, OrderDraft, OrderStatus, OrderTotals,
    OrderView,
};
use crate::domain::ports::{OrderRepository, VoucherRepository};

use super::voucher_ledger::VoucherLedger;

pub struct OrderService<O, V> {
    repo: O,
    vouchers: VoucherLedger<V>,
}

impl<O: Clone, V: Clone> Clone for OrderService<O, V> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            vouchers: self.vouchers.clone(),
        }
    }
}

impl<O: OrderRepository, V: VoucherRepository> OrderService<O, V> {
    pub fn new(repo: O, vouchers: VoucherLedger<V>) -> Self {
        Self { repo, vouchers }
    }

    /// Prices the draft, reserves the voucher if one is named, then persists
    /// the order. A reservation is handed back when the insert fails.
    pub fn create_order(&self, draft: OrderDraft, now: DateTime<Utc>) -> Result<OrderView, DomainError> {
        draft.validate()?;
        let total_amount = draft.total_amount()?;

        let voucher = match &draft.voucher {
            Some(reference) => Some(self.vouchers.validate_reference(reference, total_amount, now)?),
            None => None,
        };
        let discount = match &voucher {
            Some(v) => self.vouchers.redeem(v.id, now)?,
            None => 0,
        };

        let order_id = Uuid::new_v4();
        let result = build_order(order_id, &draft, total_amount, discount, voucher.as_ref().map(|v| v.id))
            .and_then(|new_order| {
                let details = new_order.details.clone();
                self.repo
                    .create(new_order)
                    .map(|order| OrderView { order, details })
            });

        match result {
            Ok(view) => {
                info!(
                    "order {} created for user {}: total {} discount {} payable {}",
                    view.order.id,
                    view.order.user_id,
                    view.order.total_amount,
                    view.order.discount_amount,
                    view.order.final_total
                );
                Ok(view)
            }
            Err(e) => {
                if let Some(v) = voucher {
                    self.vouchers.release_or_log(v.id, order_id);
                }
                Err(e)
            }
        }
    }

    pub fn get_order(&self, id: Uuid) -> Result<OrderView, DomainError> {
        self.repo.find_by_id(id)?.ok_or(DomainError::NotFound)
    }

    pub fn list_orders(&self, page: i64, limit: i64) -> Result<ListResult, DomainError> {
        self.repo.list(page.max(1), limit.clamp(1, 100))
    }

    pub fn advance_fulfillment(&self, id: Uuid, to: OrderStatus) -> Result<Order, DomainError> {
        let change = self.repo.advance_fulfillment(id, to)?;
        info!(
            "order {id} moved to {} (payment {})",
            change.order.order_status, change.order.payment_status
        );
        if let Some(voucher_id) = change.release_voucher {
            self.vouchers.release_or_log(voucher_id, id);
        }
        Ok(change.order)
    }
}

fn build_order(
    id: Uuid,
    draft: &OrderDraft,
    total_amount: i64,
    discount: i64,
    voucher_id: Option<Uuid>,
) -> Result<NewOrder, DomainError> {
    let details = draft
        .lines
        .iter()
        .map(|line| {
            Ok(OrderDetail {
                id: Uuid::new_v4(),
                order_id: id,
                product_id: line.product_id,
                variant_id: line.variant_id.clone(),
                name: line.name.clone(),
                size: line.size.clone(),
                color: line.color.clone(),
                unit_price: line.unit_price,
                quantity: line.quantity,
                line_price: line_price(line.unit_price, line.quantity)
                    .ok_or_else(|| DomainError::Validation("line price overflows".to_string()))?,
            })
        })
        .collect::<Result<Vec<_>, DomainError>>()?;

    Ok(NewOrder {
        id,
        user_id: draft.user_id,
        voucher_id,
        totals: OrderTotals::new(total_amount, discount)?,
        shipping: draft.shipping.clone(),
        payment_method: draft.payment_method,
        details,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::domain::order::fixtures::{line, shipping};
    use crate::domain::order::PaymentMethod;
    use crate::domain::voucher::VoucherRef;

    /// A 500 000 draft: two lines of 250 000 x 1.
    pub fn draft(method: PaymentMethod, voucher: Option<&str>) -> OrderDraft {
        OrderDraft {
            user_id: Uuid::new_v4(),
            voucher: voucher.map(|code| VoucherRef::Code(code.to_string())),
            lines: vec![line(250_000, 1), line(125_000, 2)],
            shipping: shipping(),
            payment_method: method,
        }
    }
}
