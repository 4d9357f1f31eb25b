use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::order::{
    FulfillmentChange, ListResult, NewOrder, Order, OrderDetail, OrderStatus, OrderView,
    PaymentAttempt, PaymentMethod, PaymentStatus, PaymentTransition, PaymentTransitionCheck,
};
use crate::domain::ports::OrderRepository;
use crate::schema::{order_details, order_outbox, orders};

use super::models::{NewOrderDetailRow, NewOrderRow, NewOutboxEventRow, OrderDetailRow, OrderRow};
use super::outbox::{self, OrderEvent};

// ── Error conversions (infrastructure concern only) ──────────────────────────

impl From<diesel::result::Error> for DomainError {
    fn from(e: diesel::result::Error) -> Self {
        DomainError::Internal(e.to_string())
    }
}

impl From<r2d2::Error> for DomainError {
    fn from(e: r2d2::Error) -> Self {
        DomainError::Internal(e.to_string())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn load(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>, DomainError> {
    orders::table
        .find(id)
        .select(OrderRow::as_select())
        .first(conn)
        .optional()?
        .map(Order::try_from)
        .transpose()
}

fn publish(conn: &mut PgConnection, event: OrderEvent) -> Result<(), DomainError> {
    diesel::insert_into(order_outbox::table)
        .values(&NewOutboxEventRow::from(event))
        .execute(conn)?;
    Ok(())
}

// ── Repository ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DieselOrderRepository {
    pool: DbPool,
}

impl DieselOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl OrderRepository for DieselOrderRepository {
    fn create(&self, order: NewOrder) -> Result<Order, DomainError> {
        let mut conn = self.pool.get()?;
        let initial = order.to_order(Utc::now());

        conn.transaction::<_, DomainError, _>(|conn| {
            // 1. Insert the order
            let row = diesel::insert_into(orders::table)
                .values(&NewOrderRow::from_domain(&order, &initial))
                .returning(OrderRow::as_returning())
                .get_result(conn)?;
            let created = Order::try_from(row)?;

            // 2. Insert the line item snapshot
            let details: Vec<NewOrderDetailRow> = order
                .details
                .iter()
                .zip(1..)
                .map(|(detail, line_no)| NewOrderDetailRow::from_domain(detail, line_no))
                .collect();
            diesel::insert_into(order_details::table)
                .values(&details)
                .execute(conn)?;

            // 3. Outbox event in the same transaction
            publish(conn, outbox::order_created(&created, &order.details))?;

            Ok(created)
        })
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError> {
        let mut conn = self.pool.get()?;

        let Some(order) = load(&mut conn, id)? else {
            return Ok(None);
        };

        let details = order_details::table
            .filter(order_details::order_id.eq(order.id))
            .order(order_details::line_no.asc())
            .select(OrderDetailRow::as_select())
            .load(&mut conn)?;

        Ok(Some(OrderView {
            order,
            details: details.into_iter().map(OrderDetail::from).collect(),
        }))
    }

    fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Order>, DomainError> {
        let mut conn = self.pool.get()?;

        orders::table
            .filter(orders::transaction_id.eq(transaction_id))
            .select(OrderRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(Order::try_from)
            .transpose()
    }

    fn list(&self, page: i64, limit: i64) -> Result<ListResult, DomainError> {
        let mut conn = self.pool.get()?;

        let offset = (page - 1) * limit;
        conn.transaction::<_, DomainError, _>(|conn| {
            let total: i64 = orders::table.count().get_result(conn)?;

            let rows = orders::table
                .select(OrderRow::as_select())
                .order(orders::created_at.desc())
                .limit(limit)
                .offset(offset)
                .load(conn)?;

            Ok(ListResult {
                items: rows
                    .into_iter()
                    .map(Order::try_from)
                    .collect::<Result<_, _>>()?,
                total,
            })
        })
    }

    fn attach_payment_attempt(&self, id: Uuid, attempt: PaymentAttempt) -> Result<Order, DomainError> {
        let mut conn = self.pool.get()?;

        let updated = diesel::update(
            orders::table
                .filter(orders::id.eq(id))
                .filter(orders::payment_status.eq(PaymentStatus::Pending.as_str()))
                .filter(orders::payment_attempts.eq(attempt.attempt - 1)),
        )
        .set((
            orders::transaction_id.eq(&attempt.transaction_id),
            orders::payment_url.eq(&attempt.payment_url),
            orders::payment_attempts.eq(attempt.attempt),
            orders::updated_at.eq(Utc::now()),
        ))
        .returning(OrderRow::as_returning())
        .get_result(&mut conn)
        .optional()?;

        if let Some(row) = updated {
            return Order::try_from(row);
        }
        match load(&mut conn, id)? {
            None => Err(DomainError::NotFound),
            Some(current) if current.payment_status.is_terminal() => {
                Err(DomainError::PaymentFinalized(current.payment_status))
            }
            Some(_) => Err(DomainError::ConcurrentModification),
        }
    }

    fn transition_payment(
        &self,
        id: Uuid,
        to: PaymentStatus,
        correlation: &Value,
    ) -> Result<PaymentTransition, DomainError> {
        // Only a terminal target may win the compare-and-set below.
        PaymentStatus::Pending.check_transition(to)?;
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let updated = diesel::update(
                orders::table
                    .filter(orders::id.eq(id))
                    .filter(orders::payment_status.eq(PaymentStatus::Pending.as_str())),
            )
            .set((
                orders::payment_status.eq(to.as_str()),
                orders::payment_gateway_response.eq(correlation),
                orders::updated_at.eq(Utc::now()),
            ))
            .returning(OrderRow::as_returning())
            .get_result(conn)
            .optional()?;

            if let Some(row) = updated {
                let order = Order::try_from(row)?;
                publish(conn, outbox::payment_changed(&order))?;
                return Ok(PaymentTransition::Applied(order));
            }

            let current = load(conn, id)?.ok_or(DomainError::NotFound)?;
            match current.payment_status.check_transition(to)? {
                PaymentTransitionCheck::AlreadyFinalized => Ok(PaymentTransition::AlreadyFinalized(current)),
                // Pending never comes back, so a lost CAS that still sees
                // Pending means the row changed under us.
                PaymentTransitionCheck::Apply => Err(DomainError::ConcurrentModification),
            }
        })
    }

    fn record_gateway_response(&self, id: Uuid, payload: &Value) -> Result<(), DomainError> {
        let mut conn = self.pool.get()?;

        let affected = diesel::update(orders::table.find(id))
            .set(orders::payment_gateway_response.eq(payload))
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    fn advance_fulfillment(&self, id: Uuid, to: OrderStatus) -> Result<FulfillmentChange, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let row = orders::table
                .find(id)
                .select(OrderRow::as_select())
                .for_update()
                .first(conn)
                .optional()?
                .ok_or(DomainError::NotFound)?;
            let current = Order::try_from(row)?;
            let plan = current.plan_fulfillment(to)?;
            let payment_status = plan.payment_status.unwrap_or(current.payment_status);

            let row = diesel::update(orders::table.find(id))
                .set((
                    orders::order_status.eq(plan.order_status.as_str()),
                    orders::payment_status.eq(payment_status.as_str()),
                    orders::updated_at.eq(Utc::now()),
                ))
                .returning(OrderRow::as_returning())
                .get_result(conn)?;
            let order = Order::try_from(row)?;

            publish(conn, outbox::status_changed(&order, current.order_status))?;
            if plan.payment_status.is_some() {
                publish(conn, outbox::payment_changed(&order))?;
            }

            Ok(FulfillmentChange {
                release_voucher: if plan.release_voucher { order.voucher_id } else { None },
                order,
            })
        })
    }

    fn find_stale_pending(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Order>, DomainError> {
        let mut conn = self.pool.get()?;

        orders::table
            .filter(orders::payment_method.eq(PaymentMethod::Gateway.as_str()))
            .filter(orders::payment_status.eq(PaymentStatus::Pending.as_str()))
            .filter(orders::order_status.ne(OrderStatus::Cancelled.as_str()))
            .filter(orders::updated_at.lt(cutoff))
            .order(orders::updated_at.asc())
            .limit(limit)
            .select(OrderRow::as_select())
            .load(&mut conn)?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use diesel::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    use super::DieselOrderRepository;
    use crate::domain::errors::DomainError;
    use crate::domain::order::{
        NewOrder, OrderDetail, OrderStatus, OrderTotals, PaymentAttempt, PaymentMethod,
        PaymentStatus, PaymentTransition,
    };
    use crate::domain::order::fixtures::shipping;
    use crate::domain::ports::OrderRepository;
    use crate::infrastructure::models::OutboxEventRow;
    use crate::infrastructure::test_db::setup_db;
    use crate::schema::order_outbox;

    fn new_order(method: PaymentMethod) -> NewOrder {
        let id = Uuid::new_v4();
        NewOrder {
            id,
            user_id: Uuid::new_v4(),
            voucher_id: None,
            totals: OrderTotals::new(200_000, 0).expect("totals"),
            shipping: shipping(),
            payment_method: method,
            details: vec![OrderDetail {
                id: Uuid::new_v4(),
                order_id: id,
                product_id: Uuid::new_v4(),
                variant_id: "MUG-WHITE".to_string(),
                name: "Mug".to_string(),
                size: None,
                color: Some("white".to_string()),
                unit_price: 100_000,
                quantity: 2,
                line_price: 200_000,
            }],
        }
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn create_and_find_by_id_roundtrip() {
        let (_container, pool) = setup_db().await;
        let repo = DieselOrderRepository::new(pool);

        let created = repo.create(new_order(PaymentMethod::Gateway)).expect("create failed");
        let view = repo
            .find_by_id(created.id)
            .expect("find failed")
            .expect("order should exist");

        assert_eq!(view.order.payment_status, PaymentStatus::Pending);
        assert_eq!(view.order.order_status, OrderStatus::Processing);
        assert_eq!(view.order.final_total, 200_000);
        assert_eq!(view.details.len(), 1);
        assert_eq!(view.details[0].line_price, 200_000);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn details_come_back_in_line_order() {
        let (_container, pool) = setup_db().await;
        let repo = DieselOrderRepository::new(pool);

        let mut order = new_order(PaymentMethod::Gateway);
        let template = order.details[0].clone();
        order.details = ["CUP-A", "CUP-B", "CUP-C", "CUP-D"]
            .into_iter()
            .map(|variant| OrderDetail {
                id: Uuid::new_v4(),
                variant_id: variant.to_string(),
                quantity: 1,
                line_price: 50_000,
                unit_price: 50_000,
                ..template.clone()
            })
            .collect();
        let created = repo.create(order).expect("create failed");

        let view = repo.find_by_id(created.id).expect("find").expect("order should exist");
        let variants: Vec<&str> = view.details.iter().map(|d| d.variant_id.as_str()).collect();
        assert_eq!(variants, ["CUP-A", "CUP-B", "CUP-C", "CUP-D"]);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn create_writes_outbox_event_in_same_transaction() {
        let (_container, pool) = setup_db().await;
        let repo = DieselOrderRepository::new(pool.clone());

        let created = repo.create(new_order(PaymentMethod::Gateway)).expect("create failed");

        let mut conn = pool.get().expect("Failed to get connection");
        let events: Vec<OutboxEventRow> = order_outbox::table
            .filter(order_outbox::aggregate_id.eq(created.id.to_string()))
            .select(OutboxEventRow::as_select())
            .load(&mut conn)
            .expect("query failed");

        assert_eq!(events.len(), 1, "exactly one outbox event per order");
        assert_eq!(events[0].aggregate_type, "Order");
        assert_eq!(events[0].event_type, "OrderCreated");
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn transition_payment_first_terminal_state_wins() {
        let (_container, pool) = setup_db().await;
        let repo = DieselOrderRepository::new(pool);
        let order = repo.create(new_order(PaymentMethod::Gateway)).expect("create failed");
        let payload = json!({"response_code": "00"});

        assert!(matches!(
            repo.transition_payment(order.id, PaymentStatus::Pending, &payload),
            Err(DomainError::Validation(_))
        ));

        let first = repo
            .transition_payment(order.id, PaymentStatus::Completed, &payload)
            .expect("first transition");
        assert!(matches!(first, PaymentTransition::Applied(ref o) if o.payment_status == PaymentStatus::Completed));

        let replay = repo
            .transition_payment(order.id, PaymentStatus::Completed, &payload)
            .expect("replay");
        assert!(matches!(replay, PaymentTransition::AlreadyFinalized(_)));

        let conflict = repo.transition_payment(order.id, PaymentStatus::Failed, &payload);
        assert!(matches!(
            conflict,
            Err(DomainError::PaymentConflict {
                current: PaymentStatus::Completed,
                requested: PaymentStatus::Failed
            })
        ));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn concurrent_transitions_apply_exactly_once() {
        let (_container, pool) = setup_db().await;
        let repo = DieselOrderRepository::new(pool);
        let order = repo.create(new_order(PaymentMethod::Gateway)).expect("create failed");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repo = repo.clone();
                let to = if i % 2 == 0 { PaymentStatus::Completed } else { PaymentStatus::Failed };
                std::thread::spawn(move || repo.transition_payment(order.id, to, &json!({ "i": i })))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().expect("thread")).collect();

        let applied = results
            .iter()
            .filter(|r| matches!(r, Ok(PaymentTransition::Applied(_))))
            .count();
        assert_eq!(applied, 1);
        assert!(results.iter().all(|r| !matches!(r, Err(DomainError::Internal(_)))));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn regenerated_payment_attempt_replaces_transaction_id() {
        let (_container, pool) = setup_db().await;
        let repo = DieselOrderRepository::new(pool);
        let order = repo.create(new_order(PaymentMethod::Gateway)).expect("create failed");

        let attempt = |n: i32| PaymentAttempt {
            attempt: n,
            transaction_id: format!("{}-{}", order.id.simple(), n),
            payment_url: format!("https://pay.test/{n}"),
        };
        repo.attach_payment_attempt(order.id, attempt(1)).expect("first attempt");
        let second = repo.attach_payment_attempt(order.id, attempt(2)).expect("second attempt");
        assert_eq!(second.payment_attempts, 2);

        // A stale attempt number loses the compare-and-set.
        assert!(matches!(
            repo.attach_payment_attempt(order.id, attempt(2)),
            Err(DomainError::ConcurrentModification)
        ));
        let old = format!("{}-1", order.id.simple());
        assert!(repo.find_by_transaction_id(&old).expect("lookup").is_none());
        assert!(repo
            .find_by_transaction_id(second.transaction_id.as_deref().unwrap())
            .expect("lookup")
            .is_some());
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn cancelling_pending_order_cancels_payment() {
        let (_container, pool) = setup_db().await;
        let repo = DieselOrderRepository::new(pool);
        let order = repo.create(new_order(PaymentMethod::CashOnDelivery)).expect("create failed");

        let change = repo
            .advance_fulfillment(order.id, OrderStatus::Cancelled)
            .expect("cancel");
        assert_eq!(change.order.order_status, OrderStatus::Cancelled);
        assert_eq!(change.order.payment_status, PaymentStatus::Cancelled);

        assert!(matches!(
            repo.advance_fulfillment(order.id, OrderStatus::Packaging),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn stale_pending_only_returns_old_gateway_orders() {
        let (_container, pool) = setup_db().await;
        let repo = DieselOrderRepository::new(pool);
        let gateway = repo.create(new_order(PaymentMethod::Gateway)).expect("create");
        repo.create(new_order(PaymentMethod::CashOnDelivery)).expect("create");

        let future = chrono::Utc::now() + Duration::minutes(1);
        let stale = repo.find_stale_pending(future, 10).expect("query");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, gateway.id);

        let past = chrono::Utc::now() - Duration::minutes(30);
        assert!(repo.find_stale_pending(past, 10).expect("query").is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn list_paginates_correctly() {
        let (_container, pool) = setup_db().await;
        let repo = DieselOrderRepository::new(pool);

        for _ in 0..5 {
            repo.create(new_order(PaymentMethod::Gateway)).expect("create failed");
        }

        let page1 = repo.list(1, 3).expect("list page 1 failed");
        assert_eq!(page1.total, 5);
        assert_eq!(page1.items.len(), 3);

        let page2 = repo.list(2, 3).expect("list page 2 failed");
        assert_eq!(page2.total, 5);
        assert_eq!(page2.items.len(), 2);
    }
}
