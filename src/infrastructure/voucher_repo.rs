use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::ports::VoucherRepository;
use crate::domain::voucher::{Voucher, VoucherChanges, VoucherStatus};
use crate::schema::vouchers;

use super::models::{VoucherChangeset, VoucherRow};

fn load(conn: &mut PgConnection, id: Uuid) -> Result<Option<Voucher>, DomainError> {
    vouchers::table
        .find(id)
        .select(VoucherRow::as_select())
        .first(conn)
        .optional()?
        .map(Voucher::try_from)
        .transpose()
}

/// Zero rows from a conditional update: missing row or failed precondition.
fn exists(conn: &mut PgConnection, id: Uuid) -> Result<bool, DomainError> {
    let count: i64 = vouchers::table
        .filter(vouchers::id.eq(id))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

#[derive(Clone)]
pub struct DieselVoucherRepository {
    pool: DbPool,
}

impl DieselVoucherRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl VoucherRepository for DieselVoucherRepository {
    fn insert(&self, voucher: Voucher) -> Result<Voucher, DomainError> {
        let mut conn = self.pool.get()?;
        let code = voucher.code.clone();

        let inserted = diesel::insert_into(vouchers::table)
            .values(&VoucherRow::from(voucher))
            .returning(VoucherRow::as_returning())
            .get_result(&mut conn);
        match inserted {
            Ok(row) => Voucher::try_from(row),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(DomainError::DuplicateVoucherCode(code))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update(&self, id: Uuid, changes: &VoucherChanges, now: DateTime<Utc>) -> Result<Voucher, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let row = vouchers::table
                .find(id)
                .select(VoucherRow::as_select())
                .for_update()
                .first(conn)
                .optional()?
                .ok_or(DomainError::VoucherNotFound)?;
            let next = changes.apply(&Voucher::try_from(row)?, now)?;

            let row = diesel::update(vouchers::table.find(id))
                .set(&VoucherChangeset::from(&next))
                .returning(VoucherRow::as_returning())
                .get_result(conn)?;
            Voucher::try_from(row)
        })
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>, DomainError> {
        let mut conn = self.pool.get()?;
        load(&mut conn, id)
    }

    fn find_by_code(&self, code: &str) -> Result<Option<Voucher>, DomainError> {
        let mut conn = self.pool.get()?;

        vouchers::table
            .filter(vouchers::code.eq(code))
            .select(VoucherRow::as_select())
            .first(&mut conn)
            .optional()?
            .map(Voucher::try_from)
            .transpose()
    }

    fn list(&self, page: i64, limit: i64) -> Result<(Vec<Voucher>, i64), DomainError> {
        let mut conn = self.pool.get()?;

        let offset = (page - 1) * limit;
        conn.transaction::<_, DomainError, _>(|conn| {
            let total: i64 = vouchers::table.count().get_result(conn)?;
            let items = vouchers::table
                .select(VoucherRow::as_select())
                .order(vouchers::created_at.desc())
                .limit(limit)
                .offset(offset)
                .load(conn)?
                .into_iter()
                .map(Voucher::try_from)
                .collect::<Result<_, _>>()?;
            Ok((items, total))
        })
    }

    fn redeem(&self, id: Uuid, now: DateTime<Utc>) -> Result<Voucher, DomainError> {
        let mut conn = self.pool.get()?;

        // Single conditional decrement: the WHERE clause is the effective
        // status check, evaluated by Postgres under the row lock.
        let updated = diesel::update(
            vouchers::table
                .filter(vouchers::id.eq(id))
                .filter(vouchers::quantity.gt(0))
                .filter(vouchers::status.ne(VoucherStatus::InActive.as_str()))
                .filter(vouchers::start_date.le(now))
                .filter(vouchers::end_date.ge(now)),
        )
        .set((
            vouchers::quantity.eq(vouchers::quantity - 1),
            vouchers::updated_at.eq(now),
        ))
        .returning(VoucherRow::as_returning())
        .get_result(&mut conn)
        .optional()?;

        match updated {
            Some(row) => Voucher::try_from(row),
            None if exists(&mut conn, id)? => Err(DomainError::OutOfStock),
            None => Err(DomainError::VoucherNotFound),
        }
    }

    fn release(&self, id: Uuid) -> Result<Voucher, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let affected = diesel::update(vouchers::table.find(id))
                .set((
                    vouchers::quantity.eq(vouchers::quantity + 1),
                    vouchers::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            if affected == 0 {
                return Err(DomainError::VoucherNotFound);
            }

            // Stock is back; drop a stale out_of_stock cache right away.
            diesel::update(
                vouchers::table
                    .filter(vouchers::id.eq(id))
                    .filter(vouchers::status.eq(VoucherStatus::OutOfStock.as_str()))
                    .filter(vouchers::quantity.gt(0)),
            )
            .set(vouchers::status.eq(VoucherStatus::Active.as_str()))
            .execute(conn)?;

            load(conn, id)?.ok_or(DomainError::VoucherNotFound)
        })
    }

    fn refresh_statuses(&self, now: DateTime<Utc>) -> Result<usize, DomainError> {
        let mut conn = self.pool.get()?;
        let inactive = VoucherStatus::InActive.as_str();
        let active = VoucherStatus::Active.as_str();
        let expired = VoucherStatus::Expired.as_str();
        let out_of_stock = VoucherStatus::OutOfStock.as_str();

        conn.transaction::<_, DomainError, _>(|conn| {
            let to_expired = diesel::update(
                vouchers::table
                    .filter(vouchers::status.ne_all(vec![inactive, expired]))
                    .filter(vouchers::end_date.lt(now)),
            )
            .set((vouchers::status.eq(expired), vouchers::updated_at.eq(now)))
            .execute(conn)?;

            let to_out_of_stock = diesel::update(
                vouchers::table
                    .filter(vouchers::status.ne_all(vec![inactive, out_of_stock]))
                    .filter(vouchers::start_date.le(now))
                    .filter(vouchers::end_date.ge(now))
                    .filter(vouchers::quantity.le(0)),
            )
            .set((vouchers::status.eq(out_of_stock), vouchers::updated_at.eq(now)))
            .execute(conn)?;

            // Rows an administrator extended or restocked since the last pass.
            let to_active = diesel::update(
                vouchers::table
                    .filter(vouchers::status.eq_any(vec![expired, out_of_stock]))
                    .filter(vouchers::end_date.ge(now))
                    .filter(vouchers::start_date.gt(now).or(vouchers::quantity.gt(0))),
            )
            .set((vouchers::status.eq(active), vouchers::updated_at.eq(now)))
            .execute(conn)?;

            Ok(to_expired + to_out_of_stock + to_active)
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::DieselVoucherRepository;
    use crate::domain::errors::DomainError;
    use crate::domain::ports::VoucherRepository;
    use crate::domain::voucher::fixtures::voucher;
    use crate::domain::voucher::{VoucherChanges, VoucherStatus};
    use crate::infrastructure::test_db::setup_db;

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn duplicate_code_is_rejected() {
        let (_container, pool) = setup_db().await;
        let repo = DieselVoucherRepository::new(pool);
        let now = Utc::now();

        repo.insert(voucher(3, now)).expect("first insert");
        assert!(matches!(
            repo.insert(voucher(3, now)),
            Err(DomainError::DuplicateVoucherCode(code)) if code == "SALE50K"
        ));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn concurrent_redeem_of_last_unit_succeeds_once() {
        let (_container, pool) = setup_db().await;
        let repo = DieselVoucherRepository::new(pool);
        let now = Utc::now();
        let v = repo.insert(voucher(1, now)).expect("insert");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                std::thread::spawn(move || repo.redeem(v.id, Utc::now()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().expect("thread")).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(DomainError::OutOfStock)))
                .count(),
            7
        );
        let stored = repo.find_by_id(v.id).expect("find").expect("exists");
        assert_eq!(stored.quantity, 0);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn redeem_rechecks_window_even_when_cache_says_active() {
        let (_container, pool) = setup_db().await;
        let repo = DieselVoucherRepository::new(pool);
        let now = Utc::now();
        let mut v = voucher(5, now);
        v.start_date = now - Duration::days(10);
        v.end_date = now - Duration::days(1);
        let v = repo.insert(v).expect("insert");
        assert_eq!(v.status, VoucherStatus::Active);

        assert!(matches!(repo.redeem(v.id, now), Err(DomainError::OutOfStock)));
        assert_eq!(repo.find_by_id(v.id).unwrap().unwrap().quantity, 5);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn release_restores_quantity_and_clears_out_of_stock_cache() {
        let (_container, pool) = setup_db().await;
        let repo = DieselVoucherRepository::new(pool);
        let now = Utc::now();
        let v = repo.insert(voucher(1, now)).expect("insert");

        repo.redeem(v.id, now).expect("redeem");
        assert_eq!(repo.refresh_statuses(now).expect("refresh"), 1);
        assert_eq!(
            repo.find_by_id(v.id).unwrap().unwrap().status,
            VoucherStatus::OutOfStock
        );

        let released = repo.release(v.id).expect("release");
        assert_eq!(released.quantity, 1);
        assert_eq!(released.status, VoucherStatus::Active);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for the Postgres testcontainer"]
    async fn refresh_flips_expired_and_restores_extended_rows() {
        let (_container, pool) = setup_db().await;
        let repo = DieselVoucherRepository::new(pool);
        let now = Utc::now();
        let mut v = voucher(5, now);
        v.end_date = now + Duration::hours(1);
        let v = repo.insert(v).expect("insert");

        let later = now + Duration::hours(2);
        assert_eq!(repo.refresh_statuses(later).expect("refresh"), 1);
        assert_eq!(repo.find_by_id(v.id).unwrap().unwrap().status, VoucherStatus::Expired);
        assert_eq!(repo.refresh_statuses(later).expect("refresh"), 0);

        let extended = repo
            .update(
                v.id,
                &VoucherChanges {
                    end_date: Some(now + Duration::days(3)),
                    ..Default::default()
                },
                later,
            )
            .expect("update");
        assert_eq!(extended.status, VoucherStatus::Active);
    }
}
