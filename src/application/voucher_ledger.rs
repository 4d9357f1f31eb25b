use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::ports::VoucherRepository;
use crate::domain::voucher::{normalize_code, NewVoucher, Voucher, VoucherChanges, VoucherRef};

/// Answer for the checkout voucher check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct VoucherCheck {
    pub valid: bool,
    pub discount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

pub struct VoucherLedger<V> {
    repo: V,
}

impl<V: Clone> Clone for VoucherLedger<V> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
        }
    }
}

impl<V: VoucherRepository> VoucherLedger<V> {
    pub fn new(repo: V) -> Self {
        Self { repo }
    }

    pub fn create_voucher(&self, input: NewVoucher, now: DateTime<Utc>) -> Result<Voucher, DomainError> {
        let voucher = self.repo.insert(input.into_voucher(now)?)?;
        info!("voucher {} created with {} units", voucher.code, voucher.quantity);
        Ok(voucher)
    }

    pub fn update_voucher(
        &self,
        id: Uuid,
        changes: &VoucherChanges,
        now: DateTime<Utc>,
    ) -> Result<Voucher, DomainError> {
        self.repo.update(id, changes, now)
    }

    pub fn get_voucher(&self, id: Uuid) -> Result<Voucher, DomainError> {
        self.repo.find_by_id(id)?.ok_or(DomainError::VoucherNotFound)
    }

    pub fn list_vouchers(&self, page: i64, limit: i64) -> Result<(Vec<Voucher>, i64), DomainError> {
        self.repo.list(page.max(1), limit.clamp(1, 100))
    }

    /// Looks the voucher up and checks it against the raw fields at `now`;
    /// the cached status is never trusted here.
    pub fn validate_for_redemption(
        &self,
        code: &str,
        order_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Voucher, DomainError> {
        let voucher = self
            .repo
            .find_by_code(&normalize_code(code))?
            .ok_or(DomainError::VoucherNotFound)?;
        voucher.check_redeemable(order_amount, now)?;
        Ok(voucher)
    }

    pub fn validate_reference(
        &self,
        reference: &VoucherRef,
        order_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Voucher, DomainError> {
        match reference {
            VoucherRef::Code(code) => self.validate_for_redemption(code, order_amount, now),
            VoucherRef::Id(id) => {
                let voucher = self.get_voucher(*id)?;
                voucher.check_redeemable(order_amount, now)?;
                Ok(voucher)
            }
        }
    }

    /// Business rejections become a reason code; storage failures propagate.
    pub fn check_voucher(
        &self,
        code: &str,
        order_amount: i64,
        now: DateTime<Utc>,
    ) -> Result<VoucherCheck, DomainError> {
        let rejected = |reason| {
            Ok(VoucherCheck {
                valid: false,
                discount: 0,
                reason: Some(reason),
            })
        };
        match self.validate_for_redemption(code, order_amount, now) {
            Ok(voucher) => Ok(VoucherCheck {
                valid: true,
                discount: voucher.discount.min(order_amount.max(0)),
                reason: None,
            }),
            Err(DomainError::VoucherNotFound) => rejected("not_found"),
            Err(DomainError::VoucherNotActive(status)) => rejected(status.as_str()),
            Err(DomainError::BelowMinimum { .. }) => rejected("below_minimum"),
            Err(e) => Err(e),
        }
    }

    /// Takes one unit and returns the discount it is worth.
    pub fn redeem(&self, id: Uuid, now: DateTime<Utc>) -> Result<i64, DomainError> {
        let voucher = self.repo.redeem(id, now)?;
        info!("voucher {} redeemed, {} left", voucher.code, voucher.quantity);
        Ok(voucher.discount)
    }

    pub fn release(&self, id: Uuid) -> Result<(), DomainError> {
        let voucher = self.repo.release(id)?;
        info!("voucher {} released, {} left", voucher.code, voucher.quantity);
        Ok(())
    }

    /// Release that only logs on failure, for paths where the caller's own
    /// decision has already been committed.
    pub(crate) fn release_or_log(&self, id: Uuid, order_id: Uuid) {
        if let Err(e) = self.release(id) {
            error!("failed to release voucher {id} held by order {order_id}: {e}");
        }
    }

    pub fn refresh_statuses(&self, now: DateTime<Utc>) -> Result<usize, DomainError> {
        self.repo.refresh_statuses(now)
    }
}
