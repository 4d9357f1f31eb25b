use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::errors::DomainError;

pub const MAX_CODE_LEN: usize = 50;

/// Persisted voucher status. Only `InActive` is authoritative; the other
/// values are a cache refreshed by the status sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum VoucherStatus {
    Active,
    InActive,
    Expired,
    #[serde(rename = "out_of_stock")]
    OutOfStock,
}

impl VoucherStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VoucherStatus::Active => "Active",
            VoucherStatus::InActive => "InActive",
            VoucherStatus::Expired => "Expired",
            VoucherStatus::OutOfStock => "out_of_stock",
        }
    }
}

impl FromStr for VoucherStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(VoucherStatus::Active),
            "InActive" => Ok(VoucherStatus::InActive),
            "Expired" => Ok(VoucherStatus::Expired),
            "out_of_stock" => Ok(VoucherStatus::OutOfStock),
            other => Err(DomainError::Internal(format!("unknown voucher status '{other}'"))),
        }
    }
}

/// Validity derived from raw fields at the moment of use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveStatus {
    Active,
    Inactive,
    Upcoming,
    Expired,
    OutOfStock,
}

impl EffectiveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EffectiveStatus::Active => "active",
            EffectiveStatus::Inactive => "inactive",
            EffectiveStatus::Upcoming => "upcoming",
            EffectiveStatus::Expired => "expired",
            EffectiveStatus::OutOfStock => "out_of_stock",
        }
    }
}

impl fmt::Display for EffectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precedence: administrative deactivation, then the validity window (not yet
/// started, then ended), then stock. Both window bounds are inclusive.
pub fn effective_status(
    status: VoucherStatus,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    quantity: i32,
    now: DateTime<Utc>,
) -> EffectiveStatus {
    if status == VoucherStatus::InActive {
        EffectiveStatus::Inactive
    } else if now < start_date {
        EffectiveStatus::Upcoming
    } else if now > end_date {
        EffectiveStatus::Expired
    } else if quantity <= 0 {
        EffectiveStatus::OutOfStock
    } else {
        EffectiveStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Voucher {
    pub id: Uuid,
    pub code: String,
    pub discount: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub quantity: i32,
    pub min_order_amount: i64,
    pub status: VoucherStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Voucher {
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        effective_status(
            self.status,
            self.start_date,
            self.end_date,
            self.quantity,
            now,
        )
    }

    /// Value the status sweep should persist for this row.
    pub fn refreshed_status(&self, now: DateTime<Utc>) -> VoucherStatus {
        match self.effective_status(now) {
            EffectiveStatus::Inactive => VoucherStatus::InActive,
            EffectiveStatus::Expired => VoucherStatus::Expired,
            EffectiveStatus::OutOfStock => VoucherStatus::OutOfStock,
            EffectiveStatus::Active | EffectiveStatus::Upcoming => VoucherStatus::Active,
        }
    }

    pub fn check_redeemable(&self, order_amount: i64, now: DateTime<Utc>) -> Result<(), DomainError> {
        match self.effective_status(now) {
            EffectiveStatus::Active => {}
            other => return Err(DomainError::VoucherNotActive(other)),
        }
        if order_amount < self.min_order_amount {
            return Err(DomainError::BelowMinimum {
                minimum: self.min_order_amount,
                amount: order_amount,
            });
        }
        Ok(())
    }
}

/// How a checkout names the voucher it wants applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoucherRef {
    Id(Uuid),
    Code(String),
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewVoucher {
    pub code: String,
    pub discount: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub quantity: i32,
    #[serde(default)]
    pub min_order_amount: i64,
    #[serde(default)]
    pub inactive: bool,
}

/// Partial administrative edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct VoucherChanges {
    pub discount: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub quantity: Option<i32>,
    pub min_order_amount: Option<i64>,
    /// `true` deactivates, `false` re-activates.
    pub inactive: Option<bool>,
}

fn validate_fields(
    code: &str,
    discount: i64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    quantity: i32,
    min_order_amount: i64,
) -> Result<(), DomainError> {
    if code.is_empty() || code.chars().count() > MAX_CODE_LEN {
        return Err(DomainError::Validation(format!(
            "voucher code must be 1 to {MAX_CODE_LEN} characters"
        )));
    }
    if discount <= 0 {
        return Err(DomainError::Validation("discount must be positive".to_string()));
    }
    if quantity < 0 {
        return Err(DomainError::Validation("quantity must not be negative".to_string()));
    }
    if min_order_amount < 0 {
        return Err(DomainError::Validation(
            "minimum order amount must not be negative".to_string(),
        ));
    }
    if end_date < start_date {
        return Err(DomainError::Validation(
            "end date must not precede start date".to_string(),
        ));
    }
    Ok(())
}

impl NewVoucher {
    /// Validates the input and builds the record to persist, with the cached
    /// status already derived for `now`.
    pub fn into_voucher(self, now: DateTime<Utc>) -> Result<Voucher, DomainError> {
        let code = normalize_code(&self.code);
        validate_fields(
            &code,
            self.discount,
            self.start_date,
            self.end_date,
            self.quantity,
            self.min_order_amount,
        )?;
        let mut voucher = Voucher {
            id: Uuid::new_v4(),
            code,
            discount: self.discount,
            start_date: self.start_date,
            end_date: self.end_date,
            quantity: self.quantity,
            min_order_amount: self.min_order_amount,
            status: if self.inactive {
                VoucherStatus::InActive
            } else {
                VoucherStatus::Active
            },
            created_at: now,
            updated_at: now,
        };
        voucher.status = voucher.refreshed_status(now);
        Ok(voucher)
    }
}

impl VoucherChanges {
    pub fn apply(&self, current: &Voucher, now: DateTime<Utc>) -> Result<Voucher, DomainError> {
        let mut next = current.clone();
        if let Some(discount) = self.discount {
            next.discount = discount;
        }
        if let Some(start_date) = self.start_date {
            next.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            next.end_date = end_date;
        }
        if let Some(quantity) = self.quantity {
            next.quantity = quantity;
        }
        if let Some(min_order_amount) = self.min_order_amount {
            next.min_order_amount = min_order_amount;
        }
        match self.inactive {
            Some(true) => next.status = VoucherStatus::InActive,
            Some(false) => next.status = VoucherStatus::Active,
            None => {}
        }
        validate_fields(
            &next.code,
            next.discount,
            next.start_date,
            next.end_date,
            next.quantity,
            next.min_order_amount,
        )?;
        next.status = next.refreshed_status(now);
        next.updated_at = now;
        Ok(next)
    }
}
