//! Periodic maintenance: refreshes cached voucher statuses and fails gateway
//! payments nobody called back about.

use std::time::Duration;

use actix_web::web;
use chrono::Utc;
use log::{error, info};

use crate::state::AppState;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub vouchers_refreshed: usize,
    pub payments_expired: usize,
}

/// One pass of both sweeps. A failure in one does not skip the other.
pub fn run_once(state: &AppState, pending_timeout: chrono::Duration) -> SweepReport {
    let now = Utc::now();
    let mut report = SweepReport::default();

    match state.vouchers.refresh_statuses(now) {
        Ok(n) => report.vouchers_refreshed = n,
        Err(e) => error!("voucher status refresh failed: {e}"),
    }
    match state.payments.expire_stale_payments(now, pending_timeout) {
        Ok(n) => report.payments_expired = n,
        Err(e) => error!("stale payment sweep failed: {e}"),
    }
    report
}

pub fn spawn(
    state: web::Data<AppState>,
    every: Duration,
    pending_timeout: chrono::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let state = state.clone();
            match web::block(move || run_once(&state, pending_timeout)).await {
                Ok(report) if report != SweepReport::default() => info!(
                    "sweep refreshed {} vouchers and expired {} payments",
                    report.vouchers_refreshed, report.payments_expired
                ),
                Ok(_) => {}
                Err(e) => error!("sweep task failed: {e}"),
            }
        }
    })
}
