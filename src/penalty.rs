//! Compound-monthly penalty recalculation (spec §4.3).
//!
//! Pure math lives in [`compute_accrued_penalty`]; the refresh pass wraps it
//! with store I/O so it can be invoked from the nightly scheduler or
//! on-demand from a read endpoint. Compound monthly is the only supported
//! mode (spec §9 open question, resolved against legacy simple-interest
//! paths).

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::PenaltyConfig;
use crate::context::ServiceContext;
use crate::domain::period::{BillModule, BillPeriodDocument, BillStatus};
use crate::errors::Result;
use crate::money::Money;
use crate::store::{ListOptions, SetOptions};

/// One bill's inputs to the penalty algorithm (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub struct PenaltyInputs {
    pub current_charge: Money,
    pub base_paid: Money,
    pub stored_penalty_amount: Money,
    pub penalty_paid: Money,
    pub due_date: NaiveDate,
}

/// A "full month" is 30 days (spec §4.3 step 2) — not a calendar month.
fn months_late(due_date: NaiveDate, as_of_date: NaiveDate) -> u32 {
    if as_of_date <= due_date {
        return 0;
    }
    let days = (as_of_date - due_date).num_days();
    (days / 30) as u32
}

/// Compute the accrued penalty on a single bill as of `as_of_date`,
/// deterministically from stored base charges and dates (spec §4.3,
/// "penalty reproducibility" invariant — identical inputs always produce
/// identical output; no hidden state).
pub fn compute_accrued_penalty(inputs: &PenaltyInputs, penalty_config: &PenaltyConfig, as_of_date: NaiveDate) -> Money {
    // step 1: base fully paid stops accrual; whatever is already stored
    // remains due until penaltyPaid catches up, but never grows.
    if inputs.base_paid >= inputs.current_charge {
        return inputs.stored_penalty_amount.max(inputs.penalty_paid);
    }

    let unpaid_base = (inputs.current_charge - inputs.base_paid).non_negative();
    let months = months_late(inputs.due_date, as_of_date);
    let growth_factor = penalty_config.rate.compound_factor(months) - rust_decimal::Decimal::ONE;
    let accrued = unpaid_base.mul_decimal(growth_factor);

    // step 5: never less than what's already been paid against it.
    accrued.max(inputs.penalty_paid)
}

/// Recompute and, if changed, rewrite one bill's penalty fields atomically.
/// Returns whether the stored value changed. Idempotent at a fixed
/// `as_of_date` (spec §4.3, §8).
#[instrument(skip(ctx))]
pub async fn refresh_bill(
    ctx: &ServiceContext,
    client_id: &str,
    module: BillModule,
    period_id: &str,
    penalty_config: &PenaltyConfig,
    as_of_date: NaiveDate,
) -> Result<bool> {
    let path = BillPeriodDocument::store_path(client_id, module, period_id);
    let raw = ctx.store.get_raw(&path).await?;
    let Some(raw) = raw else {
        return Err(crate::errors::BillingError::not_found(format!("bill period {path}")));
    };
    let mut bill = BillPeriodDocument::parse(&path, raw)?;

    let mut changed = false;
    for entry in bill.units.values_mut() {
        if entry.status == BillStatus::Paid {
            continue;
        }
        let inputs = PenaltyInputs {
            current_charge: entry.current_charge,
            base_paid: entry.base_paid,
            stored_penalty_amount: entry.penalty_amount,
            penalty_paid: entry.penalty_paid,
            due_date: bill.due_date,
        };
        let recomputed = compute_accrued_penalty(&inputs, penalty_config, as_of_date);
        if recomputed != entry.penalty_amount {
            entry.penalty_amount = recomputed;
            entry.last_penalty_update = Some(ctx.now());
            entry.recompute_derived();
            changed = true;
        }
    }

    if changed {
        let doc = serde_json::to_value(&bill)
            .map_err(|e| crate::errors::BillingError::permanent(format!("encode {path}: {e}")))?;
        let mut batch = ctx.store.batch();
        batch.set(path, doc, SetOptions::default());
        batch.commit().await?;
    }

    Ok(changed)
}

/// Refresh every unpaid bill in one client's module (spec §4.7's nightly
/// invocation operates per client, across all clients). Checks
/// `cancel` between bill documents, matching the long-scan cancellation
/// contract (spec §5).
#[instrument(skip(ctx, cancel))]
pub async fn refresh_all(
    ctx: &ServiceContext,
    client_id: &str,
    module: BillModule,
    penalty_config: &PenaltyConfig,
    as_of_date: NaiveDate,
    cancel: &CancellationToken,
) -> Result<usize> {
    let prefix = match module {
        BillModule::Water => format!("/clients/{client_id}/projects/waterBills/bills/"),
        BillModule::Hoa => format!("/clients/{client_id}/projects/hoaDues/bills/"),
    };
    let docs = ctx
        .store
        .list(&prefix, ListOptions { prefix: Some(prefix.clone()), cursor: None, limit: None })
        .await?;

    let mut updated = 0;
    for (path, _) in docs {
        if cancel.is_cancelled() {
            break;
        }
        let period_id = path.rsplit('/').next().unwrap_or_default();
        if refresh_bill(ctx, client_id, module, period_id, penalty_config, as_of_date).await? {
            updated += 1;
        }
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    use crate::money::Rate;

    fn penalty_config(rate_pct: i64) -> PenaltyConfig {
        PenaltyConfig { rate: Rate::from_percentage(Decimal::from(rate_pct)), grace_period_days: 10 }
    }

    #[test]
    fn scenario_s3_compound_three_months_late() {
        let inputs = PenaltyInputs {
            current_charge: Money::from_centavos(200000),
            base_paid: Money::ZERO,
            stored_penalty_amount: Money::ZERO,
            penalty_paid: Money::ZERO,
            due_date: NaiveDate::from_ymd_opt(2025, 8, 10).unwrap(),
        };
        let config = penalty_config(5);
        let as_of = NaiveDate::from_ymd_opt(2025, 11, 10).unwrap();
        let penalty = compute_accrued_penalty(&inputs, &config, as_of);
        assert_eq!(penalty, Money::from_centavos(31525));
    }

    #[test]
    fn scenario_s4_virtual_penalty_two_months_late() {
        let inputs = PenaltyInputs {
            current_charge: Money::from_centavos(200000),
            base_paid: Money::ZERO,
            stored_penalty_amount: Money::from_centavos(31525),
            penalty_paid: Money::ZERO,
            due_date: NaiveDate::from_ymd_opt(2025, 8, 10).unwrap(),
        };
        let config = penalty_config(5);
        let as_of = NaiveDate::from_ymd_opt(2025, 10, 10).unwrap();
        let penalty = compute_accrued_penalty(&inputs, &config, as_of);
        assert_eq!(penalty, Money::from_centavos(20500));
    }

    #[test]
    fn stops_growing_once_base_fully_paid() {
        let inputs = PenaltyInputs {
            current_charge: Money::from_centavos(200000),
            base_paid: Money::from_centavos(200000),
            stored_penalty_amount: Money::from_centavos(31525),
            penalty_paid: Money::from_centavos(10000),
            due_date: NaiveDate::from_ymd_opt(2025, 8, 10).unwrap(),
        };
        let config = penalty_config(5);
        let as_of = NaiveDate::from_ymd_opt(2026, 6, 10).unwrap();
        let penalty = compute_accrued_penalty(&inputs, &config, as_of);
        assert_eq!(penalty, Money::from_centavos(31525));
    }

    #[test]
    fn never_returns_less_than_penalty_already_paid() {
        let inputs = PenaltyInputs {
            current_charge: Money::from_centavos(200000),
            base_paid: Money::ZERO,
            stored_penalty_amount: Money::ZERO,
            penalty_paid: Money::from_centavos(5000),
            due_date: NaiveDate::from_ymd_opt(2025, 8, 10).unwrap(),
        };
        let config = penalty_config(5);
        // before due date: zero months late, raw accrual would be 0.
        let as_of = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let penalty = compute_accrued_penalty(&inputs, &config, as_of);
        assert_eq!(penalty, Money::from_centavos(5000));
    }

    #[test]
    fn reproducible_for_identical_inputs() {
        let inputs = PenaltyInputs {
            current_charge: Money::from_centavos(90000),
            base_paid: Money::from_centavos(30000),
            stored_penalty_amount: Money::ZERO,
            penalty_paid: Money::ZERO,
            due_date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
        };
        let config = penalty_config(5);
        let as_of = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let first = compute_accrued_penalty(&inputs, &config, as_of);
        let second = compute_accrued_penalty(&inputs, &config, as_of);
        assert_eq!(first, second);
    }
}
