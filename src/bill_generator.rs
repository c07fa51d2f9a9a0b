//! Bill Period Document generation (spec §4.4).
//!
//! Two entry points share the config-freeze and idempotence machinery:
//! [`generate_water`] (meter readings, per-unit consumption math) and the
//! **[SUPPLEMENT]** [`generate_dues`] (flat quarterly roster, spec §9).

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::instrument;

use crate::audit::AuditEntry;
use crate::config::{ClientConfig, ModuleConfigSnapshot};
use crate::context::ServiceContext;
use crate::domain::period::{BillModule, BillPeriodDocument, BillStatus, UnitBillEntry};
use crate::domain::reading::{ReadingPeriodDocument, Roster};
use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::store::SetOptions;

fn new_unit_entry() -> UnitBillEntry {
    UnitBillEntry {
        prior_reading: None,
        current_reading: None,
        consumption: None,
        current_charge: Money::ZERO,
        penalty_amount: Money::ZERO,
        paid_amount: Money::ZERO,
        base_paid: Money::ZERO,
        penalty_paid: Money::ZERO,
        status: BillStatus::Unpaid,
        payments: vec![],
        last_penalty_update: None,
        needs_review: false,
    }
}

async fn existing_bill(ctx: &ServiceContext, client_id: &str, module: BillModule, period_id: &str) -> Result<bool> {
    let path = BillPeriodDocument::store_path(client_id, module, period_id);
    Ok(ctx.store.get_raw(&path).await?.is_some())
}

/// Generate a water bill from a previously submitted reading document.
/// `prior_readings` supplies each unit's last `currentReading` (the Bill
/// Generator's only source for `priorReading`; it never reads a previous
/// bill document directly, since dues and water periods don't share a
/// reading history).
#[instrument(skip(ctx, config, readings, prior_readings))]
pub async fn generate_water(
    ctx: &ServiceContext,
    config: &ClientConfig,
    readings: &ReadingPeriodDocument,
    prior_readings: &HashMap<String, rust_decimal::Decimal>,
    bill_date: NaiveDate,
    force: bool,
) -> Result<BillPeriodDocument> {
    let snapshot = config
        .freeze_water()
        .ok_or_else(|| BillingError::validation("client has no waterBills configuration"))?;
    let ModuleConfigSnapshot::Water { rate_per_m3, meter_order: _, .. } = &snapshot.module else {
        unreachable!("freeze_water always returns a Water snapshot");
    };

    if !force && existing_bill(ctx, &config.client_id, BillModule::Water, &readings.period_id).await? {
        return Err(BillingError::Conflict {
            path: BillPeriodDocument::store_path(&config.client_id, BillModule::Water, &readings.period_id),
        });
    }

    let due_date = bill_date + chrono::Duration::days(snapshot.penalty.grace_period_days as i64);
    let mut units = HashMap::new();

    for (unit_id, reading) in &readings.readings {
        let prior = prior_readings.get(unit_id).copied().unwrap_or(rust_decimal::Decimal::ZERO);
        let consumption = reading.current_reading - prior;

        let mut entry = new_unit_entry();
        entry.prior_reading = Some(prior);
        entry.current_reading = Some(reading.current_reading);
        entry.consumption = Some(consumption);

        if consumption < rust_decimal::Decimal::ZERO {
            entry.needs_review = true;
            units.insert(unit_id.clone(), entry);
            continue;
        }

        let mut charge = rate_per_m3.mul_decimal(consumption);
        for service_charge in &reading.service_charges {
            charge += service_charge.amount();
        }
        entry.current_charge = charge;
        entry.recompute_derived();
        units.insert(unit_id.clone(), entry);
    }

    let bill = BillPeriodDocument {
        schema_version: BillPeriodDocument::CURRENT_SCHEMA_VERSION,
        client_id: config.client_id.clone(),
        period_id: readings.period_id.clone(),
        module: BillModule::Water,
        bill_date,
        due_date,
        config_snapshot: snapshot,
        units,
    };

    write_bill(ctx, &bill, force).await?;
    Ok(bill)
}

/// **[SUPPLEMENT]** Generate HOA dues for every unit in `roster`, each
/// charged the client's flat `hoaDues` quarterly amount (spec §9: dues
/// periods are "generated from a quarterly roster" with no consumption
/// math — the bill can never need review).
#[instrument(skip(ctx, config, roster))]
pub async fn generate_dues(
    ctx: &ServiceContext,
    config: &ClientConfig,
    roster: &Roster,
    bill_date: NaiveDate,
    force: bool,
) -> Result<BillPeriodDocument> {
    let snapshot = config
        .freeze_hoa()
        .ok_or_else(|| BillingError::validation("client has no hoaDues configuration"))?;
    let ModuleConfigSnapshot::Hoa { quarterly_amount } = snapshot.module else {
        unreachable!("freeze_hoa always returns an Hoa snapshot");
    };

    if !force && existing_bill(ctx, &config.client_id, BillModule::Hoa, &roster.period_id).await? {
        return Err(BillingError::Conflict {
            path: BillPeriodDocument::store_path(&config.client_id, BillModule::Hoa, &roster.period_id),
        });
    }

    let due_date = bill_date + chrono::Duration::days(snapshot.penalty.grace_period_days as i64);
    let mut units = HashMap::new();
    for unit_id in &roster.units {
        let mut entry = new_unit_entry();
        entry.current_charge = quarterly_amount;
        entry.recompute_derived();
        units.insert(unit_id.clone(), entry);
    }

    let bill = BillPeriodDocument {
        schema_version: BillPeriodDocument::CURRENT_SCHEMA_VERSION,
        client_id: config.client_id.clone(),
        period_id: roster.period_id.clone(),
        module: BillModule::Hoa,
        bill_date,
        due_date,
        config_snapshot: snapshot,
        units,
    };

    write_bill(ctx, &bill, force).await?;
    Ok(bill)
}

async fn write_bill(ctx: &ServiceContext, bill: &BillPeriodDocument, force: bool) -> Result<()> {
    let path = BillPeriodDocument::store_path(&bill.client_id, bill.module, &bill.period_id);
    let doc = serde_json::to_value(bill)
        .map_err(|e| BillingError::permanent(format!("encode {path}: {e}")))?;

    let mut batch = ctx.store.batch();
    batch.set(path.clone(), doc, SetOptions::default());
    batch.commit().await?;

    ctx.audit
        .record(AuditEntry {
            timestamp: ctx.now(),
            module: format!("{:?}", bill.module).to_lowercase(),
            action: if force { "generate_force".to_string() } else { "generate".to_string() },
            parent_path: path.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default(),
            doc_id: bill.period_id.clone(),
            friendly_name: format!("{} bill {}", bill.client_id, bill.period_id),
            notes: String::new(),
            user_id: None,
        })
        .await;

    Ok(())
}
