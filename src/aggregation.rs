//! Aggregation View Builder (spec §4.8): projects a read-optimized
//! per-fiscal-year roll-up from the underlying water bill period documents.
//!
//! The projection is a cache — [`rebuild`] always recomputes it in full
//! from source-of-truth bill documents, and [`rebuild_month`] does the
//! surgical single-month update the Bill Generator and Payment Distributor
//! trigger after a mutation (spec §4.8: "only the affected month(s) are
//! rewritten; other months left untouched"). Nothing here is itself a
//! source of truth; the view can be deleted and regenerated at any time.
//!
//! **[SUPPLEMENT note, spec §9]**: the source leaves it unspecified whether
//! a unified view should span both water and dues; only the water path
//! (`/clients/{c}/projects/waterBills/aggregatedData/{fiscalYear}`, spec
//! §6.2) is given a stored path, so this builder only projects the water
//! module. HOA dues aggregation is left as the future extension spec §9
//! names explicitly, tracked in DESIGN.md.

use chrono::NaiveDate;
use tracing::instrument;

use crate::clock::fiscal_month_index;
use crate::context::ServiceContext;
use crate::domain::aggregation::{AggregatedViewDocument, MonthEntry, UnitSummary};
use crate::domain::period::{BillModule, BillPeriodDocument};
use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::store::SetOptions;

fn water_period_id(fiscal_year: i32, month_index: u32) -> String {
    format!("{fiscal_year}-{month_index:02}")
}

async fn load_bill(ctx: &ServiceContext, client_id: &str, period_id: &str) -> Result<Option<BillPeriodDocument>> {
    let path = BillPeriodDocument::store_path(client_id, BillModule::Water, period_id);
    match ctx.store.get_raw(&path).await? {
        Some(raw) => BillPeriodDocument::parse(&path, raw).map(Some),
        None => Ok(None),
    }
}

fn project_month(bill: &BillPeriodDocument, month_index: u32, today: NaiveDate) -> MonthEntry {
    let units = bill
        .units
        .iter()
        .map(|(unit_id, entry)| {
            let total = entry.total_amount();
            let unpaid = (total - entry.paid_amount).non_negative();
            let days_past_due = if today > bill.due_date && unpaid.is_positive() {
                (today - bill.due_date).num_days().max(0) as u32
            } else {
                0
            };
            (
                unit_id.clone(),
                UnitSummary {
                    status: entry.status,
                    current_charge: entry.current_charge,
                    penalty_amount: entry.penalty_amount,
                    total_amount: total,
                    paid_amount: entry.paid_amount,
                    unpaid_amount: unpaid,
                    days_past_due,
                },
            )
        })
        .collect();

    MonthEntry {
        month_index,
        period_id: bill.period_id.clone(),
        billing_month: bill.bill_date,
        reading_date: Some(bill.bill_date),
        units,
    }
}

fn empty_month(fiscal_year: i32, fiscal_start_month: u32, month_index: u32) -> MonthEntry {
    let calendar_month = (fiscal_start_month - 1 + month_index) % 12 + 1;
    let calendar_year = if calendar_month as i32 >= fiscal_start_month as i32 {
        fiscal_year - 1
    } else {
        fiscal_year
    };
    let billing_month = NaiveDate::from_ymd_opt(calendar_year, calendar_month, 1).unwrap_or(NaiveDate::MIN);
    MonthEntry {
        month_index,
        period_id: water_period_id(fiscal_year, month_index),
        billing_month,
        reading_date: None,
        units: Default::default(),
    }
}

/// Fully rebuild the (client, fiscal year) projection from the twelve
/// underlying water bill documents, skipping any period not yet generated
/// (spec §4.8: "invoked by an explicit rebuild call... or read endpoints
/// with forceRefresh=true").
#[instrument(skip(ctx))]
pub async fn rebuild(
    ctx: &ServiceContext,
    client_id: &str,
    fiscal_year: i32,
    fiscal_start_month: u32,
) -> Result<AggregatedViewDocument> {
    let today = crate::clock::local_date(ctx.now());
    let mut months = Vec::with_capacity(12);
    for month_index in 0..12 {
        let period_id = water_period_id(fiscal_year, month_index);
        let entry = match load_bill(ctx, client_id, &period_id).await? {
            Some(bill) => project_month(&bill, month_index, today),
            None => empty_month(fiscal_year, fiscal_start_month, month_index),
        };
        months.push(entry);
    }

    let doc = AggregatedViewDocument {
        client_id: client_id.to_string(),
        fiscal_year,
        module: BillModule::Water,
        months,
    };
    write_view(ctx, &doc).await?;
    Ok(doc)
}

/// Surgically update only the month matching `period_id`, leaving the rest
/// of an existing projection untouched (spec §4.8). If no projection exists
/// yet for the bill's fiscal year, falls back to a full [`rebuild`].
#[instrument(skip(ctx))]
pub async fn rebuild_month(
    ctx: &ServiceContext,
    client_id: &str,
    period_id: &str,
    fiscal_start_month: u32,
) -> Result<AggregatedViewDocument> {
    let bill = load_bill(ctx, client_id, period_id)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("bill period {period_id}")))?;
    let fiscal_year = bill_fiscal_year(&bill, fiscal_start_month);

    let path = AggregatedViewDocument::store_path(client_id, fiscal_year);
    let existing = ctx.store.get_raw(&path).await?;
    let Some(raw) = existing else {
        return rebuild(ctx, client_id, fiscal_year, fiscal_start_month).await;
    };
    let mut doc: AggregatedViewDocument = serde_json::from_value(raw)
        .map_err(|e| BillingError::validation(format!("malformed aggregated view {path}: {e}")))?;

    let today = crate::clock::local_date(ctx.now());
    let month_index = fiscal_month_index(bill.bill_date, fiscal_start_month);
    let projected = project_month(&bill, month_index, today);
    if let Some(slot) = doc.months.iter_mut().find(|m| m.month_index == month_index) {
        *slot = projected;
    } else {
        doc.months.push(projected);
        doc.months.sort_by_key(|m| m.month_index);
    }

    write_view(ctx, &doc).await?;
    Ok(doc)
}

fn bill_fiscal_year(bill: &BillPeriodDocument, fiscal_start_month: u32) -> i32 {
    crate::clock::fiscal_year_of(bill.bill_date, fiscal_start_month)
}

async fn write_view(ctx: &ServiceContext, doc: &AggregatedViewDocument) -> Result<()> {
    let path = AggregatedViewDocument::store_path(&doc.client_id, doc.fiscal_year);
    let value = serde_json::to_value(doc).map_err(|e| BillingError::permanent(format!("encode {path}: {e}")))?;
    let mut batch = ctx.store.batch();
    batch.set(path, value, SetOptions::default());
    batch.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, PenaltyConfig, WaterBillsConfig};
    use crate::domain::reading::{ReadingPeriodDocument, UnitReading};
    use crate::money::Rate;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn client_config() -> ClientConfig {
        ClientConfig {
            client_id: "acme".to_string(),
            fiscal_start_month: 7,
            currency: "MXN".to_string(),
            water: Some(WaterBillsConfig {
                rate_per_m3: Money::from_pesos_str("18.50").unwrap(),
                service_charge_rates: HashMap::new(),
                penalty: PenaltyConfig { rate: Rate::from_percentage(dec!(5)), grace_period_days: 10 },
                meter_order: vec!["101".to_string()],
            }),
            hoa_dues: None,
        }
    }

    #[tokio::test]
    async fn rebuild_projects_generated_months_and_skips_ungenerated() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ServiceContext::test_at(store, Utc::now());
        let config = client_config();
        let readings = ReadingPeriodDocument {
            client_id: "acme".to_string(),
            period_id: "2026-00".to_string(),
            readings: HashMap::from([(
                "101".to_string(),
                UnitReading { current_reading: dec!(120), service_charges: vec![] },
            )]),
        };
        let prior = HashMap::from([("101".to_string(), dec!(100))]);
        let bill_date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        crate::bill_generator::generate_water(&ctx, &config, &readings, &prior, bill_date, false).await.unwrap();

        let view = rebuild(&ctx, "acme", 2026, 7).await.unwrap();
        assert_eq!(view.months.len(), 12);
        assert_eq!(view.months[0].units.len(), 1);
        assert_eq!(view.months[0].units["101"].current_charge, Money::from_pesos_str("370.00").unwrap());
        assert!(view.months[1].units.is_empty());
    }

    #[tokio::test]
    async fn rebuild_month_touches_only_the_affected_month() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ServiceContext::test_at(store, Utc::now());
        let config = client_config();
        let bill_date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let readings = ReadingPeriodDocument {
            client_id: "acme".to_string(),
            period_id: "2026-00".to_string(),
            readings: HashMap::from([(
                "101".to_string(),
                UnitReading { current_reading: dec!(120), service_charges: vec![] },
            )]),
        };
        let prior = HashMap::from([("101".to_string(), dec!(100))]);
        crate::bill_generator::generate_water(&ctx, &config, &readings, &prior, bill_date, false).await.unwrap();
        rebuild(&ctx, "acme", 2026, 7).await.unwrap();

        let readings2 = ReadingPeriodDocument {
            client_id: "acme".to_string(),
            period_id: "2026-01".to_string(),
            readings: HashMap::from([(
                "101".to_string(),
                UnitReading { current_reading: dec!(150), service_charges: vec![] },
            )]),
        };
        let prior2 = HashMap::from([("101".to_string(), dec!(120))]);
        crate::bill_generator::generate_water(&ctx, &config, &readings2, &prior2, NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), false)
            .await
            .unwrap();

        let view = rebuild_month(&ctx, "acme", "2026-01", 7).await.unwrap();
        assert_eq!(view.months[0].units.len(), 1, "month 0 untouched by the surgical update");
        assert_eq!(view.months[1].units.len(), 1, "month 1 now reflects the newly generated bill");
    }
}
