use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigSnapshot;
use crate::errors::{BillingError, Result};
use crate::money::Money;

use super::UnitId;

/// Which of the two billing cycles a period document belongs to (spec §9:
/// "the Payment Distributor treats both uniformly via the `module`
/// parameter"). `periodId` format differs by module (`YYYY-MM` vs
/// `YYYY-Qn`) but is not otherwise interpreted by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BillModule {
    Water,
    Hoa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Unpaid,
    Partial,
    Paid,
}

impl BillStatus {
    /// Derive status from paid vs total — never stored independent of this
    /// rule (spec §3 invariant: `status=paid ⇔ paidAmount = totalAmount`).
    pub fn derive(paid_amount: Money, total_amount: Money) -> Self {
        if paid_amount.is_zero() {
            BillStatus::Unpaid
        } else if paid_amount >= total_amount {
            BillStatus::Paid
        } else {
            BillStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAllocationRecord {
    pub transaction_id: String,
    pub base: Money,
    pub penalty: Money,
    pub timestamp: DateTime<Utc>,
}

/// One unit's line item within a [`BillPeriodDocument`] (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitBillEntry {
    pub prior_reading: Option<rust_decimal::Decimal>,
    pub current_reading: Option<rust_decimal::Decimal>,
    pub consumption: Option<rust_decimal::Decimal>,
    /// Base charge for this period only; never mutated after generation.
    pub current_charge: Money,
    pub penalty_amount: Money,
    pub paid_amount: Money,
    pub base_paid: Money,
    pub penalty_paid: Money,
    pub status: BillStatus,
    pub payments: Vec<PaymentAllocationRecord>,
    pub last_penalty_update: Option<DateTime<Utc>>,
    /// Set when `currentReading < priorReading`; generation stops for this
    /// unit and an operator must correct the meter reading (spec §4.4).
    pub needs_review: bool,
}

impl UnitBillEntry {
    pub fn total_amount(&self) -> Money {
        self.current_charge + self.penalty_amount
    }

    pub fn base_owed(&self) -> Money {
        (self.current_charge - self.base_paid).non_negative()
    }

    pub fn penalty_owed(&self) -> Money {
        (self.penalty_amount - self.penalty_paid).non_negative()
    }

    /// Recompute `paidAmount`/`status` from `basePaid`/`penaltyPaid`. Callers
    /// mutate the two paid fields directly, then call this to keep the
    /// derived fields consistent (spec §3 invariant).
    pub fn recompute_derived(&mut self) {
        self.paid_amount = self.base_paid + self.penalty_paid;
        self.status = BillStatus::derive(self.paid_amount, self.total_amount());
    }
}

/// One (client, period) bill document — the aggregate root the Bill
/// Generator writes and the Payment Distributor / Penalty Engine mutate
/// unit-by-unit through the store's atomic batch (spec §3 ownership rules).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillPeriodDocument {
    /// Carried explicitly rather than inferred from field presence (spec
    /// §9, "dynamically typed record shapes" redesign flag: "bill-document
    /// schema versions carried explicitly"). Defaults to `1` on documents
    /// written before this field existed — there has only ever been one
    /// shape, so that default is exact, not a guess.
    #[serde(default = "BillPeriodDocument::current_schema_version")]
    pub schema_version: u16,
    pub client_id: String,
    pub period_id: String,
    pub module: BillModule,
    pub bill_date: NaiveDate,
    pub due_date: NaiveDate,
    /// Frozen at generation time; byte-identical for the life of the
    /// document (spec §8, "config freeze" invariant).
    pub config_snapshot: ConfigSnapshot,
    pub units: HashMap<UnitId, UnitBillEntry>,
}

impl BillPeriodDocument {
    pub const CURRENT_SCHEMA_VERSION: u16 = 1;

    pub fn current_schema_version() -> u16 {
        Self::CURRENT_SCHEMA_VERSION
    }

    pub fn store_path(client_id: &str, module: BillModule, period_id: &str) -> String {
        match module {
            BillModule::Water => format!("/clients/{client_id}/projects/waterBills/bills/{period_id}"),
            BillModule::Hoa => format!("/clients/{client_id}/projects/hoaDues/bills/{period_id}"),
        }
    }

    /// The typed parser spec §9 requires in place of silent coercion: a
    /// stored document whose `schema_version` this build doesn't recognize
    /// is rejected with `Validation` rather than read and guessed at.
    pub fn parse(path: &str, raw: serde_json::Value) -> Result<Self> {
        let doc: BillPeriodDocument = serde_json::from_value(raw)
            .map_err(|e| BillingError::validation(format!("malformed bill document {path}: {e}")))?;
        if doc.schema_version != Self::CURRENT_SCHEMA_VERSION {
            return Err(BillingError::validation(format!(
                "bill document {path} has unsupported schema_version {} (expected {})",
                doc.schema_version,
                Self::CURRENT_SCHEMA_VERSION
            )));
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(current_charge: i64, base_paid: i64, penalty_amount: i64, penalty_paid: i64) -> UnitBillEntry {
        let mut entry = UnitBillEntry {
            prior_reading: None,
            current_reading: None,
            consumption: None,
            current_charge: Money::from_centavos(current_charge),
            penalty_amount: Money::from_centavos(penalty_amount),
            paid_amount: Money::ZERO,
            base_paid: Money::from_centavos(base_paid),
            penalty_paid: Money::from_centavos(penalty_paid),
            status: BillStatus::Unpaid,
            payments: vec![],
            last_penalty_update: None,
            needs_review: false,
        };
        entry.recompute_derived();
        entry
    }

    #[test]
    fn status_derives_from_paid_vs_total() {
        assert_eq!(entry(90000, 0, 0, 0).status, BillStatus::Unpaid);
        assert_eq!(entry(90000, 50000, 0, 0).status, BillStatus::Partial);
        assert_eq!(entry(90000, 90000, 0, 0).status, BillStatus::Paid);
    }

    #[test]
    fn owed_amounts_never_go_negative() {
        let e = entry(90000, 90000, 1000, 2000);
        assert_eq!(e.base_owed(), Money::ZERO);
        assert_eq!(e.penalty_owed(), Money::ZERO);
    }

    fn sample_doc_json(schema_version: Option<u16>) -> serde_json::Value {
        let mut doc = serde_json::json!({
            "client_id": "acme",
            "period_id": "2026-00",
            "module": "water",
            "bill_date": "2025-07-01",
            "due_date": "2025-07-11",
            "config_snapshot": {
                "currency": "MXN",
                "fiscal_start_month": 7,
                "penalty": { "rate": "0.05", "grace_period_days": 10 },
                "module": { "module": "Water", "rate_per_m3": "18.50", "service_charge_rates": {}, "meter_order": [] }
            },
            "units": {}
        });
        if let Some(version) = schema_version {
            doc["schema_version"] = serde_json::json!(version);
        }
        doc
    }

    #[test]
    fn parse_defaults_missing_schema_version_to_one() {
        let doc = BillPeriodDocument::parse("/bills/2026-00", sample_doc_json(None)).unwrap();
        assert_eq!(doc.schema_version, 1);
    }

    #[test]
    fn parse_rejects_unsupported_schema_version() {
        let err = BillPeriodDocument::parse("/bills/2026-00", sample_doc_json(Some(99))).unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));
    }
}
