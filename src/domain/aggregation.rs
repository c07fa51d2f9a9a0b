use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::money::Money;

use super::period::{BillModule, BillStatus};
use super::UnitId;

/// Per-unit summary inside one month entry of an [`AggregatedViewDocument`]
/// (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSummary {
    pub status: BillStatus,
    pub current_charge: Money,
    pub penalty_amount: Money,
    pub total_amount: Money,
    pub paid_amount: Money,
    pub unpaid_amount: Money,
    pub days_past_due: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthEntry {
    pub month_index: u32,
    pub period_id: String,
    pub billing_month: NaiveDate,
    pub reading_date: Option<NaiveDate>,
    pub units: HashMap<UnitId, UnitSummary>,
}

/// Read-optimized per-fiscal-year roll-up (spec §3, §4.8). A cache: can be
/// deleted and regenerated from the underlying bill documents at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedViewDocument {
    pub client_id: String,
    pub fiscal_year: i32,
    pub module: BillModule,
    pub months: Vec<MonthEntry>,
}

impl AggregatedViewDocument {
    pub fn store_path(client_id: &str, fiscal_year: i32) -> String {
        format!("/clients/{client_id}/projects/waterBills/aggregatedData/{fiscal_year}")
    }
}
