use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ServiceCharge;

use super::UnitId;

/// One unit's raw reading plus any ad-hoc service charges for the period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReading {
    pub current_reading: rust_decimal::Decimal,
    #[serde(default)]
    pub service_charges: Vec<ServiceCharge>,
}

/// Externally sourced, read-only to the Billing Core once consumed (spec
/// §3): an operator/import job submits this once per period; the Bill
/// Generator reads it exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingPeriodDocument {
    pub client_id: String,
    pub period_id: String,
    pub readings: HashMap<UnitId, UnitReading>,
}

impl ReadingPeriodDocument {
    pub fn store_path(client_id: &str, period_id: &str) -> String {
        format!("/clients/{client_id}/projects/waterBills/readings/{period_id}")
    }
}

/// **[SUPPLEMENT]** The quarterly dues counterpart to a reading document
/// (spec §4.4/§9: dues periods are "generated from a quarterly roster"
/// rather than meter readings). No consumption math applies; every listed
/// unit owes the flat `hoaDues` amount from the client's config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    pub client_id: String,
    pub period_id: String,
    pub units: Vec<UnitId>,
}

impl Roster {
    pub fn store_path(client_id: &str, period_id: &str) -> String {
        format!("/clients/{client_id}/projects/hoaDues/rosters/{period_id}")
    }
}
