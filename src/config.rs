//! Client billing configuration and the frozen snapshot embedded in every
//! bill period document at generation time (spec §3, §4.4).
//!
//! Live config (this module's `WaterBillsConfig`/`HoaDuesConfig`) is
//! mutable and externally sourced — operators edit rates between periods.
//! `ConfigSnapshot` is the copy frozen into a bill at generation; once
//! written it is never mutated again (spec §8, "config freeze" invariant).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::money::{Money, Rate};

/// Penalty parameters. Compound monthly is the only supported mode (spec §9
/// open question, resolved in favor of the newer `PenaltyRecalculationService`
/// behavior over legacy simple-interest paths).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PenaltyConfig {
    pub rate: Rate,
    pub grace_period_days: u32,
}

impl PartialEq for PenaltyConfig {
    fn eq(&self, other: &Self) -> bool {
        self.rate.as_decimal() == other.rate.as_decimal()
            && self.grace_period_days == other.grace_period_days
    }
}

/// One optional line-item charge on a water bill beyond straight consumption
/// (e.g. car-wash counts × rate), keyed by description so it can be recorded
/// in `ModuleConfigSnapshot::Water::service_charge_rates` for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCharge {
    pub description: String,
    pub quantity: rust_decimal::Decimal,
    pub rate: Money,
}

impl ServiceCharge {
    pub fn amount(&self) -> Money {
        self.rate.mul_decimal(self.quantity)
    }
}

/// Live, editable water-bills configuration for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterBillsConfig {
    pub rate_per_m3: Money,
    /// Default rate per named service charge, used when a reading document
    /// doesn't carry its own override.
    pub service_charge_rates: HashMap<String, Money>,
    pub penalty: PenaltyConfig,
    /// Unit ids in the order meters are physically read; carried into the
    /// snapshot so a generated bill can reproduce the original read order.
    pub meter_order: Vec<String>,
}

/// Live, editable HOA-dues configuration for one client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HoaDuesConfig {
    pub quarterly_amount: Money,
    pub penalty: PenaltyConfig,
}

/// Per-client configuration root, stored as the two separate documents at
/// `/clients/{c}/config/{waterBills|hoaDues}` (spec §6.2) in a real backend;
/// bundled here as one struct since the billing core always needs the
/// client's fiscal parameters regardless of which module it's freezing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub fiscal_start_month: u32,
    pub currency: String,
    pub water: Option<WaterBillsConfig>,
    pub hoa_dues: Option<HoaDuesConfig>,
}

impl ClientConfig {
    pub fn freeze_water(&self) -> Option<ConfigSnapshot> {
        let water = self.water.as_ref()?;
        Some(ConfigSnapshot {
            currency: self.currency.clone(),
            fiscal_start_month: self.fiscal_start_month,
            penalty: water.penalty,
            module: ModuleConfigSnapshot::Water {
                rate_per_m3: water.rate_per_m3,
                service_charge_rates: water.service_charge_rates.clone(),
                meter_order: water.meter_order.clone(),
            },
        })
    }

    pub fn freeze_hoa(&self) -> Option<ConfigSnapshot> {
        let hoa = self.hoa_dues?;
        Some(ConfigSnapshot {
            currency: self.currency.clone(),
            fiscal_start_month: self.fiscal_start_month,
            penalty: hoa.penalty,
            module: ModuleConfigSnapshot::Hoa { quarterly_amount: hoa.quarterly_amount },
        })
    }
}

/// The frozen config embedded in a bill period document at generation time
/// (spec §3's `configSnapshot`). Tagged by module rather than carrying both
/// shapes behind optional fields, per the "dynamically typed record shapes"
/// redesign flag (spec §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub currency: String,
    pub fiscal_start_month: u32,
    pub penalty: PenaltyConfig,
    pub module: ModuleConfigSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "module")]
pub enum ModuleConfigSnapshot {
    Water {
        rate_per_m3: Money,
        service_charge_rates: HashMap<String, Money>,
        meter_order: Vec<String>,
    },
    Hoa {
        quarterly_amount: Money,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_client() -> ClientConfig {
        ClientConfig {
            client_id: "acme".to_string(),
            fiscal_start_month: 7,
            currency: "MXN".to_string(),
            water: Some(WaterBillsConfig {
                rate_per_m3: Money::from_pesos_str("18.50").unwrap(),
                service_charge_rates: HashMap::from([(
                    "car_wash".to_string(),
                    Money::from_pesos_str("50.00").unwrap(),
                )]),
                penalty: PenaltyConfig { rate: Rate::from_percentage(dec!(5)), grace_period_days: 10 },
                meter_order: vec!["101".to_string(), "102".to_string()],
            }),
            hoa_dues: Some(HoaDuesConfig {
                quarterly_amount: Money::from_pesos_str("1500.00").unwrap(),
                penalty: PenaltyConfig { rate: Rate::from_percentage(dec!(5)), grace_period_days: 15 },
            }),
        }
    }

    #[test]
    fn freezes_water_snapshot_with_service_charges() {
        let config = sample_client();
        let snapshot = config.freeze_water().unwrap();
        match snapshot.module {
            ModuleConfigSnapshot::Water { rate_per_m3, service_charge_rates, meter_order } => {
                assert_eq!(rate_per_m3, Money::from_pesos_str("18.50").unwrap());
                assert_eq!(service_charge_rates.len(), 1);
                assert_eq!(meter_order, vec!["101".to_string(), "102".to_string()]);
            }
            ModuleConfigSnapshot::Hoa { .. } => panic!("expected water snapshot"),
        }
    }

    #[test]
    fn freezes_hoa_snapshot() {
        let config = sample_client();
        let snapshot = config.freeze_hoa().unwrap();
        assert_eq!(snapshot.fiscal_start_month, 7);
        match snapshot.module {
            ModuleConfigSnapshot::Hoa { quarterly_amount } => {
                assert_eq!(quarterly_amount, Money::from_pesos_str("1500.00").unwrap());
            }
            ModuleConfigSnapshot::Water { .. } => panic!("expected hoa snapshot"),
        }
    }

    #[test]
    fn service_charge_amount_multiplies_quantity_by_rate() {
        let charge = ServiceCharge {
            description: "car_wash".to_string(),
            quantity: dec!(3),
            rate: Money::from_pesos_str("50.00").unwrap(),
        };
        assert_eq!(charge.amount(), Money::from_pesos_str("150.00").unwrap());
    }
}
