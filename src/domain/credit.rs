use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;

use super::UnitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditHistoryType {
    StartingBalance,
    CreditAdded,
    CreditUsed,
    Reversal,
}

/// One append-only entry in a unit's credit history (spec §3). Every
/// non-`StartingBalance` entry carries a `transaction_id`; `starting_balance`
/// entries (manual migration/seed) do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditHistoryEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Signed: positive for additions, negative for usage/reversal-of-credit.
    pub amount: Money,
    #[serde(rename = "type")]
    pub entry_type: CreditHistoryType,
    pub transaction_id: Option<String>,
    pub notes: String,
    pub balance_after: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UnitCreditBalance {
    pub balance: Money,
    pub history: Vec<CreditHistoryEntry>,
}

impl UnitCreditBalance {
    /// For every unit, `sum(history.amount) == balance` is a hard invariant
    /// (spec §3, §6's credit-history balance property). Recomputed on
    /// demand rather than trusted blindly.
    pub fn invariant_holds(&self) -> bool {
        let summed: Money = self.history.iter().map(|h| h.amount).sum();
        summed == self.balance
    }
}

/// One document per client, holding every unit's credit balance and full
/// history (spec §3, §6.2: `/clients/{c}/units/creditBalances`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreditBalanceRecord {
    pub client_id: String,
    pub units: HashMap<UnitId, UnitCreditBalance>,
}

impl CreditBalanceRecord {
    pub fn store_path(client_id: &str) -> String {
        format!("/clients/{client_id}/units/creditBalances")
    }

    pub fn balance_for(&self, unit_id: &str) -> Money {
        self.units.get(unit_id).map(|u| u.balance).unwrap_or(Money::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_detects_mismatch() {
        let mut balance = UnitCreditBalance::default();
        balance.history.push(CreditHistoryEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            amount: Money::from_centavos(10000),
            entry_type: CreditHistoryType::CreditAdded,
            transaction_id: Some("txn-1".to_string()),
            notes: String::new(),
            balance_after: Money::from_centavos(10000),
        });
        balance.balance = Money::from_centavos(10000);
        assert!(balance.invariant_holds());

        balance.balance = Money::from_centavos(5000);
        assert!(!balance.invariant_holds());
    }
}
