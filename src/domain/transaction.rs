use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

use super::period::BillModule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Income,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationTarget {
    Base,
    Penalty,
}

/// One line item in a transaction's `allocations` list (spec §4.5.7). Tagged
/// rather than carrying an optional `billPeriodId` alongside a free-form
/// `categoryId` string — the source's `categoryId: "account-credit"`
/// sentinel becomes an explicit variant instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Allocation {
    Bill { bill_period_id: String, target: AllocationTarget, amount: Money },
    AccountCredit { amount: Money },
}

impl Allocation {
    pub fn amount(&self) -> Money {
        match self {
            Allocation::Bill { amount, .. } => *amount,
            Allocation::AccountCredit { amount } => *amount,
        }
    }
}

/// One payment or reversal event (spec §3). Immutable after creation except
/// for the `reversed` flag flipped by a controlled reversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub client_id: String,
    pub unit_id: String,
    pub module: BillModule,
    /// Anchored to client-timezone noon for day-boundary stability (spec §3).
    pub date: DateTime<Utc>,
    /// Total value applied to the unit's bills: `cash_received + credit_used`.
    /// Signed; negative for expenses/reversals. Payments are always positive.
    pub amount: Money,
    /// Cash actually tendered (spec §4.5.5) — may be less than `amount` when
    /// account credit covered the rest.
    pub cash_received: Money,
    /// Portion of `amount` drawn from the unit's account credit (spec
    /// §4.5.5). A reversal must refund exactly this much back to the
    /// balance, which is why it's carried on the record rather than derived.
    pub credit_used: Money,
    pub transaction_type: TransactionType,
    pub account_id: String,
    pub payment_method: String,
    pub notes: String,
    pub allocations: Vec<Allocation>,
    pub metadata: serde_json::Value,
    pub reversed: bool,
}

impl TransactionRecord {
    pub fn store_path(client_id: &str, transaction_id: &str) -> String {
        format!("/clients/{client_id}/transactions/{transaction_id}")
    }

    pub fn reversal_id(transaction_id: &str) -> String {
        format!("{transaction_id}_reversal")
    }

    /// Allocation conservation (spec §8): sum of allocation amounts must
    /// equal the transaction amount, verified before every commit.
    pub fn allocations_balance(&self) -> bool {
        let sum: Money = self.allocations.iter().map(|a| a.amount()).sum();
        sum == self.amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_must_sum_to_transaction_amount() {
        let txn = TransactionRecord {
            id: "txn-1".to_string(),
            client_id: "acme".to_string(),
            unit_id: "101".to_string(),
            module: BillModule::Water,
            date: Utc::now(),
            amount: Money::from_centavos(100000),
            cash_received: Money::from_centavos(100000),
            credit_used: Money::ZERO,
            transaction_type: TransactionType::Income,
            account_id: "acct-1".to_string(),
            payment_method: "transfer".to_string(),
            notes: String::new(),
            allocations: vec![
                Allocation::Bill {
                    bill_period_id: "2026-00".to_string(),
                    target: AllocationTarget::Base,
                    amount: Money::from_centavos(90000),
                },
                Allocation::AccountCredit { amount: Money::from_centavos(10000) },
            ],
            metadata: serde_json::Value::Null,
            reversed: false,
        };
        assert!(txn.allocations_balance());
    }
}
