//! Idempotent payment reversal (spec §4.5.9), keyed by
//! [`TransactionRecord::reversal_id`] so a retried reversal request never
//! double-reverses.

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::audit::AuditEntry;
use crate::context::ServiceContext;
use crate::credit_service::{apply_change_to_record, ApplyChangeRequest};
use crate::domain::credit::{CreditBalanceRecord, CreditHistoryType};
use crate::domain::period::{BillPeriodDocument, UnitBillEntry};
use crate::domain::transaction::{Allocation, AllocationTarget, TransactionRecord, TransactionType};
use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::store::SetOptions;

/// Reverse `transaction_id`: undoes every allocation it made (bill
/// paid-amount reductions, account credit changes) and writes a mirrored
/// reversal `TransactionRecord`. Calling this a second time for the same
/// transaction returns the original reversal record without reapplying
/// anything (spec §4.5.9 idempotence).
#[instrument(skip(ctx))]
pub async fn reverse_payment(ctx: &ServiceContext, client_id: &str, transaction_id: &str) -> Result<TransactionRecord> {
    let reversal_id = TransactionRecord::reversal_id(transaction_id);
    let reversal_path = TransactionRecord::store_path(client_id, &reversal_id);

    if let Some(existing) = ctx.store.get_raw(&reversal_path).await? {
        let reversal: TransactionRecord = serde_json::from_value(existing)
            .map_err(|e| BillingError::validation(format!("malformed reversal document {reversal_path}: {e}")))?;
        return Ok(reversal);
    }

    let txn_path = TransactionRecord::store_path(client_id, transaction_id);
    let raw = ctx
        .store
        .get_raw(&txn_path)
        .await?
        .ok_or_else(|| BillingError::not_found(format!("transaction {transaction_id}")))?;
    let mut original: TransactionRecord = serde_json::from_value(raw)
        .map_err(|e| BillingError::validation(format!("malformed transaction {txn_path}: {e}")))?;

    if original.reversed {
        return Err(BillingError::AlreadyReversed { transaction_id: transaction_id.to_string() });
    }

    let now = ctx.now();
    let mut batch = ctx.store.batch();
    let mut bill_cache: Vec<(String, BillPeriodDocument)> = Vec::new();

    for alloc in &original.allocations {
        if let Allocation::Bill { bill_period_id, target, amount } = alloc {
            let doc = match bill_cache.iter_mut().find(|(id, _)| id == bill_period_id) {
                Some((_, doc)) => doc,
                None => {
                    let path = BillPeriodDocument::store_path(client_id, original.module, bill_period_id);
                    let raw = ctx
                        .store
                        .get_raw(&path)
                        .await?
                        .ok_or_else(|| BillingError::not_found(format!("bill period {path}")))?;
                    let doc = BillPeriodDocument::parse(&path, raw)?;
                    bill_cache.push((bill_period_id.clone(), doc));
                    &mut bill_cache.last_mut().unwrap().1
                }
            };
            let entry: &mut UnitBillEntry = doc
                .units
                .get_mut(&original.unit_id)
                .ok_or_else(|| BillingError::permanent(format!("unit {} missing from bill {bill_period_id}", original.unit_id)))?;
            match target {
                AllocationTarget::Base => entry.base_paid -= *amount,
                AllocationTarget::Penalty => entry.penalty_paid -= *amount,
            }
            entry.recompute_derived();
        }
    }

    for (period_id, doc) in &bill_cache {
        let path = BillPeriodDocument::store_path(client_id, original.module, period_id);
        let value = serde_json::to_value(doc).map_err(|e| BillingError::permanent(format!("encode {path}: {e}")))?;
        batch.set(path, value, SetOptions::default());
    }

    let credit_path = CreditBalanceRecord::store_path(client_id);
    let mut credit_record: Option<CreditBalanceRecord> = ctx
        .store
        .get_raw(&credit_path)
        .await?
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e: serde_json::Error| BillingError::validation(format!("malformed credit balance {credit_path}: {e}")))?;

    let account_credit_total: Money = original
        .allocations
        .iter()
        .filter_map(|a| match a {
            Allocation::AccountCredit { amount } => Some(*amount),
            Allocation::Bill { .. } => None,
        })
        .sum();

    if account_credit_total.is_positive() || original.credit_used.is_positive() {
        let record = credit_record.get_or_insert_with(|| CreditBalanceRecord {
            client_id: client_id.to_string(),
            units: Default::default(),
        });
        if account_credit_total.is_positive() {
            apply_change_to_record(
                record,
                &ApplyChangeRequest {
                    unit_id: original.unit_id.clone(),
                    amount: -account_credit_total,
                    entry_type: CreditHistoryType::Reversal,
                    transaction_id: Some(reversal_id.clone()),
                    notes: format!("reversal of {transaction_id}: withdraws overpayment captured as credit"),
                },
                now,
            )?;
        }
        if original.credit_used.is_positive() {
            apply_change_to_record(
                record,
                &ApplyChangeRequest {
                    unit_id: original.unit_id.clone(),
                    amount: original.credit_used,
                    entry_type: CreditHistoryType::Reversal,
                    transaction_id: Some(reversal_id.clone()),
                    notes: format!("reversal of {transaction_id}: refunds credit consumed by the payment"),
                },
                now,
            )?;
        }
        let value = serde_json::to_value(record).map_err(|e| BillingError::permanent(format!("encode {credit_path}: {e}")))?;
        batch.set(credit_path.clone(), value, SetOptions::default());
    }

    let reversal = TransactionRecord {
        id: reversal_id.clone(),
        client_id: client_id.to_string(),
        unit_id: original.unit_id.clone(),
        module: original.module,
        date: now,
        amount: -original.amount,
        cash_received: -original.cash_received,
        credit_used: -original.credit_used,
        transaction_type: TransactionType::Expense,
        account_id: original.account_id.clone(),
        payment_method: original.payment_method.clone(),
        notes: format!("reversal of {transaction_id}"),
        allocations: original
            .allocations
            .iter()
            .map(|a| match a {
                Allocation::Bill { bill_period_id, target, amount } => Allocation::Bill {
                    bill_period_id: bill_period_id.clone(),
                    target: *target,
                    amount: -*amount,
                },
                Allocation::AccountCredit { amount } => Allocation::AccountCredit { amount: -*amount },
            })
            .collect(),
        metadata: serde_json::Value::Null,
        reversed: false,
    };
    if !reversal.allocations_balance() {
        return Err(BillingError::permanent("reversal allocations do not sum to the reversal amount"));
    }

    original.reversed = true;
    let original_value = serde_json::to_value(&original).map_err(|e| BillingError::permanent(format!("encode {txn_path}: {e}")))?;
    batch.set(txn_path, original_value, SetOptions::default());

    let reversal_value = serde_json::to_value(&reversal).map_err(|e| BillingError::permanent(format!("encode {reversal_path}: {e}")))?;
    batch.set(reversal_path, reversal_value, SetOptions::default());

    batch.commit().await?;

    ctx.audit
        .record(AuditEntry {
            timestamp: now,
            module: "payments".to_string(),
            action: "reverse_payment".to_string(),
            parent_path: format!("/clients/{client_id}/transactions"),
            doc_id: reversal_id,
            friendly_name: format!("reversal of {transaction_id}"),
            notes: String::new(),
            user_id: None,
        })
        .await;

    Ok(reversal)
}
