//! Credit Balance Service (spec §4.6): the sole writer of [`CreditBalanceRecord`]
//! documents. Every other component that wants to move a unit's credit
//! balance — the Payment Distributor when it records usage/overpayment, the
//! reversal flow when it mirrors a deleted payment — goes through
//! [`apply_change_to_record`] rather than mutating the record directly, so
//! the `allowNegative=false` validation and history-append discipline live
//! in exactly one place.

use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::context::ServiceContext;
use crate::domain::credit::{CreditBalanceRecord, CreditHistoryEntry, CreditHistoryType};
use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::store::SetOptions;

/// One requested change to a unit's credit balance (spec §4.6 `applyChange`).
pub struct ApplyChangeRequest {
    pub unit_id: String,
    /// Signed: positive for additions (`credit_added`/`starting_balance`),
    /// negative for usage (`credit_used`) or a reversal that removes credit.
    pub amount: Money,
    pub entry_type: CreditHistoryType,
    /// Required for every type except `StartingBalance` (spec §3 invariant).
    pub transaction_id: Option<String>,
    pub notes: String,
}

/// Summary returned by [`CreditBalanceService::delete_entries_for`] (spec §4.6).
pub struct DeletionSummary {
    pub entries_deleted: usize,
    pub previous_balance: Money,
    pub new_balance: Money,
}

/// A unit whose recomputed history sum disagrees with its stored balance
/// (spec §4.6: "mismatches are reported for remediation, not auto-corrected").
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantMismatch {
    pub unit_id: String,
    pub stored_balance: Money,
    pub summed_history: Money,
}

/// Mutate `record` in place per `request`, appending a history entry and
/// returning the new balance. Pure with respect to the store — callers
/// that need this change to land in the same atomic batch as other
/// mutations (the distributor, reversal) call this directly on an
/// already-loaded record; [`CreditBalanceService::apply_change`] is the
/// store-backed wrapper for standalone callers.
///
/// Rejects any change that would drive the unit's balance negative
/// (spec §4.6, `allowNegative=false` by default) and any non-starting-balance
/// change without a `transaction_id` (spec §3 invariant).
pub fn apply_change_to_record(
    record: &mut CreditBalanceRecord,
    request: &ApplyChangeRequest,
    now: DateTime<Utc>,
) -> Result<Money> {
    if !matches!(request.entry_type, CreditHistoryType::StartingBalance) && request.transaction_id.is_none() {
        return Err(BillingError::validation(
            "credit history entries other than starting_balance must carry a transaction_id",
        ));
    }

    let balance = record.units.entry(request.unit_id.clone()).or_default();
    let next_balance = balance.balance + request.amount;
    if next_balance.is_negative() {
        return Err(BillingError::validation(format!(
            "credit change would drive unit {} balance negative ({} + {} = {})",
            request.unit_id, balance.balance, request.amount, next_balance
        )));
    }

    balance.balance = next_balance;
    balance.history.push(CreditHistoryEntry {
        id: Uuid::new_v4(),
        timestamp: now,
        amount: request.amount,
        entry_type: request.entry_type,
        transaction_id: request.transaction_id.clone(),
        notes: request.notes.clone(),
        balance_after: balance.balance,
    });

    Ok(balance.balance)
}

pub struct CreditBalanceService;

impl CreditBalanceService {
    async fn load(ctx: &ServiceContext, client_id: &str) -> Result<CreditBalanceRecord> {
        let path = CreditBalanceRecord::store_path(client_id);
        match ctx.store.get_raw(&path).await? {
            Some(raw) => serde_json::from_value(raw)
                .map_err(|e| BillingError::validation(format!("malformed credit balance {path}: {e}"))),
            None => Ok(CreditBalanceRecord { client_id: client_id.to_string(), units: Default::default() }),
        }
    }

    /// spec §4.6 `getBalance(client, unit)`.
    #[instrument(skip(ctx))]
    pub async fn get_balance(
        ctx: &ServiceContext,
        client_id: &str,
        unit_id: &str,
    ) -> Result<(Money, Vec<CreditHistoryEntry>)> {
        let record = Self::load(ctx, client_id).await?;
        let balance = record.units.get(unit_id);
        Ok((
            balance.map(|b| b.balance).unwrap_or(Money::ZERO),
            balance.map(|b| b.history.clone()).unwrap_or_default(),
        ))
    }

    /// spec §4.6 `applyChange`: loads, mutates, and writes back atomically
    /// in its own batch. Standalone callers only — the distributor and
    /// reversal flows call [`apply_change_to_record`] directly so the
    /// credit write lands in their own wider atomic batch instead.
    #[instrument(skip(ctx, request))]
    pub async fn apply_change(ctx: &ServiceContext, client_id: &str, request: ApplyChangeRequest) -> Result<Money> {
        let mut record = Self::load(ctx, client_id).await?;
        let new_balance = apply_change_to_record(&mut record, &request, ctx.now())?;

        let path = CreditBalanceRecord::store_path(client_id);
        let doc = serde_json::to_value(&record).map_err(|e| BillingError::permanent(format!("encode {path}: {e}")))?;
        let mut batch = ctx.store.batch();
        batch.set(path, doc, SetOptions::default());
        batch.commit().await?;

        Ok(new_balance)
    }

    /// spec §4.6 `deleteEntriesFor(transactionId)`. Removes every history
    /// entry tagged with `transaction_id` and recomputes the balance as the
    /// sum of what remains.
    ///
    /// This is distinct from the payment-reversal flow (spec §4.5.9), which
    /// deliberately does *not* delete history — it appends a mirror-image
    /// `reversal` entry so the balance story isn't rewritten (spec §8:
    /// "History is not rewound"). `deleteEntriesFor` is the literal
    /// service-level primitive spec §4.6 describes for direct correction of
    /// a unit's credit history; see DESIGN.md for how the two contracts
    /// coexist.
    #[instrument(skip(ctx))]
    pub async fn delete_entries_for(
        ctx: &ServiceContext,
        client_id: &str,
        unit_id: &str,
        transaction_id: &str,
    ) -> Result<DeletionSummary> {
        let mut record = Self::load(ctx, client_id).await?;
        let balance = record.units.entry(unit_id.to_string()).or_default();
        let previous_balance = balance.balance;

        let before = balance.history.len();
        balance.history.retain(|h| h.transaction_id.as_deref() != Some(transaction_id));
        let entries_deleted = before - balance.history.len();

        balance.balance = balance.history.iter().map(|h| h.amount).sum();
        let new_balance = balance.balance;

        let path = CreditBalanceRecord::store_path(client_id);
        let doc = serde_json::to_value(&record).map_err(|e| BillingError::permanent(format!("encode {path}: {e}")))?;
        let mut batch = ctx.store.batch();
        batch.set(path, doc, SetOptions::default());
        batch.commit().await?;

        Ok(DeletionSummary { entries_deleted, previous_balance, new_balance })
    }

    /// spec §4.6 on-demand invariant check: for every unit,
    /// `sum(history.amount) == creditBalance`. Returns every unit that
    /// disagrees; never auto-corrects.
    pub fn check_invariants(record: &CreditBalanceRecord) -> Vec<InvariantMismatch> {
        record
            .units
            .iter()
            .filter_map(|(unit_id, balance)| {
                if balance.invariant_holds() {
                    None
                } else {
                    let summed: Money = balance.history.iter().map(|h| h.amount).sum();
                    Some(InvariantMismatch {
                        unit_id: unit_id.clone(),
                        stored_balance: balance.balance,
                        summed_history: summed,
                    })
                }
            })
            .collect()
    }
}
