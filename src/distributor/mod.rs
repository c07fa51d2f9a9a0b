//! Payment Distributor (spec §4.5): turns one incoming payment into bill
//! allocations, a credit-balance update, and a [`TransactionRecord`], all
//! landing in a single atomic commit.
//!
//! Planning is pure ([`plan::build_plan`]); this module is the I/O shell
//! around it — load outstanding bills and the credit balance, build a
//! plan, mutate the loaded documents to match it, and commit once. A
//! `Conflict` from the store is retried a bounded number of times before
//! surfacing as [`BillingError::PaymentConflict`] (spec §4.5.8).

pub mod plan;
pub mod reversal;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::context::ServiceContext;
use crate::credit_service::{apply_change_to_record, ApplyChangeRequest};
use crate::domain::credit::{CreditBalanceRecord, CreditHistoryType};
use crate::domain::period::{BillModule, BillPeriodDocument, BillStatus, PaymentAllocationRecord};
use crate::domain::transaction::{Allocation, AllocationTarget, TransactionRecord, TransactionType};
use crate::errors::{BillingError, Result};
use crate::money::Money;
use crate::notification::Receipt;
use crate::store::SetOptions;

use plan::{build_plan, OutstandingBill};

const MAX_COMMIT_ATTEMPTS: u32 = 3;

pub struct RecordPaymentRequest {
    pub client_id: String,
    pub unit_id: String,
    pub module: BillModule,
    pub amount: Money,
    /// When the payment was actually made; drives the backdated-payment
    /// virtual penalty recalculation (spec §4.5.4). Distinct from
    /// `ctx.now()`, which is only used for audit/notification timestamps.
    pub payment_date: DateTime<Utc>,
    pub account_id: String,
    pub payment_method: String,
    pub notes: String,
}

fn bills_prefix(client_id: &str, module: BillModule) -> String {
    match module {
        BillModule::Water => format!("/clients/{client_id}/projects/waterBills/bills/"),
        BillModule::Hoa => format!("/clients/{client_id}/projects/hoaDues/bills/"),
    }
}

async fn load_outstanding_bills(
    ctx: &ServiceContext,
    client_id: &str,
    module: BillModule,
    unit_id: &str,
) -> Result<Vec<(BillPeriodDocument, OutstandingBill)>> {
    let prefix = bills_prefix(client_id, module);
    let docs = ctx
        .store
        .list(&prefix, crate::store::ListOptions { prefix: Some(prefix.clone()), cursor: None, limit: None })
        .await?;

    let mut loaded = Vec::new();
    for (path, raw) in docs {
        let bill = BillPeriodDocument::parse(&path, raw)?;
        let Some(entry) = bill.units.get(unit_id) else { continue };
        if entry.status == BillStatus::Paid {
            continue;
        }
        let outstanding = OutstandingBill {
            period_id: bill.period_id.clone(),
            due_date: bill.due_date,
            penalty_config: bill.config_snapshot.penalty,
            entry: entry.clone(),
        };
        loaded.push((bill, outstanding));
    }
    loaded.sort_by_key(|(_, o)| o.due_date);
    Ok(loaded)
}

/// Apply one payment across a unit's outstanding bills, updating credit
/// balance and writing the transaction record, atomically (spec §4.5).
#[instrument(skip(ctx, request))]
pub async fn record_payment(ctx: &ServiceContext, request: RecordPaymentRequest) -> Result<TransactionRecord> {
    let RecordPaymentRequest {
        client_id,
        unit_id,
        module,
        amount,
        payment_date,
        account_id,
        payment_method,
        notes,
    } = request;

    if !amount.is_positive() {
        return Err(BillingError::validation("payment amount must be positive"));
    }

    let as_of_date = payment_date.date_naive();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut loaded = load_outstanding_bills(ctx, &client_id, module, &unit_id).await?;
        loaded.sort_by_key(|(doc, _)| doc.due_date);

        let credit_path = CreditBalanceRecord::store_path(&client_id);
        let mut credit_record: CreditBalanceRecord = ctx
            .store
            .get_raw(&credit_path)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e: serde_json::Error| BillingError::validation(format!("malformed credit balance {credit_path}: {e}")))?
            .unwrap_or_else(|| CreditBalanceRecord { client_id: client_id.clone(), units: Default::default() });
        let credit_available = credit_record.balance_for(&unit_id);

        // spec §4.5.5: existing account credit is applied automatically to
        // cover any shortfall, never gated behind caller opt-in.
        let outstanding: Vec<OutstandingBill> = loaded.iter().map(|(_, o)| o.clone()).collect();
        let plan = build_plan(&outstanding, amount, credit_available, true, as_of_date);

        let transaction_id = Uuid::new_v4().to_string();
        let mut allocations = Vec::new();
        for alloc in &plan.allocations {
            allocations.push(Allocation::Bill {
                bill_period_id: alloc.period_id.clone(),
                target: alloc.target,
                amount: alloc.amount,
            });
        }
        if plan.overpayment_to_credit.is_positive() {
            allocations.push(Allocation::AccountCredit { amount: plan.overpayment_to_credit });
        }

        let transaction = TransactionRecord {
            id: transaction_id.clone(),
            client_id: client_id.clone(),
            unit_id: unit_id.clone(),
            module,
            date: payment_date,
            amount: amount + plan.credit_used,
            cash_received: amount,
            credit_used: plan.credit_used,
            transaction_type: TransactionType::Income,
            account_id: account_id.clone(),
            payment_method: payment_method.clone(),
            notes: notes.clone(),
            allocations,
            metadata: serde_json::Value::Null,
            reversed: false,
        };
        if !transaction.allocations_balance() {
            return Err(BillingError::permanent("payment allocations do not sum to the payment amount"));
        }

        let mut batch = ctx.store.batch();

        for (doc, outstanding) in &loaded {
            let mut doc = doc.clone();
            let Some(entry) = doc.units.get_mut(&unit_id) else { continue };
            if let Some((_, recomputed)) = plan.recomputed_penalties.iter().find(|(id, _)| id == &outstanding.period_id) {
                entry.penalty_amount = *recomputed;
            }
            let base_applied: Money = plan
                .allocations
                .iter()
                .filter(|a| a.period_id == outstanding.period_id && a.target == AllocationTarget::Base)
                .map(|a| a.amount)
                .sum();
            let penalty_applied: Money = plan
                .allocations
                .iter()
                .filter(|a| a.period_id == outstanding.period_id && a.target == AllocationTarget::Penalty)
                .map(|a| a.amount)
                .sum();
            if base_applied.is_zero() && penalty_applied.is_zero() {
                continue;
            }
            entry.base_paid += base_applied;
            entry.penalty_paid += penalty_applied;
            entry.payments.push(PaymentAllocationRecord {
                transaction_id: transaction_id.clone(),
                base: base_applied,
                penalty: penalty_applied,
                timestamp: payment_date,
            });
            entry.recompute_derived();

            let path = BillPeriodDocument::store_path(&client_id, module, &doc.period_id);
            let value = serde_json::to_value(&doc)
                .map_err(|e| BillingError::permanent(format!("encode {path}: {e}")))?;
            batch.set(path, value, SetOptions::default());
        }

        if plan.credit_used.is_positive() {
            apply_change_to_record(
                &mut credit_record,
                &ApplyChangeRequest {
                    unit_id: unit_id.clone(),
                    amount: -plan.credit_used,
                    entry_type: CreditHistoryType::CreditUsed,
                    transaction_id: Some(transaction_id.clone()),
                    notes: format!("applied to {} bill(s)", loaded.len()),
                },
                ctx.now(),
            )?;
        }
        if plan.overpayment_to_credit.is_positive() {
            apply_change_to_record(
                &mut credit_record,
                &ApplyChangeRequest {
                    unit_id: unit_id.clone(),
                    amount: plan.overpayment_to_credit,
                    entry_type: CreditHistoryType::CreditAdded,
                    transaction_id: Some(transaction_id.clone()),
                    notes: "overpayment captured as account credit".to_string(),
                },
                ctx.now(),
            )?;
        }
        if plan.credit_used.is_positive() || plan.overpayment_to_credit.is_positive() {
            let value = serde_json::to_value(&credit_record)
                .map_err(|e| BillingError::permanent(format!("encode {credit_path}: {e}")))?;
            batch.set(credit_path.clone(), value, SetOptions::default());
        }

        let txn_path = TransactionRecord::store_path(&client_id, &transaction_id);
        let txn_value = serde_json::to_value(&transaction)
            .map_err(|e| BillingError::permanent(format!("encode {txn_path}: {e}")))?;
        batch.set(txn_path, txn_value, SetOptions::default());

        match batch.commit().await {
            Ok(()) => {
                ctx.audit
                    .record(AuditEntry {
                        timestamp: ctx.now(),
                        module: "payments".to_string(),
                        action: "record_payment".to_string(),
                        parent_path: format!("/clients/{client_id}/transactions"),
                        doc_id: transaction_id.clone(),
                        friendly_name: format!("{unit_id} payment {transaction_id}"),
                        notes: String::new(),
                        user_id: None,
                    })
                    .await;
                ctx.notifier
                    .send_receipt(Receipt {
                        to: String::new(),
                        cc: vec![],
                        subject: "Payment received".to_string(),
                        unit_id: unit_id.clone(),
                        amount,
                        transaction_id: transaction_id.clone(),
                    })
                    .await;
                return Ok(transaction);
            }
            Err(err) => {
                let billing_err: BillingError = err.into();
                if matches!(billing_err, BillingError::Conflict { .. }) && attempt < MAX_COMMIT_ATTEMPTS {
                    continue;
                }
                if matches!(billing_err, BillingError::Conflict { .. }) {
                    return Err(BillingError::PaymentConflict { unit_id });
                }
                return Err(billing_err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, HoaDuesConfig, PenaltyConfig, WaterBillsConfig};
    use crate::domain::reading::{ReadingPeriodDocument, UnitReading};
    use crate::money::Rate;
    use crate::store::memory::InMemoryStore;
    use chrono::TimeZone;
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
            hoa_dues: Some(HoaDuesConfig {
                quarterly_amount: Money::from_pesos_str("1500.00").unwrap(),
                penalty: PenaltyConfig { rate: Rate::from_percentage(dec!(5)), grace_period_days: 15 },
            }),
        }
    }

    #[tokio::test]
    async fn full_payment_marks_bill_paid_and_records_transaction() {
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

        let amount = Money::from_pesos_str("370.00").unwrap();
        let txn = record_payment(
            &ctx,
            RecordPaymentRequest {
                client_id: "acme".to_string(),
                unit_id: "101".to_string(),
                module: BillModule::Water,
                amount,
                payment_date: Utc.with_ymd_and_hms(2025, 7, 5, 12, 0, 0).unwrap(),
                account_id: "acct-1".to_string(),
                payment_method: "transfer".to_string(),
                notes: String::new(),
            },
        )
        .await
        .unwrap();

        assert!(txn.allocations_balance());
        assert_eq!(txn.amount, amount);

        let raw = ctx.store.get_raw(&BillPeriodDocument::store_path("acme", BillModule::Water, "2026-00")).await.unwrap().unwrap();
        let bill: BillPeriodDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(bill.units["101"].status, BillStatus::Paid);
    }

    #[tokio::test]
    async fn overpayment_is_recorded_as_account_credit() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ServiceContext::test_at(store, Utc::now());
        let config = client_config();
        let roster = crate::domain::reading::Roster {
            client_id: "acme".to_string(),
            period_id: "2026-Q1".to_string(),
            units: vec!["101".to_string()],
        };
        let bill_date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        crate::bill_generator::generate_dues(&ctx, &config, &roster, bill_date, false).await.unwrap();

        let txn = record_payment(
            &ctx,
            RecordPaymentRequest {
                client_id: "acme".to_string(),
                unit_id: "101".to_string(),
                module: BillModule::Hoa,
                amount: Money::from_pesos_str("2000.00").unwrap(),
                payment_date: Utc.with_ymd_and_hms(2025, 7, 5, 12, 0, 0).unwrap(),
                account_id: "acct-1".to_string(),
                payment_method: "cash".to_string(),
                notes: String::new(),
            },
        )
        .await
        .unwrap();

        let has_credit_alloc = txn.allocations.iter().any(|a| matches!(a, Allocation::AccountCredit { amount } if *amount == Money::from_pesos_str("500.00").unwrap()));
        assert!(has_credit_alloc);

        let raw = ctx.store.get_raw(&CreditBalanceRecord::store_path("acme")).await.unwrap().unwrap();
        let record: CreditBalanceRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.balance_for("101"), Money::from_pesos_str("500.00").unwrap());
    }

    #[tokio::test]
    async fn rejects_non_positive_payment() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = ServiceContext::test_at(store, Utc::now());
        let err = record_payment(
            &ctx,
            RecordPaymentRequest {
                client_id: "acme".to_string(),
                unit_id: "101".to_string(),
                module: BillModule::Water,
                amount: Money::ZERO,
                payment_date: Utc::now(),
                account_id: "acct-1".to_string(),
                payment_method: "cash".to_string(),
                notes: String::new(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));
    }
}
