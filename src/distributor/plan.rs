//! Pure payment-allocation planning (spec §4.5.2–§4.5.6).
//!
//! [`build_plan`] never touches the store: it takes already-loaded bill
//! entries and a credit balance and returns what *should* happen, so the
//! allocation algorithm itself is covered by ordinary unit tests instead of
//! needing a store fixture for every case.

use chrono::NaiveDate;

use crate::config::PenaltyConfig;
use crate::domain::period::{BillStatus, UnitBillEntry};
use crate::domain::transaction::AllocationTarget;
use crate::money::Money;
use crate::penalty::{self, PenaltyInputs};

/// One bill's unit entry plus the identifiers the plan needs to report back
/// which period and module it touched.
#[derive(Debug, Clone)]
pub struct OutstandingBill {
    pub period_id: String,
    pub due_date: NaiveDate,
    pub penalty_config: PenaltyConfig,
    pub entry: UnitBillEntry,
}

/// Which pool of funds an allocation was drawn from. Only `Cash` allocations
/// belong in the payment's own `TransactionRecord` (spec §3 allocation
/// conservation: `sum(allocations.amount) == transaction.amount`); `Credit`
/// allocations are funded by the unit's account credit and surface only in
/// the credit history (spec §4.5.6), not the cash transaction's allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationSource {
    Cash,
    Credit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAllocation {
    pub period_id: String,
    pub target: AllocationTarget,
    pub amount: Money,
    pub source: AllocationSource,
}

/// What a payment should do, computed without touching the store (spec
/// §4.5.2: oldest bill first, base before penalty within a bill).
#[derive(Debug, Clone, Default)]
pub struct PaymentPlan {
    pub allocations: Vec<PlannedAllocation>,
    /// Per-bill recomputed penalty, keyed by `period_id` — callers apply
    /// this alongside `allocations` so a backdated payment's virtual
    /// penalty recalculation (spec §4.5.4) lands even for bills that don't
    /// receive a penalty allocation this time.
    pub recomputed_penalties: Vec<(String, Money)>,
    pub credit_used: Money,
    pub overpayment_to_credit: Money,
    pub remaining_unpaid: Money,
}

/// Distribute `payment_amount` (plus, if `use_credit`, existing account
/// credit) across `bills` oldest-due-date-first, applying each bill's base
/// charge before its penalty (spec §4.5.2–§4.5.3). `as_of_date` drives a
/// virtual penalty recalculation per bill before allocating against it,
/// so a backdated payment is charged the penalty that applied on the date
/// it was actually made rather than whatever is currently stored (spec
/// §4.5.4). Any amount left over once every bill is paid in full becomes
/// account credit (spec §4.5.5); any shortfall remains unpaid.
///
/// `bills` must already be sorted oldest-due-date-first; this function
/// does not sort, since callers load bills from the store in a prefix
/// scan whose order depends on period-id string layout, not due date.
pub fn build_plan(
    bills: &[OutstandingBill],
    payment_amount: Money,
    credit_available: Money,
    use_credit: bool,
    as_of_date: NaiveDate,
) -> PaymentPlan {
    let mut plan = PaymentPlan::default();
    let mut available = payment_amount;
    let mut credit_used = Money::ZERO;

    for bill in bills {
        if bill.entry.status == BillStatus::Paid {
            continue;
        }

        let inputs = PenaltyInputs {
            current_charge: bill.entry.current_charge,
            base_paid: bill.entry.base_paid,
            stored_penalty_amount: bill.entry.penalty_amount,
            penalty_paid: bill.entry.penalty_paid,
            due_date: bill.due_date,
        };
        let recomputed = penalty::compute_accrued_penalty(&inputs, &bill.penalty_config, as_of_date);
        plan.recomputed_penalties.push((bill.period_id.clone(), recomputed));

        let base_owed = (bill.entry.current_charge - bill.entry.base_paid).non_negative();
        let penalty_owed = (recomputed - bill.entry.penalty_paid).non_negative();

        // base first
        if base_owed.is_positive() {
            let use_amount = available.min(base_owed);
            if use_amount.is_positive() {
                plan.allocations.push(PlannedAllocation {
                    period_id: bill.period_id.clone(),
                    target: AllocationTarget::Base,
                    amount: use_amount,
                    source: AllocationSource::Cash,
                });
                available -= use_amount;
            }
        }
        if available.is_zero() && !use_credit {
            continue;
        }

        let base_still_owed = base_owed - plan.bill_allocated(&bill.period_id, AllocationTarget::Base);
        if base_still_owed.is_positive() && use_credit {
            let from_credit = (credit_available - credit_used).non_negative().min(base_still_owed);
            if from_credit.is_positive() {
                plan.allocations.push(PlannedAllocation {
                    period_id: bill.period_id.clone(),
                    target: AllocationTarget::Base,
                    amount: from_credit,
                    source: AllocationSource::Credit,
                });
                credit_used += from_credit;
            }
        }

        // penalty second, only once base is fully covered by payment + credit
        let base_now_owed = base_owed - plan.bill_allocated(&bill.period_id, AllocationTarget::Base);
        if base_now_owed.is_zero() && penalty_owed.is_positive() {
            let use_amount = available.min(penalty_owed);
            if use_amount.is_positive() {
                plan.allocations.push(PlannedAllocation {
                    period_id: bill.period_id.clone(),
                    target: AllocationTarget::Penalty,
                    amount: use_amount,
                    source: AllocationSource::Cash,
                });
                available -= use_amount;
            }
            let penalty_still_owed = penalty_owed - plan.bill_allocated(&bill.period_id, AllocationTarget::Penalty);
            if penalty_still_owed.is_positive() && use_credit {
                let from_credit = (credit_available - credit_used).non_negative().min(penalty_still_owed);
                if from_credit.is_positive() {
                    plan.allocations.push(PlannedAllocation {
                        period_id: bill.period_id.clone(),
                        target: AllocationTarget::Penalty,
                        amount: from_credit,
                        source: AllocationSource::Credit,
                    });
                    credit_used += from_credit;
                }
            }
        }
    }

    plan.credit_used = credit_used;
    plan.overpayment_to_credit = available;
    plan.remaining_unpaid = bills
        .iter()
        .map(|b| {
            let allocated_base = plan.bill_allocated(&b.period_id, AllocationTarget::Base);
            let allocated_penalty = plan.bill_allocated(&b.period_id, AllocationTarget::Penalty);
            let recomputed_penalty = plan
                .recomputed_penalties
                .iter()
                .find(|(id, _)| id == &b.period_id)
                .map(|(_, p)| *p)
                .unwrap_or(b.entry.penalty_amount);
            let base_owed = (b.entry.current_charge - b.entry.base_paid - allocated_base).non_negative();
            let penalty_owed = (recomputed_penalty - b.entry.penalty_paid - allocated_penalty).non_negative();
            base_owed + penalty_owed
        })
        .sum();

    plan
}

impl PaymentPlan {
    fn bill_allocated(&self, period_id: &str, target: AllocationTarget) -> Money {
        self.allocations
            .iter()
            .filter(|a| a.period_id == period_id && a.target == target)
            .map(|a| a.amount)
            .sum()
    }

    /// Allocations drawn from the payment's own cash, keyed by period and
    /// target — the only allocations that belong in this payment's
    /// `TransactionRecord` (see [`AllocationSource`]).
    pub fn cash_allocations(&self) -> impl Iterator<Item = &PlannedAllocation> {
        self.allocations.iter().filter(|a| a.source == AllocationSource::Cash)
    }

    /// Allocations drawn from existing account credit rather than this
    /// payment's cash.
    pub fn credit_allocations(&self) -> impl Iterator<Item = &PlannedAllocation> {
        self.allocations.iter().filter(|a| a.source == AllocationSource::Credit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Rate;
    use rust_decimal_macros::dec;

    fn penalty_config() -> PenaltyConfig {
        PenaltyConfig { rate: Rate::from_percentage(dec!(5)), grace_period_days: 10 }
    }

    fn bill(period_id: &str, due_date: NaiveDate, current_charge: i64, base_paid: i64) -> OutstandingBill {
        let mut entry = UnitBillEntry {
            prior_reading: None,
            current_reading: None,
            consumption: None,
            current_charge: Money::from_centavos(current_charge),
            penalty_amount: Money::ZERO,
            paid_amount: Money::ZERO,
            base_paid: Money::from_centavos(base_paid),
            penalty_paid: Money::ZERO,
            status: BillStatus::Unpaid,
            payments: vec![],
            last_penalty_update: None,
            needs_review: false,
        };
        entry.recompute_derived();
        OutstandingBill { period_id: period_id.to_string(), due_date, penalty_config: penalty_config(), entry }
    }

    #[test]
    fn pays_oldest_bill_first() {
        let bills = vec![
            bill("2026-01", NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(), 100000, 0),
            bill("2026-00", NaiveDate::from_ymd_opt(2025, 8, 10).unwrap(), 100000, 0),
        ];
        let plan = build_plan(&bills, Money::from_centavos(100000), Money::ZERO, false, NaiveDate::from_ymd_opt(2025, 8, 15).unwrap());
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].period_id, "2026-00");
        assert_eq!(plan.remaining_unpaid, Money::from_centavos(100000));
    }

    #[test]
    fn pays_base_before_penalty_within_a_bill() {
        let mut b = bill("2026-00", NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(), 100000, 0);
        b.entry.penalty_amount = Money::from_centavos(5000);
        b.entry.recompute_derived();
        let bills = vec![b];
        let plan = build_plan(&bills, Money::from_centavos(60000), Money::ZERO, false, NaiveDate::from_ymd_opt(2025, 7, 10).unwrap());
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].target, AllocationTarget::Base);
        assert_eq!(plan.allocations[0].amount, Money::from_centavos(60000));
    }

    #[test]
    fn overpayment_flows_to_account_credit() {
        let bills = vec![bill("2026-00", NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(), 100000, 0)];
        let plan = build_plan(&bills, Money::from_centavos(150000), Money::ZERO, false, NaiveDate::from_ymd_opt(2025, 7, 10).unwrap());
        assert_eq!(plan.overpayment_to_credit, Money::from_centavos(50000));
        assert_eq!(plan.remaining_unpaid, Money::ZERO);
    }

    #[test]
    fn shortfall_covered_by_credit_when_requested() {
        let bills = vec![bill("2026-00", NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(), 100000, 0)];
        let plan = build_plan(&bills, Money::from_centavos(60000), Money::from_centavos(40000), true, NaiveDate::from_ymd_opt(2025, 7, 10).unwrap());
        assert_eq!(plan.credit_used, Money::from_centavos(40000));
        assert_eq!(plan.remaining_unpaid, Money::ZERO);
    }

    #[test]
    fn scenario_s1_basic_two_period_payment() {
        // currentCharge=90000, penaltyAmount=0, paidAmount=0, credit=0,
        // payment=100000 on 2025-08-05, due 2025-08-10 (not yet late).
        let bills = vec![bill("2026-00", NaiveDate::from_ymd_opt(2025, 8, 10).unwrap(), 90000, 0)];
        let plan = build_plan(
            &bills,
            Money::from_centavos(100000),
            Money::ZERO,
            true,
            NaiveDate::from_ymd_opt(2025, 8, 5).unwrap(),
        );
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.allocations[0].period_id, "2026-00");
        assert_eq!(plan.allocations[0].target, AllocationTarget::Base);
        assert_eq!(plan.allocations[0].amount, Money::from_centavos(90000));
        assert_eq!(plan.credit_used, Money::ZERO);
        assert_eq!(plan.overpayment_to_credit, Money::from_centavos(10000));
        assert_eq!(plan.remaining_unpaid, Money::ZERO);
    }

    #[test]
    fn scenario_s2_oldest_first_across_two_bills() {
        // 2026-00: currentCharge=50000; 2026-01: currentCharge=60000; both
        // not yet late as of the payment date. Pay 80000.
        let bills = vec![
            bill("2026-00", NaiveDate::from_ymd_opt(2025, 8, 20).unwrap(), 50000, 0),
            bill("2026-01", NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(), 60000, 0),
        ];
        let plan = build_plan(
            &bills,
            Money::from_centavos(80000),
            Money::ZERO,
            true,
            NaiveDate::from_ymd_opt(2025, 8, 15).unwrap(),
        );
        assert_eq!(plan.allocations.len(), 2);
        assert_eq!(plan.allocations[0].period_id, "2026-00");
        assert_eq!(plan.allocations[0].amount, Money::from_centavos(50000));
        assert_eq!(plan.allocations[1].period_id, "2026-01");
        assert_eq!(plan.allocations[1].amount, Money::from_centavos(30000));
        assert_eq!(plan.credit_used, Money::ZERO);
        assert_eq!(plan.overpayment_to_credit, Money::ZERO);
        assert_eq!(plan.remaining_unpaid, Money::from_centavos(30000));
    }

    #[test]
    fn scenario_s5_credit_consumption() {
        // currentCharge=90000, credit=30000, pay 70000. Shortfall 20000
        // covered from credit, leaving the bill paid and 10000 of credit.
        let bills = vec![bill("2026-00", NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(), 90000, 0)];
        let plan = build_plan(
            &bills,
            Money::from_centavos(70000),
            Money::from_centavos(30000),
            true,
            NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        );
        assert_eq!(plan.credit_used, Money::from_centavos(20000));
        assert_eq!(plan.overpayment_to_credit, Money::ZERO);
        assert_eq!(plan.remaining_unpaid, Money::ZERO);
    }

    #[test]
    fn backdated_payment_recomputes_virtual_penalty() {
        let bill = bill("2026-00", NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(), 100000, 0);
        let bills = vec![bill];
        // paid as of a date well past due: penalty should accrue before allocation.
        let plan = build_plan(&bills, Money::from_centavos(200000), Money::ZERO, false, NaiveDate::from_ymd_opt(2025, 11, 10).unwrap());
        let (_, recomputed) = &plan.recomputed_penalties[0];
        assert!(recomputed.is_positive());
        assert_eq!(plan.remaining_unpaid, Money::ZERO);
    }
}
