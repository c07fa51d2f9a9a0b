//! Stored document shapes (spec §3). Every type here round-trips through
//! `serde_json::Value` via the store abstraction; enums are tagged rather
//! than inferred from presence/absence of fields, per the "dynamically
//! typed record shapes" redesign flag (spec §9).

pub mod aggregation;
pub mod backup_run;
pub mod credit;
pub mod period;
pub mod reading;
pub mod transaction;

pub use aggregation::{AggregatedViewDocument, MonthEntry, UnitSummary};
pub use backup_run::{BackupRunDocument, OverallStatus, TaskRunResult, TaskStatus};
pub use credit::{CreditBalanceRecord, CreditHistoryEntry, CreditHistoryType, UnitCreditBalance};
pub use period::{BillModule, BillPeriodDocument, BillStatus, PaymentAllocationRecord, UnitBillEntry};
pub use reading::{ReadingPeriodDocument, Roster, UnitReading};
pub use transaction::{Allocation, AllocationTarget, TransactionRecord, TransactionType};

/// A unit identifier within a client (e.g. `"101"`). Kept as a bare string
/// rather than a newtype: it's an external key supplied by readings/roster
/// imports, not something the billing core mints.
pub type UnitId = String;
