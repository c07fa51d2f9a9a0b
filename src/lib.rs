pub mod aggregation;
pub mod audit;
pub mod bill_generator;
pub mod clock;
pub mod config;
pub mod context;
pub mod credit_service;
pub mod distributor;
pub mod domain;
pub mod errors;
pub mod money;
pub mod notification;
pub mod penalty;
pub mod scheduler;
pub mod store;

// re-export key types
pub use clock::{fiscal_month_index, fiscal_year_of, local_date, CLIENT_TIMEZONE};
pub use context::ServiceContext;
pub use errors::{BillingError, Result};
pub use money::{Money, Rate};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
