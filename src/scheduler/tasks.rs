//! The three nightly tasks and the external collaborators they call
//! through (spec §4.7, §6.3). Each task is a [`ScheduledTask`]
//! implementation so the scheduler loop is a plain sequence over
//! `Vec<Box<dyn ScheduledTask>>` — no fan-out, matching the
//! "callback-free sequencing" redesign flag (spec §9).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::PenaltyConfig;
use crate::context::ServiceContext;
use crate::domain::period::BillModule;
use crate::errors::Result;
use crate::penalty;

#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &'static str;
    fn timeout(&self) -> Duration;
    async fn run(&self, ctx: &ServiceContext) -> Result<()>;
}

/// spec §6.3: "receives typed tarballs; fully asynchronous to the billing
/// commit path." Out of scope to implement for real; this is the contract
/// boundary a concrete object-storage adapter would satisfy.
#[async_trait]
pub trait BackupSink: Send + Sync {
    async fn export(&self, client_id: &str, as_of: DateTime<Utc>) -> Result<()>;
}

pub struct NoopBackupSink;

#[async_trait]
impl BackupSink for NoopBackupSink {
    async fn export(&self, _client_id: &str, _as_of: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
}

/// spec §1/§6.3: Banxico/DOF/OpenExchangeRates are external collaborators;
/// we specify only this contract, never a concrete HTTP client.
#[derive(Debug, Clone)]
pub struct RateDocument {
    pub date: NaiveDate,
    pub rates: HashMap<String, Decimal>,
}

#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    async fn fetch_rate(&self, date: NaiveDate) -> Result<RateDocument>;
}

/// **[SUPPLEMENT]** spec §4.7: "sync to a secondary environment if
/// configured." Best-effort: failure is recorded on the task outcome but
/// never flips the exchange-rate task to failed, since the primary write
/// already succeeded (see [`ExchangeRateTask::run`]).
#[async_trait]
pub trait SecondarySync: Send + Sync {
    async fn push_rate(&self, doc: &RateDocument) -> Result<()>;
}

/// spec §4.7 task 1: "export all client collections touched by the core."
pub struct BackupTask {
    pub sink: std::sync::Arc<dyn BackupSink>,
    pub client_ids: Vec<String>,
}

#[async_trait]
impl ScheduledTask for BackupTask {
    fn name(&self) -> &'static str {
        "backup"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(8 * 60)
    }

    async fn run(&self, ctx: &ServiceContext) -> Result<()> {
        let as_of = ctx.now();
        for client_id in &self.client_ids {
            self.sink.export(client_id, as_of).await?;
        }
        Ok(())
    }
}

/// spec §4.7 task 2: "invoke the Penalty Engine refresh pass across all
/// clients." Idempotent; safe to re-run (spec §4.3, §8).
pub struct PenaltyRefreshTask {
    pub clients: Vec<(String, BillModule, PenaltyConfig)>,
    pub as_of_date: NaiveDate,
    pub cancel: CancellationToken,
}

#[async_trait]
impl ScheduledTask for PenaltyRefreshTask {
    fn name(&self) -> &'static str {
        "penalty_refresh"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn run(&self, ctx: &ServiceContext) -> Result<()> {
        for (client_id, module, penalty_config) in &self.clients {
            penalty::refresh_all(ctx, client_id, *module, penalty_config, self.as_of_date, &self.cancel).await?;
            if self.cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }
}

/// spec §4.7 task 3: fetch and persist the day's exchange rate, then
/// best-effort sync it to a secondary environment.
pub struct ExchangeRateTask {
    pub provider: std::sync::Arc<dyn ExchangeRateProvider>,
    pub secondary: Option<std::sync::Arc<dyn SecondarySync>>,
    pub date: NaiveDate,
}

fn rate_doc_path(date: NaiveDate) -> String {
    format!("/system/exchangeRates/{date}")
}

#[async_trait]
impl ScheduledTask for ExchangeRateTask {
    fn name(&self) -> &'static str {
        "exchange_rate"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2 * 60)
    }

    async fn run(&self, ctx: &ServiceContext) -> Result<()> {
        let doc = self.provider.fetch_rate(self.date).await?;

        let path = rate_doc_path(self.date);
        let value = serde_json::to_value(&RateDocJson { date: doc.date, rates: doc.rates.clone() })
            .map_err(|e| crate::errors::BillingError::permanent(format!("encode {path}: {e}")))?;
        let mut batch = ctx.store.batch();
        batch.set(path, value, crate::store::SetOptions::default());
        batch.commit().await?;

        if let Some(secondary) = &self.secondary {
            if let Err(err) = secondary.push_rate(&doc).await {
                warn!(%err, "secondary exchange-rate sync failed; primary write already succeeded");
            }
        }
        Ok(())
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RateDocJson {
    date: NaiveDate,
    rates: HashMap<String, Decimal>,
}
