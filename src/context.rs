//! Explicit service context threaded through every public operation,
//! replacing the module-level mutable globals the source relied on for DB
//! handles and import progress (spec §9 redesign flag).
//!
//! No component reaches for ambient state: a `Store`, a clock, an audit
//! sink, and a notification sink all arrive as constructor/method
//! arguments via this struct.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::audit::{AuditSink, NoopAuditSink};
use crate::clock::{SafeTimeProvider, TimeSource};
use crate::notification::{NoopNotificationSink, NotificationSink};
use crate::store::Store;

#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn Store>,
    pub clock: SafeTimeProvider,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl ServiceContext {
    pub fn new(
        store: Arc<dyn Store>,
        clock: SafeTimeProvider,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        ServiceContext { store, clock, audit, notifier }
    }

    /// Production context: system clock, no-op audit/notification sinks.
    /// Callers that want real audit persistence construct one themselves
    /// with a store-backed `AuditSink`.
    pub fn production(store: Arc<dyn Store>) -> Self {
        ServiceContext {
            store,
            clock: SafeTimeProvider::new(TimeSource::System),
            audit: Arc::new(NoopAuditSink),
            notifier: Arc::new(NoopNotificationSink),
        }
    }

    /// Test context over a fixed instant; panics are never expected here
    /// since `TimeSource::Test` always constructs successfully.
    pub fn test_at(store: Arc<dyn Store>, instant: DateTime<Utc>) -> Self {
        init_test_tracing();
        ServiceContext {
            store,
            clock: SafeTimeProvider::new(TimeSource::Test(instant)),
            audit: Arc::new(NoopAuditSink),
            notifier: Arc::new(NoopNotificationSink),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Installs a `tracing` subscriber for test output, filtered by `RUST_LOG`
/// (defaults to `off` so normal test runs stay quiet). `try_init` no-ops if
/// a subscriber is already installed, so every test calling
/// [`ServiceContext::test_at`] can wire this in without double-init panics.
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "off".into()))
        .with_test_writer()
        .try_init();
}
