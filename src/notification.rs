//! Outbound receipt notification (spec §6.3 SMTP relay).
//!
//! Contract-only: the SMTP relay itself is out of scope (spec §1), so this
//! module defines the trait boundary a transport layer would implement.
//! Like `AuditSink`, it is best-effort and never couples to the commit
//! path (spec §9).

use async_trait::async_trait;

use crate::money::Money;

#[derive(Debug, Clone)]
pub struct Receipt {
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub unit_id: String,
    pub amount: Money,
    pub transaction_id: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_receipt(&self, receipt: Receipt);
}

pub struct NoopNotificationSink;

#[async_trait]
impl NotificationSink for NoopNotificationSink {
    async fn send_receipt(&self, _receipt: Receipt) {}
}

/// Collects receipts in memory for component tests that assert a receipt
/// was queued after a successful payment.
#[derive(Default)]
pub struct InMemoryNotificationSink {
    receipts: tokio::sync::Mutex<Vec<Receipt>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        InMemoryNotificationSink::default()
    }

    pub async fn receipts(&self) -> Vec<Receipt> {
        self.receipts.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn send_receipt(&self, receipt: Receipt) {
        self.receipts.lock().await.push(receipt);
    }
}
