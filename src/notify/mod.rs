//! Certificate renewal notifications.
//!
//! After every successful renewal the [scheduler][crate::renewal] emits one
//! [`CertificateRenewed`] event through a [`RenewalNotifier`]. Delivery is fire-and-forget: a
//! notifier must never block or fail the scheduler.
//!
//! [`BroadcastNotifier`] fans events out to any number of subscribers, e.g. the
//! [`/sse` endpoint][crate::api] streaming them to connected clients.

use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::debug;

/// Event name used on the wire.
pub const CERTIFICATE_RENEWED: &str = "certificate-renewed";

const CHANNEL_CAPACITY: usize = 16;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateRenewed {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "notBefore", with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    #[serde(rename = "notAfter", with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
}

#[allow(clippy::module_name_repetitions)]
pub type DynRenewalNotifier = Arc<dyn RenewalNotifier>;

#[allow(clippy::module_name_repetitions)]
pub trait RenewalNotifier: Send + Sync {
    fn certificate_renewed(&self, event: CertificateRenewed);
}

#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<CertificateRenewed>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl BroadcastNotifier {
    pub fn subscribe(&self) -> broadcast::Receiver<CertificateRenewed> {
        self.tx.subscribe()
    }
}

impl RenewalNotifier for BroadcastNotifier {
    fn certificate_renewed(&self, event: CertificateRenewed) {
        match self.tx.send(event) {
            Ok(listeners) => debug!(listeners, "{CERTIFICATE_RENEWED} broadcast"),
            Err(_) => debug!("{CERTIFICATE_RENEWED} dropped, nobody is listening"),
        }
    }
}
