//! DNS-01 challenge record provisioning.
//!
//! Supports a generic interface for creating and deleting the `TXT` records that carry
//! [RFC-8555][RFC-8555] [DNS-01] challenge response values at a remote DNS hosting provider.
//!
//! One implementation is provided, [`dnspod::DnspodClient`], speaking the DNSPod HTTP API.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4

use std::sync::Arc;

pub mod dnspod;

pub use dnspod::{DnspodClient, TxtRecord};

/// Provider-assigned identifier of a created TXT record, needed to delete it again.
pub type RecordId = String;

/// `DynDnsProvider` is a type alias for a [`DnsProvider`] shared between the orchestrator and
/// the per-attempt cleanup list.
#[allow(clippy::module_name_repetitions)]
pub type DynDnsProvider = Arc<dyn DnsProvider>;

#[derive(thiserror::Error, Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum DnsError {
    /// The request never produced a response (connection, TLS, timeout).
    #[error("DNS provider request failed")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success HTTP status.
    #[error("DNS provider returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The provider answered 2xx but the body was not the JSON document we expect.
    #[error("DNS provider returned an unparseable response: {0}")]
    InvalidResponse(String),

    /// The provider answered 2xx with a business-level failure code.
    #[error("DNS provider rejected the request (code {code}): {message}")]
    Rejected { code: String, message: String },
}

/// An async trait describing a DNS hosting provider able to publish and withdraw
/// [DNS-01] challenge `TXT` records for a zone.
///
/// [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
#[async_trait::async_trait]
pub trait DnsProvider: Send + Sync {
    /// Short provider name, used in logs.
    fn name(&self) -> &'static str;

    /// Create a `TXT` record named `sub_label` inside the `domain` zone, returning the
    /// provider's record id.
    async fn add_txt_record(
        &self,
        domain: &str,
        sub_label: &str,
        value: &str,
    ) -> Result<RecordId, DnsError>;

    /// Delete a record previously returned by [`DnsProvider::add_txt_record`].
    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> Result<(), DnsError>;
}
