//! ACME protocol capabilities consumed by the [issuance orchestrator][crate::issuance].
//!
//! The orchestrator only needs a narrow slice of [RFC-8555][RFC-8555]: register an account,
//! open an order, read each authorization's [DNS-01] challenge, ask the server to validate it,
//! poll its status and finally exchange a CSR for a certificate chain. [`AcmeBackend`] and
//! [`AcmeOrder`] describe exactly that slice so the orchestrator's control flow can be driven
//! by a scripted backend in tests.
//!
//! [`InstantAcmeBackend`] implements both traits on top of [`instant_acme`].
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4

use std::fmt;
use std::sync::Arc;

pub mod instant;

pub use instant::InstantAcmeBackend;

#[allow(clippy::module_name_repetitions)]
pub type DynAcmeBackend = Arc<dyn AcmeBackend>;

/// Status of a single challenge as last reported by the ACME server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Processing => "processing",
            ChallengeStatus::Valid => "valid",
            ChallengeStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// The DNS-01 challenge of one authorization in an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsChallenge {
    /// The identifier being authorized, e.g. `example.com` or `*.example.com`.
    pub identifier: String,
    /// Challenge URL; unique within the order and used to address the challenge.
    pub url: String,
    /// The `TXT` record value: base64url SHA-256 digest of the key authorization.
    pub txt_value: String,
}

#[async_trait::async_trait]
pub trait AcmeBackend: Send + Sync {
    /// Register a new account for `contact_email`, or reuse the one registered earlier.
    async fn register_account(&self, contact_email: &str) -> anyhow::Result<()>;

    /// Create an order for `identifiers` with the registered account.
    async fn new_order(&self, identifiers: &[String]) -> anyhow::Result<Box<dyn AcmeOrder>>;
}

#[async_trait::async_trait]
pub trait AcmeOrder: Send {
    /// One DNS-01 challenge per authorization of the order.
    async fn dns_challenges(&mut self) -> anyhow::Result<Vec<DnsChallenge>>;

    /// Tell the server the challenge response is published and may be validated.
    async fn trigger_validation(&mut self, challenge: &DnsChallenge) -> anyhow::Result<()>;

    /// Fetch the current status of `challenge`.
    async fn challenge_status(&mut self, challenge: &DnsChallenge)
        -> anyhow::Result<ChallengeStatus>;

    /// Finalize the order with a DER encoded CSR and return the issued PEM certificate chain.
    async fn finalize(&mut self, csr_der: &[u8]) -> anyhow::Result<String>;
}
