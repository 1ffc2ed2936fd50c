//! Error types.

use crate::dns_provider::DnsError;
use crate::store::{BundleError, StoreError};
use std::net::IpAddr;

/// Error enumerates the process-level Cert Crab error states: loading configuration, preparing
/// the certificate store and serving the [admin API][crate::api].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when the configuration is syntactically valid JSON but semantically unusable,
    /// e.g. an empty [`Config::domain`][`crate::config::Config::domain`] or a zero renewal
    /// threshold.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Returned when neither the config file nor the `DP_Id`/`DP_Key` environment variables
    /// provide DNSPod API credentials.
    #[error("DNSPod API credentials are not configured")]
    MissingDnsCredentials,

    /// Returned when the [`Config::api_bind_addr`][`crate::config::Config::api_bind_addr`] is
    /// not a loopback address, or an address within a private network space. The admin API can
    /// force a certificate renewal and must never be exposed publicly.
    #[error("API bind address ({0}) must be a loopback or private IP")]
    InsecureAPIBind(IpAddr),

    /// Returned when a forced renewal triggered through the [admin API][crate::api] fails.
    /// The reason has already been logged by the orchestrator.
    #[error("certificate renewal failed")]
    RenewalFailed,

    /// Returned when the certificate store can't be prepared or read at startup.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    IO(#[from] std::io::Error),

    /// Returned when [loading a `Config`][crate::config::Config::try_from_file] fails due to
    /// invalid JSON content.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),
}

/// The classified outcome of a failed [issuance attempt][crate::issuance::Issuer::issue].
///
/// Every variant is produced at the orchestrator boundary after DNS cleanup has been attempted,
/// so callers never need to release challenge records themselves.
#[derive(thiserror::Error, Debug)]
pub enum IssueError {
    /// The ACME account could not be registered or reloaded.
    #[error("ACME account error")]
    Account(#[source] anyhow::Error),

    /// The order could not be created, or its authorizations/challenges could not be retrieved.
    #[error("ACME order error: {0:#}")]
    Order(#[source] anyhow::Error),

    /// A TXT record for `identifier` could not be created at the DNS provider.
    #[error("failed to provision DNS-01 record for \"{identifier}\"")]
    DnsProvision {
        identifier: String,
        #[source]
        source: DnsError,
    },

    /// Polling exhausted every attempt without the challenge for `identifier` becoming valid.
    #[error("validation of \"{identifier}\" timed out after {attempts} attempts")]
    ValidationTimeout { identifier: String, attempts: u32 },

    /// The ACME server marked the challenge for `identifier` invalid.
    #[error("validation of \"{identifier}\" was rejected")]
    ValidationRejected { identifier: String },

    /// Key, CSR or certificate bundle generation failed, or the CA refused to issue.
    #[error("certificate generation failed: {0:#}")]
    CertGeneration(#[source] anyhow::Error),

    /// The issued certificate could not be written to the certificate store.
    #[error("failed to persist certificate")]
    Persistence(#[from] StoreError),

    /// A polling-call error that is swallowed and retried. Only ever logged from inside the
    /// validation loop; [`Issuer::issue`][crate::issuance::Issuer::issue] never returns it.
    #[error("transient ACME error: {0:#}")]
    TransientRetryable(#[source] anyhow::Error),

    /// Process shutdown was requested while the attempt was in flight.
    #[error("issuance cancelled by shutdown")]
    Cancelled,
}

impl From<BundleError> for IssueError {
    fn from(err: BundleError) -> Self {
        IssueError::CertGeneration(err.into())
    }
}
