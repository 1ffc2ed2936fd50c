//! Cert Crab
//!
//! Keeps a wildcard TLS certificate for a single domain issued and renewed through an
//! [RFC-8555][RFC-8555] ACME CA, answering [DNS-01] challenges by publishing `TXT` records at a
//! hosted DNS provider's HTTP API (DNSPod).
//!
//! The pieces, from the bottom up:
//!
//! * [`dns_provider`]: creates and deletes challenge `TXT` records.
//! * [`acme`]: the slice of the ACME protocol the orchestrator drives.
//! * [`store`]: PKCS#12 certificate bundles on disk.
//! * [`issuance`]: one end-to-end issuance attempt, with guaranteed challenge record cleanup.
//! * [`renewal`]: the background scheduler holding the current certificate.
//! * [`notify`]: `certificate-renewed` events for interested observers.
//! * [`api`]: a small admin HTTP API for status, forced renewal and event streaming.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//!
#![warn(clippy::pedantic)]

pub mod acme;
pub mod api;
pub mod config;
pub mod dns_provider;
pub mod error;
pub mod issuance;
pub mod notify;
pub mod renewal;
pub mod shutdown;
pub mod store;

pub use api::new as new_http;
pub use config::{Config, SharedConfig};
pub use issuance::Issuer;
pub use renewal::RenewalScheduler;
pub use store::CertificateStore;
