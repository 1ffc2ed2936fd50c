//! Issuance orchestrator.
//!
//! One [`Issuer::issue`] call is one end-to-end attempt at obtaining a certificate covering the
//! configured domain and its wildcard:
//!
//! 1. register (or reuse) the ACME account,
//! 2. open an order for both identifiers and collect one [DNS-01] challenge per authorization,
//! 3. publish every challenge response as a `TXT` record at the [DNS provider][crate::dns_provider],
//! 4. validate the challenges one after the other, failing fast on the first that doesn't pass,
//! 5. generate a fresh key pair and CSR, finalize the order, seal the chain and key into a
//!    PKCS#12 bundle and persist it in the [store][crate::store].
//!
//! Every `TXT` record created along the way is deleted before `issue` returns, whatever the
//! outcome. A shutdown request interrupts validation polling and finalization, so cancelled
//! attempts still get to clean up.
//!
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4

use crate::acme::{AcmeOrder, ChallengeStatus, DnsChallenge, DynAcmeBackend};
use crate::dns_provider::DynDnsProvider;
use crate::error::IssueError;
use crate::shutdown::Shutdown;
use crate::store::{bundle, CertificateRecord, CertificateStore};
use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod challenge;
pub mod cleanup;

pub use challenge::{challenge_record_name, order_identifiers, valid_dns01};
pub use cleanup::{ChallengeRecordHandle, CleanupList};

#[allow(clippy::module_name_repetitions)]
pub type DynCertificateIssuer = Arc<dyn CertificateIssuer>;

/// How challenge validation is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_attempts: 30,
        }
    }
}

/// Something able to run an issuance attempt. The [scheduler][crate::renewal] only depends on
/// this seam.
#[async_trait::async_trait]
#[allow(clippy::module_name_repetitions)]
pub trait CertificateIssuer: Send + Sync {
    /// The base domain certificates are issued for.
    fn domain(&self) -> &str;

    /// Run one attempt, returning the persisted record on success.
    async fn issue(&self, shutdown: Shutdown) -> Result<CertificateRecord, IssueError>;
}

pub struct Issuer {
    domain: String,
    contact_email: String,
    acme: DynAcmeBackend,
    dns: DynDnsProvider,
    store: CertificateStore,
    validation: ValidationPolicy,
}

impl Issuer {
    pub fn new(
        domain: impl Into<String>,
        contact_email: impl Into<String>,
        acme: DynAcmeBackend,
        dns: DynDnsProvider,
        store: CertificateStore,
        validation: ValidationPolicy,
    ) -> Self {
        Self {
            domain: domain.into(),
            contact_email: contact_email.into(),
            acme,
            dns,
            store,
            validation,
        }
    }

    /// Run one issuance attempt.
    ///
    /// # Errors
    ///
    /// Returns the [`IssueError`] classifying the first step that failed. Challenge records
    /// have been released by the time the error is returned.
    pub async fn issue(&self, shutdown: Shutdown) -> Result<CertificateRecord, IssueError> {
        let identifiers = order_identifiers(&self.domain);
        info!(domain = %self.domain, ?identifiers, "starting certificate issuance");

        let mut cleanup = CleanupList::new(Arc::clone(&self.dns), self.domain.clone());
        let result = self.attempt(&identifiers, &mut cleanup, shutdown).await;

        let created = cleanup.len();
        let failed = cleanup.release_all().await;
        debug!(created, failed, "challenge records released");

        match &result {
            Ok(record) => info!(
                domain = %record.domain,
                not_before = %record.not_before,
                not_after = %record.not_after,
                "certificate issued"
            ),
            Err(err) => error!(domain = %self.domain, error = %err, "certificate issuance failed"),
        }
        result
    }

    async fn attempt(
        &self,
        identifiers: &[String],
        cleanup: &mut CleanupList,
        mut shutdown: Shutdown,
    ) -> Result<CertificateRecord, IssueError> {
        self.acme
            .register_account(&self.contact_email)
            .await
            .map_err(IssueError::Account)?;

        let mut order = self
            .acme
            .new_order(identifiers)
            .await
            .map_err(IssueError::Order)?;
        let challenges = order.dns_challenges().await.map_err(IssueError::Order)?;
        check_challenges(identifiers, &challenges)?;

        for challenge in &challenges {
            let label = challenge_record_name(&self.domain, &challenge.identifier);
            let record_id = self
                .dns
                .add_txt_record(&self.domain, &label, &challenge.txt_value)
                .await
                .map_err(|source| IssueError::DnsProvision {
                    identifier: challenge.identifier.clone(),
                    source,
                })?;
            info!(
                identifier = %challenge.identifier,
                %label,
                %record_id,
                provider = self.dns.name(),
                "challenge record created"
            );
            cleanup.register(ChallengeRecordHandle {
                identifier: challenge.identifier.clone(),
                record_id,
            });
        }

        for challenge in &challenges {
            self.await_validation(&mut *order, challenge, &mut shutdown)
                .await?;
        }

        let (csr_der, key_pem) = certificate_request(&self.domain)?;
        let chain_pem = tokio::select! {
            chain = order.finalize(&csr_der) => chain.map_err(IssueError::CertGeneration)?,
            () = shutdown.requested() => return Err(IssueError::Cancelled),
        };
        let record = bundle::seal(&self.domain, &chain_pem, &key_pem)?;
        self.store.save(&record).await?;
        Ok(record)
    }

    /// Trigger and poll `challenge` until it's valid, rejected or out of attempts. Errors from
    /// the trigger or status calls are transient and only count as a spent attempt.
    async fn await_validation(
        &self,
        order: &mut dyn AcmeOrder,
        challenge: &DnsChallenge,
        shutdown: &mut Shutdown,
    ) -> Result<(), IssueError> {
        let ValidationPolicy {
            poll_interval,
            max_attempts,
        } = self.validation;
        let identifier = &challenge.identifier;

        for attempt in 1..=max_attempts {
            if let Err(err) = order.trigger_validation(challenge).await {
                let err = IssueError::TransientRetryable(err);
                debug!(%identifier, attempt, error = %err, "validation trigger failed");
            }

            match order.challenge_status(challenge).await {
                Ok(ChallengeStatus::Valid) => {
                    info!(%identifier, attempt, "challenge validated");
                    return Ok(());
                }
                Ok(ChallengeStatus::Invalid) => {
                    return Err(IssueError::ValidationRejected {
                        identifier: identifier.clone(),
                    });
                }
                Ok(status) => debug!(%identifier, attempt, %status, "challenge not validated yet"),
                Err(err) => {
                    let err = IssueError::TransientRetryable(err);
                    warn!(%identifier, attempt, error = %err, "challenge status unavailable");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    () = tokio::time::sleep(poll_interval) => {}
                    () = shutdown.requested() => return Err(IssueError::Cancelled),
                }
            }
        }

        Err(IssueError::ValidationTimeout {
            identifier: identifier.clone(),
            attempts: max_attempts,
        })
    }
}

#[async_trait::async_trait]
impl CertificateIssuer for Issuer {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn issue(&self, shutdown: Shutdown) -> Result<CertificateRecord, IssueError> {
        Issuer::issue(self, shutdown).await
    }
}

fn check_challenges(identifiers: &[String], challenges: &[DnsChallenge]) -> Result<(), IssueError> {
    if challenges.len() != identifiers.len() {
        return Err(IssueError::Order(anyhow!(
            "expected {} DNS-01 challenges, got {}",
            identifiers.len(),
            challenges.len()
        )));
    }
    for challenge in challenges {
        valid_dns01(&challenge.txt_value).map_err(|err| {
            IssueError::Order(anyhow!(
                "malformed DNS-01 response for \"{}\": {err}",
                challenge.identifier
            ))
        })?;
    }
    Ok(())
}

/// A fresh key pair and a DER encoded CSR for `domain` and `*.domain`, as (CSR, key PEM).
fn certificate_request(domain: &str) -> Result<(Vec<u8>, String), IssueError> {
    let build = || -> Result<_, rcgen::Error> {
        let key_pair = rcgen::KeyPair::generate()?;
        let mut params =
            rcgen::CertificateParams::new(vec![domain.to_string(), format!("*.{domain}")])?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, domain.to_string());
        let csr = params.serialize_request(&key_pair)?;
        Ok((csr.der().to_vec(), key_pair.serialize_pem()))
    };
    build().map_err(|err| IssueError::CertGeneration(err.into()))
}
