//! Scripted stand-ins for the ACME CA, the DNS provider and the issuer.
#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use certcrab::acme::{AcmeBackend, AcmeOrder, ChallengeStatus, DnsChallenge};
use certcrab::dns_provider::{DnsError, DnsProvider, RecordId};
use certcrab::error::IssueError;
use certcrab::issuance::CertificateIssuer;
use certcrab::shutdown::Shutdown;
use certcrab::store::CertificateRecord;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, PKey, PKeyRef, Private};
use openssl::x509::{X509Builder, X509Name, X509NameRef, X509Req, X509};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::macros::datetime;
use time::OffsetDateTime;

pub const DOMAIN: &str = "example.com";
pub const ISSUED_NOT_BEFORE: OffsetDateTime = datetime!(2026-03-01 0:00 UTC);
pub const ISSUED_NOT_AFTER: OffsetDateTime = datetime!(2026-05-30 0:00 UTC);

/// A well-formed DNS-01 response value, distinct per `seed`.
pub fn txt_value(seed: u8) -> String {
    URL_SAFE_NO_PAD.encode([seed; 32])
}

/// `None` entries in a status script stand for a failed status request.
pub type StatusStep = Option<ChallengeStatus>;

#[derive(Default)]
pub struct AcmeScript {
    pub challenges: Vec<DnsChallenge>,
    pub statuses: HashMap<String, VecDeque<StatusStep>>,
    pub fail_account: bool,
    pub fail_finalize: bool,
    /// How long `finalize` takes before answering.
    pub finalize_delay: Option<Duration>,
    pub calls: Vec<String>,
}

/// An ACME CA whose challenge statuses play back a script. Once a challenge's script runs
/// out it stays `pending`.
#[derive(Clone, Default)]
pub struct FakeAcme(pub Arc<Mutex<AcmeScript>>);

impl FakeAcme {
    /// One challenge per identifier of `domain`, each immediately valid.
    pub fn for_domain(domain: &str) -> Self {
        let identifiers = [format!("*.{domain}"), domain.to_string()];
        let mut script = AcmeScript::default();
        for (seed, identifier) in (1u8..).zip(identifiers) {
            let url = format!("https://acme.test/chall/{seed}");
            script
                .statuses
                .insert(identifier.clone(), VecDeque::from([Some(ChallengeStatus::Valid)]));
            script.challenges.push(DnsChallenge {
                identifier,
                url,
                txt_value: txt_value(seed),
            });
        }
        Self(Arc::new(Mutex::new(script)))
    }

    pub fn with_statuses(self, identifier: &str, steps: impl IntoIterator<Item = StatusStep>) -> Self {
        self.0
            .lock()
            .unwrap()
            .statuses
            .insert(identifier.to_string(), steps.into_iter().collect());
        self
    }

    pub fn update(self, f: impl FnOnce(&mut AcmeScript)) -> Self {
        f(&mut self.0.lock().unwrap());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.0.lock().unwrap().calls.push(call);
    }
}

#[async_trait::async_trait]
impl AcmeBackend for FakeAcme {
    async fn register_account(&self, contact_email: &str) -> anyhow::Result<()> {
        self.record(format!("register {contact_email}"));
        if self.0.lock().unwrap().fail_account {
            anyhow::bail!("account registration rejected");
        }
        Ok(())
    }

    async fn new_order(&self, identifiers: &[String]) -> anyhow::Result<Box<dyn AcmeOrder>> {
        self.record(format!("order {}", identifiers.join(",")));
        Ok(Box::new(self.clone()))
    }
}

#[async_trait::async_trait]
impl AcmeOrder for FakeAcme {
    async fn dns_challenges(&mut self) -> anyhow::Result<Vec<DnsChallenge>> {
        Ok(self.0.lock().unwrap().challenges.clone())
    }

    async fn trigger_validation(&mut self, challenge: &DnsChallenge) -> anyhow::Result<()> {
        self.record(format!("trigger {}", challenge.identifier));
        Ok(())
    }

    async fn challenge_status(
        &mut self,
        challenge: &DnsChallenge,
    ) -> anyhow::Result<ChallengeStatus> {
        self.record(format!("status {}", challenge.identifier));
        let step = self
            .0
            .lock()
            .unwrap()
            .statuses
            .get_mut(&challenge.identifier)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Some(status)) => Ok(status),
            Some(None) => anyhow::bail!("status request failed"),
            None => Ok(ChallengeStatus::Pending),
        }
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> anyhow::Result<String> {
        self.record("finalize".to_string());
        let delay = self.0.lock().unwrap().finalize_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.0.lock().unwrap().fail_finalize {
            anyhow::bail!("CA refused to issue");
        }
        Ok(sign_csr(csr_der))
    }
}

/// Issue a certificate for the CSR's key, valid from [`ISSUED_NOT_BEFORE`] to
/// [`ISSUED_NOT_AFTER`], followed by the signing CA certificate.
pub fn sign_csr(csr_der: &[u8]) -> String {
    let req = X509Req::from_der(csr_der).unwrap();
    let ca_key = ec_key();

    let mut ca_name = X509Name::builder().unwrap();
    ca_name.append_entry_by_nid(Nid::COMMONNAME, "Fake CA").unwrap();
    let ca_name = ca_name.build();

    let ca = certificate(&ca_name, &ca_name, &ca_key, &ca_key, 1);
    let leaf_key = req.public_key().unwrap();
    let leaf = certificate(req.subject_name(), &ca_name, &leaf_key, &ca_key, 2);

    let mut chain = String::from_utf8(leaf.to_pem().unwrap()).unwrap();
    chain.push_str(&String::from_utf8(ca.to_pem().unwrap()).unwrap());
    chain
}

fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn certificate<T: HasPublic>(
    subject: &X509NameRef,
    issuer: &X509NameRef,
    key: &PKeyRef<T>,
    signer: &PKeyRef<Private>,
    serial: u32,
) -> X509 {
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(key).unwrap();
    set_validity(&mut builder);
    builder.sign(signer, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn set_validity(builder: &mut X509Builder) {
    let not_before = Asn1Time::from_unix(ISSUED_NOT_BEFORE.unix_timestamp()).unwrap();
    let not_after = Asn1Time::from_unix(ISSUED_NOT_AFTER.unix_timestamp()).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();
}

/// A DNS provider that records every call.
#[derive(Default)]
pub struct RecordingDns {
    /// `(sub_label, value, record_id)` per successful create.
    pub created: Mutex<Vec<(String, String, RecordId)>>,
    pub deleted: Mutex<Vec<RecordId>>,
    /// 1-based index of the create call that fails.
    pub fail_create_at: Option<usize>,
    pub fail_delete: bool,
    pub creates: AtomicUsize,
}

impl RecordingDns {
    pub fn created_ids(&self) -> Vec<RecordId> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, id)| id.clone())
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<RecordId> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DnsProvider for RecordingDns {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn add_txt_record(
        &self,
        domain: &str,
        sub_label: &str,
        value: &str,
    ) -> Result<RecordId, DnsError> {
        assert_eq!(domain, DOMAIN);
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_create_at == Some(n) {
            return Err(DnsError::Rejected {
                code: "104".into(),
                message: "record already exists".into(),
            });
        }
        let id = format!("rec-{n}");
        self.created
            .lock()
            .unwrap()
            .push((sub_label.to_string(), value.to_string(), id.clone()));
        Ok(id)
    }

    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> Result<(), DnsError> {
        assert_eq!(domain, DOMAIN);
        self.deleted.lock().unwrap().push(record_id.to_string());
        if self.fail_delete {
            return Err(DnsError::HttpStatus {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }
}

/// An issuer that succeeds with a fixed validity window or fails, without any I/O.
pub struct StubIssuer {
    pub succeed: bool,
    pub calls: AtomicUsize,
}

impl StubIssuer {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl CertificateIssuer for StubIssuer {
    fn domain(&self) -> &str {
        DOMAIN
    }

    async fn issue(&self, _shutdown: Shutdown) -> Result<CertificateRecord, IssueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.succeed {
            return Err(IssueError::ValidationRejected {
                identifier: DOMAIN.into(),
            });
        }
        Ok(CertificateRecord {
            domain: DOMAIN.into(),
            wildcard_domain: format!("*.{DOMAIN}"),
            not_before: ISSUED_NOT_BEFORE,
            not_after: ISSUED_NOT_AFTER,
            bundle: vec![],
            password: None,
        })
    }
}
