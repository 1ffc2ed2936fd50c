//! PKCS#12 sealing and opening of certificate material.
use crate::store::CertificateRecord;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::stack::Stack;
use openssl::x509::{X509Ref, X509};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use time::OffsetDateTime;

const PASSWORD_LEN: usize = 32;

#[derive(thiserror::Error, Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum BundleError {
    #[error("certificate chain contains no certificate")]
    EmptyChain,

    #[error("bundle contains no certificate")]
    MissingCertificate,

    #[error("certificate validity is out of range")]
    InvalidValidity,

    #[error("OpenSSL error")]
    OpenSsl(#[from] openssl::error::ErrorStack),
}

/// Seal a PEM chain (leaf first) and its PEM private key into a password protected PKCS#12
/// bundle for `domain`. The password is freshly generated for every bundle.
///
/// # Errors
///
/// Returns [`BundleError::EmptyChain`] if `chain_pem` holds no certificate, and
/// [`BundleError::OpenSsl`] if either input can't be parsed or the archive can't be built.
pub fn seal(domain: &str, chain_pem: &str, key_pem: &str) -> Result<CertificateRecord, BundleError> {
    let pkey = PKey::private_key_from_pem(key_pem.as_bytes())?;
    let mut chain = X509::stack_from_pem(chain_pem.as_bytes())?.into_iter();
    let leaf = chain.next().ok_or(BundleError::EmptyChain)?;
    let mut intermediates = Stack::new()?;
    for cert in chain {
        intermediates.push(cert)?;
    }

    let password = generate_password();
    let mut builder = Pkcs12::builder();
    builder
        .name(domain)
        .pkey(&pkey)
        .cert(&leaf)
        .ca(intermediates);
    let bundle = builder.build2(&password)?.to_der()?;

    let (not_before, not_after) = validity(&leaf)?;
    Ok(CertificateRecord {
        domain: domain.to_string(),
        wildcard_domain: format!("*.{domain}"),
        not_before,
        not_after,
        bundle,
        password: Some(password),
    })
}

/// Open a PKCS#12 `bundle` for `domain`. A `None` password opens bundles written without one.
///
/// # Errors
///
/// Returns [`BundleError::OpenSsl`] if the bundle is corrupt or the password is wrong.
pub fn open(
    domain: &str,
    bundle: Vec<u8>,
    password: Option<String>,
) -> Result<CertificateRecord, BundleError> {
    let parsed = Pkcs12::from_der(&bundle)?.parse2(password.as_deref().unwrap_or(""))?;
    let cert = parsed.cert.ok_or(BundleError::MissingCertificate)?;
    let (not_before, not_after) = validity(&cert)?;
    Ok(CertificateRecord {
        domain: domain.to_string(),
        wildcard_domain: format!("*.{domain}"),
        not_before,
        not_after,
        bundle,
        password,
    })
}

fn generate_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn validity(cert: &X509Ref) -> Result<(OffsetDateTime, OffsetDateTime), BundleError> {
    Ok((
        asn1_to_datetime(cert.not_before())?,
        asn1_to_datetime(cert.not_after())?,
    ))
}

fn asn1_to_datetime(t: &Asn1TimeRef) -> Result<OffsetDateTime, BundleError> {
    let diff = Asn1Time::from_unix(0)?.diff(t)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    OffsetDateTime::from_unix_timestamp(secs).map_err(|_| BundleError::InvalidValidity)
}
