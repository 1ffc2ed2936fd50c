//! Naming and sanity checks for DNS-01 challenge records.
use base64::engine::general_purpose;
use base64::{alphabet, engine, DecodeError, Engine};
use lazy_static::lazy_static;
use std::collections::BTreeSet;

/// Leftmost label of every DNS-01 challenge record.
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

const DNS01_DECODED_LEN_BYTES: usize = 32;

lazy_static! {
    static ref BASE64_ENGINE: engine::GeneralPurpose =
        engine::GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::NO_PAD);
}

#[derive(thiserror::Error, Debug)]
pub enum TxtValidationError {
    #[error("invalid encoding: {0}")]
    InvalidEncoding(DecodeError),
    #[error("invalid decoded length: found {actual} bytes, expected {expected}")]
    InvalidDecodedLength { actual: usize, expected: usize },
}

/// The identifiers ordered for `domain`: the base domain and its wildcard, deduplicated.
pub fn order_identifiers(domain: &str) -> Vec<String> {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    let identifiers: BTreeSet<String> = [format!("*.{domain}"), domain].into_iter().collect();
    identifiers.into_iter().collect()
}

/// The record label, relative to the `base_domain` zone, that carries the challenge response
/// for `identifier`.
///
/// The base domain and its wildcard share the zone apex label `_acme-challenge`. A subdomain
/// `sub.<base>` (or `*.sub.<base>`) maps to `_acme-challenge.sub`. Identifiers outside the zone
/// fall back to `_acme-challenge`. Comparison ignores case and a trailing dot.
pub fn challenge_record_name(base_domain: &str, identifier: &str) -> String {
    let base = base_domain.trim_end_matches('.');
    let host = identifier.trim_end_matches('.');
    if host.eq_ignore_ascii_case(base) {
        return ACME_CHALLENGE_LABEL.to_string();
    }

    let host = host.strip_prefix("*.").unwrap_or(host);
    let suffix = format!(".{base}");
    let left = host
        .len()
        .checked_sub(suffix.len())
        .filter(|&split| host.is_char_boundary(split))
        .filter(|&split| host[split..].eq_ignore_ascii_case(&suffix))
        .map(|split| &host[..split]);

    match left {
        Some(left) if !left.is_empty() && left != "*" => {
            format!("{ACME_CHALLENGE_LABEL}.{}", left.to_ascii_lowercase())
        }
        _ => ACME_CHALLENGE_LABEL.to_string(),
    }
}

/// Check that `txt` looks like a DNS-01 response: a base64url (no padding) SHA-256 digest.
pub fn valid_dns01(txt: &str) -> Result<(), TxtValidationError> {
    match BASE64_ENGINE.decode(txt) {
        Ok(raw) => match raw.len() {
            DNS01_DECODED_LEN_BYTES => Ok(()),
            _ => Err(TxtValidationError::InvalidDecodedLength {
                actual: raw.len(),
                expected: DNS01_DECODED_LEN_BYTES,
            }),
        },
        Err(err) => Err(TxtValidationError::InvalidEncoding(err)),
    }
}
