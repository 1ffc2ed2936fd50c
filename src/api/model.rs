use crate::renewal::{CertificateStatus, SchedulerState};
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub(super) struct StatusResult {
    pub has_certificate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wildcard_domain: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub not_before: Option<OffsetDateTime>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub not_after: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fresh: Option<bool>,
    pub scheduler_state: String,
}

impl StatusResult {
    pub fn new(domain: &str, status: CertificateStatus, state: SchedulerState) -> Self {
        let scheduler_state = state.to_string();
        match status {
            CertificateStatus::Missing => Self {
                has_certificate: false,
                domain: None,
                wildcard_domain: None,
                not_before: None,
                not_after: None,
                days_remaining: None,
                fresh: None,
                scheduler_state,
            },
            CertificateStatus::Present {
                not_before,
                not_after,
                days_remaining,
                fresh,
            } => Self {
                has_certificate: true,
                domain: Some(domain.to_string()),
                wildcard_domain: Some(format!("*.{domain}")),
                not_before: Some(not_before),
                not_after: Some(not_after),
                days_remaining: Some(days_remaining),
                fresh: Some(fresh),
                scheduler_state,
            },
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub(super) struct RenewResult {
    pub message: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
}
