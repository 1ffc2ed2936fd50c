//! A [DNSPod] implementation of the [`DnsProvider`][super::DnsProvider] trait.
//!
//! DNSPod's legacy API takes form-encoded `POST`s authenticated with a `login_token` of the form
//! `<api id>,<api token>` and answers with a JSON document whose `status.code` is `"1"` on
//! success. Errors are reported in two layers: the HTTP status and the business-level
//! `status.code`, and the provider occasionally answers with an HTML error page instead of JSON.
//! All of these are mapped to a [`DnsError`].
//!
//! [DNSPod]: https://docs.dnspod.cn/api/
use crate::dns_provider::{DnsError, DnsProvider, RecordId};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const SUCCESS_CODE: &str = "1";
/// `Record.List` answers an empty result with this code instead of an empty list.
const NO_RECORDS_CODE: &str = "10";
/// DNSPod's name for the default resolution line.
const DEFAULT_RECORD_LINE: &str = "默认";
const CHALLENGE_TTL: &str = "600";

#[derive(Deserialize, Debug)]
struct DnspodStatus {
    code: Value,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Debug)]
struct DnspodRecord {
    id: Value,
}

#[derive(Deserialize, Debug)]
struct DnspodListedRecord {
    id: Value,
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    value: String,
}

#[derive(Deserialize, Debug)]
struct DnspodDomain {
    name: String,
}

#[derive(Deserialize, Debug)]
struct DnspodResponse {
    status: DnspodStatus,
    #[serde(default)]
    record: Option<DnspodRecord>,
    #[serde(default)]
    records: Vec<DnspodListedRecord>,
    #[serde(default)]
    domains: Vec<DnspodDomain>,
}

/// A `TXT` record as listed by DNSPod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    pub id: RecordId,
    pub name: String,
    pub value: String,
}

#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct DnspodClient {
    client: reqwest::Client,
    endpoint: String,
    login_token: String,
}

impl std::fmt::Debug for DnspodClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnspodClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl DnspodClient {
    /// Build a client for the DNSPod API rooted at `endpoint` (e.g. `https://dnsapi.cn`).
    ///
    /// # Errors
    ///
    /// Returns [`DnsError::Transport`] if the underlying HTTP client can't be constructed.
    pub fn new(
        endpoint: impl Into<String>,
        api_id: &str,
        api_token: &str,
        timeout: Duration,
    ) -> Result<Self, DnsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("certcrab/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            login_token: format!("{api_id},{api_token}"),
        })
    }

    async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<DnspodResponse, DnsError> {
        let mut form: Vec<(&str, &str)> =
            vec![("login_token", self.login_token.as_str()), ("format", "json")];
        form.extend_from_slice(params);

        let resp = self
            .client
            .post(format!("{}/{action}", self.endpoint))
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(action, status = status.as_u16(), "DNSPod response: {body}");

        if !status.is_success() {
            return Err(DnsError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: DnspodResponse = serde_json::from_str(&body)
            .map_err(|err| DnsError::InvalidResponse(format!("{err}: {body}")))?;
        let code = scalar_to_string(&parsed.status.code).unwrap_or_default();
        if code != SUCCESS_CODE {
            return Err(DnsError::Rejected {
                code,
                message: parsed.status.message,
            });
        }
        Ok(parsed)
    }

    /// Zones hosted by the account.
    ///
    /// # Errors
    ///
    /// Returns a [`DnsError`] if the request fails or is rejected.
    pub async fn list_domains(&self) -> Result<Vec<String>, DnsError> {
        let resp = self.call("Domain.List", &[]).await?;
        Ok(resp.domains.into_iter().map(|d| d.name).collect())
    }

    /// `TXT` records named `sub_label` in the `domain` zone.
    ///
    /// # Errors
    ///
    /// Returns a [`DnsError`] if the request fails or is rejected. An empty result is not an
    /// error.
    pub async fn list_txt_records(
        &self,
        domain: &str,
        sub_label: &str,
    ) -> Result<Vec<TxtRecord>, DnsError> {
        let resp = match self
            .call(
                "Record.List",
                &[
                    ("domain", domain),
                    ("sub_domain", sub_label),
                    ("record_type", "TXT"),
                ],
            )
            .await
        {
            Ok(resp) => resp,
            Err(DnsError::Rejected { code, .. }) if code == NO_RECORDS_CODE => return Ok(vec![]),
            Err(err) => return Err(err),
        };

        let records = resp
            .records
            .into_iter()
            .filter(|r| r.record_type.eq_ignore_ascii_case("TXT"))
            .filter(|r| r.name.eq_ignore_ascii_case(sub_label))
            .filter_map(|r| {
                Some(TxtRecord {
                    id: scalar_to_string(&r.id)?,
                    name: r.name,
                    value: r.value,
                })
            })
            .collect();
        Ok(records)
    }

    /// Delete every `TXT` record named `sub_label` in the `domain` zone, returning how many
    /// were removed. Used to sweep challenge records a killed process never withdrew.
    ///
    /// # Errors
    ///
    /// Returns the first [`DnsError`] hit while listing or deleting. Records deleted before
    /// the failure stay deleted.
    pub async fn delete_txt_records_by_name(
        &self,
        domain: &str,
        sub_label: &str,
    ) -> Result<usize, DnsError> {
        let records = self.list_txt_records(domain, sub_label).await?;
        for record in &records {
            self.delete_txt_record(domain, &record.id).await?;
        }
        if !records.is_empty() {
            info!(domain, sub_label, count = records.len(), "removed stale TXT records");
        }
        Ok(records.len())
    }
}

/// DNSPod has been seen to return ids and codes both as JSON strings and as numbers.
fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait::async_trait]
impl DnsProvider for DnspodClient {
    fn name(&self) -> &'static str {
        "dnspod"
    }

    async fn add_txt_record(
        &self,
        domain: &str,
        sub_label: &str,
        value: &str,
    ) -> Result<RecordId, DnsError> {
        info!(domain, sub_label, "adding TXT record");
        let resp = self
            .call(
                "Record.Create",
                &[
                    ("domain", domain),
                    ("sub_domain", sub_label),
                    ("record_type", "TXT"),
                    ("record_line", DEFAULT_RECORD_LINE),
                    ("value", value),
                    ("ttl", CHALLENGE_TTL),
                ],
            )
            .await?;

        let record_id = resp
            .record
            .as_ref()
            .and_then(|r| scalar_to_string(&r.id))
            .ok_or_else(|| DnsError::InvalidResponse("response carries no record id".into()))?;
        info!(domain, sub_label, record_id = %record_id, "TXT record added");
        Ok(record_id)
    }

    async fn delete_txt_record(&self, domain: &str, record_id: &str) -> Result<(), DnsError> {
        info!(domain, record_id, "deleting TXT record");
        self.call(
            "Record.Remove",
            &[("domain", domain), ("record_id", record_id)],
        )
        .await?;
        info!(domain, record_id, "TXT record deleted");
        Ok(())
    }
}
