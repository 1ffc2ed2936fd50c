use crate::error::Error;
use crate::issuance::ValidationPolicy;
use crate::renewal::RenewalPolicy;
use ipnetwork::IpNetwork;
use lazy_static::lazy_static;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub type SharedConfig = Arc<Config>;

pub const LETS_ENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const DNSPOD_ENDPOINT: &str = "https://dnsapi.cn";

const DNSPOD_ID_ENV: &str = "DP_Id";
const DNSPOD_KEY_ENV: &str = "DP_Key";

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Base domain. Certificates cover it and its wildcard.
    pub domain: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default = "default_directory_url")]
    pub acme_directory_url: String,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_check_interval")]
    pub check_interval: Duration,
    #[serde(default = "default_renewal_threshold_days")]
    pub renewal_threshold_days: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_error_backoff")]
    pub error_backoff: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_validation_poll_interval")]
    pub validation_poll_interval: Duration,
    #[serde(default = "default_validation_max_attempts")]
    pub validation_max_attempts: u32,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_api_timeout")]
    pub api_timeout: Duration,
    #[serde(default)]
    pub dnspod: DnspodConfig,
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct DnspodConfig {
    #[serde(default)]
    pub api_id: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_dnspod_endpoint")]
    pub endpoint: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_api_timeout")]
    pub timeout: Duration,
}

impl Default for DnspodConfig {
    fn default() -> Self {
        Self {
            api_id: None,
            api_token: None,
            endpoint: default_dnspod_endpoint(),
            timeout: default_api_timeout(),
        }
    }
}

fn default_directory_url() -> String {
    LETS_ENCRYPT_DIRECTORY.to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./certificates")
}

fn default_check_interval() -> Duration {
    Duration::from_secs(6 * 3600)
}

fn default_renewal_threshold_days() -> u32 {
    30
}

fn default_error_backoff() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_validation_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_validation_max_attempts() -> u32 {
    30
}

fn default_api_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_dnspod_endpoint() -> String {
    DNSPOD_ENDPOINT.to_string()
}

lazy_static! {
    // NOTE(XXX): Once the "ip" feature has stabilized we can use Ipv6Addr.is_unique_local[0].
    //            Presently this feature is unstable so we home-roll. See also RFC 4193[1].
    // [0]: https://doc.rust-lang.org/std/net/struct.Ipv6Addr.html#method.is_unique_local
    // [1]: https://www.rfc-editor.org/rfc/rfc4193.html
    static ref IPV6_UNIQUE_LOCAL_NETWORK: IpNetwork = IpNetwork::from_str("fc00::/7").unwrap();
}

impl Config {
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        conf.prepare()
    }

    /// Normalize the domain (trimmed, lowercase, no trailing dot) and validate the result.
    fn prepare(mut self) -> Result<Self, Error> {
        self.domain = self
            .domain
            .trim()
            .trim_end_matches('.')
            .to_ascii_lowercase();
        self.validate()?;
        Ok(self)
    }

    /// The ACME account contact, defaulting to `admin@<domain>`.
    pub fn contact_email(&self) -> String {
        match &self.contact_email {
            Some(email) if !email.trim().is_empty() => email.clone(),
            _ => format!("admin@{}", self.domain),
        }
    }

    pub fn renewal_policy(&self) -> RenewalPolicy {
        RenewalPolicy {
            check_interval: self.check_interval,
            renewal_threshold_days: self.renewal_threshold_days,
            error_backoff: self.error_backoff,
        }
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            poll_interval: self.validation_poll_interval,
            max_attempts: self.validation_max_attempts,
        }
    }

    /// DNSPod `(api_id, api_token)`, taken from the config file or else from the `DP_Id` and
    /// `DP_Key` environment variables.
    pub fn dnspod_credentials(&self) -> Result<(String, String), Error> {
        let api_id = self
            .dnspod
            .api_id
            .clone()
            .or_else(|| std::env::var(DNSPOD_ID_ENV).ok())
            .filter(|v| !v.is_empty());
        let api_token = self
            .dnspod
            .api_token
            .clone()
            .or_else(|| std::env::var(DNSPOD_KEY_ENV).ok())
            .filter(|v| !v.is_empty());
        match (api_id, api_token) {
            (Some(id), Some(token)) => Ok((id, token)),
            _ => Err(Error::MissingDnsCredentials),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let domain = self.domain.as_str();
        if domain.is_empty() {
            return Err(Error::InvalidConfig("domain must not be empty".into()));
        }
        if domain.contains(char::is_whitespace) {
            return Err(Error::InvalidConfig(format!(
                "domain \"{domain}\" must not contain whitespace"
            )));
        }
        if domain.starts_with("*.") {
            return Err(Error::InvalidConfig(format!(
                "domain \"{domain}\" must be the base domain, not a wildcard"
            )));
        }
        if self.renewal_threshold_days == 0 {
            return Err(Error::InvalidConfig(
                "renewal_threshold_days must be at least 1".into(),
            ));
        }
        if self.validation_max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "validation_max_attempts must be at least 1".into(),
            ));
        }
        if self.check_interval.is_zero() {
            return Err(Error::InvalidConfig("check_interval must be non-zero".into()));
        }
        self.bind_addr_is_secure()
    }

    fn bind_addr_is_secure(&self) -> Result<(), Error> {
        match self.api_bind_addr {
            SocketAddr::V4(v4_addr) => {
                let ip = v4_addr.ip();
                if !ip.is_loopback() && !ip.is_private() {
                    return Err(Error::InsecureAPIBind(IpAddr::V4(*ip)));
                }
                Ok(())
            }
            SocketAddr::V6(v6_addr) => {
                let ip = v6_addr.ip();
                if !ip.is_loopback() && !IPV6_UNIQUE_LOCAL_NETWORK.contains(IpAddr::V6(*ip)) {
                    return Err(Error::InsecureAPIBind(IpAddr::V6(*ip)));
                }
                Ok(())
            }
        }
    }
}
