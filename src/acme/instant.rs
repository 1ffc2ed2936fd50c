//! [`AcmeBackend`] implementation backed by [`instant_acme`].
//!
//! Account credentials are persisted as JSON so a restarted process reuses the account it
//! registered before instead of creating a fresh one for every certificate.
use crate::acme::{AcmeBackend, AcmeOrder, ChallengeStatus, DnsChallenge};
use anyhow::{anyhow, bail, Context};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const ORDER_POLL_INTERVAL: Duration = Duration::from_secs(3);
const ORDER_POLL_ATTEMPTS: u32 = 40;

pub struct InstantAcmeBackend {
    directory_url: String,
    credentials_path: PathBuf,
    account: Mutex<Option<Account>>,
}

impl InstantAcmeBackend {
    /// `credentials_path` is where account credentials are loaded from and saved to.
    pub fn new(directory_url: impl Into<String>, credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            directory_url: directory_url.into(),
            credentials_path: credentials_path.into(),
            account: Mutex::new(None),
        }
    }

    async fn load_account(&self) -> anyhow::Result<Account> {
        let raw = tokio::fs::read_to_string(&self.credentials_path).await?;
        let credentials: AccountCredentials = serde_json::from_str(&raw)?;
        Ok(Account::from_credentials(credentials).await?)
    }

    async fn create_account(&self, contact_email: &str) -> anyhow::Result<Account> {
        let contact = format!("mailto:{contact_email}");
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[contact.as_str()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .context("account registration rejected")?;

        let creds_json = serde_json::to_string_pretty(&credentials)?;
        let temp_path = self.credentials_path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, creds_json).await?;
        tokio::fs::rename(&temp_path, &self.credentials_path).await?;

        info!(email = %contact_email, "registered new ACME account");
        Ok(account)
    }
}

#[async_trait::async_trait]
impl AcmeBackend for InstantAcmeBackend {
    async fn register_account(&self, contact_email: &str) -> anyhow::Result<()> {
        let mut guard = self.account.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let account = if self.credentials_path.exists() {
            match self.load_account().await {
                Ok(account) => {
                    info!(path = %self.credentials_path.display(), "reusing ACME account");
                    account
                }
                Err(err) => {
                    warn!(error = %err, "stored ACME account unusable, registering a new one");
                    self.create_account(contact_email).await?
                }
            }
        } else {
            self.create_account(contact_email).await?
        };

        *guard = Some(account);
        Ok(())
    }

    async fn new_order(&self, identifiers: &[String]) -> anyhow::Result<Box<dyn AcmeOrder>> {
        let account = self
            .account
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("no ACME account registered"))?;

        let identifiers: Vec<Identifier> = identifiers
            .iter()
            .map(|id| Identifier::Dns(id.clone()))
            .collect();
        let order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await?;
        debug!(count = identifiers.len(), "created ACME order");
        Ok(Box::new(InstantAcmeOrder { order }))
    }
}

fn challenge_status_of(status: AuthorizationStatus) -> ChallengeStatus {
    match status {
        AuthorizationStatus::Pending => ChallengeStatus::Pending,
        AuthorizationStatus::Valid => ChallengeStatus::Valid,
        AuthorizationStatus::Invalid | AuthorizationStatus::Revoked | AuthorizationStatus::Expired => {
            ChallengeStatus::Invalid
        }
    }
}

struct InstantAcmeOrder {
    order: Order,
}

impl InstantAcmeOrder {
    async fn wait_until_ready(&mut self) -> anyhow::Result<()> {
        for attempt in 1..=ORDER_POLL_ATTEMPTS {
            let state = self.order.refresh().await?;
            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => bail!("order became invalid: {:?}", state.error),
                status => debug!(?status, attempt, "order not ready yet"),
            }
            tokio::time::sleep(ORDER_POLL_INTERVAL).await;
        }
        bail!("order not ready after {ORDER_POLL_ATTEMPTS} attempts")
    }
}

#[async_trait::async_trait]
impl AcmeOrder for InstantAcmeOrder {
    async fn dns_challenges(&mut self) -> anyhow::Result<Vec<DnsChallenge>> {
        let authorizations = self.order.authorizations().await?;
        let mut challenges = Vec::with_capacity(authorizations.len());
        for authz in &authorizations {
            let Identifier::Dns(identifier) = &authz.identifier;
            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Dns01)
                .ok_or_else(|| anyhow!("no DNS-01 challenge offered for {identifier}"))?;
            challenges.push(DnsChallenge {
                identifier: identifier.clone(),
                url: challenge.url.clone(),
                txt_value: self.order.key_authorization(challenge).dns_value(),
            });
        }
        Ok(challenges)
    }

    async fn trigger_validation(&mut self, challenge: &DnsChallenge) -> anyhow::Result<()> {
        self.order.set_challenge_ready(&challenge.url).await?;
        Ok(())
    }

    /// Read from the challenge's authorization. An authorization is valid once its challenge
    /// is, and `revoked` or `expired` leave nothing to wait for, so they count as rejected.
    async fn challenge_status(
        &mut self,
        challenge: &DnsChallenge,
    ) -> anyhow::Result<ChallengeStatus> {
        let authorizations = self.order.authorizations().await?;
        let authz = authorizations
            .iter()
            .find(|authz| authz.challenges.iter().any(|c| c.url == challenge.url))
            .ok_or_else(|| anyhow!("challenge {} vanished from order", challenge.url))?;
        Ok(challenge_status_of(authz.status))
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> anyhow::Result<String> {
        self.wait_until_ready().await?;
        if self.order.state().status == OrderStatus::Ready {
            self.order.finalize(csr_der).await?;
        }

        for _ in 0..ORDER_POLL_ATTEMPTS {
            if let Some(chain) = self.order.certificate().await? {
                return Ok(chain);
            }
            debug!("certificate not ready yet");
            tokio::time::sleep(ORDER_POLL_INTERVAL).await;
        }
        bail!("certificate not available after {ORDER_POLL_ATTEMPTS} attempts")
    }
}
