//! Durable certificate storage.
//!
//! Certificates are kept as one PKCS#12 bundle per domain plus a sibling file holding the
//! bundle's password:
//!
//! ```text
//! <store_path>/
//!   example.com.pfx
//!   example.com.password
//!   account.json          (ACME account credentials)
//!   archive/
//!     example.com.20260401T000000Z.pfx
//!     example.com.20260401T000000Z.password
//! ```
//!
//! Replaced pairs are kept in `archive/`, named after their expiry, until pruned by hand.
//!
//! Bundles written by older releases without a password file are still readable; they are
//! opened with the empty password.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::{debug, error, info, warn};

pub mod bundle;

pub use bundle::BundleError;

const BUNDLE_EXTENSION: &str = "pfx";
const PASSWORD_EXTENSION: &str = "password";
const ACCOUNT_FILE: &str = "account.json";
const ARCHIVE_DIR: &str = "archive";
const STAGED_SUFFIX: &str = ".tmp";
const ARCHIVE_STAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

#[derive(thiserror::Error, Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum StoreError {
    #[error("IO error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored bundle is unreadable")]
    Bundle(#[from] BundleError),
}

/// An issued certificate and its private key, sealed in a PKCS#12 bundle.
///
/// Records are never mutated after creation. A renewal produces a new record that replaces
/// the old one wholesale.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub domain: String,
    pub wildcard_domain: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    /// DER encoded PKCS#12 archive holding the chain and the private key.
    pub bundle: Vec<u8>,
    /// Password protecting [`CertificateRecord::bundle`]. `None` only for legacy bundles.
    pub password: Option<String>,
}

impl fmt::Debug for CertificateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRecord")
            .field("domain", &self.domain)
            .field("wildcard_domain", &self.wildcard_domain)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("bundle_len", &self.bundle.len())
            .finish_non_exhaustive()
    }
}

impl CertificateRecord {
    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        self.not_after - now
    }

    pub fn days_remaining(&self, now: OffsetDateTime) -> i64 {
        self.remaining(now).whole_days()
    }
}

#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct CertificateStore {
    root: PathBuf,
}

impl CertificateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_path(&self, domain: &str) -> PathBuf {
        self.root.join(format!("{domain}.{BUNDLE_EXTENSION}"))
    }

    pub fn password_path(&self, domain: &str) -> PathBuf {
        self.root.join(format!("{domain}.{PASSWORD_EXTENSION}"))
    }

    /// Where superseded pairs are kept, as `<domain>.<expiry>.pfx` and `.password`.
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    pub fn account_path(&self) -> PathBuf {
        self.root.join(ACCOUNT_FILE)
    }

    /// Create the storage directory if it doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory can't be created. No certificate could
    /// ever be persisted in that case, so callers treat it as fatal.
    pub async fn init(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::Io {
                path: self.root.clone(),
                source,
            })
    }

    /// Load the record stored for `domain`, or `None` if no bundle exists yet.
    ///
    /// A bundle the password file can't open is retried with a staged password left behind by
    /// an interrupted [`CertificateStore::save`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the files exist but can't be read, and
    /// [`StoreError::Bundle`] if the bundle can't be opened with the stored password.
    pub async fn load(&self, domain: &str) -> Result<Option<CertificateRecord>, StoreError> {
        let bundle_path = self.bundle_path(domain);
        let Some(bundle) = read_optional(&bundle_path).await? else {
            debug!(path = %bundle_path.display(), "no stored certificate");
            return Ok(None);
        };

        let password_path = self.password_path(domain);
        let password = read_optional(&password_path).await?.map(decode_password);

        let record = match bundle::open(domain, bundle.clone(), password) {
            Ok(record) => record,
            Err(err) => {
                let Some(staged) = read_optional(&staged_path(&password_path)).await? else {
                    return Err(err.into());
                };
                warn!(domain, error = %err, "stored password rejected, trying staged password");
                bundle::open(domain, bundle, Some(decode_password(staged))).map_err(|_| err)?
            }
        };
        info!(
            domain,
            not_after = %record.not_after,
            "loaded stored certificate"
        );
        Ok(Some(record))
    }

    /// Persist `record` as the active pair for its domain.
    ///
    /// Both files are staged next to their final names before anything active is touched. The
    /// pair being replaced is copied to [`CertificateStore::archive_dir`] first, then the new
    /// bundle and finally its password are renamed into place. If the password can't be
    /// activated the previous bundle is put back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory can't be created or a file can't be written.
    /// The previously active pair is left loadable in that case.
    pub async fn save(&self, record: &CertificateRecord) -> Result<(), StoreError> {
        self.init().await?;

        let domain = record.domain.as_str();
        let bundle_path = self.bundle_path(domain);
        let password_path = self.password_path(domain);
        let password = record.password.as_deref().unwrap_or_default();

        let staged_bundle = write_staged(&bundle_path, &record.bundle).await?;
        let staged_password = match write_staged(&password_path, password.as_bytes()).await {
            Ok(path) => path,
            Err(err) => {
                discard(&staged_bundle).await;
                return Err(err);
            }
        };

        let archived = match self.archive_active(domain).await {
            Ok(archived) => archived,
            Err(err) => {
                discard(&staged_bundle).await;
                discard(&staged_password).await;
                return Err(err);
            }
        };

        if let Err(err) = rename(&staged_bundle, &bundle_path).await {
            discard(&staged_bundle).await;
            discard(&staged_password).await;
            return Err(err);
        }
        if let Err(err) = rename(&staged_password, &password_path).await {
            self.restore_bundle(domain, archived.as_deref()).await;
            discard(&staged_password).await;
            return Err(err);
        }

        info!(
            domain,
            path = %bundle_path.display(),
            not_after = %record.not_after,
            "certificate saved"
        );
        Ok(())
    }

    /// Copy the active pair of `domain` into the archive, named after the bundle's expiry.
    /// Returns the archived bundle's path, or `None` if nothing was active.
    async fn archive_active(&self, domain: &str) -> Result<Option<PathBuf>, StoreError> {
        let Some(bundle) = read_optional(&self.bundle_path(domain)).await? else {
            return Ok(None);
        };
        let password = read_optional(&self.password_path(domain)).await?;

        let previous_password = password.clone().map(decode_password);
        let expiry = match bundle::open(domain, bundle.clone(), previous_password) {
            Ok(previous) => previous.not_after,
            Err(err) => {
                warn!(domain, error = %err, "archiving unreadable bundle");
                OffsetDateTime::now_utc()
            }
        };
        let stamp = expiry
            .to_offset(UtcOffset::UTC)
            .format(ARCHIVE_STAMP)
            .unwrap_or_else(|_| expiry.unix_timestamp().to_string());

        let archive = self.archive_dir();
        tokio::fs::create_dir_all(&archive)
            .await
            .map_err(|source| StoreError::Io {
                path: archive.clone(),
                source,
            })?;

        let archived_bundle = archive.join(format!("{domain}.{stamp}.{BUNDLE_EXTENSION}"));
        write_atomic(&archived_bundle, &bundle).await?;
        if let Some(password) = password {
            let archived_password = archive.join(format!("{domain}.{stamp}.{PASSWORD_EXTENSION}"));
            write_atomic(&archived_password, &password).await?;
        }
        debug!(domain, path = %archived_bundle.display(), "archived previous certificate");
        Ok(Some(archived_bundle))
    }

    async fn restore_bundle(&self, domain: &str, archived: Option<&Path>) {
        let bundle_path = self.bundle_path(domain);
        let restored = match archived {
            Some(archived) => match read_optional(archived).await {
                Ok(Some(previous)) => write_atomic(&bundle_path, &previous).await,
                Ok(None) => Ok(()),
                Err(err) => Err(err),
            },
            None => tokio::fs::remove_file(&bundle_path)
                .await
                .map_err(|source| StoreError::Io {
                    path: bundle_path.clone(),
                    source,
                }),
        };
        if let Err(err) = restored {
            error!(domain, error = %err, "failed to restore previous bundle");
        }
    }

    /// A record is valid when it exists and expires more than `threshold_days` after `now`.
    pub fn is_valid(
        record: Option<&CertificateRecord>,
        threshold_days: u32,
        now: OffsetDateTime,
    ) -> bool {
        record.map_or(false, |r| {
            r.not_after > now + Duration::days(i64::from(threshold_days))
        })
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn decode_password(raw: Vec<u8>) -> String {
    String::from_utf8_lossy(&raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

fn staged_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(STAGED_SUFFIX);
    PathBuf::from(name)
}

/// Write `data` to the staging sibling of `path`, readable by the owner only.
async fn write_staged(path: &Path, data: &[u8]) -> Result<PathBuf, StoreError> {
    let staged = staged_path(path);
    let io_err = |source| StoreError::Io {
        path: staged.clone(),
        source,
    };

    tokio::fs::write(&staged, data).await.map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_err)?;
    }
    Ok(staged)
}

async fn rename(from: &Path, to: &Path) -> Result<(), StoreError> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|source| StoreError::Io {
            path: to.to_path_buf(),
            source,
        })
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let staged = write_staged(path, data).await?;
    rename(&staged, path).await
}

async fn discard(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove staged file");
        }
    }
}
