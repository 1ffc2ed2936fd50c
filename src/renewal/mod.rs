//! Background certificate renewal.
//!
//! The [`RenewalScheduler`] owns the currently active [`CertificateRecord`] and periodically
//! decides whether it needs to be renewed:
//!
//! ```text
//! Starting ──start()──▶ Idle ──check interval──▶ Checking ──fresh──▶ Idle
//!                                                   │
//!                                                   └──due──▶ Renewing ──▶ Idle
//! ```
//!
//! Readers such as the [admin API][crate::api] get a [`CurrentCertificate`] accessor. The
//! record behind it is only ever replaced wholesale, after the new one has been persisted.

use crate::issuance::DynCertificateIssuer;
use crate::notify::{CertificateRenewed, DynRenewalNotifier};
use crate::shutdown::Shutdown;
use crate::store::{CertificateRecord, CertificateStore};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

pub mod clock;

pub use clock::{Clock, DynClock, SystemClock};

/// Immutable timing configuration of a [`RenewalScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    pub check_interval: Duration,
    pub renewal_threshold_days: u32,
    /// Delay before the next check after a check died unexpectedly.
    pub error_backoff: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(6 * 3600),
            renewal_threshold_days: 30,
            error_backoff: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Starting,
    Idle,
    Checking,
    Renewing,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Starting => "starting",
            SchedulerState::Idle => "idle",
            SchedulerState::Checking => "checking",
            SchedulerState::Renewing => "renewing",
        };
        f.write_str(s)
    }
}

/// Result of one check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The current certificate is outside the renewal window.
    Fresh,
    Renewed,
    /// The issuance attempt failed; the previous record stays in place.
    Failed,
    /// The attempt task died. The loop backs off before the next check.
    Unexpected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Scheduled,
    Forced,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Scheduled => "scheduled",
            Trigger::Forced => "forced",
        })
    }
}

/// Lifetime summary of the current certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateStatus {
    Missing,
    Present {
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
        days_remaining: i64,
        /// Whether the certificate is outside the renewal window.
        fresh: bool,
    },
}

/// Cloneable read accessor over the active certificate.
#[derive(Debug, Clone, Default)]
pub struct CurrentCertificate {
    slot: Arc<ArcSwapOption<CertificateRecord>>,
}

impl CurrentCertificate {
    pub fn load(&self) -> Option<Arc<CertificateRecord>> {
        self.slot.load_full()
    }

    pub fn status(&self, threshold_days: u32, now: OffsetDateTime) -> CertificateStatus {
        let guard = self.slot.load();
        match guard.as_deref() {
            None => CertificateStatus::Missing,
            Some(record) => CertificateStatus::Present {
                not_before: record.not_before,
                not_after: record.not_after,
                days_remaining: record.days_remaining(now),
                fresh: CertificateStore::is_valid(Some(record), threshold_days, now),
            },
        }
    }

    fn replace(&self, record: Arc<CertificateRecord>) {
        self.slot.store(Some(record));
    }
}

struct Inner {
    policy: RenewalPolicy,
    issuer: DynCertificateIssuer,
    store: CertificateStore,
    notifier: DynRenewalNotifier,
    clock: DynClock,
    shutdown: Shutdown,
    current: CurrentCertificate,
    state: watch::Sender<SchedulerState>,
    // Held for the whole of every issuance attempt, scheduled or forced.
    attempt: Mutex<()>,
}

impl Inner {
    fn set_state(&self, state: SchedulerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "scheduler state changed");
        }
    }

    /// Run one attempt in its own task so a dropped caller can't abandon it halfway.
    async fn renew(self: &Arc<Self>, trigger: Trigger) -> CheckOutcome {
        let inner = Arc::clone(self);
        let attempt = tokio::spawn(async move { inner.run_attempt(trigger).await });

        match attempt.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(reason = %trigger, error = %err, "renewal attempt aborted unexpectedly");
                if let Ok(_idle) = self.attempt.try_lock() {
                    self.set_state(SchedulerState::Idle);
                }
                CheckOutcome::Unexpected
            }
        }
    }

    /// The state only moves while the attempt lock is held. A scheduled check decides on
    /// freshness under the lock, so it sees whatever an attempt queued ahead of it produced.
    async fn run_attempt(&self, trigger: Trigger) -> CheckOutcome {
        let _exclusive = self.attempt.lock().await;

        if trigger == Trigger::Scheduled {
            self.set_state(SchedulerState::Checking);
            if self.current.load().is_none() {
                self.load_stored().await;
            }

            let now = self.clock.now();
            let threshold = self.policy.renewal_threshold_days;
            let current = self.current.load();
            if CertificateStore::is_valid(current.as_deref(), threshold, now) {
                debug!(
                    days_remaining = ?current.map(|record| record.days_remaining(now)),
                    threshold, "certificate still fresh"
                );
                self.set_state(SchedulerState::Idle);
                return CheckOutcome::Fresh;
            }
        }

        self.set_state(SchedulerState::Renewing);
        info!(reason = %trigger, domain = self.issuer.domain(), "renewing certificate");

        let outcome = match self.issuer.issue(self.shutdown.clone()).await {
            Ok(record) => {
                let event = CertificateRenewed {
                    timestamp: self.clock.now(),
                    not_before: record.not_before,
                    not_after: record.not_after,
                };
                self.current.replace(Arc::new(record));
                self.notifier.certificate_renewed(event);
                info!(reason = %trigger, not_after = %event.not_after, "certificate renewed");
                CheckOutcome::Renewed
            }
            Err(err) => {
                warn!(
                    reason = %trigger,
                    error = %err,
                    "renewal failed, keeping current certificate"
                );
                CheckOutcome::Failed
            }
        };
        self.set_state(SchedulerState::Idle);
        outcome
    }

    async fn load_stored(&self) {
        let domain = self.issuer.domain();
        match self.store.load(domain).await {
            Ok(Some(record)) => {
                info!(
                    domain,
                    not_after = %record.not_after,
                    days_remaining = record.days_remaining(self.clock.now()),
                    "using stored certificate"
                );
                self.current.replace(Arc::new(record));
            }
            Ok(None) => info!(domain, "no stored certificate yet"),
            Err(err) => warn!(domain, error = %err, "stored certificate unusable"),
        }
    }
}

/// Periodic renewal driver. Cheap to clone; every clone drives the same scheduler.
#[derive(Clone)]
pub struct RenewalScheduler {
    inner: Arc<Inner>,
}

impl RenewalScheduler {
    pub fn new(
        policy: RenewalPolicy,
        issuer: DynCertificateIssuer,
        store: CertificateStore,
        notifier: DynRenewalNotifier,
        clock: DynClock,
        shutdown: Shutdown,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Starting);
        Self {
            inner: Arc::new(Inner {
                policy,
                issuer,
                store,
                notifier,
                clock,
                shutdown,
                current: CurrentCertificate::default(),
                state,
                attempt: Mutex::new(()),
            }),
        }
    }

    pub fn policy(&self) -> RenewalPolicy {
        self.inner.policy
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    pub fn current(&self) -> CurrentCertificate {
        self.inner.current.clone()
    }

    /// Load the stored certificate, if any, and become idle. Never issues.
    pub async fn start(&self) {
        self.inner.load_stored().await;
        self.inner.set_state(SchedulerState::Idle);
    }

    /// Run one check cycle now: renew if the current certificate is missing or inside the
    /// renewal window. Waits for an attempt already in flight before deciding.
    pub async fn check_now(&self) -> CheckOutcome {
        self.inner.renew(Trigger::Scheduled).await
    }

    /// Renew immediately regardless of the current certificate's lifetime. Waits for an
    /// attempt already in flight, then runs its own.
    pub async fn force_renewal(&self) -> bool {
        self.inner.renew(Trigger::Forced).await == CheckOutcome::Renewed
    }

    /// The scheduler loop. Returns once shutdown has been requested.
    pub async fn run(self) {
        let policy = self.inner.policy;
        let mut shutdown = self.inner.shutdown.clone();
        info!(
            check_interval_secs = policy.check_interval.as_secs(),
            threshold_days = policy.renewal_threshold_days,
            "renewal scheduler running"
        );

        let mut delay = policy.check_interval;
        loop {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.requested() => break,
            }

            delay = match self.check_now().await {
                CheckOutcome::Unexpected => policy.error_backoff,
                _ => policy.check_interval,
            };
            if shutdown.is_requested() {
                break;
            }
        }
        info!("renewal scheduler stopped");
    }
}
