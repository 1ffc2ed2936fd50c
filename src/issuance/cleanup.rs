use crate::dns_provider::{DynDnsProvider, RecordId};
use tracing::{info, warn};

/// A challenge `TXT` record created during one issuance attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecordHandle {
    pub identifier: String,
    pub record_id: RecordId,
}

/// Per-attempt release list of challenge records.
///
/// Every record is registered the moment the provider confirms its creation. A single
/// [`CleanupList::release_all`] consumes the list and deletes each record exactly once,
/// whichever step of the attempt failed.
pub struct CleanupList {
    dns: DynDnsProvider,
    domain: String,
    handles: Vec<ChallengeRecordHandle>,
}

impl CleanupList {
    pub fn new(dns: DynDnsProvider, domain: impl Into<String>) -> Self {
        Self {
            dns,
            domain: domain.into(),
            handles: Vec::new(),
        }
    }

    pub fn register(&mut self, handle: ChallengeRecordHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Delete every registered record, returning how many deletions failed. Failures are
    /// logged and never stop the remaining deletions.
    pub async fn release_all(mut self) -> usize {
        let handles = std::mem::take(&mut self.handles);
        let mut failed = 0;
        for handle in &handles {
            match self
                .dns
                .delete_txt_record(&self.domain, &handle.record_id)
                .await
            {
                Ok(()) => info!(
                    identifier = %handle.identifier,
                    record_id = %handle.record_id,
                    "challenge record removed"
                ),
                Err(err) => {
                    failed += 1;
                    warn!(
                        identifier = %handle.identifier,
                        record_id = %handle.record_id,
                        error = %err,
                        "failed to remove challenge record"
                    );
                }
            }
        }
        failed
    }
}

impl Drop for CleanupList {
    fn drop(&mut self) {
        for handle in &self.handles {
            warn!(
                identifier = %handle.identifier,
                record_id = %handle.record_id,
                provider = self.dns.name(),
                "challenge record left behind"
            );
        }
    }
}
