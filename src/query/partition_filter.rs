use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc, Mutex,
};

/// Progress state of one partition within a scan or query.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PartitionState {
    /// Not yet handed to any node.
    #[default]
    Pending,
    /// Currently being streamed by some node.
    InProgress,
    /// Completely consumed.
    Done,
}

/// Per-partition bookkeeping of a scan or query.
#[derive(Clone, Debug)]
pub struct PartitionStatus {
    /// The partition id.
    pub id: u16,
    /// Current progress state.
    pub state: PartitionState,
    /// How often this partition was re-dispatched after a failure.
    pub retry_count: usize,
    /// Digest of the last record received, the resumption cursor.
    pub(crate) last_digest: Option<[u8; 20]>,
}

impl PartitionStatus {
    const fn new(id: u16) -> Self {
        Self {
            id,
            state: PartitionState::Pending,
            retry_count: 0,
            last_digest: None,
        }
    }
}

/// Selects which partitions a scan or query covers and tracks their
/// progress.
///
/// The filter is updated in place while the scan runs: re-submitting the
/// same filter after a failure resumes where the previous run stopped,
/// skipping completed partitions.
#[derive(Clone, Debug, Default)]
pub struct PartitionFilter {
    begin: usize,
    count: usize,
    progress: Arc<OnceProgress>,
}

#[derive(Debug, Default)]
struct OnceProgress(Mutex<Option<Arc<PartitionProgress>>>);

impl PartitionFilter {
    /// Cover all partitions.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Cover `count` partitions starting at `begin`.
    #[must_use]
    pub fn range(begin: usize, count: usize) -> Self {
        Self {
            begin,
            count,
            progress: Arc::default(),
        }
    }

    /// Cover a single partition.
    #[must_use]
    pub fn partition(id: usize) -> Self {
        Self::range(id, 1)
    }

    /// Whether every covered partition completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        match &*self.progress.0.lock().unwrap() {
            Some(progress) => progress.pending().is_empty(),
            None => false,
        }
    }

    /// Snapshot of the per-partition progress. Empty until a scan or query
    /// first runs with this filter.
    #[must_use]
    pub fn statuses(&self) -> Vec<PartitionStatus> {
        match &*self.progress.0.lock().unwrap() {
            Some(progress) => progress.statuses.lock().unwrap().clone(),
            None => vec![],
        }
    }

    /// The shared progress tracker, created on first use and re-armed on
    /// resumption.
    pub(crate) fn progress(&self, n_partitions: usize, max_records: u64) -> Arc<PartitionProgress> {
        let mut slot = self.progress.0.lock().unwrap();
        let progress = slot.get_or_insert_with(|| {
            let count = if self.count == 0 {
                n_partitions - self.begin
            } else {
                self.count
            };
            Arc::new(PartitionProgress::new(self.begin, count))
        });

        progress.arm(max_records);
        Arc::clone(progress)
    }
}

/// Shared progress state between the scan workers and the caller's filter.
#[derive(Debug)]
pub(crate) struct PartitionProgress {
    begin: usize,
    statuses: Mutex<Vec<PartitionStatus>>,
    // Remaining record budget; negative once the cap was hit.
    remaining: AtomicI64,
}

impl PartitionProgress {
    fn new(begin: usize, count: usize) -> Self {
        Self {
            begin,
            statuses: Mutex::new(
                (begin..begin + count)
                    .map(|id| PartitionStatus::new(id as u16))
                    .collect(),
            ),
            remaining: AtomicI64::new(i64::MAX),
        }
    }

    /// Reset the record budget and roll interrupted partitions back to
    /// pending, keeping completed ones out of the next run.
    fn arm(&self, max_records: u64) {
        self.remaining.store(
            if max_records == 0 {
                i64::MAX
            } else {
                max_records.min(i64::MAX as u64) as i64
            },
            Ordering::Relaxed,
        );

        let mut statuses = self.statuses.lock().unwrap();
        for status in statuses.iter_mut() {
            if status.state == PartitionState::InProgress {
                status.state = PartitionState::Pending;
            }
        }
    }

    /// Record one streamed record. Returns false once the record budget is
    /// exhausted and streaming should stop.
    pub fn on_record(&self, partition_id: usize, digest: &[u8; 20]) -> bool {
        if self.remaining.fetch_sub(1, Ordering::Relaxed) <= 0 {
            return false;
        }

        let mut statuses = self.statuses.lock().unwrap();
        if let Some(status) = self.status_mut(&mut statuses, partition_id) {
            status.last_digest = Some(*digest);
        }
        true
    }

    pub fn on_partition_done(&self, partition_id: usize) {
        let mut statuses = self.statuses.lock().unwrap();
        if let Some(status) = self.status_mut(&mut statuses, partition_id) {
            status.state = PartitionState::Done;
        }
    }

    /// Whether the record budget ran out.
    pub fn exhausted(&self) -> bool {
        self.remaining.load(Ordering::Relaxed) <= 0
    }

    /// Partitions still waiting to be streamed, with their resumption
    /// cursors.
    pub fn pending(&self) -> Vec<(u16, Option<[u8; 20]>)> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|status| status.state == PartitionState::Pending)
            .map(|status| (status.id, status.last_digest))
            .collect()
    }

    pub fn mark_in_progress(&self, ids: &[u16]) {
        let mut statuses = self.statuses.lock().unwrap();
        for &id in ids {
            if let Some(status) = self.status_mut(&mut statuses, id as usize) {
                status.state = PartitionState::InProgress;
            }
        }
    }

    /// Roll the given partitions back to pending after a node failure,
    /// counting the retry. Returns the highest retry count among them.
    pub fn mark_pending(&self, ids: &[u16]) -> usize {
        let mut statuses = self.statuses.lock().unwrap();
        let mut max_retries = 0;
        for &id in ids {
            if let Some(status) = self.status_mut(&mut statuses, id as usize) {
                if status.state != PartitionState::Done {
                    status.state = PartitionState::Pending;
                    status.retry_count += 1;
                    max_retries = max_retries.max(status.retry_count);
                }
            }
        }
        max_retries
    }

    #[allow(clippy::unused_self)]
    fn status_mut<'a>(
        &self,
        statuses: &'a mut [PartitionStatus],
        partition_id: usize,
    ) -> Option<&'a mut PartitionStatus> {
        partition_id
            .checked_sub(self.begin)
            .and_then(|index| statuses.get_mut(index))
    }
}

#[cfg(test)]
mod tests {
    use super::{PartitionFilter, PartitionState};

    #[test]
    fn filter_initializes_lazily() {
        let filter = PartitionFilter::all();
        assert!(filter.statuses().is_empty());
        assert!(!filter.is_done());

        let progress = filter.progress(4096, 0);
        assert_eq!(filter.statuses().len(), 4096);
        assert_eq!(progress.pending().len(), 4096);
    }

    #[test]
    fn record_budget_exhausts() {
        let filter = PartitionFilter::partition(7);
        let progress = filter.progress(4096, 2);

        let digest = [0; 20];
        assert!(progress.on_record(7, &digest));
        assert!(progress.on_record(7, &digest));
        assert!(!progress.on_record(7, &digest));
        assert!(progress.exhausted());
    }

    #[test]
    fn failed_partitions_return_to_pending() {
        let filter = PartitionFilter::range(0, 4);
        let progress = filter.progress(4096, 0);

        progress.mark_in_progress(&[0, 1, 2, 3]);
        assert!(progress.pending().is_empty());

        progress.on_partition_done(0);
        let retries = progress.mark_pending(&[1, 2]);
        assert_eq!(retries, 1);

        let pending: Vec<u16> = progress.pending().iter().map(|(id, _)| *id).collect();
        assert_eq!(pending, vec![1, 2]);

        let statuses = filter.statuses();
        assert_eq!(statuses[0].state, PartitionState::Done);
        assert_eq!(statuses[3].state, PartitionState::InProgress);
    }

    #[test]
    fn resumption_skips_done_partitions() {
        let filter = PartitionFilter::range(0, 3);
        let progress = filter.progress(4096, 0);
        progress.mark_in_progress(&[0, 1, 2]);
        progress.on_partition_done(1);

        // Re-arming (a fresh scan with the same filter) rolls interrupted
        // partitions back but keeps completed ones out.
        let progress = filter.progress(4096, 0);
        let pending: Vec<u16> = progress.pending().iter().map(|(id, _)| *id).collect();
        assert_eq!(pending, vec![0, 2]);
    }
}
