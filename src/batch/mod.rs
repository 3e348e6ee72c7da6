//! Multi-record requests: a flat list of per-key operations is split by
//! owning node, dispatched in parallel and reassembled positionally.

use std::{collections::HashMap, sync::Arc};

use tokio::{
    task::JoinSet,
    time::{sleep, Instant},
};
use tracing::warn;

use crate::{
    cluster::{partition::Partition, Cluster, Node},
    commands::{BatchCommand, Result},
    operations::OwnedOperation,
    policy::{BatchPolicy, Concurrency, Replica},
    Bins, Key, Record, ResultCode,
};

/// The per-key operation of one batch entry.
#[derive(Clone, Debug)]
pub enum BatchOp {
    /// Read the selected bins.
    Read(Bins),
    /// Apply the given write operations.
    Write(Vec<OwnedOperation>),
    /// Delete the record.
    Delete,
    /// Invoke a server-side UDF on the record.
    Udf {
        package: String,
        function: String,
        args: Vec<crate::Value>,
    },
}

impl BatchOp {
    pub(crate) fn is_write(&self) -> bool {
        !matches!(self, Self::Read(_))
    }

    pub(crate) fn wire_kind(&self) -> u8 {
        use crate::commands::buffer::batch_kind;

        match self {
            Self::Read(_) => batch_kind::READ,
            Self::Write(_) => batch_kind::WRITE,
            Self::Delete => batch_kind::DELETE,
            Self::Udf { .. } => batch_kind::UDF,
        }
    }
}

/// One entry of a batch request, carrying its own result after the call.
#[derive(Clone, Debug)]
pub struct BatchRecord {
    /// The record key.
    pub key: Key,
    /// The operation to perform.
    pub op: BatchOp,
    /// The record returned for read/UDF entries, filled by the call.
    pub record: Option<Record>,
    /// The per-entry outcome; [`ResultCode::NoResponse`] when no server
    /// answered for this entry.
    pub result: ResultCode,
    /// Whether a write entry may have been applied even though its outcome
    /// is unknown.
    pub in_doubt: bool,
}

impl BatchRecord {
    #[must_use]
    pub fn new(key: Key, op: BatchOp) -> Self {
        Self {
            key,
            op,
            record: None,
            result: ResultCode::NoResponse,
            in_doubt: false,
        }
    }

    /// Shorthand for a read entry.
    #[must_use]
    pub fn read(key: Key, bins: impl Into<Bins>) -> Self {
        Self::new(key, BatchOp::Read(bins.into()))
    }

    /// Shorthand for a delete entry.
    #[must_use]
    pub fn delete(key: Key) -> Self {
        Self::new(key, BatchOp::Delete)
    }

    /// Whether this entry ended in an expected state: found, legitimately
    /// missing, or filtered out.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(
            self.result,
            ResultCode::Ok | ResultCode::KeyNotFound | ResultCode::FilteredOut
        )
    }
}

/// Positional batch results: entry `i` always answers for input key `i`.
#[derive(Debug)]
pub struct BatchResults {
    pub records: Vec<BatchRecord>,
    /// True when every entry ended in an expected state.
    pub success: bool,
}

/// Plans and runs batch requests: groups entries by owning node, dispatches
/// the groups concurrently, and re-plans only the failed entries on retry.
pub(crate) struct BatchExecutor {
    cluster: Arc<Cluster>,
}

impl BatchExecutor {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self { cluster }
    }

    pub async fn execute(
        &self,
        policy: &BatchPolicy,
        records: Vec<BatchRecord>,
    ) -> Result<BatchResults> {
        let deadline = policy.base_policy.deadline();
        let mut records = records;
        for record in &mut records {
            record.result = ResultCode::NoResponse;
            record.record = None;
            record.in_doubt = false;
        }

        let mut pending: Vec<usize> = (0..records.len()).collect();
        let mut attempts = 0_usize;

        while !pending.is_empty() {
            let commands = self.plan(policy, &mut records, &pending, attempts);
            if !commands.is_empty() {
                let finished = dispatch(commands, policy.concurrency).await;
                for command in finished {
                    for (index, entry) in command.entries {
                        records[index] = entry;
                    }
                }
            }

            pending = records
                .iter()
                .enumerate()
                .filter(|(_, record)| {
                    record.result == ResultCode::NoResponse || record.result.retryable()
                })
                .map(|(index, _)| index)
                .collect();
            if pending.is_empty() {
                break;
            }

            attempts += 1;
            if attempts > policy.base_policy.max_retries {
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
            if !policy.base_policy.sleep_between_retries.is_zero() {
                let mut pause = policy.base_policy.sleep_between_retries;
                if let Some(deadline) = deadline {
                    pause = pause.min(deadline.saturating_duration_since(Instant::now()));
                }
                sleep(pause).await;
            }
        }

        let success = records.iter().all(BatchRecord::is_ok);
        Ok(BatchResults { records, success })
    }

    /// Group the pending entries by their owning node under the current
    /// topology snapshot. Entries whose partition has no active owner are
    /// stamped with the unavailable code; the outer loop re-plans them
    /// until the retry budget runs out, after which the code is terminal.
    fn plan(
        &self,
        policy: &BatchPolicy,
        records: &mut [BatchRecord],
        pending: &[usize],
        sequence: usize,
    ) -> Vec<BatchCommand> {
        let n_partitions = self.cluster.n_partitions();
        let mut groups: HashMap<String, (Arc<Node>, Vec<(usize, BatchRecord)>)> = HashMap::new();

        for &index in pending {
            let record = &records[index];
            let partition = Partition::new_by_key(&record.key, n_partitions);
            let replica = if record.op.is_write() {
                Replica::Master
            } else {
                policy.base_policy.replica
            };

            match self.cluster.node_for(&partition, replica, sequence) {
                Some(node) => {
                    groups
                        .entry(node.name().to_owned())
                        .or_insert_with(|| (node, vec![]))
                        .1
                        .push((index, record.clone()));
                }
                None => {
                    warn!(key = ?record.key, "no node available for batch entry");
                    records[index].result = ResultCode::PartitionUnavailable;
                }
            }
        }

        groups
            .into_values()
            .map(|(node, entries)| BatchCommand::new(policy.clone(), node, entries))
            .collect()
    }
}

/// Run the sub-commands with the configured amount of parallelism and hand
/// them back once they all finished.
async fn dispatch(commands: Vec<BatchCommand>, concurrency: Concurrency) -> Vec<BatchCommand> {
    let limit = match concurrency {
        Concurrency::Sequential => 1,
        Concurrency::Parallel(0) => commands.len(),
        Concurrency::Parallel(limit) => limit.min(commands.len()),
    };

    let mut finished = Vec::with_capacity(commands.len());
    let mut queue = commands.into_iter();
    let mut in_flight = JoinSet::new();

    loop {
        while in_flight.len() < limit {
            let Some(mut command) = queue.next() else {
                break;
            };
            in_flight.spawn(async move {
                if let Err(err) = command.execute().await {
                    warn!(node = ?command.node, %err, "batch sub-command failed");
                }
                command
            });
        }

        match in_flight.join_next().await {
            Some(Ok(command)) => finished.push(command),
            Some(Err(err)) => warn!(%err, "batch sub-command panicked"),
            None => break,
        }
    }

    finished
}
