use std::{collections::HashMap, sync::Arc};

use tokio::{sync::mpsc, task::JoinSet, time::Instant};
use tracing::{debug, warn};

use super::{PartitionProgress, Statement};
use crate::{
    cluster::{Cluster, Node},
    commands::{CommandError, QueryCommand, ScanCommand, StreamCommand},
    policy::{BasePolicy, QueryPolicy, ScanPolicy},
    Bins, Record, ResultCode,
};

/// What the stream workers execute against each node.
pub(crate) enum StreamJob {
    Scan {
        policy: ScanPolicy,
        namespace: String,
        set_name: String,
        bins: Bins,
    },
    Query {
        policy: QueryPolicy,
        statement: Arc<Statement>,
    },
}

impl StreamJob {
    fn base(&self) -> &BasePolicy {
        match self {
            Self::Scan { policy, .. } => &policy.base_policy,
            Self::Query { policy, .. } => &policy.base_policy,
        }
    }

    fn namespace(&self) -> &str {
        match self {
            Self::Scan { namespace, .. } => namespace,
            Self::Query { statement, .. } => &statement.namespace,
        }
    }

    fn max_records(&self) -> u64 {
        match self {
            Self::Scan { policy, .. } => policy.max_records,
            Self::Query { policy, .. } => policy.max_records,
        }
    }

    fn max_concurrent_nodes(&self) -> usize {
        match self {
            Self::Scan { policy, .. } => policy.max_concurrent_nodes,
            Self::Query { policy, .. } => policy.max_concurrent_nodes,
        }
    }
}

/// Drives a scan or query to completion: groups pending partitions by
/// their current owner, dispatches one stream command per node, and
/// re-routes failed partitions against fresh topology snapshots.
pub(crate) struct PartitionTracker {
    cluster: Arc<Cluster>,
    progress: Arc<PartitionProgress>,
    job: StreamJob,
    tx: mpsc::Sender<Result<Record, CommandError>>,
    task_id: u64,
}

impl PartitionTracker {
    pub fn new(
        cluster: Arc<Cluster>,
        progress: Arc<PartitionProgress>,
        job: StreamJob,
        tx: mpsc::Sender<Result<Record, CommandError>>,
        task_id: u64,
    ) -> Self {
        Self {
            cluster,
            progress,
            job,
            tx,
            task_id,
        }
    }

    /// Run rounds until every partition is done, the record budget is
    /// exhausted, the caller hangs up, or a partition runs out of retries.
    /// Dropping the queue sender ends the caller's iterator.
    pub async fn run(self) {
        let base = self.job.base();
        let deadline = base.deadline();
        let max_retries = base.max_retries;
        let sleep_between_retries = base.sleep_between_retries;

        loop {
            if self.tx.is_closed() || self.progress.exhausted() {
                return;
            }

            let pending = self.progress.pending();
            if pending.is_empty() {
                return;
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.fail(CommandError::Timeout {
                    attempts: 0,
                    last: None,
                })
                .await;
                return;
            }

            // Group the pending partitions by their current owner.
            let table = self.cluster.partition_table();
            let namespace = self.job.namespace();
            let mut groups: HashMap<String, (Arc<Node>, Vec<(u16, Option<[u8; 20]>)>)> =
                HashMap::new();
            let mut unrouted = vec![];

            for (id, digest) in pending {
                match table.owner(namespace, id as usize) {
                    Some(node) => {
                        groups
                            .entry(node.name().to_owned())
                            .or_insert_with(|| (node, vec![]))
                            .1
                            .push((id, digest));
                    }
                    None => unrouted.push(id),
                }
            }
            drop(table);

            if !unrouted.is_empty() {
                debug!(partitions = unrouted.len(), "partitions without an owner");
            }

            if groups.is_empty() {
                let retries = self.progress.mark_pending(&unrouted);
                if retries > max_retries {
                    self.fail(CommandError::server(ResultCode::PartitionUnavailable))
                        .await;
                    return;
                }
                tokio::time::sleep(sleep_between_retries).await;
                continue;
            }

            if !self.dispatch(groups, max_retries).await {
                return;
            }
        }
    }

    /// Dispatch one round of per-node stream commands, bounded by the
    /// configured node parallelism. Returns false when the whole stream
    /// failed.
    async fn dispatch(
        &self,
        groups: HashMap<String, (Arc<Node>, Vec<(u16, Option<[u8; 20]>)>)>,
        max_retries: usize,
    ) -> bool {
        let limit = match self.job.max_concurrent_nodes() {
            0 => groups.len(),
            limit => limit.min(groups.len()),
        };

        let mut queue = groups.into_values().collect::<Vec<_>>().into_iter();
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() < limit {
                let Some((node, partitions)) = queue.next() else {
                    break;
                };
                let ids = partitions.iter().map(|(id, _)| *id).collect::<Vec<_>>();
                self.progress.mark_in_progress(&ids);
                in_flight.spawn(self.stream_one(node, partitions, ids));
            }

            match in_flight.join_next().await {
                Some(Ok((ids, Ok(())))) => {
                    // Anything the node did not acknowledge as complete
                    // goes back into the pool of pending partitions.
                    let retries = self.progress.mark_pending(&ids);
                    if retries > max_retries {
                        self.fail(CommandError::server(ResultCode::PartitionUnavailable))
                            .await;
                        return false;
                    }
                }
                Some(Ok((ids, Err(err)))) => {
                    warn!(%err, "stream command failed, re-routing partitions");
                    let retries = self.progress.mark_pending(&ids);
                    if retries > max_retries {
                        self.fail(err).await;
                        return false;
                    }
                }
                Some(Err(err)) => {
                    warn!(%err, "stream worker panicked");
                    return false;
                }
                None => return true,
            }
        }
    }

    /// Build the per-node stream command as an owned future, so it can run
    /// on its own task.
    fn stream_one(
        &self,
        node: Arc<Node>,
        partitions: Vec<(u16, Option<[u8; 20]>)>,
        ids: Vec<u16>,
    ) -> impl std::future::Future<Output = (Vec<u16>, Result<(), CommandError>)> + Send + 'static
    {
        let progress = Arc::clone(&self.progress);
        let tx = self.tx.clone();
        let n_partitions = self.cluster.n_partitions();
        let task_id = self.task_id;
        let max_records = self.job.max_records();

        enum OwnedJob {
            Scan {
                policy: ScanPolicy,
                namespace: String,
                set_name: String,
                bins: Bins,
            },
            Query {
                policy: QueryPolicy,
                statement: Arc<Statement>,
            },
        }

        let job = match &self.job {
            StreamJob::Scan {
                policy,
                namespace,
                set_name,
                bins,
            } => OwnedJob::Scan {
                policy: policy.clone(),
                namespace: namespace.clone(),
                set_name: set_name.clone(),
                bins: bins.clone(),
            },
            StreamJob::Query { policy, statement } => OwnedJob::Query {
                policy: policy.clone(),
                statement: Arc::clone(statement),
            },
        };

        async move {
            let stream = StreamCommand::new(node, tx, progress, n_partitions, task_id);
            let result = match job {
                OwnedJob::Scan {
                    policy,
                    namespace,
                    set_name,
                    bins,
                } => {
                    ScanCommand::new(
                        &policy,
                        stream,
                        &namespace,
                        &set_name,
                        bins,
                        partitions,
                        max_records,
                    )
                    .execute()
                    .await
                }
                OwnedJob::Query { policy, statement } => {
                    QueryCommand::new(&policy, stream, statement, partitions, max_records)
                        .execute()
                        .await
                }
            };
            (ids, result)
        }
    }

    async fn fail(&self, err: CommandError) {
        self.tx.send(Err(err)).await.ok();
    }
}
