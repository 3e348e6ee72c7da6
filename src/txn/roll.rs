use std::{collections::HashMap, sync::Arc};

use tokio::task::JoinSet;
use tracing::warn;

use super::{AbortStatus, CommitError, CommitStatus, State, Txn, MONITOR_SET};
use crate::{
    cluster::{partition::Partition, Cluster, Node},
    commands::{buffer::MessageHeader, Command, CommandError, DeleteCommand, StreamCommand},
    net::Connection,
    policy::{BatchPolicy, Replica, WritePolicy},
    Key, ResultCode,
};

/// Runs the verify and roll phases of transaction commit/abort.
pub(crate) struct TxnRoll {
    cluster: Arc<Cluster>,
}

enum Phase {
    Verify(Vec<(Key, u64)>),
    RollForward(Vec<Key>),
    RollBack(Vec<Key>),
}

impl TxnRoll {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self { cluster }
    }

    pub async fn commit(&self, txn: &Txn) -> Result<CommitStatus, CommitError> {
        if !txn.set_roll_attempted() {
            return match txn.state() {
                State::Committed | State::Committing => Ok(CommitStatus::AlreadyCommitted),
                _ => Err(CommitError::AlreadyAborted),
            };
        }

        let reads = txn.reads_snapshot();
        let writes = txn.writes_snapshot();

        // Nothing happened under this transaction; there is nothing to
        // verify or make durable.
        if reads.is_empty() && writes.is_empty() && !txn.monitor_in_doubt() {
            txn.set_state(State::Committed);
            return Ok(CommitStatus::Ok);
        }

        txn.set_state(State::Verifying);
        if let Err(err) = self.run_phase(txn.id(), Phase::Verify(reads)).await {
            // Fall through to a roll-back either way. A version mismatch
            // is the regular verify failure; anything else (for example an
            // unavailable partition) is surfaced with its own code.
            txn.set_state(State::Aborting);
            self.run_phase(txn.id(), Phase::RollBack(writes)).await.ok();
            self.close_monitor(txn).await.ok();
            txn.set_state(State::Aborted);
            return if err.result_code() == ResultCode::VersionMismatch {
                Ok(CommitStatus::VerifyFailed)
            } else {
                Err(CommitError::Command(err))
            };
        }

        txn.set_state(State::Committing);
        let mut status = CommitStatus::Ok;
        if self
            .run_phase(txn.id(), Phase::RollForward(writes))
            .await
            .is_err()
        {
            status = CommitStatus::RollForwardAbandoned;
        }

        if status == CommitStatus::Ok && self.close_monitor(txn).await.is_err() {
            status = CommitStatus::CloseAbandoned;
        }

        txn.set_state(State::Committed);
        Ok(status)
    }

    pub async fn abort(&self, txn: &Txn) -> Result<AbortStatus, CommitError> {
        if !txn.set_roll_attempted() {
            return match txn.state() {
                State::Aborted | State::Aborting => Ok(AbortStatus::AlreadyAborted),
                _ => Err(CommitError::AlreadyCommitted),
            };
        }

        txn.set_state(State::Aborting);
        let writes = txn.writes_snapshot();

        let mut status = AbortStatus::Ok;
        if self
            .run_phase(txn.id(), Phase::RollBack(writes))
            .await
            .is_err()
        {
            status = AbortStatus::RollBackAbandoned;
        }

        if status == AbortStatus::Ok && self.close_monitor(txn).await.is_err() {
            status = AbortStatus::CloseAbandoned;
        }

        txn.set_state(State::Aborted);
        Ok(status)
    }

    /// Dispatch one phase over all involved keys, grouped by master node.
    /// The error of the first failing entry or sub-command is reported; a
    /// key whose partition has no active master fails the phase with the
    /// unavailable code before anything is sent.
    async fn run_phase(&self, txn_id: u64, phase: Phase) -> Result<(), CommandError> {
        let (keys, mode): (Vec<Key>, Mode) = match phase {
            Phase::Verify(reads) => {
                let (keys, versions): (Vec<_>, Vec<_>) = reads.into_iter().unzip();
                (keys, Mode::Verify(versions))
            }
            Phase::RollForward(keys) => (keys, Mode::Roll { forward: true }),
            Phase::RollBack(keys) => (keys, Mode::Roll { forward: false }),
        };
        if keys.is_empty() {
            return Ok(());
        }

        let n_partitions = self.cluster.n_partitions();
        let mut groups: HashMap<String, (Arc<Node>, Vec<(usize, Key)>)> = HashMap::new();
        let mut routed = 0_usize;
        for (index, key) in keys.iter().enumerate() {
            let partition = Partition::new_by_key(key, n_partitions);
            match self.cluster.node_for(&partition, Replica::Master, 0) {
                Some(node) => {
                    groups
                        .entry(node.name().to_owned())
                        .or_insert_with(|| (node, vec![]))
                        .1
                        .push((index, key.clone()));
                    routed += 1;
                }
                None => warn!(?key, "no node available for transaction key"),
            }
        }
        if routed < keys.len() {
            return Err(CommandError::server(ResultCode::PartitionUnavailable));
        }

        let versions = match &mode {
            Mode::Verify(versions) => versions.clone(),
            Mode::Roll { .. } => vec![],
        };

        let mut in_flight = JoinSet::new();
        for (node, entries) in groups.into_values() {
            let mode = mode.clone();
            let entries = entries
                .into_iter()
                .map(|(index, key)| {
                    let version = versions.get(index).copied().unwrap_or_default();
                    (index, key, version)
                })
                .collect();
            let mut command = TxnBatchCommand::new(node, txn_id, mode, entries);
            in_flight.spawn(async move {
                let outcome = command.execute().await;
                (command, outcome)
            });
        }

        let mut failure: Option<CommandError> = None;
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((command, Ok(()))) => {
                    let failed = command
                        .results
                        .iter()
                        .map(|(_, code)| *code)
                        .find(|code| !phase_code_ok(&command.mode, *code));
                    if let (Some(code), None) = (failed, &failure) {
                        failure = Some(CommandError::server(code));
                    }
                }
                Ok((_, Err(err))) => {
                    warn!(%err, "transaction phase command failed");
                    failure.get_or_insert(err);
                }
                Err(err) => {
                    warn!(%err, "transaction phase worker panicked");
                    failure
                        .get_or_insert(CommandError::server(ResultCode::ClientError));
                }
            }
        }

        match failure {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Remove the transaction's monitor record.
    async fn close_monitor(&self, txn: &Txn) -> Result<(), CommandError> {
        let Some(namespace) = txn.namespace() else {
            return Ok(());
        };
        if !txn.monitor_established() && !txn.monitor_in_doubt() {
            return Ok(());
        }

        let key = monitor_key(&namespace, txn.id());
        let policy = WritePolicy::default();
        let mut command = DeleteCommand::new(&policy, Arc::clone(&self.cluster), &key);
        match command.execute().await {
            Ok(()) => Ok(()),
            Err(CommandError::Server { code, .. }) if code == ResultCode::KeyNotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// The key of a transaction's server-side monitor record.
pub(crate) fn monitor_key(namespace: &str, txn_id: u64) -> Key {
    Key::new(namespace.to_owned(), MONITOR_SET, txn_id as i64)
}

/// Whether a per-entry code counts as success for the given phase.
fn phase_code_ok(mode: &Mode, code: ResultCode) -> bool {
    match mode {
        Mode::Verify(_) => code == ResultCode::Ok,
        // Repeated rolls are server-acknowledged no-ops.
        Mode::Roll { forward: true } => {
            matches!(code, ResultCode::Ok | ResultCode::TxnAlreadyCommitted)
        }
        Mode::Roll { forward: false } => {
            matches!(code, ResultCode::Ok | ResultCode::TxnAlreadyAborted)
        }
    }
}

#[derive(Clone)]
enum Mode {
    Verify(Vec<u64>),
    Roll { forward: bool },
}

/// One node's share of a verify or roll batch.
struct TxnBatchCommand {
    node: Arc<Node>,
    txn_id: u64,
    mode: Mode,
    entries: Vec<(usize, Key, u64)>,
    /// Per-entry outcome, positionally matching `entries`.
    results: Vec<(usize, ResultCode)>,
}

impl TxnBatchCommand {
    fn new(node: Arc<Node>, txn_id: u64, mode: Mode, entries: Vec<(usize, Key, u64)>) -> Self {
        let results = entries
            .iter()
            .map(|(index, ..)| (*index, ResultCode::NoResponse))
            .collect();
        Self {
            node,
            txn_id,
            mode,
            entries,
            results,
        }
    }

    async fn execute(&mut self) -> Result<(), CommandError> {
        let policy = BatchPolicy::default().base_policy;
        crate::commands::execute(&policy, self).await
    }
}

#[async_trait::async_trait]
impl Command for TxnBatchCommand {
    async fn node(&mut self, _sequence: usize) -> Result<Arc<Node>, CommandError> {
        Ok(Arc::clone(&self.node))
    }

    fn prepare_buffer(&mut self, conn: &mut Connection, _node: &Node) -> Result<(), CommandError> {
        match &self.mode {
            Mode::Verify(_) => {
                let entries: Vec<(usize, Key, u64)> = self.entries.clone();
                conn.buffer()
                    .set_txn_verify(&BatchPolicy::default(), self.txn_id, &entries)
                    .map_err(Into::into)
            }
            Mode::Roll { forward } => {
                let entries: Vec<(usize, Key)> = self
                    .entries
                    .iter()
                    .map(|(index, key, _)| (*index, key.clone()))
                    .collect();
                conn.buffer()
                    .set_txn_roll(&BatchPolicy::default(), self.txn_id, &entries, *forward)
                    .map_err(Into::into)
            }
        }
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<(), CommandError> {
        let positions: HashMap<usize, usize> = self
            .results
            .iter()
            .enumerate()
            .map(|(position, (index, _))| (*index, position))
            .collect();

        loop {
            conn.read_buffer(crate::commands::buffer::PROTO_HEADER_SIZE)
                .await?;
            let proto = conn.buffer().read_proto_header()?;
            conn.bookmark();

            while conn.bytes_read() < proto.size {
                conn.read_buffer(MessageHeader::SIZE).await?;
                let header = conn.buffer().read_message_header()?;

                if header
                    .info_attr
                    .contains(crate::commands::buffer::InfoAttr::LAST)
                {
                    conn.finish_exchange();
                    return match header.result_code {
                        ResultCode::Ok => Ok(()),
                        code => Err(CommandError::server(code)),
                    };
                }

                let index = header.timeout_or_index as usize;
                StreamCommand::parse_key(conn, header.field_count as usize).await?;
                if let Some(&position) = positions.get(&index) {
                    self.results[position].1 = header.result_code;
                }
            }
        }
    }

    fn is_write(&self) -> bool {
        matches!(self.mode, Mode::Roll { .. })
    }
}
