use std::{fmt::Write as _, sync::Arc};

use tokio::sync::mpsc;

use crate::{
    batch::{BatchExecutor, BatchRecord, BatchResults},
    cluster::{Cluster, Node},
    commands::{
        admin_command::AdminCommand, CommandError, DeleteCommand, ExistsCommand, OperateCommand,
        ReadCommand, TouchCommand, UdfCommand, WriteCommand,
    },
    errors::{Error, Result},
    index::{CollectionIndexType, IndexType},
    net::ToHosts,
    operations::{Operation, OperationType},
    policy::{
        BasePolicy, BatchPolicy, ClientPolicy, Expiration, QueryPolicy, ScanPolicy, WritePolicy,
    },
    query::{PartitionFilter, PartitionTracker, RecordSet, Statement, StreamJob},
    txn::{self, AbortStatus, CommitError, CommitStatus, Txn, TxnRoll},
    Bin, Bins, Key, Record, ResultCode, Value,
};

/// Handle to a server cluster, used for all record operations.
///
/// The client is thread-safe and cheap to clone; one instance should be
/// shared for each cluster an application talks to. It hides topology,
/// partition routing, pooling, retries and timeouts behind plain
/// per-record calls.
#[derive(Clone, Debug)]
pub struct Client {
    cluster: Arc<Cluster>,
}

impl Client {
    /// Connect to the cluster reachable through the given seed hosts.
    ///
    /// A single seed is enough: the remaining nodes are discovered through
    /// it. Seeds can be given as a comma-separated string, e.g.
    /// `"10.0.0.1:3900,10.0.0.2:3900"`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use meridian::{policy::ClientPolicy, Client};
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let client = Client::new(&ClientPolicy::default(), "localhost:3900")
    ///         .await
    ///         .unwrap();
    /// }
    /// ```
    pub async fn new(policy: &ClientPolicy, hosts: impl ToHosts) -> Result<Self> {
        let hosts = hosts.to_hosts()?;
        let cluster = Cluster::new(policy.clone(), &hosts).await?;

        Ok(Self { cluster })
    }

    /// Disconnect from the cluster and release all pooled connections.
    pub async fn close(&self) {
        self.cluster.close().await;
    }

    /// Whether the client currently sees any cluster node.
    pub fn is_connected(&self) -> bool {
        self.cluster.is_connected()
    }

    /// Names of the currently active cluster nodes.
    pub fn node_names(&self) -> Vec<String> {
        self.cluster
            .nodes()
            .iter()
            .map(|node| node.name().to_owned())
            .collect()
    }

    /// The active cluster nodes.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.cluster.nodes().as_ref().clone()
    }

    /// Look up a node by its name.
    pub fn get_node(&self, name: &str) -> Option<Arc<Node>> {
        self.cluster.get_node_by_name(name)
    }

    /// Read the record stored under `key`. Depending on `bins`, all bins,
    /// a subset, or only the record header is returned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use meridian::{errors::CommandError, policy::BasePolicy, Bins, Client, Key, ResultCode};
    /// # async fn example(client: &Client) {
    /// let key = Key::new("test", "demo", "mykey");
    /// match client.get(&BasePolicy::default(), &key, Bins::All).await {
    ///     Ok(record) => println!("bins: {:?}", record.bins),
    ///     Err(CommandError::Server {
    ///         code: ResultCode::KeyNotFound,
    ///         ..
    ///     }) => println!("no such record"),
    ///     Err(err) => println!("read failed: {err}"),
    /// }
    /// # }
    /// ```
    pub async fn get(
        &self,
        policy: &BasePolicy,
        key: &Key,
        bins: impl Into<Bins>,
    ) -> Result<Record, CommandError> {
        let bins = bins.into();
        let mut command = ReadCommand::new(policy, Arc::clone(&self.cluster), key, bins);
        command.execute().await?;
        Ok(command.record.expect("record is set on success"))
    }

    /// Write the given bins under `key`. The policy controls timeouts,
    /// expiration and what happens when the record already exists.
    pub async fn put(
        &self,
        policy: &WritePolicy,
        key: &Key,
        bins: &[Bin],
    ) -> Result<(), CommandError> {
        self.register_txn_write(policy, key).await?;
        WriteCommand::new(
            policy,
            Arc::clone(&self.cluster),
            key,
            bins,
            OperationType::Write,
        )
        .execute()
        .await
    }

    /// Add the given integer bin values to the stored values.
    pub async fn add(
        &self,
        policy: &WritePolicy,
        key: &Key,
        bins: &[Bin],
    ) -> Result<(), CommandError> {
        self.register_txn_write(policy, key).await?;
        WriteCommand::new(
            policy,
            Arc::clone(&self.cluster),
            key,
            bins,
            OperationType::Incr,
        )
        .execute()
        .await
    }

    /// Append the given string bin values to the stored values.
    pub async fn append(
        &self,
        policy: &WritePolicy,
        key: &Key,
        bins: &[Bin],
    ) -> Result<(), CommandError> {
        self.register_txn_write(policy, key).await?;
        WriteCommand::new(
            policy,
            Arc::clone(&self.cluster),
            key,
            bins,
            OperationType::Append,
        )
        .execute()
        .await
    }

    /// Prepend the given string bin values to the stored values.
    pub async fn prepend(
        &self,
        policy: &WritePolicy,
        key: &Key,
        bins: &[Bin],
    ) -> Result<(), CommandError> {
        self.register_txn_write(policy, key).await?;
        WriteCommand::new(
            policy,
            Arc::clone(&self.cluster),
            key,
            bins,
            OperationType::Prepend,
        )
        .execute()
        .await
    }

    /// Delete the record stored under `key`. Returns whether the record
    /// existed before the call.
    pub async fn delete(&self, policy: &WritePolicy, key: &Key) -> Result<bool, CommandError> {
        self.register_txn_write(policy, key).await?;
        let mut command = DeleteCommand::new(policy, Arc::clone(&self.cluster), key);
        command.execute().await?;
        Ok(command.existed)
    }

    /// Refresh the record's time-to-live from the policy's expiration.
    /// Fails when the record does not exist.
    pub async fn touch(&self, policy: &WritePolicy, key: &Key) -> Result<(), CommandError> {
        self.register_txn_write(policy, key).await?;
        TouchCommand::new(policy, Arc::clone(&self.cluster), key)
            .execute()
            .await
    }

    /// Whether a record exists under `key`.
    pub async fn exists(&self, policy: &BasePolicy, key: &Key) -> Result<bool, CommandError> {
        let mut command = ExistsCommand::new(policy, Arc::clone(&self.cluster), key);
        command.execute().await?;
        Ok(command.exists)
    }

    /// Perform several operations on a single record in one round trip.
    /// Operations are applied in the given order.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use meridian::{operations::scalar, policy::WritePolicy, Bin, Client, Key};
    /// # async fn example(client: &Client) {
    /// let key = Key::new("test", "demo", "counter");
    /// let bin = Bin::new("value", 1);
    /// let ops = [scalar::add(&bin), scalar::get_bin("value")];
    /// let record = client
    ///     .operate(&WritePolicy::default(), &key, &ops)
    ///     .await
    ///     .unwrap();
    /// println!("new value: {:?}", record.bins.get("value"));
    /// # }
    /// ```
    pub async fn operate(
        &self,
        policy: &WritePolicy,
        key: &Key,
        operations: &[Operation<'_>],
    ) -> Result<Record, CommandError> {
        if operations.iter().any(Operation::is_write) {
            self.register_txn_write(policy, key).await?;
        }
        let mut command = OperateCommand::new(policy, Arc::clone(&self.cluster), key, operations);
        command.execute().await?;
        Ok(command.record.expect("record is set on success"))
    }

    /// Invoke a server-side UDF on the record stored under `key`. Returns
    /// the function's result value, if any.
    pub async fn execute_udf(
        &self,
        policy: &WritePolicy,
        key: &Key,
        package: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Option<Value>, CommandError> {
        self.register_txn_write(policy, key).await?;
        let mut command = UdfCommand::new(
            policy,
            Arc::clone(&self.cluster),
            key,
            package,
            function,
            args,
        );
        command.execute().await?;

        let record = command.record.expect("record is set on success");
        for (name, value) in record.bins {
            if name == "SUCCESS" {
                return Ok(Some(value));
            }
            if name == "FAILURE" {
                return Err(CommandError::server(ResultCode::UdfBadResponse));
            }
        }
        Ok(None)
    }

    /// Run a batch of per-key operations. The result is positional: entry
    /// `i` of the output always answers for entry `i` of the input, and no
    /// entry is ever dropped.
    pub async fn batch(
        &self,
        policy: &BatchPolicy,
        records: Vec<BatchRecord>,
    ) -> Result<BatchResults, CommandError> {
        BatchExecutor::new(Arc::clone(&self.cluster))
            .execute(policy, records)
            .await
    }

    /// Read all records of a namespace/set. Records are produced by worker
    /// tasks and consumed lazily through the returned [`RecordSet`].
    pub async fn scan(
        &self,
        policy: &ScanPolicy,
        namespace: &str,
        set_name: &str,
        bins: impl Into<Bins>,
    ) -> Result<RecordSet> {
        self.scan_partitions(policy, namespace, set_name, bins, &PartitionFilter::all())
            .await
    }

    /// Scan the partitions selected by `filter`. The filter is updated in
    /// place as partitions complete; passing the same filter again resumes
    /// an interrupted scan, skipping what already finished.
    pub async fn scan_partitions(
        &self,
        policy: &ScanPolicy,
        namespace: &str,
        set_name: &str,
        bins: impl Into<Bins>,
        filter: &PartitionFilter,
    ) -> Result<RecordSet> {
        let progress = filter.progress(self.cluster.n_partitions(), policy.max_records);
        let (tx, rx) = mpsc::channel(policy.record_queue_size.max(1));
        let recordset = RecordSet::new(rx);

        let job = StreamJob::Scan {
            policy: policy.clone(),
            namespace: namespace.to_owned(),
            set_name: set_name.to_owned(),
            bins: bins.into(),
        };
        let tracker = PartitionTracker::new(
            Arc::clone(&self.cluster),
            progress,
            job,
            tx,
            recordset.task_id(),
        );
        tokio::spawn(tracker.run());

        Ok(recordset)
    }

    /// Run a secondary-index query.
    pub async fn query(&self, policy: &QueryPolicy, statement: Statement) -> Result<RecordSet> {
        self.query_partitions(policy, statement, &PartitionFilter::all())
            .await
    }

    /// Run a secondary-index query over the partitions selected by
    /// `filter`, with the same resumption semantics as
    /// [`Self::scan_partitions`].
    pub async fn query_partitions(
        &self,
        policy: &QueryPolicy,
        statement: Statement,
        filter: &PartitionFilter,
    ) -> Result<RecordSet> {
        let progress = filter.progress(self.cluster.n_partitions(), policy.max_records);
        let (tx, rx) = mpsc::channel(policy.record_queue_size.max(1));
        let recordset = RecordSet::new(rx);

        let job = StreamJob::Query {
            policy: policy.clone(),
            statement: Arc::new(statement),
        };
        let tracker = PartitionTracker::new(
            Arc::clone(&self.cluster),
            progress,
            job,
            tx,
            recordset.task_id(),
        );
        tokio::spawn(tracker.run());

        Ok(recordset)
    }

    /// Make the writes of `txn` durable: verify every recorded read
    /// version, roll the write set forward and remove the monitor record.
    ///
    /// Committing an already committed transaction reports
    /// [`CommitStatus::AlreadyCommitted`].
    pub async fn commit(&self, txn: &Txn) -> Result<CommitStatus, CommitError> {
        TxnRoll::new(Arc::clone(&self.cluster)).commit(txn).await
    }

    /// Discard the writes of `txn` and remove its monitor record.
    pub async fn abort(&self, txn: &Txn) -> Result<AbortStatus, CommitError> {
        TxnRoll::new(Arc::clone(&self.cluster)).abort(txn).await
    }

    /// First write under a transaction: pin the namespace and make sure
    /// the server-side monitor record exists before provisional writes
    /// refer to it.
    async fn register_txn_write(
        &self,
        policy: &WritePolicy,
        key: &Key,
    ) -> Result<(), CommandError> {
        let Some(txn) = &policy.base_policy.txn else {
            return Ok(());
        };
        txn.set_namespace(&key.namespace)
            .map_err(CommandError::server)?;
        if txn.monitor_established() {
            return Ok(());
        }

        let deadline = txn.deadline_epoch_secs();
        let monitor_key = txn::monitor_key(&key.namespace, txn.id());
        let monitor_policy = WritePolicy {
            expiration: Expiration::Seconds(Txn::DEFAULT_TIMEOUT.as_secs() as u32),
            ..WritePolicy::default()
        };
        let bins = [Bin::new("deadline", deadline as i64)];

        WriteCommand::new(
            &monitor_policy,
            Arc::clone(&self.cluster),
            &monitor_key,
            &bins,
            OperationType::Write,
        )
        .execute()
        .await?;

        txn.set_monitor_deadline(deadline);
        Ok(())
    }

    /// Remove all records of a namespace or set. Orders of magnitude
    /// faster than deleting records one by one.
    ///
    /// `before_nanos` optionally limits the removal to records last
    /// updated before the given epoch nanoseconds; pass zero to truncate
    /// everything.
    pub async fn truncate(&self, namespace: &str, set_name: &str, before_nanos: i64) -> Result<()> {
        let mut cmd = String::with_capacity(160);
        cmd.push_str("truncate:namespace=");
        cmd.push_str(namespace);
        if !set_name.is_empty() {
            cmd.push_str(";set=");
            cmd.push_str(set_name);
        }
        if before_nanos > 0 {
            write!(cmd, ";lut={before_nanos}").ok();
        }

        self.send_info_cmd(&cmd)
            .await
            .map_err(|e| Error::Truncate(Box::new(e)))
    }

    /// Create a secondary index over a scalar bin. The server builds the
    /// index asynchronously after this call returns.
    pub async fn create_index(
        &self,
        namespace: &str,
        set_name: &str,
        bin_name: &str,
        index_name: &str,
        index_type: IndexType,
    ) -> Result<()> {
        self.create_complex_index(namespace, set_name, bin_name, index_name, index_type, None)
            .await
    }

    /// Create a secondary index over a list or map bin.
    pub async fn create_complex_index(
        &self,
        namespace: &str,
        set_name: &str,
        bin_name: &str,
        index_name: &str,
        index_type: IndexType,
        collection_type: Option<CollectionIndexType>,
    ) -> Result<()> {
        let collection_type = collection_type
            .map(|v| format!("indextype={v};"))
            .unwrap_or_default();
        let cmd = format!(
            "sindex-create:ns={namespace};set={set_name};indexname={index_name};\
             {collection_type}indexdata={bin_name},{index_type}",
        );
        self.send_info_cmd(&cmd)
            .await
            .map_err(|e| Error::CreateIndex(Box::new(e)))
    }

    /// Remove a secondary index.
    pub async fn drop_index(
        &self,
        namespace: &str,
        set_name: &str,
        index_name: &str,
    ) -> Result<()> {
        let set_name = if set_name.is_empty() {
            String::new()
        } else {
            format!("set={set_name};")
        };
        let cmd = format!("sindex-delete:ns={namespace};{set_name}indexname={index_name}");
        self.send_info_cmd(&cmd)
            .await
            .map_err(|e| Error::CreateIndex(Box::new(e)))
    }

    /// Change a user's password and re-key future connections.
    pub async fn change_password(&self, user: &str, password: &str) -> Result<()> {
        AdminCommand::change_password(&self.cluster, user, password)
            .await
            .map_err(Into::into)
    }

    async fn send_info_cmd(&self, cmd: &str) -> Result<()> {
        let node = self.cluster.get_random_node().ok_or(Error::NoNodes)?;
        let response = node.info(&[cmd]).await.map_err(Error::Cluster)?;

        if let Some(v) = response.values().next() {
            if v.eq_ignore_ascii_case("ok") {
                return Ok(());
            }
            if let Some(fail) = v.strip_prefix("FAIL:") {
                let code = fail.split(':').next().unwrap_or_default().parse::<u8>()?;
                return Err(Error::ServerError(ResultCode::from(code)));
            }
        }

        Err(Error::BadResponse(
            "unexpected info command response".to_owned(),
        ))
    }
}
