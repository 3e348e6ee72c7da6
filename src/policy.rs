//! Policies that adjust the behavior of the client and of individual
//! operations. All policies are plain value types, immutable per invocation.

use std::{collections::HashMap, sync::Arc};

use tokio::time::{Duration, Instant};

use crate::{
    commands::{self, CommandError},
    expressions::FilterExpression,
    txn::Txn,
};

/// Rule for choosing which replica a read command targets, and how the
/// command executor moves between replicas on retries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Replica {
    /// Always read from the partition's master node.
    Master,
    /// Read from the master first, then try the proles in rank order on
    /// retries.
    MasterProles,
    /// Iterate master and proles in rank order, advancing one rank per
    /// retry. **This is the default.**
    #[default]
    Sequence,
    /// Pick a uniformly random replica for every attempt.
    Random,
    /// Prefer replicas on nodes whose rack id matches
    /// [`ClientPolicy::rack_id`], falling back to sequence order.
    PreferRack,
}

/// Amount of replicas a read operation consults to ensure consistency of
/// the retrieved data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReadMode {
    /// Read from a single replica. **This is the default.**
    #[default]
    One = 0,
    /// Involve all replicas in the read.
    All = 1,
}

/// Common parameters for all record operations; the base that the other
/// operation policies extend.
#[derive(Clone, Debug)]
pub struct BasePolicy {
    /// Total time budget for the operation including all retries. The
    /// deadline derived from it bounds every socket wait and retry sleep.
    /// A _zero_ duration disables the deadline.
    pub total_timeout: Duration,
    /// Time budget for a single socket acquire/read/write. Always truncated
    /// to the remaining total deadline.
    pub socket_timeout: Duration,
    /// How many times to retry the operation after the first attempt.
    pub max_retries: usize,
    /// The duration to sleep between retry attempts. A _zero_ duration
    /// retries immediately.
    pub sleep_between_retries: Duration,
    /// Replica selection rule for read commands. Writes always go to the
    /// partition master.
    pub replica: Replica,
    /// Read consistency mode.
    pub read_mode: ReadMode,
    /// Send the user key on read and write operations. By default only the
    /// digest is sent, to reduce the amount of data transferred.
    pub send_key: bool,
    /// Server-side predicate; records that do not match are reported as
    /// filtered out instead of being read or written.
    pub filter_expression: Option<FilterExpression>,
    /// The multi-record transaction this operation takes part in.
    pub txn: Option<Arc<Txn>>,
}

impl BasePolicy {
    /// Default value for the [`Self::total_timeout`] parameter.
    pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default value for the [`Self::socket_timeout`] parameter.
    pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default value for the [`Self::max_retries`] parameter.
    pub const DEFAULT_MAX_RETRIES: usize = 2;
    /// Default value for the [`Self::sleep_between_retries`] parameter.
    pub const DEFAULT_SLEEP_BETWEEN_RETRIES: Duration = Duration::from_millis(100);

    /// Deadline for the current command based on the total timeout.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        (!self.total_timeout.is_zero()).then(|| Instant::now() + self.total_timeout)
    }

    /// The socket wait bound for one attempt: the socket timeout truncated
    /// to whatever remains until the deadline.
    pub(crate) fn socket_deadline(&self, deadline: Option<Instant>) -> Option<Duration> {
        let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));

        match (self.socket_timeout.is_zero(), remaining) {
            (true, remaining) => remaining,
            (false, None) => Some(self.socket_timeout),
            (false, Some(remaining)) => Some(self.socket_timeout.min(remaining)),
        }
    }
}

impl Default for BasePolicy {
    fn default() -> Self {
        Self {
            total_timeout: Self::DEFAULT_TOTAL_TIMEOUT,
            socket_timeout: Self::DEFAULT_SOCKET_TIMEOUT,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            sleep_between_retries: Self::DEFAULT_SLEEP_BETWEEN_RETRIES,
            replica: Replica::default(),
            read_mode: ReadMode::default(),
            send_key: false,
            filter_expression: None,
            txn: None,
        }
    }
}

impl AsRef<Self> for BasePolicy {
    fn as_ref(&self) -> &Self {
        self
    }
}

/// Action that is performed when a record write operation encounters an
/// already existing record.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RecordExistsAction {
    /// Update the existing record, or create it if missing. Existing bins
    /// are merged with the new ones. **This is the default.**
    #[default]
    Update = 0,
    /// Only update the record if it exists, fail otherwise.
    UpdateOnly,
    /// Fully replace an existing record, or create it if missing.
    Replace,
    /// Only replace an existing record, fail if it is missing.
    ReplaceOnly,
    /// Only create a new record, fail if it already exists.
    CreateOnly,
}

/// Limits record writes and deletes by the record's generation counter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum GenerationPolicy {
    /// Don't limit the write by generation. **This is the default.**
    #[default]
    None = 0,
    /// Only write if the expected generation equals the server's.
    ExpectGenEqual,
    /// Only write if the expected generation is greater than the server's.
    ExpectGenGreater,
}

/// Point at which a record write is considered complete.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CommitLevel {
    /// Wait until the master and all replicas applied the write. **This is
    /// the default.**
    #[default]
    All = 0,
    /// Wait for the master only.
    Master,
}

/// Record expiration, also known as time-to-live.
#[derive(Clone, Copy, Debug, Default)]
pub enum Expiration {
    /// Seconds (counted from now) until the record expires.
    Seconds(u32),
    /// Use the default TTL of the namespace the record is saved in.
    /// **This is the default.**
    #[default]
    NamespaceDefault,
    /// Never expire the record.
    Never,
    /// Update the record without touching its current TTL.
    DontUpdate,
}

impl From<Expiration> for u32 {
    fn from(value: Expiration) -> Self {
        match value {
            Expiration::Seconds(secs) => secs,
            Expiration::NamespaceDefault => 0,
            Expiration::Never => u32::MAX,
            Expiration::DontUpdate => u32::MAX - 1,
        }
    }
}

/// Parameters for all write operations.
#[derive(Clone, Debug, Default)]
pub struct WritePolicy {
    /// The base policy this one extends.
    pub base_policy: BasePolicy,
    /// Action to perform when the record already exists.
    pub record_exists_action: RecordExistsAction,
    /// Generation-based write limit.
    pub generation_policy: GenerationPolicy,
    /// Expected generation, effective with a non-default
    /// [`Self::generation_policy`].
    pub generation: u32,
    /// Record time-to-live.
    pub expiration: Expiration,
    /// Replication level to wait for.
    pub commit_level: CommitLevel,
    /// When sending multiple operations at once, return a result per
    /// operation rather than one merged result per bin.
    pub respond_per_each_op: bool,
    /// Leave a tombstone for deleted records so they cannot reappear after
    /// a node failure.
    pub durable_delete: bool,
}

impl WritePolicy {
    /// Shorthand for a write policy with an expected generation and an
    /// expiration.
    #[must_use]
    pub fn new(generation: u32, expiration: Expiration) -> Self {
        Self {
            generation,
            generation_policy: GenerationPolicy::ExpectGenEqual,
            expiration,
            ..Self::default()
        }
    }
}

impl AsRef<BasePolicy> for WritePolicy {
    fn as_ref(&self) -> &BasePolicy {
        &self.base_policy
    }
}

/// How batch sub-commands for distinct nodes are dispatched.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Concurrency {
    /// One node at a time, in sequence.
    Sequential,
    /// All nodes concurrently, limited to the given amount of in-flight
    /// sub-commands; `0` means one per node. **The default is
    /// `Parallel(0)`.**
    Parallel(usize),
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::Parallel(0)
    }
}

/// Parameters for all batch operations.
#[derive(Clone, Debug, Default)]
pub struct BatchPolicy {
    /// The base policy this one extends.
    pub base_policy: BasePolicy,
    /// Sub-command dispatch mode.
    pub concurrency: Concurrency,
    /// Allow the server to process the request inline on its receiving
    /// thread when the batch is small.
    pub allow_inline: bool,
    /// Send the set name with every key. Only required when per-set
    /// security roles are in use.
    pub send_set_name: bool,
}

impl AsRef<BasePolicy> for BatchPolicy {
    fn as_ref(&self) -> &BasePolicy {
        &self.base_policy
    }
}

/// Parameters for all scan operations.
#[derive(Clone, Debug)]
pub struct ScanPolicy {
    /// The base policy this one extends.
    pub base_policy: BasePolicy,
    /// Capacity of the record queue between the scan workers and the
    /// caller's iterator; bounds the memory used by a slow consumer.
    pub record_queue_size: usize,
    /// Stop the scan after this many records; `0` scans everything.
    pub max_records: u64,
    /// How many nodes to scan in parallel; `0` means all at once.
    pub max_concurrent_nodes: usize,
}

impl ScanPolicy {
    /// Default value for the [`Self::record_queue_size`] parameter.
    pub const DEFAULT_RECORD_QUEUE_SIZE: usize = 1024;
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            base_policy: BasePolicy::default(),
            record_queue_size: Self::DEFAULT_RECORD_QUEUE_SIZE,
            max_records: 0,
            max_concurrent_nodes: 0,
        }
    }
}

impl AsRef<BasePolicy> for ScanPolicy {
    fn as_ref(&self) -> &BasePolicy {
        &self.base_policy
    }
}

/// Parameters for all query operations.
#[derive(Clone, Debug)]
pub struct QueryPolicy {
    /// The base policy this one extends.
    pub base_policy: BasePolicy,
    /// Capacity of the record queue between the query workers and the
    /// caller's iterator.
    pub record_queue_size: usize,
    /// Stop the query after this many records; `0` returns everything.
    pub max_records: u64,
    /// How many nodes to query in parallel; `0` means all at once.
    pub max_concurrent_nodes: usize,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            base_policy: BasePolicy::default(),
            record_queue_size: ScanPolicy::DEFAULT_RECORD_QUEUE_SIZE,
            max_records: 0,
            max_concurrent_nodes: 0,
        }
    }
}

impl AsRef<BasePolicy> for QueryPolicy {
    fn as_ref(&self) -> &BasePolicy {
        &self.base_policy
    }
}

/// Authentication mode used when opening connections.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AuthMode {
    /// Hashed password is sent and verified server-side. **This is the
    /// default.**
    #[default]
    Internal,
    /// Credentials are forwarded to an external authority (e.g. LDAP); the
    /// clear password is sent alongside the hashed one.
    External,
    /// Authentication and authorization are based on the TLS client
    /// certificate; no credentials are sent.
    Pki,
}

/// Parameters for creating new [`Client`](crate::Client) instances.
#[derive(Clone, Debug)]
pub struct ClientPolicy {
    /// Username and bcrypt-hashed password to authenticate with. [`None`]
    /// disables authentication.
    pub user_password: Option<(String, String)>,
    /// How credentials are presented to the server.
    pub auth_mode: AuthMode,
    /// Expected cluster name. When set, nodes must report this name during
    /// the handshake and the tend cycle to join (and stay in) the client's
    /// node list.
    pub cluster_name: Option<String>,
    /// Time budget for opening and handshaking a single connection.
    pub connect_timeout: Duration,
    /// Time budget for the authentication exchange on a fresh connection.
    pub login_timeout: Duration,
    /// Maximum amount of socket connections pooled per node.
    pub max_conns_per_node: usize,
    /// Amount of idle connections the tend cycle keeps warm per node.
    pub min_conns_per_node: usize,
    /// Idle time after which a pooled connection is discarded instead of
    /// being reused. [`None`] disables idle eviction.
    pub max_socket_idle: Option<Duration>,
    /// Interval of the cluster tend cycle.
    pub tend_interval: Duration,
    /// How long a node may stay continuously unreachable before it is
    /// dropped from the cluster and its pool is drained.
    pub max_unreachable: Duration,
    /// Fail [`Client::new`](crate::Client::new) when no seed host is
    /// reachable. When disabled the client starts disconnected and commands
    /// fail until the tend cycle finds the cluster.
    pub fail_if_not_connected: bool,
    /// Ask nodes for their configured alternate access addresses instead of
    /// the default ones during peer discovery.
    pub use_services_alternate: bool,
    /// Enable rack awareness: reads with [`Replica::PreferRack`] favor
    /// nodes in [`Self::rack_id`].
    pub rack_aware: bool,
    /// The rack this client runs in.
    pub rack_id: usize,
    /// Translation table for node addresses advertised by the cluster,
    /// relevant when clients from internal and external networks see
    /// different IPs for the same nodes.
    pub ip_map: Option<HashMap<String, String>>,
    /// Maximum amount of command errors allowed per node within one error
    /// rate window; above it, commands to the node are rejected until the
    /// window resets. `0` disables the circuit breaker.
    pub max_error_rate: usize,
    /// Length of the error rate window, in tend cycles.
    pub error_rate_window: usize,
    /// Shrink per-connection buffers back to this size after a response
    /// that grew them beyond it.
    pub buffer_reclaim_threshold: usize,
}

impl ClientPolicy {
    /// Default value for the [`Self::connect_timeout`] parameter.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default value for the [`Self::login_timeout`] parameter.
    pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default value for the [`Self::max_conns_per_node`] parameter.
    pub const DEFAULT_MAX_CONNS_PER_NODE: usize = 256;
    /// Default value for the [`Self::max_socket_idle`] parameter.
    pub const DEFAULT_MAX_SOCKET_IDLE: Duration = Duration::from_secs(55);
    /// Default value for the [`Self::tend_interval`] parameter.
    pub const DEFAULT_TEND_INTERVAL: Duration = Duration::from_secs(1);
    /// Default value for the [`Self::max_unreachable`] parameter.
    pub const DEFAULT_MAX_UNREACHABLE: Duration = Duration::from_secs(5);
    /// Default value for the [`Self::max_error_rate`] parameter.
    pub const DEFAULT_MAX_ERROR_RATE: usize = 100;
    /// Default value for the [`Self::error_rate_window`] parameter.
    pub const DEFAULT_ERROR_RATE_WINDOW: usize = 1;
    /// Default value for the [`Self::buffer_reclaim_threshold`] parameter.
    pub const DEFAULT_BUFFER_RECLAIM_THRESHOLD: usize = 65536;

    /// Enable authentication with the given credentials. The password is
    /// hashed before it is stored.
    pub fn set_user_password(
        &mut self,
        username: impl Into<String>,
        password: &str,
    ) -> Result<(), CommandError> {
        let password = commands::hash_password(password)?;
        self.user_password = Some((username.into(), password));
        Ok(())
    }
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            user_password: None,
            auth_mode: AuthMode::default(),
            cluster_name: None,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            login_timeout: Self::DEFAULT_LOGIN_TIMEOUT,
            max_conns_per_node: Self::DEFAULT_MAX_CONNS_PER_NODE,
            min_conns_per_node: 0,
            max_socket_idle: Some(Self::DEFAULT_MAX_SOCKET_IDLE),
            tend_interval: Self::DEFAULT_TEND_INTERVAL,
            max_unreachable: Self::DEFAULT_MAX_UNREACHABLE,
            fail_if_not_connected: true,
            use_services_alternate: false,
            rack_aware: false,
            rack_id: 0,
            ip_map: None,
            max_error_rate: Self::DEFAULT_MAX_ERROR_RATE,
            error_rate_window: Self::DEFAULT_ERROR_RATE_WINDOW,
            buffer_reclaim_threshold: Self::DEFAULT_BUFFER_RECLAIM_THRESHOLD,
        }
    }
}
