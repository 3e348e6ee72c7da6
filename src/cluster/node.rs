use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use tokio::{sync::RwLock, time::Instant};
use tracing::error;

use super::{node_validator::NodeValidator, ClusterError, NodeError, NodeRefreshError, Result};
use crate::{
    commands::Message,
    net::{ConnectionPool, Credentials, Host, NetError, PooledConnection},
    policy::ClientPolicy,
};

/// One member of the cluster: its stable identity, its preferred address
/// and its connection pool.
///
/// Nodes are owned exclusively by the cluster; everything else holds either
/// a temporary strong reference (commands in flight) or a weak one (the
/// partition table).
pub struct Node {
    client_policy: ClientPolicy,
    name: String,
    host: Host,
    address: String,
    aliases: RwLock<Vec<Host>>,

    connection_pool: ConnectionPool,

    failures: AtomicUsize,
    unreachable_since: Mutex<Option<Instant>>,

    partition_generation: AtomicIsize,
    reference_count: AtomicUsize,
    responded: AtomicBool,
    active: AtomicBool,

    // Command errors within the current error-rate window.
    errors_in_window: AtomicUsize,

    supports_float: bool,
    rack_id: Option<usize>,
}

impl Node {
    pub(crate) fn new(
        client_policy: ClientPolicy,
        nv: &NodeValidator,
        credentials: Arc<arc_swap::ArcSwapOption<Credentials>>,
    ) -> Self {
        Self {
            connection_pool: ConnectionPool::new(
                nv.aliases[0].clone(),
                client_policy.clone(),
                credentials,
            ),
            name: nv.name.clone(),
            host: nv.aliases[0].clone(),
            address: nv.address.clone(),
            aliases: RwLock::new(nv.aliases.clone()),
            failures: AtomicUsize::new(0),
            unreachable_since: Mutex::new(None),
            partition_generation: AtomicIsize::new(-1),
            reference_count: AtomicUsize::new(0),
            responded: AtomicBool::new(false),
            active: AtomicBool::new(true),
            errors_in_window: AtomicUsize::new(0),
            supports_float: nv.supports_float,
            rack_id: nv.rack_id,
            client_policy,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(name: &str) -> Self {
        use arc_swap::ArcSwapOption;

        let policy = ClientPolicy::default();
        let host = Host::new("localhost", crate::net::DEFAULT_PORT);
        Self {
            connection_pool: ConnectionPool::new(
                host.clone(),
                policy.clone(),
                Arc::new(ArcSwapOption::empty()),
            ),
            name: name.to_owned(),
            address: host.address(),
            host,
            aliases: RwLock::new(vec![]),
            failures: AtomicUsize::new(0),
            unreachable_since: Mutex::new(None),
            partition_generation: AtomicIsize::new(-1),
            reference_count: AtomicUsize::new(0),
            responded: AtomicBool::new(false),
            active: AtomicBool::new(true),
            errors_in_window: AtomicUsize::new(0),
            supports_float: true,
            rack_id: None,
            client_policy: policy,
        }
    }

    /// The node's stable, cluster-assigned identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address commands are currently sent to.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn host(&self) -> Host {
        self.host.clone()
    }

    /// Whether the node advertises native double support.
    pub fn supports_float(&self) -> bool {
        self.supports_float
    }

    /// The rack the node reported at handshake time.
    pub fn rack_id(&self) -> Option<usize> {
        self.rack_id
    }

    pub(crate) fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::Relaxed)
    }

    /// Refresh the node as part of one tend cycle: verify identity, collect
    /// peers and note the current partition generation.
    pub(crate) async fn refresh(
        &self,
        current_aliases: &HashMap<Host, Arc<Self>>,
    ) -> Result<Vec<Host>, NodeRefreshError> {
        self.reference_count.store(0, Ordering::Relaxed);
        self.responded.store(false, Ordering::Relaxed);

        let commands = [
            "node",
            "cluster-name",
            "partition-generation",
            self.services_name(),
        ];
        let info_map = self
            .info(&commands)
            .await
            .map_err(NodeRefreshError::InfoCommandFailed)?;

        self.validate_identity(&info_map)
            .map_err(NodeRefreshError::ValidationFailed)?;
        self.responded.store(true, Ordering::Relaxed);

        let peers = self
            .collect_peers(current_aliases, &info_map)
            .map_err(NodeRefreshError::FailedCollectingPeers)?;
        self.update_partition_generation(&info_map)
            .map_err(NodeRefreshError::FailedUpdatingPartitions)?;
        self.reset_failures();

        Ok(peers)
    }

    const fn services_name(&self) -> &'static str {
        if self.client_policy.use_services_alternate {
            "services-alternate"
        } else {
            "services"
        }
    }

    fn validate_identity(&self, info_map: &HashMap<String, String>) -> Result<(), NodeError> {
        match info_map.get("node") {
            None => Err(NodeError::MissingNodeName),
            Some(info_name) if info_name == &self.name => self.verify_cluster_name(info_map),
            Some(info_name) => {
                self.inactivate();
                Err(NodeError::NameMismatch {
                    expected: self.name.clone(),
                    got: info_name.clone(),
                })
            }
        }
    }

    fn verify_cluster_name(&self, info_map: &HashMap<String, String>) -> Result<(), NodeError> {
        let Some(expected) = &self.client_policy.cluster_name else {
            return Ok(());
        };
        match info_map.get("cluster-name") {
            None => Err(NodeError::MissingClusterName),
            Some(info_name) if info_name == expected => Ok(()),
            Some(info_name) => {
                self.inactivate();
                Err(NodeError::NameMismatch {
                    expected: expected.clone(),
                    got: info_name.clone(),
                })
            }
        }
    }

    fn collect_peers(
        &self,
        current_aliases: &HashMap<Host, Arc<Self>>,
        info_map: &HashMap<String, String>,
    ) -> Result<Vec<Host>> {
        let peers_string = match info_map.get(self.services_name()) {
            None => return Err(ClusterError::MissingServicesList),
            Some(peers) if peers.is_empty() => return Ok(vec![]),
            Some(peers) => peers,
        };

        let mut peers = vec![];
        for peer in peers_string.split(';') {
            let Some((host, port)) = peer.split_once(':') else {
                error!(%peer, "malformed services entry, expected host:port");
                continue;
            };
            let port = u16::from_str(port)?;
            let host = match &self.client_policy.ip_map {
                Some(ip_map) if ip_map.contains_key(host) => &ip_map[host],
                _ => host,
            };
            let alias = Host::new(host, port);

            if current_aliases.contains_key(&alias) {
                self.reference_count.fetch_add(1, Ordering::Relaxed);
            } else if !peers.contains(&alias) {
                peers.push(alias);
            }
        }

        Ok(peers)
    }

    fn update_partition_generation(&self, info_map: &HashMap<String, String>) -> Result<()> {
        match info_map.get("partition-generation") {
            None => Err(ClusterError::MissingPartitionGeneration),
            Some(gen_string) => {
                let gen = gen_string.parse::<isize>()?;
                self.partition_generation.store(gen, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Get a connection to the node from its pool.
    pub async fn get_connection(&self) -> Result<PooledConnection, NetError> {
        self.connection_pool.get().await
    }

    pub(crate) fn partition_generation(&self) -> isize {
        self.partition_generation.load(Ordering::Relaxed)
    }

    pub(crate) fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    fn reset_failures(&self) {
        self.failures.store(0, Ordering::Relaxed);
        *self.unreachable_since.lock().unwrap() = None;
    }

    /// Record a failed tend refresh and report for how long the node has
    /// been continuously unreachable.
    pub(crate) fn increase_failures(&self) -> tokio::time::Duration {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let mut since = self.unreachable_since.lock().unwrap();
        let start = since.get_or_insert_with(Instant::now);
        start.elapsed()
    }

    /// Record a command error for the error-rate circuit breaker.
    pub(crate) fn record_error(&self) {
        self.errors_in_window.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the circuit breaker currently rejects commands to the node.
    pub(crate) fn error_rate_exceeded(&self) -> bool {
        let max = self.client_policy.max_error_rate;
        max > 0 && self.errors_in_window.load(Ordering::Relaxed) > max
    }

    pub(crate) fn reset_error_window(&self) {
        self.errors_in_window.store(0, Ordering::Relaxed);
    }

    pub(crate) fn inactivate(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    /// Whether the node is still part of the active cluster.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) async fn aliases(&self) -> Vec<Host> {
        self.aliases.read().await.clone()
    }

    pub(crate) async fn add_alias(&self, alias: Host) {
        self.aliases.write().await.push(alias);
        self.reference_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drive the pool housekeeping of one tend cycle.
    pub(crate) async fn tend_pool(&self) {
        self.connection_pool.evict_idle().await;
        if self.client_policy.min_conns_per_node > 0 {
            self.connection_pool
                .ensure_min(self.client_policy.min_conns_per_node)
                .await;
        }
    }

    /// Set the node inactive and drain its pool.
    pub(crate) async fn close(&self) {
        self.inactivate();
        self.connection_pool.close().await;
    }

    /// Send info commands to this node.
    pub async fn info(&self, commands: &[&str]) -> Result<HashMap<String, String>> {
        let mut conn = self.get_connection().await?;
        match Message::info(&mut conn, commands).await {
            Ok(info) => Ok(info),
            Err(err) => {
                conn.invalidate().await;
                Err(err.into())
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}
