pub(crate) mod node;
pub(crate) mod node_validator;
pub mod partition;
pub(crate) mod partition_parser;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio::{
    sync::RwLock,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

pub use self::node::Node;
use self::{
    node_validator::NodeValidator,
    partition::{Partition, PartitionTable},
    partition_parser::PartitionParser,
};
use crate::{
    commands::hash_password,
    net::{Credentials, Host},
    policy::{ClientPolicy, Replica},
};

type Result<T, E = ClusterError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("missing replicas information")]
    MissingReplicas,
    #[error("error parsing partition information")]
    InvalidPartitionInfo,
    #[error("invalid UTF-8 content discovered")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("invalid integer")]
    InvalidInteger(#[from] std::num::ParseIntError),
    #[error("base64 decoding error")]
    Base64(#[from] base64::DecodeError),
    #[error(
        "failed to connect to host(s); the network connections to the cluster may have timed \
         out, or the cluster may be in a state of flux"
    )]
    Connection,
    #[error("networking error")]
    Network(#[from] crate::net::NetError),
    #[error("command error")]
    Command(#[from] crate::commands::CommandError),
    #[error("missing services list")]
    MissingServicesList,
    #[error("missing partition generation")]
    MissingPartitionGeneration,
    #[error("failed to hash password")]
    PasswordHash(#[source] Box<crate::commands::CommandError>),
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("no addresses for host `{host}`")]
    NoAddress { host: Host },
    #[error("missing node name")]
    MissingNodeName,
    #[error("missing cluster name")]
    MissingClusterName,
    #[error("name mismatch; expected `{expected}`, got `{got}`")]
    NameMismatch { expected: String, got: String },
    #[error("malformed partition count")]
    BadPartitionCount,
    #[error("networking error")]
    Net(#[from] crate::net::NetError),
    #[error("I/O related error")]
    Io(#[from] std::io::Error),
    #[error("command error")]
    Command(#[from] crate::commands::CommandError),
}

#[derive(Debug, thiserror::Error)]
pub enum NodeRefreshError {
    #[error("info command failed")]
    InfoCommandFailed(#[source] ClusterError),
    #[error("failed to validate node")]
    ValidationFailed(#[source] NodeError),
    #[error("failed to collect peers")]
    FailedCollectingPeers(#[source] ClusterError),
    #[error("failed to update partitions")]
    FailedUpdatingPartitions(#[source] ClusterError),
}

/// The client's view of the server cluster.
///
/// The node list and the partition table are immutable snapshots published
/// with an atomic pointer swap. The tend task is their single writer;
/// router lookups read them without taking a lock.
#[derive(Debug)]
pub struct Cluster {
    client_policy: ClientPolicy,

    // Seed hosts specified by the caller, extended on demand.
    seeds: RwLock<Vec<Host>>,

    // All known addresses of all nodes, maintained by the tend task.
    aliases: RwLock<HashMap<Host, Arc<Node>>>,

    // Active nodes, published snapshot.
    nodes: ArcSwap<Vec<Arc<Node>>>,

    // Namespace to partition to replicas mapping, published snapshot.
    partitions: ArcSwap<PartitionTable>,

    // Partition count reported by the cluster at handshake time.
    n_partitions: AtomicUsize,

    // Credentials used for new connections; swapped by change_password.
    credentials: Arc<ArcSwapOption<Credentials>>,

    // Round-robin cursor for random node selection.
    node_index: AtomicUsize,

    // Tend cycles since the last error-rate window reset.
    tend_count: AtomicUsize,

    closed: AtomicBool,
}

impl Cluster {
    pub async fn new(policy: ClientPolicy, hosts: &[Host]) -> Result<Arc<Self>> {
        let credentials = Arc::new(ArcSwapOption::from_pointee(
            policy.user_password.as_ref().map(|(user, hash)| Credentials {
                user: user.clone(),
                password_hash: hash.clone(),
                clear_password: None,
            }),
        ));

        let cluster = Arc::new(Self {
            client_policy: policy,
            seeds: RwLock::new(hosts.to_vec()),
            aliases: RwLock::new(HashMap::new()),
            nodes: ArcSwap::from_pointee(vec![]),
            partitions: ArcSwap::from_pointee(PartitionTable::default()),
            n_partitions: AtomicUsize::new(partition::DEFAULT_N_PARTITIONS),
            credentials,
            node_index: AtomicUsize::new(0),
            tend_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        Self::wait_till_stabilized(Arc::clone(&cluster)).await;

        if cluster.client_policy.fail_if_not_connected && !cluster.is_connected() {
            cluster.close().await;
            return Err(ClusterError::Connection);
        }

        tokio::spawn(Self::tend_task(Arc::clone(&cluster)));
        debug!("new cluster initialized");

        Ok(cluster)
    }

    async fn tend_task(cluster: Arc<Self>) {
        let tend_interval = cluster.client_policy.tend_interval;

        while !cluster.closed.load(Ordering::Relaxed) {
            if let Err(err) = cluster.tend().await {
                error!(error = ?err, "error tending cluster");
            }
            tokio::time::sleep(tend_interval).await;
        }
    }

    /// One refresh cycle: refresh every node, collect peers, merge
    /// partition maps, and publish the new snapshots.
    async fn tend(&self) -> Result<()> {
        let mut nodes = self.nodes();

        // Node additions and removals happen only here, on the tend task.
        if nodes.is_empty() {
            debug!("no active nodes, seeding");
            self.seed_nodes().await;
            nodes = self.nodes();
        }

        let window = self.client_policy.error_rate_window.max(1);
        if self.tend_count.fetch_add(1, Ordering::Relaxed) % window == 0 {
            for node in nodes.iter() {
                node.reset_error_window();
            }
        }

        let mut peer_list: Vec<Host> = vec![];
        let mut refresh_count = 0;

        for node in &*nodes {
            if !node.is_active() {
                continue;
            }

            let old_generation = node.partition_generation();
            match node.refresh(&*self.aliases.read().await).await {
                Ok(peers) => {
                    refresh_count += 1;
                    peer_list.extend(peers);

                    if old_generation != node.partition_generation() {
                        if let Err(err) = self.update_partitions(node).await {
                            warn!(?node, %err, "failed to update partition map");
                        }
                    }
                }
                Err(err) => {
                    let down_for = node.increase_failures();
                    warn!(?node, %err, "node refresh failed");
                    if down_for >= self.client_policy.max_unreachable {
                        node.inactivate();
                    }
                }
            }

            node.tend_pool().await;
        }

        let add_list = self.find_new_nodes_to_add(peer_list).await;
        self.add_nodes_and_aliases(&add_list).await;

        // Remove after add, so shared aliases survive the transition.
        let remove_list = self.find_nodes_to_remove(refresh_count).await;
        self.remove_nodes_and_aliases(remove_list).await;

        Ok(())
    }

    /// Run tend cycles until the node count settles, bounded by the connect
    /// timeout.
    async fn wait_till_stabilized(cluster: Arc<Self>) {
        let deadline = Instant::now() + cluster.client_policy.connect_timeout;
        let mut count: isize = -1;

        loop {
            if Instant::now() > deadline {
                break;
            }

            if let Err(err) = cluster.tend().await {
                error!(error = ?err, "error during initial cluster tend");
            }

            let new_count = cluster.nodes().len() as isize;
            if new_count == count {
                break;
            }
            count = new_count;

            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub(crate) const fn client_policy(&self) -> &ClientPolicy {
        &self.client_policy
    }

    pub async fn add_seeds(&self, new_seeds: &[Host]) {
        self.seeds.write().await.extend_from_slice(new_seeds);
    }

    async fn seed_nodes(&self) -> bool {
        let seed_array = self.seeds.read().await;
        info!(seed_count = seed_array.len(), "seeding the cluster");

        let credentials = self.credentials.load_full();
        let mut list: Vec<Arc<Node>> = vec![];
        for seed in &*seed_array {
            let mut nv = NodeValidator::new();
            if let Err(err) = nv
                .validate_node(&self.client_policy, credentials.as_deref(), seed)
                .await
            {
                error!(error = ?err, %seed, "failed to validate seed host");
                continue;
            }

            if list.iter().any(|node| node.name() == nv.name) {
                continue;
            }

            self.n_partitions.store(nv.n_partitions, Ordering::Relaxed);
            let node = Arc::new(self.create_node(&nv));
            self.add_aliases(Arc::clone(&node)).await;
            list.push(node);
        }

        let seeded = !list.is_empty();
        self.add_nodes_and_aliases(&list).await;
        seeded
    }

    fn create_node(&self, nv: &NodeValidator) -> Node {
        Node::new(
            self.client_policy.clone(),
            nv,
            Arc::clone(&self.credentials),
        )
    }

    async fn find_new_nodes_to_add(&self, hosts: Vec<Host>) -> Vec<Arc<Node>> {
        let credentials = self.credentials.load_full();
        let mut list: Vec<Arc<Node>> = vec![];

        for host in hosts {
            let mut nv = NodeValidator::new();
            if let Err(err) = nv
                .validate_node(&self.client_policy, credentials.as_deref(), &host)
                .await
            {
                error!(error = ?err, %host, "adding node failed");
                continue;
            }

            // A node advertising a second address for an already known peer
            // becomes an alias, not a new node.
            let known = match self.get_node_by_name(&nv.name) {
                Some(node) => Some(node),
                None => list.iter().find(|node| node.name() == nv.name).cloned(),
            };
            match known {
                Some(node) => {
                    self.add_alias(host, Arc::clone(&node)).await;
                }
                None => {
                    list.push(Arc::new(self.create_node(&nv)));
                }
            }
        }

        list
    }

    async fn find_nodes_to_remove(&self, refresh_count: usize) -> Vec<Arc<Node>> {
        let nodes = self.nodes();
        let partitions = self.partitions.load();
        let mut remove_list = vec![];

        for node in &*nodes {
            if !node.is_active() {
                remove_list.push(Arc::clone(node));
                continue;
            }

            if nodes.len() == 1 {
                // A single-node cluster survives on whether the node still
                // answers; try re-seeding before giving up on it.
                if node.failures() > 5 && self.seed_nodes().await {
                    remove_list.push(Arc::clone(node));
                }
                continue;
            }

            // An orphan: refreshes succeed elsewhere, nobody references it
            // and it serves no partition.
            if refresh_count >= 2
                && node.reference_count() == 0
                && node.failures() == 0
                && !partitions.references(node)
            {
                remove_list.push(Arc::clone(node));
            }
        }

        remove_list
    }

    async fn add_nodes_and_aliases(&self, list: &[Arc<Node>]) {
        if list.is_empty() {
            return;
        }
        for node in list {
            self.add_aliases(Arc::clone(node)).await;
        }

        let mut nodes = self.nodes().as_ref().clone();
        nodes.extend(list.iter().cloned());
        self.nodes.store(Arc::new(nodes));
    }

    async fn remove_nodes_and_aliases(&self, remove_list: Vec<Arc<Node>>) {
        if remove_list.is_empty() {
            return;
        }
        for node in &remove_list {
            for alias in node.aliases().await {
                self.aliases.write().await.remove(&alias);
            }
            node.close().await;
        }

        let nodes = self
            .nodes()
            .iter()
            .filter(|node| remove_list.iter().all(|rem| rem.name() != node.name()))
            .cloned()
            .collect::<Vec<_>>();
        self.nodes.store(Arc::new(nodes));
    }

    async fn add_alias(&self, host: Host, node: Arc<Node>) {
        node.add_alias(host.clone()).await;
        self.aliases.write().await.insert(host, node);
    }

    async fn add_aliases(&self, node: Arc<Node>) {
        let mut aliases = self.aliases.write().await;
        for alias in node.aliases().await {
            aliases.insert(alias, Arc::clone(&node));
        }
    }

    /// Fetch the node's partition bitmaps and publish the merged table.
    async fn update_partitions(&self, node: &Arc<Node>) -> Result<()> {
        let mut conn = node.get_connection().await?;
        let parser = match PartitionParser::fetch(&mut conn).await {
            Ok(parser) => parser,
            Err(err) => {
                conn.invalidate().await;
                return Err(err);
            }
        };

        let table = self.partitions.load_full();
        let map = parser.update(&table, node, self.n_partitions())?;
        self.partitions.store(Arc::new(PartitionTable::from_map(map)));

        Ok(())
    }

    /// The partition count of the cluster.
    pub fn n_partitions(&self) -> usize {
        self.n_partitions.load(Ordering::Relaxed)
    }

    /// Current node list snapshot.
    pub fn nodes(&self) -> Arc<Vec<Arc<Node>>> {
        self.nodes.load_full()
    }

    /// Current partition table snapshot.
    pub(crate) fn partition_table(&self) -> Arc<PartitionTable> {
        self.partitions.load_full()
    }

    pub fn is_connected(&self) -> bool {
        !self.nodes().is_empty() && !self.closed.load(Ordering::Relaxed)
    }

    /// The node serving `partition` under the given replica policy, where
    /// `sequence` is the number of attempts made so far.
    ///
    /// Returns a node exactly when the addressed slot holds an active one;
    /// an empty or inactive slot means the partition is unavailable, and
    /// the command executor decides whether to retry.
    pub(crate) fn node_for(
        &self,
        partition: &Partition<'_>,
        replica: Replica,
        sequence: usize,
    ) -> Option<Arc<Node>> {
        let rack_id = self
            .client_policy
            .rack_aware
            .then_some(self.client_policy.rack_id);
        self.partitions
            .load()
            .node_for(partition, replica, sequence, rack_id)
    }

    /// Round-robin over the active nodes, for commands that address the
    /// cluster rather than a partition (info, admin).
    pub fn get_random_node(&self) -> Option<Arc<Node>> {
        let nodes = self.nodes();
        (0..nodes.len())
            .find_map(|_| {
                let index = self.node_index.fetch_add(1, Ordering::Relaxed) % nodes.len();
                nodes.get(index).filter(|node| node.is_active())
            })
            .map(Arc::clone)
    }

    pub fn get_node_by_name(&self, node_name: &str) -> Option<Arc<Node>> {
        self.nodes()
            .iter()
            .find(|node| node.name() == node_name)
            .cloned()
    }

    /// Swap the credentials used for future connections.
    pub fn change_password(&self, user: impl Into<String>, password: &str) -> Result<()> {
        let hash = hash_password(password).map_err(|e| ClusterError::PasswordHash(Box::new(e)))?;
        self.credentials.store(Some(Arc::new(Credentials {
            user: user.into(),
            password_hash: hash,
            clear_password: Some(password.to_owned()),
        })));
        Ok(())
    }

    /// Stop the tend task and drain all pools.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        for node in &*self.nodes() {
            node.close().await;
        }
        self.nodes.store(Arc::new(vec![]));
    }
}
