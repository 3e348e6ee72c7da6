use std::sync::Arc;

use super::{CommandError, Result};
use crate::{
    cluster::{partition::Partition, Cluster, Node},
    policy::Replica,
    Key, ResultCode,
};

/// Routing state shared by all single-key commands: the key's partition and
/// the cluster to resolve it against.
pub(crate) struct SingleCommand<'a> {
    cluster: Arc<Cluster>,
    pub key: &'a Key,
    partition_id: usize,
}

impl<'a> SingleCommand<'a> {
    pub fn new(cluster: Arc<Cluster>, key: &'a Key) -> Self {
        let partition_id =
            crate::cluster::partition::partition_id(&key.digest(), cluster.n_partitions());
        Self {
            cluster,
            key,
            partition_id,
        }
    }

    /// The node serving this key's partition for the given replica policy;
    /// writes must pass [`Replica::Master`]. An empty or inactive slot is
    /// reported as partition unavailable, a node-less cluster as server
    /// not available; both are retryable.
    pub fn node(&self, replica: Replica, sequence: usize) -> Result<Arc<Node>> {
        let partition = Partition::new(&self.key.namespace, self.partition_id);
        match self.cluster.node_for(&partition, replica, sequence) {
            Some(node) => Ok(node),
            None if self.cluster.nodes().is_empty() => {
                Err(CommandError::server(ResultCode::ServerNotAvailable))
            }
            None => Err(CommandError::server(ResultCode::PartitionUnavailable)),
        }
    }
}
