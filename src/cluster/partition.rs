use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use rand::Rng;

use super::Node;
use crate::{policy::Replica, Key};

/// Partition count used until the first handshake reports the server's
/// actual value.
pub const DEFAULT_N_PARTITIONS: usize = 4096;

/// One logical shard of a namespace.
#[derive(Clone, Debug)]
pub struct Partition<'a> {
    pub namespace: &'a str,
    pub id: usize,
}

impl<'a> Partition<'a> {
    #[must_use]
    pub const fn new(namespace: &'a str, id: usize) -> Self {
        Self { namespace, id }
    }

    /// Derive the partition a key hashes into.
    #[must_use]
    pub fn new_by_key(key: &'a Key, n_partitions: usize) -> Self {
        Self {
            namespace: &key.namespace,
            id: partition_id(&key.digest(), n_partitions),
        }
    }
}

impl PartialEq for Partition<'_> {
    fn eq(&self, other: &Partition<'_>) -> bool {
        self.namespace == other.namespace && self.id == other.id
    }
}

/// The first four digest bytes, little-endian, masked by the partition
/// count. The count is a power of two, so the mask is exact.
#[must_use]
pub fn partition_id(digest: &[u8; 20], n_partitions: usize) -> usize {
    let mut prefix = [0; 4];
    prefix.copy_from_slice(&digest[0..4]);
    u32::from_le_bytes(prefix) as usize & (n_partitions - 1)
}

/// Replica references of one partition, indexed by rank; rank 0 is the
/// master.
#[derive(Clone, Debug, Default)]
pub(crate) struct Slot {
    pub replicas: Vec<Weak<Node>>,
}

impl Slot {
    fn rank(&self, rank: usize) -> Option<Arc<Node>> {
        self.replicas
            .get(rank)
            .and_then(Weak::upgrade)
            .filter(|node| node.is_active())
    }

    fn len(&self) -> usize {
        self.replicas.len().max(1)
    }
}

/// Immutable snapshot of the namespace → partition → replicas mapping.
///
/// The cluster tend cycle builds a new table and publishes it with an
/// atomic pointer swap; the table itself is never mutated afterwards. The
/// table holds weak references so it never keeps removed nodes alive.
#[derive(Debug, Default)]
pub(crate) struct PartitionTable {
    map: HashMap<String, Vec<Slot>>,
    // Round-robin cursor for Replica::MasterProles.
    cursor: AtomicUsize,
}

impl PartitionTable {
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn slots(&self, namespace: &str) -> Option<&[Slot]> {
        self.map.get(namespace).map(Vec::as_slice)
    }

    /// Pick the node that serves `partition` under the given replica policy.
    /// `sequence` counts the attempts made so far, advancing rank selection
    /// on retries.
    pub fn node_for(
        &self,
        partition: &Partition<'_>,
        replica: Replica,
        sequence: usize,
        rack_id: Option<usize>,
    ) -> Option<Arc<Node>> {
        let slot = self.map.get(partition.namespace)?.get(partition.id)?;

        match replica {
            Replica::Master => slot.rank(0),
            Replica::MasterProles => {
                let start = self.cursor.fetch_add(1, Ordering::Relaxed);
                (0..slot.len()).find_map(|i| slot.rank((start + i) % slot.len()))
            }
            Replica::Sequence => (0..slot.len()).find_map(|i| slot.rank((sequence + i) % slot.len())),
            Replica::Random => {
                let start = rand::thread_rng().gen_range(0..slot.len());
                (0..slot.len()).find_map(|i| slot.rank((start + i) % slot.len()))
            }
            Replica::PreferRack => {
                let racked = (0..slot.len()).find_map(|rank| {
                    slot.rank(rank)
                        .filter(|node| rack_id.is_some() && node.rack_id() == rack_id)
                });
                racked.or_else(|| {
                    (0..slot.len()).find_map(|i| slot.rank((sequence + i) % slot.len()))
                })
            }
        }
    }

    /// The node owning `partition` at the given replica rank, regardless of
    /// liveness. Used by the scan/query tracker to group partitions.
    pub fn owner(&self, namespace: &str, id: usize) -> Option<Arc<Node>> {
        self.map.get(namespace)?.get(id)?.rank(0)
    }

    /// Start a new table that reuses the slots of the previous snapshot.
    pub fn clone_map(&self) -> HashMap<String, Vec<Slot>> {
        self.map.clone()
    }

    pub fn from_map(map: HashMap<String, Vec<Slot>>) -> Self {
        Self {
            map,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Whether the node still owns any partition in this table.
    pub fn references(&self, node: &Node) -> bool {
        self.map.values().any(|slots| {
            slots.iter().any(|slot| {
                slot.replicas
                    .iter()
                    .filter_map(Weak::upgrade)
                    .any(|owner| owner.name() == node.name())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::{partition_id, Partition, PartitionTable, Slot, DEFAULT_N_PARTITIONS};
    use crate::{cluster::Node, policy::Replica, Key};

    #[test]
    fn partition_id_is_masked_le_prefix() {
        let mut digest = [0; 20];
        digest[0] = 0x01;
        digest[1] = 0x10;
        assert_eq!(partition_id(&digest, 4096), 0x1001 & 0x0fff);

        digest[0] = 0xff;
        digest[1] = 0xff;
        digest[2] = 0xff;
        digest[3] = 0xff;
        assert_eq!(partition_id(&digest, 4096), 4095);
    }

    #[test]
    fn sequence_walks_replica_ranks() {
        let a = Arc::new(Node::for_tests("node-a"));
        let b = Arc::new(Node::for_tests("node-b"));
        let mut map = HashMap::new();
        map.insert(
            "test".to_owned(),
            vec![Slot {
                replicas: vec![Arc::downgrade(&a), Arc::downgrade(&b)],
            }],
        );
        let table = PartitionTable::from_map(map);
        let partition = Partition::new("test", 0);

        // Consecutive attempts advance one rank.
        let first = table
            .node_for(&partition, Replica::Sequence, 0, None)
            .unwrap();
        let second = table
            .node_for(&partition, Replica::Sequence, 1, None)
            .unwrap();
        assert_eq!(first.name(), "node-a");
        assert_eq!(second.name(), "node-b");

        // With the master down, the first attempt already lands on the
        // prole, while master-only reads find nothing.
        a.inactivate();
        let fallback = table
            .node_for(&partition, Replica::Sequence, 0, None)
            .unwrap();
        assert_eq!(fallback.name(), "node-b");
        assert!(table
            .node_for(&partition, Replica::Master, 0, None)
            .is_none());
    }

    #[test]
    fn partition_from_key_is_stable() {
        let key = Key::new("test", "set", "hello");
        let a = Partition::new_by_key(&key, DEFAULT_N_PARTITIONS);
        let b = Partition::new_by_key(&key, DEFAULT_N_PARTITIONS);
        assert_eq!(a, b);
        assert!(a.id < DEFAULT_N_PARTITIONS);
        assert_eq!(a.namespace, "test");
    }
}
