use std::{collections::HashMap, str, sync::Arc};

use base64::{engine::general_purpose, Engine};

use super::{
    partition::{PartitionTable, Slot},
    ClusterError, Node, Result,
};
use crate::{commands::Message, net::Connection};

const REPLICAS_NAME: &str = "replicas";

/// Parses one node's share of the partition map.
///
/// The `replicas` info response lists, per namespace, the replica count and
/// one base64 bitmap per replica rank; a set bit marks a partition this
/// node serves at that rank:
///
/// ```text
/// <ns>:<n_replicas>,<base64>,<base64>,...;<ns>:...
/// ```
#[derive(Debug)]
pub(crate) struct PartitionParser {
    buffer: Vec<u8>,
}

impl PartitionParser {
    pub async fn fetch(conn: &mut Connection) -> Result<Self> {
        let info_map = Message::info(conn, &[REPLICAS_NAME]).await?;
        info_map
            .get(REPLICAS_NAME)
            .map(|buf| Self {
                buffer: buf.as_bytes().to_owned(),
            })
            .ok_or(ClusterError::MissingReplicas)
    }

    /// Merge this node's bitmaps into a copy of the current table and
    /// return the merged map for publication.
    pub fn update(
        &self,
        table: &PartitionTable,
        node: &Arc<Node>,
        n_partitions: usize,
    ) -> Result<HashMap<String, Vec<Slot>>> {
        let mut map = table.clone_map();

        let part_str = str::from_utf8(&self.buffer)?;
        for ns_entry in part_str.trim_end().split(';').filter(|s| !s.is_empty()) {
            let (namespace, rest) = ns_entry
                .split_once(':')
                .ok_or(ClusterError::InvalidPartitionInfo)?;

            let mut parts = rest.split(',');
            let n_replicas: usize = parts
                .next()
                .ok_or(ClusterError::InvalidPartitionInfo)?
                .parse()?;

            let slots = map
                .entry(namespace.to_owned())
                .or_insert_with(|| vec![Slot::default(); n_partitions]);

            for rank in 0..n_replicas {
                let bitmap = general_purpose::STANDARD
                    .decode(parts.next().ok_or(ClusterError::InvalidPartitionInfo)?)?;
                if bitmap.len() * 8 < n_partitions {
                    return Err(ClusterError::InvalidPartitionInfo);
                }

                for (id, slot) in slots.iter_mut().enumerate() {
                    if bitmap[id >> 3] & (0x80 >> (id & 7) as u8) != 0 {
                        if slot.replicas.len() <= rank {
                            slot.replicas.resize_with(rank + 1, Default::default);
                        }
                        slot.replicas[rank] = Arc::downgrade(node);
                    } else if slot
                        .replicas
                        .get(rank)
                        .and_then(std::sync::Weak::upgrade)
                        .is_some_and(|owner| owner.name() == node.name())
                    {
                        // The node reports it no longer serves this
                        // partition at this rank.
                        slot.replicas[rank] = std::sync::Weak::new();
                    }
                }
            }
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use base64::{engine::general_purpose, Engine};

    use super::PartitionParser;
    use crate::cluster::partition::{Partition, PartitionTable};
    use crate::policy::Replica;

    fn bitmap(n_partitions: usize, set: &[usize]) -> String {
        let mut bytes = vec![0u8; n_partitions / 8];
        for &id in set {
            bytes[id >> 3] |= 0x80 >> (id & 7);
        }
        general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn merges_bitmaps_into_slots() {
        let node = Arc::new(crate::cluster::Node::for_tests("node-a"));
        let n_partitions = 64;

        let response = format!(
            "test:2,{},{}",
            bitmap(n_partitions, &[0, 5]),
            bitmap(n_partitions, &[9]),
        );
        let parser = PartitionParser {
            buffer: response.into_bytes(),
        };

        let table = PartitionTable::default();
        let map = parser.update(&table, &node, n_partitions).unwrap();
        let table = PartitionTable::from_map(map);

        for (id, rank_0) in [(0, true), (5, true), (9, false), (6, false)] {
            let found = table.node_for(&Partition::new("test", id), Replica::Master, 0, None);
            assert_eq!(found.is_some(), rank_0, "partition {id}");
        }

        // Partition 9 is owned at prole rank only.
        let found = table.node_for(&Partition::new("test", 9), Replica::Sequence, 0, None);
        assert!(found.is_some());
    }

    #[test]
    fn dropped_ownership_clears_slots() {
        let node = Arc::new(crate::cluster::Node::for_tests("node-a"));
        let n_partitions = 64;

        let owning = PartitionParser {
            buffer: format!("test:1,{}", bitmap(n_partitions, &[3])).into_bytes(),
        };
        let table = PartitionTable::default();
        let map = owning.update(&table, &node, n_partitions).unwrap();
        let table = PartitionTable::from_map(map);
        assert!(table
            .node_for(&Partition::new("test", 3), Replica::Master, 0, None)
            .is_some());

        // The next refresh reports no owned partitions at all.
        let disowned = PartitionParser {
            buffer: format!("test:1,{}", bitmap(n_partitions, &[])).into_bytes(),
        };
        let map = disowned.update(&table, &node, n_partitions).unwrap();
        let table = PartitionTable::from_map(map);
        assert!(table
            .node_for(&Partition::new("test", 3), Replica::Master, 0, None)
            .is_none());
    }
}
