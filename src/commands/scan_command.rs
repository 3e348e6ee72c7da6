use std::sync::Arc;

use super::{Command, Result, StreamCommand};
use crate::{cluster::Node, net::Connection, policy::ScanPolicy, Bins};

/// Scans a node's share of the partitions, streaming records back through
/// the shared queue.
pub(crate) struct ScanCommand<'a> {
    stream: StreamCommand,
    policy: &'a ScanPolicy,
    namespace: &'a str,
    set_name: &'a str,
    bins: Bins,
    partitions: Vec<(u16, Option<[u8; 20]>)>,
    max_records: u64,
}

impl<'a> ScanCommand<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: &'a ScanPolicy,
        stream: StreamCommand,
        namespace: &'a str,
        set_name: &'a str,
        bins: Bins,
        partitions: Vec<(u16, Option<[u8; 20]>)>,
        max_records: u64,
    ) -> Self {
        Self {
            stream,
            policy,
            namespace,
            set_name,
            bins,
            partitions,
            max_records,
        }
    }

    pub async fn execute(&mut self) -> Result<()> {
        // Replaying the stream on this node would duplicate records the
        // caller already consumed; failed partitions are re-dispatched by
        // the partition tracker from their resumption cursors instead.
        let mut policy = self.policy.base_policy.clone();
        policy.max_retries = 0;
        super::execute(&policy, self).await
    }
}

#[async_trait::async_trait]
impl Command for ScanCommand<'_> {
    async fn node(&mut self, sequence: usize) -> Result<Arc<Node>> {
        Command::node(&mut self.stream, sequence).await
    }

    fn prepare_buffer(&mut self, conn: &mut Connection, _node: &Node) -> Result<()> {
        conn.buffer()
            .set_scan(
                self.policy,
                self.namespace,
                self.set_name,
                &self.bins,
                self.stream.task_id(),
                &self.partitions,
                self.max_records,
            )
            .map_err(Into::into)
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        self.stream.parse_result(conn).await
    }
}
