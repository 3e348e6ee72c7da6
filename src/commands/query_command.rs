use std::sync::Arc;

use super::{Command, Result, StreamCommand};
use crate::{cluster::Node, net::Connection, policy::QueryPolicy, query::Statement};

/// Runs a secondary-index query against a node's share of the partitions.
pub(crate) struct QueryCommand<'a> {
    stream: StreamCommand,
    policy: &'a QueryPolicy,
    statement: Arc<Statement>,
    partitions: Vec<(u16, Option<[u8; 20]>)>,
    max_records: u64,
}

impl<'a> QueryCommand<'a> {
    pub fn new(
        policy: &'a QueryPolicy,
        stream: StreamCommand,
        statement: Arc<Statement>,
        partitions: Vec<(u16, Option<[u8; 20]>)>,
        max_records: u64,
    ) -> Self {
        Self {
            stream,
            policy,
            statement,
            partitions,
            max_records,
        }
    }

    pub async fn execute(&mut self) -> Result<()> {
        // Failed partitions are re-dispatched by the partition tracker
        // from their resumption cursors, never replayed wholesale here.
        let mut policy = self.policy.base_policy.clone();
        policy.max_retries = 0;
        super::execute(&policy, self).await
    }
}

#[async_trait::async_trait]
impl Command for QueryCommand<'_> {
    async fn node(&mut self, sequence: usize) -> Result<Arc<Node>> {
        Command::node(&mut self.stream, sequence).await
    }

    fn prepare_buffer(&mut self, conn: &mut Connection, _node: &Node) -> Result<()> {
        conn.buffer()
            .set_query(
                self.policy,
                &self.statement,
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
