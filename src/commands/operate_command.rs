use std::sync::Arc;

use super::{read_command::read_reply, Command, CommandError, Result, SingleCommand};
use crate::{
    cluster::{Cluster, Node},
    net::Connection,
    operations::Operation,
    policy::{Replica, WritePolicy},
    Key, Record, ResultCode,
};

pub(crate) struct OperateCommand<'a> {
    single: SingleCommand<'a>,
    policy: &'a WritePolicy,
    operations: &'a [Operation<'a>],
    has_write: bool,
    pub record: Option<Record>,
}

impl<'a> OperateCommand<'a> {
    pub fn new(
        policy: &'a WritePolicy,
        cluster: Arc<Cluster>,
        key: &'a Key,
        operations: &'a [Operation<'a>],
    ) -> Self {
        Self {
            single: SingleCommand::new(cluster, key),
            policy,
            has_write: operations.iter().any(Operation::is_write),
            operations,
            record: None,
        }
    }

    pub async fn execute(&mut self) -> Result<()> {
        super::execute(self.policy.as_ref(), self).await
    }
}

#[async_trait::async_trait]
impl Command for OperateCommand<'_> {
    async fn node(&mut self, sequence: usize) -> Result<Arc<Node>> {
        let replica = if self.has_write {
            Replica::Master
        } else {
            self.policy.base_policy.replica
        };
        self.single.node(replica, sequence)
    }

    fn prepare_buffer(&mut self, conn: &mut Connection, _node: &Node) -> Result<()> {
        conn.buffer()
            .set_operate(self.policy, self.single.key, self.operations)
            .map_err(Into::into)
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        let (header, reply) = read_reply(conn).await?;

        match header.result_code {
            ResultCode::Ok => {
                if let Some(txn) = &self.policy.base_policy.txn {
                    if self.has_write {
                        txn.on_write(self.single.key.clone(), reply.version)
                            .map_err(CommandError::server)?;
                    } else if let Some(version) = reply.version {
                        txn.on_read(self.single.key.clone(), version)
                            .map_err(CommandError::server)?;
                    }
                }
                self.record = Some(reply.into_record(&header));
                Ok(())
            }
            code => Err(CommandError::server(code)),
        }
    }

    fn is_write(&self) -> bool {
        self.has_write
    }

    fn on_in_doubt(&mut self) {
        if let Some(txn) = &self.policy.base_policy.txn {
            txn.on_write_in_doubt(self.single.key.clone());
        }
    }
}
