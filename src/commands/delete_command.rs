use std::sync::Arc;

use super::{read_command::read_reply, Command, CommandError, Result, SingleCommand};
use crate::{
    cluster::{Cluster, Node},
    net::Connection,
    policy::{Replica, WritePolicy},
    Key, ResultCode,
};

pub(crate) struct DeleteCommand<'a> {
    single: SingleCommand<'a>,
    policy: &'a WritePolicy,
    /// Whether the record existed on the server before the delete.
    pub existed: bool,
}

impl<'a> DeleteCommand<'a> {
    pub fn new(policy: &'a WritePolicy, cluster: Arc<Cluster>, key: &'a Key) -> Self {
        Self {
            single: SingleCommand::new(cluster, key),
            policy,
            existed: false,
        }
    }

    pub async fn execute(&mut self) -> Result<()> {
        super::execute(self.policy.as_ref(), self).await
    }
}

#[async_trait::async_trait]
impl Command for DeleteCommand<'_> {
    async fn node(&mut self, sequence: usize) -> Result<Arc<Node>> {
        self.single.node(Replica::Master, sequence)
    }

    fn prepare_buffer(&mut self, conn: &mut Connection, _node: &Node) -> Result<()> {
        conn.buffer()
            .set_delete(self.policy, self.single.key)
            .map_err(Into::into)
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        let (header, reply) = read_reply(conn).await?;

        match header.result_code {
            ResultCode::Ok | ResultCode::KeyNotFound => {
                self.existed = header.result_code == ResultCode::Ok;
                if let Some(txn) = &self.policy.base_policy.txn {
                    txn.on_write(self.single.key.clone(), reply.version)
                        .map_err(CommandError::server)?;
                }
                Ok(())
            }
            code => Err(CommandError::server(code)),
        }
    }

    fn is_write(&self) -> bool {
        true
    }

    fn on_in_doubt(&mut self) {
        if let Some(txn) = &self.policy.base_policy.txn {
            txn.on_write_in_doubt(self.single.key.clone());
        }
    }
}
