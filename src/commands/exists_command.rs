use std::sync::Arc;

use super::{read_command::read_reply, Command, CommandError, Result, SingleCommand};
use crate::{
    cluster::{Cluster, Node},
    net::Connection,
    policy::BasePolicy,
    Key, ResultCode,
};

pub(crate) struct ExistsCommand<'a> {
    single: SingleCommand<'a>,
    policy: &'a BasePolicy,
    pub exists: bool,
}

impl<'a> ExistsCommand<'a> {
    pub fn new(policy: &'a BasePolicy, cluster: Arc<Cluster>, key: &'a Key) -> Self {
        Self {
            single: SingleCommand::new(cluster, key),
            policy,
            exists: false,
        }
    }

    pub async fn execute(&mut self) -> Result<()> {
        super::execute(self.policy, self).await
    }
}

#[async_trait::async_trait]
impl Command for ExistsCommand<'_> {
    async fn node(&mut self, sequence: usize) -> Result<Arc<Node>> {
        self.single.node(self.policy.replica, sequence)
    }

    fn prepare_buffer(&mut self, conn: &mut Connection, _node: &Node) -> Result<()> {
        conn.buffer()
            .set_exists(self.policy, self.single.key)
            .map_err(Into::into)
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        let (header, _reply) = read_reply(conn).await?;

        match header.result_code {
            ResultCode::Ok | ResultCode::KeyNotFound => {
                self.exists = header.result_code == ResultCode::Ok;
                Ok(())
            }
            code => Err(CommandError::server(code)),
        }
    }
}
