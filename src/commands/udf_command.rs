use std::sync::Arc;

use super::{read_command::read_reply, Command, CommandError, Result, SingleCommand};
use crate::{
    cluster::{Cluster, Node},
    net::Connection,
    policy::{Replica, WritePolicy},
    Key, Record, ResultCode, Value,
};

/// Single-key invocation of a server-side UDF. The result record carries
/// the function's return value in a `SUCCESS` or `FAILURE` bin.
pub(crate) struct UdfCommand<'a> {
    single: SingleCommand<'a>,
    policy: &'a WritePolicy,
    package: &'a str,
    function: &'a str,
    args: Value,
    pub record: Option<Record>,
}

impl<'a> UdfCommand<'a> {
    pub fn new(
        policy: &'a WritePolicy,
        cluster: Arc<Cluster>,
        key: &'a Key,
        package: &'a str,
        function: &'a str,
        args: &[Value],
    ) -> Self {
        Self {
            single: SingleCommand::new(cluster, key),
            policy,
            package,
            function,
            args: Value::List(args.to_vec()),
            record: None,
        }
    }

    pub async fn execute(&mut self) -> Result<()> {
        super::execute(self.policy.as_ref(), self).await
    }
}

#[async_trait::async_trait]
impl Command for UdfCommand<'_> {
    async fn node(&mut self, sequence: usize) -> Result<Arc<Node>> {
        self.single.node(Replica::Master, sequence)
    }

    fn prepare_buffer(&mut self, conn: &mut Connection, _node: &Node) -> Result<()> {
        conn.buffer()
            .set_udf(
                self.policy,
                self.single.key,
                self.package,
                self.function,
                &self.args,
            )
            .map_err(Into::into)
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        let (header, reply) = read_reply(conn).await?;

        match header.result_code {
            ResultCode::Ok => {
                self.record = Some(reply.into_record(&header));
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
