use std::{collections::HashMap, sync::Arc};

use super::{
    buffer::{InfoAttr, MessageHeader},
    Command, CommandError, Result, StreamCommand,
};
use crate::{
    batch::{BatchOp, BatchRecord},
    cluster::Node,
    net::Connection,
    policy::BatchPolicy,
    value::bytes_to_particle,
    Record, ResultCode, Value,
};

/// One node's share of a batch request. Transport-level retries are left
/// to the planner, which re-routes only the failed entries.
pub(crate) struct BatchCommand {
    pub node: Arc<Node>,
    policy: BatchPolicy,
    pub entries: Vec<(usize, BatchRecord)>,
}

impl BatchCommand {
    pub fn new(policy: BatchPolicy, node: Arc<Node>, entries: Vec<(usize, BatchRecord)>) -> Self {
        Self {
            node,
            policy,
            entries,
        }
    }

    pub async fn execute(&mut self) -> Result<()> {
        let mut policy = self.policy.base_policy.clone();
        // The planner re-groups failed entries against a fresh snapshot
        // instead of hammering the same node.
        policy.max_retries = 0;
        super::execute(&policy, self).await
    }

    async fn parse_entry(
        &mut self,
        conn: &mut Connection,
        header: MessageHeader,
        positions: &HashMap<usize, usize>,
    ) -> Result<()> {
        let original_index = header.timeout_or_index as usize;
        let (key, _version) = StreamCommand::parse_key(conn, header.field_count as usize).await?;

        let mut bins: HashMap<String, Value> =
            HashMap::with_capacity(header.operation_count.into());
        for _ in 0..header.operation_count {
            conn.read_buffer(8).await?;
            let op_size = conn.buffer().read_u32() as usize;
            conn.buffer().skip(1);
            let particle_type = conn.buffer().read_u8();
            conn.buffer().skip(1);
            let name_size = conn.buffer().read_u8() as usize;
            conn.read_buffer(name_size).await?;
            let name = conn.buffer().read_str(name_size)?;

            let particle_size = op_size - (4 + name_size);
            conn.read_buffer(particle_size).await?;
            let value = bytes_to_particle(particle_type, conn.buffer(), particle_size)?;
            bins.insert(name, value);
        }

        let Some(&position) = positions.get(&original_index) else {
            return Err(CommandError::Parse("batch entry for unknown index"));
        };
        let entry = &mut self.entries[position].1;
        entry.result = header.result_code;
        entry.in_doubt = false;
        entry.record = match (header.result_code, &entry.op) {
            (ResultCode::Ok, BatchOp::Read(_) | BatchOp::Udf { .. }) => Some(Record::new(
                Some(key),
                bins,
                header.generation,
                header.expiration,
            )),
            _ => None,
        };

        Ok(())
    }
}

#[async_trait::async_trait]
impl Command for BatchCommand {
    async fn node(&mut self, _sequence: usize) -> Result<Arc<Node>> {
        Ok(Arc::clone(&self.node))
    }

    fn prepare_buffer(&mut self, conn: &mut Connection, _node: &Node) -> Result<()> {
        conn.buffer()
            .set_batch(&self.policy, &self.entries)
            .map_err(Into::into)
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        let positions: HashMap<usize, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, (index, _))| (*index, position))
            .collect();

        loop {
            conn.read_buffer(super::buffer::PROTO_HEADER_SIZE).await?;
            let proto = conn.buffer().read_proto_header()?;
            conn.bookmark();

            while conn.bytes_read() < proto.size {
                conn.read_buffer(MessageHeader::SIZE).await?;
                let header = conn.buffer().read_message_header()?;

                if header.info_attr.contains(InfoAttr::LAST) {
                    conn.finish_exchange();
                    return match header.result_code {
                        ResultCode::Ok => Ok(()),
                        code => Err(CommandError::server(code)),
                    };
                }

                self.parse_entry(conn, header, &positions).await?;
            }
        }
    }

    fn is_write(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, record)| record.op.is_write())
    }

    fn on_in_doubt(&mut self) {
        for (_, record) in &mut self.entries {
            if record.op.is_write() && record.result == ResultCode::NoResponse {
                record.in_doubt = true;
            }
        }
    }
}
