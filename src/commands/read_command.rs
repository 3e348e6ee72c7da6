use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use tracing::warn;

use super::{
    buffer::MessageHeader, Command, CommandError, FieldType, Result, SingleCommand,
};
use crate::{
    cluster::{Cluster, Node},
    net::Connection,
    policy::BasePolicy,
    value::bytes_to_particle,
    Bins, Key, Record, ResultCode, Value,
};

pub(crate) struct ReadCommand<'a> {
    single: SingleCommand<'a>,
    policy: &'a BasePolicy,
    bins: Bins,
    pub record: Option<Record>,
}

impl<'a> ReadCommand<'a> {
    pub fn new(policy: &'a BasePolicy, cluster: Arc<Cluster>, key: &'a Key, bins: Bins) -> Self {
        Self {
            single: SingleCommand::new(cluster, key),
            policy,
            bins,
            record: None,
        }
    }

    pub async fn execute(&mut self) -> Result<()> {
        super::execute(self.policy, self).await
    }
}

#[async_trait::async_trait]
impl Command for ReadCommand<'_> {
    async fn node(&mut self, sequence: usize) -> Result<Arc<Node>> {
        self.single.node(self.policy.replica, sequence)
    }

    fn prepare_buffer(&mut self, conn: &mut Connection, _node: &Node) -> Result<()> {
        conn.buffer()
            .set_read(self.policy, self.single.key, &self.bins)
            .map_err(Into::into)
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        let (header, reply) = read_reply(conn).await?;

        match header.result_code {
            ResultCode::Ok => {
                if let (Some(txn), Some(version)) = (&self.policy.txn, reply.version) {
                    txn.on_read(self.single.key.clone(), version)
                        .map_err(CommandError::server)?;
                }
                self.record = Some(reply.into_record(&header));
                Ok(())
            }
            code => Err(CommandError::server(code)),
        }
    }
}

/// Parsed body of a single-key reply.
pub(super) struct Reply {
    pub bins: HashMap<String, Value>,
    pub version: Option<u64>,
}

impl Reply {
    pub fn into_record(self, header: &MessageHeader) -> Record {
        Record::new(None, self.bins, header.generation, header.expiration)
    }
}

/// Read one complete single-key reply frame: header, fields and
/// operations. Leaves the connection clean for reuse.
pub(super) async fn read_reply(conn: &mut Connection) -> Result<(MessageHeader, Reply)> {
    conn.read_buffer(super::buffer::PROTO_HEADER_SIZE).await?;
    let proto = conn.buffer().read_proto_header()?;
    if proto.ty != super::buffer::ProtoType::Message as u8 {
        return Err(CommandError::Parse("unexpected frame type"));
    }

    conn.read_buffer(MessageHeader::SIZE).await?;
    let header = conn.buffer().read_message_header()?;

    let body = proto.size - MessageHeader::SIZE;
    if body > 0 {
        if let Err(err) = conn.read_buffer(body).await {
            warn!(%err, "failed to read reply body");
            return Err(err.into());
        }
    }

    let buffer = conn.buffer();
    let mut version = None;
    for _ in 0..header.field_count {
        let (ty, len) = buffer.read_field_header();
        if ty == FieldType::TxnVersion as u8 {
            version = Some(buffer.read_u64());
        } else {
            buffer.skip(len);
        }
    }

    let mut bins: HashMap<String, Value> = HashMap::with_capacity(header.operation_count.into());
    for _ in 0..header.operation_count {
        let op_size = buffer.read_u32() as usize;
        buffer.skip(1);
        let particle_type = buffer.read_u8();
        buffer.skip(1);
        let name_size = buffer.read_u8() as usize;
        let name = buffer.read_str(name_size)?;

        let particle_size = op_size - (4 + name_size);
        let value = bytes_to_particle(particle_type, buffer, particle_size)?;

        if value != Value::Nil {
            // Multi-result operations can answer for the same bin more
            // than once; collect those into a list.
            match bins.entry(name) {
                Entry::Vacant(entry) => {
                    entry.insert(value);
                }
                Entry::Occupied(entry) => match entry.into_mut() {
                    Value::List(list) => list.push(value),
                    prev => *prev = Value::List(vec![prev.clone(), value]),
                },
            }
        }
    }

    conn.finish_exchange();
    Ok((header, Reply { bins, version }))
}
