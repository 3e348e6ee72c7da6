use std::{collections::HashMap, sync::Arc};

use tokio::sync::mpsc;

use super::{buffer::InfoAttr, buffer::MessageHeader, Command, CommandError, FieldType, Result};
use crate::{
    cluster::{partition::partition_id, Node},
    net::Connection,
    query::PartitionProgress,
    value::bytes_to_particle,
    Key, Record, ResultCode, Value,
};

/// Shared reply handling for scans and queries: consumes a stream of
/// record frames, forwards records through the bounded queue and reports
/// per-partition progress.
pub(crate) struct StreamCommand {
    node: Arc<Node>,
    tx: mpsc::Sender<Result<Record, CommandError>>,
    progress: Arc<PartitionProgress>,
    n_partitions: usize,
    task_id: u64,
}

impl StreamCommand {
    pub fn new(
        node: Arc<Node>,
        tx: mpsc::Sender<Result<Record, CommandError>>,
        progress: Arc<PartitionProgress>,
        n_partitions: usize,
        task_id: u64,
    ) -> Self {
        Self {
            node,
            tx,
            progress,
            n_partitions,
            task_id,
        }
    }

    pub(super) fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Parse one record entry. Returns `false` once the stream (or the
    /// caller) is done and reading should stop.
    async fn parse_record(&mut self, conn: &mut Connection, header: MessageHeader) -> Result<bool> {
        if header.info_attr.contains(InfoAttr::LAST) {
            return match header.result_code {
                ResultCode::Ok => Ok(false),
                code => Err(CommandError::server(code)),
            };
        }

        if header.info_attr.contains(InfoAttr::PARTITION_DONE) {
            // The finished partition id rides in the generation slot.
            self.progress.on_partition_done(header.generation as usize);
            return Ok(true);
        }

        let (key, _version) = Self::parse_key(conn, header.field_count as usize).await?;

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

        let partition = partition_id(&key.digest(), self.n_partitions);
        if !self.progress.on_record(partition, &key.digest()) {
            // The caller's record budget is exhausted; abandon the stream.
            return Ok(false);
        }

        let record = Record::new(Some(key), bins, header.generation, header.expiration);
        Ok(self.tx.send(Ok(record)).await.is_ok())
    }

    /// Parse the key fields of a streamed record.
    pub(crate) async fn parse_key(
        conn: &mut Connection,
        field_count: usize,
    ) -> Result<(Key, Option<u64>)> {
        let mut digest = [0; 20];
        let mut namespace = String::new();
        let mut set_name = String::new();
        let mut user_key = None;
        let mut version = None;

        for _ in 0..field_count {
            conn.read_buffer(4).await?;
            let field_len = conn.buffer().read_u32() as usize;
            conn.read_buffer(field_len).await?;
            let field_type = conn.buffer().read_u8();

            match field_type {
                x if x == FieldType::Digest as u8 => {
                    digest = conn.buffer().read_digest();
                }
                x if x == FieldType::Namespace as u8 => {
                    namespace = conn.buffer().read_str(field_len - 1)?;
                }
                x if x == FieldType::Table as u8 => {
                    set_name = conn.buffer().read_str(field_len - 1)?;
                }
                x if x == FieldType::Key as u8 => {
                    let particle_type = conn.buffer().read_u8();
                    user_key = Some(crate::UserKey::read_from(
                        particle_type,
                        conn.buffer(),
                        field_len - 2,
                    )?);
                }
                x if x == FieldType::TxnVersion as u8 => {
                    version = Some(conn.buffer().read_u64());
                }
                _ => conn.buffer().skip(field_len - 1),
            }
        }

        Ok((
            Key {
                namespace: namespace.into(),
                set_name: set_name.into(),
                user_key,
                digest,
            },
            version,
        ))
    }
}

#[async_trait::async_trait]
impl Command for StreamCommand {
    async fn node(&mut self, _sequence: usize) -> Result<Arc<Node>> {
        Ok(Arc::clone(&self.node))
    }

    fn prepare_buffer(&mut self, _conn: &mut Connection, _node: &Node) -> Result<()> {
        // Implemented by the wrapping scan/query command.
        unreachable!()
    }

    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()> {
        loop {
            conn.read_buffer(super::buffer::PROTO_HEADER_SIZE).await?;
            let proto = conn.buffer().read_proto_header()?;
            conn.bookmark();

            while conn.bytes_read() < proto.size {
                conn.read_buffer(MessageHeader::SIZE).await?;
                let header = conn.buffer().read_message_header()?;

                if !self.parse_record(conn, header).await? {
                    if conn.bytes_read() >= proto.size
                        && header.info_attr.contains(InfoAttr::LAST)
                    {
                        conn.finish_exchange();
                    }
                    return Ok(());
                }
            }
        }
    }
}
