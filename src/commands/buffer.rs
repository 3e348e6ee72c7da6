#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use tokio::time::Duration;

use crate::{
    batch::{BatchOp, BatchRecord},
    commands::field_type::FieldType,
    operations::Operation,
    policy::{
        BasePolicy, BatchPolicy, CommitLevel, GenerationPolicy, QueryPolicy, ReadMode,
        RecordExistsAction, ScanPolicy, WritePolicy,
    },
    query::Statement,
    Bin, Bins, Key, ResultCode,
};

bitflags! {
    /// First set of message attributes, describing reads.
    #[derive(Clone, Copy, Debug)]
    pub(crate) struct ReadAttr: u8 {
        /// Contains a read operation.
        const READ = 1;
        /// Return all bins.
        const GET_ALL = 1 << 1;
        /// Inline short query, bypassing the query queue.
        const SHORT_QUERY = 1 << 2;
        /// Batch protocol frame.
        const BATCH = 1 << 3;
        /// Return record metadata only, no bin data.
        const GET_NO_BINS = 1 << 5;
        /// Involve all replicas in the read.
        const READ_MODE_ALL = 1 << 6;
    }
}

bitflags! {
    /// Second set of message attributes, describing writes.
    #[derive(Clone, Copy, Debug)]
    pub(crate) struct WriteAttr: u8 {
        /// Contains a write semantic.
        const WRITE = 1;
        /// Delete the record.
        const DELETE = 1 << 1;
        /// Pay attention to the generation.
        const GENERATION = 1 << 2;
        /// Apply the write only if `new generation > old`.
        const GENERATION_GT = 1 << 3;
        /// Leave a tombstone when the operation deletes the record.
        const DURABLE_DELETE = 1 << 4;
        /// Write only if the record does not exist yet.
        const CREATE_ONLY = 1 << 5;
        /// Return a result for every operation, in request order.
        const RESPOND_ALL_OPS = 1 << 7;
    }
}

bitflags! {
    /// Third set of message attributes.
    #[derive(Clone, Copy, Debug)]
    pub(crate) struct InfoAttr: u8 {
        /// Last frame of a multi-frame response.
        const LAST = 1;
        /// Fire-and-forget replica writes.
        const COMMIT_LEVEL_MASTER = 1 << 1;
        /// In a stream response, the announced partition is complete.
        const PARTITION_DONE = 1 << 2;
        /// Update an existing record only, never create.
        const UPDATE_ONLY = 1 << 3;
        /// Completely replace an existing record, or create a new one.
        const CREATE_OR_REPLACE = 1 << 4;
        /// Completely replace an existing record, never create.
        const REPLACE_ONLY = 1 << 5;
    }
}

bitflags! {
    /// Transaction attributes, carried in the reserved header slot.
    #[derive(Clone, Copy, Debug)]
    pub(crate) struct TxnAttr: u8 {
        /// Verify the recorded read versions.
        const VERIFY = 1;
        /// Make the transaction's provisional writes durable.
        const ROLL_FORWARD = 1 << 1;
        /// Discard the transaction's provisional writes.
        const ROLL_BACK = 1 << 2;
    }
}

/// Batch entry kinds on the wire.
pub(crate) mod batch_kind {
    pub const READ: u8 = 0;
    pub const WRITE: u8 = 1;
    pub const DELETE: u8 = 2;
    pub const UDF: u8 = 3;
    pub const TXN_VERIFY: u8 = 4;
    pub const TXN_ROLL: u8 = 5;
}

pub(crate) const PROTO_HEADER_SIZE: usize = 8;
pub(crate) const TOTAL_HEADER_SIZE: usize = PROTO_HEADER_SIZE + MessageHeader::SIZE;

const FIELD_HEADER_SIZE: usize = 5;
const OPERATION_HEADER_SIZE: usize = 8;
const DIGEST_SIZE: usize = 20;

// Protects against allocating massive buffers when a corrupted stream
// produces a bogus frame length.
const MAX_BUFFER_SIZE: usize = 1024 * 1024 + 8; // 1 MiB + header

pub type Result<T, E = BufferError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("invalid size for buffer: {size} (max {max})")]
    SizeExceeded { size: usize, max: usize },
    #[error("invalid UTF-8 content encountered")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("invalid protocol frame: {0}")]
    BadFrame(&'static str),
}

/// Protocol versions and frame types of the 8-byte frame prefix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ProtoType {
    Info = 1,
    Admin = 2,
    Message = 3,
}

pub(crate) const PROTO_VERSION: u8 = 2;

#[derive(Clone, Copy, Debug)]
pub(crate) struct ProtoHeader {
    pub ty: u8,
    /// Payload size following the 8-byte prefix.
    pub size: usize,
}

impl ProtoHeader {
    pub(crate) fn write_to(ty: ProtoType, size: usize, buf: &mut impl BufMut) {
        buf.put_u64(
            (u64::from(PROTO_VERSION) << 56) | ((ty as u64) << 48) | (size as u64 & 0xffff_ffff_ffff),
        );
    }

    pub(crate) fn read_from(buf: &mut impl Buf) -> Result<Self> {
        let raw = buf.get_u64();
        let version = (raw >> 56) as u8;
        if version != PROTO_VERSION {
            return Err(BufferError::BadFrame("unsupported protocol version"));
        }
        Ok(Self {
            ty: (raw >> 48) as u8,
            size: (raw & 0xffff_ffff_ffff) as usize,
        })
    }
}

/// The fixed 22-byte message header following the frame prefix.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MessageHeader {
    pub read_attr: ReadAttr,
    pub write_attr: WriteAttr,
    pub info_attr: InfoAttr,
    pub txn_attr: TxnAttr,
    pub result_code: ResultCode,
    pub generation: u32,
    pub expiration: u32,
    /// Command timeout in requests; recycled as the batch index in batch
    /// response entries.
    pub timeout_or_index: u32,
    pub field_count: u16,
    pub operation_count: u16,
}

impl MessageHeader {
    pub(crate) const SIZE: usize = 22;

    /// Write the frame prefix plus this header; `size` is the payload
    /// length following the header.
    pub(crate) fn write_to(&self, size: usize, buf: &mut impl BufMut) {
        ProtoHeader::write_to(ProtoType::Message, Self::SIZE + size, buf);

        buf.put_u8(Self::SIZE as u8);
        buf.put_u8(self.read_attr.bits());
        buf.put_u8(self.write_attr.bits());
        buf.put_u8(self.info_attr.bits());
        buf.put_u8(self.txn_attr.bits());
        buf.put_u8(self.result_code.into());
        buf.put_u32(self.generation);
        buf.put_u32(self.expiration);
        buf.put_u32(self.timeout_or_index);
        buf.put_u16(self.field_count);
        buf.put_u16(self.operation_count);
    }

    pub(crate) fn read_from(buf: &mut impl Buf) -> Result<Self> {
        let header_length = buf.get_u8();
        if usize::from(header_length) != Self::SIZE {
            return Err(BufferError::BadFrame("unexpected message header length"));
        }

        Ok(Self {
            read_attr: ReadAttr::from_bits_truncate(buf.get_u8()),
            write_attr: WriteAttr::from_bits_truncate(buf.get_u8()),
            info_attr: InfoAttr::from_bits_truncate(buf.get_u8()),
            txn_attr: TxnAttr::from_bits_truncate(buf.get_u8()),
            result_code: ResultCode::from(buf.get_u8()),
            generation: buf.get_u32(),
            expiration: buf.get_u32(),
            timeout_or_index: buf.get_u32(),
            field_count: buf.get_u16(),
            operation_count: buf.get_u16(),
        })
    }

    fn for_read(policy: &BasePolicy, mut read_attr: ReadAttr, fields: u16, ops: u16) -> Self {
        if policy.read_mode == ReadMode::All {
            read_attr |= ReadAttr::READ_MODE_ALL;
        }

        Self {
            read_attr,
            write_attr: WriteAttr::empty(),
            info_attr: InfoAttr::empty(),
            txn_attr: TxnAttr::empty(),
            result_code: ResultCode::Ok,
            generation: 0,
            expiration: 0,
            timeout_or_index: timeout_millis(policy.total_timeout),
            field_count: fields,
            operation_count: ops,
        }
    }

    fn for_write(
        policy: &WritePolicy,
        read_attr: ReadAttr,
        mut write_attr: WriteAttr,
        fields: u16,
        ops: u16,
    ) -> Self {
        let mut info_attr = InfoAttr::empty();
        let mut generation = 0;

        match policy.record_exists_action {
            RecordExistsAction::Update => (),
            RecordExistsAction::UpdateOnly => info_attr |= InfoAttr::UPDATE_ONLY,
            RecordExistsAction::Replace => info_attr |= InfoAttr::CREATE_OR_REPLACE,
            RecordExistsAction::ReplaceOnly => info_attr |= InfoAttr::REPLACE_ONLY,
            RecordExistsAction::CreateOnly => write_attr |= WriteAttr::CREATE_ONLY,
        }

        match policy.generation_policy {
            GenerationPolicy::None => (),
            GenerationPolicy::ExpectGenEqual => {
                generation = policy.generation;
                write_attr |= WriteAttr::GENERATION;
            }
            GenerationPolicy::ExpectGenGreater => {
                generation = policy.generation;
                write_attr |= WriteAttr::GENERATION_GT;
            }
        }

        if policy.commit_level == CommitLevel::Master {
            info_attr |= InfoAttr::COMMIT_LEVEL_MASTER;
        }

        if policy.durable_delete {
            write_attr |= WriteAttr::DURABLE_DELETE;
        }

        Self {
            read_attr,
            write_attr,
            info_attr,
            txn_attr: TxnAttr::empty(),
            result_code: ResultCode::Ok,
            generation,
            expiration: policy.expiration.into(),
            timeout_or_index: timeout_millis(policy.base_policy.total_timeout),
            field_count: fields,
            operation_count: ops,
        }
    }
}

fn timeout_millis(timeout: Duration) -> u32 {
    timeout.as_millis().min(u128::from(u32::MAX)) as u32
}

/// Request/response byte buffer of a single connection.
#[derive(Debug, Default)]
pub struct Buffer {
    data: BytesMut,
    reclaim_threshold: usize,
}

impl Buffer {
    #[must_use]
    pub(crate) fn new(reclaim_threshold: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(4096),
            reclaim_threshold,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(data: BytesMut) -> Self {
        Self {
            data,
            reclaim_threshold: usize::MAX,
        }
    }

    /// Drop any leftover content and reserve room for a request.
    pub(crate) fn begin_request(&mut self, estimate: usize) -> Result<()> {
        if estimate > MAX_BUFFER_SIZE {
            return Err(BufferError::SizeExceeded {
                size: estimate,
                max: MAX_BUFFER_SIZE,
            });
        }
        self.data.clear();
        self.data.reserve(estimate);
        Ok(())
    }

    /// Take the written request bytes out of the buffer.
    pub(crate) fn split(&mut self) -> BytesMut {
        self.data.split()
    }

    /// Prepare the buffer to receive exactly `size` bytes.
    pub(crate) fn resize(&mut self, size: usize) -> Result<()> {
        if size > MAX_BUFFER_SIZE {
            return Err(BufferError::SizeExceeded {
                size,
                max: MAX_BUFFER_SIZE,
            });
        }

        let capacity = self.data.capacity();
        self.data.clear();
        self.data.resize(size, 0);

        if capacity > self.reclaim_threshold && capacity > size {
            self.data = BytesMut::from(&*self.data);
        }

        Ok(())
    }

    pub(crate) fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub(crate) fn skip(&mut self, count: usize) {
        self.data.advance(count);
    }

    pub(crate) fn read_u8(&mut self) -> u8 {
        self.data.get_u8()
    }

    pub(crate) fn read_i8(&mut self) -> i8 {
        self.data.get_i8()
    }

    pub(crate) fn read_u16(&mut self) -> u16 {
        self.data.get_u16()
    }

    pub(crate) fn read_i16(&mut self) -> i16 {
        self.data.get_i16()
    }

    pub(crate) fn read_u32(&mut self) -> u32 {
        self.data.get_u32()
    }

    pub(crate) fn read_i32(&mut self) -> i32 {
        self.data.get_i32()
    }

    pub(crate) fn read_u64(&mut self) -> u64 {
        self.data.get_u64()
    }

    pub(crate) fn read_i64(&mut self) -> i64 {
        self.data.get_i64()
    }

    pub(crate) fn read_str(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8(self.read_blob(len))?)
    }

    pub(crate) fn read_blob(&mut self, len: usize) -> Vec<u8> {
        let mut blob = vec![0; len];
        self.data.copy_to_slice(&mut blob);
        blob
    }

    pub(crate) fn read_digest(&mut self) -> [u8; 20] {
        let mut digest = [0; DIGEST_SIZE];
        self.data.copy_to_slice(&mut digest);
        digest
    }

    pub(crate) fn read_proto_header(&mut self) -> Result<ProtoHeader> {
        ProtoHeader::read_from(&mut self.data)
    }

    pub(crate) fn read_message_header(&mut self) -> Result<MessageHeader> {
        MessageHeader::read_from(&mut self.data)
    }

    /// Read a field header, returning the field type and the length of the
    /// field data that follows.
    pub(crate) fn read_field_header(&mut self) -> (u8, usize) {
        let size = self.data.get_u32() as usize;
        let ty = self.data.get_u8();
        (ty, size - 1)
    }

    pub(crate) fn write_u8(&mut self, v: u8) {
        self.data.put_u8(v);
    }

    pub(crate) fn write_u16(&mut self, v: u16) {
        self.data.put_u16(v);
    }

    pub(crate) fn write_u16_le(&mut self, v: u16) {
        self.data.put_u16_le(v);
    }

    pub(crate) fn write_u32(&mut self, v: u32) {
        self.data.put_u32(v);
    }

    pub(crate) fn write_u64(&mut self, v: u64) {
        self.data.put_u64(v);
    }

    pub(crate) fn write_str(&mut self, v: &str) {
        self.data.put_slice(v.as_bytes());
    }

    pub(crate) fn write_bytes(&mut self, v: &[u8]) {
        self.data.put_slice(v);
    }

    pub(crate) fn write_field_header(&mut self, size: usize, ty: FieldType) {
        self.data.put_u32(size as u32 + 1);
        self.data.put_u8(ty as u8);
    }

    pub(crate) fn write_field_str(&mut self, v: &str, ty: FieldType) {
        self.write_field_header(v.len(), ty);
        self.write_str(v);
    }

    pub(crate) fn write_field_bytes(&mut self, v: &[u8], ty: FieldType) {
        self.write_field_header(v.len(), ty);
        self.write_bytes(v);
    }

    pub(crate) fn write_field_u64(&mut self, v: u64, ty: FieldType) {
        self.write_field_header(8, ty);
        self.write_u64(v);
    }

    pub(crate) fn write_operation(
        &mut self,
        op: crate::operations::OperationType,
        name: &str,
        value: &crate::Value,
    ) {
        let value_size = value.estimate_size();
        self.data
            .put_u32((OPERATION_HEADER_SIZE - 4 + name.len() + value_size) as u32);
        self.data.put_u8(op as u8);
        self.data.put_u8(value.particle_type() as u8);
        self.data.put_u8(0);
        self.data.put_u8(name.len() as u8);
        self.data.put_slice(name.as_bytes());
        value.write_to(&mut self.data);
    }

    // ------------------------------------------------------------------
    // Request encoders
    // ------------------------------------------------------------------

    /// Encode a write-family command (put/add/append/prepend).
    pub(crate) fn set_write(
        &mut self,
        policy: &WritePolicy,
        op_type: crate::operations::OperationType,
        key: &Key,
        bins: &[Bin],
    ) -> Result<()> {
        let common = CommonFields::new(policy.as_ref(), key, policy.as_ref().send_key, true);
        let ops_size = bins
            .iter()
            .map(|bin| OPERATION_HEADER_SIZE + crate::operations::estimate_size_for_bin(bin))
            .sum::<usize>();
        let size = common.size + ops_size;

        self.begin_request(TOTAL_HEADER_SIZE + size)?;
        MessageHeader::for_write(
            policy,
            ReadAttr::empty(),
            WriteAttr::WRITE,
            common.count,
            bins.len() as u16,
        )
        .write_to(size, &mut self.data);

        common.write_to(self);
        for bin in bins {
            self.write_operation(op_type, bin.name.as_ref(), &bin.value);
        }

        Ok(())
    }

    /// Encode a record delete.
    pub(crate) fn set_delete(&mut self, policy: &WritePolicy, key: &Key) -> Result<()> {
        let common = CommonFields::new(policy.as_ref(), key, false, true);

        self.begin_request(TOTAL_HEADER_SIZE + common.size)?;
        MessageHeader::for_write(
            policy,
            ReadAttr::empty(),
            WriteAttr::WRITE | WriteAttr::DELETE,
            common.count,
            0,
        )
        .write_to(common.size, &mut self.data);

        common.write_to(self);

        Ok(())
    }

    /// Encode a touch, refreshing the record's TTL.
    pub(crate) fn set_touch(&mut self, policy: &WritePolicy, key: &Key) -> Result<()> {
        let common = CommonFields::new(policy.as_ref(), key, policy.as_ref().send_key, true);
        let size = common.size + OPERATION_HEADER_SIZE;

        self.begin_request(TOTAL_HEADER_SIZE + size)?;
        MessageHeader::for_write(policy, ReadAttr::empty(), WriteAttr::WRITE, common.count, 1)
            .write_to(size, &mut self.data);

        common.write_to(self);
        self.write_operation(crate::operations::OperationType::Touch, "", &crate::Value::Nil);

        Ok(())
    }

    /// Encode an existence check.
    pub(crate) fn set_exists(&mut self, policy: &BasePolicy, key: &Key) -> Result<()> {
        let common = CommonFields::new(policy, key, false, false);

        self.begin_request(TOTAL_HEADER_SIZE + common.size)?;
        MessageHeader::for_read(
            policy,
            ReadAttr::READ | ReadAttr::GET_NO_BINS,
            common.count,
            0,
        )
        .write_to(common.size, &mut self.data);

        common.write_to(self);

        Ok(())
    }

    /// Encode a record read.
    pub(crate) fn set_read(&mut self, policy: &BasePolicy, key: &Key, bins: &Bins) -> Result<()> {
        let common = CommonFields::new(policy, key, policy.send_key, false);

        let (read_attr, ops_size, op_count) = match bins {
            Bins::All => (ReadAttr::READ | ReadAttr::GET_ALL, 0, 0),
            Bins::None => (ReadAttr::READ | ReadAttr::GET_NO_BINS, 0, 0),
            Bins::Some(names) => (
                ReadAttr::READ,
                names
                    .iter()
                    .map(|name| OPERATION_HEADER_SIZE + name.len())
                    .sum::<usize>(),
                names.len() as u16,
            ),
        };
        let size = common.size + ops_size;

        self.begin_request(TOTAL_HEADER_SIZE + size)?;
        MessageHeader::for_read(policy, read_attr, common.count, op_count)
            .write_to(size, &mut self.data);

        common.write_to(self);
        if let Bins::Some(names) = bins {
            for name in names {
                self.write_operation(
                    crate::operations::OperationType::Read,
                    name,
                    &crate::Value::Nil,
                );
            }
        }

        Ok(())
    }

    /// Encode a multi-operation command.
    pub(crate) fn set_operate(
        &mut self,
        policy: &WritePolicy,
        key: &Key,
        operations: &[Operation<'_>],
    ) -> Result<()> {
        let mut read_attr = ReadAttr::empty();
        let mut write_attr = WriteAttr::empty();

        let ops_size = operations
            .iter()
            .map(|operation| {
                match operation {
                    Operation {
                        op: crate::operations::OperationType::Read,
                        bin: crate::operations::OperationBin::None,
                        ..
                    } => read_attr |= ReadAttr::READ | ReadAttr::GET_NO_BINS,
                    Operation {
                        op: crate::operations::OperationType::Read,
                        bin: crate::operations::OperationBin::All,
                        ..
                    } => read_attr |= ReadAttr::READ | ReadAttr::GET_ALL,
                    Operation {
                        op: crate::operations::OperationType::Read,
                        ..
                    } => read_attr |= ReadAttr::READ,
                    _ => write_attr |= WriteAttr::WRITE,
                }
                if policy.respond_per_each_op {
                    write_attr |= WriteAttr::RESPOND_ALL_OPS;
                }

                OPERATION_HEADER_SIZE + operation.estimate_size()
            })
            .sum::<usize>();

        let is_write = !write_attr.is_empty();
        let common = CommonFields::new(
            policy.as_ref(),
            key,
            policy.as_ref().send_key && is_write,
            is_write,
        );
        let size = common.size + ops_size;

        self.begin_request(TOTAL_HEADER_SIZE + size)?;
        if is_write {
            MessageHeader::for_write(
                policy,
                read_attr,
                write_attr,
                common.count,
                operations.len() as u16,
            )
        } else {
            MessageHeader::for_read(
                policy.as_ref(),
                read_attr,
                common.count,
                operations.len() as u16,
            )
        }
        .write_to(size, &mut self.data);

        common.write_to(self);
        for operation in operations {
            operation.write_to(self);
        }

        Ok(())
    }

    /// Encode a single-key UDF invocation.
    pub(crate) fn set_udf(
        &mut self,
        policy: &WritePolicy,
        key: &Key,
        package: &str,
        function: &str,
        args: &crate::Value,
    ) -> Result<()> {
        let common = CommonFields::new(policy.as_ref(), key, policy.as_ref().send_key, true);
        let args_size = crate::operations::pack_size(args);
        let udf_fields = FIELD_HEADER_SIZE * 3 + package.len() + function.len() + args_size;
        let size = common.size + udf_fields;

        self.begin_request(TOTAL_HEADER_SIZE + size)?;
        MessageHeader::for_write(
            policy,
            ReadAttr::empty(),
            WriteAttr::WRITE,
            common.count + 3,
            0,
        )
        .write_to(size, &mut self.data);

        common.write_to(self);
        self.write_field_str(package, FieldType::UdfPackage);
        self.write_field_str(function, FieldType::UdfFunction);
        self.write_field_header(args_size, FieldType::UdfArgs);
        crate::msgpack::encoder::pack_value(&mut self.data, args);

        Ok(())
    }

    /// Encode a partition scan request.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn set_scan(
        &mut self,
        policy: &ScanPolicy,
        namespace: &str,
        set_name: &str,
        bins: &Bins,
        task_id: u64,
        partitions: &[(u16, Option<[u8; 20]>)],
        max_records: u64,
    ) -> Result<()> {
        let mut field_count = 0u16;
        let mut field_size = 0usize;

        if !namespace.is_empty() {
            field_count += 1;
            field_size += FIELD_HEADER_SIZE + namespace.len();
        }
        if !set_name.is_empty() {
            field_count += 1;
            field_size += FIELD_HEADER_SIZE + set_name.len();
        }

        // task id + partition id array + resumption digests
        field_count += 3;
        field_size += FIELD_HEADER_SIZE
            + 8
            + FIELD_HEADER_SIZE
            + partitions.len() * 2
            + FIELD_HEADER_SIZE
            + partitions.len() * DIGEST_SIZE;

        if max_records > 0 {
            field_count += 1;
            field_size += FIELD_HEADER_SIZE + 8;
        }

        let (bins_size, bin_count, read_attr) = match bins {
            Bins::All => (0, 0, ReadAttr::READ | ReadAttr::GET_ALL),
            Bins::None => (0, 0, ReadAttr::READ | ReadAttr::GET_NO_BINS),
            Bins::Some(names) => (
                names
                    .iter()
                    .map(|name| OPERATION_HEADER_SIZE + name.len())
                    .sum::<usize>(),
                names.len() as u16,
                ReadAttr::READ,
            ),
        };

        if let Some(filter) = &policy.base_policy.filter_expression {
            let packed = filter.pack(&mut crate::msgpack::Sink);
            field_count += 1;
            field_size += FIELD_HEADER_SIZE + packed;
        }

        let size = field_size + bins_size;

        self.begin_request(TOTAL_HEADER_SIZE + size)?;
        MessageHeader::for_read(&policy.base_policy, read_attr, field_count, bin_count)
            .write_to(size, &mut self.data);

        if !namespace.is_empty() {
            self.write_field_str(namespace, FieldType::Namespace);
        }
        if !set_name.is_empty() {
            self.write_field_str(set_name, FieldType::Table);
        }
        self.write_field_u64(task_id, FieldType::TaskId);

        self.write_field_header(partitions.len() * 2, FieldType::PartitionArray);
        for (id, _) in partitions {
            self.write_u16_le(*id);
        }

        self.write_field_header(partitions.len() * DIGEST_SIZE, FieldType::DigestArray);
        for (_, digest) in partitions {
            self.write_bytes(&digest.unwrap_or_default());
        }

        if max_records > 0 {
            self.write_field_u64(max_records, FieldType::MaxRecords);
        }

        if let Some(filter) = &policy.base_policy.filter_expression {
            let packed = filter.pack(&mut crate::msgpack::Sink);
            self.write_field_header(packed, FieldType::FilterExpression);
            filter.pack(&mut self.data);
        }

        if let Bins::Some(names) = bins {
            for name in names {
                self.write_operation(
                    crate::operations::OperationType::Read,
                    name,
                    &crate::Value::Nil,
                );
            }
        }

        Ok(())
    }

    /// Encode a secondary-index query request.
    pub(crate) fn set_query(
        &mut self,
        policy: &QueryPolicy,
        statement: &Statement,
        task_id: u64,
        partitions: &[(u16, Option<[u8; 20]>)],
        max_records: u64,
    ) -> Result<()> {
        // A query is a scan with an index range attached; reuse the scan
        // frame and append the range field.
        let scan_policy = ScanPolicy {
            base_policy: policy.base_policy.clone(),
            record_queue_size: policy.record_queue_size,
            max_records: policy.max_records,
            max_concurrent_nodes: policy.max_concurrent_nodes,
        };
        self.set_scan(
            &scan_policy,
            &statement.namespace,
            &statement.set_name,
            &statement.bins,
            task_id,
            partitions,
            max_records,
        )?;

        if let Some(range) = statement.filter_range_bytes() {
            // Patch the field count in the already-written header.
            let field_count_at = PROTO_HEADER_SIZE + 18;
            let count = u16::from_be_bytes([self.data[field_count_at], self.data[field_count_at + 1]]);
            let new_count = (count + 1).to_be_bytes();
            self.data[field_count_at] = new_count[0];
            self.data[field_count_at + 1] = new_count[1];

            // And the frame size.
            let mut raw = u64::from_be_bytes(self.data[..8].try_into().unwrap());
            raw += (FIELD_HEADER_SIZE + range.len()) as u64;
            self.data[..8].copy_from_slice(&raw.to_be_bytes());

            self.write_field_bytes(&range, FieldType::IndexRange);
        }

        Ok(())
    }

    /// Encode a batch request over a node's share of the keys.
    pub(crate) fn set_batch(
        &mut self,
        policy: &BatchPolicy,
        entries: &[(usize, BatchRecord)],
    ) -> Result<()> {
        let base = policy.as_ref();

        let mut field_size = FIELD_HEADER_SIZE + 5;
        for (_, record) in entries {
            field_size += 4 + DIGEST_SIZE + 2 + 4;
            field_size += FIELD_HEADER_SIZE + record.key.namespace.len();
            if policy.send_set_name {
                field_size += FIELD_HEADER_SIZE + record.key.set_name.len();
            }
            field_size += batch_entry_payload_size(record);
        }

        self.begin_request(TOTAL_HEADER_SIZE + field_size)?;
        MessageHeader::for_read(base, ReadAttr::READ | ReadAttr::BATCH, 1, 0)
            .write_to(field_size, &mut self.data);

        self.write_field_header(field_size - FIELD_HEADER_SIZE, FieldType::BatchIndex);
        self.write_u32(entries.len() as u32);
        self.write_u8(u8::from(policy.allow_inline));

        for (index, record) in entries {
            self.write_u32(*index as u32);
            self.write_bytes(&record.key.digest);
            self.write_u8(record.op.wire_kind());
            self.write_u8(match &record.op {
                BatchOp::Read(Bins::All) => (ReadAttr::READ | ReadAttr::GET_ALL).bits(),
                BatchOp::Read(Bins::None) => (ReadAttr::READ | ReadAttr::GET_NO_BINS).bits(),
                BatchOp::Read(Bins::Some(_)) => ReadAttr::READ.bits(),
                _ => 0,
            });

            let mut field_count = 1u16;
            if policy.send_set_name {
                field_count += 1;
            }
            let mut op_count = 0u16;
            match &record.op {
                BatchOp::Read(Bins::Some(names)) => op_count = names.len() as u16,
                BatchOp::Write(ops) => op_count = ops.len() as u16,
                BatchOp::Udf { .. } => field_count += 3,
                _ => (),
            }
            self.write_u16(field_count);
            self.write_u16(op_count);

            self.write_field_str(&record.key.namespace, FieldType::Namespace);
            if policy.send_set_name {
                self.write_field_str(&record.key.set_name, FieldType::Table);
            }

            match &record.op {
                BatchOp::Read(Bins::Some(names)) => {
                    for name in names {
                        self.write_operation(
                            crate::operations::OperationType::Read,
                            name,
                            &crate::Value::Nil,
                        );
                    }
                }
                BatchOp::Write(ops) => {
                    for op in ops {
                        op.write_to(self);
                    }
                }
                BatchOp::Udf {
                    package,
                    function,
                    args,
                } => {
                    self.write_field_str(package, FieldType::UdfPackage);
                    self.write_field_str(function, FieldType::UdfFunction);
                    let args = crate::Value::List(args.clone());
                    let args_size = crate::operations::pack_size(&args);
                    self.write_field_header(args_size, FieldType::UdfArgs);
                    crate::msgpack::encoder::pack_value(&mut self.data, &args);
                }
                BatchOp::Read(_) | BatchOp::Delete => (),
            }
        }

        Ok(())
    }

    /// Encode a transaction verify batch: each entry carries the version the
    /// transaction observed at read time.
    pub(crate) fn set_txn_verify(
        &mut self,
        policy: &BatchPolicy,
        txn_id: u64,
        entries: &[(usize, Key, u64)],
    ) -> Result<()> {
        let mut field_size = FIELD_HEADER_SIZE + 5;
        for (_, key, _) in entries {
            field_size += 4 + DIGEST_SIZE + 2 + 4;
            field_size += FIELD_HEADER_SIZE + key.namespace.len();
            field_size += (FIELD_HEADER_SIZE + 8) * 2;
        }

        self.begin_request(TOTAL_HEADER_SIZE + field_size)?;
        let mut header = MessageHeader::for_read(policy.as_ref(), ReadAttr::BATCH, 1, 0);
        header.txn_attr = TxnAttr::VERIFY;
        header.write_to(field_size, &mut self.data);

        self.write_field_header(field_size - FIELD_HEADER_SIZE, FieldType::BatchIndex);
        self.write_u32(entries.len() as u32);
        self.write_u8(0);

        for (index, key, version) in entries {
            self.write_u32(*index as u32);
            self.write_bytes(&key.digest);
            self.write_u8(batch_kind::TXN_VERIFY);
            self.write_u8(0);
            self.write_u16(3);
            self.write_u16(0);
            self.write_field_str(&key.namespace, FieldType::Namespace);
            self.write_field_u64(txn_id, FieldType::TxnId);
            self.write_field_u64(*version, FieldType::TxnVersion);
        }

        Ok(())
    }

    /// Encode a transaction roll batch, either forward (commit) or back
    /// (abort).
    pub(crate) fn set_txn_roll(
        &mut self,
        policy: &BatchPolicy,
        txn_id: u64,
        entries: &[(usize, Key)],
        forward: bool,
    ) -> Result<()> {
        let mut field_size = FIELD_HEADER_SIZE + 5;
        for (_, key) in entries {
            field_size += 4 + DIGEST_SIZE + 2 + 4;
            field_size += FIELD_HEADER_SIZE + key.namespace.len();
            field_size += FIELD_HEADER_SIZE + 8;
        }

        self.begin_request(TOTAL_HEADER_SIZE + field_size)?;
        let mut header = MessageHeader::for_read(policy.as_ref(), ReadAttr::BATCH, 1, 0);
        header.txn_attr = if forward {
            TxnAttr::ROLL_FORWARD
        } else {
            TxnAttr::ROLL_BACK
        };
        header.write_to(field_size, &mut self.data);

        self.write_field_header(field_size - FIELD_HEADER_SIZE, FieldType::BatchIndex);
        self.write_u32(entries.len() as u32);
        self.write_u8(0);

        for (index, key) in entries {
            self.write_u32(*index as u32);
            self.write_bytes(&key.digest);
            self.write_u8(batch_kind::TXN_ROLL);
            self.write_u8(0);
            self.write_u16(2);
            self.write_u16(0);
            self.write_field_str(&key.namespace, FieldType::Namespace);
            self.write_field_u64(txn_id, FieldType::TxnId);
        }

        Ok(())
    }
}

fn batch_entry_payload_size(record: &BatchRecord) -> usize {
    match &record.op {
        BatchOp::Read(Bins::Some(names)) => names
            .iter()
            .map(|name| OPERATION_HEADER_SIZE + name.len())
            .sum(),
        BatchOp::Read(_) | BatchOp::Delete => 0,
        BatchOp::Write(ops) => ops
            .iter()
            .map(|op| OPERATION_HEADER_SIZE + op.estimate_size())
            .sum(),
        BatchOp::Udf {
            package,
            function,
            args,
        } => {
            FIELD_HEADER_SIZE * 3
                + package.len()
                + function.len()
                + crate::operations::pack_size(&crate::Value::List(args.clone()))
        }
    }
}

/// Fields shared by all single-key requests: the key itself, transaction
/// bookkeeping and the optional filter expression.
struct CommonFields<'a> {
    policy: &'a BasePolicy,
    key: &'a Key,
    send_key: bool,
    is_write: bool,
    size: usize,
    count: u16,
}

impl<'a> CommonFields<'a> {
    fn new(policy: &'a BasePolicy, key: &'a Key, send_key: bool, is_write: bool) -> Self {
        let mut size = 0;
        let mut count = 0u16;

        size += FIELD_HEADER_SIZE + key.namespace.len();
        count += 1;
        if !key.set_name.is_empty() {
            size += FIELD_HEADER_SIZE + key.set_name.len();
            count += 1;
        }
        size += FIELD_HEADER_SIZE + DIGEST_SIZE;
        count += 1;

        let send_key = send_key && key.user_key.is_some();
        if send_key {
            let user_key = key.user_key.as_ref().unwrap();
            size += FIELD_HEADER_SIZE + 1 + user_key.estimate_size();
            count += 1;
        }

        if policy.txn.is_some() {
            size += FIELD_HEADER_SIZE + 8;
            count += 1;
            if is_write {
                size += FIELD_HEADER_SIZE + 8;
                count += 1;
            }
        }

        if let Some(filter) = &policy.filter_expression {
            size += FIELD_HEADER_SIZE + filter.pack(&mut crate::msgpack::Sink);
            count += 1;
        }

        Self {
            policy,
            key,
            send_key,
            is_write,
            size,
            count,
        }
    }

    fn write_to(&self, buffer: &mut Buffer) {
        buffer.write_field_str(&self.key.namespace, FieldType::Namespace);
        if !self.key.set_name.is_empty() {
            buffer.write_field_str(&self.key.set_name, FieldType::Table);
        }
        buffer.write_field_bytes(&self.key.digest, FieldType::Digest);

        if self.send_key {
            let user_key = self.key.user_key.as_ref().unwrap();
            buffer.write_field_header(1 + user_key.estimate_size(), FieldType::Key);
            buffer.write_u8(user_key.particle_type() as u8);
            user_key.write_to(&mut buffer.data);
        }

        if let Some(txn) = &self.policy.txn {
            buffer.write_field_u64(txn.id(), FieldType::TxnId);
            if self.is_write {
                buffer.write_field_u64(txn.deadline_epoch_secs(), FieldType::TxnDeadline);
            }
        }

        if let Some(filter) = &self.policy.filter_expression {
            let packed = filter.pack(&mut crate::msgpack::Sink);
            buffer.write_field_header(packed, FieldType::FilterExpression);
            filter.pack(&mut buffer.data);
        }
    }
}
