//! In-process stand-in for a single-node cluster, speaking the info and
//! message protocols well enough to exercise the client end to end.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, Once,
    },
};

use base64::{engine::general_purpose, Engine as _};
use bytes::{Buf, BufMut, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use meridian::{policy::ClientPolicy, Client};

const PROTO_VERSION: u8 = 2;
const PROTO_INFO: u8 = 1;
const PROTO_MESSAGE: u8 = 3;

const READ_ATTR_GET_ALL: u8 = 1 << 1;
const READ_ATTR_BATCH: u8 = 1 << 3;
const READ_ATTR_GET_NO_BINS: u8 = 1 << 5;

const WRITE_ATTR_WRITE: u8 = 1;
const WRITE_ATTR_DELETE: u8 = 1 << 1;
const WRITE_ATTR_GENERATION: u8 = 1 << 2;
const WRITE_ATTR_CREATE_ONLY: u8 = 1 << 5;

const INFO_ATTR_LAST: u8 = 1;
const INFO_ATTR_PARTITION_DONE: u8 = 1 << 2;
const INFO_ATTR_UPDATE_ONLY: u8 = 1 << 3;
const INFO_ATTR_CREATE_OR_REPLACE: u8 = 1 << 4;
const INFO_ATTR_REPLACE_ONLY: u8 = 1 << 5;

const FIELD_NAMESPACE: u8 = 0;
const FIELD_TABLE: u8 = 1;
const FIELD_KEY: u8 = 2;
const FIELD_DIGEST: u8 = 4;
const FIELD_TXN_ID: u8 = 5;
const FIELD_TXN_VERSION: u8 = 6;
const FIELD_TASK_ID: u8 = 8;
const FIELD_PARTITION_ARRAY: u8 = 9;
const FIELD_MAX_RECORDS: u8 = 11;
const FIELD_BATCH_INDEX: u8 = 60;

const OP_READ: u8 = 1;
const OP_WRITE: u8 = 2;
const OP_INCR: u8 = 5;
const OP_APPEND: u8 = 9;
const OP_PREPEND: u8 = 10;
const OP_TOUCH: u8 = 11;

const BATCH_KIND_READ: u8 = 0;
const BATCH_KIND_WRITE: u8 = 1;
const BATCH_KIND_DELETE: u8 = 2;
const BATCH_KIND_TXN_VERIFY: u8 = 4;
const BATCH_KIND_TXN_ROLL: u8 = 5;

const RC_OK: u8 = 0;
const RC_KEY_NOT_FOUND: u8 = 2;
const RC_GENERATION_ERROR: u8 = 3;
const RC_KEY_EXISTS: u8 = 5;
const RC_VERSION_MISMATCH: u8 = 125;

pub const N_PARTITIONS: usize = 64;

#[derive(Clone, Debug)]
struct StoredRecord {
    set_name: String,
    user_key: Option<(u8, Vec<u8>)>,
    bins: Vec<(String, u8, Vec<u8>)>,
    generation: u32,
    version: u64,
}

struct State {
    store: Mutex<HashMap<(String, [u8; 20]), StoredRecord>>,
    // Result codes to answer the next single-key commands with.
    fail_next: Mutex<VecDeque<u8>>,
    // Per-digest forced result codes, also applied to batch entries.
    fail_digests: Mutex<HashMap<[u8; 20], u8>>,
    // Whether the node still claims its partitions; dropping ownership
    // bumps the partition generation so the client refetches the map.
    owns_partitions: AtomicBool,
    partition_generation: AtomicU32,
}

impl Default for State {
    fn default() -> Self {
        Self {
            store: Mutex::default(),
            fail_next: Mutex::default(),
            fail_digests: Mutex::default(),
            owns_partitions: AtomicBool::new(true),
            partition_generation: AtomicU32::new(1),
        }
    }
}

/// A fake single-node cluster on a loopback port.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    serve_connection(socket, state).await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// Connect a client against this server.
    pub async fn client(&self) -> Client {
        let policy = ClientPolicy {
            tend_interval: std::time::Duration::from_millis(100),
            ..ClientPolicy::default()
        };
        Client::new(&policy, self.address().as_str()).await.unwrap()
    }

    /// Answer the next `times` single-key commands with the given result
    /// code before processing resumes normally.
    pub fn fail_next(&self, code: u8, times: usize) {
        let mut fail = self.state.fail_next.lock().unwrap();
        for _ in 0..times {
            fail.push_back(code);
        }
    }

    /// Permanently answer operations on the given digest with a fixed
    /// result code.
    pub fn fail_digest(&self, digest: [u8; 20], code: u8) {
        self.state.fail_digests.lock().unwrap().insert(digest, code);
    }

    /// Stop claiming any partition: the next tend cycle sees a new
    /// partition generation and an empty replicas bitmap, leaving every
    /// slot of the client's table without an owner.
    pub fn disown_partitions(&self) {
        self.state.owns_partitions.store(false, Ordering::Relaxed);
        self.state
            .partition_generation
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Bump a record's version without going through a client, emulating a
    /// concurrent external writer.
    pub fn bump_version(&self, namespace: &str, digest: [u8; 20]) {
        let mut store = self.state.store.lock().unwrap();
        if let Some(record) = store.get_mut(&(namespace.to_owned(), digest)) {
            record.version += 1;
            record.generation += 1;
        }
    }

    /// Whether any record exists in the given set.
    pub fn set_is_empty(&self, namespace: &str, set_name: &str) -> bool {
        let store = self.state.store.lock().unwrap();
        !store
            .iter()
            .any(|((ns, _), record)| ns == namespace && record.set_name == set_name)
    }

    pub fn record_count(&self) -> usize {
        self.state.store.lock().unwrap().len()
    }
}

pub fn init_logger() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .init();
    });
}

async fn serve_connection(mut socket: TcpStream, state: Arc<State>) {
    loop {
        let mut prefix = [0_u8; 8];
        if socket.read_exact(&mut prefix).await.is_err() {
            return;
        }
        let raw = u64::from_be_bytes(prefix);
        let ty = (raw >> 48) as u8;
        let size = (raw & 0xffff_ffff_ffff) as usize;

        let mut payload = vec![0_u8; size];
        if socket.read_exact(&mut payload).await.is_err() {
            return;
        }

        let reply = match ty {
            PROTO_INFO => handle_info(&state, &payload),
            PROTO_MESSAGE => handle_message(&state, &payload),
            _ => return,
        };

        if socket.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn frame(ty: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(payload.len() + 8);
    out.put_u64(
        (u64::from(PROTO_VERSION) << 56) | (u64::from(ty) << 48) | payload.len() as u64,
    );
    out.put_slice(payload);
    out.to_vec()
}

fn handle_info(state: &State, payload: &[u8]) -> Vec<u8> {
    let commands = String::from_utf8_lossy(payload);
    let mut response = String::new();

    for command in commands.trim_end().split('\n') {
        let value = match command {
            "node" => "mock-node-1".to_owned(),
            "cluster-name" => "mock-cluster".to_owned(),
            "partitions" => N_PARTITIONS.to_string(),
            "partition-generation" => state
                .partition_generation
                .load(Ordering::Relaxed)
                .to_string(),
            "features" => "float;batch-index".to_owned(),
            "services" | "services-alternate" => String::new(),
            "rack-id" => "0".to_owned(),
            "replicas" => {
                let fill = if state.owns_partitions.load(Ordering::Relaxed) {
                    0xff_u8
                } else {
                    0x00_u8
                };
                let bitmap = general_purpose::STANDARD.encode(vec![fill; N_PARTITIONS / 8]);
                format!("test:1,{bitmap}")
            }
            cmd if cmd.starts_with("truncate:") => {
                truncate(state, cmd);
                "OK".to_owned()
            }
            cmd if cmd.starts_with("sindex-create:") || cmd.starts_with("sindex-delete:") => {
                "OK".to_owned()
            }
            _ => String::new(),
        };
        response.push_str(command);
        response.push('\t');
        response.push_str(&value);
        response.push('\n');
    }

    frame(PROTO_INFO, response.as_bytes())
}

fn truncate(state: &State, command: &str) {
    let mut namespace = "";
    let mut set_name = "";
    for part in command.trim_start_matches("truncate:").split(';') {
        if let Some(ns) = part.strip_prefix("namespace=") {
            namespace = ns;
        }
        if let Some(set) = part.strip_prefix("set=") {
            set_name = set;
        }
    }
    state.store.lock().unwrap().retain(|(ns, _), record| {
        ns != namespace || (!set_name.is_empty() && record.set_name != set_name)
    });
}

#[derive(Debug, Default)]
struct ParsedFields {
    namespace: String,
    set_name: String,
    digest: Option<[u8; 20]>,
    user_key: Option<(u8, Vec<u8>)>,
    txn_id: Option<u64>,
    txn_version: Option<u64>,
    task_id: Option<u64>,
    partitions: Vec<u16>,
    max_records: u64,
    batch_payload: Option<Vec<u8>>,
}

fn parse_fields(buf: &mut &[u8], count: usize) -> ParsedFields {
    let mut fields = ParsedFields::default();

    for _ in 0..count {
        let size = buf.get_u32() as usize - 1;
        let ty = buf.get_u8();
        let mut data = vec![0_u8; size];
        buf.copy_to_slice(&mut data);

        match ty {
            FIELD_NAMESPACE => fields.namespace = String::from_utf8_lossy(&data).into_owned(),
            FIELD_TABLE => fields.set_name = String::from_utf8_lossy(&data).into_owned(),
            FIELD_DIGEST => {
                let mut digest = [0_u8; 20];
                digest.copy_from_slice(&data);
                fields.digest = Some(digest);
            }
            FIELD_KEY => fields.user_key = Some((data[0], data[1..].to_vec())),
            FIELD_TXN_ID => fields.txn_id = Some(u64::from_be_bytes(data.try_into().unwrap())),
            FIELD_TXN_VERSION => {
                fields.txn_version = Some(u64::from_be_bytes(data.try_into().unwrap()));
            }
            FIELD_TASK_ID => fields.task_id = Some(u64::from_be_bytes(data.try_into().unwrap())),
            FIELD_PARTITION_ARRAY => {
                fields.partitions = data
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
            }
            FIELD_MAX_RECORDS => {
                fields.max_records = u64::from_be_bytes(data.try_into().unwrap());
            }
            FIELD_BATCH_INDEX => fields.batch_payload = Some(data),
            _ => (),
        }
    }

    fields
}

#[derive(Debug)]
struct ParsedOp {
    op: u8,
    particle: u8,
    name: String,
    value: Vec<u8>,
}

fn parse_ops(buf: &mut &[u8], count: usize) -> Vec<ParsedOp> {
    (0..count)
        .map(|_| {
            let size = buf.get_u32() as usize;
            let op = buf.get_u8();
            let particle = buf.get_u8();
            buf.advance(1);
            let name_len = buf.get_u8() as usize;
            let mut name = vec![0_u8; name_len];
            buf.copy_to_slice(&mut name);
            let mut value = vec![0_u8; size - 4 - name_len];
            buf.copy_to_slice(&mut value);
            ParsedOp {
                op,
                particle,
                name: String::from_utf8_lossy(&name).into_owned(),
                value,
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn put_entry_header(
    out: &mut BytesMut,
    result: u8,
    info_attr: u8,
    generation: u32,
    index: u32,
    field_count: u16,
    op_count: u16,
) {
    out.put_u8(22);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(info_attr);
    out.put_u8(0);
    out.put_u8(result);
    out.put_u32(generation);
    out.put_u32(0);
    out.put_u32(index);
    out.put_u16(field_count);
    out.put_u16(op_count);
}

fn put_field(out: &mut BytesMut, ty: u8, data: &[u8]) {
    out.put_u32(data.len() as u32 + 1);
    out.put_u8(ty);
    out.put_slice(data);
}

fn put_bin(out: &mut BytesMut, name: &str, particle: u8, value: &[u8]) {
    out.put_u32((4 + name.len() + value.len()) as u32);
    out.put_u8(OP_READ);
    out.put_u8(particle);
    out.put_u8(0);
    out.put_u8(name.len() as u8);
    out.put_slice(name.as_bytes());
    out.put_slice(value);
}

/// Key fields echoed with streamed and batched records.
fn put_key_fields(
    out: &mut BytesMut,
    namespace: &str,
    digest: &[u8; 20],
    record: &StoredRecord,
) -> u16 {
    put_field(out, FIELD_DIGEST, digest);
    put_field(out, FIELD_NAMESPACE, namespace.as_bytes());
    let mut count = 2;
    if !record.set_name.is_empty() {
        put_field(out, FIELD_TABLE, record.set_name.as_bytes());
        count += 1;
    }
    if let Some((particle, data)) = &record.user_key {
        let mut field = vec![*particle];
        field.extend_from_slice(data);
        put_field(out, FIELD_KEY, &field);
        count += 1;
    }
    count
}

fn single_reply(
    result: u8,
    generation: u32,
    version: Option<u64>,
    bins: &[(String, u8, Vec<u8>)],
) -> Vec<u8> {
    let mut body = BytesMut::new();
    let field_count = u16::from(version.is_some());
    put_entry_header(
        &mut body,
        result,
        0,
        generation,
        0,
        field_count,
        bins.len() as u16,
    );
    if let Some(version) = version {
        put_field(&mut body, FIELD_TXN_VERSION, &version.to_be_bytes());
    }
    for (name, particle, value) in bins {
        put_bin(&mut body, name, *particle, value);
    }
    frame(PROTO_MESSAGE, &body)
}

fn partition_of(digest: &[u8; 20]) -> u16 {
    (u32::from_le_bytes(digest[0..4].try_into().unwrap()) as usize & (N_PARTITIONS - 1)) as u16
}

fn handle_message(state: &State, payload: &[u8]) -> Vec<u8> {
    let mut buf = payload;
    buf.advance(1); // header length
    let read_attr = buf.get_u8();
    let write_attr = buf.get_u8();
    let _info_attr = buf.get_u8();
    let _txn_attr = buf.get_u8();
    let _result = buf.get_u8();
    let generation = buf.get_u32();
    let _expiration = buf.get_u32();
    let _timeout = buf.get_u32();
    let field_count = buf.get_u16() as usize;
    let op_count = buf.get_u16() as usize;

    let fields = parse_fields(&mut buf, field_count);
    let ops = parse_ops(&mut buf, op_count);

    if read_attr & READ_ATTR_BATCH != 0 {
        return handle_batch(state, &fields);
    }
    if fields.task_id.is_some() {
        return handle_scan(state, &fields, read_attr, &ops);
    }

    if let Some(code) = state.fail_next.lock().unwrap().pop_front() {
        return single_reply(code, 0, None, &[]);
    }
    let digest = fields.digest.expect("single-key command without digest");
    if let Some(&code) = state.fail_digests.lock().unwrap().get(&digest) {
        return single_reply(code, 0, None, &[]);
    }

    if write_attr & WRITE_ATTR_DELETE != 0 {
        let existed = state
            .store
            .lock()
            .unwrap()
            .remove(&(fields.namespace.clone(), digest))
            .is_some();
        let code = if existed { RC_OK } else { RC_KEY_NOT_FOUND };
        return single_reply(code, 0, None, &[]);
    }

    if write_attr & WRITE_ATTR_WRITE != 0 {
        return apply_write(state, &fields, &ops, write_attr, generation, payload);
    }

    // Plain read.
    let store = state.store.lock().unwrap();
    match store.get(&(fields.namespace.clone(), digest)) {
        None => single_reply(RC_KEY_NOT_FOUND, 0, None, &[]),
        Some(record) => {
            let version = fields.txn_id.map(|_| record.version);
            let bins = select_bins(record, read_attr, &ops);
            single_reply(RC_OK, record.generation, version, &bins)
        }
    }
}

fn select_bins(
    record: &StoredRecord,
    read_attr: u8,
    ops: &[ParsedOp],
) -> Vec<(String, u8, Vec<u8>)> {
    if read_attr & READ_ATTR_GET_NO_BINS != 0 {
        return vec![];
    }
    if read_attr & READ_ATTR_GET_ALL != 0 || ops.is_empty() {
        return record.bins.clone();
    }
    record
        .bins
        .iter()
        .filter(|(name, ..)| ops.iter().any(|op| &op.name == name))
        .cloned()
        .collect()
}

fn apply_write(
    state: &State,
    fields: &ParsedFields,
    ops: &[ParsedOp],
    write_attr: u8,
    expected_generation: u32,
    raw: &[u8],
) -> Vec<u8> {
    let info_attr = raw[3];
    let digest = fields.digest.unwrap();
    let mut store = state.store.lock().unwrap();
    let key = (fields.namespace.clone(), digest);
    let existing = store.get_mut(&key);

    if existing.is_some() && write_attr & WRITE_ATTR_CREATE_ONLY != 0 {
        return single_reply(RC_KEY_EXISTS, 0, None, &[]);
    }
    if existing.is_none()
        && info_attr & (INFO_ATTR_UPDATE_ONLY | INFO_ATTR_REPLACE_ONLY) != 0
    {
        return single_reply(RC_KEY_NOT_FOUND, 0, None, &[]);
    }

    match existing {
        Some(record) => {
            if write_attr & WRITE_ATTR_GENERATION != 0 && record.generation != expected_generation
            {
                return single_reply(RC_GENERATION_ERROR, record.generation, None, &[]);
            }
            if info_attr & (INFO_ATTR_CREATE_OR_REPLACE | INFO_ATTR_REPLACE_ONLY) != 0 {
                record.bins.clear();
            }
            apply_ops(record, ops);
            record.generation += 1;
            record.version += 1;
            let version = fields.txn_id.map(|_| record.version);
            let bins = read_op_results(record, ops);
            single_reply(RC_OK, record.generation, version, &bins)
        }
        None => {
            // Touching a record that does not exist fails instead of
            // creating it.
            if !ops.is_empty() && ops.iter().all(|op| op.op == OP_TOUCH) {
                return single_reply(RC_KEY_NOT_FOUND, 0, None, &[]);
            }

            let mut record = StoredRecord {
                set_name: fields.set_name.clone(),
                user_key: fields.user_key.clone(),
                bins: vec![],
                generation: 1,
                version: 1,
            };
            apply_ops(&mut record, ops);
            let version = fields.txn_id.map(|_| record.version);
            let bins = read_op_results(&record, ops);
            let reply = single_reply(RC_OK, record.generation, version, &bins);
            store.insert(key, record);
            reply
        }
    }
}

/// Results for the read operations of a mixed operate call.
fn read_op_results(record: &StoredRecord, ops: &[ParsedOp]) -> Vec<(String, u8, Vec<u8>)> {
    let mut bins = vec![];
    for op in ops.iter().filter(|op| op.op == OP_READ) {
        if op.name.is_empty() {
            bins.extend(record.bins.iter().cloned());
        } else {
            bins.extend(
                record
                    .bins
                    .iter()
                    .filter(|(name, ..)| name == &op.name)
                    .cloned(),
            );
        }
    }
    bins
}

fn apply_ops(record: &mut StoredRecord, ops: &[ParsedOp]) {
    for op in ops {
        match op.op {
            OP_WRITE => {
                record.bins.retain(|(name, ..)| name != &op.name);
                // A nil write removes the bin.
                if op.particle != 0 {
                    record
                        .bins
                        .push((op.name.clone(), op.particle, op.value.clone()));
                }
            }
            OP_INCR => {
                let delta = i64::from_be_bytes(op.value.clone().try_into().unwrap());
                match record.bins.iter_mut().find(|(name, ..)| name == &op.name) {
                    Some((_, _, value)) => {
                        let old = i64::from_be_bytes(value.clone().try_into().unwrap());
                        *value = (old + delta).to_be_bytes().to_vec();
                    }
                    None => record
                        .bins
                        .push((op.name.clone(), op.particle, op.value.clone())),
                }
            }
            OP_APPEND | OP_PREPEND => {
                match record.bins.iter_mut().find(|(name, ..)| name == &op.name) {
                    Some((_, _, value)) => {
                        if op.op == OP_APPEND {
                            value.extend_from_slice(&op.value);
                        } else {
                            let mut fresh = op.value.clone();
                            fresh.extend_from_slice(value);
                            *value = fresh;
                        }
                    }
                    None => record
                        .bins
                        .push((op.name.clone(), op.particle, op.value.clone())),
                }
            }
            OP_TOUCH | OP_READ => (),
            _ => (),
        }
    }
}

fn handle_scan(state: &State, fields: &ParsedFields, read_attr: u8, ops: &[ParsedOp]) -> Vec<u8> {
    let mut body = BytesMut::new();
    let store = state.store.lock().unwrap();

    let mut remaining = if fields.max_records == 0 {
        u64::MAX
    } else {
        fields.max_records
    };

    let mut records: Vec<(&(String, [u8; 20]), &StoredRecord)> = store
        .iter()
        .filter(|((ns, digest), record)| {
            ns == &fields.namespace
                && (fields.set_name.is_empty() || record.set_name == fields.set_name)
                && fields.partitions.contains(&partition_of(digest))
        })
        .collect();
    records.sort_by_key(|((_, digest), _)| *digest);

    for ((ns, digest), record) in records {
        if remaining == 0 {
            break;
        }
        remaining -= 1;

        let bins = select_bins(record, read_attr, ops);
        let mut entry = BytesMut::new();
        let field_count = put_key_fields(&mut entry, ns, digest, record);
        let mut header = BytesMut::new();
        put_entry_header(
            &mut header,
            RC_OK,
            0,
            record.generation,
            0,
            field_count,
            bins.len() as u16,
        );
        body.put_slice(&header);
        body.put_slice(&entry);
        for (name, particle, value) in &bins {
            put_bin(&mut body, name, *particle, value);
        }
    }

    // Acknowledge every requested partition as complete, then terminate
    // the stream.
    for &partition in &fields.partitions {
        put_entry_header(
            &mut body,
            RC_OK,
            INFO_ATTR_PARTITION_DONE,
            u32::from(partition),
            0,
            0,
            0,
        );
    }
    put_entry_header(&mut body, RC_OK, INFO_ATTR_LAST, 0, 0, 0, 0);

    frame(PROTO_MESSAGE, &body)
}

fn handle_batch(state: &State, fields: &ParsedFields) -> Vec<u8> {
    let payload = fields.batch_payload.clone().expect("missing batch field");
    let mut buf = &payload[..];
    let count = buf.get_u32() as usize;
    let _allow_inline = buf.get_u8();

    let mut body = BytesMut::new();

    for _ in 0..count {
        let index = buf.get_u32();
        let mut digest = [0_u8; 20];
        buf.copy_to_slice(&mut digest);
        let kind = buf.get_u8();
        let attr = buf.get_u8();
        let field_count = buf.get_u16() as usize;
        let op_count = buf.get_u16() as usize;
        let entry_fields = parse_fields(&mut buf, field_count);
        let entry_ops = parse_ops(&mut buf, op_count);

        if let Some(&code) = state.fail_digests.lock().unwrap().get(&digest) {
            put_entry_header(&mut body, code, 0, 0, index, 0, 0);
            continue;
        }

        let mut store = state.store.lock().unwrap();
        let key = (entry_fields.namespace.clone(), digest);

        match kind {
            BATCH_KIND_READ => match store.get(&key) {
                None => put_entry_header(&mut body, RC_KEY_NOT_FOUND, 0, 0, index, 0, 0),
                Some(record) => {
                    let bins = select_bins(record, attr, &entry_ops);
                    let mut key_fields = BytesMut::new();
                    let field_count =
                        put_key_fields(&mut key_fields, &entry_fields.namespace, &digest, record);
                    put_entry_header(
                        &mut body,
                        RC_OK,
                        0,
                        record.generation,
                        index,
                        field_count,
                        bins.len() as u16,
                    );
                    body.put_slice(&key_fields);
                    for (name, particle, value) in &bins {
                        put_bin(&mut body, name, *particle, value);
                    }
                }
            },
            BATCH_KIND_WRITE => {
                let record = store.entry(key).or_insert_with(|| StoredRecord {
                    set_name: entry_fields.set_name.clone(),
                    user_key: None,
                    bins: vec![],
                    generation: 0,
                    version: 0,
                });
                apply_ops(record, &entry_ops);
                record.generation += 1;
                record.version += 1;
                put_entry_header(&mut body, RC_OK, 0, record.generation, index, 0, 0);
            }
            BATCH_KIND_DELETE => {
                let code = if store.remove(&key).is_some() {
                    RC_OK
                } else {
                    RC_KEY_NOT_FOUND
                };
                put_entry_header(&mut body, code, 0, 0, index, 0, 0);
            }
            BATCH_KIND_TXN_VERIFY => {
                let expected = entry_fields.txn_version.unwrap_or_default();
                let code = match store.get(&key) {
                    Some(record) if record.version == expected => RC_OK,
                    _ => RC_VERSION_MISMATCH,
                };
                put_entry_header(&mut body, code, 0, 0, index, 0, 0);
            }
            BATCH_KIND_TXN_ROLL => {
                put_entry_header(&mut body, RC_OK, 0, 0, index, 0, 0);
            }
            _ => put_entry_header(&mut body, RC_KEY_NOT_FOUND, 0, 0, index, 0, 0),
        }
    }

    put_entry_header(&mut body, RC_OK, INFO_ATTR_LAST, 0, 0, 0, 0);
    frame(PROTO_MESSAGE, &body)
}
