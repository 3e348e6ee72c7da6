use std::{collections::HashMap, str};

use bytes::{BufMut, BytesMut};
use tracing::debug;

use super::{
    buffer::{ProtoHeader, ProtoType},
    CommandError, Result,
};
use crate::net::Connection;

// Caps response allocations when a corrupted stream reports a bogus size.
const MAX_BUFFER_SIZE: usize = 1024 * 1024 + 8;

/// The textual info sub-protocol: newline-separated commands, answered with
/// `name\tvalue` lines. Used for topology discovery and DDL.
#[derive(Clone, Debug)]
pub struct Message {
    buf: Vec<u8>,
}

impl Message {
    pub async fn info(conn: &mut Connection, commands: &[&str]) -> Result<HashMap<String, String>> {
        let cmd = {
            let mut cmd = commands.join("\n");
            cmd.push('\n');
            cmd
        };
        let mut msg = Self::new(cmd.as_bytes());

        msg.send(conn).await?;
        msg.parse_response()
    }

    fn new(data: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(data.len() + 8);
        ProtoHeader::write_to(ProtoType::Info, data.len(), &mut buf);
        buf.put_slice(data);

        Self { buf: buf.to_vec() }
    }

    async fn send(&mut self, conn: &mut Connection) -> Result<()> {
        conn.write(&self.buf).await?;

        let mut header = [0; 8];
        conn.read(&mut header).await?;
        let proto = ProtoHeader::read_from(&mut &header[..])?;

        if proto.size > MAX_BUFFER_SIZE {
            return Err(CommandError::Parse("oversized info response"));
        }

        self.buf.resize(proto.size, 0);
        conn.read(self.buf.as_mut()).await?;
        conn.finish_exchange();

        Ok(())
    }

    fn parse_response(&self) -> Result<HashMap<String, String>> {
        let response = str::from_utf8(&self.buf)?;
        let response = response.trim_matches('\n');

        debug!(?response, "info command response");
        let mut result = HashMap::new();

        for line in response.split('\n') {
            let mut kv = line.split('\t');
            match (kv.next(), kv.next()) {
                (Some(key), Some(val)) => result.insert(key.to_owned(), val.to_owned()),
                (Some(key), None) => result.insert(key.to_owned(), String::new()),
                _ => return Err(CommandError::Parse("malformed info response line")),
            };
        }

        Ok(result)
    }
}
