use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{timeout, Duration, Instant},
};

use super::{connection_pool::Credentials, NetError, Result};
use crate::{
    commands::{admin_command::AdminCommand, buffer::Buffer},
    policy::ClientPolicy,
};

fn timed_out() -> NetError {
    NetError::Io(std::io::ErrorKind::TimedOut.into())
}

/// A single duplex byte stream to one cluster node.
///
/// A connection is exclusively owned: either it sits idle in its node's
/// pool, or it belongs to the command that acquired it. It is never shared.
#[derive(Debug)]
pub struct Connection {
    conn: TcpStream,

    // Bound applied to every read and write; set per command attempt from
    // the remaining deadline.
    timeout: Option<Duration>,

    idle_timeout: Option<Duration>,
    idle_deadline: Option<Instant>,

    // Set once a request has been flushed, cleared when its reply has been
    // fully consumed. A connection with an outstanding reply never goes
    // back into the pool.
    in_doubt: bool,

    authenticated_user: Option<String>,

    bytes_read: usize,

    buffer: Buffer,
}

impl Connection {
    pub(crate) async fn open(
        addr: &str,
        policy: &ClientPolicy,
        credentials: Option<&Credentials>,
    ) -> Result<Self> {
        let stream = match timeout(policy.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(_)) => return Err(NetError::FailedOpening),
            Err(_) => return Err(NetError::ConnectTimeout),
        };

        let mut conn = Self {
            conn: stream,
            timeout: None,
            idle_timeout: policy.max_socket_idle,
            idle_deadline: policy
                .max_socket_idle
                .map(|timeout| Instant::now() + timeout),
            in_doubt: false,
            authenticated_user: None,
            bytes_read: 0,
            buffer: Buffer::new(policy.buffer_reclaim_threshold),
        };
        conn.authenticate(policy, credentials).await?;
        conn.refresh();

        Ok(conn)
    }

    async fn authenticate(
        &mut self,
        policy: &ClientPolicy,
        credentials: Option<&Credentials>,
    ) -> Result<()> {
        let Some(credentials) = credentials else {
            return Ok(());
        };

        match timeout(
            policy.login_timeout,
            AdminCommand::login(self, credentials, policy.auth_mode),
        )
        .await
        {
            Ok(Ok(())) => {
                self.authenticated_user = Some(credentials.user.clone());
                Ok(())
            }
            Ok(Err(err)) => {
                self.close().await;
                Err(NetError::Authenticate(Box::new(err)))
            }
            Err(_) => {
                self.close().await;
                Err(NetError::ConnectTimeout)
            }
        }
    }

    pub async fn close(&mut self) {
        self.conn.shutdown().await.ok();
    }

    /// Set the I/O bound for subsequent reads and writes. [`None`] waits
    /// indefinitely.
    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Send the prepared request buffer. Once bytes may have left the
    /// socket, the outcome of the command is unknown until its reply has
    /// been consumed.
    pub async fn flush(&mut self) -> Result<()> {
        self.in_doubt = true;
        let request = self.buffer.split();
        match self.timeout {
            Some(limit) => match timeout(limit, self.conn.write_all(&request)).await {
                Ok(res) => res?,
                Err(_) => return Err(timed_out()),
            },
            None => self.conn.write_all(&request).await?,
        }
        self.refresh();
        Ok(())
    }

    /// Read exactly `size` bytes into the connection buffer.
    pub async fn read_buffer(&mut self, size: usize) -> Result<()> {
        self.buffer.resize(size)?;
        match self.timeout {
            Some(limit) => {
                match timeout(limit, self.conn.read_exact(self.buffer.as_mut())).await {
                    Ok(res) => {
                        res?;
                    }
                    Err(_) => return Err(timed_out()),
                }
            }
            None => {
                self.conn.read_exact(self.buffer.as_mut()).await?;
            }
        };
        self.bytes_read += size;
        self.refresh();
        Ok(())
    }

    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        match self.timeout {
            Some(limit) => match timeout(limit, self.conn.write_all(buf)).await {
                Ok(res) => res?,
                Err(_) => return Err(timed_out()),
            },
            None => self.conn.write_all(buf).await?,
        }
        self.refresh();
        Ok(())
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.timeout {
            Some(limit) => match timeout(limit, self.conn.read_exact(buf)).await {
                Ok(res) => {
                    res?;
                }
                Err(_) => return Err(timed_out()),
            },
            None => {
                self.conn.read_exact(buf).await?;
            }
        }
        self.bytes_read += buf.len();
        self.refresh();
        Ok(())
    }

    pub(crate) fn buffer(&mut self) -> &mut Buffer {
        &mut self.buffer
    }

    /// Whether the connection sat idle past its idle deadline and must not
    /// be reused.
    pub fn is_idle(&self) -> bool {
        self.idle_deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// The user this connection authenticated as, if any.
    pub fn authenticated_user(&self) -> Option<&str> {
        self.authenticated_user.as_deref()
    }

    pub(crate) const fn in_doubt(&self) -> bool {
        self.in_doubt
    }

    /// Mark the current request/reply exchange as complete.
    pub(crate) fn finish_exchange(&mut self) {
        self.in_doubt = false;
    }

    fn refresh(&mut self) {
        self.idle_deadline = self.idle_timeout.map(|timeout| Instant::now() + timeout);
    }

    /// Reset the per-frame read counter, used by stream parsers to track
    /// progress within one reply frame.
    pub(crate) fn bookmark(&mut self) {
        self.bytes_read = 0;
    }

    pub(crate) const fn bytes_read(&self) -> usize {
        self.bytes_read
    }
}
