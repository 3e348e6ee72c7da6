use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Connection, Host, NetError, Result};
use crate::policy::ClientPolicy;

/// Credentials shared by all pools of a cluster. Swapped atomically by
/// `change_password`, so only connections opened after the swap use the new
/// secret.
#[derive(Clone, Debug)]
pub(crate) struct Credentials {
    pub user: String,
    pub password_hash: String,
    pub clear_password: Option<String>,
}

pub(crate) type SharedCredentials = Arc<ArcSwapOption<Credentials>>;

#[derive(Debug)]
struct IdleConnection(Connection);

#[derive(Debug)]
struct PoolInternals {
    idle: VecDeque<IdleConnection>,
    // Total connections alive for this node: idle plus handed out.
    total: usize,
}

#[derive(Debug)]
struct SharedPool {
    internals: Mutex<PoolInternals>,
    capacity: usize,
    host: Host,
    policy: ClientPolicy,
    credentials: SharedCredentials,
}

/// Bounded set of reusable connections to a single node.
#[derive(Clone, Debug)]
pub struct ConnectionPool(Arc<SharedPool>);

impl ConnectionPool {
    pub(crate) fn new(host: Host, policy: ClientPolicy, credentials: SharedCredentials) -> Self {
        Self(Arc::new(SharedPool {
            internals: Mutex::new(PoolInternals {
                idle: VecDeque::new(),
                total: 0,
            }),
            capacity: policy.max_conns_per_node,
            host,
            policy,
            credentials,
        }))
    }

    /// Acquire a connection: a fresh idle one when available, a newly opened
    /// one while below capacity, [`NetError::NoMoreConnections`] otherwise.
    pub async fn get(&self) -> Result<PooledConnection> {
        loop {
            let mut internals = self.0.internals.lock().await;

            if let Some(IdleConnection(mut conn)) = internals.idle.pop_front() {
                if conn.is_idle() {
                    internals.total -= 1;
                    drop(internals);
                    conn.close().await;
                    continue;
                }
                return Ok(PooledConnection {
                    pool: self.clone(),
                    conn: Some(conn),
                });
            }

            if internals.total >= self.0.capacity {
                return Err(NetError::NoMoreConnections);
            }

            // Reserve the slot before opening, so concurrent acquires
            // cannot overshoot the capacity, and release the lock for the
            // duration of the handshake.
            internals.total += 1;
            drop(internals);

            return match self.open_connection().await {
                Ok(conn) => Ok(PooledConnection {
                    pool: self.clone(),
                    conn: Some(conn),
                }),
                Err(err) => {
                    self.0.internals.lock().await.total -= 1;
                    Err(err)
                }
            };
        }
    }

    async fn open_connection(&self) -> Result<Connection> {
        let credentials = self.0.credentials.load_full();
        Connection::open(
            &self.0.host.address(),
            &self.0.policy,
            credentials.as_deref(),
        )
        .await
    }

    async fn put_back(&self, mut conn: Connection) {
        // A connection with an unparsed reply on the wire must not be
        // reused.
        if conn.in_doubt() {
            self.drop_conn(conn).await;
            return;
        }

        let mut internals = self.0.internals.lock().await;
        if internals.total <= self.0.capacity {
            internals.idle.push_back(IdleConnection(conn));
        } else {
            internals.total -= 1;
            drop(internals);
            conn.close().await;
        }
    }

    async fn drop_conn(&self, mut conn: Connection) {
        self.0.internals.lock().await.total -= 1;
        conn.close().await;
    }

    /// Close idle connections that passed their idle deadline. Driven by
    /// the cluster tend cycle.
    pub(crate) async fn evict_idle(&self) {
        let mut expired = Vec::new();
        {
            let mut internals = self.0.internals.lock().await;
            while let Some(conn) = internals.idle.front() {
                if !conn.0.is_idle() {
                    break;
                }
                let conn = internals.idle.pop_front().unwrap();
                internals.total -= 1;
                expired.push(conn);
            }
        }
        for IdleConnection(mut conn) in expired {
            conn.close().await;
        }
    }

    /// Open connections until the pool holds at least `min` idle ones.
    /// Failures are left to the next tend cycle.
    pub(crate) async fn ensure_min(&self, min: usize) {
        loop {
            {
                let mut internals = self.0.internals.lock().await;
                if internals.idle.len() >= min || internals.total >= self.0.capacity {
                    return;
                }
                internals.total += 1;
            }
            match self.open_connection().await {
                Ok(conn) => {
                    let mut internals = self.0.internals.lock().await;
                    internals.idle.push_back(IdleConnection(conn));
                }
                Err(err) => {
                    self.0.internals.lock().await.total -= 1;
                    debug!(host = %self.0.host, %err, "failed to pre-open connection");
                    return;
                }
            }
        }
    }

    pub(crate) async fn close(&self) {
        let mut internals = self.0.internals.lock().await;
        let idle = std::mem::take(&mut internals.idle);
        internals.total -= idle.len();
        drop(internals);
        for IdleConnection(mut conn) in idle {
            conn.close().await;
        }
    }
}

/// Guard around a pooled [`Connection`].
///
/// Dropping the guard returns the connection to its pool;
/// [`Self::invalidate`] closes it instead.
#[derive(Debug)]
pub struct PooledConnection {
    pool: ConnectionPool,
    conn: Option<Connection>,
}

impl PooledConnection {
    /// Close the connection instead of returning it to the pool.
    pub async fn invalidate(mut self) {
        let conn = self.conn.take().unwrap();
        self.pool.drop_conn(conn).await;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move { pool.put_back(conn).await });
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().unwrap()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap()
    }
}
