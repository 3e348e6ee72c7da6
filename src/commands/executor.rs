use std::sync::Arc;

use tokio::time::{timeout, Instant};
use tracing::warn;

use super::{keep_connection, CommandError, Result};
use crate::{cluster::Node, net::Connection, policy::BasePolicy, ResultCode};

/// One concrete command shape: how to pick a node, how to encode the
/// request and how to interpret the reply. The retry/deadline loop in
/// [`execute`] is shared by every implementation.
#[async_trait::async_trait]
pub(crate) trait Command: Send {
    /// Pick the node for the current attempt. `sequence` counts the
    /// attempts made so far and advances replica selection on retries.
    /// A miss carries the retryable code describing it: partition
    /// unavailable when the addressed slot is empty or inactive, server
    /// not available when the cluster has no nodes at all.
    async fn node(&mut self, sequence: usize) -> Result<Arc<Node>>;

    /// Encode the request into the connection's buffer.
    fn prepare_buffer(&mut self, conn: &mut Connection, node: &Node) -> Result<()>;

    /// Read the reply and record its outcome on `self`.
    async fn parse_result(&mut self, conn: &mut Connection) -> Result<()>;

    /// Whether this command mutates server state.
    fn is_write(&self) -> bool {
        false
    }

    /// Called when a write failed with the request already on the wire, so
    /// the operation may have been applied regardless.
    fn on_in_doubt(&mut self) {}
}

/// The shared retry loop. Classifies every outcome, decides whether the
/// connection goes back to the pool, and walks replicas/nodes until the
/// command succeeds, the retry budget is exhausted, or the total deadline
/// passes.
pub(crate) async fn execute(policy: &BasePolicy, cmd: &mut (impl Command + ?Sized)) -> Result<()> {
    let deadline = policy.deadline();
    let mut last_error: Option<CommandError> = None;
    let mut attempts = 0_usize;

    loop {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(CommandError::Timeout {
                attempts,
                last: last_error.map(Box::new),
            });
        }

        match attempt(policy, cmd, deadline, attempts).await {
            Ok(()) => return Ok(()),
            Err(err) if !err.retryable() => return Err(err),
            Err(err) => last_error = Some(err),
        }

        attempts += 1;
        if attempts > policy.max_retries {
            let last = Box::new(last_error.expect("a retryable error preceded every retry"));
            return Err(CommandError::MaxRetriesExceeded { attempts, last });
        }

        if policy.sleep_between_retries.is_zero() {
            // Give the runtime room to make progress elsewhere before
            // hammering the next replica.
            tokio::task::yield_now().await;
        } else {
            let mut sleep = policy.sleep_between_retries;
            if let Some(deadline) = deadline {
                sleep = sleep.min(deadline.saturating_duration_since(Instant::now()));
            }
            tokio::time::sleep(sleep).await;
        }
    }
}

async fn attempt(
    policy: &BasePolicy,
    cmd: &mut (impl Command + ?Sized),
    deadline: Option<Instant>,
    sequence: usize,
) -> Result<()> {
    // A selection miss is retryable; the outer loop counts the attempt,
    // sleeps and asks again against a fresh snapshot.
    let node = cmd.node(sequence).await?;

    if node.error_rate_exceeded() {
        return Err(CommandError::server(ResultCode::MaxErrorRateExceeded));
    }

    let bound = policy.socket_deadline(deadline);
    let mut conn = match bound {
        Some(bound) => match timeout(bound, node.get_connection()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                node.record_error();
                return Err(err.into());
            }
            Err(_) => {
                node.record_error();
                return Err(CommandError::server(ResultCode::Timeout));
            }
        },
        None => match node.get_connection().await {
            Ok(conn) => conn,
            Err(err) => {
                node.record_error();
                return Err(err.into());
            }
        },
    };
    conn.set_timeout(bound);

    // Encoding failures happen before anything is on the wire; the
    // connection stays clean and the failure is not retryable.
    if let Err(err) = cmd.prepare_buffer(&mut conn, &node) {
        return Err(CommandError::PrepareBuffer(Box::new(err)));
    }

    if let Err(err) = conn.flush().await {
        // The request may have partially left the socket.
        warn!(?node, %err, "failed to send command");
        node.record_error();
        conn.invalidate().await;
        return Err(mark_in_doubt(cmd, err.into()));
    }

    match cmd.parse_result(&mut conn).await {
        Ok(()) => Ok(()),
        Err(err) => {
            if err.retryable() {
                node.record_error();
            }
            // A half-consumed reply poisons the connection no matter what
            // the result code says.
            if !keep_connection(&err) || conn.in_doubt() {
                conn.invalidate().await;
            }
            match &err {
                CommandError::Server { .. } => Err(err),
                _ => Err(mark_in_doubt(cmd, err)),
            }
        }
    }
}

/// Flag errors of write commands whose request already hit the wire: the
/// server may have applied the operation even though the client never saw
/// the reply.
fn mark_in_doubt(cmd: &mut (impl Command + ?Sized), err: CommandError) -> CommandError {
    if !cmd.is_write() {
        return err;
    }
    cmd.on_in_doubt();
    match err {
        CommandError::Server { code, .. } => CommandError::Server {
            code,
            in_doubt: true,
        },
        other => CommandError::InDoubt(Box::new(other)),
    }
}
