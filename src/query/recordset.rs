use rand::Rng;
use tokio::sync::mpsc;

use crate::{commands::CommandError, Record};

/// Lazy stream of records produced by a scan or query.
///
/// Worker tasks stream records from the server nodes into a bounded queue;
/// the caller consumes them through [`Self::next`]. The bounded queue
/// provides natural backpressure against a slow consumer.
pub struct RecordSet {
    queue: mpsc::Receiver<Result<Record, CommandError>>,
    task_id: u64,
}

impl RecordSet {
    pub(crate) fn new(queue: mpsc::Receiver<Result<Record, CommandError>>) -> Self {
        Self {
            queue,
            task_id: rand::thread_rng().gen(),
        }
    }

    /// The id under which the producing tasks run on the server.
    pub(crate) fn task_id(&self) -> u64 {
        self.task_id
    }

    /// The next record, or [`None`] once every covered partition finished.
    /// Blocks while the queue is empty.
    pub async fn next(&mut self) -> Option<Result<Record, CommandError>> {
        self.queue.recv().await
    }

    /// Stop the stream: workers notice the closed queue and abandon their
    /// connections.
    pub fn close(&mut self) {
        self.queue.close();
    }
}
