//! Client-coordinated multi-record transactions.
//!
//! A transaction spans several records within one namespace. Single-key
//! commands executed under a transaction record the versions they read and
//! the keys they write; `commit` then verifies the recorded read versions
//! against the server and rolls the provisional writes forward, guarded by
//! a server-side monitor record.

mod roll;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::Rng;

pub(crate) use self::roll::{monitor_key, TxnRoll};
use crate::{commands::CommandError, Key, ResultCode};

/// Set name of the per-transaction monitor records.
pub(crate) const MONITOR_SET: &str = "~txn-monitor";

/// Result of [`commit`](crate::Client::commit).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommitStatus {
    /// All phases completed; the transaction is durable.
    Ok,
    /// The transaction had already been committed.
    AlreadyCommitted,
    /// A recorded read version no longer matched at verify time; the
    /// transaction was rolled back instead.
    VerifyFailed,
    /// Verification succeeded but some provisional writes could not be
    /// rolled forward by the client; the server monitor will finish the
    /// job.
    RollForwardAbandoned,
    /// The transaction committed, but the monitor record could not be
    /// removed; the server will expire it.
    CloseAbandoned,
}

/// Result of [`abort`](crate::Client::abort).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbortStatus {
    /// All provisional writes were rolled back.
    Ok,
    /// The transaction had already been aborted.
    AlreadyAborted,
    /// Some provisional writes could not be rolled back by the client; the
    /// server monitor will finish the job.
    RollBackAbandoned,
    /// The roll-back succeeded, but the monitor record could not be
    /// removed; the server will expire it.
    CloseAbandoned,
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("the transaction was already aborted")]
    AlreadyAborted,
    #[error("the transaction was already committed")]
    AlreadyCommitted,
    #[error("command failed")]
    Command(#[from] CommandError),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
enum State {
    Open = 0,
    Verifying = 1,
    Committing = 2,
    Aborting = 3,
    Committed = 4,
    Aborted = 5,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Verifying,
            2 => Self::Committing,
            3 => Self::Aborting,
            4 => Self::Committed,
            _ => Self::Aborted,
        }
    }
}

/// A multi-record transaction.
///
/// Attach it to the policies of the operations that should take part via
/// [`BasePolicy::txn`](crate::policy::BasePolicy::txn), then finish it with
/// [`commit`](crate::Client::commit) or [`abort`](crate::Client::abort).
#[derive(Debug)]
pub struct Txn {
    id: u64,
    reads: Mutex<HashMap<Key, u64>>,
    writes: Mutex<HashSet<Key>>,
    namespace: Mutex<Option<String>>,
    timeout: Duration,
    // Server-confirmed monitor deadline, epoch seconds; 0 while unset.
    deadline: AtomicU64,
    monitor_in_doubt: AtomicBool,
    roll_attempted: AtomicBool,
    state: AtomicU8,
}

impl Txn {
    /// Default server-side lifetime of the transaction monitor.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    /// Create a transaction whose monitor record expires after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            id: Self::random_id(),
            reads: Mutex::new(HashMap::new()),
            writes: Mutex::new(HashSet::new()),
            namespace: Mutex::new(None),
            timeout,
            deadline: AtomicU64::new(0),
            monitor_in_doubt: AtomicBool::new(false),
            roll_attempted: AtomicBool::new(false),
            state: AtomicU8::new(State::Open as u8),
        }
    }

    // Non-zero 63-bit random value.
    fn random_id() -> u64 {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen::<u64>() >> 1;
            if id != 0 {
                return id;
            }
        }
    }

    /// The transaction id sent with every participating command.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The namespace this transaction is pinned to, once the first
    /// operation ran.
    #[must_use]
    pub fn namespace(&self) -> Option<String> {
        self.namespace.lock().unwrap().clone()
    }

    /// The monitor deadline in epoch seconds: the server-confirmed value
    /// when available, the projected one otherwise.
    pub(crate) fn deadline_epoch_secs(&self) -> u64 {
        match self.deadline.load(Ordering::Relaxed) {
            0 => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                (now + self.timeout).as_secs()
            }
            deadline => deadline,
        }
    }

    /// Record the monitor deadline the server confirmed.
    pub(crate) fn set_monitor_deadline(&self, epoch_secs: u64) {
        self.deadline.store(epoch_secs, Ordering::Relaxed);
    }

    pub(crate) fn monitor_established(&self) -> bool {
        self.deadline.load(Ordering::Relaxed) != 0
    }

    pub(crate) fn monitor_in_doubt(&self) -> bool {
        self.monitor_in_doubt.load(Ordering::Relaxed)
    }

    /// Pin the transaction to a namespace; every key must agree.
    pub(crate) fn set_namespace(&self, namespace: &str) -> Result<(), ResultCode> {
        let mut slot = self.namespace.lock().unwrap();
        match &*slot {
            None => {
                *slot = Some(namespace.to_owned());
                Ok(())
            }
            Some(current) if current == namespace => Ok(()),
            Some(_) => Err(ResultCode::ParameterError),
        }
    }

    /// Record a version observed by a read. The first observation wins;
    /// keys that were already written are tracked by the write set instead.
    pub(crate) fn on_read(&self, key: Key, version: u64) -> Result<(), ResultCode> {
        self.set_namespace(&key.namespace.clone())?;
        if self.writes.lock().unwrap().contains(&key) {
            return Ok(());
        }
        self.reads.lock().unwrap().entry(key).or_insert(version);
        Ok(())
    }

    /// Record a successful write: the key moves from the read map into the
    /// write set, whether or not the server echoed a version.
    pub(crate) fn on_write(&self, key: Key, _version: Option<u64>) -> Result<(), ResultCode> {
        self.set_namespace(&key.namespace.clone())?;
        self.reads.lock().unwrap().remove(&key);
        self.writes.lock().unwrap().insert(key);
        Ok(())
    }

    /// Record a write whose outcome is unknown. Conservatively treat the
    /// key as written so the roll phase covers it.
    pub(crate) fn on_write_in_doubt(&self, key: Key) {
        self.monitor_in_doubt.store(true, Ordering::Relaxed);
        self.reads.lock().unwrap().remove(&key);
        self.writes.lock().unwrap().insert(key);
    }

    /// One-shot latch guarding commit/abort: true exactly once.
    pub(crate) fn set_roll_attempted(&self) -> bool {
        !self.roll_attempted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn reads_snapshot(&self) -> Vec<(Key, u64)> {
        self.reads
            .lock()
            .unwrap()
            .iter()
            .map(|(key, version)| (key.clone(), *version))
            .collect()
    }

    pub(crate) fn writes_snapshot(&self) -> Vec<Key> {
        self.writes.lock().unwrap().iter().cloned().collect()
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Default for Txn {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{State, Txn};
    use crate::{Key, ResultCode};

    #[test]
    fn ids_are_non_zero_63_bit() {
        for _ in 0..64 {
            let txn = Txn::new();
            assert_ne!(txn.id(), 0);
            assert_eq!(txn.id() >> 63, 0);
        }
    }

    #[test]
    fn roll_attempted_latches_once() {
        let txn = Txn::new();
        assert!(txn.set_roll_attempted());
        assert!(!txn.set_roll_attempted());
        assert!(!txn.set_roll_attempted());
    }

    #[test]
    fn namespace_is_pinned_by_first_key() {
        let txn = Txn::new();
        txn.on_read(Key::new("ns1", "s", 1), 7).unwrap();
        txn.on_read(Key::new("ns1", "s", 2), 8).unwrap();

        let err = txn.on_read(Key::new("ns2", "s", 3), 9).unwrap_err();
        assert_eq!(err, ResultCode::ParameterError);

        let err = txn.on_write(Key::new("ns2", "s", 3), None).unwrap_err();
        assert_eq!(err, ResultCode::ParameterError);
    }

    #[test]
    fn first_read_version_wins() {
        let txn = Txn::new();
        let key = Key::new("ns", "s", 1);
        txn.on_read(key.clone(), 7).unwrap();
        txn.on_read(key.clone(), 9).unwrap();

        assert_eq!(txn.reads_snapshot(), vec![(key, 7)]);
    }

    #[test]
    fn writes_supersede_reads() {
        let txn = Txn::new();
        let key = Key::new("ns", "s", 1);
        txn.on_read(key.clone(), 7).unwrap();
        txn.on_write(key.clone(), None).unwrap();

        assert!(txn.reads_snapshot().is_empty());
        assert_eq!(txn.writes_snapshot(), vec![key.clone()]);

        // A later read of the written key does not resurrect the version.
        txn.on_read(key.clone(), 12).unwrap();
        assert!(txn.reads_snapshot().is_empty());
    }

    #[test]
    fn in_doubt_writes_are_tracked_conservatively() {
        let txn = Txn::new();
        let key = Key::new("ns", "s", 1);
        txn.on_read(key.clone(), 7).unwrap();

        txn.on_write_in_doubt(key.clone());
        assert!(txn.monitor_in_doubt());
        assert!(txn.reads_snapshot().is_empty());
        assert_eq!(txn.writes_snapshot(), vec![key]);
    }

    #[test]
    fn starts_open() {
        let txn = Txn::new();
        assert_eq!(txn.state(), State::Open);
        assert!(!txn.monitor_established());
    }
}
