use std::{
    collections::HashMap,
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use once_cell::sync::Lazy;
#[cfg(feature = "serialization")]
use serde::Serialize;

use crate::{Key, Value};

// Server expiration times count from Jan 01 2015, 00:00:00 UTC.
pub(crate) static EXPIRATION_EPOCH: Lazy<SystemTime> =
    Lazy::new(|| UNIX_EPOCH + Duration::from_secs(1_420_070_400));

/// A single database record as returned by read operations.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serialization", derive(Serialize))]
pub struct Record {
    /// Record key. Only set on records streamed back by scans and queries;
    /// point reads leave it empty since the caller already has the key.
    pub key: Option<Key>,

    /// Map of named record bins.
    pub bins: HashMap<String, Value>,

    /// Record modification count, used for optimistic concurrency.
    pub generation: u32,

    /// Expiration time in seconds since the server epoch, 0 if the record
    /// never expires.
    expiration: u32,
}

impl Record {
    pub(crate) const fn new(
        key: Option<Key>,
        bins: HashMap<String, Value>,
        generation: u32,
        expiration: u32,
    ) -> Self {
        Self {
            key,
            bins,
            generation,
            expiration,
        }
    }

    /// Remaining time until the server removes this record, or `None` if the
    /// record never expires.
    #[must_use]
    pub fn time_to_live(&self) -> Option<Duration> {
        match self.expiration {
            0 => None,
            secs_since_epoch => {
                let expires_at = *EXPIRATION_EPOCH + Duration::from_secs(secs_since_epoch.into());
                // Records already at or past their expiration time are
                // reported with the smallest non-zero TTL, since `None`
                // means "never expires".
                Some(
                    expires_at
                        .duration_since(SystemTime::now())
                        .unwrap_or(Duration::from_secs(1)),
                )
            }
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key: {:?}, bins: {{", self.key)?;
        for (i, (name, value)) in self.bins.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}, generation: {}, ttl: ", self.generation)?;
        match self.time_to_live() {
            None => f.write_str("none"),
            Some(duration) => duration.as_secs().fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        time::{Duration, SystemTime},
    };

    use super::{Record, EXPIRATION_EPOCH};

    #[test]
    fn ttl_in_the_future() {
        let expires_at = SystemTime::now() + Duration::from_secs(1000);
        let secs_since_epoch = expires_at
            .duration_since(*EXPIRATION_EPOCH)
            .unwrap()
            .as_secs();
        let record = Record::new(None, HashMap::new(), 0, secs_since_epoch as u32);

        let ttl = record.time_to_live().unwrap();
        assert!(1000 - ttl.as_secs() <= 1);
    }

    #[test]
    fn ttl_in_the_past() {
        let record = Record::new(None, HashMap::new(), 0, 1);
        assert_eq!(record.time_to_live(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn ttl_never_expires() {
        let record = Record::new(None, HashMap::new(), 0, 0);
        assert_eq!(record.time_to_live(), None);
    }
}
