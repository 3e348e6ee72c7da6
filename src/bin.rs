use std::borrow::Cow;

use crate::value::Value;

/// Maximum length of a bin name, enforced by the server.
pub const MAX_BIN_NAME_LEN: usize = 15;

/// A named value slot inside a record.
#[derive(Clone, Debug)]
pub struct Bin {
    /// Bin name, at most [`MAX_BIN_NAME_LEN`] bytes.
    pub name: Cow<'static, str>,

    /// Bin value.
    pub value: Value,
}

impl Bin {
    /// Construct a new bin from a name and a value.
    pub fn new(name: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Bin {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl AsRef<Bin> for Bin {
    fn as_ref(&self) -> &Self {
        self
    }
}

/// Selects which bins a read operation returns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Bins {
    /// Return all bins.
    All,
    /// Return the record header (generation, expiration) only.
    None,
    /// Return the named bins only.
    Some(Vec<String>),
}

impl From<&[&str]> for Bins {
    fn from(bins: &[&str]) -> Self {
        Self::Some(bins.iter().copied().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Bins {
    fn from(bins: [&str; N]) -> Self {
        Self::Some(bins.iter().copied().map(String::from).collect())
    }
}
