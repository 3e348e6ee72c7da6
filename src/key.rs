use std::borrow::Cow;

use ripemd::{Digest as _, Ripemd160};
#[cfg(feature = "serialization")]
use serde::Serialize;

use crate::{
    commands::{buffer::Buffer, ParticleType},
    msgpack,
    value::ParticleError,
};

/// Unique record identifier. A record is addressed by its namespace, an
/// optional set name and a user-chosen key that must be unique within the
/// set. On the wire a record is identified by namespace and digest; the
/// digest is the 20-byte hash the server derives from set name and user key
/// and is also what the client hashes into a partition id.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize))]
pub struct Key {
    /// Namespace the record lives in.
    pub namespace: Cow<'static, str>,
    /// Set name, possibly empty.
    pub set_name: Cow<'static, str>,
    /// Original user key, when known. Records streamed back from the server
    /// only carry it if the writer requested `send_key`.
    pub user_key: Option<UserKey>,
    /// Server hash of set name and user key.
    pub(crate) digest: [u8; 20],
}

impl Key {
    /// Construct a new key from a namespace, a set name and a user key.
    ///
    /// Only integers, strings and blobs (`Vec<u8>`) are valid user keys.
    pub fn new<N, S, K>(namespace: N, set_name: S, key: K) -> Self
    where
        N: Into<Cow<'static, str>>,
        S: Into<Cow<'static, str>>,
        K: Into<UserKey>,
    {
        let set_name = set_name.into();
        let user_key = key.into();
        let digest = Self::compute_digest(&set_name, &user_key);

        Self {
            namespace: namespace.into(),
            set_name,
            digest,
            user_key: Some(user_key),
        }
    }

    /// The 20-byte server digest for this key.
    #[must_use]
    pub fn digest(&self) -> [u8; 20] {
        self.digest
    }

    fn compute_digest(set_name: &str, user_key: &UserKey) -> [u8; 20] {
        let mut hash = Ripemd160::new();
        hash.update(set_name.as_bytes());
        hash.update([user_key.particle_type() as u8]);
        user_key.write_key_bytes(&mut hash);

        hash.finalize().into()
    }
}

/// The subset of bin value types that may serve as a user key.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize))]
pub enum UserKey {
    /// 64-bit signed integer.
    Int(i64),
    /// String value.
    String(Cow<'static, str>),
    /// Byte array value.
    Blob(Cow<'static, [u8]>),
}

impl UserKey {
    pub(crate) fn particle_type(&self) -> ParticleType {
        match self {
            UserKey::Int(_) => ParticleType::Integer,
            UserKey::String(_) => ParticleType::String,
            UserKey::Blob(_) => ParticleType::Blob,
        }
    }

    fn write_key_bytes(&self, hasher: &mut impl ripemd::Digest) {
        match self {
            UserKey::Int(i) => hasher.update(i.to_be_bytes()),
            UserKey::String(s) => hasher.update(s.as_bytes()),
            UserKey::Blob(b) => hasher.update(b),
        }
    }

    pub(crate) fn estimate_size(&self) -> usize {
        match self {
            UserKey::Int(_) => 8,
            UserKey::String(s) => s.len(),
            UserKey::Blob(b) => b.len(),
        }
    }

    pub(crate) fn write_to(&self, w: &mut impl msgpack::Write) -> usize {
        match self {
            UserKey::Int(i) => w.write_i64(*i),
            UserKey::String(s) => w.write_str(s),
            UserKey::Blob(b) => w.write_bytes(b),
        }
    }

    pub(crate) fn read_from(
        ptype: u8,
        buf: &mut Buffer,
        len: usize,
    ) -> Result<Self, ParticleError> {
        Ok(match ParticleType::try_from(ptype)? {
            ParticleType::Integer => Self::Int(buf.read_i64()),
            ParticleType::String => Self::String(buf.read_str(len)?.into()),
            ParticleType::Blob => Self::Blob(buf.read_blob(len).into()),
            _ => return Err(ParticleError::Unsupported(ptype)),
        })
    }
}

macro_rules! userkey_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for UserKey {
            fn from(value: $ty) -> Self {
                Self::Int(value.into())
            }
        })*
    };
}

userkey_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<String> for UserKey {
    fn from(value: String) -> Self {
        Self::String(value.into())
    }
}

impl From<&'static str> for UserKey {
    fn from(value: &'static str) -> Self {
        Self::String(value.into())
    }
}

impl From<Cow<'static, str>> for UserKey {
    fn from(value: Cow<'static, str>) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for UserKey {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value.into())
    }
}

impl From<&'static [u8]> for UserKey {
    fn from(value: &'static [u8]) -> Self {
        Self::Blob(value.into())
    }
}

impl From<Cow<'static, [u8]>> for UserKey {
    fn from(value: Cow<'static, [u8]>) -> Self {
        Self::Blob(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Key;

    fn digest_hex(key: &Key) -> String {
        key.digest
            .iter()
            .map(|v| format!("{v:02x}"))
            .collect::<String>()
    }

    #[test]
    fn int_key_digests() {
        let key = Key::new("namespace", "set", 0);
        assert_eq!(digest_hex(&key), "93d943aae37b017ad7e011b0c1d2e2143c2fb37d");

        let key = Key::new("namespace", "set", -1);
        assert_eq!(digest_hex(&key), "22116d253745e29fc63fdf760b6e26f7e197e01d");

        // All integer widths collapse into the same digest.
        assert_eq!(
            Key::new("namespace", "set", 1i8).digest,
            Key::new("namespace", "set", 1u32).digest,
        );
    }

    #[test]
    fn string_key_digests() {
        let key = Key::new("namespace", "set", "");
        assert_eq!(digest_hex(&key), "2819b1ff6e346a43b4f5f6b77a88bc3eaac22a83");

        let key = Key::new("namespace", "set", "haha");
        assert_eq!(digest_hex(&key), "36eb02a807dbade8cd784e7800d76308b4e89212");
    }

    #[test]
    fn blob_key_digests() {
        let key = Key::new("namespace", "set", vec![0u8; 0]);
        assert_eq!(digest_hex(&key), "327e2877b8815c7aeede0d5a8620d4ef8df4a4b4");
    }

    #[test]
    fn digest_ignores_namespace() {
        assert_eq!(
            Key::new("a", "set", "k").digest,
            Key::new("b", "set", "k").digest,
        );
        assert_ne!(
            Key::new("a", "set1", "k").digest,
            Key::new("a", "set2", "k").digest,
        );
    }
}
