pub(crate) mod admin_command;
pub(crate) mod batch_command;
pub(crate) mod buffer;
mod delete_command;
mod executor;
mod exists_command;
mod field_type;
mod info_command;
mod operate_command;
mod particle_type;
mod query_command;
mod read_command;
mod scan_command;
mod single_command;
mod stream_command;
mod touch_command;
mod udf_command;
mod write_command;

pub use self::particle_type::ParseParticleError;
pub(crate) use self::{
    batch_command::BatchCommand,
    delete_command::DeleteCommand,
    executor::{execute, Command},
    exists_command::ExistsCommand,
    field_type::FieldType,
    info_command::Message,
    operate_command::OperateCommand,
    particle_type::ParticleType,
    query_command::QueryCommand,
    read_command::ReadCommand,
    scan_command::ScanCommand,
    single_command::SingleCommand,
    stream_command::StreamCommand,
    touch_command::TouchCommand,
    udf_command::UdfCommand,
    write_command::WriteCommand,
};
use crate::ResultCode;

pub type Result<T, E = CommandError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to prepare send buffer")]
    PrepareBuffer(#[source] Box<Self>),
    #[error("command timed out after {attempts} attempt(s)")]
    Timeout {
        attempts: usize,
        last: Option<Box<Self>>,
    },
    #[error("retry budget exhausted after {attempts} attempt(s)")]
    MaxRetriesExceeded {
        attempts: usize,
        #[source]
        last: Box<Self>,
    },
    #[error("server error: {code}")]
    Server { code: ResultCode, in_doubt: bool },
    #[error("operation outcome is unknown")]
    InDoubt(#[source] Box<Self>),
    #[error("invalid UTF-8 content encountered")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("I/O related error")]
    Io(#[from] std::io::Error),
    #[error("failed hashing password")]
    Hashing(#[from] bcrypt::BcryptError),
    #[error("network error")]
    Network(#[from] crate::net::NetError),
    #[error("buffer error")]
    Buffer(#[from] self::buffer::BufferError),
    #[error("particle error")]
    Particle(#[from] crate::value::ParticleError),
    #[error("MessagePack error")]
    Msgpack(#[from] crate::msgpack::MsgpackError),
    #[error("no connections available")]
    NoConnection,
    #[error("parsing failed: {0}")]
    Parse(&'static str),
}

impl CommandError {
    pub(crate) const fn server(code: ResultCode) -> Self {
        Self::Server {
            code,
            in_doubt: false,
        }
    }

    /// The canonical numeric code for this error.
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::Server { code, .. } => *code,
            Self::InDoubt(inner) => inner.result_code(),
            Self::Timeout { .. } => ResultCode::Timeout,
            Self::MaxRetriesExceeded { .. } => ResultCode::MaxRetriesExceeded,
            Self::NoConnection => ResultCode::NoMoreConnections,
            Self::Network(err) => err.result_code(),
            Self::PrepareBuffer(_) | Self::Buffer(_) | Self::Msgpack(_) => {
                ResultCode::SerializeError
            }
            Self::InvalidUtf8(_) | Self::Parse(_) | Self::Particle(_) => ResultCode::ParseError,
            Self::Io(_) => ResultCode::ClientError,
            Self::Hashing(_) => ResultCode::InvalidCredential,
        }
    }

    /// Whether a write that produced this error may have been applied on
    /// the server regardless.
    #[must_use]
    pub fn in_doubt(&self) -> bool {
        match self {
            Self::Server { in_doubt, .. } => *in_doubt,
            Self::InDoubt(_) => true,
            Self::MaxRetriesExceeded { last, .. } => last.in_doubt(),
            Self::Timeout { last, .. } => last.as_ref().is_some_and(|last| last.in_doubt()),
            _ => false,
        }
    }

    pub(crate) fn retryable(&self) -> bool {
        match self {
            Self::Server { code, .. } => code.retryable(),
            Self::InDoubt(inner) => inner.retryable(),
            Self::Io(_) | Self::Network(_) | Self::NoConnection => true,
            _ => false,
        }
    }
}

/// Whether the connection that produced this error may go back into the
/// pool. Client-local failures and stream aborts leave the socket in an
/// unknown state; every regular server response leaves it reusable.
#[must_use]
pub(crate) fn keep_connection(err: &CommandError) -> bool {
    match err {
        CommandError::Server { code, .. } => code.keep_connection(),
        _ => false,
    }
}

/// Hash a password the way the server stores it. The salt is a protocol
/// constant shared by all client implementations.
pub(crate) fn hash_password(password: &str) -> Result<String> {
    const COST: u32 = 10;
    const SALT: [u8; 16] = [
        0x9a, 0x2e, 0x71, 0x0c, 0x5d, 0xe3, 0x44, 0xb8, 0x10, 0xf6, 0x2b, 0x93, 0xc7, 0x58, 0x0e,
        0x61,
    ];

    Ok(bcrypt::hash_with_salt(password, COST, SALT)?
        .format_for_version(bcrypt::Version::TwoA))
}

#[cfg(test)]
mod tests {
    use super::{keep_connection, CommandError};
    use crate::ResultCode;

    #[test]
    fn keep_connection_follows_code_law() {
        assert!(keep_connection(&CommandError::server(
            ResultCode::KeyNotFound
        )));
        assert!(keep_connection(&CommandError::server(ResultCode::Timeout)));
        assert!(!keep_connection(&CommandError::server(
            ResultCode::ScanAbort
        )));
        assert!(!keep_connection(&CommandError::server(
            ResultCode::QueryAborted
        )));
        assert!(!keep_connection(&CommandError::NoConnection));
        assert!(!keep_connection(&CommandError::Parse("x")));
    }

    #[test]
    fn result_codes_survive_wrapping() {
        let err = CommandError::MaxRetriesExceeded {
            attempts: 3,
            last: Box::new(CommandError::server(ResultCode::DeviceOverload)),
        };
        assert_eq!(err.result_code(), ResultCode::MaxRetriesExceeded);
        match err {
            CommandError::MaxRetriesExceeded { last, .. } => {
                assert_eq!(last.result_code(), ResultCode::DeviceOverload);
            }
            _ => unreachable!(),
        }
    }
}
