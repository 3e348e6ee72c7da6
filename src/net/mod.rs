pub use self::{
    connection::Connection,
    connection_pool::{ConnectionPool, PooledConnection},
    host::{Host, ToHosts},
};
pub(crate) use self::{connection_pool::Credentials, host::DEFAULT_PORT};

mod connection;
mod connection_pool;
pub mod host;
mod parser;

use crate::ResultCode;

type Result<T, E = NetError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("no more connections available in the pool")]
    NoMoreConnections,
    #[error("could not open network connection")]
    FailedOpening,
    #[error("connection attempt timed out")]
    ConnectTimeout,
    #[error("I/O related error")]
    Io(#[from] std::io::Error),
    #[error("buffer error")]
    Buffer(#[from] crate::commands::buffer::BufferError),
    #[error("authentication error")]
    Authenticate(#[source] Box<crate::commands::CommandError>),
}

impl NetError {
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::NoMoreConnections => ResultCode::NoMoreConnections,
            Self::FailedOpening | Self::ConnectTimeout => ResultCode::ServerNotAvailable,
            Self::Buffer(_) => ResultCode::SerializeError,
            Self::Io(_) => ResultCode::ClientError,
            Self::Authenticate(_) => ResultCode::NotAuthenticated,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseHostError {
    #[error("invalid address string")]
    InvalidArgument,
    #[error("invalid port number")]
    PortNumber(#[source] std::num::ParseIntError),
}
