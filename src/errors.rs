//! Error and result types for the client.
//!
//! Every failure that involves the server carries the server's numeric
//! result code (see [`ResultCode`](crate::ResultCode)) unchanged, so that
//! applications can discriminate by code. The per-subsystem error enums are
//! re-exported here for matching.

#![allow(missing_docs)]

use crate::result_code::ResultCode;
pub use crate::{
    cluster::ClusterError,
    commands::{CommandError, ParseParticleError},
    msgpack::MsgpackError,
    net::{NetError, ParseHostError},
    txn::CommitError,
    value::ParticleError,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error decoding base64 value")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid UTF-8 content encountered")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("error parsing an integer")]
    ParseInt(#[from] std::num::ParseIntError),
    /// The client received a server response it could not process.
    #[error("bad server response: {0}")]
    BadResponse(String),
    /// One or more of the arguments passed to the client are invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The server answered with a non-success result code.
    #[error("server error: {}", .0.into_string())]
    ServerError(ResultCode),
    /// No cluster node is available to serve the request.
    #[error("no nodes available")]
    NoNodes,
    #[error("failed to truncate namespace or set")]
    Truncate(#[source] Box<Self>),
    #[error("failed to create index")]
    CreateIndex(#[source] Box<Self>),
    #[error("network error")]
    Net(#[from] crate::net::NetError),
    #[error("command error")]
    Command(#[from] crate::commands::CommandError),
    #[error("cluster error")]
    Cluster(#[from] crate::cluster::ClusterError),
    #[error("MessagePack error")]
    Msgpack(#[from] crate::msgpack::MsgpackError),
    #[error("failed parsing host value")]
    ParseHost(#[from] crate::net::ParseHostError),
    #[error("transaction commit error")]
    Commit(#[from] crate::txn::CommitError),
}

impl Error {
    /// The canonical numeric code for this error.
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            Self::ServerError(code) => *code,
            Self::Command(err) => err.result_code(),
            Self::Net(err) => err.result_code(),
            Self::NoNodes | Self::Cluster(_) => ResultCode::ServerNotAvailable,
            Self::InvalidArgument(_) | Self::ParseHost(_) => ResultCode::ParameterError,
            Self::Msgpack(_) => ResultCode::SerializeError,
            Self::BadResponse(_) | Self::InvalidUtf8(_) | Self::ParseInt(_) => {
                ResultCode::ParseError
            }
            _ => ResultCode::ClientError,
        }
    }
}
