use std::fmt;

/// Operation status codes, as defined by the server wire protocol plus the
/// client-local codes this library generates itself.
///
/// Server codes are positive and travel on the wire unchanged; client-local
/// codes are zero or negative and never leave the client. Applications can
/// discriminate failures by [`Self::code`], which is stable across releases.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResultCode {
    /// Generic client-side failure.
    ClientError,
    /// The client could not parse a server response.
    ParseError,
    /// The chosen cluster node is invalid or no longer part of the cluster.
    InvalidNode,
    /// A scan was terminated by the client before it completed.
    ScanTerminated,
    /// A query was terminated by the client before it completed.
    QueryTerminated,
    /// The command was rejected before it was sent to the server.
    CommandRejected,
    /// The per-node connection pool is exhausted.
    NoMoreConnections,
    /// No cluster node is currently reachable.
    ServerNotAvailable,
    /// A bin value could not be serialized into its wire representation.
    SerializeError,
    /// The retry budget was exhausted before the command succeeded.
    MaxRetriesExceeded,
    /// The node exceeded the configured error rate and is backed off.
    MaxErrorRateExceeded,
    /// No response was obtained for this command or batch entry.
    NoResponse,
    /// One or more entries of a batch request failed.
    BatchFailed,

    /// Operation was successful.
    Ok,
    /// Unknown server failure.
    ServerError,
    /// On retrieving, touching or replacing a record that doesn't exist.
    KeyNotFound,
    /// On modifying a record with an unexpected generation.
    GenerationError,
    /// Bad parameter(s) were passed in the database operation call.
    ParameterError,
    /// On create-only operations on a record that already exists.
    KeyExists,
    /// On create-only operations on a bin that already exists.
    BinExists,
    /// The expected cluster key was not received.
    ClusterKeyMismatch,
    /// The server node has run out of memory.
    ServerMemError,
    /// Client or server side timed out.
    Timeout,
    /// The server is not accepting requests.
    NoServerResponse,
    /// The partition is unavailable at the selected node.
    PartitionUnavailable,
    /// Operation is not supported with the configured bin type.
    BinTypeError,
    /// The record is larger than the server write-block limit.
    RecordTooBig,
    /// Too many concurrent operations on the same record.
    KeyBusy,
    /// Scan aborted by the server.
    ScanAbort,
    /// Unsupported server feature.
    UnsupportedFeature,
    /// The addressed bin does not exist in the record.
    BinNotFound,
    /// The storage device is overloaded at the selected node.
    DeviceOverload,
    /// The stored key does not match the key of the request.
    KeyMismatch,
    /// Invalid namespace.
    InvalidNamespace,
    /// The bin name exceeds the server's name length limit.
    BinNameTooLong,
    /// Operation not allowed at this time.
    FailForbidden,
    /// A map/list element addressed by the operation was not found.
    ElementNotFound,
    /// A map/list element addressed by the operation already exists.
    ElementExists,
    /// Feature not available in this server edition.
    EnterpriseOnly,
    /// The operation cannot be applied to the current bin value.
    OpNotApplicable,
    /// The record was filtered out by the request's filter expression.
    FilteredOut,
    /// The write lost a conflict-resolution race.
    LostConflict,
    /// A record write via cross-datacenter replication is in progress.
    XdrKeyBusy,

    /// Security functionality not supported by the connected server.
    SecurityNotSupported,
    /// Security functionality not enabled by the connected server.
    SecurityNotEnabled,
    /// Administration command is invalid.
    InvalidCommand,
    /// Administration field is invalid.
    InvalidField,
    /// Security protocol not followed.
    IllegalState,
    /// User name is invalid.
    InvalidUser,
    /// The user already exists.
    UserAlreadyExists,
    /// Password is invalid.
    InvalidPassword,
    /// Password has expired.
    ExpiredPassword,
    /// Forbidden password (e.g. recently used).
    ForbiddenPassword,
    /// Security credential is invalid.
    InvalidCredential,
    /// The user must authenticate before performing database operations.
    NotAuthenticated,
    /// The user does not possess the required role.
    RoleViolation,

    /// A user defined function returned an error code.
    UdfBadResponse,

    /// The transaction's server-side monitor deadline passed.
    TxnExpired,
    /// The transaction was already committed.
    TxnAlreadyCommitted,
    /// The transaction was already aborted.
    TxnAlreadyAborted,
    /// A read version recorded by the transaction no longer matches.
    VersionMismatch,

    /// The secondary index already exists.
    IndexFound,
    /// The addressed secondary index does not exist.
    IndexNotFound,
    /// The secondary index memory quota is exhausted.
    IndexOutOfMemory,
    /// The secondary index is not readable.
    IndexNotReadable,
    /// Generic secondary index failure.
    IndexGeneric,
    /// The index name exceeds the server's limit.
    IndexNameMaxLen,
    /// The maximum number of indexes was reached.
    IndexMaxCount,

    /// The query was aborted by the server.
    QueryAborted,
    /// The server query queue is full.
    QueryQueueFull,
    /// The query timed out on the server.
    QueryTimeout,
    /// Generic server-side query failure.
    QueryGeneric,

    /// A server code this client version does not recognize.
    Unknown(u8),
}

impl ResultCode {
    /// The canonical numeric code. Client-local codes are zero or negative,
    /// server codes positive.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ClientError => -1,
            Self::ParseError => -2,
            Self::InvalidNode => -3,
            Self::ScanTerminated => -4,
            Self::QueryTerminated => -5,
            Self::CommandRejected => -6,
            Self::NoMoreConnections => -7,
            Self::ServerNotAvailable => -8,
            Self::SerializeError => -10,
            Self::MaxRetriesExceeded => -11,
            Self::MaxErrorRateExceeded => -12,
            Self::NoResponse => -15,
            Self::BatchFailed => -16,
            Self::Ok => 0,
            Self::ServerError => 1,
            Self::KeyNotFound => 2,
            Self::GenerationError => 3,
            Self::ParameterError => 4,
            Self::KeyExists => 5,
            Self::BinExists => 6,
            Self::ClusterKeyMismatch => 7,
            Self::ServerMemError => 8,
            Self::Timeout => 9,
            Self::NoServerResponse => 10,
            Self::PartitionUnavailable => 11,
            Self::BinTypeError => 12,
            Self::RecordTooBig => 13,
            Self::KeyBusy => 14,
            Self::ScanAbort => 15,
            Self::UnsupportedFeature => 16,
            Self::BinNotFound => 17,
            Self::DeviceOverload => 18,
            Self::KeyMismatch => 19,
            Self::InvalidNamespace => 20,
            Self::BinNameTooLong => 21,
            Self::FailForbidden => 22,
            Self::ElementNotFound => 23,
            Self::ElementExists => 24,
            Self::EnterpriseOnly => 25,
            Self::OpNotApplicable => 26,
            Self::FilteredOut => 27,
            Self::LostConflict => 28,
            Self::XdrKeyBusy => 32,
            Self::SecurityNotSupported => 51,
            Self::SecurityNotEnabled => 52,
            Self::InvalidCommand => 54,
            Self::InvalidField => 55,
            Self::IllegalState => 56,
            Self::InvalidUser => 60,
            Self::UserAlreadyExists => 61,
            Self::InvalidPassword => 62,
            Self::ExpiredPassword => 63,
            Self::ForbiddenPassword => 64,
            Self::InvalidCredential => 65,
            Self::NotAuthenticated => 80,
            Self::RoleViolation => 81,
            Self::UdfBadResponse => 100,
            Self::TxnExpired => 120,
            Self::TxnAlreadyCommitted => 121,
            Self::TxnAlreadyAborted => 122,
            Self::VersionMismatch => 125,
            Self::IndexFound => 200,
            Self::IndexNotFound => 201,
            Self::IndexOutOfMemory => 202,
            Self::IndexNotReadable => 203,
            Self::IndexGeneric => 204,
            Self::IndexNameMaxLen => 205,
            Self::IndexMaxCount => 206,
            Self::QueryAborted => 210,
            Self::QueryQueueFull => 211,
            Self::QueryTimeout => 212,
            Self::QueryGeneric => 213,
            Self::Unknown(code) => code as i32,
        }
    }

    /// Whether the command executor may try the command again on another
    /// (or the same) node after receiving this code.
    #[must_use]
    pub const fn retryable(self) -> bool {
        matches!(
            self,
            Self::ClusterKeyMismatch
                | Self::Timeout
                | Self::NoServerResponse
                | Self::PartitionUnavailable
                | Self::KeyBusy
                | Self::DeviceOverload
                | Self::XdrKeyBusy
                | Self::ServerNotAvailable
                | Self::NoResponse
                | Self::MaxErrorRateExceeded
        )
    }

    /// Whether the connection that produced this failure code may be
    /// returned to the pool. Client-local codes and server-side stream
    /// aborts leave the socket in an unknown state, so the connection must
    /// be closed; any other server response leaves it reusable.
    #[must_use]
    pub const fn keep_connection(self) -> bool {
        !matches!(self, Self::ScanAbort | Self::QueryAborted) && self.code() > 0
    }

    pub(crate) const fn from_u8(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::ServerError,
            2 => Self::KeyNotFound,
            3 => Self::GenerationError,
            4 => Self::ParameterError,
            5 => Self::KeyExists,
            6 => Self::BinExists,
            7 => Self::ClusterKeyMismatch,
            8 => Self::ServerMemError,
            9 => Self::Timeout,
            10 => Self::NoServerResponse,
            11 => Self::PartitionUnavailable,
            12 => Self::BinTypeError,
            13 => Self::RecordTooBig,
            14 => Self::KeyBusy,
            15 => Self::ScanAbort,
            16 => Self::UnsupportedFeature,
            17 => Self::BinNotFound,
            18 => Self::DeviceOverload,
            19 => Self::KeyMismatch,
            20 => Self::InvalidNamespace,
            21 => Self::BinNameTooLong,
            22 => Self::FailForbidden,
            23 => Self::ElementNotFound,
            24 => Self::ElementExists,
            25 => Self::EnterpriseOnly,
            26 => Self::OpNotApplicable,
            27 => Self::FilteredOut,
            28 => Self::LostConflict,
            32 => Self::XdrKeyBusy,
            51 => Self::SecurityNotSupported,
            52 => Self::SecurityNotEnabled,
            54 => Self::InvalidCommand,
            55 => Self::InvalidField,
            56 => Self::IllegalState,
            60 => Self::InvalidUser,
            61 => Self::UserAlreadyExists,
            62 => Self::InvalidPassword,
            63 => Self::ExpiredPassword,
            64 => Self::ForbiddenPassword,
            65 => Self::InvalidCredential,
            80 => Self::NotAuthenticated,
            81 => Self::RoleViolation,
            100 => Self::UdfBadResponse,
            120 => Self::TxnExpired,
            121 => Self::TxnAlreadyCommitted,
            122 => Self::TxnAlreadyAborted,
            125 => Self::VersionMismatch,
            200 => Self::IndexFound,
            201 => Self::IndexNotFound,
            202 => Self::IndexOutOfMemory,
            203 => Self::IndexNotReadable,
            204 => Self::IndexGeneric,
            205 => Self::IndexNameMaxLen,
            206 => Self::IndexMaxCount,
            210 => Self::QueryAborted,
            211 => Self::QueryQueueFull,
            212 => Self::QueryTimeout,
            213 => Self::QueryGeneric,
            code => Self::Unknown(code),
        }
    }

    #[must_use]
    pub const fn into_string(self) -> &'static str {
        match self {
            Self::ClientError => "client error",
            Self::ParseError => "parse error",
            Self::InvalidNode => "invalid cluster node",
            Self::ScanTerminated => "scan terminated",
            Self::QueryTerminated => "query terminated",
            Self::CommandRejected => "command rejected",
            Self::NoMoreConnections => "no more available connections",
            Self::ServerNotAvailable => "server not available",
            Self::SerializeError => "serialization error",
            Self::MaxRetriesExceeded => "max retries exceeded",
            Self::MaxErrorRateExceeded => "max error rate exceeded",
            Self::NoResponse => "no response received",
            Self::BatchFailed => "one or more batch entries failed",
            Self::Ok => "ok",
            Self::ServerError => "server error",
            Self::KeyNotFound => "key not found",
            Self::GenerationError => "generation error",
            Self::ParameterError => "parameter error",
            Self::KeyExists => "key already exists",
            Self::BinExists => "bin already exists",
            Self::ClusterKeyMismatch => "cluster key mismatch",
            Self::ServerMemError => "server memory error",
            Self::Timeout => "timeout",
            Self::NoServerResponse => "server not accepting requests",
            Self::PartitionUnavailable => "partition unavailable",
            Self::BinTypeError => "bin type error",
            Self::RecordTooBig => "record too big",
            Self::KeyBusy => "hot key",
            Self::ScanAbort => "scan aborted",
            Self::UnsupportedFeature => "unsupported server feature",
            Self::BinNotFound => "bin not found",
            Self::DeviceOverload => "device overload",
            Self::KeyMismatch => "key mismatch",
            Self::InvalidNamespace => "namespace not found",
            Self::BinNameTooLong => "bin name too long",
            Self::FailForbidden => "operation not allowed at this time",
            Self::ElementNotFound => "element not found",
            Self::ElementExists => "element already exists",
            Self::EnterpriseOnly => "enterprise-only feature",
            Self::OpNotApplicable => "operation not applicable",
            Self::FilteredOut => "filtered out by expression",
            Self::LostConflict => "write lost conflict resolution",
            Self::XdrKeyBusy => "cross-datacenter write in progress",
            Self::SecurityNotSupported => "security not supported",
            Self::SecurityNotEnabled => "security not enabled",
            Self::InvalidCommand => "invalid admin command",
            Self::InvalidField => "invalid admin field",
            Self::IllegalState => "illegal security state",
            Self::InvalidUser => "invalid user",
            Self::UserAlreadyExists => "user already exists",
            Self::InvalidPassword => "invalid password",
            Self::ExpiredPassword => "expired password",
            Self::ForbiddenPassword => "forbidden password",
            Self::InvalidCredential => "invalid credential",
            Self::NotAuthenticated => "not authenticated",
            Self::RoleViolation => "role violation",
            Self::UdfBadResponse => "UDF returned an error",
            Self::TxnExpired => "transaction expired",
            Self::TxnAlreadyCommitted => "transaction already committed",
            Self::TxnAlreadyAborted => "transaction already aborted",
            Self::VersionMismatch => "record version mismatch",
            Self::IndexFound => "index already exists",
            Self::IndexNotFound => "index not found",
            Self::IndexOutOfMemory => "index out of memory",
            Self::IndexNotReadable => "index not readable",
            Self::IndexGeneric => "index error",
            Self::IndexNameMaxLen => "index name too long",
            Self::IndexMaxCount => "too many indexes",
            Self::QueryAborted => "query aborted",
            Self::QueryQueueFull => "query queue full",
            Self::QueryTimeout => "query timed out on server",
            Self::QueryGeneric => "query error",
            Self::Unknown(_) => "unrecognized server code",
        }
    }
}

impl From<u8> for ResultCode {
    fn from(code: u8) -> Self {
        Self::from_u8(code)
    }
}

impl From<ResultCode> for u8 {
    fn from(code: ResultCode) -> Self {
        debug_assert!(code.code() >= 0, "client-local codes never go on the wire");
        code.code() as Self
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.into_string(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ResultCode;

    #[test]
    fn wire_round_trip() {
        for code in 0..=u8::MAX {
            assert_eq!(ResultCode::from_u8(code).code(), i32::from(code));
        }
    }

    #[test]
    fn client_local_codes() {
        assert_eq!(ResultCode::ClientError.code(), -1);
        assert_eq!(ResultCode::NoMoreConnections.code(), -7);
        assert_eq!(ResultCode::ServerNotAvailable.code(), -8);
        assert_eq!(ResultCode::MaxRetriesExceeded.code(), -11);
        assert_eq!(ResultCode::NoResponse.code(), -15);
        assert_eq!(ResultCode::BatchFailed.code(), -16);
    }

    #[test]
    fn keep_connection_law() {
        // Closed for every code <= 0 and for stream aborts, kept for every
        // other server response.
        assert!(!ResultCode::Ok.keep_connection());
        assert!(!ResultCode::ClientError.keep_connection());
        assert!(!ResultCode::NoMoreConnections.keep_connection());
        assert!(!ResultCode::ScanAbort.keep_connection());
        assert!(!ResultCode::QueryAborted.keep_connection());

        assert!(ResultCode::KeyNotFound.keep_connection());
        assert!(ResultCode::Timeout.keep_connection());
        assert!(ResultCode::DeviceOverload.keep_connection());
        assert!(ResultCode::FilteredOut.keep_connection());
    }

    #[test]
    fn retryable_classification() {
        for code in [
            ResultCode::Timeout,
            ResultCode::DeviceOverload,
            ResultCode::PartitionUnavailable,
            ResultCode::ClusterKeyMismatch,
            ResultCode::KeyBusy,
            ResultCode::XdrKeyBusy,
            ResultCode::ServerNotAvailable,
        ] {
            assert!(code.retryable(), "{code} must be retryable");
        }
        for code in [
            ResultCode::KeyNotFound,
            ResultCode::GenerationError,
            ResultCode::ParameterError,
            ResultCode::FilteredOut,
            ResultCode::RecordTooBig,
            ResultCode::EnterpriseOnly,
        ] {
            assert!(!code.retryable(), "{code} must not be retryable");
        }
    }
}
