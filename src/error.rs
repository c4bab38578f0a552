use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid_argument",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceExhausted => "resource_exhausted",
            Self::FailedPrecondition => "failed_precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out_of_range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data_loss",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Connect,
    Read,
    Protocol,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Connect => "connect",
            Self::Read => "read",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeoutPhase {
    Request,
    FirstEvent,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Request => "request",
            Self::FirstEvent => "first_event",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RpcClientErrorCode {
    Rpc,
    Transport,
    Timeout,
    Cancelled,
    PoolExhausted,
    InvalidMetadataName,
    InvalidMetadataValue,
    InvalidConfiguration,
}

impl RpcClientErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::PoolExhausted => "pool_exhausted",
            Self::InvalidMetadataName => "invalid_metadata_name",
            Self::InvalidMetadataValue => "invalid_metadata_value",
            Self::InvalidConfiguration => "invalid_configuration",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcClientError {
    #[error("rpc error ({status}): {message}")]
    Rpc { status: StatusCode, message: String },
    #[error("transport error ({kind}): {source}")]
    Transport {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("timed out in {phase} after {timeout_ms}ms")]
    Timeout { phase: TimeoutPhase, timeout_ms: u128 },
    #[error("call cancelled by caller")]
    Cancelled,
    #[error(
        "maximum number of active subscriptions reached ({channels} channels, {capacity_per_channel} per channel)"
    )]
    PoolExhausted {
        channels: usize,
        capacity_per_channel: usize,
    },
    #[error("invalid metadata name {name}: {source}")]
    InvalidMetadataName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid metadata value for {name}: {source}")]
    InvalidMetadataValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("invalid client configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl RpcClientError {
    pub fn rpc(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Rpc {
            status,
            message: message.into(),
        }
    }

    pub const fn code(&self) -> RpcClientErrorCode {
        match self {
            Self::Rpc { .. } => RpcClientErrorCode::Rpc,
            Self::Transport { .. } => RpcClientErrorCode::Transport,
            Self::Timeout { .. } => RpcClientErrorCode::Timeout,
            Self::Cancelled => RpcClientErrorCode::Cancelled,
            Self::PoolExhausted { .. } => RpcClientErrorCode::PoolExhausted,
            Self::InvalidMetadataName { .. } => RpcClientErrorCode::InvalidMetadataName,
            Self::InvalidMetadataValue { .. } => RpcClientErrorCode::InvalidMetadataValue,
            Self::InvalidConfiguration { .. } => RpcClientErrorCode::InvalidConfiguration,
        }
    }

    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Rpc { status, .. } => Some(*status),
            _ => None,
        }
    }
}
