//! Crate-wide error taxonomy.
//!
//! Every fallible operation in `bitmesh_core` returns `Result<T>`. Variants
//! are grouped by the component that raises them; the `category()` and
//! `is_retryable()` extensions let callers (mainly the session adapter)
//! decide on remediation without matching every variant by hand.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // C1 secure key
    #[error("key material has been destroyed")]
    KeyDestroyed,

    // C2 cipher state
    #[error("cipher state requires a rekey before further use")]
    RekeyRequired,
    #[error("authentication failed")]
    AuthFailed,
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("cipher error: {0}")]
    CipherError(String),

    // C4 fragmenter / reassembler
    #[error("mtu {mtu} too small for header overhead {overhead}")]
    MtuTooSmall { mtu: usize, overhead: usize },
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
    #[error("reassembly timed out for message {0}")]
    ReassemblyTimeout(String),
    #[error("too many pending messages from sender")]
    TooManyPendingMessages,

    // C5 codec
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("compression error: {0}")]
    CompressionError(String),

    // C9 relay
    #[error("blocked: {0}")]
    Blocked(BlockedReason),
    #[error("dropped: {0}")]
    Dropped(DroppedReason),

    // C8 queue
    #[error("queue is full")]
    QueueFull,
    #[error("message id is tombstoned")]
    QueueTombstoned,
    #[error("queue io error: {0}")]
    QueueIoError(String),

    // C11 sync
    #[error("sync rate limited")]
    SyncRateLimited,
    #[error("sync timed out")]
    SyncTimeout,
    #[error("sync request invalid: {0}")]
    SyncInvalid(String),

    // C12 adapter
    #[error("peer static key unavailable")]
    PeerKeyUnavailable,
    #[error("session not established")]
    SessionNotEstablished,

    // External collaborators (§6)
    #[error("link error: {0}")]
    Link(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("secure storage unavailable")]
    SecureStorageUnavailable,

    #[error("noise protocol error: {0}")]
    Noise(#[from] snow::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReason {
    Loop,
    Duplicate,
    RateLimited,
    Size,
    ProbabilisticSkip,
    Invalid,
}

impl std::fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BlockedReason::Loop => "loop",
            BlockedReason::Duplicate => "duplicate",
            BlockedReason::RateLimited => "rate_limited",
            BlockedReason::Size => "size",
            BlockedReason::ProbabilisticSkip => "probabilistic_skip",
            BlockedReason::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroppedReason {
    TtlExceeded,
    NoNeighbors,
    SelfEcho,
}

impl std::fmt::Display for DroppedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DroppedReason::TtlExceeded => "ttl_exceeded",
            DroppedReason::NoNeighbors => "no_neighbors",
            DroppedReason::SelfEcho => "self_echo",
        };
        f.write_str(s)
    }
}

/// Broad bucket used for dashboards and adapter remediation logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Crypto,
    Framing,
    Relay,
    Queue,
    Sync,
    Collaborator,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    NoRetry,
    LinearBackoff { max_retries: u32 },
    ExponentialBackoff { max_retries: u32 },
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        use Error::*;
        match self {
            KeyDestroyed | RekeyRequired | AuthFailed | HandshakeFailed(_) | CipherError(_)
            | Noise(_) => ErrorCategory::Crypto,
            MtuTooSmall { .. } | InvalidChunk(_) | ReassemblyTimeout(_)
            | TooManyPendingMessages | DecodeError(_) | CompressionError(_) => {
                ErrorCategory::Framing
            }
            Blocked(_) | Dropped(_) => ErrorCategory::Relay,
            QueueFull | QueueTombstoned | QueueIoError(_) => ErrorCategory::Queue,
            SyncRateLimited | SyncTimeout | SyncInvalid(_) => ErrorCategory::Sync,
            PeerKeyUnavailable | SessionNotEstablished | Link(_) | Store(_)
            | SecureStorageUnavailable => ErrorCategory::Collaborator,
            Io(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        use Error::*;
        match self {
            KeyDestroyed | AuthFailed | SecureStorageUnavailable => ErrorSeverity::Critical,
            RekeyRequired | HandshakeFailed(_) | SessionNotEstablished | PeerKeyUnavailable => {
                ErrorSeverity::High
            }
            Blocked(_) | Dropped(_) | QueueFull | SyncRateLimited => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        use Error::*;
        match self {
            KeyDestroyed | AuthFailed | SecureStorageUnavailable | Blocked(_) => {
                RetryStrategy::NoRetry
            }
            RekeyRequired | HandshakeFailed(_) | SessionNotEstablished | PeerKeyUnavailable => {
                RetryStrategy::ExponentialBackoff { max_retries: 5 }
            }
            SyncRateLimited | SyncTimeout | QueueIoError(_) | Link(_) => {
                RetryStrategy::LinearBackoff { max_retries: 3 }
            }
            _ => RetryStrategy::NoRetry,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.retry_strategy(), RetryStrategy::NoRetry)
    }
}
