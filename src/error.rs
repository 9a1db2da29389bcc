//! Error types for pool operations.

use thiserror::Error;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type covering the pool engine and its specializations.
///
/// Callers can distinguish "try again later" (`AcquisitionTimeout`,
/// `PoolExhausted`), "this request is invalid" (`SecurityViolation`,
/// `PolicyViolation`, exhausted `ResourceCreation`) and "system degraded"
/// (`WorkerCrash` after bounded respawns) via [`Error::is_retryable`].
#[derive(Error, Debug)]
pub enum Error {
    /// Pool configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// The error message.
        message: String,
    },

    /// A queued acquisition waited longer than `acquire_timeout`.
    #[error("acquisition timed out after {timeout_ms}ms in pool '{pool}'")]
    AcquisitionTimeout {
        /// The pool name.
        pool: String,
        /// The configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The pool is at capacity and the wait queue is full.
    #[error("pool '{pool}' exhausted: {in_use}/{max_size} in use, {waiters} waiting")]
    PoolExhausted {
        /// The pool name.
        pool: String,
        /// Resources currently checked out.
        in_use: usize,
        /// Maximum pool size.
        max_size: usize,
        /// Waiters already queued.
        waiters: usize,
    },

    /// The factory failed to create a resource after all retries.
    #[error("resource creation failed in pool '{pool}' after {attempts} attempt(s): {reason}")]
    ResourceCreation {
        /// The pool name.
        pool: String,
        /// Number of creation attempts made.
        attempts: u32,
        /// The failure reason.
        reason: String,
    },

    /// The pool is draining and rejects new acquisitions.
    #[error("pool '{pool}' is draining")]
    Draining {
        /// The pool name.
        pool: String,
    },

    /// `drain` gave up waiting for in-use resources to return.
    #[error("drain of pool '{pool}' timed out after {timeout_ms}ms")]
    DrainTimeout {
        /// The pool name.
        pool: String,
        /// The drain timeout in milliseconds.
        timeout_ms: u64,
    },

    /// A queued acquisition was cancelled by `cleanup`.
    #[error("acquisition cancelled: pool '{pool}' was cleaned up")]
    Cancelled {
        /// The pool name.
        pool: String,
    },

    /// A requested path escapes the configured base directory.
    #[error("security violation for path '{path}': {reason}")]
    SecurityViolation {
        /// The offending path as requested.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },

    /// A requested file violates the extension or size policy.
    #[error("policy violation for path '{path}': {reason}")]
    PolicyViolation {
        /// The offending path as requested.
        path: String,
        /// Which policy was violated.
        reason: String,
    },

    /// A worker task did not produce a response in time.
    #[error("worker task timed out after {timeout_ms}ms")]
    WorkerTaskTimeout {
        /// The task timeout in milliseconds.
        timeout_ms: u64,
    },

    /// A worker exited unexpectedly.
    #[error("worker crashed ({reason}), {respawns} respawn(s) attempted")]
    WorkerCrash {
        /// What was observed (channel closed, handshake failure, ...).
        reason: String,
        /// Respawns attempted before surfacing the crash.
        respawns: u32,
    },

    /// An I/O error surfaced through resource creation.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a resource creation error.
    pub fn creation(pool: impl Into<String>, attempts: u32, reason: impl Into<String>) -> Self {
        Self::ResourceCreation {
            pool: pool.into(),
            attempts,
            reason: reason.into(),
        }
    }

    /// Create a security violation error.
    pub fn security(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SecurityViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a policy violation error.
    pub fn policy(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PolicyViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionTimeout { .. }
                | Self::PoolExhausted { .. }
                | Self::WorkerTaskTimeout { .. }
        )
    }
}
