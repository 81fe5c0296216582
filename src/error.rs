// SPDX-FileCopyrightText: 2026 Strata Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Error taxonomy for the buffer/pool/queue substrate.
//!
//! Mirrors the kinds enumerated in the design's error-handling section: each
//! variant carries a `context` string describing what was being attempted so
//! call sites can log or display a useful message without a second lookup.

use std::fmt;

/// Errors produced by buffer, pool, and queue operations.
#[derive(Debug, Clone)]
pub enum Error {
    /// Null/missing argument, key collision preconditions, size exceeding
    /// capacity, `src == dst`, and similar precondition violations.
    InvalidArgument {
        /// What was being attempted.
        context: String,
    },

    /// Allocation or backend `acquire`/grow failure.
    OutOfMemory {
        /// What was being allocated.
        context: String,
    },

    /// A write operation was attempted on a write-locked buffer.
    PermissionDenied {
        /// What was being attempted.
        context: String,
    },

    /// A write-lock toggle was attempted while the reference count was not 1.
    Busy {
        /// What was being attempted.
        context: String,
    },

    /// Growth was requested but the backend has no realloc hook.
    NotSupported {
        /// What capability was missing.
        context: String,
    },

    /// A metadata key collision.
    Exists {
        /// What key collided.
        context: String,
    },

    /// A metadata lookup miss.
    NoEntry {
        /// What was being looked up.
        context: String,
    },

    /// A non-blocking wait found nothing available, a bounded queue refused
    /// a push, or a wait was interrupted by `abort`.
    TryAgain {
        /// What was being waited on.
        context: String,
    },

    /// A blocking wait's deadline elapsed before anything became available.
    TimedOut {
        /// What was being waited on.
        context: String,
    },
}

impl Error {
    /// Build an [`Error::InvalidArgument`].
    pub fn invalid_argument(context: impl Into<String>) -> Self {
        Error::InvalidArgument {
            context: context.into(),
        }
    }

    /// Build an [`Error::OutOfMemory`].
    pub fn out_of_memory(context: impl Into<String>) -> Self {
        Error::OutOfMemory {
            context: context.into(),
        }
    }

    /// Build an [`Error::PermissionDenied`].
    pub fn permission_denied(context: impl Into<String>) -> Self {
        Error::PermissionDenied {
            context: context.into(),
        }
    }

    /// Build an [`Error::Busy`].
    pub fn busy(context: impl Into<String>) -> Self {
        Error::Busy {
            context: context.into(),
        }
    }

    /// Build an [`Error::NotSupported`].
    pub fn not_supported(context: impl Into<String>) -> Self {
        Error::NotSupported {
            context: context.into(),
        }
    }

    /// Build an [`Error::Exists`].
    pub fn exists(context: impl Into<String>) -> Self {
        Error::Exists {
            context: context.into(),
        }
    }

    /// Build an [`Error::NoEntry`].
    pub fn no_entry(context: impl Into<String>) -> Self {
        Error::NoEntry {
            context: context.into(),
        }
    }

    /// Build an [`Error::TryAgain`].
    pub fn try_again(context: impl Into<String>) -> Self {
        Error::TryAgain {
            context: context.into(),
        }
    }

    /// Build an [`Error::TimedOut`].
    pub fn timed_out(context: impl Into<String>) -> Self {
        Error::TimedOut {
            context: context.into(),
        }
    }

    /// Structured fields for a `tracing` call site, analogous to the
    /// robocodec convention of exposing error internals for logging without
    /// re-parsing `Display` output.
    pub fn log_fields(&self) -> Vec<(&'static str, String)> {
        let context = match self {
            Error::InvalidArgument { context }
            | Error::OutOfMemory { context }
            | Error::PermissionDenied { context }
            | Error::Busy { context }
            | Error::NotSupported { context }
            | Error::Exists { context }
            | Error::NoEntry { context }
            | Error::TryAgain { context }
            | Error::TimedOut { context } => context.clone(),
        };
        vec![("kind", self.kind_name().to_string()), ("context", context)]
    }

    /// Short machine-readable name of the error kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::InvalidArgument { .. } => "invalid-argument",
            Error::OutOfMemory { .. } => "out-of-memory",
            Error::PermissionDenied { .. } => "permission-denied",
            Error::Busy { .. } => "busy",
            Error::NotSupported { .. } => "not-supported",
            Error::Exists { .. } => "exists",
            Error::NoEntry { .. } => "no-entry",
            Error::TryAgain { .. } => "try-again",
            Error::TimedOut { .. } => "timed-out",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let context = match self {
            Error::InvalidArgument { context }
            | Error::OutOfMemory { context }
            | Error::PermissionDenied { context }
            | Error::Busy { context }
            | Error::NotSupported { context }
            | Error::Exists { context }
            | Error::NoEntry { context }
            | Error::TryAgain { context }
            | Error::TimedOut { context } => context,
        };
        write!(f, "{}: {context}", self.kind_name())
    }
}

impl std::error::Error for Error {}

/// Result type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;
