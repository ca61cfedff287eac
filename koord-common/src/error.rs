// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Scheduler error taxonomy.
//!
//! Four classes drive the handling policy: transient errors are retried
//! locally with bounded backoff, configuration errors are logged and
//! counted, unschedulable errors bubble to the error handler and become
//! events/status, fatal errors abort the current operation but never
//! panic the scheduler loop.

use std::fmt;

/// Handling class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Configuration,
    Unschedulable,
    Fatal,
}

/// Error codes, each mapped to one handling class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// API write conflict (optimistic concurrency).
    Conflict,
    /// API rate limit (429).
    TooManyRequests,
    /// Watch/list stream disconnected.
    Disconnected,
    /// Malformed annotation, invalid quota spec, invalid selector.
    InvalidSpec,
    /// Referenced object is gone.
    NotFound,
    /// No placement currently possible (fit error, gang not satisfied,
    /// quota exceeded, no matching reservation).
    Unschedulable,
    /// Detected cache corruption (e.g. mutating an allocated
    /// reservation's node).
    CacheCorrupted,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorCode {
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::Conflict | Self::TooManyRequests | Self::Disconnected => ErrorKind::Transient,
            Self::InvalidSpec | Self::NotFound => ErrorKind::Configuration,
            Self::Unschedulable => ErrorKind::Unschedulable,
            Self::CacheCorrupted | Self::Internal => ErrorKind::Fatal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "Conflict",
            Self::TooManyRequests => "TooManyRequests",
            Self::Disconnected => "Disconnected",
            Self::InvalidSpec => "InvalidSpec",
            Self::NotFound => "NotFound",
            Self::Unschedulable => "Unschedulable",
            Self::CacheCorrupted => "CacheCorrupted",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary error type for scheduler operations.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct SchedulerError {
    pub code: ErrorCode,
    pub message: String,
}

impl SchedulerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooManyRequests, message)
    }

    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSpec, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn unschedulable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unschedulable, message)
    }

    pub fn cache_corrupted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheCorrupted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_unschedulable(&self) -> bool {
        self.kind() == ErrorKind::Unschedulable
    }

    /// Retry predicate for status-update writes.
    pub fn is_conflict_or_throttled(&self) -> bool {
        matches!(self.code, ErrorCode::Conflict | ErrorCode::TooManyRequests)
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(SchedulerError::conflict("c").kind(), ErrorKind::Transient);
        assert_eq!(
            SchedulerError::too_many_requests("t").kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            SchedulerError::invalid_spec("i").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            SchedulerError::unschedulable("u").kind(),
            ErrorKind::Unschedulable
        );
        assert_eq!(
            SchedulerError::cache_corrupted("f").kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_retry_predicate() {
        assert!(SchedulerError::conflict("c").is_conflict_or_throttled());
        assert!(SchedulerError::too_many_requests("t").is_conflict_or_throttled());
        assert!(!SchedulerError::unschedulable("u").is_conflict_or_throttled());
    }

    #[test]
    fn test_display() {
        let err = SchedulerError::unschedulable("0/3 nodes are available");
        assert_eq!(err.to_string(), "Unschedulable: 0/3 nodes are available");
    }
}
