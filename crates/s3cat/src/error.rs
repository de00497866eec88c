//! 💀 The error taxonomy: four ways a concatenation can go sideways.
//!
//! Backends speak `anyhow` (context chains, written with love at 3am). The engine
//! sorts those into named buckets so a caller can tell "the config is wrong"
//! from "S3 sneezed" from "we assembled nothing and refuse to pretend otherwise".

use thiserror::Error;

/// 📦 Boxed cause, so `anyhow` chains ride along without losing their context.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ConcatError {
    /// 🔧 Bad input detected before any store call (size strings, worker counts, ...).
    #[error("💀 configuration error: {0}")]
    Configuration(String),

    /// 🌩️ One get/copy/upload call failed. Eligible for retry.
    #[error("⚠️ transient store failure during {operation} on '{key}': {source}")]
    TransientStore {
        operation: &'static str,
        key: String,
        #[source]
        source: BoxedCause,
    },

    /// 🧮 Multipart assembly finished with zero parts for a non-empty group.
    #[error("💀 integrity failure: '{key}' assembled zero parts from {members} members")]
    Integrity { key: String, members: usize },

    /// 🪦 Retries exhausted, or a non-retryable call (open/copy/complete/abort) failed.
    #[error("💀 permanent store failure during {operation} on '{key}': {source}")]
    PermanentStore {
        operation: &'static str,
        key: String,
        #[source]
        source: BoxedCause,
    },
}

impl ConcatError {
    pub(crate) fn transient(
        operation: &'static str,
        key: impl Into<String>,
        source: impl Into<BoxedCause>,
    ) -> Self {
        Self::TransientStore {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }

    pub(crate) fn permanent(
        operation: &'static str,
        key: impl Into<String>,
        source: impl Into<BoxedCause>,
    ) -> Self {
        Self::PermanentStore {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }

    /// 🪦 Promote a failure whose retries ran out. Transient becomes permanent,
    /// everything else keeps the name it already had.
    pub(crate) fn exhausted(self) -> Self {
        match self {
            Self::TransientStore {
                operation,
                key,
                source,
            } => Self::PermanentStore {
                operation,
                key,
                source,
            },
            other => other,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore { .. })
    }
}
