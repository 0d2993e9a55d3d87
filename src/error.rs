use thiserror::Error;

use crate::models::FeatureId;

/// Errors raised by readers, the session and the store boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// `next()` was called on an exhausted reader.
    #[error("no more features in sequence")]
    EndOfSequence,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A reader whose earlier `has_next`/`next` failed; carries that error's message.
    #[error("reader failed earlier: {0}")]
    ReaderFailed(String),

    #[error("no coordinate transform from {from} to {to}")]
    TransformUnavailable { from: String, to: String },

    #[error("failed to transform geometry of feature {feature}: {reason}")]
    TransformError { feature: FeatureId, reason: String },

    #[error("unknown feature type: {0}")]
    UnknownType(String),

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("bounding box expressed in {found}, attribute is in {expected}")]
    CrsMismatch { expected: String, found: String },

    #[error("invalid value for attribute {attribute}: expected {expected}, got {found}")]
    InvalidValue {
        attribute: String,
        expected: String,
        found: String,
    },

    /// Opaque error from a store adapter. `delta_index` is set when the error
    /// was raised while replaying a pending delta during commit.
    #[error("store failure on {type_name}{}: {source}", delta_suffix(.delta_index))]
    StoreFailure {
        type_name: String,
        delta_index: Option<usize>,
        #[source]
        source: anyhow::Error,
    },

    /// One entry per feature type whose commit stopped early.
    #[error("commit failed for {} feature type(s)", .failures.len())]
    Commit { failures: Vec<Error> },
}

fn delta_suffix(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" (delta #{})", i),
        None => String::new(),
    }
}

impl Error {
    pub fn store(type_name: impl Into<String>, source: anyhow::Error) -> Self {
        Self::StoreFailure {
            type_name: type_name.into(),
            delta_index: None,
            source,
        }
    }

    pub(crate) fn store_at(type_name: &str, delta_index: usize, source: anyhow::Error) -> Self {
        Self::StoreFailure {
            type_name: type_name.to_string(),
            delta_index: Some(delta_index),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
