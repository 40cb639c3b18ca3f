//! Crawl result data model
//!
//! This module defines the unit of work flowing into the pipeline:
//!
//! - `Identifier`: the non-empty video or channel ID a result is keyed by
//! - `Record`: a normalized video or channel record produced by a parser
//! - `Failure`: why fetching or parsing a target failed, and whether retrying makes sense
//! - `CrawlResult`: one identifier paired with exactly one record or failure

mod kinds;
mod types;
mod wire;

pub use kinds::{FailureKind, RecordKind};
pub use types::{Channel, Record, Video};
pub use wire::{parse_line, WireResult};

use crate::RecordError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, non-empty key of a crawl target (video or channel ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Creates an identifier, rejecting empty or whitespace-only keys
    pub fn new(id: impl Into<String>) -> Result<Self, RecordError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RecordError::EmptyIdentifier);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identifier {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a crawl target could not be turned into a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub cause: String,
}

impl Failure {
    /// A retryable failure (network error, timeout, parse hiccup)
    pub fn transient(cause: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            cause: cause.into(),
        }
    }

    /// A failure that will not go away on retry (video removed, content beyond repair)
    pub fn permanent(cause: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            cause: cause.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == FailureKind::Permanent
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.cause)
    }
}

/// One parsed outcome for one crawl target
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlResult {
    pub identifier: Identifier,
    pub outcome: Result<Record, Failure>,
}

impl CrawlResult {
    pub fn success(identifier: Identifier, record: Record) -> Self {
        Self {
            identifier,
            outcome: Ok(record),
        }
    }

    pub fn failure(identifier: Identifier, failure: Failure) -> Self {
        Self {
            identifier,
            outcome: Err(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A successful record as it travels inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub identifier: Identifier,
    pub record: Record,
}
