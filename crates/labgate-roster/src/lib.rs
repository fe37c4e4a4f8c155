//! Roster store for labgate
//!
//! Holds the students, servers (with their services) and courses (with
//! enrollment and per-course server grants) that authorization is
//! evaluated against, plus load/save of the YAML roster snapshot.

mod model;
mod schema;
mod snapshot;
mod store;

pub use model::*;
pub use schema::*;
pub use snapshot::*;
pub use store::*;

use std::fmt;
use thiserror::Error;

/// Kind of roster record, used to tag errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Student,
    Server,
    Service,
    Course,
    Grant,
    Enrollment,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Student => "student",
            RecordKind::Server => "server",
            RecordKind::Service => "service",
            RecordKind::Course => "course",
            RecordKind::Grant => "grant",
            RecordKind::Enrollment => "enrollment",
        };
        f.write_str(name)
    }
}

/// Roster errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: RecordKind, key: String },

    #[error("{kind} '{key}' not found")]
    NotFound { kind: RecordKind, key: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RosterError {
    pub fn exists(kind: RecordKind, key: impl fmt::Display) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.to_string(),
        }
    }

    pub fn not_found(kind: RecordKind, key: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type RosterResult<T> = Result<T, RosterError>;
