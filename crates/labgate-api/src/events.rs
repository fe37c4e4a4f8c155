//! Event types for labgated -> client streaming

use chrono::{DateTime, Local};
use labgate_roster::RosterCounts;
use labgate_util::Handler;
use serde::{Deserialize, Serialize};

use crate::{RuleFailure, SessionInfo, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: labgate_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// All four rules are installed
    ConnectionOpened { session: SessionInfo },

    /// Installation stopped part way; the session stays recorded
    ConnectionPartial {
        session: SessionInfo,
        failed: RuleFailure,
    },

    /// Session removed from the table
    ConnectionClosed {
        handler: Handler,
        deleted_rules: Vec<String>,
        /// Rules the controller refused to delete
        failed: Vec<RuleFailure>,
    },

    /// Roster was edited or replaced
    RosterChanged { counts: RosterCounts },

    /// Service is shutting down
    Shutdown,
}
