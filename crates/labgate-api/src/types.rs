//! Shared types for the labgate API

use chrono::{DateTime, Local};
use labgate_roster::RosterError;
use labgate_util::{Handler, StudentId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a connection
///
/// `Requested`, `Authorized` and `AttachmentResolved` are transient; a
/// session record only exists from the moment rule installation starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Requested,
    Authorized,
    AttachmentResolved,
    /// Some of the four rules failed to install; teardown still removes all four names
    PartiallyInstalled,
    /// All four rules installed; the connection is active
    RulesInstalled,
    /// Rules are being deleted; the record goes once every delete has answered
    Terminating,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Requested => "requested",
            SessionState::Authorized => "authorized",
            SessionState::AttachmentResolved => "attachment_resolved",
            SessionState::PartiallyInstalled => "partially_installed",
            SessionState::RulesInstalled => "rules_installed",
            SessionState::Terminating => "terminating",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Connection information exposed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub handler: Handler,
    pub student_id: StudentId,
    pub server_name: String,
    pub service_name: String,
    pub state: SessionState,
    /// The four rule names owned by this session
    pub installed_rule_names: Vec<String>,
    /// Rule names the controller accepted
    pub pushed_rule_names: Vec<String>,
    pub opened_at: DateTime<Local>,
}

/// Per-rule failure reported by install or teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub rule_name: String,
    pub error: String,
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    AlreadyExists,
    NotFound,
    InvalidInput,
    AccessDenied,
    AttachmentUnresolved,
    ControllerUnreachable,
    PartialInstall,
    PartialTeardown,
    Cancelled,
    PermissionDenied,
    SnapshotError,
    InternalError,
}

impl From<&RosterError> for ErrorCode {
    fn from(err: &RosterError) -> Self {
        match err {
            RosterError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            RosterError::NotFound { .. } => ErrorCode::NotFound,
            RosterError::InvalidInput(_) => ErrorCode::InvalidInput,
        }
    }
}

/// Role for authorization of IPC clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Lab operator - can read the roster, open and close connections
    Operator,
    /// Local admin - can also edit the roster and import/export snapshots
    Admin,
}

impl ClientRole {
    pub fn can_connect(&self) -> bool {
        matches!(self, ClientRole::Operator | ClientRole::Admin)
    }

    pub fn can_edit_roster(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub controller_ok: bool,
    pub active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles() {
        assert!(ClientRole::Operator.can_connect());
        assert!(!ClientRole::Operator.can_edit_roster());
        assert!(ClientRole::Admin.can_edit_roster());
    }

    #[test]
    fn error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::AttachmentUnresolved).unwrap();
        assert_eq!(json, "\"attachment_unresolved\"");
    }

    #[test]
    fn session_state_wire_names_match_display() {
        let state = SessionState::Terminating;
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, format!("\"{}\"", state));
    }

    #[test]
    fn roster_errors_map_to_codes() {
        use labgate_roster::RecordKind;

        let missing = RosterError::not_found(RecordKind::Server, "db9");
        assert_eq!(ErrorCode::from(&missing), ErrorCode::NotFound);
        let bad = RosterError::invalid("port must be 1-65535");
        assert_eq!(ErrorCode::from(&bad), ErrorCode::InvalidInput);
    }
}
