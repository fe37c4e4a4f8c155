//! Command types for the labgated protocol

use labgate_roster::{
    Course, CourseUpdate, GrantEntry, RosterCounts, Server, ServerUpdate, Service, ServiceUpdate,
    Student, StudentUpdate,
};
use labgate_util::{ClientId, Handler, StudentId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::{ClientRole, ErrorCode, HealthStatus, RuleFailure, SessionInfo, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,

    /// Session the failure belongs to, when one was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<Handler>,

    /// Per-rule failures for partial install/teardown
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RuleFailure>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            handler: None,
            failures: Vec::new(),
        }
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_failures(mut self, failures: Vec<RuleFailure>) -> Self {
        self.failures = failures;
        self
    }
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Students
    ListStudents,
    GetStudent { student_id: StudentId },
    AddStudent { student: Student },
    UpdateStudent { student_id: StudentId, update: StudentUpdate },
    RemoveStudent { student_id: StudentId },

    // Servers and services
    ListServers,
    GetServer { name: String },
    AddServer { server: Server },
    UpdateServer { name: String, update: ServerUpdate },
    RemoveServer { name: String },
    AddService { server_name: String, service: Service },
    UpdateService {
        server_name: String,
        service_name: String,
        update: ServiceUpdate,
    },
    RemoveService { server_name: String, service_name: String },

    // Courses, enrollment and grants
    ListCourses,
    GetCourse { code: String },
    AddCourse { course: Course },
    UpdateCourse { code: String, update: CourseUpdate },
    RemoveCourse { code: String },
    Enroll { code: String, student_id: StudentId },
    Unenroll { code: String, student_id: StudentId },
    AddGrant { code: String, grant: GrantEntry },
    UpdateGrant {
        code: String,
        server_name: String,
        allowed_services: BTreeSet<String>,
    },
    RemoveGrant { code: String, server_name: String },

    // Snapshot (path defaults to the configured one)
    ImportRoster { path: Option<PathBuf> },
    ExportRoster { path: Option<PathBuf> },

    // Policy and connections

    /// Dry-run authorization check; installs nothing
    Authorize {
        student_id: StudentId,
        server_name: String,
        service_name: String,
    },
    Connect {
        student_id: StudentId,
        server_name: String,
        service_name: String,
    },
    Disconnect { handler: Handler },
    ListConnections,

    // Service
    GetHealth,
    SubscribeEvents,
    UnsubscribeEvents,
    Ping,
}

impl Command {
    /// Whether this command changes the roster
    pub fn edits_roster(&self) -> bool {
        matches!(
            self,
            Command::AddStudent { .. }
                | Command::UpdateStudent { .. }
                | Command::RemoveStudent { .. }
                | Command::AddServer { .. }
                | Command::UpdateServer { .. }
                | Command::RemoveServer { .. }
                | Command::AddService { .. }
                | Command::UpdateService { .. }
                | Command::RemoveService { .. }
                | Command::AddCourse { .. }
                | Command::UpdateCourse { .. }
                | Command::RemoveCourse { .. }
                | Command::Enroll { .. }
                | Command::Unenroll { .. }
                | Command::AddGrant { .. }
                | Command::UpdateGrant { .. }
                | Command::RemoveGrant { .. }
                | Command::ImportRoster { .. }
                | Command::ExportRoster { .. }
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Students { students: Vec<Student> },
    Student { student: Student },
    Servers { servers: Vec<Server> },
    Server { server: Server },
    Service { service: Service },
    Courses { courses: Vec<Course> },
    Course { course: Course },
    Grant { grant: GrantEntry },
    /// Removal that cascaded into the listed courses
    Removed { affected_courses: Vec<String> },
    Done,
    RosterImported { counts: RosterCounts },
    RosterExported { path: PathBuf },
    Authorization {
        allowed: bool,
        /// First active course that grants the access
        course: Option<String>,
    },
    Connected { session: SessionInfo },
    Disconnected { handler: Handler, deleted_rules: Vec<String> },
    Connections { sessions: Vec<SessionInfo> },
    Health(HealthStatus),
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Pong,
}

/// Client connection info (set by server)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(client_id: ClientId, role: ClientRole) -> Self {
        Self {
            client_id,
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(
            7,
            Command::Connect {
                student_id: StudentId::parse("1001").unwrap(),
                server_name: "db1".into(),
                service_name: "ssh".into(),
            },
        );
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"connect\""));
        assert!(json.contains("\"student_id\":1001"));

        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, 7);
        assert!(matches!(parsed.command, Command::Connect { .. }));
    }

    #[test]
    fn error_response_carries_partial_details() {
        let info = ErrorInfo::new(ErrorCode::PartialTeardown, "1 of 4 rules not deleted")
            .with_handler(Handler::new("a1b2c3d4"))
            .with_failures(vec![RuleFailure {
                rule_name: "a1b2c3d4_bw".into(),
                error: "timeout".into(),
            }]);
        let resp = Response::error(3, info);

        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        match parsed.result {
            ResponseResult::Err(e) => {
                assert_eq!(e.code, ErrorCode::PartialTeardown);
                assert_eq!(e.handler, Some(Handler::new("a1b2c3d4")));
                assert_eq!(e.failures.len(), 1);
            }
            ResponseResult::Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn roster_edits_are_classified() {
        assert!(Command::RemoveServer { name: "db1".into() }.edits_roster());
        assert!(Command::ExportRoster { path: None }.edits_roster());
        assert!(!Command::ListConnections.edits_roster());
        assert!(!Command::Disconnect { handler: Handler::new("x") }.edits_roster());
    }
}
