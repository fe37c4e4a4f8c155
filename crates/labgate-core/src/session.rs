//! Session records and the session table

use chrono::{DateTime, Local};
use labgate_api::{SessionInfo, SessionState};
use labgate_controller_api::rule_names;
use labgate_util::{Handler, StudentId};
use std::collections::{HashMap, HashSet};

/// A recorded connection
#[derive(Debug, Clone)]
pub struct Session {
    pub handler: Handler,
    pub student_id: StudentId,
    pub server_name: String,
    pub service_name: String,
    pub state: SessionState,

    /// The four rule names this session owns
    pub installed_rule_names: Vec<String>,

    /// Names the controller accepted so far
    pub pushed_rule_names: Vec<String>,

    pub opened_at: DateTime<Local>,
}

impl Session {
    /// Record a session about to install its rules
    pub fn new(
        handler: Handler,
        student_id: StudentId,
        server_name: impl Into<String>,
        service_name: impl Into<String>,
        now: DateTime<Local>,
    ) -> Self {
        let installed_rule_names = rule_names(&handler).to_vec();
        Self {
            handler,
            student_id,
            server_name: server_name.into(),
            service_name: service_name.into(),
            state: SessionState::AttachmentResolved,
            installed_rule_names,
            pushed_rule_names: Vec::new(),
            opened_at: now,
        }
    }

    /// Rule installation is still in progress
    pub fn is_installing(&self) -> bool {
        self.state == SessionState::AttachmentResolved
    }

    pub fn mark_pushed(&mut self, rule_name: &str) {
        if !self.pushed_rule_names.iter().any(|n| n == rule_name) {
            self.pushed_rule_names.push(rule_name.to_string());
        }
    }

    pub fn mark_installed(&mut self) {
        self.state = SessionState::RulesInstalled;
    }

    pub fn mark_partial(&mut self) {
        self.state = SessionState::PartiallyInstalled;
    }

    pub fn is_terminating(&self) -> bool {
        self.state == SessionState::Terminating
    }

    pub fn mark_terminating(&mut self) {
        self.state = SessionState::Terminating;
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            handler: self.handler.clone(),
            student_id: self.student_id.clone(),
            server_name: self.server_name.clone(),
            service_name: self.service_name.clone(),
            state: self.state,
            installed_rule_names: self.installed_rule_names.clone(),
            pushed_rule_names: self.pushed_rule_names.clone(),
            opened_at: self.opened_at,
        }
    }
}

/// Live sessions by handler, plus every handler ever retired
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<Handler, Session>,
    retired: HashSet<Handler>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler not used by any live or retired session
    pub fn allocate_handler(&self) -> Handler {
        loop {
            let handler = Handler::generate();
            if !self.sessions.contains_key(&handler) && !self.retired.contains(&handler) {
                return handler;
            }
        }
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.handler.clone(), session);
    }

    pub fn get(&self, handler: &Handler) -> Option<&Session> {
        self.sessions.get(handler)
    }

    pub fn get_mut(&mut self, handler: &Handler) -> Option<&mut Session> {
        self.sessions.get_mut(handler)
    }

    /// Remove a session and retire its handler for good
    pub fn remove(&mut self, handler: &Handler) -> Option<Session> {
        let session = self.sessions.remove(handler)?;
        self.retired.insert(handler.clone());
        Some(session)
    }

    pub fn is_retired(&self, handler: &Handler) -> bool {
        self.retired.contains(handler)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all sessions, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.values().map(Session::info).collect();
        sessions.sort_by(|a, b| {
            a.opened_at
                .cmp(&b.opened_at)
                .then_with(|| a.handler.cmp(&b.handler))
        });
        sessions
    }

    /// Handlers of sessions that are neither installing nor being torn down
    pub fn settled_handlers(&self) -> Vec<Handler> {
        self.sessions
            .values()
            .filter(|s| !s.is_installing() && !s.is_terminating())
            .map(|s| s.handler.clone())
            .collect()
    }
}
