//! Connection manager

use labgate_api::{ErrorCode, ErrorInfo, RuleFailure, SessionInfo, SessionState};
use labgate_config::ControllerConfig;
use labgate_controller_api::{
    AttachmentPoint, Controller, ControllerError, ControllerResult, FlowRule,
};
use labgate_roster::{RecordKind, RosterError, SharedRoster};
use labgate_util::{Handler, MacAddress, StudentId};
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{authorize, build_flows, AuthzDecision, FlowRequest, Session, SessionTable};

/// Manager tunables
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Upper bound on every controller call
    pub controller_timeout: Duration,
    /// Delete already-pushed rules when an install stops part way
    pub rollback_partial_install: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            controller_timeout: Duration::from_secs(5),
            rollback_partial_install: false,
        }
    }
}

impl From<&ControllerConfig> for ManagerConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            controller_timeout: config.request_timeout,
            rollback_partial_install: config.rollback_partial_install,
        }
    }
}

/// A request to open a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub student_id: StudentId,
    pub server_name: String,
    pub service_name: String,
}

impl ConnectRequest {
    pub fn new(
        student_id: StudentId,
        server_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            student_id,
            server_name: server_name.into(),
            service_name: service_name.into(),
        }
    }
}

/// A connection with all four rules installed
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub session: SessionInfo,
    /// Course whose grant allowed the connection
    pub course: String,
    pub attachment: AttachmentPoint,
}

/// A fully removed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub handler: Handler,
    pub deleted: Vec<String>,
}

/// Connection errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Student {student_id} may not reach {service_name} on {server_name}")]
    AccessDenied {
        student_id: StudentId,
        server_name: String,
        service_name: String,
    },

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error("No session with handler {0}")]
    SessionNotFound(Handler),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Server {server_name} ({address}) has no known attachment point")]
    AttachmentUnresolved {
        server_name: String,
        address: Ipv4Addr,
    },

    #[error("{0}")]
    ControllerUnreachable(ControllerError),

    #[error("Session {handler}: rule {failed_rule} failed after {count} of 4 rules: {cause}", count = .pushed.len())]
    PartialInstall {
        handler: Handler,
        pushed: Vec<String>,
        failed_rule: String,
        cause: ControllerError,
        /// Pushed rules were deleted again and the session dropped
        rolled_back: bool,
    },

    #[error("Session {handler}: {count} of 4 rules could not be deleted", count = .failed.len())]
    PartialTeardown {
        handler: Handler,
        deleted: Vec<String>,
        failed: Vec<RuleFailure>,
    },

    #[error("Connection cancelled")]
    Cancelled {
        /// Set when a partially installed session was left behind
        handler: Option<Handler>,
    },
}

impl ConnectionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConnectionError::AccessDenied { .. } => ErrorCode::AccessDenied,
            ConnectionError::Roster(e) => ErrorCode::from(e),
            ConnectionError::SessionNotFound(_) => ErrorCode::NotFound,
            ConnectionError::InvalidInput(_) => ErrorCode::InvalidInput,
            ConnectionError::AttachmentUnresolved { .. } => ErrorCode::AttachmentUnresolved,
            ConnectionError::ControllerUnreachable(_) => ErrorCode::ControllerUnreachable,
            ConnectionError::PartialInstall { .. } => ErrorCode::PartialInstall,
            ConnectionError::PartialTeardown { .. } => ErrorCode::PartialTeardown,
            ConnectionError::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }

    /// Wire form, with the session and per-rule failures attached
    pub fn to_error_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.code(), self.to_string());
        match self {
            ConnectionError::PartialInstall {
                handler,
                failed_rule,
                cause,
                rolled_back,
                ..
            } => {
                let info = info.with_failures(vec![RuleFailure {
                    rule_name: failed_rule.clone(),
                    error: cause.to_string(),
                }]);
                if *rolled_back {
                    info
                } else {
                    info.with_handler(handler.clone())
                }
            }
            ConnectionError::PartialTeardown {
                handler, failed, ..
            } => info.with_handler(handler.clone()).with_failures(failed.clone()),
            ConnectionError::Cancelled {
                handler: Some(handler),
            } => info.with_handler(handler.clone()),
            _ => info,
        }
    }
}

/// Roster data copied out under the read lock
struct Target {
    course: String,
    server_name: String,
    service_name: String,
    address: Ipv4Addr,
    port: u16,
    mac: MacAddress,
}

/// Drives connections from request to installed rules and back.
///
/// The roster lock and the session table lock are never held across a
/// controller call.
pub struct ConnectionManager {
    roster: SharedRoster,
    controller: Arc<dyn Controller>,
    sessions: Mutex<SessionTable>,
    config: ManagerConfig,
}

impl ConnectionManager {
    pub fn new(roster: SharedRoster, controller: Arc<dyn Controller>, config: ManagerConfig) -> Self {
        info!(
            timeout_ms = config.controller_timeout.as_millis() as u64,
            rollback = config.rollback_partial_install,
            "Connection manager initialized"
        );
        Self {
            roster,
            controller,
            sessions: Mutex::new(SessionTable::new()),
            config,
        }
    }

    pub fn roster(&self) -> &SharedRoster {
        &self.roster
    }

    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    /// Authorization check without side effects
    pub async fn authorize(
        &self,
        student_id: &StudentId,
        server_name: &str,
        service_name: &str,
    ) -> AuthzDecision {
        let roster = self.roster.read().await;
        authorize(&roster, student_id, server_name, service_name)
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<ConnectOutcome, ConnectionError> {
        self.connect_with_cancel(request, CancellationToken::new()).await
    }

    /// Open a connection, stopping early if `cancel` fires.
    ///
    /// Cancellation is honored before and during the attachment lookup, and
    /// between rule pushes; a push already sent is never abandoned.
    pub async fn connect_with_cancel(
        &self,
        request: ConnectRequest,
        cancel: CancellationToken,
    ) -> Result<ConnectOutcome, ConnectionError> {
        debug!(
            student_id = %request.student_id,
            server = %request.server_name,
            service = %request.service_name,
            state = %SessionState::Requested,
            "Connection requested"
        );

        let target = self.resolve_target(&request).await?;
        debug!(
            student_id = %request.student_id,
            course = %target.course,
            state = %SessionState::Authorized,
            "Connection authorized"
        );

        if cancel.is_cancelled() {
            return Err(ConnectionError::Cancelled { handler: None });
        }

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConnectionError::Cancelled { handler: None }),
            result = self.call(self.controller.resolve_attachment(target.address)) => result,
        };
        let attachment = resolved.map_err(|e| {
            if e.is_unreachable() {
                return ConnectionError::ControllerUnreachable(e);
            }
            warn!(server = %target.server_name, error = %e, "Attachment lookup failed");
            ConnectionError::AttachmentUnresolved {
                server_name: target.server_name.clone(),
                address: target.address,
            }
        })?;

        let handler = {
            let mut table = self.sessions.lock().await;
            let handler = table.allocate_handler();
            table.insert(Session::new(
                handler.clone(),
                request.student_id.clone(),
                &target.server_name,
                &target.service_name,
                labgate_util::now(),
            ));
            handler
        };
        info!(
            handler = %handler,
            student_id = %request.student_id,
            server = %target.server_name,
            service = %target.service_name,
            attachment = %attachment,
            state = %SessionState::AttachmentResolved,
            "Installing connection rules"
        );

        let rules = build_flows(&FlowRequest {
            handler: handler.clone(),
            attachment: attachment.clone(),
            student_mac: target.mac,
            server_address: target.address,
            service_port: target.port,
        });
        self.install(&handler, &rules, &cancel).await?;

        let session = {
            let mut table = self.sessions.lock().await;
            let session = table
                .get_mut(&handler)
                .ok_or_else(|| ConnectionError::SessionNotFound(handler.clone()))?;
            session.mark_installed();
            session.info()
        };
        info!(handler = %handler, state = %session.state, "Connection open");

        Ok(ConnectOutcome {
            session,
            course: target.course,
            attachment,
        })
    }

    /// Authorize and copy out everything the rules need, under one read lock
    async fn resolve_target(&self, request: &ConnectRequest) -> Result<Target, ConnectionError> {
        let roster = self.roster.read().await;

        let course = match authorize(
            &roster,
            &request.student_id,
            &request.server_name,
            &request.service_name,
        ) {
            AuthzDecision::Granted { course } => course,
            AuthzDecision::Denied {
                student_id,
                server_name,
                service_name,
            } => {
                info!(
                    student_id = %student_id,
                    server = %server_name,
                    service = %service_name,
                    "Connection denied"
                );
                return Err(ConnectionError::AccessDenied {
                    student_id,
                    server_name,
                    service_name,
                });
            }
        };

        let student = roster.student(&request.student_id)?;
        let server = roster.server(&request.server_name)?;
        let service = server.service(&request.service_name).ok_or_else(|| {
            RosterError::not_found(
                RecordKind::Service,
                format!("{}/{}", server.name, request.service_name),
            )
        })?;

        Ok(Target {
            course,
            server_name: server.name.clone(),
            service_name: service.name.clone(),
            address: server.address,
            port: service.port,
            mac: student.hardware_address,
        })
    }

    /// Push the rules in order, recording each confirmed push
    async fn install(
        &self,
        handler: &Handler,
        rules: &[FlowRule],
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        let mut pushed: Vec<String> = Vec::with_capacity(rules.len());

        for rule in rules {
            if pushed.is_empty() && cancel.is_cancelled() {
                self.sessions.lock().await.remove(handler);
                debug!(handler = %handler, "Connection cancelled before install");
                return Err(ConnectionError::Cancelled { handler: None });
            }
            if cancel.is_cancelled() {
                warn!(handler = %handler, pushed = pushed.len(), "Connection cancelled during install");
                let rolled_back = self.settle_partial(handler, &pushed).await;
                return Err(ConnectionError::Cancelled {
                    handler: (!rolled_back).then(|| handler.clone()),
                });
            }

            match self.call(self.controller.push_rule(rule)).await {
                Ok(()) => {
                    pushed.push(rule.name.clone());
                    if let Some(session) = self.sessions.lock().await.get_mut(handler) {
                        session.mark_pushed(&rule.name);
                    }
                }
                Err(cause) => {
                    warn!(
                        handler = %handler,
                        rule = %rule.name,
                        pushed = pushed.len(),
                        error = %cause,
                        "Rule install failed"
                    );
                    // Unless refused outright, the failed push may have landed
                    let mut undo = pushed.clone();
                    if !matches!(cause, ControllerError::Rejected { .. }) {
                        undo.push(rule.name.clone());
                    }
                    let rolled_back = self.settle_partial(handler, &undo).await;
                    return Err(ConnectionError::PartialInstall {
                        handler: handler.clone(),
                        pushed,
                        failed_rule: rule.name.clone(),
                        cause,
                        rolled_back,
                    });
                }
            }
        }

        Ok(())
    }

    /// Leave a stopped install in a settled state.
    ///
    /// Returns true when every name in `undo` was deleted again and the
    /// session dropped; otherwise the session stays as `PartiallyInstalled`.
    async fn settle_partial(&self, handler: &Handler, undo: &[String]) -> bool {
        if !self.config.rollback_partial_install {
            if let Some(session) = self.sessions.lock().await.get_mut(handler) {
                session.mark_partial();
            }
            return false;
        }

        let mut remaining = Vec::new();
        for name in undo {
            if let Err(e) = self.call(self.controller.delete_rule(name)).await {
                warn!(handler = %handler, rule = %name, error = %e, "Rollback delete failed");
                remaining.push(name.clone());
            }
        }

        let mut table = self.sessions.lock().await;
        if remaining.is_empty() {
            table.remove(handler);
            info!(handler = %handler, "Partial install rolled back");
            return true;
        }
        if let Some(session) = table.get_mut(handler) {
            session.pushed_rule_names = remaining;
            session.mark_partial();
        }
        false
    }

    /// Tear down a connection.
    ///
    /// The session stays listed as `Terminating` while all four rule names
    /// are deleted independently. It is then dropped and its handler retired,
    /// even when some deletions fail.
    pub async fn disconnect(&self, handler: &Handler) -> Result<TeardownReport, ConnectionError> {
        let (student_id, names) = {
            let mut table = self.sessions.lock().await;
            let session = table
                .get_mut(handler)
                .ok_or_else(|| ConnectionError::SessionNotFound(handler.clone()))?;
            if session.is_installing() {
                return Err(ConnectionError::InvalidInput(format!(
                    "session {} is still installing its rules",
                    handler
                )));
            }
            if session.is_terminating() {
                return Err(ConnectionError::InvalidInput(format!(
                    "session {} is already being torn down",
                    handler
                )));
            }
            session.mark_terminating();
            (session.student_id.clone(), session.installed_rule_names.clone())
        };
        debug!(handler = %handler, state = %SessionState::Terminating, "Deleting connection rules");

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for name in &names {
            match self.call(self.controller.delete_rule(name)).await {
                Ok(()) => deleted.push(name.clone()),
                Err(e) => {
                    warn!(handler = %handler, rule = %name, error = %e, "Rule delete failed");
                    failed.push(RuleFailure {
                        rule_name: name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.sessions.lock().await.remove(handler);

        if !failed.is_empty() {
            return Err(ConnectionError::PartialTeardown {
                handler: handler.clone(),
                deleted,
                failed,
            });
        }

        info!(
            handler = %handler,
            student_id = %student_id,
            state = %SessionState::Terminated,
            "Connection closed"
        );
        Ok(TeardownReport {
            handler: handler.clone(),
            deleted,
        })
    }

    /// Disconnect every session that is not mid-install or mid-teardown
    pub async fn disconnect_all(&self) -> Vec<(Handler, Result<TeardownReport, ConnectionError>)> {
        let handlers = self.sessions.lock().await.settled_handlers();
        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let result = self.disconnect(&handler).await;
            results.push((handler, result));
        }
        results
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.lock().await.list()
    }

    pub async fn session(&self, handler: &Handler) -> Option<SessionInfo> {
        self.sessions.lock().await.get(handler).map(Session::info)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn call<T>(&self, call: impl Future<Output = ControllerResult<T>>) -> ControllerResult<T> {
        let limit = self.config.controller_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(ControllerError::Timeout(limit)))
    }
}
