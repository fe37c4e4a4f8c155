//! labgated - The labgate background service
//!
//! This is the main entry point for the labgated service.
//! It wires together all the components:
//! - Configuration loading
//! - Roster snapshot loading
//! - Floodlight controller adapter
//! - Connection manager
//! - IPC server

mod roster_commands;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use labgate_api::{
    ClientRole, Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, Response,
    ResponsePayload, RuleFailure, API_VERSION,
};
use labgate_config::{load_config, LabgateConfig, ServiceConfig};
use labgate_core::{ConnectRequest, ConnectionError, ConnectionManager, ManagerConfig};
use labgate_floodlight::FloodlightController;
use labgate_ipc::{IpcServer, ServerMessage};
use labgate_roster::{load_snapshot, save_snapshot, Roster, SnapshotError};
use labgate_util::{default_config_path, roster_path_in, ClientId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// labgated - Campus lab network access service
#[derive(Parser, Debug)]
#[command(name = "labgated")]
#[command(about = "Grants lab network access by installing controller flow rules", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/labgate/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set LABGATE_SOCKET env var)
    #[arg(short, long, env = "LABGATE_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set LABGATE_DATA_DIR env var)
    #[arg(short, long, env = "LABGATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// State shared by every request task
#[derive(Clone)]
struct Shared {
    manager: Arc<ConnectionManager>,
    ipc: Arc<IpcServer>,
    service: Arc<ServiceConfig>,
    controller_timeout: Duration,
}

/// Main service state
struct Service {
    config: LabgateConfig,
    manager: Arc<ConnectionManager>,
    ipc: Arc<IpcServer>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let mut config = if args.config.exists() {
            let config = load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?;
            info!(config_path = %args.config.display(), "Configuration loaded");
            config
        } else {
            warn!(config_path = %args.config.display(), "No config file, using defaults");
            LabgateConfig::default()
        };

        apply_overrides(&mut config.service, args);

        std::fs::create_dir_all(&config.service.data_dir).with_context(|| {
            format!("Failed to create data directory {:?}", config.service.data_dir)
        })?;

        let roster_path = &config.service.roster_path;
        let roster = if roster_path.exists() {
            load_snapshot(roster_path)
                .with_context(|| format!("Failed to load roster from {:?}", roster_path))?
        } else {
            info!(roster_path = %roster_path.display(), "No roster snapshot, starting empty");
            Roster::new()
        };

        let controller =
            FloodlightController::new(config.controller.url.clone(), config.controller.request_timeout)
                .context("Failed to build Floodlight client")?;

        info!(
            url = %config.controller.url,
            timeout_ms = config.controller.request_timeout.as_millis() as u64,
            rollback = config.controller.rollback_partial_install,
            "Controller adapter initialized"
        );

        let manager = ConnectionManager::new(
            roster.into_shared(),
            Arc::new(controller),
            ManagerConfig::from(&config.controller),
        );

        let mut ipc = IpcServer::new(&config.service.socket_path);
        ipc.start().await.context("Failed to start IPC server")?;

        info!(socket_path = %config.service.socket_path.display(), "IPC server started");

        Ok(Self {
            config,
            manager: Arc::new(manager),
            ipc: Arc::new(ipc),
        })
    }

    async fn run(self) -> Result<()> {
        let shared = Shared {
            manager: self.manager.clone(),
            ipc: self.ipc.clone(),
            service: Arc::new(self.config.service.clone()),
            controller_timeout: self.config.controller.request_timeout,
        };

        let mut ipc_messages = self
            .ipc
            .take_message_receiver()
            .await
            .ok_or_else(|| anyhow!("IPC message receiver already taken"))?;

        // Spawn IPC accept task
        let ipc_accept = self.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        // Cancels in-flight connects on shutdown; each client gets a child
        let shutdown = CancellationToken::new();
        let mut client_tokens: HashMap<ClientId, CancellationToken> = HashMap::new();
        let tasks = TaskTracker::new();

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                Some(msg) = ipc_messages.recv() => {
                    match msg {
                        ServerMessage::Request { client_id, request } => {
                            let cancel = client_tokens
                                .entry(client_id.clone())
                                .or_insert_with(|| shutdown.child_token())
                                .clone();
                            let shared = shared.clone();

                            // Connects wait on the controller; keep the loop free
                            tasks.spawn(async move {
                                let response = if request.api_version != API_VERSION {
                                    Response::error(
                                        request.request_id,
                                        ErrorInfo::new(
                                            ErrorCode::InvalidRequest,
                                            format!(
                                                "Unsupported API version {} (expected {})",
                                                request.api_version, API_VERSION
                                            ),
                                        ),
                                    )
                                } else {
                                    handle_command(
                                        &shared,
                                        &client_id,
                                        request.request_id,
                                        request.command,
                                        cancel,
                                    )
                                    .await
                                };
                                let _ = shared.ipc.send_response(&client_id, response).await;
                            });
                        }

                        ServerMessage::ClientConnected { client_id, info } => {
                            info!(
                                client_id = %client_id,
                                role = ?info.role,
                                uid = ?info.uid,
                                "Client connected"
                            );
                            client_tokens.insert(client_id, shutdown.child_token());
                        }

                        ServerMessage::ClientDisconnected { client_id } => {
                            debug!(client_id = %client_id, "Client disconnected");
                            if let Some(token) = client_tokens.remove(&client_id) {
                                token.cancel();
                            }
                        }
                    }
                }
            }
        }

        info!("Shutting down labgated");
        // One in-flight call plus a full rollback
        let grace = self.config.controller.request_timeout * 6;
        wind_down(
            &self.manager,
            &tasks,
            &shutdown,
            self.config.service.teardown_on_shutdown,
            grace,
        )
        .await;

        self.ipc.broadcast_event(Event::new(EventPayload::Shutdown));
        // Let writers flush the shutdown event
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }
}

/// Cancel request tasks, wait for them to settle, then tear down sessions
async fn wind_down(
    manager: &ConnectionManager,
    tasks: &TaskTracker,
    shutdown: &CancellationToken,
    teardown: bool,
    grace: Duration,
) {
    shutdown.cancel();
    tasks.close();
    if tokio::time::timeout(grace, tasks.wait()).await.is_err() {
        warn!(pending = tasks.len(), "Request tasks still running at shutdown");
    }

    if teardown {
        for (handler, result) in manager.disconnect_all().await {
            match result {
                Ok(report) => {
                    info!(handler = %handler, deleted = report.deleted.len(), "Session torn down");
                }
                Err(e) => {
                    warn!(handler = %handler, error = %e, "Session teardown incomplete");
                }
            }
        }
    } else {
        let remaining = manager.session_count().await;
        if remaining > 0 {
            info!(sessions = remaining, "Leaving installed rules in place");
        }
    }
}

/// CLI flags win over the config file
fn apply_overrides(service: &mut ServiceConfig, args: &Args) {
    if let Some(socket) = &args.socket {
        service.socket_path = socket.clone();
    }

    if let Some(data_dir) = &args.data_dir {
        let old_default = roster_path_in(&service.data_dir);
        if service.roster_path == old_default {
            service.roster_path = roster_path_in(data_dir);
        }
        if service.export_path == old_default {
            service.export_path = roster_path_in(data_dir);
        }
        service.data_dir = data_dir.clone();
    }
}

async fn handle_command(
    shared: &Shared,
    client_id: &ClientId,
    request_id: u64,
    command: Command,
    cancel: CancellationToken,
) -> Response {
    let role = shared
        .ipc
        .get_client_info(client_id)
        .await
        .map(|info| info.role)
        .unwrap_or(ClientRole::Operator);

    if command.edits_roster() && !role.can_edit_roster() {
        return Response::error(
            request_id,
            ErrorInfo::new(ErrorCode::PermissionDenied, "Admin role required"),
        );
    }

    let manager = &shared.manager;

    match command {
        Command::ListStudents
        | Command::GetStudent { .. }
        | Command::ListServers
        | Command::GetServer { .. }
        | Command::ListCourses
        | Command::GetCourse { .. } => {
            let roster = manager.roster().read().await;
            match roster_commands::query(&roster, &command) {
                Ok(payload) => Response::success(request_id, payload),
                Err(e) => Response::error(request_id, ErrorInfo::new(ErrorCode::from(&e), e.to_string())),
            }
        }

        Command::ImportRoster { path } => {
            let path = path.unwrap_or_else(|| shared.service.roster_path.clone());
            match load_snapshot(&path) {
                Ok(roster) => {
                    let counts = roster.counts();
                    *manager.roster().write().await = roster;
                    info!(path = %path.display(), ?counts, "Roster imported");
                    shared
                        .ipc
                        .broadcast_event(Event::new(EventPayload::RosterChanged { counts }));
                    Response::success(request_id, ResponsePayload::RosterImported { counts })
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Roster import failed");
                    Response::error(request_id, snapshot_error(&e))
                }
            }
        }

        Command::ExportRoster { path } => {
            let path = path.unwrap_or_else(|| shared.service.export_path.clone());
            let roster = manager.roster().read().await.clone();
            match save_snapshot(&path, &roster) {
                Ok(()) => Response::success(request_id, ResponsePayload::RosterExported { path }),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Roster export failed");
                    Response::error(request_id, snapshot_error(&e))
                }
            }
        }

        command if command.edits_roster() => {
            let result = {
                let mut roster = manager.roster().write().await;
                roster_commands::edit(&mut roster, command).map(|payload| (payload, roster.counts()))
            };
            match result {
                Ok((payload, counts)) => {
                    shared
                        .ipc
                        .broadcast_event(Event::new(EventPayload::RosterChanged { counts }));
                    Response::success(request_id, payload)
                }
                Err(e) => Response::error(request_id, ErrorInfo::new(ErrorCode::from(&e), e.to_string())),
            }
        }

        Command::Authorize {
            student_id,
            server_name,
            service_name,
        } => {
            let decision = manager
                .authorize(&student_id, &server_name, &service_name)
                .await;
            let course = match decision {
                labgate_core::AuthzDecision::Granted { course } => Some(course),
                labgate_core::AuthzDecision::Denied { .. } => None,
            };
            Response::success(
                request_id,
                ResponsePayload::Authorization {
                    allowed: course.is_some(),
                    course,
                },
            )
        }

        Command::Connect {
            student_id,
            server_name,
            service_name,
        } => {
            if !role.can_connect() {
                return Response::error(
                    request_id,
                    ErrorInfo::new(ErrorCode::PermissionDenied, "Operator role required"),
                );
            }

            let request = ConnectRequest::new(student_id, server_name, service_name);
            match manager.connect_with_cancel(request, cancel).await {
                Ok(outcome) => {
                    shared.ipc.broadcast_event(Event::new(EventPayload::ConnectionOpened {
                        session: outcome.session.clone(),
                    }));
                    Response::success(
                        request_id,
                        ResponsePayload::Connected {
                            session: outcome.session,
                        },
                    )
                }
                Err(e) => {
                    if let ConnectionError::PartialInstall {
                        handler,
                        failed_rule,
                        cause,
                        rolled_back: false,
                        ..
                    } = &e
                        && let Some(session) = manager.session(handler).await
                    {
                        shared.ipc.broadcast_event(Event::new(EventPayload::ConnectionPartial {
                            session,
                            failed: RuleFailure {
                                rule_name: failed_rule.clone(),
                                error: cause.to_string(),
                            },
                        }));
                    }
                    Response::error(request_id, e.to_error_info())
                }
            }
        }

        Command::Disconnect { handler } => {
            if !role.can_connect() {
                return Response::error(
                    request_id,
                    ErrorInfo::new(ErrorCode::PermissionDenied, "Operator role required"),
                );
            }

            match manager.disconnect(&handler).await {
                Ok(report) => {
                    shared.ipc.broadcast_event(Event::new(EventPayload::ConnectionClosed {
                        handler: report.handler.clone(),
                        deleted_rules: report.deleted.clone(),
                        failed: Vec::new(),
                    }));
                    Response::success(
                        request_id,
                        ResponsePayload::Disconnected {
                            handler: report.handler,
                            deleted_rules: report.deleted,
                        },
                    )
                }
                Err(e) => {
                    if let ConnectionError::PartialTeardown {
                        handler,
                        deleted,
                        failed,
                    } = &e
                    {
                        shared.ipc.broadcast_event(Event::new(EventPayload::ConnectionClosed {
                            handler: handler.clone(),
                            deleted_rules: deleted.clone(),
                            failed: failed.clone(),
                        }));
                    }
                    Response::error(request_id, e.to_error_info())
                }
            }
        }

        Command::ListConnections => Response::success(
            request_id,
            ResponsePayload::Connections {
                sessions: manager.sessions().await,
            },
        ),

        Command::GetHealth => {
            let controller_ok = tokio::time::timeout(
                shared.controller_timeout,
                manager.controller().is_healthy(),
            )
            .await
            .unwrap_or(false);

            Response::success(
                request_id,
                ResponsePayload::Health(HealthStatus {
                    live: true,
                    ready: true,
                    controller_ok,
                    active_sessions: manager.session_count().await,
                }),
            )
        }

        Command::SubscribeEvents => Response::success(
            request_id,
            ResponsePayload::Subscribed {
                client_id: client_id.clone(),
            },
        ),

        Command::UnsubscribeEvents => Response::success(request_id, ResponsePayload::Unsubscribed),

        Command::Ping => Response::success(request_id, ResponsePayload::Pong),

        // Every roster edit is matched by the guard above
        other => Response::error(
            request_id,
            ErrorInfo::new(ErrorCode::InternalError, format!("Unhandled command: {:?}", other)),
        ),
    }
}

fn snapshot_error(err: &SnapshotError) -> ErrorInfo {
    ErrorInfo::new(ErrorCode::SnapshotError, err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "labgated starting");

    let service = Service::new(&args).await?;
    service.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use labgate_controller_api::{AttachmentPoint, MockController};
    use labgate_roster::parse_snapshot;
    use labgate_util::StudentId;
    use std::net::Ipv4Addr;

    const ROSTER: &str = r#"
students:
  - { code: 1001, name: Ana Torres, mac: "00:00:00:00:00:01" }
servers:
  - name: db1
    ip: 10.0.0.3
    services:
      - { name: ssh, protocol: TCP, port: 22 }
courses:
  - code: CS101
    title: Networks
    status: ACTIVE
    students: [1001]
    servers:
      - { name: db1, allowed_services: [ssh] }
"#;

    fn args(data_dir: Option<&str>) -> Args {
        Args {
            config: PathBuf::from("/nonexistent/config.toml"),
            socket: Some(PathBuf::from("/tmp/labgate-test.sock")),
            data_dir: data_dir.map(PathBuf::from),
            log_level: "info".into(),
        }
    }

    #[test]
    fn data_dir_override_moves_default_roster_path() {
        let mut service = ServiceConfig::default();
        apply_overrides(&mut service, &args(Some("/srv/labgate")));

        assert_eq!(service.socket_path, PathBuf::from("/tmp/labgate-test.sock"));
        assert_eq!(service.data_dir, PathBuf::from("/srv/labgate"));
        assert_eq!(service.roster_path, roster_path_in(&PathBuf::from("/srv/labgate")));
        assert_eq!(service.export_path, service.roster_path);
    }

    #[test]
    fn explicit_roster_path_survives_data_dir_override() {
        let mut service = ServiceConfig {
            roster_path: PathBuf::from("/etc/labgate/roster.yaml"),
            ..ServiceConfig::default()
        };
        apply_overrides(&mut service, &args(Some("/srv/labgate")));

        assert_eq!(service.roster_path, PathBuf::from("/etc/labgate/roster.yaml"));
    }

    #[tokio::test]
    async fn shutdown_tears_down_connects_that_were_mid_install() {
        let controller = Arc::new(MockController::new().with_attachment(
            Ipv4Addr::new(10, 0, 0, 3),
            AttachmentPoint::new("00:00:00:00:00:00:00:01", 3),
        ));
        let manager = Arc::new(ConnectionManager::new(
            parse_snapshot(ROSTER).unwrap().into_shared(),
            controller.clone(),
            ManagerConfig::default(),
        ));
        let tasks = TaskTracker::new();
        let shutdown = CancellationToken::new();
        controller.gate_calls();

        let connecting = manager.clone();
        let cancel = shutdown.child_token();
        tasks.spawn(async move {
            let request = ConnectRequest::new(StudentId::from(1001), "db1", "ssh");
            let _ = connecting.connect_with_cancel(request, cancel).await;
        });

        // resolve and fw answer; bw is in flight when shutdown starts
        controller.release_calls(2);
        while controller.waiting_calls() == 0 || controller.pushed_rule_names().is_empty() {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        controller.release_calls(16);

        wind_down(&manager, &tasks, &shutdown, true, Duration::from_secs(5)).await;

        assert_eq!(controller.pushed_rule_names().len(), 2);
        assert!(controller.installed_rule_names().is_empty());
        assert_eq!(manager.session_count().await, 0);
    }
}
