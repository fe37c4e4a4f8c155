//! NDJSON server on a Unix domain socket

use labgate_api::{
    ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, Request, Response,
};
use labgate_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Buffered events per client before it starts lagging
const EVENT_BACKLOG: usize = 100;

/// What the server hands to the service loop
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

struct Connection {
    info: ClientInfo,
    /// Serialized responses waiting for the writer task
    outbox: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

type Connections = Arc<RwLock<HashMap<ClientId, Connection>>>;

/// Accepts clients, forwards their requests and fans out events
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    connections: Connections,
    events: broadcast::Sender<Event>,
    inbox_tx: mpsc::UnboundedSender<ServerMessage>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>,
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BACKLOG);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            connections: Arc::new(RwLock::new(HashMap::new())),
            events,
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one
    pub async fn start(&mut self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");
        self.listener = Some(listener);
        Ok(())
    }

    /// The service loop's end of the request channel; yields once
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.inbox_rx.lock().await.take()
    }

    /// Accept clients until the process exits
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let uid = peer_uid(&stream);
            let client_id = ClientId::new();
            let mut info = ClientInfo::new(client_id.clone(), role_for_uid(uid));
            if let Some(uid) = uid {
                info = info.with_uid(uid);
            }
            debug!(client_id = %client_id, uid = ?uid, role = ?info.role, "Client accepted");

            self.attach(stream, client_id, info).await;
        }
    }

    async fn attach(&self, stream: UnixStream, client_id: ClientId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();

        self.connections.write().await.insert(
            client_id.clone(),
            Connection {
                info: info.clone(),
                outbox: outbox.clone(),
                subscribed: false,
            },
        );

        let _ = self.inbox_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            info,
        });

        tokio::spawn(read_requests(
            read_half,
            client_id.clone(),
            outbox,
            self.connections.clone(),
            self.inbox_tx.clone(),
        ));
        tokio::spawn(write_replies(
            write_half,
            client_id,
            outbox_rx,
            self.events.subscribe(),
            self.connections.clone(),
            self.inbox_tx.clone(),
        ));
    }

    /// Queue a response for one client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let line = serde_json::to_string(&response)?;

        let connections = self.connections.read().await;
        if let Some(conn) = connections.get(client_id) {
            conn.outbox
                .send(line)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }
        Ok(())
    }

    /// Deliver an event to every subscribed client
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let connections = self.connections.read().await;
        connections.get(client_id).map(|c| c.info.clone())
    }

    pub async fn client_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decode one line, or build the error reply for it
fn decode_request(line: &str) -> Result<Request, Response> {
    serde_json::from_str(line).map_err(|e| {
        Response::error(
            0,
            ErrorInfo::new(ErrorCode::InvalidRequest, format!("Invalid request: {}", e)),
        )
    })
}

async fn read_requests(
    read_half: OwnedReadHalf,
    client_id: ClientId,
    outbox: mpsc::UnboundedSender<String>,
    connections: Connections,
    inbox: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(client_id = %client_id, "Client closed the connection");
                break;
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Read error");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match decode_request(line) {
            Ok(request) => request,
            Err(reply) => {
                warn!(client_id = %client_id, "Undecodable request line");
                if let Ok(json) = serde_json::to_string(&reply) {
                    let _ = outbox.send(json);
                }
                continue;
            }
        };

        // Flip the subscription before the service answers, so no event
        // published after the reply is missed
        let subscribed = match request.command {
            Command::SubscribeEvents => Some(true),
            Command::UnsubscribeEvents => Some(false),
            _ => None,
        };
        if let Some(subscribed) = subscribed
            && let Some(conn) = connections.write().await.get_mut(&client_id)
        {
            conn.subscribed = subscribed;
        }

        let _ = inbox.send(ServerMessage::Request {
            client_id: client_id.clone(),
            request,
        });
    }

    // Drops the outbox sender so the writer winds down too
    connections.write().await.remove(&client_id);
}

async fn write_replies(
    mut write_half: OwnedWriteHalf,
    client_id: ClientId,
    mut outbox: mpsc::UnboundedReceiver<String>,
    mut events: broadcast::Receiver<Event>,
    connections: Connections,
    inbox: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        let line = tokio::select! {
            reply = outbox.recv() => match reply {
                Some(line) => line,
                None => break,
            },

            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client_id = %client_id, skipped, "Client lagging, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let subscribed = connections
                    .read()
                    .await
                    .get(&client_id)
                    .is_some_and(|c| c.subscribed);
                if !subscribed {
                    continue;
                }
                match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode event");
                        continue;
                    }
                }
            }
        };

        if let Err(e) = write_line(&mut write_half, line).await {
            debug!(client_id = %client_id, error = %e, "Write error");
            break;
        }
    }

    let _ = inbox.send(ServerMessage::ClientDisconnected {
        client_id: client_id.clone(),
    });
    connections.write().await.remove(&client_id);
}

async fn write_line(write_half: &mut OwnedWriteHalf, mut line: String) -> std::io::Result<()> {
    line.push('\n');
    write_half.write_all(line.as_bytes()).await
}

/// Root and the service's own user administer the roster
fn role_for_uid(uid: Option<u32>) -> ClientRole {
    match uid {
        Some(0) => ClientRole::Admin,
        Some(uid) if uid == nix::unistd::getuid().as_raw() => ClientRole::Admin,
        _ => ClientRole::Operator,
    }
}

fn peer_uid(stream: &UnixStream) -> Option<u32> {
    use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
    use std::os::unix::io::AsFd;

    getsockopt(&stream.as_fd(), PeerCredentials)
        .ok()
        .map(|cred| cred.uid())
}
