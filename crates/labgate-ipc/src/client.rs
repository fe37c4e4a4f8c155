//! Client side of the labgated socket

use labgate_api::{Command, Event, Request, Response, ResponseResult};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::trace;

use crate::{IpcError, IpcResult};

/// Next non-blank line, or `ConnectionClosed` at EOF
async fn next_line(reader: &mut BufReader<OwnedReadHalf>) -> IpcResult<String> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(IpcError::ConnectionClosed);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
}

/// Request/response connection to labgated
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let (read_half, write_half) = UnixStream::connect(socket_path).await?.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send one command and wait for the matching response.
    ///
    /// Events that arrive first on a subscribed connection are skipped.
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut line = serde_json::to_string(&Request::new(request_id, command))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        loop {
            let line = next_line(&mut self.reader).await?;
            match serde_json::from_str::<Response>(&line) {
                // Undecodable requests are answered with id 0
                Ok(response) if response.request_id == request_id || response.request_id == 0 => {
                    return Ok(response);
                }
                Ok(response) => {
                    trace!(request_id = response.request_id, "Skipping stale response");
                }
                Err(e) if serde_json::from_str::<Event>(&line).is_ok() => {
                    trace!(error = %e, "Skipping event while awaiting response");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Turn this connection into an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        match self.send(Command::SubscribeEvents).await?.result {
            ResponseResult::Ok(_) => Ok(EventStream {
                reader: self.reader,
            }),
            ResponseResult::Err(e) => Err(IpcError::ServerError(e.message)),
        }
    }
}

/// Events pushed by labgated after a subscribe
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
}

impl EventStream {
    pub async fn next(&mut self) -> IpcResult<Event> {
        let line = next_line(&mut self.reader).await?;
        Ok(serde_json::from_str(&line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IpcServer, ServerMessage};
    use labgate_api::{EventPayload, ResponsePayload};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn request_response_and_events() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("labgated.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();
        let mut messages = server.take_message_receiver().await.unwrap();
        let server = Arc::new(server);

        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });

        // Answer every request with Pong or Subscribed
        let responder = server.clone();
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                if let ServerMessage::Request { client_id, request } = msg {
                    let payload = match request.command {
                        Command::SubscribeEvents => ResponsePayload::Subscribed {
                            client_id: client_id.clone(),
                        },
                        _ => ResponsePayload::Pong,
                    };
                    let _ = responder
                        .send_response(&client_id, Response::success(request.request_id, payload))
                        .await;
                }
            }
        });

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let response = client.send(Command::Ping).await.unwrap();
        assert_eq!(response.request_id, 1);
        assert!(matches!(
            response.result,
            ResponseResult::Ok(ResponsePayload::Pong)
        ));

        let mut events = IpcClient::connect(&socket_path)
            .await
            .unwrap()
            .subscribe()
            .await
            .unwrap();

        server.broadcast_event(Event::new(EventPayload::Shutdown));
        let event = events.next().await.unwrap();
        assert!(matches!(event.payload, EventPayload::Shutdown));
    }
}
