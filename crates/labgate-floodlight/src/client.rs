//! Floodlight REST client

use async_trait::async_trait;
use labgate_controller_api::{
    AttachmentPoint, Controller, ControllerError, ControllerResult, FlowRule,
};
use reqwest::{Client, Response};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::attachment_from_devices;

const DEVICE_PATH: &str = "/wm/device/";
const STATIC_FLOW_PATH: &str = "/wm/staticflowpusher/json";
const HEALTH_PATH: &str = "/wm/core/health/json";

/// Controller adapter speaking the Floodlight REST API
#[derive(Debug, Clone)]
pub struct FloodlightController {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl FloodlightController {
    /// Create a client for the controller at `base_url`, e.g. `http://192.168.200.200:8080`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, err: reqwest::Error) -> ControllerError {
        if err.is_timeout() {
            ControllerError::Timeout(self.timeout)
        } else if err.is_decode() {
            ControllerError::Protocol(err.to_string())
        } else {
            ControllerError::Unreachable(err.to_string())
        }
    }

    /// Turn a non-2xx answer into `Rejected`
    async fn check_status(&self, response: Response) -> ControllerResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ControllerError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Controller for FloodlightController {
    async fn resolve_attachment(&self, address: Ipv4Addr) -> ControllerResult<AttachmentPoint> {
        let response = self
            .client
            .get(self.url(DEVICE_PATH))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = self.check_status(response).await?;
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;

        let point = attachment_from_devices(&body, address)?;
        debug!(address = %address, attachment = %point, "Attachment point resolved");
        Ok(point)
    }

    async fn push_rule(&self, rule: &FlowRule) -> ControllerResult<()> {
        let response = self
            .client
            .post(self.url(STATIC_FLOW_PATH))
            .json(&rule.to_static_flow())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check_status(response).await?;

        debug!(rule = %rule.name, switch = %rule.switch_id, "Rule pushed");
        Ok(())
    }

    async fn delete_rule(&self, name: &str) -> ControllerResult<()> {
        let response = self
            .client
            .delete(self.url(STATIC_FLOW_PATH))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.check_status(response).await?;

        debug!(rule = %name, "Rule deleted");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        match self.client.get(self.url(HEALTH_PATH)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, url = %self.base_url, "Controller health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labgate_controller_api::{FlowKind, FlowMatch};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer one HTTP request with a canned response, returning the raw request
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];

            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    fn controller(url: &str) -> FloodlightController {
        FloodlightController::new(url, Duration::from_secs(2)).unwrap()
    }

    fn rule() -> FlowRule {
        FlowRule {
            name: "cafe0001_fw".into(),
            kind: FlowKind::Forward,
            switch_id: "00:00:00:00:00:00:00:01".into(),
            flow_match: FlowMatch::Ipv4Tcp {
                src: Ipv4Addr::new(10, 0, 0, 3),
                dst: Ipv4Addr::new(10, 0, 0, 3),
                tcp_dst: 22,
            },
            out_port: 3,
            priority: 32768,
            active: true,
        }
    }

    #[tokio::test]
    async fn resolve_over_http() {
        let (url, server) = serve_once(
            "200 OK",
            r#"[{"ipv4":["10.0.0.3"],"attachmentPoint":[{"switchDPID":"00:00:00:00:00:00:00:01","port":3}]}]"#,
        )
        .await;

        let point = controller(&url)
            .resolve_attachment(Ipv4Addr::new(10, 0, 0, 3))
            .await
            .unwrap();
        assert_eq!(point.port, 3);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /wm/device/ HTTP/1.1"));
    }

    #[tokio::test]
    async fn push_posts_static_flow() {
        let (url, server) = serve_once("200 OK", r#"{"status":"Entry pushed"}"#).await;

        controller(&url).push_rule(&rule()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /wm/staticflowpusher/json HTTP/1.1"));
        assert!(request.contains(r#""name":"cafe0001_fw""#));
        assert!(request.contains(r#""actions":"output=3""#));
    }

    #[tokio::test]
    async fn delete_sends_name() {
        let (url, server) = serve_once("200 OK", r#"{"status":"Entry cafe0001_bw deleted"}"#).await;

        controller(&url).delete_rule("cafe0001_bw").await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("DELETE /wm/staticflowpusher/json HTTP/1.1"));
        assert!(request.ends_with(r#"{"name":"cafe0001_bw"}"#));
    }

    #[tokio::test]
    async fn non_success_is_rejected() {
        let (url, server) = serve_once("400 Bad Request", r#"{"status":"bad switch"}"#).await;

        let result = controller(&url).push_rule(&rule()).await;
        match result {
            Err(ControllerError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("bad switch"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let controller = controller(&url);
        let result = controller.resolve_attachment(Ipv4Addr::new(10, 0, 0, 3)).await;
        assert!(matches!(result, Err(ControllerError::Unreachable(_))));
        assert!(!controller.is_healthy().await);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let controller = controller("http://192.168.200.200:8080/");
        assert_eq!(controller.base_url(), "http://192.168.200.200:8080");
    }
}
