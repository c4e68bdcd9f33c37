use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Schedule, Student, Teacher};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Request body accepted by the ingestion endpoint.
#[derive(Debug, Serialize)]
pub struct IngestPayload<'a> {
    #[serde(rename = "estudiantes")]
    pub students: &'a [Student],
    #[serde(rename = "profesores")]
    pub teachers: &'a [Teacher],
    #[serde(rename = "horarios")]
    pub schedules: &'a [Schedule],
    pub description: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResponse {
    pub status: u16,
    /// `error` field of the response body, when the body had one.
    pub error: Option<String>,
}

impl IngestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport for one ingestion request. `Err` means the request never got a
/// response; a response with a failure status is still `Ok`.
#[allow(async_fn_in_trait)]
pub trait IngestClient {
    async fn submit(&self, payload: &IngestPayload<'_>) -> Result<IngestResponse>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

pub struct HttpIngestClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpIngestClient {
    pub fn new(url: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

impl IngestClient for HttpIngestClient {
    async fn submit(&self, payload: &IngestPayload<'_>) -> Result<IngestResponse> {
        let response = self
            .http
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read ingest response body (HTTP {}): {}", status, e);
                String::new()
            }
        };
        debug!("Ingest responded {} ({} bytes)", status, body.len());

        let error = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error);
        Ok(IngestResponse { status, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StudentStatus, ESCUELA};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one request, reply with `status` and `body`, and hand the
    /// raw request back.
    async fn one_shot_server(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/upload-tables", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let raw = read_request(&mut socket).await;
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            raw
        });
        (url, handle)
    }

    /// Serve one request whose reply promises more body bytes than it sends.
    async fn truncated_body_server(status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/upload-tables", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: 500\r\nConnection: close\r\n\r\n{{\"error\":",
                status
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        url
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if request_complete(&raw) {
                break;
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..head_end]
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case("content-length")
                    .then(|| v.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= head_end + 4 + length
    }

    fn student() -> Student {
        Student {
            student_id: "123456".into(),
            first_name: "JUAN".into(),
            last_names: "PEREZ LOPEZ".into(),
            program: "ING".into(),
            school: ESCUELA.into(),
            status: StudentStatus::Activo,
        }
    }

    #[tokio::test]
    async fn posts_json_with_api_key() {
        let (url, server) = one_shot_server("200 OK", r#"{"ok":true}"#).await;
        let client = HttpIngestClient::new(&url, "secret-key").unwrap();
        let students = [student()];
        let payload = IngestPayload {
            students: &students,
            teachers: &[],
            schedules: &[],
            description: "Importación",
        };

        let resp = client.submit(&payload).await.unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.error, None);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/upload-tables"));
        assert!(raw.to_lowercase().contains("x-api-key: secret-key"));
        let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["estudiantes"][0]["matricula"], "123456");
        assert_eq!(json["profesores"], serde_json::json!([]));
        assert_eq!(json["horarios"], serde_json::json!([]));
        assert_eq!(json["description"], "Importación");
    }

    #[tokio::test]
    async fn failure_status_carries_remote_error() {
        let (url, server) =
            one_shot_server("413 Payload Too Large", r#"{"error":"Body exceeded 4.5mb limit"}"#).await;
        let client = HttpIngestClient::new(&url, "k").unwrap();
        let payload = IngestPayload {
            students: &[],
            teachers: &[],
            schedules: &[],
            description: "",
        };
        let resp = client.submit(&payload).await.unwrap();
        server.await.unwrap();
        assert_eq!(resp.status, 413);
        assert!(!resp.is_success());
        assert_eq!(resp.error.as_deref(), Some("Body exceeded 4.5mb limit"));
    }

    #[tokio::test]
    async fn unreadable_body_keeps_status() {
        let url = truncated_body_server("500 Internal Server Error").await;
        let client = HttpIngestClient::new(&url, "k").unwrap();
        let payload = IngestPayload {
            students: &[],
            teachers: &[],
            schedules: &[],
            description: "",
        };
        let resp = client.submit(&payload).await.unwrap();
        assert_eq!(resp.status, 500);
        assert_eq!(resp.error, None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = HttpIngestClient::new(&format!("http://{}/", addr), "k").unwrap();
        let payload = IngestPayload {
            students: &[],
            teachers: &[],
            schedules: &[],
            description: "",
        };
        assert!(client.submit(&payload).await.is_err());
    }

    #[test]
    fn success_range() {
        let ok = |status| IngestResponse { status, error: None }.is_success();
        assert!(ok(200));
        assert!(ok(201));
        assert!(!ok(199));
        assert!(!ok(300));
        assert!(!ok(500));
    }
}
