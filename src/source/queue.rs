use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::QueueSource;
use crate::config::QueueConfig;
use crate::error::{SourceError, SourceResult};

/// Percent-encode one URL path segment (vhost `/` becomes `%2F`).
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct QueueInfo {
    messages: Option<u64>,
}

/// Passive queue depth lookup through the broker's management API.
///
/// Only issues GETs, so a missing queue is reported rather than declared.
#[derive(Debug, Clone)]
pub struct RabbitMqQueue {
    client: Client,
    url: String,
    user: String,
    password: String,
    queue: String,
    timeout_ms: u64,
}

impl RabbitMqQueue {
    pub fn new(config: &QueueConfig) -> SourceResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SourceError::ConnectionFailed {
                endpoint: config.base_url(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: format!(
                "{}/api/queues/{}/{}",
                config.base_url(),
                encode_segment(&config.vhost),
                encode_segment(&config.name)
            ),
            user: config.user.clone(),
            password: config.password.clone(),
            queue: config.name.clone(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl QueueSource for RabbitMqQueue {
    async fn depth(&self) -> SourceResult<u64> {
        let response = self
            .client
            .get(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(&self.url, self.timeout_ms, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(SourceError::QueueNotFound {
                    queue: self.queue.clone(),
                })
            }
            status if !status.is_success() => {
                return Err(SourceError::HttpStatus {
                    endpoint: self.url.clone(),
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let info: QueueInfo = response.json().await.map_err(|e| SourceError::InvalidResponse {
            endpoint: self.url.clone(),
            message: e.to_string(),
        })?;

        // Freshly declared queues report no message stats yet
        info.messages.ok_or_else(|| SourceError::InvalidResponse {
            endpoint: self.url.clone(),
            message: "queue statistics not available".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("/"), "%2F");
        assert_eq!(encode_segment("logs"), "logs");
        assert_eq!(encode_segment("my vhost"), "my%20vhost");
    }

    async fn queue_handler(Path((vhost, name)): Path<(String, String)>) -> axum::response::Response {
        match (vhost.as_str(), name.as_str()) {
            ("/", "logs") => Json(json!({"name": "logs", "messages": 1234})).into_response(),
            ("/", "fresh") => Json(json!({"name": "fresh"})).into_response(),
            _ => AxumStatus::NOT_FOUND.into_response(),
        }
    }

    async fn broker() -> QueueConfig {
        let app = Router::new().route("/api/queues/:vhost/:name", get(queue_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        QueueConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..QueueConfig::default()
        }
    }

    #[tokio::test]
    async fn test_depth_reads_messages() {
        let queue = RabbitMqQueue::new(&broker().await).unwrap();
        assert_eq!(queue.depth().await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn test_missing_queue_is_not_created() {
        let config = QueueConfig {
            name: "absent".into(),
            ..broker().await
        };
        let err = RabbitMqQueue::new(&config).unwrap().depth().await.unwrap_err();
        assert!(matches!(err, SourceError::QueueNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_stats_are_unknown() {
        let config = QueueConfig {
            name: "fresh".into(),
            ..broker().await
        };
        let err = RabbitMqQueue::new(&config).unwrap().depth().await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse { .. }));
    }
}
