//! ServiceConnector - Management Server Communication
//!
//! ## Responsibilities
//!
//! - Send alert payloads to the management server
//! - Health check against the management server
//! - Lazy, shared HTTP client with connection reuse
//!
//! Delivery is strictly best-effort single-attempt: a false return means
//! "alert not delivered, not retried".

use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;

/// Outbound request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Alert categories understood by the management server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Visual,
    Audio,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Visual => write!(f, "VISUAL"),
            AlertKind::Audio => write!(f, "AUDIO"),
        }
    }
}

/// Wire payload for POST /api/v1/alerts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub camera_id: String,
    pub alert_type: AlertKind,
    pub description: String,
    pub image_base64: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

/// Async HTTP client for the management server
pub struct ServiceConnector {
    backend_url: String,
    api_key: String,
    client: RwLock<Option<reqwest::Client>>,
}

impl ServiceConnector {
    pub fn new(backend_url: String, api_key: String) -> Self {
        Self {
            backend_url,
            api_key,
            client: RwLock::new(None),
        }
    }

    /// Get or lazily create the shared client. Check-lock-check on the
    /// async lock so concurrent first use builds a single client.
    async fn client(&self) -> Result<reqwest::Client> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }

        let mut slot = self.client.write().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-API-KEY",
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| Error::Config("API key is not a valid header value".to_string()))?,
        );

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        *slot = Some(client.clone());
        Ok(client)
    }

    /// Send an alert to the management server.
    ///
    /// Returns true only on HTTP 200/201. Network errors and non-2xx
    /// responses are logged and produce false; there is no retry.
    pub async fn send_alert(
        &self,
        camera_id: &str,
        alert_type: AlertKind,
        description: &str,
        image_base64: &str,
        timestamp: Option<i64>,
    ) -> bool {
        let payload = AlertPayload {
            camera_id: camera_id.to_string(),
            alert_type,
            description: description.to_string(),
            image_base64: image_base64.to_string(),
            timestamp: timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        };

        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create HTTP client");
                return false;
            }
        };

        let url = format!("{}/api/v1/alerts", self.backend_url);
        match client.post(&url).json(&payload).send().await {
            Ok(resp) if matches!(resp.status().as_u16(), 200 | 201) => {
                tracing::info!(
                    camera_id = %camera_id,
                    alert_type = %alert_type,
                    "Alert sent successfully"
                );
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    camera_id = %camera_id,
                    status = %status,
                    body = %body,
                    "Failed to send alert"
                );
                false
            }
            Err(e) => {
                tracing::error!(camera_id = %camera_id, error = %e, "Network error sending alert");
                false
            }
        }
    }

    /// True iff the management server answers 200 on its health endpoint.
    /// Any failure is treated as unhealthy.
    pub async fn health_check(&self) -> bool {
        let client = match self.client().await {
            Ok(client) => client,
            Err(_) => return false,
        };

        let url = format!("{}/actuator/health", self.backend_url);
        match client.get(&url).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }

    /// Release the shared client. Safe when none was ever created.
    pub async fn close(&self) {
        *self.client.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::Router;
    use std::sync::Arc;

    #[test]
    fn test_alert_payload_wire_format() {
        let payload = AlertPayload {
            camera_id: "cam-1".to_string(),
            alert_type: AlertKind::Visual,
            description: "Person detected with 87.0% confidence".to_string(),
            image_base64: "Zm9v".to_string(),
            timestamp: 1_700_000_000_000,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["cameraId"], "cam-1");
        assert_eq!(json["alertType"], "VISUAL");
        assert_eq!(json["imageBase64"], "Zm9v");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_audio_kind_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&AlertKind::Audio).unwrap(),
            "\"AUDIO\""
        );
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_send_alert_against_unavailable_backend() {
        let router = Router::new().route(
            "/api/v1/alerts",
            post(|| async { axum::http::StatusCode::SERVICE_UNAVAILABLE }),
        );
        let base = serve(router).await;

        let connector = ServiceConnector::new(base, "test-key".to_string());
        let sent = connector
            .send_alert("cam-1", AlertKind::Visual, "test", "", None)
            .await;
        assert!(!sent);
        assert!(!connector.health_check().await);
        connector.close().await;
    }

    #[tokio::test]
    async fn test_send_alert_success_and_health() {
        let router = Router::new()
            .route(
                "/api/v1/alerts",
                post(|| async { axum::http::StatusCode::CREATED }),
            )
            .route("/actuator/health", get(|| async { "OK" }));
        let base = serve(router).await;

        let connector = ServiceConnector::new(base, "test-key".to_string());
        assert!(
            connector
                .send_alert("cam-1", AlertKind::Audio, "loud", "", Some(123))
                .await
        );
        assert!(connector.health_check().await);
    }

    #[tokio::test]
    async fn test_send_alert_network_error_returns_false() {
        // Nothing listens on this port
        let connector =
            ServiceConnector::new("http://127.0.0.1:1".to_string(), "test-key".to_string());
        assert!(
            !connector
                .send_alert("cam-1", AlertKind::Visual, "test", "", None)
                .await
        );
    }

    #[tokio::test]
    async fn test_close_without_client_is_safe() {
        let connector = ServiceConnector::new(
            "http://localhost:9999".to_string(),
            "test-key".to_string(),
        );
        connector.close().await;
        connector.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_first_use_shares_client() {
        let connector = Arc::new(ServiceConnector::new(
            "http://127.0.0.1:1".to_string(),
            "test-key".to_string(),
        ));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let connector = connector.clone();
                tokio::spawn(async move { connector.health_check().await })
            })
            .collect();
        for task in tasks {
            assert!(!task.await.unwrap());
        }

        assert!(connector.client.read().await.is_some());
    }
}
