use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;
use crate::model::{
    ActionKind, BulkSummary, ContainerDetail, ContainerHealth, ContainerSnapshot, ContainerStats,
    HostHealth, ManagedService, OverviewPayload, ProcessInfo, ServicesPayload, SystemInfoPayload,
    TargetOutcome,
};

/// REST surface of the host control service.
#[async_trait]
pub trait HostApi: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, ApiError>;

    async fn containers_overview(&self) -> Result<OverviewPayload, ApiError>;

    async fn container_detail(&self, id: &str) -> Result<ContainerDetail, ApiError>;

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, ApiError>;

    async fn container_health(&self, id: &str) -> Result<ContainerHealth, ApiError>;

    /// Oldest line first.
    async fn container_logs(&self, id: &str, lines: usize) -> Result<Vec<String>, ApiError>;

    async fn container_action(
        &self,
        id: &str,
        kind: ActionKind,
        graceful_timeout: Option<Duration>,
    ) -> Result<String, ApiError>;

    async fn bulk_action(
        &self,
        kind: ActionKind,
        targets: &[String],
        graceful_timeout: Option<Duration>,
    ) -> Result<BulkSummary, ApiError>;

    async fn system_info(&self) -> Result<SystemInfoPayload, ApiError>;

    async fn system_metrics(&self) -> Result<SystemInfoPayload, ApiError>;

    async fn system_processes(&self) -> Result<Vec<ProcessInfo>, ApiError>;

    async fn services(&self) -> Result<Vec<ManagedService>, ApiError>;

    /// Liveness of the control service and the components behind it.
    async fn health(&self) -> Result<HostHealth, ApiError>;
}

/// HTTP client for the host control service.
pub struct HostClient {
    client: Client,
    base_url: String,
    /// Server root; `/health` lives here rather than under the API prefix.
    root_url: String,
}

impl HostClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Url(e.to_string()))?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let root_url = base_url.strip_suffix("/api").unwrap_or(&base_url).to_string();
        Ok(Self {
            client,
            base_url,
            root_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        self.get_json_at(self.url(path), path).await
    }

    async fn get_json_at(&self, url: String, path: &str) -> Result<Value, ApiError> {
        debug!(path, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| transport_error(path, source))?;
        read_body(path, response).await
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, ApiError> {
        debug!(path, "POST");
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|source| transport_error(path, source))?;
        read_body(path, response).await
    }

    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let body = self.get_json(path).await?;
        decode_envelope(path, body)
    }
}

fn transport_error(path: &str, source: reqwest::Error) -> ApiError {
    if source.is_timeout() {
        ApiError::Timeout {
            path: path.to_string(),
            after: Duration::ZERO,
        }
    } else {
        ApiError::Transport {
            path: path.to_string(),
            source,
        }
    }
}

async fn read_body(path: &str, response: reqwest::Response) -> Result<Value, ApiError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|source| transport_error(path, source))?;

    if !status.is_success() {
        // Prefer the host's own error message when the body is an envelope.
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| envelope_message(&v))
            .unwrap_or(text);
        return Err(ApiError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            body: message,
        });
    }

    serde_json::from_str(&text).map_err(|e| ApiError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn envelope_message(body: &Value) -> Option<String> {
    body.get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// True when the envelope carries a failed discriminator.
fn envelope_failed(body: &Value) -> bool {
    if let Some(success) = body.get("success") {
        return !success.as_bool().unwrap_or(false);
    }
    match body.get("status").and_then(Value::as_str) {
        Some(status) => matches!(status.to_lowercase().as_str(), "error" | "failed" | "failure"),
        None => false,
    }
}

/// Check the `success`/`status` discriminator, then decode `data` (or the
/// whole body when there is no `data` field).
pub(crate) fn decode_envelope<T: DeserializeOwned>(path: &str, body: Value) -> Result<T, ApiError> {
    if envelope_failed(&body) {
        return Err(ApiError::Application {
            path: path.to_string(),
            message: envelope_message(&body).unwrap_or_else(|| "operation failed".to_string()),
        });
    }
    let data = match body {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(data).map_err(|e| ApiError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogsPayload {
    Lines(Vec<String>),
    Wrapped { logs: Vec<String> },
}

#[derive(Serialize)]
struct ActionBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
}

#[derive(Serialize)]
struct BulkBody<'a> {
    containers: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    results: HashMap<String, BulkTargetResult>,
}

#[derive(Deserialize)]
struct BulkTargetResult {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl HostApi for HostClient {
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, ApiError> {
        self.get_data("/containers").await
    }

    async fn containers_overview(&self) -> Result<OverviewPayload, ApiError> {
        self.get_data("/containers/overview").await
    }

    async fn container_detail(&self, id: &str) -> Result<ContainerDetail, ApiError> {
        self.get_data(&format!("/containers/{}", id)).await
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, ApiError> {
        self.get_data(&format!("/containers/{}/stats", id)).await
    }

    async fn container_health(&self, id: &str) -> Result<ContainerHealth, ApiError> {
        self.get_data(&format!("/containers/{}/health", id)).await
    }

    async fn container_logs(&self, id: &str, lines: usize) -> Result<Vec<String>, ApiError> {
        let path = format!("/containers/{}/logs?lines={}", id, lines);
        let payload: LogsPayload = self.get_data(&path).await?;
        Ok(match payload {
            LogsPayload::Lines(lines) => lines,
            LogsPayload::Wrapped { logs } => logs,
        })
    }

    async fn container_action(
        &self,
        id: &str,
        kind: ActionKind,
        graceful_timeout: Option<Duration>,
    ) -> Result<String, ApiError> {
        let path = format!("/containers/{}/{}", id, kind.as_str());
        let body = ActionBody {
            timeout: match kind {
                ActionKind::Start => None,
                ActionKind::Stop | ActionKind::Restart => graceful_timeout.map(|d| d.as_secs()),
            },
        };
        let response = self.post_json(&path, &body).await?;
        if envelope_failed(&response) {
            return Err(ApiError::Application {
                path,
                message: envelope_message(&response).unwrap_or_else(|| format!("failed to {} {}", kind, id)),
            });
        }
        Ok(envelope_message(&response).unwrap_or_else(|| format!("{} {} ok", kind, id)))
    }

    async fn bulk_action(
        &self,
        kind: ActionKind,
        targets: &[String],
        graceful_timeout: Option<Duration>,
    ) -> Result<BulkSummary, ApiError> {
        let path = format!("/containers/bulk/{}", kind.as_str());
        let body = BulkBody {
            containers: targets,
            timeout: graceful_timeout.map(|d| d.as_secs()),
        };
        let response = self.post_json(&path, &body).await?;

        // Overall `success` is false on any partial failure; only a missing
        // results table means the whole request failed.
        if response.get("results").is_none() {
            return Err(ApiError::Application {
                path,
                message: envelope_message(&response).unwrap_or_else(|| "bulk action failed".to_string()),
            });
        }
        let mut parsed: BulkResponse = serde_json::from_value(response).map_err(|e| ApiError::Decode {
            path: path.clone(),
            message: e.to_string(),
        })?;

        let results = targets
            .iter()
            .map(|target| match parsed.results.remove(target) {
                Some(r) => TargetOutcome {
                    target: target.clone(),
                    success: r.success,
                    message: r.error.or(r.message).unwrap_or_default(),
                },
                None => TargetOutcome {
                    target: target.clone(),
                    success: false,
                    message: "no result reported".to_string(),
                },
            })
            .collect();
        Ok(BulkSummary::from_outcomes(kind, results))
    }

    async fn system_info(&self) -> Result<SystemInfoPayload, ApiError> {
        self.get_data("/system/info").await
    }

    async fn system_metrics(&self) -> Result<SystemInfoPayload, ApiError> {
        self.get_data("/system/metrics").await
    }

    async fn system_processes(&self) -> Result<Vec<ProcessInfo>, ApiError> {
        self.get_data("/system/processes").await
    }

    async fn services(&self) -> Result<Vec<ManagedService>, ApiError> {
        let payload: ServicesPayload = self.get_data("/services").await?;
        Ok(payload.into_services())
    }

    async fn health(&self) -> Result<HostHealth, ApiError> {
        let url = format!("{}/health", self.root_url);
        let body = self.get_json_at(url, "/health").await?;
        decode_envelope("/health", body)
    }
}
