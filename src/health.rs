//! Read-only diagnostics over the stream client registry.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::stream::StreamClientRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// One row of the client listing. Carries no owner or transport data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSummary {
    pub index: usize,
    pub id: String,
}

/// Body of `GET /events/health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    /// ISO-8601 timestamp of the snapshot.
    pub timestamp: String,
    pub clients_count: usize,
    pub clients: Vec<ClientSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthSnapshot {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Diagnostic view over the registry. Never mutates it and never fails.
#[derive(Debug, Clone)]
pub struct HealthInspector {
    registry: StreamClientRegistry,
}

impl HealthInspector {
    #[must_use]
    pub fn new(registry: StreamClientRegistry) -> Self {
        Self { registry }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        match self.registry.list() {
            Ok(infos) => {
                let clients: Vec<ClientSummary> = infos
                    .into_iter()
                    .enumerate()
                    .map(|(index, info)| ClientSummary {
                        index,
                        id: info.id.to_string(),
                    })
                    .collect();
                HealthSnapshot {
                    status: HealthStatus::Ok,
                    timestamp,
                    clients_count: clients.len(),
                    clients,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(name: "health.snapshot.failed", error = %e, "Health snapshot failed");
                HealthSnapshot {
                    status: HealthStatus::Error,
                    timestamp,
                    clients_count: 0,
                    clients: Vec::new(),
                    error: Some(format!("Failed to read stream clients: {e}")),
                }
            }
        }
    }
}
