//! Study Relay
//!
//! Realtime event distribution and session identity for a conversational
//! study assistant. Open browser tabs hold a server-sent-events connection;
//! chat and state updates produced elsewhere are fanned out to them, either
//! to everyone or to the tabs of one session or account.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server with SSE streaming
//! - **Registry**: one explicitly constructed table of live connections,
//!   owned by [`AppState`] and injected into every handler
//! - **Identity**: client-side anonymous session ids that can later be bound
//!   to an authenticated account
//!
//! # Modules
//!
//! - [`stream`]: client registry, broadcaster and SSE adapter
//! - [`health`]: read-only diagnostics over the registry
//! - [`attachments`]: attachment intake and logging
//! - [`identity`]: anonymous session identity and its durable storage
//! - [`events`]: the event payload pushed to clients

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::map_err_ignore)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::unused_async)]

pub mod attachments;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod identity;
pub mod security;
pub mod server;
pub mod stream;
pub mod telemetry;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::attachments::{AttachmentIntake, IntakePolicy};
use crate::config::AppConfig;
use crate::health::HealthInspector;
use crate::stream::{EventBroadcaster, StreamClientRegistry};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live streaming connections.
    pub registry: StreamClientRegistry,
    /// Fan-out over `registry`.
    pub broadcaster: EventBroadcaster,
    /// Diagnostics over `registry`.
    pub health: HealthInspector,
    /// Attachment intake
    pub attachments: AttachmentIntake,
    /// Rendered by `/metrics` when installed.
    pub metrics: Option<PrometheusHandle>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build the state for one server instance. The registry is created here
    /// and lives exactly as long as the returned state and its clones.
    #[must_use]
    pub fn new(config: Arc<AppConfig>) -> Self {
        let registry = StreamClientRegistry::new(config.stream.channel_capacity);
        Self {
            broadcaster: EventBroadcaster::new(registry.clone()),
            health: HealthInspector::new(registry.clone()),
            attachments: AttachmentIntake::new(IntakePolicy::from(&config.attachments)),
            registry,
            metrics: None,
            config,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
