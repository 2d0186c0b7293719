use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::attachments::AttachmentLogRequest;
use crate::config::{AppConfig, SecurityConfig};
use crate::error::ApiError;
use crate::events::StreamEvent;
use crate::security::{PUBLISHER_ROLE, UserContext, auth_middleware};
use crate::stream::{
    BroadcastReport, NewClient, Owner, StreamClientRegistry, build_sse_response,
    client_event_stream,
};
use crate::telemetry;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    config.validate()?;
    if config.security.jwt_secret.is_empty() {
        tracing::warn!(name: "auth.disabled", "No JWT secret configured; bearer tokens are ignored");
    }

    let mut state = AppState::new(Arc::clone(&config));
    if config.telemetry.metrics_enabled {
        if let Some(handle) = telemetry::install_metrics_recorder() {
            state = state.with_metrics(handle);
        }
    }

    let registry = state.registry.clone();
    let app = build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        jwt_required = config.security.jwt_required,
        metrics = config.telemetry.metrics_enabled,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;
    Ok(())
}

/// Resolves on Ctrl-C, closing every stream so connections can drain.
async fn shutdown_signal(registry: StreamClientRegistry) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(name: "server.signal.failed", error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(name: "server.shutdown", "Shutdown requested");
    registry.close_all();
}

/// Build the HTTP surface over `state`.
///
/// Streaming, publishing and attachment logging pass through the bearer
/// token middleware; health and metrics never do.
pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.attachments.max_body_bytes;

    let protected = Router::new()
        .route("/events", get(events_stream))
        .route("/events/publish", post(publish_event))
        .route("/attachments-log", post(log_attachments))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let public = Router::new()
        .route("/events/health", get(events_health))
        .route("/metrics", get(render_metrics));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Query parameters for the streaming endpoint.
#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    /// Anonymous session the connection belongs to.
    #[serde(default)]
    session: Option<String>,
}

fn resolve_owner(user: Option<&UserContext>, session: Option<String>) -> Option<Owner> {
    if let Some(user) = user {
        return Some(Owner::User(user.user_id.clone()));
    }
    session
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(Owner::Session)
}

/// GET /events - Open a server-sent-events stream.
async fn events_stream(
    State(state): State<AppState>,
    user: Option<Extension<UserContext>>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = resolve_owner(user.as_ref().map(|Extension(u)| u), query.session);
    let (handle, rx) = state.registry.register(NewClient {
        id: None,
        owner,
    })?;

    let keep_alive = Duration::from_secs(state.config.stream.keep_alive_secs);
    Ok(build_sse_response(
        client_event_stream(handle, rx),
        keep_alive,
    ))
}

/// Request body for publishing an event.
#[derive(Debug, Deserialize)]
struct PublishRequest {
    /// Target owner; every client when absent.
    #[serde(default)]
    owner: Option<Owner>,
    event: Value,
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    delivered: usize,
    pruned: usize,
}

impl From<BroadcastReport> for PublishResponse {
    fn from(report: BroadcastReport) -> Self {
        Self {
            delivered: report.delivered,
            pruned: report.pruned,
        }
    }
}

fn may_publish(security: &SecurityConfig, user: Option<&UserContext>) -> bool {
    security.publish_open || user.is_some_and(|u| u.has_role(PUBLISHER_ROLE))
}

/// POST /events/publish - Hand an event to the broadcaster.
async fn publish_event(
    State(state): State<AppState>,
    user: Option<Extension<UserContext>>,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    if !may_publish(
        &state.config.security,
        user.as_ref().map(|Extension(u)| u),
    ) {
        return Err(ApiError::Forbidden(format!(
            "publishing requires the '{PUBLISHER_ROLE}' role"
        )));
    }
    let Json(request) = payload.map_err(from_json_rejection)?;
    if !request.event.is_object() {
        return Err(ApiError::bad_request(
            "Invalid event",
            "event must be a JSON object",
        ));
    }

    let event = StreamEvent::new(request.event);
    let report = match &request.owner {
        Some(owner) => state.broadcaster.broadcast_to(owner, event),
        None => state.broadcaster.broadcast_all(event),
    };
    Ok(Json(report.into()))
}

/// POST /attachments-log - Validate and log inbound attachments.
async fn log_attachments(
    State(state): State<AppState>,
    payload: Result<Json<AttachmentLogRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(from_json_rejection)?;
    let attachments = request.attachments.unwrap_or_default();
    state.attachments.validate_and_summarize(&attachments)?;
    Ok(Json(json!({ "success": true })))
}

/// GET /events/health - Registry diagnostics. Never cached.
async fn events_health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot();
    let status = if snapshot.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        [(header::CACHE_CONTROL, "no-store, max-age=0")],
        Json(snapshot),
    )
}

/// GET /metrics - Prometheus exposition, when enabled.
async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn from_json_rejection(rejection: JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge {
            error: "Request body too large".to_string(),
            details: rejection.body_text(),
        };
    }
    ApiError::bad_request("Invalid request body", rejection.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::UserClaims;

    fn user(id: &str) -> UserContext {
        UserContext {
            user_id: id.to_string(),
            claims: UserClaims {
                sub: id.to_string(),
                name: None,
                roles: None,
                exp: 0,
            },
        }
    }

    #[test]
    fn test_user_takes_precedence_over_session() {
        let owner = resolve_owner(Some(&user("acct")), Some("sess".into()));
        assert_eq!(owner, Some(Owner::User("acct".into())));
    }

    #[test]
    fn test_publish_requires_role_unless_open() {
        let mut security = AppConfig::default().security;
        assert!(!may_publish(&security, None));
        assert!(!may_publish(&security, Some(&user("acct"))));

        let mut publisher = user("svc");
        publisher.claims.roles = Some(vec![PUBLISHER_ROLE.to_string()]);
        assert!(may_publish(&security, Some(&publisher)));

        security.publish_open = true;
        assert!(may_publish(&security, None));
    }

    #[test]
    fn test_session_owner_and_unscoped() {
        assert_eq!(
            resolve_owner(None, Some("sess".into())),
            Some(Owner::Session("sess".into()))
        );
        assert_eq!(resolve_owner(None, Some("  ".into())), None);
        assert_eq!(resolve_owner(None, None), None);
    }
}
