//! The HTTP surface: snapshot, push stream, health.
//!
//! `/ping` is open; everything else sits behind the auth gate. CORS is
//! enforced against the same origin allow-list, and `/alerts/subscribe`
//! speaks Server-Sent Events fed from the store's change bus.

use crate::auth::{AuthGate, Denial};
use crate::store::Store;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use log::error;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub struct AppState {
    pub store: Arc<Store>,
    pub gate: AuthGate,
}

/// Errors that escape a handler become a 500 with the cause attached.
pub struct ApiError(String);

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("handler failed: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "ERROR",
                "message": "Internal server error",
                "extra_info": self.0,
            })),
        )
            .into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", get(root))
        .route("/alerts", get(alerts))
        .route("/alerts/subscribe", get(subscribe))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_gate));

    Router::new()
        .route("/ping", get(ping))
        .merge(protected)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("HTTP API listening on {}", addr);
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn ping() -> impl IntoResponse {
    Json(json!({"status": "OK"}))
}

async fn root() -> impl IntoResponse {
    Json(json!({"status": "AUTHORIZED"}))
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    office: Option<String>,
}

async fn alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Result<Response, ApiError> {
    let mut snapshot = state.store.snapshot().await;

    if let Some(office) = query.office.as_deref().filter(|o| !o.is_empty()) {
        let needle = office.to_ascii_uppercase();
        snapshot.retain(|a| a.sender.to_ascii_uppercase().contains(&needle));
    }

    let alerts = serde_json::to_value(&snapshot)?;
    Ok(Json(json!({
        "status": "OK",
        "count": snapshot.len(),
        "alerts": alerts,
    }))
    .into_response())
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.store.bus().subscribe();

    let connected = stream::once(async {
        Ok(Event::default().data(json!({"status": "connected"}).to_string()))
    });

    let changes = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(change) => Some(Ok(Event::default()
                .event(change.kind.as_str())
                .data(change.data.to_string()))),
            // A lagged subscriber skips what it missed; there is no replay
            Err(_) => None,
        }
    });

    Sse::new(connected.chain(changes)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"status": "ERROR", "message": "Not found"})),
    )
}

async fn auth_gate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let verdict = state.gate.check(
        request.headers(),
        request.method(),
        request.uri().path(),
        &client_ip,
        Utc::now(),
    );

    match verdict {
        Ok(()) => next.run(request).await,
        Err(Denial::Unauthorized(message)) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"status": "ERROR", "message": message})),
        )
            .into_response(),
        Err(Denial::RateLimited) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "status": "ERROR",
                "message": "Rate limit exceeded, try again later",
            })),
        )
            .into_response(),
    }
}

/// CORS per the origin allow-list; preflights answer 204 without touching
/// the routes behind the gate.
async fn cors(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let allowed = origin
        .as_deref()
        .map(|o| state.gate.origin_allowed(o))
        .unwrap_or(false);

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        if allowed {
            apply_cors_headers(&mut response, origin.as_deref());
        }
        return response;
    }

    let mut response = next.run(request).await;
    if allowed {
        apply_cors_headers(&mut response, origin.as_deref());
    }
    response
}

fn apply_cors_headers(response: &mut Response, origin: Option<&str>) {
    let Some(origin) = origin.and_then(|o| HeaderValue::from_str(o).ok()) else {
        return;
    };
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type,Authorization,X-Request-Time,X-Signature"),
    );
}
