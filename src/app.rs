use std::any::Any;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::config::ServerConfig;
use crate::error::{AppError, ErrorBody, UnexpectedDetail, MAX_BODY_BYTES};
use crate::state::AppState;
use crate::users;

/// Hardening headers added to every response that does not set them itself.
const SECURITY_HEADERS: [(&str, &str); 12] = [
    (
        "content-security-policy",
        "default-src 'self';base-uri 'self';font-src 'self' https: data:;form-action 'self';\
         frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src 'self';\
         script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests",
    ),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.app);

    let mut app = Router::new()
        .route("/", get(index).fallback(route_not_found))
        .nest(
            "/api",
            Router::new()
                .merge(users::router())
                .route("/health", get(health).fallback(route_not_found)),
        )
        .fallback(route_not_found)
        .with_state(state.clone())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::map_response_with_state(
            state,
            expose_error_details,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    for (name, value) in SECURITY_HEADERS {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    app.layer(CompressionLayer::new())
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

/// Production admits only the configured origins; elsewhere any caller is mirrored.
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    if !config.is_production() {
        return layer.allow_origin(AllowOrigin::mirror_request());
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "message": "RDS PostgreSQL users API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/api/health",
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    database: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let connectivity = state.probe.test_connectivity().await;
    let (code, status, database) = if connectivity.is_healthy() {
        (StatusCode::OK, "OK", "Connected")
    } else {
        tracing::warn!(
            primary = connectivity.primary,
            replica = connectivity.replica,
            "health check failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, "ERROR", "Disconnected")
    };

    (
        code,
        Json(HealthResponse {
            status,
            timestamp: OffsetDateTime::now_utc(),
            database,
            environment: state.config.app.environment.clone(),
        }),
    )
}

pub(crate) async fn route_not_found() -> (StatusCode, Json<ErrorBody>) {
    (StatusCode::NOT_FOUND, Json(ErrorBody::new("Route not found")))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let msg = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    AppError::Unexpected(anyhow::anyhow!("handler panicked: {msg}")).into_response()
}

/// Outside production, 500 bodies carry the error chain under `details`.
async fn expose_error_details(State(state): State<AppState>, mut res: Response) -> Response {
    if state.config.app.is_production() {
        return res;
    }
    let Some(UnexpectedDetail(chain)) = res.extensions_mut().remove::<UnexpectedDetail>() else {
        return res;
    };

    let body = ErrorBody {
        success: false,
        message: chain
            .first()
            .cloned()
            .unwrap_or_else(|| "Internal server error".into()),
        details: Some(json!(chain)),
    };
    (res.status(), Json(body)).into_response()
}
