use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lazy_static::lazy_static;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tera::{Context, Tera};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics::Recorder;

const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><title>BT Smart Hub 2 Exporter</title></head>
<body>
<h1>BT Smart Hub 2 Exporter</h1>
<p>Polling <code>{{ poll_url }}</code></p>
<ul>
<li><a href="{{ metrics_path }}">Metrics</a></li>
<li><a href="/status">Last poll</a></li>
</ul>
{% if state %}<p>Last poll state: <b>{{ state }}</b>{% if polled_at %} at {{ polled_at }}{% endif %}</p>{% endif %}
</body>
</html>
"#;

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let mut tera = Tera::default();
        if let Err(e) = tera.add_raw_template("index.html", INDEX_TEMPLATE) {
            error!("Template parsing error: {}", e);
        }
        tera.autoescape_on(vec![".html"]);
        tera
    };
}

pub struct ServerConfig {
    pub listen: String,
    pub port: u16,
    pub metrics_path: String,
    pub poll_url: String,
}

struct AppState {
    config: ServerConfig,
    recorder: Arc<Recorder>,
}

/// Builds the exporter's routes: the landing page, the metrics endpoint,
/// `/status` with the last poll as JSON, and `/health`.
pub fn router(mut config: ServerConfig, recorder: Arc<Recorder>) -> Router {
    if !config.metrics_path.starts_with('/') {
        config.metrics_path.insert(0, '/');
    }
    let metrics_path = config.metrics_path.clone();
    let state = Arc::new(AppState { config, recorder });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route(&metrics_path, get(metrics_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: ServerConfig, recorder: Arc<Recorder>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.listen, config.port).parse()?;
    info!("Serving metrics at http://{}{}", addr, config.metrics_path);

    let app = router(config, recorder);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut context = Context::new();
    context.insert("poll_url", &state.config.poll_url);
    context.insert("metrics_path", &state.config.metrics_path);
    if let Some(latest) = state.recorder.latest() {
        context.insert("state", &latest.state);
        context.insert("polled_at", &latest.timing.map(|t| t.polled_at.to_rfc3339()));
    }

    match TEMPLATES.render("index.html", &context) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Template render error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.recorder.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Metrics error: {}", e)).into_response()
        }
    }
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.recorder.latest() {
        Some(result) => Json(result).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "No poll has completed yet" })),
        )
            .into_response(),
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
