use crate::engine::{self, Engine};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use jobhash::JobId;
use std::sync::Arc;
use std::time::Instant;

/// Build the service Router. All state is carried explicitly on the Router
/// rather than registered on a global mux.
pub fn build_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route(
            "/hash",
            get(hash_get).post(hash_post).fallback(unsupported_method),
        )
        .route("/stats", get(stats_get).fallback(unsupported_method))
        .route("/shutdown", get(shutdown_get).fallback(unsupported_method))
        .fallback(not_found)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(engine)
}

fn text(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

// POST /hash: submit a password, reply with a fresh job ID once its digest
// has been computed (but before it is persisted).
async fn hash_post(State(engine): State<Arc<Engine>>, password: Bytes) -> Response {
    let start = Instant::now();

    match engine.submit(password).await {
        Ok(id) => {
            let response = text(StatusCode::OK, id.to_string());
            engine.metrics().record(start.elapsed().as_nanos() as i64);
            response
        }
        Err(err @ engine::Error::ShuttingDown) => {
            text(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        Err(err) => {
            tracing::error!(error = %err, "hash submission failed");
            text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

#[derive(serde::Deserialize)]
struct HashQuery {
    id: Option<String>,
}

// GET /hash?id=<hex>: fetch the base64 digest of a persisted job.
async fn hash_get(State(engine): State<Arc<Engine>>, Query(query): Query<HashQuery>) -> Response {
    let raw = query.id.unwrap_or_default();
    if raw.is_empty() {
        return text(
            StatusCode::BAD_REQUEST,
            "must provide a job ID via the 'id' parameter".to_string(),
        );
    }

    let id: JobId = match raw.parse() {
        Ok(id) => id,
        Err(err) => return text(StatusCode::INTERNAL_SERVER_ERROR, format!("{err}")),
    };

    match engine.lookup(&id) {
        Some(digest) => text(StatusCode::OK, base64::encode(&digest)),
        None => text(
            StatusCode::NOT_FOUND,
            format!("hash for job id {id} not found"),
        ),
    }
}

// GET /stats: request count and mean latency in milliseconds.
async fn stats_get(State(engine): State<Arc<Engine>>) -> Response {
    let snapshot = engine.metrics().snapshot();
    match serde_json::to_vec(&snapshot) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "could not serialize metrics snapshot");
            text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

// GET /shutdown: flip to draining and stop in the background. The response
// goes out while the drain proceeds.
async fn shutdown_get(State(engine): State<Arc<Engine>>) -> Response {
    if !engine.begin_shutdown() {
        return text(
            StatusCode::BAD_REQUEST,
            "server already shutting down".to_string(),
        );
    }

    tracing::info!("received shutdown request, commencing shutdown");
    let stopper = Arc::clone(&engine);
    tokio::spawn(async move { stopper.stop().await });

    text(StatusCode::OK, "commencing shutdown".to_string())
}

async fn unsupported_method(method: Method) -> Response {
    text(
        StatusCode::METHOD_NOT_ALLOWED,
        format!("Unsupported method: {method}"),
    )
}

async fn not_found(uri: Uri) -> Response {
    text(StatusCode::NOT_FOUND, format!("no route for {uri}"))
}
