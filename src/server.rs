use crate::error::RelayError;
use crate::health::{self, SharedHealthState};
use crate::ingress::Ingress;
use crate::message::Message;
use anyhow::Context;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

/// `POST /messages`: the request body, verbatim, becomes the message content.
async fn create_message(
    State(ingress): State<Arc<Ingress>>,
    content: String,
) -> Result<Json<Message>, RelayError> {
    let message = ingress.handle_request(content).await?;
    Ok(Json(message))
}

/// HTTP surface of the service. `/messages` is only mounted when this process
/// runs the producer side and accepts bodies of any size.
pub fn router(ingress: Option<Arc<Ingress>>, health_state: SharedHealthState) -> Router {
    let app = health::router(health_state);

    match ingress {
        Some(ingress) => app.merge(
            Router::new()
                .route("/messages", post(create_message))
                .layer(DefaultBodyLimit::disable())
                .with_state(ingress),
        ),
        None => app,
    }
}

/// Serve `app` on `0.0.0.0:{port}` until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve<S>(port: u16, app: Router, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {addr}"))?;

    info!(event = "http_listening", addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;

    Ok(())
}
