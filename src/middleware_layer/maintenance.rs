use axum::{
    body::Body,
    extract::State,
    http::{header, header::HeaderName, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

/// Header set on every response served during maintenance.
pub const MAINTENANCE: HeaderName = HeaderName::from_static("maintenance");

/// Answers every request with an empty list while the maintenance file exists.
pub async fn maintenance(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if tokio::fs::try_exists(&state.config.maintenance_file)
        .await
        .unwrap_or(false)
    {
        tracing::info!("🚧 Maintenance mode, {} short-circuited", request.uri().path());
        return (
            [
                (MAINTENANCE, "1"),
                (header::CONTENT_TYPE, "application/json"),
            ],
            "[]",
        )
            .into_response();
    }

    next.run(request).await
}
