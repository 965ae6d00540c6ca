use axum::{
    body::Body,
    extract::State,
    http::{header::HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::{
    crypto::signer::sign_message,
    error::{AppError, Result},
    middleware_layer::client::X_MESSAGE_CODE,
    state::AppState,
};

/// Header carrying the RSA signature of the response body.
pub const X_MESSAGE_SIGN: HeaderName = HeaderName::from_static("x-message-sign");

/// Header carrying the advertised server version.
pub const SERVER_VERSION: HeaderName = HeaderName::from_static("server-version");

/// Signs every response body and advertises the server version.
///
/// The signature binds the inbound `X-Message-Code` when the client sent one.
pub async fn sign_response(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let message_code = request
        .headers()
        .get(X_MESSAGE_CODE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::Internal(format!("response body: {}", e)))?;

    let signature = sign_message(&*state.server_key, &body, message_code.as_deref())?;
    parts.headers.insert(
        X_MESSAGE_SIGN,
        HeaderValue::from_str(&signature)
            .map_err(|e| AppError::Internal(format!("signature header: {}", e)))?,
    );
    parts.headers.insert(
        SERVER_VERSION,
        HeaderValue::from_str(&state.config.server_version)
            .map_err(|e| AppError::Internal(format!("version header: {}", e)))?,
    );

    Ok(Response::from_parts(parts, Body::from(body)))
}
