use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
///
/// Every variant is terminal for the request that produced it. Client-facing
/// variants map to a fixed status class and never carry key material.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// The `Authorize` header or the request form could not be parsed.
    #[error("Malformed request: {0}")]
    HeaderFormat(String),

    /// The `consumerKey` in the `Authorize` header is not the configured one.
    #[error("Invalid consumerKey")]
    InvalidConsumerKey,

    /// The asymmetric handshake could not be completed.
    #[error("Bad handshake: {0}")]
    BadHandshake(String),

    /// The token envelope is malformed or its tag does not verify.
    #[error("Invalid token")]
    BadToken,

    /// The token verified but no live session carries it.
    #[error("Session not found")]
    SessionNotFound,

    /// The session exists but outlived its lifetime.
    #[error("Session expired")]
    ExpiredSession,

    /// The endpoint requires a session bound to a user.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The X-Message-Code did not match the request data.
    #[error("Integrity check failed: {0}")]
    IntegrityMismatch(&'static str),

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An encryption error on the server side (e.g. signing).
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::HeaderFormat(ref msg) => {
                tracing::warn!("Malformed request: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, msg.clone())
            }

            AppError::InvalidConsumerKey => {
                tracing::warn!("Rejected request with invalid consumerKey");
                (StatusCode::UNPROCESSABLE_ENTITY, "Invalid consumerKey".to_string())
            }

            AppError::BadHandshake(ref msg) => {
                tracing::warn!("Handshake rejected: {}", msg);
                (StatusCode::BAD_REQUEST, "Bad client key".to_string())
            }

            AppError::BadToken => {
                tracing::warn!("Token rejected");
                (StatusCode::FORBIDDEN, "Invalid token".to_string())
            }

            AppError::SessionNotFound => {
                tracing::warn!("Token refers to no live session");
                (StatusCode::FORBIDDEN, "Invalid token".to_string())
            }

            AppError::ExpiredSession => {
                tracing::info!("Session expired");
                (StatusCode::FORBIDDEN, "Session expired".to_string())
            }

            AppError::NotLoggedIn => {
                tracing::warn!("Pre-authenticated session used on a user endpoint");
                (StatusCode::FORBIDDEN, "Not logged in!".to_string())
            }

            AppError::IntegrityMismatch(reason) => {
                tracing::warn!("X-Message-Code rejected: {}", reason);
                (StatusCode::UNPROCESSABLE_ENTITY, reason.to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Encryption(ref msg) => {
                tracing::error!("Encryption error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Encryption error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, body).into_response()
    }
}

/// Errors raised by the legacy asset cipher.
///
/// The cipher has no HTTP surface, so these never become responses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// The header checksum does not match the file name.
    #[error("Invalid decrypt header")]
    InvalidHeader,

    /// The header names a cipher version or LCG table this build does not know.
    #[error("Unsupported cipher version {0}")]
    UnsupportedCipherVersion(u8),

    /// A version 2 header selects an LCG table that does not exist.
    #[error("Unknown LCG table {0}")]
    UnknownLcgTable(u8),

    /// The key index stored in the header disagrees with the file name.
    #[error("Key index mismatch: header says {header}, name gives {name}")]
    KeyIndexMismatch { header: u16, name: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn status_and_body(err: AppError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn protocol_errors_map_to_fixed_status_classes() {
        assert_eq!(status_and_body(AppError::InvalidConsumerKey).await.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_and_body(AppError::BadHandshake("x".into())).await.0, StatusCode::BAD_REQUEST);
        assert_eq!(status_and_body(AppError::BadToken).await.0, StatusCode::FORBIDDEN);
        assert_eq!(status_and_body(AppError::SessionNotFound).await.0, StatusCode::FORBIDDEN);
        assert_eq!(status_and_body(AppError::ExpiredSession).await.0, StatusCode::FORBIDDEN);
        assert_eq!(
            status_and_body(AppError::IntegrityMismatch("X-Message-Code does not match")).await.0,
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn handshake_detail_is_not_leaked() {
        let (_, body) = status_and_body(AppError::BadHandshake("pkcs1 padding at byte 3".into())).await;
        assert!(!body.contains("pkcs1"));
        assert!(body.contains("Bad client key"));
    }

    #[tokio::test]
    async fn internal_detail_is_not_leaked() {
        let (status, body) = status_and_body(AppError::Encryption("rsa key too small".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("rsa"));
    }
}
