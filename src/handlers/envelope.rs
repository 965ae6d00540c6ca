use axum::{
    http::{header, header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::AppError;

/// Header mirroring the envelope's `status_code`.
pub const STATUS_CODE: HeaderName = HeaderName::from_static("status_code");

#[derive(Serialize)]
struct Envelope<'a, T> {
    response_data: &'a T,
    release_info: &'a [String],
    status_code: u16,
}

/// A handler result wrapped in the client's response envelope:
/// `{"response_data": …, "release_info": [], "status_code": 200}`.
pub struct IdolResponse<T> {
    pub data: T,
    pub status: StatusCode,
}

impl<T> IdolResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data,
            status: StatusCode::OK,
        }
    }
}

impl IdolResponse<[u8; 0]> {
    /// `response_data: []`.
    pub fn empty() -> Self {
        Self::ok([])
    }
}

impl<T: Serialize> IntoResponse for IdolResponse<T> {
    fn into_response(self) -> Response {
        let envelope = Envelope {
            response_data: &self.data,
            release_info: &[],
            status_code: self.status.as_u16(),
        };
        let body = match sonic_rs::to_vec(&envelope) {
            Ok(body) => body,
            Err(e) => return AppError::Internal(format!("response encoding: {}", e)).into_response(),
        };

        (
            self.status,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
                (STATUS_CODE, HeaderValue::from(self.status.as_u16())),
            ],
            body,
        )
            .into_response()
    }
}
