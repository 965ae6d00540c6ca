use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, FromRequestParts, Multipart, State},
    http::{header, request::Parts, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    crypto::xmc::{self, XmcMode},
    error::{AppError, Result},
    handlers::envelope::IdolResponse,
    services::auth::{self as auth_service, Session},
    state::AppState,
};

/// Largest request body the client check will buffer.
pub const MAX_REQUEST_BODY: usize = 8 * 1024 * 1024;

/// Name of the form field carrying the JSON payload.
pub const REQUEST_DATA_FIELD: &str = "request_data";

/// Header carrying the HMAC of `request_data`.
pub const X_MESSAGE_CODE: &str = "X-Message-Code";

/// Header carrying the urlencoded client credentials.
pub const AUTHORIZE: &str = "Authorize";

/// Header carrying the client's `<major>.<minor>` bundle version.
pub const CLIENT_VERSION: &str = "Client-Version";

/// What an endpoint demands from the `token` in `Authorize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPolicy {
    /// The token is not decoded.
    Ignore,
    /// A live session is required.
    Session,
    /// A live session bound to a user is required.
    User,
}

/// Token and integrity requirements of a group of routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPolicy {
    pub token: TokenPolicy,
    pub xmc: XmcMode,
    /// Answer an outdated `Client-Version` with an empty envelope.
    pub check_version: bool,
}

impl EndpointPolicy {
    /// The handshake: no token, no integrity check.
    pub const HANDSHAKE: Self = Self {
        token: TokenPolicy::Ignore,
        xmc: XmcMode::None,
        check_version: false,
    };
    /// Pre-authenticated endpoints such as login.
    pub const SESSION: Self = Self {
        token: TokenPolicy::Session,
        xmc: XmcMode::Shared,
        check_version: false,
    };
    /// Endpoints that require a logged-in user.
    pub const USER: Self = Self {
        token: TokenPolicy::User,
        xmc: XmcMode::Shared,
        check_version: true,
    };
    /// Logged-in endpoints verified with the fixed CROSS key.
    pub const USER_CROSS: Self = Self {
        token: TokenPolicy::User,
        xmc: XmcMode::Cross,
        check_version: true,
    };
}

/// State of the `client_check` middleware.
#[derive(Clone)]
pub struct Gate {
    pub state: AppState,
    pub policy: EndpointPolicy,
}

impl Gate {
    pub fn new(state: AppState, policy: EndpointPolicy) -> Self {
        Self { state, policy }
    }
}

#[derive(Deserialize)]
struct AuthorizeHeader {
    #[serde(rename = "consumerKey")]
    consumer_key: Option<String>,
    nonce: Option<String>,
    #[serde(rename = "timeStamp")]
    time_stamp: Option<String>,
    token: Option<String>,
    version: Option<String>,
}

/// Everything the client check learned about a request.
#[derive(Clone)]
pub struct ClientContext {
    /// Client nonce, `0` when absent or unparsable.
    pub nonce: i64,
    /// Client timestamp, server time when absent or unparsable.
    pub timestamp: i64,
    /// Client-reported protocol version.
    pub version: Option<String>,
    /// Parsed `Client-Version`, when sent.
    pub client_version: Option<(u32, u32)>,
    /// The inbound `X-Message-Code`, if any.
    pub message_code: Option<String>,
    /// The decoded session, when the policy asked for one.
    pub session: Option<Session>,
}

impl ClientContext {
    /// The session, for handlers mounted behind a token policy.
    pub fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(AppError::BadToken)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<ClientContext>()
            .cloned()
            .ok_or_else(|| AppError::Internal("client check did not run".to_string()))
    }
}

/// Raw bytes of the `request_data` form field.
#[derive(Clone)]
pub struct RequestData(pub Bytes);

/// `request_data` deserialized as JSON.
pub struct Payload<T>(pub T);

impl<S, T> FromRequestParts<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let RequestData(raw) = parts
            .extensions
            .get::<RequestData>()
            .cloned()
            .ok_or_else(|| AppError::Validation("request_data is missing".to_string()))?;
        sonic_rs::from_slice(&raw)
            .map(Payload)
            .map_err(|e| AppError::Validation(format!("request_data: {}", e)))
    }
}

fn parse_authorize(request: &Request<Body>) -> Result<AuthorizeHeader> {
    let raw = request
        .headers()
        .get(AUTHORIZE)
        .ok_or_else(|| AppError::HeaderFormat("Authorize header is missing".to_string()))?
        .to_str()
        .map_err(|_| AppError::HeaderFormat("Authorize header is not ASCII".to_string()))?;
    serde_urlencoded::from_str(raw)
        .map_err(|e| AppError::HeaderFormat(format!("Authorize header: {}", e)))
}

/// Parses a `<major>.<minor>` version.
pub fn parse_version(value: &str) -> Option<(u32, u32)> {
    let (major, minor) = value.trim().split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn parse_client_version(request: &Request<Body>) -> Result<Option<(u32, u32)>> {
    let Some(value) = request.headers().get(CLIENT_VERSION) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(parse_version)
        .map(Some)
        .ok_or_else(|| AppError::HeaderFormat("Client-Version must look like <major>.<minor>".to_string()))
}

async fn extract_request_data(content_type: Option<&str>, body: &Bytes) -> Result<Option<Bytes>> {
    let Some(content_type) = content_type else {
        return Ok(None);
    };

    if content_type.starts_with("multipart/form-data") {
        let form = Request::builder()
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.clone()))
            .map_err(|e| AppError::HeaderFormat(format!("multipart: {}", e)))?;
        let mut multipart = Multipart::from_request(form, &())
            .await
            .map_err(|e| AppError::HeaderFormat(format!("multipart: {}", e)))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::HeaderFormat(format!("multipart: {}", e)))?
        {
            if field.name() == Some(REQUEST_DATA_FIELD) {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::HeaderFormat(format!("multipart: {}", e)))?;
                return Ok(Some(bytes));
            }
        }
        return Ok(None);
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
            .map_err(|e| AppError::HeaderFormat(format!("form: {}", e)))?;
        return Ok(fields
            .into_iter()
            .find(|(name, _)| name == REQUEST_DATA_FIELD)
            .map(|(_, value)| Bytes::from(value)));
    }

    Ok(None)
}

fn verify_message_code(
    state: &AppState,
    mode: XmcMode,
    session: &Session,
    message_code: Option<&str>,
    request_data: &[u8],
) -> Result<()> {
    let supplied = message_code.ok_or(AppError::IntegrityMismatch("Invalid X-Message-Code"))?;

    match mode {
        XmcMode::None => Ok(()),
        XmcMode::Shared => {
            let key = zeroize::Zeroizing::new(xmc::shared_key(&session.data));
            xmc::verify(&key[..], request_data, supplied)
        }
        XmcMode::Cross => xmc::verify(&state.cross_key[..], request_data, supplied),
    }
}

/// Parses `Authorize`, resolves the session and verifies X-Message-Code.
///
/// Runs as a route layer so every route group carries its own
/// [`EndpointPolicy`]. On success the handler finds a [`ClientContext`]
/// and, when the form carried one, a [`RequestData`] in the extensions.
///
/// # Arguments
///
/// * `gate` - The application state and the route group's policy.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or the `AppError` that rejected the request.
pub async fn client_check(
    State(gate): State<Gate>,
    request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let Gate { state, policy } = gate;

    let authorize = parse_authorize(&request)?;
    if authorize.consumer_key.as_deref() != Some(state.config.consumer_key.as_str()) {
        return Err(AppError::InvalidConsumerKey);
    }

    let nonce = authorize
        .nonce
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let timestamp = authorize
        .time_stamp
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    let client_version = parse_client_version(&request)?;

    // Any integrity mode other than None keys on a session, so it needs the token too.
    let session = if policy.token == TokenPolicy::Ignore && policy.xmc == XmcMode::None {
        None
    } else {
        let envelope = authorize.token.as_deref().ok_or(AppError::BadToken)?;
        let session = auth_service::decapsulate(&state, envelope).await?;
        if policy.token == TokenPolicy::User && session.data.user_id == 0 {
            return Err(AppError::NotLoggedIn);
        }
        Some(session)
    };

    let message_code = request
        .headers()
        .get(X_MESSAGE_CODE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let (mut parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY)
        .await
        .map_err(|e| AppError::HeaderFormat(format!("request body: {}", e)))?;
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let request_data = extract_request_data(content_type, &body).await?;

    if state.config.verify_xmc && policy.xmc != XmcMode::None {
        if let (Some(data), Some(session)) = (&request_data, &session) {
            verify_message_code(
                &state,
                policy.xmc,
                session,
                message_code.as_deref(),
                data,
            )?;
            tracing::debug!("✅ X-Message-Code verified ({:?})", policy.xmc);
        }
    }

    if policy.check_version {
        let client_version = client_version
            .ok_or_else(|| AppError::HeaderFormat("Client-Version header is missing".to_string()))?;
        let server_version = parse_version(&state.config.server_version)
            .ok_or_else(|| AppError::Internal("server version is malformed".to_string()))?;
        if client_version != server_version {
            tracing::debug!(
                "📦 Client version {}.{} is not {}",
                client_version.0,
                client_version.1,
                state.config.server_version
            );
            return Ok(IdolResponse::empty().into_response());
        }
    }

    if let Some(data) = request_data {
        parts.extensions.insert(RequestData(data));
    }
    parts.extensions.insert(ClientContext {
        nonce,
        timestamp,
        version: authorize.version,
        client_version,
        message_code,
        session,
    });

    Ok(next.run(Request::from_parts(parts, Body::from(body))).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(authorize: &str) -> Request<Body> {
        Request::builder()
            .header(AUTHORIZE, authorize)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn authorize_header_is_urlencoded() {
        let parsed = parse_authorize(&request(
            "consumerKey=lovelive_test&timeStamp=1700000000&version=1.1&token=abc%3D%3D&nonce=3",
        ))
        .unwrap();
        assert_eq!(parsed.consumer_key.as_deref(), Some("lovelive_test"));
        assert_eq!(parsed.token.as_deref(), Some("abc=="));
        assert_eq!(parsed.nonce.as_deref(), Some("3"));
        assert_eq!(parsed.time_stamp.as_deref(), Some("1700000000"));
        assert_eq!(parsed.version.as_deref(), Some("1.1"));
    }

    #[test]
    fn missing_authorize_is_header_format_error() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert!(matches!(parse_authorize(&request), Err(AppError::HeaderFormat(_))));
    }

    #[test]
    fn versions_are_major_dot_minor() {
        assert_eq!(parse_version("59.4"), Some((59, 4)));
        assert_eq!(parse_version(" 60.0 "), Some((60, 0)));
        assert_eq!(parse_version("59"), None);
        assert_eq!(parse_version("59.x"), None);
        assert_eq!(parse_version("59.4.1"), None);
    }

    #[test]
    fn client_version_header_is_optional_but_must_parse() {
        let request = |value: Option<&str>| {
            let mut builder = Request::builder();
            if let Some(value) = value {
                builder = builder.header(CLIENT_VERSION, value);
            }
            builder.body(Body::empty()).unwrap()
        };
        assert_eq!(parse_client_version(&request(None)).unwrap(), None);
        assert_eq!(parse_client_version(&request(Some("59.4"))).unwrap(), Some((59, 4)));
        assert!(matches!(
            parse_client_version(&request(Some("latest"))),
            Err(AppError::HeaderFormat(_))
        ));
    }

    #[tokio::test]
    async fn request_data_from_urlencoded_form() {
        let body = Bytes::from_static(b"foo=1&request_data=%7B%22a%22%3A1%7D");
        let data = extract_request_data(Some("application/x-www-form-urlencoded"), &body)
            .await
            .unwrap();
        assert_eq!(data.as_deref(), Some(&b"{\"a\":1}"[..]));
    }

    #[tokio::test]
    async fn request_data_from_multipart_form() {
        let body = Bytes::from_static(
            b"--XX\r\nContent-Disposition: form-data; name=\"request_data\"\r\n\r\n{\"a\":1}\r\n--XX--\r\n",
        );
        let data = extract_request_data(Some("multipart/form-data; boundary=XX"), &body)
            .await
            .unwrap();
        assert_eq!(data.as_deref(), Some(&b"{\"a\":1}"[..]));
    }

    #[tokio::test]
    async fn no_form_means_no_request_data() {
        assert!(extract_request_data(None, &Bytes::new()).await.unwrap().is_none());
        assert!(
            extract_request_data(Some("application/json"), &Bytes::from_static(b"{}"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
