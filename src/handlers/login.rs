use axum::extract::State;
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    handlers::envelope::IdolResponse,
    middleware_layer::client::{ClientContext, Payload},
    services::auth as auth_service,
    state::AppState,
};

/// The request payload of the handshake.
#[derive(Deserialize, Debug)]
pub struct AuthkeyRequest {
    pub dummy_token: String,
    pub auth_data: String,
}

/// The response payload of the handshake.
#[derive(Serialize)]
pub struct AuthkeyResponse {
    pub authorize_token: String,
    pub dummy_token: String,
}

/// The request payload for login and registration.
///
/// Both credential fields are base64 of IV-prefixed AES-CBC ciphertext under
/// the session's shared key.
#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub login_key: String,
    pub login_passwd: String,
    #[serde(default)]
    pub devtoken: Option<String>,
}

/// The response payload for user login.
#[derive(Serialize)]
pub struct LoginResponse {
    pub authorize_token: String,
    pub user_id: i64,
}

/// The response payload for registration.
#[derive(Serialize)]
pub struct StartUpResponse {
    pub user_id: i64,
}

/// Handles the key exchange.
#[axum::debug_handler]
pub async fn authkey(
    State(state): State<AppState>,
    Payload(payload): Payload<AuthkeyRequest>,
) -> Result<IdolResponse<AuthkeyResponse>> {
    let handshake =
        auth_service::handshake(&state, &payload.dummy_token, &payload.auth_data).await?;

    Ok(IdolResponse::ok(AuthkeyResponse {
        authorize_token: handshake.authorize_token,
        dummy_token: general_purpose::STANDARD.encode(handshake.server_key.as_slice()),
    }))
}

/// Handles user login.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    ctx: ClientContext,
    Payload(payload): Payload<LoginRequest>,
) -> Result<IdolResponse<LoginResponse>> {
    let session = ctx.session()?;
    let login =
        auth_service::login(&state, session, &payload.login_key, &payload.login_passwd).await?;

    Ok(IdolResponse::ok(LoginResponse {
        authorize_token: login.authorize_token,
        user_id: login.user_id,
    }))
}

/// Handles registration of new credentials.
#[axum::debug_handler]
pub async fn start_up(
    State(state): State<AppState>,
    ctx: ClientContext,
    Payload(payload): Payload<LoginRequest>,
) -> Result<IdolResponse<StartUpResponse>> {
    let session = ctx.session()?;
    let user_id =
        auth_service::register(&state, session, &payload.login_key, &payload.login_passwd)
            .await?;

    Ok(IdolResponse::ok(StartUpResponse { user_id }))
}

/// Handles user logout.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    ctx: ClientContext,
) -> Result<IdolResponse<[u8; 0]>> {
    auth_service::logout(&state, ctx.session()?).await?;
    Ok(IdolResponse::empty())
}
