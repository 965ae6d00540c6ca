use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder,
};
use base64::{Engine as _, engine::general_purpose};
use once_cell::sync::OnceCell;
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::aes;
use crate::error::{AppError, Result};
use crate::models::session::{SessionRecord, TokenData};
use crate::crypto::token::generate_token;
use crate::state::AppState;
use crate::validation::auth::{validate_login_key, validate_password};

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 2;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 1;

/// Hash verified against when a login key is unknown, so both paths cost one Argon2 run.
static DUMMY_HASH: OnceCell<String> = OnceCell::new();

/// Size of the client and server halves of the key exchange.
pub const EXCHANGE_KEY_SIZE: usize = 32;

/// Result of a successful handshake.
pub struct Handshake {
    /// The encapsulated token the client replays in `Authorize`.
    pub authorize_token: String,
    /// The server's half of the key exchange.
    pub server_key: Zeroizing<[u8; EXCHANGE_KEY_SIZE]>,
}

/// A decoded, live session.
#[derive(Clone)]
pub struct Session {
    /// Store key of the session.
    pub token: String,
    /// Key material and user binding.
    pub data: TokenData,
}

/// Result of a successful login.
pub struct Login {
    /// The new envelope, bound to the user.
    pub authorize_token: String,
    /// The authenticated user.
    pub user_id: i64,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn dummy_hash() -> Result<&'static str> {
    DUMMY_HASH
        .get_or_try_init(|| hash_password("unknown-login-key"))
        .map(String::as_str)
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|_| AppError::Validation(format!("{} is not valid base64", field)))
}

/// Key the client encrypts its credentials with after the handshake.
pub fn shared_credential_key(data: &TokenData) -> Zeroizing<[u8; aes::KEY_SIZE]> {
    Zeroizing::new(std::array::from_fn(|i| data.client_key[i] ^ data.server_key[i]))
}

/// Hashes a password using Argon2id.
///
/// # Arguments
///
/// * `password` - The password to hash.
///
/// # Returns
///
/// A `Result` containing the hashed password.
fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Encryption(format!("Salt encoding error: {}", e)))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        ParamsBuilder::new()
            .m_cost(ARGON2_MEMORY_MB * 1024)
            .t_cost(ARGON2_ITERATIONS)
            .p_cost(ARGON2_PARALLELISM)
            .build()
            .map_err(|e| AppError::Encryption(format!("Argon2 params: {}", e)))?,
    );

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Encryption(format!("Argon2 hash error: {}", e)))?
        .to_string();

    tracing::debug!("Password hashed successfully with Argon2");
    Ok(password_hash)
}

/// Verifies a password against a hash.
///
/// # Arguments
///
/// * `password` - The password to verify.
/// * `hash` - The hash to verify against.
///
/// # Returns
///
/// A `Result` containing `true` if the password is valid, `false` otherwise.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Encryption(format!("Hash parse error: {}", e)))?;
    let result = Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok();

    tracing::debug!("Password verification completed");
    Ok(result)
}

/// Performs the asymmetric handshake and opens a pre-authenticated session.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `dummy_token` - Base64 of the RSA-encrypted client key.
/// * `auth_data` - Base64 of the AES-CBC encrypted device data.
///
/// # Returns
///
/// A `Result` containing the new envelope and the server key.
pub async fn handshake(state: &AppState, dummy_token: &str, auth_data: &str) -> Result<Handshake> {
    let sealed_key = general_purpose::STANDARD
        .decode(dummy_token.trim())
        .map_err(|_| AppError::BadHandshake("dummy_token is not valid base64".to_string()))?;
    let client_key = state.server_key.decrypt(&sealed_key)?;
    let client_key: [u8; EXCHANGE_KEY_SIZE] = client_key
        .as_slice()
        .try_into()
        .map_err(|_| AppError::BadHandshake(format!("client key has {} bytes", client_key.len())))?;
    let client_key = Zeroizing::new(client_key);

    let sealed_auth = general_purpose::STANDARD
        .decode(auth_data.trim())
        .map_err(|_| AppError::BadHandshake("auth_data is not valid base64".to_string()))?;
    let aes_key: [u8; aes::KEY_SIZE] = std::array::from_fn(|i| client_key[i]);
    let device_data = Zeroizing::new(
        aes::decrypt(&aes_key, &sealed_auth)
            .map_err(|_| AppError::BadHandshake("auth_data does not decrypt".to_string()))?,
    );
    tracing::debug!("🔐 Handshake auth_data decrypted ({} bytes)", device_data.len());

    let mut server_key = Zeroizing::new([0u8; EXCHANGE_KEY_SIZE]);
    OsRng.fill_bytes(server_key.as_mut());

    let record = SessionRecord {
        token: generate_token(),
        user_id: 0,
        client_key: *client_key,
        server_key: *server_key,
        last_accessed: now(),
    };
    state.sessions.insert(&record).await?;
    let authorize_token = state.tokens.encapsulate(&record.token)?;

    tracing::info!("✅ Pre-authenticated session opened");
    Ok(Handshake {
        authorize_token,
        server_key,
    })
}

/// Decodes an envelope and resolves the live session behind it.
///
/// A session found past its lifetime is deleted and reported as expired;
/// bulk cleanup is left to the background sweeper.
pub async fn decapsulate(state: &AppState, envelope: &str) -> Result<Session> {
    let token = state.tokens.decapsulate(envelope)?;
    let now = now();

    let record = state
        .sessions
        .find(&token)
        .await?
        .ok_or(AppError::SessionNotFound)?;

    if record.is_expired(now, state.config.session_expiry) {
        state.sessions.delete(&token).await?;
        return Err(AppError::ExpiredSession);
    }

    let record = state
        .sessions
        .touch(&token, now)
        .await?
        .ok_or(AppError::SessionNotFound)?;

    tracing::debug!("🔑 Session resolved (user_id={})", record.user_id);
    Ok(Session {
        data: record.token_data(),
        token,
    })
}

/// Decrypts a credential field sent under the shared key.
fn decrypt_field(key: &[u8; aes::KEY_SIZE], field: &str, value: &str) -> Result<Zeroizing<String>> {
    let sealed = decode_base64(field, value)?;
    let plain = aes::decrypt(key, &sealed)?;
    String::from_utf8(plain)
        .map(Zeroizing::new)
        .map_err(|e| {
            let mut bytes = e.into_bytes();
            bytes.zeroize();
            AppError::Validation(format!("{} is not valid UTF-8", field))
        })
}

/// Decrypts and validates the `login_key`/`login_passwd` pair.
fn decrypt_credentials(
    session: &Session,
    login_key: &str,
    login_passwd: &str,
) -> Result<(Zeroizing<String>, Zeroizing<String>)> {
    let key = shared_credential_key(&session.data);
    let login_key = decrypt_field(&key, "login_key", login_key)?;
    let login_passwd = decrypt_field(&key, "login_passwd", login_passwd)?;
    validate_login_key(&login_key)?;
    validate_password(&login_passwd)?;
    Ok((login_key, login_passwd))
}

/// Authenticates the credentials and binds the session to the user.
///
/// # Returns
///
/// A `Result` containing a new envelope for the same key material.
pub async fn login(
    state: &AppState,
    session: &Session,
    login_key: &str,
    login_passwd: &str,
) -> Result<Login> {
    if session.data.user_id != 0 {
        return Err(AppError::Validation("Session is already logged in".to_string()));
    }

    let (login_key, login_passwd) = decrypt_credentials(session, login_key, login_passwd)?;
    tracing::debug!("🔐 Authenticating login key");

    let user = state.users.find_by_key(&login_key).await?;
    let hash = match &user {
        Some(user) => user.password_hash.as_str(),
        None => dummy_hash()?,
    };
    let valid = verify_password(&login_passwd, hash)?;

    let user = match user {
        Some(user) if valid => user,
        _ => {
            return Err(AppError::Authentication(
                "Invalid login key or password".to_string(),
            ));
        }
    };

    let new_token = generate_token();
    state
        .sessions
        .promote(&session.token, &new_token, user.id, now())
        .await?
        .ok_or(AppError::SessionNotFound)?;
    let authorize_token = state.tokens.encapsulate(&new_token)?;

    tracing::info!("✅ User logged in: {}", user.id);
    Ok(Login {
        authorize_token,
        user_id: user.id,
    })
}

/// Registers the credentials sent on a pre-authenticated session.
///
/// # Returns
///
/// A `Result` containing the new user's id.
pub async fn register(
    state: &AppState,
    session: &Session,
    login_key: &str,
    login_passwd: &str,
) -> Result<i64> {
    let (login_key, login_passwd) = decrypt_credentials(session, login_key, login_passwd)?;
    let password_hash = hash_password(&login_passwd)?;
    let user = state.users.create(&login_key, &password_hash).await?;

    tracing::info!("✅ User registered: {}", user.id);
    Ok(user.id)
}

/// Ends a session.
pub async fn logout(state: &AppState, session: &Session) -> Result<()> {
    if state.sessions.delete(&session.token).await? {
        tracing::info!("👋 Session closed (user_id={})", session.data.user_id);
    }
    Ok(())
}
