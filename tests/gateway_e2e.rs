use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
    routing::post,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tempfile::TempDir;
use tower::ServiceExt;

use idol_gateway::{
    config::{Config, DEFAULT_APPLICATION_KEY, DEFAULT_BASE_XORPAD},
    crypto::{aes, asymmetric::{AsymmetricCipher, ServerKey}, xmc},
    error::Result,
    handlers::envelope::IdolResponse,
    middleware_layer::client::{ClientContext, EndpointPolicy, Payload, TokenPolicy},
    repositories::{session::MemorySessionStore, user::MemoryUserStore},
    routes::{app_with, with_policy},
    state::AppState,
};

static SERVER_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut OsRng, 1024).expect("generate server key"));

#[derive(Deserialize)]
struct Envelope<T> {
    response_data: T,
    release_info: Vec<String>,
    status_code: u16,
}

#[derive(Deserialize)]
struct AuthkeyOut {
    authorize_token: String,
    dummy_token: String,
}

#[derive(Deserialize)]
struct LoginOut {
    authorize_token: String,
    user_id: i64,
}

#[derive(Deserialize)]
struct StartUpOut {
    user_id: i64,
}

#[derive(Deserialize, Serialize)]
struct Echo {
    a: i64,
}

#[derive(Deserialize, Serialize)]
struct EchoOut {
    a: i64,
    user_id: i64,
}

async fn echo(ctx: ClientContext, Payload(payload): Payload<Echo>) -> Result<IdolResponse<EchoOut>> {
    Ok(IdolResponse::ok(EchoOut {
        a: payload.a,
        user_id: ctx.session()?.data.user_id,
    }))
}

async fn large() -> IdolResponse<Vec<String>> {
    IdolResponse::ok(vec!["idol".repeat(20_000)])
}

struct Harness {
    app: Router,
    public: RsaPublicKey,
    maintenance_file: PathBuf,
    _dir: TempDir,
}

fn harness_with(configure: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = Config::new(b"integration secret".to_vec());
    config.maintenance_file = dir.path().join("maintenance.txt");
    configure(&mut config);
    let maintenance_file = config.maintenance_file.clone();

    let state = AppState::from_parts(
        config,
        Arc::new(ServerKey::new(SERVER_KEY.clone())),
        Arc::new(MemorySessionStore::new()),
        Arc::new(MemoryUserStore::new()),
    );

    let test_routes = Router::new()
        .merge(with_policy(
            Router::new().route("/main.php/test/user", post(echo)),
            &state,
            EndpointPolicy::USER,
        ))
        .merge(with_policy(
            Router::new().route("/main.php/test/cross", post(echo)),
            &state,
            EndpointPolicy::USER_CROSS,
        ))
        .merge(with_policy(
            Router::new().route("/main.php/test/anonymous_cross", post(echo)),
            &state,
            EndpointPolicy {
                token: TokenPolicy::Ignore,
                xmc: xmc::XmcMode::Cross,
                check_version: false,
            },
        ))
        .merge(with_policy(
            Router::new().route("/main.php/test/large", post(large)),
            &state,
            EndpointPolicy::HANDSHAKE,
        ));

    Harness {
        app: app_with(state, test_routes),
        public: SERVER_KEY.to_public_key(),
        maintenance_file,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn authorize(token: Option<&str>) -> String {
    let mut fields = vec![
        ("consumerKey", "lovelive_test"),
        ("timeStamp", "1700000000"),
        ("version", "1.1"),
        ("nonce", "1"),
    ];
    if let Some(token) = token {
        fields.push(("token", token));
    }
    serde_urlencoded::to_string(fields).unwrap()
}

const BOUNDARY: &str = "----idolgatewayboundary";

fn request(path: &str, authorize: Option<String>, xmc: Option<&str>, request_data: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", format!("multipart/form-data; boundary={}", BOUNDARY))
        .header("Client-Version", "59.4");
    if let Some(authorize) = authorize {
        builder = builder.header("Authorize", authorize);
    }
    if let Some(xmc) = xmc {
        builder = builder.header("X-Message-Code", xmc);
    }
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"request_data\"\r\n\r\n{d}\r\n--{b}--\r\n",
        b = BOUNDARY,
        d = request_data
    );
    builder.body(Body::from(body)).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

fn signature_valid(public: &RsaPublicKey, headers: &HeaderMap, body: &[u8], xmc: Option<&str>) -> bool {
    let signature = STANDARD
        .decode(headers["x-message-sign"].to_str().unwrap())
        .unwrap();
    let mut sha1 = Sha1::new();
    sha1.update(body);
    if let Some(xmc) = xmc {
        sha1.update(xmc.as_bytes());
    }
    public
        .verify(Pkcs1v15Sign::new::<Sha1>(), &sha1.finalize(), &signature)
        .is_ok()
}

struct Client {
    client_key: [u8; 32],
    server_key: [u8; 32],
    token: String,
}

impl Client {
    fn shared_code(&self, request_data: &str) -> String {
        let key: [u8; 32] = std::array::from_fn(|i| self.client_key[i] ^ self.server_key[i]);
        xmc::message_code(&key, request_data.as_bytes()).unwrap()
    }

    fn seal(&self, value: &str) -> String {
        let key: [u8; 16] = std::array::from_fn(|i| self.client_key[i] ^ self.server_key[i]);
        STANDARD.encode(aes::encrypt(&key, value.as_bytes()))
    }

    fn credentials(&self, login_key: &str, password: &str) -> String {
        format!(
            r#"{{"login_key":"{}","login_passwd":"{}"}}"#,
            self.seal(login_key),
            self.seal(password)
        )
    }
}

fn cross_code(request_data: &str) -> String {
    let key = xmc::cross_key(DEFAULT_BASE_XORPAD, DEFAULT_APPLICATION_KEY);
    xmc::message_code(&key, request_data.as_bytes()).unwrap()
}

fn authkey_data(public: &RsaPublicKey, client_key: &[u8; 32]) -> String {
    let sealed = public
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, client_key)
        .unwrap();
    let aes_key: [u8; 16] = std::array::from_fn(|i| client_key[i]);
    let auth_data = aes::encrypt(&aes_key, br#"{"1":"device","2":"android"}"#);
    format!(
        r#"{{"dummy_token":"{}","auth_data":"{}"}}"#,
        STANDARD.encode(sealed),
        STANDARD.encode(auth_data)
    )
}

async fn handshake(h: &Harness) -> Client {
    let mut client_key = [0u8; 32];
    OsRng.fill_bytes(&mut client_key);
    let data = authkey_data(&h.public, &client_key);

    let (status, headers, body) = send(
        &h.app,
        request("/main.php/login/authkey", Some(authorize(None)), None, &data),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["server-version"], "59.4");
    assert!(signature_valid(&h.public, &headers, &body, None));

    let envelope: Envelope<AuthkeyOut> = sonic_rs::from_slice(&body).unwrap();
    assert_eq!(envelope.status_code, 200);
    assert!(envelope.release_info.is_empty());
    let server_key: [u8; 32] = STANDARD
        .decode(&envelope.response_data.dummy_token)
        .unwrap()
        .try_into()
        .unwrap();

    Client {
        client_key,
        server_key,
        token: envelope.response_data.authorize_token,
    }
}

/// Registers `login_key` and logs in, returning the user-bound client.
async fn logged_in(h: &Harness, login_key: &str) -> (Client, i64) {
    let client = handshake(h).await;

    let data = client.credentials(login_key, "correct horse");
    let code = client.shared_code(&data);
    let (status, _, body) = send(
        &h.app,
        request("/main.php/login/startUp", Some(authorize(Some(&client.token))), Some(&code), &data),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let registered: Envelope<StartUpOut> = sonic_rs::from_slice(&body).unwrap();

    let (status, headers, body) = send(
        &h.app,
        request("/main.php/login/login", Some(authorize(Some(&client.token))), Some(&code), &data),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(signature_valid(&h.public, &headers, &body, Some(&code)));
    let login: Envelope<LoginOut> = sonic_rs::from_slice(&body).unwrap();
    assert_eq!(login.response_data.user_id, registered.response_data.user_id);

    let user_id = login.response_data.user_id;
    (
        Client {
            token: login.response_data.authorize_token,
            ..client
        },
        user_id,
    )
}

#[tokio::test]
async fn full_login_flow_reaches_user_endpoints() {
    let h = harness();
    let (client, user_id) = logged_in(&h, "flow-user").await;

    let data = r#"{"a":41}"#;
    let code = client.shared_code(data);
    let (status, headers, body) = send(
        &h.app,
        request("/main.php/test/user", Some(authorize(Some(&client.token))), Some(&code), data),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["status_code"], "200");
    assert!(signature_valid(&h.public, &headers, &body, Some(&code)));
    let echoed: Envelope<EchoOut> = sonic_rs::from_slice(&body).unwrap();
    assert_eq!(echoed.response_data.a, 41);
    assert_eq!(echoed.response_data.user_id, user_id);
}

#[tokio::test]
async fn cross_endpoint_uses_fixed_key() {
    let h = harness();
    let (client, _) = logged_in(&h, "cross-user").await;

    let data = r#"{"a":1}"#;
    let (status, _, _) = send(
        &h.app,
        request("/main.php/test/cross", Some(authorize(Some(&client.token))), Some(&cross_code(data)), data),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        &h.app,
        request("/main.php/test/cross", Some(authorize(Some(&client.token))), Some(&client.shared_code(data)), data),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn cross_endpoint_still_needs_a_token() {
    let h = harness();
    let data = r#"{"a":1}"#;
    let (status, _, _) = send(
        &h.app,
        request("/main.php/test/anonymous_cross", Some(authorize(None)), Some(&cross_code(data)), data),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cross_endpoint_without_request_data_still_needs_a_token() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/main.php/test/anonymous_cross")
        .header("Authorize", authorize(None))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!String::from_utf8_lossy(&body).contains("user_id"));
}

#[tokio::test]
async fn outdated_client_gets_a_signed_empty_response() {
    let h = harness();
    let (client, _) = logged_in(&h, "outdated-user").await;
    let data = r#"{"a":5}"#;
    let code = client.shared_code(data);

    let mut outdated = request("/main.php/test/user", Some(authorize(Some(&client.token))), Some(&code), data);
    outdated
        .headers_mut()
        .insert("client-version", "59.3".parse().unwrap());
    let (status, headers, body) = send(&h.app, outdated).await;
    assert_eq!(status, StatusCode::OK);
    assert!(signature_valid(&h.public, &headers, &body, Some(&code)));
    let envelope: Envelope<Vec<i64>> = sonic_rs::from_slice(&body).unwrap();
    assert!(envelope.response_data.is_empty());
    assert_eq!(envelope.status_code, 200);
}

#[tokio::test]
async fn client_version_must_be_well_formed() {
    let h = harness();
    let (client, _) = logged_in(&h, "version-user").await;
    let data = r#"{"a":5}"#;
    let code = client.shared_code(data);

    let mut malformed = request("/main.php/test/user", Some(authorize(Some(&client.token))), Some(&code), data);
    malformed
        .headers_mut()
        .insert("client-version", "latest".parse().unwrap());
    let (status, _, _) = send(&h.app, malformed).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let mut missing = request("/main.php/test/user", Some(authorize(Some(&client.token))), Some(&code), data);
    missing.headers_mut().remove("client-version");
    let (status, _, _) = send(&h.app, missing).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn login_endpoints_skip_the_version_check() {
    let h = harness();
    let mut client_key = [0u8; 32];
    OsRng.fill_bytes(&mut client_key);
    let data = authkey_data(&h.public, &client_key);

    let mut old_client = request("/main.php/login/authkey", Some(authorize(None)), None, &data);
    old_client
        .headers_mut()
        .insert("client-version", "1.0".parse().unwrap());
    let (status, _, body) = send(&h.app, old_client).await;
    assert_eq!(status, StatusCode::OK);
    let envelope: Envelope<AuthkeyOut> = sonic_rs::from_slice(&body).unwrap();
    assert!(!envelope.response_data.authorize_token.is_empty());
}

#[tokio::test]
async fn large_responses_are_gzipped_after_signing() {
    let h = harness();
    let large = || request("/main.php/test/large", Some(authorize(None)), None, "{}");

    let (status, plain_headers, plain) = send(&h.app, large()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!plain_headers.contains_key("content-encoding"));
    assert!(plain.len() >= 65_536);
    assert!(signature_valid(&h.public, &plain_headers, &plain, None));

    let mut gzip = large();
    gzip.headers_mut()
        .insert("accept-encoding", "gzip".parse().unwrap());
    let (status, headers, compressed) = send(&h.app, gzip).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-encoding"], "gzip");
    assert!(compressed.len() < plain.len());
    // PKCS#1 v1.5 signatures are deterministic, so equal headers mean the
    // signature was taken over the uncompressed body.
    assert_eq!(headers["x-message-sign"], plain_headers["x-message-sign"]);
}

#[tokio::test]
async fn small_responses_are_not_gzipped() {
    let h = harness();
    let mut client_key = [0u8; 32];
    OsRng.fill_bytes(&mut client_key);
    let data = authkey_data(&h.public, &client_key);

    let mut small = request("/main.php/login/authkey", Some(authorize(None)), None, &data);
    small
        .headers_mut()
        .insert("accept-encoding", "gzip".parse().unwrap());
    let (status, headers, _) = send(&h.app, small).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!headers.contains_key("content-encoding"));
}

#[tokio::test]
async fn tampered_or_missing_message_code_is_rejected() {
    let h = harness();
    let client = handshake(&h).await;
    let data = client.credentials("tamper-user", "pw");
    let code = client.shared_code(&data);
    let tampered = data.replacen("login_key", "login_kez", 1);

    let (status, _, body) = send(
        &h.app,
        request("/main.php/login/startUp", Some(authorize(Some(&client.token))), Some(&code), &tampered),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!String::from_utf8_lossy(&body).contains(&hex::encode(client.server_key)));

    let (status, _, _) = send(
        &h.app,
        request("/main.php/login/startUp", Some(authorize(Some(&client.token))), None, &data),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn disabled_verification_accepts_any_code() {
    let h = harness_with(|config| config.verify_xmc = false);
    let client = handshake(&h).await;
    let data = client.credentials("unchecked-user", "pw");

    let (status, _, _) = send(
        &h.app,
        request("/main.php/login/startUp", Some(authorize(Some(&client.token))), Some("00"), &data),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn authorize_header_is_checked_before_anything_else() {
    let h = harness();

    let (status, _, _) = send(&h.app, request("/main.php/login/authkey", None, None, "{}")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let wrong = "consumerKey=someone_else&timeStamp=1".to_string();
    let (status, _, _) = send(&h.app, request("/main.php/login/authkey", Some(wrong), None, "{}")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn bad_client_key_is_a_bad_request() {
    let h = harness();
    let data = r#"{"dummy_token":"AAAA","auth_data":"AAAA"}"#;
    let (status, _, body) = send(
        &h.app,
        request("/main.php/login/authkey", Some(authorize(None)), None, data),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: sonic_rs::Value = sonic_rs::from_slice(&body).unwrap();
    assert_eq!(error, sonic_rs::json!({"error": "Bad client key"}));
}

#[tokio::test]
async fn token_problems_are_forbidden() {
    let h = harness();
    let client = handshake(&h).await;
    let data = r#"{"a":1}"#;
    let code = client.shared_code(data);

    // Pre-authenticated session on a user endpoint.
    let (status, _, _) = send(
        &h.app,
        request("/main.php/test/user", Some(authorize(Some(&client.token))), Some(&code), data),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Forged token.
    let (status, _, _) = send(
        &h.app,
        request("/main.php/login/login", Some(authorize(Some("Zm9yZ2Vk"))), Some(&code), data),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // No token at all.
    let (status, _, _) = send(
        &h.app,
        request("/main.php/login/login", Some(authorize(None)), Some(&code), data),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn login_retires_the_pre_auth_token_and_logout_ends_the_session() {
    let h = harness();
    let client = handshake(&h).await;
    let pre_auth_token = client.token.clone();
    let data = client.credentials("rotate-user", "correct horse");
    let code = client.shared_code(&data);
    send(
        &h.app,
        request("/main.php/login/startUp", Some(authorize(Some(&pre_auth_token))), Some(&code), &data),
    )
    .await;
    let (status, _, body) = send(
        &h.app,
        request("/main.php/login/login", Some(authorize(Some(&pre_auth_token))), Some(&code), &data),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let login: Envelope<LoginOut> = sonic_rs::from_slice(&body).unwrap();
    assert_ne!(login.response_data.authorize_token, pre_auth_token);

    let (status, _, _) = send(
        &h.app,
        request("/main.php/login/login", Some(authorize(Some(&pre_auth_token))), Some(&code), &data),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let token = login.response_data.authorize_token;
    let empty = "[]";
    let empty_code = client.shared_code(empty);
    let (status, _, body) = send(
        &h.app,
        request("/main.php/login/logout", Some(authorize(Some(&token))), Some(&empty_code), empty),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let logout: Envelope<Vec<i64>> = sonic_rs::from_slice(&body).unwrap();
    assert!(logout.response_data.is_empty());

    let (status, _, _) = send(
        &h.app,
        request("/main.php/login/logout", Some(authorize(Some(&token))), Some(&empty_code), empty),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let h = harness();
    let client = handshake(&h).await;
    let data = client.credentials("careful-user", "right");
    let code = client.shared_code(&data);
    send(
        &h.app,
        request("/main.php/login/startUp", Some(authorize(Some(&client.token))), Some(&code), &data),
    )
    .await;

    let wrong = client.credentials("careful-user", "wrong");
    let (status, _, _) = send(
        &h.app,
        request(
            "/main.php/login/login",
            Some(authorize(Some(&client.token))),
            Some(&client.shared_code(&wrong)),
            &wrong,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn urlencoded_request_data_is_accepted() {
    let h = harness();
    let mut client_key = [0u8; 32];
    OsRng.fill_bytes(&mut client_key);
    let data = authkey_data(&h.public, &client_key);
    let body = serde_urlencoded::to_string([("request_data", data.as_str())]).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/main.php/login/authkey")
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Authorize", authorize(None))
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn maintenance_short_circuits_every_request() {
    let h = harness();
    std::fs::write(&h.maintenance_file, b"").unwrap();

    let (status, headers, body) = send(
        &h.app,
        request("/main.php/login/authkey", None, None, "{}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["maintenance"], "1");
    assert!(!headers.contains_key("x-message-sign"));
    assert_eq!(&body[..], b"[]");

    std::fs::remove_file(&h.maintenance_file).unwrap();
    let (status, _, _) = send(
        &h.app,
        request("/main.php/login/authkey", None, None, "{}"),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn state_loads_key_from_pem_file() {
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::LineEnding;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("server_key.pem");
    std::fs::write(&path, SERVER_KEY.to_pkcs1_pem(LineEnding::LF).unwrap().as_bytes()).unwrap();

    let mut config = Config::new(b"pem secret".to_vec());
    config.server_private_key = path;
    let state = AppState::new(&config).await.unwrap();

    let digest: [u8; 20] = Sha1::digest(b"body").into();
    let signature = state.server_key.sign_sha1(&digest).unwrap();
    SERVER_KEY
        .to_public_key()
        .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &signature)
        .unwrap();

    config.server_private_key = dir.path().join("missing.pem");
    assert!(AppState::new(&config).await.is_err());
}
