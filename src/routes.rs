use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::post,
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::{
    handlers::login,
    middleware_layer::{
        client::{client_check, EndpointPolicy, Gate, MAX_REQUEST_BODY},
        compression::compression_layer,
        maintenance::maintenance,
        sign::sign_response,
    },
    state::AppState,
};

/// Puts every route of `router` behind the client check with `policy`.
///
/// Routes added to `router` afterwards are not covered.
pub fn with_policy(
    router: Router<AppState>,
    state: &AppState,
    policy: EndpointPolicy,
) -> Router<AppState> {
    router.route_layer(from_fn_with_state(
        Gate::new(state.clone(), policy),
        client_check,
    ))
}

/// The login endpoints.
pub fn login_routes(state: &AppState) -> Router<AppState> {
    let handshake_routes = with_policy(
        Router::new().route("/main.php/login/authkey", post(login::authkey)),
        state,
        EndpointPolicy::HANDSHAKE,
    );

    let session_routes = with_policy(
        Router::new()
            .route("/main.php/login/login", post(login::login))
            .route("/main.php/login/startUp", post(login::start_up))
            .route("/main.php/login/logout", post(login::logout)),
        state,
        EndpointPolicy::SESSION,
    );

    Router::new().merge(handshake_routes).merge(session_routes)
}

/// Builds the application with only the login endpoints.
pub fn app(state: AppState) -> Router {
    app_with(state, Router::new())
}

/// Builds the application with additional routes.
///
/// `routes` should already carry their policy, see [`with_policy`].
/// Response signing, compression of large bodies, maintenance mode and
/// tracing wrap everything.
pub fn app_with(state: AppState, routes: Router<AppState>) -> Router {
    Router::new()
        .merge(login_routes(&state))
        .merge(routes)
        .layer(from_fn_with_state(state.clone(), sign_response))
        .layer(compression_layer())
        .layer(from_fn_with_state(state.clone(), maintenance))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .with_state(state)
}
