use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use idol_gateway::{config::Config, routes, services::sweep, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");
    if !config.verify_xmc {
        tracing::warn!("⚠️  X-Message-Code verification is disabled");
    }

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    sweep::spawn(
        state.sessions.clone(),
        state.config.sweep_interval,
        state.config.session_expiry,
    );
    tracing::info!(
        "✅ Background session sweep started (every {}s)",
        state.config.sweep_interval.as_secs()
    );

    let addr = state.config.bind_addr;
    let app = routes::app(state);

    tracing::info!("🚀 Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
