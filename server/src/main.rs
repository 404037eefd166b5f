use tablesync_server::config::Config;
use tablesync_server::{app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablesync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    if config.auth_secret.is_none() {
        tracing::warn!("AUTH_SECRET is not set, accepting unauthenticated clients");
    }

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Tablesync server listening on {}", addr);

    axum::serve(listener, app(AppState::new(config))).await?;

    Ok(())
}
