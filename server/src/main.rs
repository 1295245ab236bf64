mod auth;
mod canvas;
mod config;
mod db;
mod errors;
mod routes;
mod state;
mod store;
mod ws;

use std::sync::Arc;
use tokio::net::TcpListener;

use config::{generate_config_template, Config, RuntimeSettings};
use ws::registry::ConnectionRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pixelfield_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pixelfield_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Pixelfield server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate the admin-token signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // First boot: make sure an administrator exists and surface the
    // generated credential exactly once.
    match store::identity::ensure_bootstrap_admin(&db)? {
        Some(credential) => {
            tracing::info!("==========================================================");
            tracing::info!("  FIRST BOOT: No administrators registered yet.");
            tracing::info!("  Created administrator 'admin' with credential:");
            tracing::info!("  {}", credential);
            tracing::info!("==========================================================");
        }
        None => {
            tracing::info!("Administrator account present");
        }
    }

    // Build application state
    let app_state = state::AppState {
        db,
        jwt_secret,
        registry: Arc::new(ConnectionRegistry::default()),
        settings: Arc::new(RuntimeSettings::from_config(&config)),
    };

    let (width, height) = app_state.settings.field_size();
    tracing::info!(
        width,
        height,
        cooldown_secs = app_state.settings.cooldown_secs(),
        "Canvas configured"
    );

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
