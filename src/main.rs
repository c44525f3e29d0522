use mirror_server::{
    build_router,
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    logging, AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await;

    // must stay alive for the file writer to keep flushing
    let _log_guard = logging::init_logging(&config.log);

    info!("mirror-server v{} starting", env!("CARGO_PKG_VERSION"));

    let addr = config.bind_address();
    let app_state = AppState::new(config)?;
    let app = build_router(app_state.clone());

    info!("listening on http://{}", addr);
    info!("serving files from {:?}", app_state.config.storage.root);
    info!("health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    app_state.shutdown().await;
    info!("bye");

    Ok(())
}
