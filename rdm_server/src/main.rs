use std::sync::Arc;

use rdm_core::config::Config;
use rdm_core::Core;
use rdm_server::server::{router, AppState};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::load();
    let addr = config.control_endpoint_addr.clone();
    let core = Arc::new(Core::start(config).await);

    let state = AppState::new(core.clone());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind control endpoint address");

    log::info!("rdmd listening on http://{}", addr);

    let shutdown_core = core.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            if let Err(e) = shutdown_core.save_history().await {
                log::warn!("[rdmd] failed to save history on shutdown: {}", e);
            }
        })
        .await
        .expect("server error");
}
