use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use opentap::db::Store;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &opentap::config::CONFIG;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    let db_file = cfg.db_file();
    let first_run = !db_file.exists();
    info!(
        db_path = %db_file.display(),
        first_run,
        listen_addr = %cfg.listen_addr,
        max_image_bytes = cfg.max_image_bytes,
        loglevel = %cfg.loglevel
    );

    // Migration completes before anything is served.
    let store = Store::initialize(&db_file, cfg.store_options()).await?;
    let repos = store.migrate().await?;

    if let Err(e) = repos.images.sweep_orphans().await {
        warn!(error = %e, "orphaned image sweep failed");
    }

    if first_run && cfg.seed_on_first_run {
        opentap::service::seed::seed_if_empty(&repos).await?;
    }

    let state = opentap::server::TapState::new(repos.clone());
    let app = opentap::server::tap_router(state);

    let listener = TcpListener::bind(cfg.listen_addr.as_str()).await?;
    info!("HTTP server listening on {}", cfg.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    repos.close().await;
    Ok(())
}
