use std::sync::Arc;

use ddse::{
    ddse_router, init_logging, log_app_bind, log_app_start, log_store_opened,
    logging_config_from_env, GridRepository, ServerConfig, SqliteStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let cfg = ServerConfig::from_env()?;
    log_app_start(&logging_cfg, &cfg);

    let sqlite = SqliteStore::open(&cfg.db_path)?;
    log_store_opened(&cfg.db_path, sqlite.measurement_count()?);
    let store: Arc<dyn GridRepository> = Arc::new(sqlite);

    let app = ddse_router(store, cfg.estimator);
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
