use clear_urls_service::config::Config;
use clear_urls_service::db::Db;
use clear_urls_service::logging::init_logging;
use clear_urls_service::rule_store::RuleStore;
use clear_urls_service::web::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _log_guard = init_logging(config.log_dir.as_deref());
    config.validate()?;

    let db = Db::new(&config.database_url).await?;
    let rules = RuleStore::new(db.clone(), &config);

    // Serve from the cached copy right away; the first tick fetches a fresh one.
    if let Err(e) = rules.load_cached().await {
        tracing::warn!("Could not restore cached rules: {:#}", e);
    }

    let rules_refresh = rules.clone();
    let (interval, attempts, delay) = (config.refresh_interval, config.retry_attempts, config.retry_delay);
    let refresh_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        loop {
            interval.tick().await;
            if let Err(e) = rules_refresh.refresh_with_retry(attempts, delay).await {
                tracing::error!("Failed to refresh rules: {:#}", e);
            }
        }
    });

    let state = AppState { db, rules };
    let web_task = web::run_server(config, state);

    tokio::select! {
        res = web_task => {
            if let Err(e) = res {
                tracing::error!("Web server stopped: {:#}", e);
            }
        }
        _ = refresh_task => {
            tracing::error!("Refresh task finished unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
