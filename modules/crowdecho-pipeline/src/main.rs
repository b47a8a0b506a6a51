use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crowdecho_common::Config;
use crowdecho_pipeline::classify::ClaudeClassifier;
use crowdecho_pipeline::fetcher::RedditSource;
use crowdecho_pipeline::notify::{NoopSink, ResendMailer};
use crowdecho_pipeline::scheduler::JobManager;
use crowdecho_pipeline::traits::NotifySink;
use crowdecho_store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crowdecho=info".parse()?))
        .init();

    info!("Crowdecho pipeline starting...");

    let config = Config::from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let store = PgStore::new(pool);
    store.migrate().await?;

    let source = Arc::new(RedditSource::new(&config.apify_api_key));
    let classifier = Arc::new(ClaudeClassifier::new(&config.anthropic_api_key));
    let sink: Arc<dyn NotifySink> = match &config.resend_api_key {
        Some(key) => Arc::new(ResendMailer::new(key, &config.alert_from_address)),
        None => {
            info!("RESEND_API_KEY not set, notifications go to the noop sink");
            Arc::new(NoopSink)
        }
    };

    let mut manager = JobManager::new(
        Arc::new(store.clone()),
        source,
        classifier,
        sink,
        config.fetch_page_size,
    )
    .await?;

    // Re-register recurring jobs for every tenant whose ingestion is on.
    let tenants = store.active_ingestion_tenants().await?;
    info!(tenants = tenants.len(), "Registering jobs for active tenants");
    for prefs in &tenants {
        manager.register_tenant_jobs(prefs).await?;
    }

    manager.start().await?;
    info!("Scheduler running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    manager.shutdown().await?;

    Ok(())
}
