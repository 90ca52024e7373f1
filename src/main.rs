use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use page_monitor::config::{LogFormat, Settings};
use page_monitor::fetch::{create_client, HttpFetcher};
use page_monitor::notify::{LogNotifier, Notifier, WebhookNotifier};
use page_monitor::storage::{SqliteStorage, Storage};
use page_monitor::{Monitor, SchedulerOptions};

fn init_logging(format: LogFormat) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("page_monitor=info".parse()?);

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(settings.log_format)?;

    info!("Starting Page Monitor");

    // Initialize storage
    let storage = Arc::new(SqliteStorage::new(&settings.database_path)?);
    storage.migrate().await?;

    let fetcher = Arc::new(HttpFetcher::from_settings(&settings)?);

    let notifier: Arc<dyn Notifier> = match &settings.notification_webhook {
        Some(webhook) => {
            let client = create_client(&settings.user_agent, settings.request_timeout())?;
            Arc::new(WebhookNotifier::new(client, webhook.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let options = SchedulerOptions {
        tick: settings.tick_interval(),
        max_concurrent_checks: settings.max_concurrent_checks,
        settle_delay: settings.settle_delay(),
    };

    let monitor = Monitor::new(options, settings.defaults.clone(), fetcher, storage, notifier);
    monitor.restore().await?;

    for entry in &settings.watches {
        if monitor.is_watching(&entry.url) {
            continue;
        }
        if let Err(e) = monitor.import_watch(&entry.url, entry.overrides.clone()).await {
            error!("Could not import {}: {}", entry.url, e);
        }
    }

    let scheduler = monitor.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    scheduler.shutdown().await;

    info!("Page Monitor stopped");
    Ok(())
}
