use reportflow::api;
use reportflow::artifacts::ArtifactPublisher;
use reportflow::config;
use reportflow::consumer::{ConsumerConfig, QueueConsumer};
use reportflow::db;
use reportflow::handlers::{build_registry, HandlerOptions, JobContext};
use reportflow::jobs::{JobStore, PgJobStore};
use reportflow::queue::PgMessageQueue;
use reportflow::reports::PgDataSource;
use reportflow::storage::resolve_object_store;
use reportflow::telemetry;

use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let cfg = config::Config::from_env()?;

    let mut opts = HandlerOptions::new();
    if let Some(dur) = cfg.handler_timeout {
        opts = opts.timeout(dur);
    }
    // A worker with no handler must not start polling.
    let handler = match build_registry(opts).resolve(&cfg.worker_type) {
        Ok(handler) => handler,
        Err(e) => {
            error!(worker_type = %cfg.worker_type, error = %e, "cannot start worker");
            std::process::exit(1);
        }
    };

    let api_addr = cfg.admin_addr.clone();
    info!(
        worker_type = %handler.report_type(),
        queue = %cfg.queue.name,
        wait_secs = cfg.queue.wait.as_secs(),
        visibility_secs = cfg.queue.visibility_timeout.as_secs(),
        storage = ?cfg.storage,
        api = %api_addr.as_deref().unwrap_or("disabled"),
        "report worker starting"
    );

    let pool = db::make_pool(&cfg.database).await?;
    db::ping(&pool).await?;

    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let queue = Arc::new(PgMessageQueue::new(
        pool.clone(),
        &cfg.queue.name,
        cfg.queue.poll_interval,
    ));
    let publisher = ArtifactPublisher::new(
        resolve_object_store(&cfg.storage)?,
        cfg.artifacts.clone(),
    )
    .tag_content_type(cfg.storage.supports_attributes());

    let ctx = JobContext {
        store: jobs.clone(),
        source: Arc::new(PgDataSource::new(pool.clone())),
        publisher,
    };

    // ---- API task ----
    let app = api::router(api::ApiState { jobs: jobs.clone() });
    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(%addr, "status api listening");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Consumer task ----
    let consumer = QueueConsumer::new(
        queue,
        handler,
        ctx,
        ConsumerConfig {
            wait: cfg.queue.wait,
            visibility_timeout: cfg.queue.visibility_timeout,
            batch_size: 1,
            backoff: cfg.backoff.clone(),
        },
    );
    let worker_handle = tokio::spawn(consumer.run());

    tokio::select! {
        res = api_handle => res??,
        res = worker_handle => res?,
    }

    Ok(())
}
