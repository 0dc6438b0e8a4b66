// tests/pg_pipeline.rs
mod common;

use common::setup_db;

use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

use reportflow::artifacts::{ArtifactConfig, ArtifactPublisher};
use reportflow::consumer::{ConsumerConfig, Disposition, QueueConsumer};
use reportflow::handlers::{build_registry, HandlerOptions, JobContext};
use reportflow::jobs::{JobStatus, JobStore, NewJob, PgJobStore};
use reportflow::queue::{MessageQueue, PgMessageQueue, ReportMessage};
use reportflow::reports::PgDataSource;

#[tokio::test]
#[serial]
async fn transactions_job_runs_end_to_end() {
    let Some(pool) = setup_db().await else { return };

    sqlx::query("DROP TABLE IF EXISTS report_fixture_tx")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("CREATE TABLE report_fixture_tx (id INT PRIMARY KEY, name TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO report_fixture_tx VALUES (1, 'A'), (2, 'B, Jr.')")
        .execute(&pool)
        .await
        .unwrap();

    let jobs = Arc::new(PgJobStore::new(pool.clone()));
    let queue = Arc::new(PgMessageQueue::new(
        pool.clone(),
        "reports",
        Duration::from_millis(20),
    ));
    let objects = Arc::new(InMemory::new());
    let scratch = tempfile::tempdir().unwrap();

    let job_id = jobs
        .insert(NewJob {
            job_type: "transactions".into(),
            params: json!({
                "query": "SELECT id, name FROM report_fixture_tx ORDER BY id",
                "columnNames": "ID,Name$id,name"
            }),
        })
        .await
        .unwrap();
    queue
        .send(&ReportMessage::new(job_id, "transactions").to_body())
        .await
        .unwrap();

    let handler = build_registry(HandlerOptions::new().timeout(Duration::from_secs(30)))
        .resolve("transactions")
        .unwrap();
    let ctx = JobContext {
        store: jobs.clone(),
        source: Arc::new(PgDataSource::new(pool.clone())),
        publisher: ArtifactPublisher::new(objects.clone(), ArtifactConfig::new(scratch.path())),
    };
    let mut consumer = QueueConsumer::new(
        queue.clone(),
        handler,
        ctx,
        ConsumerConfig {
            wait: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(30),
            ..ConsumerConfig::default()
        },
    );

    consumer.tick().await;
    let handled = consumer.tick().await;

    let [Disposition::Completed { artifact_key, .. }] = handled.as_slice() else {
        panic!("unexpected dispositions: {handled:?}");
    };
    let body = objects
        .get(&ObjectPath::from(artifact_key.as_str()))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&body[..], b"ID,Name\n1,A\n2,\"B, Jr.\"".as_slice());

    let job = jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.artifact_key.as_deref(), Some(artifact_key.as_str()));

    let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(left, 0);

    sqlx::query("DROP TABLE report_fixture_tx")
        .execute(&pool)
        .await
        .unwrap();
}
