// tests/pg_queue.rs
mod common;

use common::setup_db;

use reportflow::queue::{MessageQueue, PgMessageQueue};
use serial_test::serial;
use std::collections::HashSet;
use std::time::Duration;

const VISIBILITY: Duration = Duration::from_millis(200);

fn queue(pool: &sqlx::PgPool, name: &str) -> PgMessageQueue {
    PgMessageQueue::new(pool.clone(), name, Duration::from_millis(20))
}

#[tokio::test]
#[serial]
async fn received_message_is_hidden_until_visibility_elapses() {
    let Some(pool) = setup_db().await else { return };
    let q = queue(&pool, "reports");
    let id = q.send(r#"{"job_id":1,"report_type":"payroll"}"#).await.unwrap();

    let first = q.receive(1, Duration::ZERO, VISIBILITY).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].message_id, id);
    assert_eq!(first[0].receive_count, 1);

    assert!(q.receive(1, Duration::ZERO, VISIBILITY).await.unwrap().is_empty());

    tokio::time::sleep(VISIBILITY + Duration::from_millis(50)).await;
    let second = q.receive(1, Duration::ZERO, VISIBILITY).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].receive_count, 2);
    assert_ne!(second[0].receipt, first[0].receipt);

    // the first receipt went stale with the redelivery
    assert!(!q.acknowledge(&first[0].receipt).await.unwrap());
    assert!(q.acknowledge(&second[0].receipt).await.unwrap());

    tokio::time::sleep(VISIBILITY + Duration::from_millis(50)).await;
    assert!(q.receive(1, Duration::ZERO, VISIBILITY).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn long_poll_returns_a_message_sent_during_the_wait() {
    let Some(pool) = setup_db().await else { return };
    let q = queue(&pool, "reports");
    let sender = q.clone();

    let send = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        sender.send(r#"{"job_id":2,"report_type":"payroll"}"#).await
    });

    let got = q
        .receive(1, Duration::from_secs(5), VISIBILITY)
        .await
        .unwrap();
    send.await.unwrap().unwrap();

    assert_eq!(got.len(), 1);
}

#[tokio::test]
#[serial]
async fn empty_wait_returns_nothing() {
    let Some(pool) = setup_db().await else { return };
    let q = queue(&pool, "reports");

    let got = q
        .receive(1, Duration::from_millis(100), VISIBILITY)
        .await
        .unwrap();

    assert!(got.is_empty());
}

#[tokio::test]
#[serial]
async fn concurrent_receivers_never_share_a_message() {
    let Some(pool) = setup_db().await else { return };
    let q = queue(&pool, "reports");
    for i in 0..10 {
        q.send(&format!(r#"{{"job_id":{i},"report_type":"payroll"}}"#))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let q = q.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            loop {
                let batch = q
                    .receive(2, Duration::ZERO, Duration::from_secs(60))
                    .await
                    .unwrap();
                if batch.is_empty() {
                    return ids;
                }
                ids.extend(batch.into_iter().map(|m| m.message_id));
            }
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 10);
    assert_eq!(unique.len(), 10);
}

#[tokio::test]
#[serial]
async fn queues_are_isolated_by_name() {
    let Some(pool) = setup_db().await else { return };
    let reports = queue(&pool, "reports");
    let other = queue(&pool, "other");
    reports
        .send(r#"{"job_id":3,"report_type":"payroll"}"#)
        .await
        .unwrap();

    assert!(other
        .receive(1, Duration::ZERO, VISIBILITY)
        .await
        .unwrap()
        .is_empty());
    assert!(!other.acknowledge("not-a-receipt").await.unwrap());
    assert_eq!(
        reports
            .receive(1, Duration::ZERO, VISIBILITY)
            .await
            .unwrap()
            .len(),
        1
    );
}
