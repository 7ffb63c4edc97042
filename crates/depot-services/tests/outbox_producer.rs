mod helpers;

use std::sync::Arc;

use depot_core::models::{validate_walk, JobOutcome, OutboxStatus, RecordOutcomeRequest};
use depot_core::DepotError;
use depot_queue::idempotency_key;
use futures::future::join_all;
use helpers::{setup, setup_with_queue, StalledQueue, UnavailableQueue};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_dispatch_hands_job_to_queue() {
    let mut h = setup().await;
    let owner = Uuid::new_v4();
    let (upload_id, job_id) = h.completed_upload(owner, b"resume").await;

    let event = h.producer.dispatch(job_id).await.unwrap();
    assert_eq!(event.status, OutboxStatus::Processing);
    assert_eq!(event.seq, 2);

    let delivered = h.jobs.as_mut().unwrap().recv().await.unwrap();
    assert_eq!(delivered.job.job_id, job_id);
    assert_eq!(delivered.job.upload_id, upload_id);
    assert_eq!(delivered.idempotency_key, idempotency_key(job_id));

    let statuses: Vec<_> = h
        .producer
        .job_history(job_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            OutboxStatus::Pending,
            OutboxStatus::Sending,
            OutboxStatus::Processing
        ]
    );
}

#[tokio::test]
async fn test_concurrent_dispatch_has_one_winner() {
    let mut h = setup().await;
    let (_, job_id) = h.completed_upload(Uuid::new_v4(), b"race").await;

    let results = join_all((0..8).map(|_| h.producer.dispatch(job_id))).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(DepotError::AlreadyProcessing { job_id: id }) if *id == job_id))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(losers, 7);

    let receiver = h.jobs.as_mut().unwrap();
    assert!(receiver.recv().await.is_some());
    assert!(receiver.try_recv().is_err());

    let history = h.producer.job_history(job_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(validate_walk(&history).is_ok());
}

#[tokio::test]
async fn test_dispatch_unknown_job_is_not_found() {
    let h = setup().await;
    let result = h.producer.dispatch(Uuid::new_v4()).await;
    assert!(matches!(result, Err(DepotError::NotFound(_))));
}

#[tokio::test]
async fn test_enqueue_failure_parks_job_in_sending() {
    let h = setup_with_queue(Arc::new(UnavailableQueue)).await;
    let (_, job_id) = h.completed_upload(Uuid::new_v4(), b"parked").await;

    let result = h.producer.dispatch(job_id).await;
    assert!(matches!(result, Err(DepotError::TransientIo(_))));

    let latest = h.repos.outbox.latest(job_id).await.unwrap().unwrap();
    assert_eq!(latest.status, OutboxStatus::Sending);

    // Parked jobs are not claimable until re-armed
    let again = h.producer.dispatch(job_id).await;
    assert!(matches!(again, Err(DepotError::AlreadyProcessing { .. })));
}

#[tokio::test]
async fn test_enqueue_timeout_is_transient() {
    let h = setup_with_queue(Arc::new(StalledQueue)).await;
    let (_, job_id) = h.completed_upload(Uuid::new_v4(), b"slow").await;

    let result = h.producer.dispatch(job_id).await;
    assert!(matches!(result, Err(DepotError::TransientIo(_))));

    let latest = h.repos.outbox.latest(job_id).await.unwrap().unwrap();
    assert_eq!(latest.status, OutboxStatus::Sending);
}

#[tokio::test]
async fn test_record_outcome_appends_one_terminal_event() {
    let h = setup().await;
    let (_, job_id) = h.completed_upload(Uuid::new_v4(), b"parse me").await;
    h.producer.dispatch(job_id).await.unwrap();

    let result = json!({"name": "Ada Lovelace", "skills": ["analysis"]});
    let event = h
        .producer
        .record_outcome(job_id, JobOutcome::Completed { result: result.clone() })
        .await
        .unwrap();
    assert_eq!(event.status, OutboxStatus::Completed);
    assert_eq!(event.result, Some(result));
    assert_eq!(event.error, None);

    let second = h.producer.record_outcome(job_id, JobOutcome::NotACv).await;
    assert!(matches!(second, Err(DepotError::FatalState(_))));

    let history = h.producer.job_history(job_id).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history.iter().filter(|e| e.status.is_terminal()).count(), 1);
    assert!(validate_walk(&history).is_ok());
}

#[tokio::test]
async fn test_record_outcome_requires_processing() {
    let h = setup().await;
    let (_, job_id) = h.completed_upload(Uuid::new_v4(), b"too early").await;

    let early = h
        .producer
        .record_outcome(job_id, JobOutcome::Failed { error: "boom".to_string() })
        .await;
    assert!(matches!(early, Err(DepotError::FatalState(_))));

    let unknown = h
        .producer
        .record_outcome(Uuid::new_v4(), JobOutcome::NotACv)
        .await;
    assert!(matches!(unknown, Err(DepotError::NotFound(_))));

    assert_eq!(h.producer.job_history(job_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_outcomes_have_one_winner() {
    let h = setup().await;
    let (_, job_id) = h.completed_upload(Uuid::new_v4(), b"callbacks").await;
    h.producer.dispatch(job_id).await.unwrap();

    let outcomes = vec![
        JobOutcome::NotACv,
        JobOutcome::Failed { error: "parser crashed".to_string() },
        JobOutcome::Completed { result: json!({}) },
    ];
    let results = join_all(
        outcomes
            .into_iter()
            .map(|outcome| h.producer.record_outcome(job_id, outcome)),
    )
    .await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let history = h.producer.job_history(job_id).await.unwrap();
    assert_eq!(history.iter().filter(|e| e.status.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_record_outcome_request_from_worker() {
    let h = setup().await;
    let (_, job_id) = h.completed_upload(Uuid::new_v4(), b"callback body").await;
    h.producer.dispatch(job_id).await.unwrap();

    let invalid: RecordOutcomeRequest =
        serde_json::from_value(json!({"jobId": job_id, "status": "failed"})).unwrap();
    let result = h.producer.record_outcome_request(invalid).await;
    assert!(matches!(result, Err(DepotError::Validation(_))));

    let valid: RecordOutcomeRequest = serde_json::from_value(
        json!({"jobId": job_id, "status": "failed", "error": "unreadable scan"}),
    )
    .unwrap();
    let event = h.producer.record_outcome_request(valid).await.unwrap();
    assert_eq!(event.status, OutboxStatus::Failed);
    assert_eq!(event.error.as_deref(), Some("unreadable scan"));
}

#[tokio::test]
async fn test_job_history_unknown_job() {
    let h = setup().await;
    assert!(matches!(
        h.producer.job_history(Uuid::new_v4()).await,
        Err(DepotError::NotFound(_))
    ));
}
