//! Webhook verification, signature checks and dedup.

mod common;

use axum::http::StatusCode;
use common::*;
use orderdesk_core::domains::messaging::ProcessIncomingMessageJob;
use orderdesk_core::kernel::jobs::Job;
use orderdesk_core::kernel::TestDependencies;

fn harness() -> TestHarness {
    TestHarness::new(TestDependencies::new())
}

#[tokio::test]
async fn verification_echoes_challenge_for_matching_token() {
    let ctx = harness();

    let (status, body) = ctx
        .get(&format!(
            "/webhook?hub.mode=subscribe&hub.verify_token={}&hub.challenge=12345",
            VERIFY_TOKEN
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "12345");

    // Plain parameter names are accepted too.
    let (status, body) = ctx
        .get(&format!(
            "/webhook?mode=subscribe&verify_token={}&challenge=abc",
            VERIFY_TOKEN
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "abc");
}

#[tokio::test]
async fn verification_rejects_wrong_token() {
    let ctx = harness();

    let (status, _) = ctx
        .get("/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=12345")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unsigned_or_badly_signed_events_are_rejected_before_parsing() {
    let ctx = harness();
    let body = text_delivery("wamid.1", "hola");

    assert_eq!(ctx.post_webhook(&body, None).await, StatusCode::UNAUTHORIZED);
    assert_eq!(
        ctx.post_webhook(&body, Some("sha256=deadbeef")).await,
        StatusCode::UNAUTHORIZED
    );
    // Not JSON, but the signature check comes first.
    assert_eq!(
        ctx.post_webhook("not json", None).await,
        StatusCode::UNAUTHORIZED
    );
    assert!(ctx.mocks.job_queue.live_jobs().is_empty());
}

#[tokio::test]
async fn signed_invalid_json_is_a_bad_request() {
    let ctx = harness();
    assert_eq!(ctx.post_signed("not json").await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn redelivered_event_is_processed_once() {
    let ctx = harness();
    let body = text_delivery("wamid.dup", "hola");

    assert_eq!(ctx.post_signed(&body).await, StatusCode::OK);
    assert_eq!(ctx.post_signed(&body).await, StatusCode::OK);

    let jobs = ctx
        .mocks
        .job_queue
        .jobs_of_type(ProcessIncomingMessageJob::JOB_TYPE);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, "inbound:wamid.dup");

    let job: ProcessIncomingMessageJob = jobs[0].payload().unwrap();
    assert_eq!(job.message.from, CUSTOMER_PHONE);
    assert_eq!(job.message.contact_name.as_deref(), Some("Ana"));
}

#[tokio::test]
async fn status_updates_enqueue_nothing() {
    let ctx = harness();

    assert_eq!(ctx.post_signed(&status_delivery()).await, StatusCode::OK);
    assert!(ctx.mocks.job_queue.live_jobs().is_empty());
}
