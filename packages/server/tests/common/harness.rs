//! Test harness driving the router and job runner over mock dependencies.
//!
//! No database or network is needed: every collaborator comes from
//! `TestDependencies`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use orderdesk_core::domains::messaging::WebhookDispatcher;
use orderdesk_core::kernel::jobs::{JobRunner, JobRunnerConfig};
use orderdesk_core::kernel::settings::keys;
use orderdesk_core::kernel::{ServerDeps, TestDependencies};
use orderdesk_core::server::routes::SIGNATURE_HEADER;
use orderdesk_core::server::{build_job_registry, build_router, AppState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::{APP_SECRET, VERIFY_TOKEN};

/// `X-Hub-Signature-256` value for `body`, as the platform would send it.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Router plus mocks for one test.
///
/// ```ignore
/// let mut ctx = TestHarness::new(TestDependencies::new());
/// ctx.start_runner();
/// assert_eq!(ctx.post_signed(&body).await, StatusCode::OK);
/// ctx.settle().await?;
/// ```
pub struct TestHarness {
    pub mocks: TestDependencies,
    pub deps: Arc<ServerDeps>,
    pub router: Router,
    runner: Option<(CancellationToken, JoinHandle<()>)>,
}

impl TestHarness {
    /// Build a harness over `mocks`, adding the webhook secrets to its settings.
    pub fn new(mocks: TestDependencies) -> Self {
        mocks.settings.set(keys::WEBHOOK_VERIFY_TOKEN, VERIFY_TOKEN);
        mocks.settings.set(keys::WEBHOOK_APP_SECRET, APP_SECRET);

        let deps = mocks.into_server_deps();
        let state = AppState {
            deps: deps.clone(),
            dispatcher: WebhookDispatcher::new(mocks.dedup.clone(), mocks.job_queue.clone()),
            job_queue: mocks.job_queue.clone(),
            db_pool: None,
        };

        Self {
            router: build_router(state),
            deps,
            mocks,
            runner: None,
        }
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("valid request");
        self.send(request).await
    }

    /// POST a webhook body signed with the configured app secret.
    pub async fn post_signed(&self, body: &str) -> StatusCode {
        let signature = sign_body(APP_SECRET, body.as_bytes());
        self.post_webhook(body, Some(&signature)).await
    }

    pub async fn post_webhook(&self, body: &str, signature: Option<&str>) -> StatusCode {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("valid request");
        self.send(request).await.0
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Start a job runner over the mock queue.
    pub fn start_runner(&mut self) {
        let registry =
            Arc::new(build_job_registry(self.deps.clone()).expect("handlers register once"));
        let config = JobRunnerConfig {
            poll_interval: Duration::from_millis(20),
            ..JobRunnerConfig::with_worker_id("test-runner")
        };
        let runner = JobRunner::with_config(self.mocks.job_queue.clone(), registry, config);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let _ = runner.run(token).await;
        });
        self.runner = Some((shutdown, handle));
    }

    pub async fn stop_runner(&mut self) {
        if let Some((shutdown, handle)) = self.runner.take() {
            shutdown.cancel();
            let _ = handle.await;
        }
    }

    /// Wait until no job is pending or running.
    pub async fn settle(&self) -> Result<()> {
        self.settle_within(Duration::from_secs(5)).await
    }

    /// Like [`settle`](Self::settle), for chains with long scheduled delays
    /// (use with a paused clock).
    pub async fn settle_within(&self, limit: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.mocks.job_queue.live_jobs().is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("jobs still live: {:?}", self.mocks.job_queue.stats());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
