pub mod builders;
pub mod fake_backend;

use std::sync::Once;
use std::time::Duration;

use jobwarden::api::JobService;
use jobwarden::jobs::JobSnapshot;
use jobwarden::logs::{JobEvent, Subscription};
use jobwarden::types::{JobId, JobState};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Poll `get_job` until the job reaches `state`.
///
/// Panics if the job disappears or lands in a different terminal state.
pub async fn wait_for_state(service: &JobService, id: JobId, state: JobState) -> JobSnapshot {
    loop {
        let snapshot = service.get_job(id).expect("job should exist");
        if snapshot.state == state {
            return snapshot;
        }
        if snapshot.state.is_terminal() {
            panic!(
                "job {id} reached {} while waiting for {state}: {snapshot:?}",
                snapshot.state
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Read a subscription until the job's log closes.
pub async fn collect_events(mut subscription: Subscription) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription
        .recv()
        .await
        .expect("subscription should not overflow")
    {
        events.push(event);
    }
    events
}

/// Only the log payloads of `events`, in order.
pub fn log_payloads(events: &[JobEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| e.as_log().map(|line| line.payload.clone()))
        .collect()
}

/// Only the status changes of `events`, in order.
pub fn status_changes(events: &[JobEvent]) -> Vec<JobState> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Status { state } => Some(*state),
            _ => None,
        })
        .collect()
}
