// tests/subscribers.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, JobRequestBuilder};
use crate::common::fake_backend::{Gate, Script, ScriptedBackend};
use crate::common::{collect_events, init_tracing, log_payloads, wait_for_state, with_timeout};

use std::error::Error;
use std::sync::Arc;

use jobwarden::api::JobService;
use jobwarden::errors::JobwardenError;
use jobwarden::logs::JobEvent;
use jobwarden::types::{JobId, JobState, Progress, StreamKind};

type TestResult = Result<(), Box<dyn Error>>;

fn numbered_lines(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("l{i}")).collect()
}

fn chatty(n: usize) -> Script {
    Script::Exit {
        lines: numbered_lines(n)
            .into_iter()
            .map(|l| (StreamKind::Stdout, l))
            .collect(),
        code: 0,
    }
}

#[tokio::test]
async fn late_subscriber_gets_a_gap_marker_then_the_retained_tail() -> TestResult {
    init_tracing();
    let backend = ScriptedBackend::new().with_script("chatty", chatty(10));
    let config = ConfigFileBuilder::new().with_max_retained_lines(3).build();
    let service = JobService::with_backend(config, Arc::new(backend));

    let id = service.create_job(JobRequestBuilder::new("chatty").build())?;
    with_timeout(wait_for_state(&service, id, JobState::Completed)).await;

    let events = with_timeout(collect_events(service.subscribe(id)?)).await;
    assert_eq!(
        events.first(),
        Some(&JobEvent::Gap {
            dropped: 7,
            next_seq: 7
        })
    );
    assert_eq!(log_payloads(&events), vec!["l7", "l8", "l9"]);
    let seqs: Vec<u64> = events
        .iter()
        .filter_map(|e| e.as_log().map(|l| l.sequence))
        .collect();
    assert_eq!(seqs, vec![7, 8, 9]);
    assert_eq!(
        events.last(),
        Some(&JobEvent::Status {
            state: JobState::Completed
        })
    );

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn slow_subscriber_is_disconnected_without_affecting_the_job() -> TestResult {
    init_tracing();
    let backend = ScriptedBackend::new().with_script("chatty", chatty(20));
    let config = ConfigFileBuilder::new().with_subscriber_queue(2).build();
    let service = JobService::with_backend(config, Arc::new(backend));

    let id = service.create_job(JobRequestBuilder::new("chatty").build())?;
    // Registered before the scheduler gets to run, and never read while the
    // job produces output.
    let mut slow = service.subscribe(id)?;

    with_timeout(wait_for_state(&service, id, JobState::Completed)).await;

    let mut delivered = 0;
    let overflow = loop {
        match with_timeout(slow.recv()).await {
            Ok(Some(_)) => delivered += 1,
            Ok(None) => panic!("slow subscriber should have overflowed"),
            Err(e) => break e,
        }
    };
    assert!(delivered <= 2);
    assert!(matches!(
        overflow,
        JobwardenError::SubscriberOverflow { capacity: 2 }
    ));
    assert!(with_timeout(slow.recv()).await?.is_none());

    // The job and other subscribers are unaffected.
    let events = with_timeout(collect_events(service.subscribe(id)?)).await;
    assert_eq!(log_payloads(&events), numbered_lines(20));
    assert_eq!(service.get_job(id)?.state, JobState::Completed);

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn live_subscribers_see_strictly_increasing_sequences() -> TestResult {
    init_tracing();
    let gate = Gate::new();
    let lines: Vec<_> = numbered_lines(50)
        .into_iter()
        .enumerate()
        .map(|(i, l)| {
            let stream = if i % 3 == 0 {
                StreamKind::Stderr
            } else {
                StreamKind::Stdout
            };
            (stream, l)
        })
        .collect();
    let backend = ScriptedBackend::new().with_script(
        "mixed",
        Script::Gated {
            lines,
            gate: gate.clone(),
            code: 0,
        },
    );
    let service = JobService::with_backend(ConfigFileBuilder::new().build(), Arc::new(backend));

    let id = service.create_job(JobRequestBuilder::new("mixed").build())?;
    let first = tokio::spawn(collect_events(service.subscribe(id)?));
    with_timeout(wait_for_state(&service, id, JobState::Running)).await;
    let second = tokio::spawn(collect_events(service.subscribe(id)?));
    gate.open();

    for handle in [first, second] {
        let events = with_timeout(handle).await?;
        let seqs: Vec<u64> = events
            .iter()
            .filter_map(|e| e.as_log().map(|l| l.sequence))
            .collect();
        assert_eq!(seqs, (0..50).collect::<Vec<u64>>());
    }

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn reported_progress_reaches_subscribers_until_the_job_ends() -> TestResult {
    init_tracing();
    let gate = Gate::new();
    let backend = ScriptedBackend::new().with_script("worker", Script::gated(&gate));
    let service = JobService::with_backend(ConfigFileBuilder::new().build(), Arc::new(backend));

    let id = service.create_job(JobRequestBuilder::new("worker").build())?;
    with_timeout(wait_for_state(&service, id, JobState::Running)).await;

    let snapshot = service.report_progress(id, Progress::percent(140.0))?;
    assert_eq!(snapshot.progress, Some(Progress::Percent(100.0)));

    // A subscriber joining now gets the latest progress in its replay.
    let late = service.subscribe(id)?;
    gate.open();
    let events = with_timeout(collect_events(late)).await;
    assert!(events.contains(&JobEvent::Progress {
        value: Progress::Percent(100.0)
    }));

    wait_for_state(&service, id, JobState::Completed).await;
    let after = service.report_progress(id, Progress::Indeterminate)?;
    assert_eq!(after.progress, Some(Progress::Percent(100.0)));

    service.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn subscribing_to_an_unknown_job_is_not_found() -> TestResult {
    init_tracing();
    let service = JobService::with_backend(
        ConfigFileBuilder::new().build(),
        Arc::new(ScriptedBackend::new()),
    );

    let err = service.subscribe(JobId::new()).err().expect("unknown job");
    assert!(matches!(err, JobwardenError::JobNotFound(_)));

    service.shutdown().await?;
    Ok(())
}
