//! Concurrent requests sharing one simulation execution.

mod common;

use std::time::Duration;

use futures::future::join_all;

use simroute::adapters::simulation::ScriptedSimulationEngine;
use simroute::domain::models::CallOrigin;
use simroute::{Request, RequestStatus};

use common::{harness_with, pin_cell_spec, test_config};

fn slow_engine(millis: u64) -> ScriptedSimulationEngine {
    ScriptedSimulationEngine::new().with_delay(Duration::from_millis(millis))
}

#[tokio::test]
async fn test_concurrent_identical_studies_share_one_execution() {
    let h = harness_with(test_config(), slow_engine(100), None);
    h.engine.push_outcome(1.0034, 45.0);

    let a = h.orchestrator.submit(Request::new("run the pin cell").with_spec(pin_cell_spec()));
    let b = h.orchestrator.submit(Request::new("run the pin cell").with_spec(pin_cell_spec()));
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(h.engine.call_count(), 1);
    assert_eq!(h.orchestrator.invoker().table().executions(), 1);
    assert_eq!(a.status, RequestStatus::Completed);
    assert_eq!(b.status, RequestStatus::Completed);
    assert_eq!(a.tool_calls[0].result, b.tool_calls[0].result);

    let mut origins = vec![a.tool_calls[0].origin, b.tool_calls[0].origin];
    origins.sort_by_key(|o| format!("{o:?}"));
    assert_eq!(origins, vec![CallOrigin::Executed, CallOrigin::Joined]);
}

#[tokio::test]
async fn test_many_waiters_one_execution() {
    let h = harness_with(test_config(), slow_engine(100), None);
    h.engine.push_outcome(0.9981, 30.0);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            h.orchestrator
                .submit(Request::new(format!("run the pin cell #{i}")).with_spec(pin_cell_spec()))
        })
        .collect();
    let results = join_all(handles).await;

    assert_eq!(h.engine.call_count(), 1);
    for result in results {
        let result = result.unwrap();
        assert_eq!(result.status, RequestStatus::Completed);
        assert_eq!(result.convergence.as_ref().unwrap().estimate, 0.9981);
    }
}

#[tokio::test]
async fn test_cancelling_one_waiter_keeps_the_shared_execution() {
    let h = harness_with(test_config(), slow_engine(300), None);
    h.engine.push_outcome(1.0012, 35.0);

    let first = Request::new("run the pin cell").with_spec(pin_cell_spec());
    let first_id = first.id;
    let a = h.orchestrator.submit(first);
    let b = h.orchestrator.submit(Request::new("run the pin cell").with_spec(pin_cell_spec()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.orchestrator.cancel(first_id));

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert_eq!(a.status, RequestStatus::Failed);
    assert_eq!(a.error.as_ref().unwrap().kind, "cancelled");
    assert_eq!(b.status, RequestStatus::Completed);
    assert_eq!(b.convergence.as_ref().unwrap().estimate, 1.0012);
    assert_eq!(h.engine.call_count(), 1);
}

#[tokio::test]
async fn test_failed_shared_execution_fails_every_waiter_and_is_retried() {
    let h = harness_with(test_config(), slow_engine(100), None);
    h.engine.push_error("out of memory");
    h.engine.push_outcome(1.0, 20.0);

    let a = h.orchestrator.submit(Request::new("run the pin cell").with_spec(pin_cell_spec()));
    let b = h.orchestrator.submit(Request::new("run the pin cell").with_spec(pin_cell_spec()));
    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert_eq!(a.status, RequestStatus::Failed);
    assert_eq!(b.status, RequestStatus::Failed);
    assert_eq!(h.engine.call_count(), 1);

    let retry = h
        .orchestrator
        .process(Request::new("run the pin cell").with_spec(pin_cell_spec()))
        .await;
    assert_eq!(retry.status, RequestStatus::Completed);
    assert_eq!(h.engine.call_count(), 2);
}
