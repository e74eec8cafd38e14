//! End-to-end convergence behavior through the orchestrator.

mod common;

use std::time::Duration;

use simroute::adapters::simulation::ScriptedSimulationEngine;
use simroute::domain::models::{CallOrigin, DispatchOutput};
use simroute::services::event_bus::{EventPayload, RequestEvent};
use simroute::{ConvergenceStatus, Request, RequestStatus};

use common::{event_names, harness, harness_with, pin_cell_spec, test_config};

#[tokio::test]
async fn test_converges_when_uncertainty_meets_target() {
    let h = harness(test_config());
    h.engine.push_outcome(1.0, 500.0);
    h.engine.push_outcome(1.001, 80.0);

    let request = Request::new("run the pin cell").with_spec(pin_cell_spec());
    let events = h.orchestrator.subscribe(request.id);
    let result = h.orchestrator.process(request).await;

    assert_eq!(result.status, RequestStatus::Completed);
    let convergence = result.convergence.as_ref().unwrap();
    assert_eq!(convergence.status, ConvergenceStatus::Converged);
    assert_eq!(convergence.iteration, 2);
    assert_eq!(result.convergence_trace.len(), 2);
    assert_eq!(h.engine.call_count(), 2);

    assert_eq!(
        event_names(&events.collect().await),
        vec![
            "routing_decided",
            "tool_call_started",
            "tool_call_completed",
            "convergence_iteration",
            "tool_call_started",
            "tool_call_completed",
            "convergence_iteration",
            "request_completed",
        ]
    );
}

#[tokio::test]
async fn test_particles_and_batches_never_decrease() {
    let h = harness(test_config());
    for uncertainty in [900.0, 700.0, 400.0, 250.0, 90.0] {
        h.engine.push_outcome(1.0 + uncertainty * 1e-5, uncertainty);
    }

    let result = h
        .orchestrator
        .process(Request::new("run it").with_spec(pin_cell_spec()))
        .await;

    let trace = &result.convergence_trace;
    assert!(trace.len() <= 5);
    for pair in trace.windows(2) {
        assert!(pair[1].particles >= pair[0].particles);
        assert!(pair[1].batches >= pair[0].batches);
    }
    let calls = h.engine.calls();
    for pair in calls.windows(2) {
        assert!(pair[1].particles >= pair[0].particles);
    }
}

#[tokio::test]
async fn test_stable_estimate_above_target_plateaus() {
    let h = harness(test_config());
    h.engine.push_outcome(1.0, 500.0);
    h.engine.push_outcome(1.00003, 400.0);

    let result = h
        .orchestrator
        .process(Request::new("run the pin cell").with_spec(pin_cell_spec()))
        .await;

    assert_eq!(result.status, RequestStatus::Completed);
    let convergence = result.convergence.as_ref().unwrap();
    assert_eq!(convergence.status, ConvergenceStatus::Plateaued);
    assert!(result.suggestions.iter().any(|s| s.contains("max_particles")));
}

#[tokio::test]
async fn test_exhaustion_is_a_completed_result() {
    let mut config = test_config();
    config.convergence.max_particles = config.convergence.initial_particles;
    config.convergence.max_batches = config.convergence.initial_batches;
    let h = harness(config);
    h.engine.push_outcome(1.0, 500.0);

    let result = h
        .orchestrator
        .process(Request::new("run the pin cell").with_spec(pin_cell_spec()))
        .await;

    assert_eq!(result.status, RequestStatus::Completed);
    assert!(result.error.is_none());
    assert_eq!(
        result.convergence.as_ref().unwrap().status,
        ConvergenceStatus::Exhausted
    );
    match result.output {
        Some(DispatchOutput::Study { ref record }) => {
            assert_eq!(record.convergence, Some(ConvergenceStatus::Exhausted));
        }
        ref other => panic!("unexpected output: {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_iteration_fails_the_request() {
    let h = harness(test_config());
    h.engine.push_outcome(1.0, 500.0);
    h.engine.push_error("fission source did not converge");

    let request = Request::new("run the pin cell").with_spec(pin_cell_spec());
    let events = h.orchestrator.subscribe(request.id);
    let result = h.orchestrator.process(request).await;

    assert_eq!(result.status, RequestStatus::Failed);
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.kind, "tool_execution");
    assert!(error.message.contains("fission source did not converge"));
    assert!(h.store.is_empty().await);

    let names = event_names(&events.collect().await);
    assert_eq!(names.last(), Some(&"request_failed"));
    assert!(!names.contains(&"request_completed"));
}

#[tokio::test]
async fn test_completed_studies_are_persisted_and_reused() {
    let h = harness(test_config());
    h.engine.push_outcome(1.0021, 60.0);

    let first = h
        .orchestrator
        .process(Request::new("run the pin cell").with_spec(pin_cell_spec()))
        .await;
    let second = h
        .orchestrator
        .process(Request::new("run the pin cell again").with_spec(pin_cell_spec()))
        .await;

    assert_eq!(first.status, RequestStatus::Completed);
    assert_eq!(second.status, RequestStatus::Completed);
    assert_eq!(h.engine.call_count(), 1);
    assert_eq!(second.tool_calls[0].origin, CallOrigin::Cached);
    assert_eq!(h.store.len().await, 2);

    let first_run = match first.output {
        Some(DispatchOutput::Study { ref record }) => record.run_id,
        ref other => panic!("unexpected output: {other:?}"),
    };
    assert!(second
        .suggestions
        .iter()
        .any(|s| s.contains(&first_run.to_string())));
}

#[tokio::test]
async fn test_disabled_convergence_runs_once() {
    let mut config = test_config();
    config.convergence.enabled = false;
    let h = harness(config);
    h.engine.push_outcome(0.987, 900.0);

    let result = h
        .orchestrator
        .process(Request::new("run the pin cell").with_spec(pin_cell_spec()))
        .await;

    assert_eq!(h.engine.call_count(), 1);
    let convergence = result.convergence.as_ref().unwrap();
    assert_eq!(convergence.iteration, 1);
    assert_eq!(convergence.status, ConvergenceStatus::Converged);
}

#[tokio::test]
async fn test_reloaded_config_applies_to_later_requests() {
    let h = harness(test_config());
    h.engine.push_outcome(1.0, 500.0);

    let mut relaxed = test_config();
    relaxed.convergence.target_uncertainty_pcm = 1000.0;
    h.orchestrator.config().replace(relaxed).unwrap();

    let result = h
        .orchestrator
        .process(Request::new("run the pin cell").with_spec(pin_cell_spec()))
        .await;
    let convergence = result.convergence.as_ref().unwrap();
    assert_eq!(convergence.iteration, 1);
    assert_eq!(convergence.status, ConvergenceStatus::Converged);
}

#[tokio::test]
async fn test_cancelling_a_running_study() {
    let h = harness_with(
        test_config(),
        ScriptedSimulationEngine::new().with_delay(Duration::from_secs(30)),
        None,
    );
    h.engine.push_outcome(1.0, 10.0);

    let request = Request::new("run the pin cell").with_spec(pin_cell_spec());
    let id = request.id;
    let handle = h.orchestrator.submit(request);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.orchestrator.cancel(id));

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancelled request finishes promptly")
        .unwrap();
    assert_eq!(result.status, RequestStatus::Failed);
    assert_eq!(result.error.as_ref().unwrap().kind, "cancelled");
    assert!(!h.orchestrator.cancel(id));
    assert_eq!(h.orchestrator.invoker().table().in_flight(), 0);
}

fn wall_clock_config() -> simroute::Config {
    let mut config = test_config();
    config.convergence.max_wall_time_secs = 1;
    config.convergence.max_iterations = 8;
    config
}

fn convergence_statuses(events: &[RequestEvent]) -> Vec<ConvergenceStatus> {
    events
        .iter()
        .filter_map(|e| match e.payload {
            EventPayload::ConvergenceIteration(ref state) => Some(state.status),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_wall_clock_expiry_mid_iteration_exhausts() {
    let h = harness_with(
        wall_clock_config(),
        ScriptedSimulationEngine::new().with_delay(Duration::from_millis(700)),
        None,
    );
    h.engine.push_outcome(1.0, 500.0);
    h.engine.push_outcome(1.01, 450.0);

    let request = Request::new("run the pin cell").with_spec(pin_cell_spec());
    let events = h.orchestrator.subscribe(request.id);
    let result = h.orchestrator.process(request).await;

    assert_eq!(result.status, RequestStatus::Completed);
    assert!(result.error.is_none());
    let convergence = result.convergence.as_ref().unwrap();
    assert_eq!(convergence.status, ConvergenceStatus::Exhausted);
    assert_eq!(convergence.iteration, 1);
    assert_eq!(result.convergence_trace.len(), 1);
    // The second iteration was started and then abandoned at the deadline.
    assert_eq!(h.engine.call_count(), 2);

    match result.output {
        Some(DispatchOutput::Study { ref record }) => {
            assert_eq!(record.convergence, Some(ConvergenceStatus::Exhausted));
        }
        ref other => panic!("unexpected output: {other:?}"),
    }

    let events = events.collect().await;
    assert_eq!(
        convergence_statuses(&events),
        vec![ConvergenceStatus::Running, ConvergenceStatus::Exhausted]
    );
    assert_eq!(event_names(&events).last(), Some(&"request_completed"));
    assert_eq!(h.orchestrator.invoker().table().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wall_clock_expiry_between_iterations_exhausts() {
    let h = harness_with(
        wall_clock_config(),
        ScriptedSimulationEngine::new().with_delay(Duration::from_millis(1100)),
        None,
    );
    h.engine.push_outcome(1.0, 500.0);

    let result = h
        .orchestrator
        .process(Request::new("run the pin cell").with_spec(pin_cell_spec()))
        .await;

    assert_eq!(result.status, RequestStatus::Completed);
    let convergence = result.convergence.as_ref().unwrap();
    assert_eq!(convergence.status, ConvergenceStatus::Exhausted);
    assert_eq!(convergence.iteration, 1);
    assert_eq!(h.engine.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_iteration_is_not_cut_short_by_the_ceiling() {
    let h = harness_with(
        wall_clock_config(),
        ScriptedSimulationEngine::new().with_delay(Duration::from_secs(3)),
        None,
    );
    h.engine.push_outcome(1.0, 40.0);

    let result = h
        .orchestrator
        .process(Request::new("run the pin cell").with_spec(pin_cell_spec()))
        .await;

    assert_eq!(result.status, RequestStatus::Completed);
    assert_eq!(
        result.convergence.as_ref().unwrap().status,
        ConvergenceStatus::Converged
    );
}
