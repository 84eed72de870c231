// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution engine tests: progress invariants, idempotent completion,
//! step revisits, and the concurrent advance guard.

mod common;

use serde_json::json;

use common::{TestContext, five_step_flow, linear_flow};
use vitaflow_core::error::EngineError;
use vitaflow_core::model::{ExecutionStatus, progress_for};
use vitaflow_core::persistence::AdvanceUpdate;
use vitaflow_core::persistence::FlowStore;

#[tokio::test]
async fn test_assign_flow_creates_pending_execution() {
    let ctx = TestContext::new().await;
    let snapshot = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    assert_eq!(snapshot.status, ExecutionStatus::Pending);
    assert_eq!(snapshot.progress, 0);
    assert_eq!(snapshot.completed_steps, 0);
    assert_eq!(snapshot.total_steps, 5);
    assert_eq!(snapshot.cursor.index, 0);
    assert_eq!(snapshot.patient_id, "patient-1");
    assert_eq!(snapshot.flow_name, "Anamnese inicial");
    assert!(snapshot.completed_at.is_none());
}

#[tokio::test]
async fn test_assign_flow_rejects_definition_without_steps() {
    let ctx = TestContext::new().await;
    let definition = linear_flow("flow-empty", "Vazio", vec![]);
    let err = ctx
        .engine
        .assign_flow(&definition, "patient-1")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationError { .. }));
}

#[tokio::test]
async fn test_advance_maintains_progress_invariant() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    for expected_completed in 1..=5 {
        let snapshot = ctx
            .engine
            .advance(&execution.id, Some(json!({ "answer": "ok" })))
            .await
            .unwrap();

        assert_eq!(snapshot.completed_steps, expected_completed);
        assert_eq!(
            snapshot.progress,
            progress_for(expected_completed, snapshot.total_steps)
        );
        assert!((0..=100).contains(&snapshot.progress));
        assert!(snapshot.completed_steps <= snapshot.total_steps);
        assert_eq!(
            snapshot.status == ExecutionStatus::Completed,
            snapshot.progress >= 100
        );
    }
}

#[tokio::test]
async fn test_advance_four_of_five_then_completion() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    for _ in 0..4 {
        ctx.engine.advance(&execution.id, None).await.unwrap();
    }
    let at_four = ctx.snapshot(&execution.id).await;
    assert_eq!(at_four.completed_steps, 4);
    assert_eq!(at_four.progress, 80);
    assert_eq!(at_four.status, ExecutionStatus::Active);
    assert!(at_four.completed_at.is_none());

    let done = ctx.engine.advance(&execution.id, None).await.unwrap();
    assert_eq!(done.completed_steps, 5);
    assert_eq!(done.progress, 100);
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_advance_on_completed_execution_is_noop() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    for _ in 0..5 {
        ctx.engine.advance(&execution.id, None).await.unwrap();
    }
    let completed = ctx.snapshot(&execution.id).await;

    let after = ctx
        .engine
        .advance(&execution.id, Some(json!({ "late": true })))
        .await
        .unwrap();

    assert_eq!(after.status, ExecutionStatus::Completed);
    assert_eq!(after.completed_steps, completed.completed_steps);
    assert_eq!(after.progress, 100);
    assert_eq!(after.completed_at, completed.completed_at);
    // The late response was not merged anywhere.
    assert!(
        after
            .cursor
            .steps
            .iter()
            .all(|s| s.response.as_ref().map(|r| r.get("late").is_none()).unwrap_or(true))
    );
}

#[tokio::test]
async fn test_advance_records_response_on_step() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    ctx.engine.advance(&execution.id, None).await.unwrap();
    let snapshot = ctx
        .engine
        .advance(&execution.id, Some(json!({ "answer": "8 horas" })))
        .await
        .unwrap();

    let step = &snapshot.cursor.steps[1];
    assert!(step.completed);
    assert!(step.completed_at.is_some());
    assert_eq!(step.response, Some(json!({ "answer": "8 horas" })));
    assert_eq!(snapshot.cursor.index, 2);
}

#[tokio::test]
async fn test_advance_unknown_execution() {
    let ctx = TestContext::new().await;
    let err = ctx.engine.advance("missing", None).await.unwrap_err();
    assert!(matches!(err, EngineError::ExecutionNotFound { .. }));
}

#[tokio::test]
async fn test_go_back_to_completed_step() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    ctx.engine.advance(&execution.id, None).await.unwrap();
    ctx.engine.advance(&execution.id, None).await.unwrap();

    let snapshot = ctx.engine.go_back_to_step(&execution.id, 0).await.unwrap();
    assert_eq!(snapshot.cursor.index, 0);
    // Progress and completion state are untouched by a revisit.
    assert_eq!(snapshot.completed_steps, 2);
    assert!(snapshot.cursor.steps[0].completed);
}

#[tokio::test]
async fn test_advance_after_go_back_resubmits_and_moves_forward() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    ctx.engine
        .advance(&execution.id, Some(json!({ "answer": "first" })))
        .await
        .unwrap();
    ctx.engine.advance(&execution.id, None).await.unwrap();
    ctx.engine.go_back_to_step(&execution.id, 0).await.unwrap();

    let snapshot = ctx
        .engine
        .advance(&execution.id, Some(json!({ "answer": "corrected" })))
        .await
        .unwrap();

    // The revised response replaced the original one.
    assert_eq!(
        snapshot.cursor.steps[0].response,
        Some(json!({ "answer": "corrected" }))
    );
    // The cursor moved on to the first incomplete step; progress untouched.
    assert_eq!(snapshot.cursor.index, 2);
    assert_eq!(snapshot.completed_steps, 2);
    assert_eq!(snapshot.progress, 40);

    // The execution is not stranded: the next advance completes a new step.
    let next = ctx.engine.advance(&execution.id, None).await.unwrap();
    assert_eq!(next.completed_steps, 3);
    assert_eq!(next.cursor.index, 3);
}

#[tokio::test]
async fn test_go_back_to_incomplete_step_fails_without_mutation() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    ctx.engine.advance(&execution.id, None).await.unwrap();
    let before = ctx.snapshot(&execution.id).await;

    let err = ctx
        .engine
        .go_back_to_step(&execution.id, 3)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::StepNotCompleted { index: 3, .. }
    ));

    let after = ctx.snapshot(&execution.id).await;
    assert_eq!(after.cursor.index, before.cursor.index);
    assert_eq!(after.completed_steps, before.completed_steps);
    assert_eq!(after.progress, before.progress);
}

#[tokio::test]
async fn test_go_back_out_of_range_fails() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    let err = ctx
        .engine
        .go_back_to_step(&execution.id, 42)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StepNotFound { index: 42, .. }));
}

#[tokio::test]
async fn test_progress_guard_rejects_stale_advance() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    ctx.engine.advance(&execution.id, None).await.unwrap();
    ctx.engine.advance(&execution.id, None).await.unwrap();
    let current = ctx.snapshot(&execution.id).await;
    assert_eq!(current.completed_steps, 2);

    // A racing writer that only saw one completed step loses against the
    // stored higher progress.
    let stale = AdvanceUpdate {
        status: "active".to_string(),
        progress: 20,
        completed_steps: 1,
        cursor: serde_json::to_string(&current.cursor).unwrap(),
        completed_at: None,
    };
    let applied = ctx.store.apply_advance(&execution.id, &stale).await.unwrap();
    assert!(!applied);

    let after = ctx.snapshot(&execution.id).await;
    assert_eq!(after.completed_steps, 2);
    assert_eq!(after.progress, 40);
}

#[tokio::test]
async fn test_advance_and_revisit_record_events() {
    let ctx = TestContext::new().await;
    let execution = ctx
        .engine
        .assign_flow(&five_step_flow(), "patient-1")
        .await
        .unwrap();

    ctx.engine.advance(&execution.id, None).await.unwrap();
    ctx.engine.go_back_to_step(&execution.id, 0).await.unwrap();

    let events = ctx.event_types(&execution.id).await;
    assert!(events.contains(&"step_completed".to_string()));
    assert!(events.contains(&"step_reopened".to_string()));
}
