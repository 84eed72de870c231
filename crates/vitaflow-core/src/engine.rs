// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flow execution engine.
//!
//! The engine owns every mutation of a [`crate::model::ExecutionSnapshot`]:
//! assigning a flow to a patient, advancing through steps, revisiting
//! completed steps, and routing nodes to their processors. Concurrent
//! advances are not serialized; the guarded progress write makes races
//! resolve to the higher completed count.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{
    ExecutionCursor, ExecutionSnapshot, ExecutionStatus, FlowDefinition, FlowNode, progress_for,
};
use crate::persistence::{AdvanceUpdate, FlowStore, NewExecution};
use crate::processors::ProcessorContext;

/// Drives flow executions through their step graph.
pub struct ExecutionEngine {
    store: Arc<dyn FlowStore>,
    processors: ProcessorContext,
}

impl ExecutionEngine {
    /// Create an engine over the given store and processor context.
    pub fn new(store: Arc<dyn FlowStore>, processors: ProcessorContext) -> Self {
        Self { store, processors }
    }

    /// Assign a flow to a patient, creating a pending execution with a
    /// cursor built from the definition's patient-facing steps.
    #[instrument(skip(self, definition), fields(flow_id = %definition.id, patient_id))]
    pub async fn assign_flow(
        &self,
        definition: &FlowDefinition,
        patient_id: &str,
    ) -> Result<ExecutionSnapshot> {
        let cursor = ExecutionCursor::from_definition(definition);
        if cursor.steps.is_empty() {
            return Err(EngineError::ValidationError {
                field: "definition".to_string(),
                message: format!("flow '{}' has no patient-facing steps", definition.id),
            });
        }

        let execution = NewExecution {
            id: Uuid::new_v4().to_string(),
            flow_id: definition.id.clone(),
            flow_name: definition.name.clone(),
            patient_id: patient_id.to_string(),
            total_steps: cursor.steps.len() as i32,
            cursor: serde_json::to_string(&cursor)?,
        };
        self.store.create_execution(&execution).await?;

        info!(execution_id = %execution.id, total_steps = execution.total_steps, "Flow assigned");
        self.load(&execution.id).await
    }

    /// Complete the current step and move the cursor forward.
    ///
    /// Idempotent on completed executions: returns the current snapshot
    /// without touching state. A step revisited through
    /// [`Self::go_back_to_step`] can be re-submitted; the revised response
    /// replaces the stored one and the cursor returns to the first
    /// incomplete step, with progress unchanged.
    #[instrument(skip(self, response), fields(execution_id))]
    pub async fn advance(
        &self,
        execution_id: &str,
        response: Option<serde_json::Value>,
    ) -> Result<ExecutionSnapshot> {
        let snapshot = self.load(execution_id).await?;

        if snapshot.status == ExecutionStatus::Completed {
            let code = EngineError::AlreadyCompleted {
                execution_id: execution_id.to_string(),
            };
            info!(code = code.error_code(), "Advance on completed execution is a no-op");
            return Ok(snapshot);
        }

        let mut cursor = snapshot.cursor.clone();
        let index = cursor.index;
        let now = Utc::now();
        let revisit;
        {
            let step = cursor
                .steps
                .get_mut(index)
                .ok_or_else(|| EngineError::StepNotFound {
                    execution_id: execution_id.to_string(),
                    index,
                })?;
            revisit = step.completed;
            if response.is_some() {
                step.response = response;
            }
            step.completed = true;
            step.completed_at = Some(now);
        }

        if revisit {
            // Re-submission of a step reached through go_back_to_step. The
            // completed count is unchanged, so only the cursor moves; the
            // progress guard stays reserved for genuinely new completions.
            cursor.index = cursor.first_incomplete_index();
            self.store
                .save_cursor(execution_id, &serde_json::to_string(&cursor)?)
                .await?;

            self.record_event(
                execution_id,
                "step_completed",
                Some(json!({
                    "index": index,
                    "node_id": snapshot.cursor.steps[index].node_id,
                    "progress": snapshot.progress,
                    "resubmitted": true,
                })),
            )
            .await;

            info!(index, "Revisited step re-submitted");
            return self.load(execution_id).await;
        }

        let completed_steps = cursor.completed_count() as i32;
        let progress = progress_for(completed_steps, snapshot.total_steps);
        let done = progress >= 100;
        if !done {
            cursor.index = cursor.first_incomplete_index();
        }

        let update = AdvanceUpdate {
            status: if done {
                ExecutionStatus::Completed.as_str().to_string()
            } else {
                ExecutionStatus::Active.as_str().to_string()
            },
            progress,
            completed_steps,
            cursor: serde_json::to_string(&cursor)?,
            completed_at: done.then_some(now),
        };

        let applied = self.store.apply_advance(execution_id, &update).await?;
        if !applied {
            // A racing advance already recorded equal or higher progress;
            // the stored state wins.
            warn!(completed_steps, "Advance rejected by progress guard");
            return self.load(execution_id).await;
        }

        self.record_event(
            execution_id,
            "step_completed",
            Some(json!({
                "index": index,
                "node_id": snapshot.cursor.steps[index].node_id,
                "progress": progress,
            })),
        )
        .await;

        info!(progress, completed_steps, done, "Step completed");
        self.load(execution_id).await
    }

    /// Move the cursor back to a previously completed step.
    ///
    /// Fails with [`EngineError::StepNotCompleted`] for incomplete targets;
    /// on failure no state changes.
    #[instrument(skip(self), fields(execution_id, target_index))]
    pub async fn go_back_to_step(
        &self,
        execution_id: &str,
        target_index: usize,
    ) -> Result<ExecutionSnapshot> {
        let snapshot = self.load(execution_id).await?;

        let step =
            snapshot
                .cursor
                .steps
                .get(target_index)
                .ok_or_else(|| EngineError::StepNotFound {
                    execution_id: execution_id.to_string(),
                    index: target_index,
                })?;
        if !step.completed {
            return Err(EngineError::StepNotCompleted {
                execution_id: execution_id.to_string(),
                index: target_index,
            });
        }

        let mut cursor = snapshot.cursor.clone();
        cursor.index = target_index;
        self.store
            .save_cursor(execution_id, &serde_json::to_string(&cursor)?)
            .await?;

        self.record_event(
            execution_id,
            "step_reopened",
            Some(json!({ "index": target_index, "node_id": step.node_id })),
        )
        .await;

        info!(target_index, "Cursor moved back to completed step");
        self.load(execution_id).await
    }

    /// Route a node to its processor.
    ///
    /// Processor failure forces the execution to `failed` with the detail
    /// embedded in the cursor; node processing is never retried.
    #[instrument(skip(self, node), fields(execution_id, node_id = %node.id))]
    pub async fn dispatch_node(&self, execution_id: &str, node: &FlowNode) -> Result<()> {
        let snapshot = self.load(execution_id).await?;

        match self.processors.process(&snapshot, node).await {
            Ok(handle) => {
                // Detached by contract: delivery outcome is observed through
                // logs and the event log only.
                drop(handle);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "Node processing failed, failing execution");

                let mut cursor = snapshot.cursor.clone();
                cursor.error = Some(message.clone());
                let cursor_json = serde_json::to_string(&cursor)?;
                self.store
                    .mark_failed(execution_id, &cursor_json, &message)
                    .await?;

                self.record_event(
                    execution_id,
                    "failed",
                    Some(json!({ "node_id": node.id, "error": message, "code": e.error_code() })),
                )
                .await;

                Err(e)
            }
        }
    }

    async fn load(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
        let record = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            })?;
        record.snapshot()
    }

    async fn record_event(
        &self,
        execution_id: &str,
        event_type: &str,
        payload: Option<serde_json::Value>,
    ) {
        let payload = payload.map(|p| p.to_string());
        if let Err(e) = self
            .store
            .append_event(execution_id, event_type, payload.as_deref())
            .await
        {
            warn!(execution_id, event_type, error = %e, "Failed to append execution event");
        }
    }
}
