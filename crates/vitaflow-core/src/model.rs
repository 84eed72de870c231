// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flow data model.
//!
//! Flow definitions come from the visual editor as a node graph. Node
//! payloads are a typed tagged union; editor documents using the legacy
//! Portuguese field names (`quantidade`, `titulo`, `arquivos`, ...) still
//! deserialize via serde aliases.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// Node graph
// ============================================================================

/// A flow definition as authored in the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Unique flow identifier.
    pub id: String,
    /// Human-readable flow name.
    pub name: String,
    /// Nodes of the graph.
    pub nodes: Vec<FlowNode>,
    /// Directed edges between nodes.
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

/// A single node in the flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    /// Unique node identifier within the flow.
    pub id: String,
    /// Typed node payload.
    #[serde(flatten)]
    pub payload: NodePayload,
}

/// Directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEdge {
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
}

/// Node kind, used for routing and stored in step state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Entry point of the flow.
    #[serde(rename = "start")]
    Start,
    /// Terminal node.
    #[serde(rename = "end")]
    End,
    /// Beginning of a patient-facing form.
    #[serde(rename = "formStart")]
    FormStart,
    /// End of a patient-facing form, may carry downloadable files.
    #[serde(rename = "formEnd")]
    FormEnd,
    /// Editor-only: form picker.
    #[serde(rename = "formSelect")]
    FormSelect,
    /// Timed wait before the next step becomes available.
    #[serde(rename = "delay")]
    Delay,
    /// A question the patient answers.
    #[serde(rename = "question")]
    Question,
    /// Editor-only: computed field.
    #[serde(rename = "calculator")]
    Calculator,
    /// Editor-only: branching conditions.
    #[serde(rename = "conditions")]
    Conditions,
    /// Staged WhatsApp message.
    #[serde(rename = "whatsapp")]
    Whatsapp,
}

impl NodeKind {
    /// Stable string form, matching the editor's node type names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::FormStart => "formStart",
            Self::FormEnd => "formEnd",
            Self::FormSelect => "formSelect",
            Self::Delay => "delay",
            Self::Question => "question",
            Self::Calculator => "calculator",
            Self::Conditions => "conditions",
            Self::Whatsapp => "whatsapp",
        }
    }

    /// Whether this kind is a patient-facing step counted toward progress.
    pub fn is_step(&self) -> bool {
        matches!(
            self,
            Self::FormStart | Self::FormEnd | Self::Delay | Self::Question | Self::Whatsapp
        )
    }
}

/// Typed node payload (tagged by the editor's `type` field, data under `data`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum NodePayload {
    /// Entry point.
    #[serde(rename = "start")]
    Start,
    /// Terminal node.
    #[serde(rename = "end")]
    End,
    /// Beginning of a form.
    #[serde(rename = "formStart")]
    FormStart(FormStartData),
    /// End of a form.
    #[serde(rename = "formEnd")]
    FormEnd(FormEndData),
    /// Editor-only form picker.
    #[serde(rename = "formSelect")]
    FormSelect,
    /// Timed wait.
    #[serde(rename = "delay")]
    Delay(DelayData),
    /// Patient question.
    #[serde(rename = "question")]
    Question(QuestionData),
    /// Editor-only computed field.
    #[serde(rename = "calculator")]
    Calculator,
    /// Editor-only branching.
    #[serde(rename = "conditions")]
    Conditions,
    /// Staged WhatsApp message.
    #[serde(rename = "whatsapp")]
    Whatsapp(WhatsappData),
}

impl NodePayload {
    /// The kind of this payload.
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Start => NodeKind::Start,
            Self::End => NodeKind::End,
            Self::FormStart(_) => NodeKind::FormStart,
            Self::FormEnd(_) => NodeKind::FormEnd,
            Self::FormSelect => NodeKind::FormSelect,
            Self::Delay(_) => NodeKind::Delay,
            Self::Question(_) => NodeKind::Question,
            Self::Calculator => NodeKind::Calculator,
            Self::Conditions => NodeKind::Conditions,
            Self::Whatsapp(_) => NodeKind::Whatsapp,
        }
    }

    /// The human-readable title of this node, if it has one.
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::FormStart(data) => data.title.as_deref(),
            Self::FormEnd(data) => data.title.as_deref(),
            Self::Question(data) => data.prompt.as_deref(),
            _ => None,
        }
    }
}

/// formStart node data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormStartData {
    /// Form title shown to the patient.
    #[serde(default, alias = "titulo")]
    pub title: Option<String>,
}

/// formEnd node data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormEndData {
    /// Form title, used in the completion message.
    #[serde(default, alias = "titulo")]
    pub title: Option<String>,
    /// Custom completion message, overrides the default wording.
    #[serde(default, alias = "mensagemFinal")]
    pub final_message: Option<String>,
    /// Files made available to the patient on completion.
    #[serde(default, alias = "arquivos")]
    pub files: Vec<FileRef>,
}

/// A downloadable file attached to a formEnd node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Display name of the file.
    #[serde(alias = "nome")]
    pub name: String,
    /// Storage URL or path.
    #[serde(default)]
    pub url: Option<String>,
}

/// delay node data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayData {
    /// Number of units to wait.
    #[serde(default = "default_quantity", alias = "quantidade")]
    pub quantity: i64,
    /// Unit of the wait interval.
    #[serde(default, alias = "tipoIntervalo")]
    pub unit: DelayUnit,
}

impl Default for DelayData {
    fn default() -> Self {
        Self {
            quantity: default_quantity(),
            unit: DelayUnit::default(),
        }
    }
}

fn default_quantity() -> i64 {
    1
}

/// question node data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionData {
    /// The question shown to the patient.
    #[serde(default, alias = "pergunta")]
    pub prompt: Option<String>,
    /// Supporting description.
    #[serde(default, alias = "descricao")]
    pub description: Option<String>,
}

/// whatsapp node data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsappData {
    /// Destination phone number.
    #[serde(default, alias = "telefone")]
    pub phone: Option<String>,
    /// Message body.
    #[serde(default, alias = "mensagem")]
    pub message: Option<String>,
}

/// Delay interval units. Editor documents may carry Portuguese names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayUnit {
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days (the historical default for unknown values).
    #[default]
    Days,
}

impl DelayUnit {
    /// Parse a unit string. Unknown values fall back to days, matching the
    /// behavior editor documents have always relied on.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "minutes" | "minute" | "minutos" | "minuto" => Self::Minutes,
            "hours" | "hour" | "horas" | "hora" => Self::Hours,
            _ => Self::Days,
        }
    }

    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        }
    }

    /// The wait interval for `quantity` units.
    pub fn interval(&self, quantity: i64) -> chrono::Duration {
        match self {
            Self::Minutes => chrono::Duration::minutes(quantity),
            Self::Hours => chrono::Duration::hours(quantity),
            Self::Days => chrono::Duration::days(quantity),
        }
    }
}

impl Serialize for DelayUnit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DelayUnit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl FlowDefinition {
    /// Walk the graph from the start node following edges and collect the
    /// patient-facing step nodes in execution order.
    pub fn step_nodes(&self) -> Vec<&FlowNode> {
        let mut ordered = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self
            .nodes
            .iter()
            .find(|n| matches!(n.payload, NodePayload::Start));

        while let Some(node) = current {
            if !visited.insert(node.id.as_str()) {
                // Cycle in the editor document; stop rather than loop.
                break;
            }
            if node.payload.kind().is_step() {
                ordered.push(node);
            }
            current = self
                .edges
                .iter()
                .find(|e| e.source == node.id)
                .and_then(|e| self.nodes.iter().find(|n| n.id == e.target));
        }

        ordered
    }

    /// Find a node by id.
    pub fn node(&self, node_id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

// ============================================================================
// Execution state
// ============================================================================

/// Lifecycle status of a flow execution (stored as a string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Assigned but not yet started.
    #[serde(rename = "pending")]
    Pending,
    /// Patient is working through the steps.
    #[serde(rename = "active")]
    Active,
    /// Paused on a delay node until `next_step_available_at`.
    #[serde(rename = "waiting")]
    Waiting,
    /// All steps completed.
    #[serde(rename = "completed")]
    Completed,
    /// A node processor failed; detail is embedded in the cursor.
    #[serde(rename = "failed")]
    Failed,
}

impl ExecutionStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status string.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "waiting" => Some(Self::Waiting),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// State of one step within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    /// Node id this step was built from.
    pub node_id: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Title shown to the patient, if the node has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Whether the patient has completed this step.
    pub completed: bool,
    /// When the step was completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Patient response or staged payload for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

/// Cursor over an execution's steps, persisted as one JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionCursor {
    /// Index of the step the patient is currently on.
    #[serde(default)]
    pub index: usize,
    /// Per-step state in execution order.
    pub steps: Vec<StepState>,
    /// Failure detail when the execution was forced to `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionCursor {
    /// Build the initial cursor from a flow definition's step nodes.
    pub fn from_definition(definition: &FlowDefinition) -> Self {
        let steps = definition
            .step_nodes()
            .into_iter()
            .map(|node| StepState {
                node_id: node.id.clone(),
                kind: node.payload.kind(),
                title: node.payload.title().map(str::to_string),
                completed: false,
                completed_at: None,
                response: None,
            })
            .collect();
        Self {
            index: 0,
            steps,
            error: None,
        }
    }

    /// Number of completed steps.
    pub fn completed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.completed).count()
    }

    /// Index of the first incomplete step, or the current index when every
    /// step is complete.
    pub fn first_incomplete_index(&self) -> usize {
        self.steps
            .iter()
            .position(|s| !s.completed)
            .unwrap_or(self.index)
    }
}

/// Typed view over a stored flow execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    /// Execution id.
    pub id: String,
    /// Flow definition id.
    pub flow_id: String,
    /// Flow name at assignment time.
    pub flow_name: String,
    /// Patient the flow was assigned to.
    pub patient_id: String,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// Progress percentage in [0, 100].
    pub progress: i32,
    /// Completed step count.
    pub completed_steps: i32,
    /// Total step count.
    pub total_steps: i32,
    /// Step cursor.
    pub cursor: ExecutionCursor,
    /// When the execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the next step becomes available after a delay.
    pub next_step_available_at: Option<DateTime<Utc>>,
    /// Failure message when status is `failed`.
    pub error: Option<String>,
}

/// Progress percentage for `completed` of `total` steps, rounded to the
/// nearest integer.
pub fn progress_for(completed: i32, total: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    ((f64::from(completed) * 100.0) / f64::from(total)).round() as i32
}
