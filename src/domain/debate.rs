//! Canonical debate domain model.
//!
//! A single `Debate` struct serves both as in-memory pipeline state and
//! as the row persisted by a [`crate::store::DebateStore`] — there is no
//! second, repository-layer struct duplicating these fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::usage::BudgetConfig;

/// Debate lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    Queued,
    Running,
    Completed,
    Degraded,
    Failed,
}

impl std::fmt::Display for DebateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl DebateStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Degraded | Self::Failed)
    }
}

/// Which pipeline shape a debate runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateMode {
    Debate,
    Parliament,
    Conversation,
}

/// A seat's role profile — shapes its system-prompt instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleProfile {
    Optimist,
    RiskOfficer,
    Architect,
    Chair,
    Scribe,
    Facilitator,
    Synthesizer,
    Judge,
}

/// A persona participating in a debate; one entry of a `panel_config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seat {
    pub seat_id: String,
    pub display_name: String,
    pub provider_key: crate::llm::Provider,
    pub model: String,
    pub role_profile: RoleProfile,
    pub temperature: f32,
}

/// Per-panel tuning knobs for seat-failure tolerance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PanelTolerance {
    pub min_required_seats: usize,
    pub max_seat_fail_ratio: f32,
}

impl Default for PanelTolerance {
    fn default() -> Self {
        Self { min_required_seats: 1, max_seat_fail_ratio: 0.5 }
    }
}

/// The ordered list of seats plus panel-level tuning for a debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    pub seats: Vec<Seat>,
    #[serde(default)]
    pub tolerance: PanelTolerance,
    #[serde(default)]
    pub judges: Vec<Seat>,
}

impl PanelConfig {
    pub fn seat(&self, seat_id: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.seat_id == seat_id)
    }
}

/// Routing metadata recorded alongside a debate's chosen model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutingMeta {
    pub candidates: Vec<crate::router::CandidateDecision>,
    pub policy: String,
}

/// Final synthesized output and its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FinalMeta {
    pub error: Option<String>,
    pub failure: Option<FailureDetail>,
    pub truncate_reason: Option<String>,
    pub failed_seats: Vec<String>,
}

/// Detail recorded when a pipeline aborts fatally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub reason: String,
    pub round_index: i32,
    pub success_count: usize,
    pub failure_count: usize,
}

/// A single deliberation instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debate {
    pub id: Uuid,
    pub prompt: String,
    pub status: DebateStatus,
    pub mode: DebateMode,
    pub panel_config: PanelConfig,
    pub budget: BudgetConfig,
    pub routed_model: Option<String>,
    pub routing_policy: Option<String>,
    pub routing_meta: Option<RoutingMeta>,
    pub owner_user_id: Option<String>,
    pub team_id: Option<String>,
    pub final_content: Option<String>,
    pub final_meta: Option<FinalMeta>,
    pub runner_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub run_attempt: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Debate {
    /// Create a freshly submitted, unrouted debate.
    pub fn new(prompt: impl Into<String>, mode: DebateMode, panel_config: PanelConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            status: DebateStatus::Queued,
            mode,
            panel_config,
            budget: BudgetConfig::default(),
            routed_model: None,
            routing_policy: None,
            routing_meta: None,
            owner_user_id: None,
            team_id: None,
            final_content: None,
            final_meta: None,
            runner_id: None,
            lease_expires_at: None,
            run_attempt: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariant check: `lease_expires_at` is present iff `runner_id` is.
    pub fn lease_invariant_holds(&self) -> bool {
        self.runner_id.is_some() == self.lease_expires_at.is_some()
    }
}

/// An executed phase of the pipeline (one row of `debate_round`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub debate_id: Uuid,
    pub index: i32,
    pub label: RoundLabel,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

/// The label of a pipeline round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundLabel {
    Draft,
    Critique,
    Judge,
    Explore,
    Rebuttal,
    Converge,
    ChairVerdict,
    Scribe,
    Synthesis,
}

impl std::fmt::Display for RoundLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Critique => "critique",
            Self::Judge => "judge",
            Self::Explore => "explore",
            Self::Rebuttal => "rebuttal",
            Self::Converge => "converge",
            Self::ChairVerdict => "chair_verdict",
            Self::Scribe => "scribe",
            Self::Synthesis => "synthesis",
        };
        write!(f, "{s}")
    }
}

/// The role a message plays within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Candidate,
    Revised,
    Seat,
    Judge,
    Synthesizer,
    Scribe,
}

/// Metadata attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessageMeta {
    pub seat_id: Option<String>,
    pub stance: Option<String>,
    pub reasoning: Option<String>,
    pub provider: Option<crate::llm::Provider>,
    pub model: Option<String>,
    pub phase: Option<String>,
}

/// One utterance by a seat or stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub debate_id: Uuid,
    pub round_index: i32,
    pub role: MessageRole,
    pub persona: String,
    pub content: String,
    pub meta: MessageMeta,
    pub created_at: DateTime<Utc>,
}

/// A judge's rating of a persona under a rubric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub debate_id: Uuid,
    pub persona: String,
    pub judge: String,
    pub score: f64,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

impl Score {
    /// Clamp a raw judge score into `[0, 10]` (testable property 3).
    pub fn clamp(raw: f64) -> f64 {
        raw.clamp(0.0, 10.0)
    }
}

/// An aggregated ranking result for a debate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub debate_id: Uuid,
    pub method: String,
    pub rankings: Vec<String>,
    pub weights: serde_json::Value,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Durability marker recording the last completed pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateCheckpoint {
    pub debate_id: Uuid,
    pub step: RoundLabel,
    pub step_index: i32,
    pub round_index: i32,
    pub status: DebateStatus,
    pub attempt_count: i32,
    pub resume_token: Uuid,
    pub resume_claimed_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub context_meta: serde_json::Value,
}

/// A record written by the reaper or a fatal pipeline abort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateError {
    pub debate_id: Uuid,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
    pub age_seconds: i64,
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel() -> PanelConfig {
        PanelConfig {
            seats: vec![Seat {
                seat_id: "optimist".into(),
                display_name: "Optimist".into(),
                provider_key: crate::llm::Provider::OpenAi,
                model: "gpt-4o".into(),
                role_profile: RoleProfile::Optimist,
                temperature: 0.7,
            }],
            tolerance: PanelTolerance::default(),
            judges: Vec::new(),
        }
    }

    #[test]
    fn new_debate_has_no_lease() {
        let d = Debate::new("Should we adopt AI?", DebateMode::Debate, panel());
        assert_eq!(d.status, DebateStatus::Queued);
        assert!(d.lease_invariant_holds());
    }

    #[test]
    fn lease_invariant_violation_is_detected() {
        let mut d = Debate::new("x", DebateMode::Debate, panel());
        d.runner_id = Some("worker-1".into());
        assert!(!d.lease_invariant_holds());
    }

    #[test]
    fn score_clamp_bounds_to_zero_ten() {
        assert_eq!(Score::clamp(-1.0), 0.0);
        assert_eq!(Score::clamp(11.5), 10.0);
        assert_eq!(Score::clamp(6.5), 6.5);
    }

    #[test]
    fn terminal_statuses() {
        assert!(DebateStatus::Completed.is_terminal());
        assert!(DebateStatus::Degraded.is_terminal());
        assert!(DebateStatus::Failed.is_terminal());
        assert!(!DebateStatus::Queued.is_terminal());
        assert!(!DebateStatus::Running.is_terminal());
    }
}
