//! Core domain models: debates, seats, rounds, messages, scores, votes.

pub mod debate;
pub mod usage;

pub use debate::{
    Debate, DebateCheckpoint, DebateError, DebateMode, DebateStatus, FailureDetail, FinalMeta,
    Message, MessageMeta, MessageRole as DebateMessageRole, PanelConfig, PanelTolerance,
    RoleProfile, Round, RoundLabel, RoutingMeta, Score, Seat, Vote,
};
pub use usage::{BudgetConfig, UsageAccumulator, UsageCall};
