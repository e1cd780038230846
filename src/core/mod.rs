pub mod actions;
pub mod approvals;
pub mod auth;
pub mod config;
pub mod engine;
pub mod entities;
pub mod error;
pub mod lov;
pub mod mail;
pub mod placeholder;
pub mod precondition;
pub mod sheets;
pub mod stats;
pub mod store;
pub mod types;

pub use engine::{TransitionEngine, TransitionRequest, TransitionTelemetry};
pub use entities::{
    ActivityLogEntry, ApprovalToken, CardEntry, FieldChange, LovEntry, PendingEntry, StatusStats,
    TimestampValue, DRAFT_STATUS,
};
pub use error::AppError;
pub use types::*;
