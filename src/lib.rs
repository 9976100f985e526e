//! Student Spending Coach
//!
//! A coaching backend for student finances that:
//! - Parses free-form survey answers into 17 structured fields
//! - Scores overspending and financial-stress risk (trained models or heuristics)
//! - Derives spending analytics deterministically from the snapshot
//! - Generates glanceable summaries and bite-sized coaching replies
//! - Applies safety guards around every generative step, with fallbacks
//! - Persists dated snapshots with a same-day merge rule
//!
//! PIPELINE:
//! ANSWERS → PARSE → RECONCILE PROFILE → VALIDATE → SCORE → ANALYZE → NARRATE → COMMIT

pub mod analytics;
pub mod api;
pub mod error;
pub mod fields;
pub mod generation;
pub mod models;
pub mod narrative;
pub mod parser;
pub mod pipeline;
pub mod risk;
pub mod safety;
pub mod store;
pub mod survey;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use pipeline::{ChatOutcome, DashboardView, IntakeOutcome, ProfileView, SnapshotPipeline};
