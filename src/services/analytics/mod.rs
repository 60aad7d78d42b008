//! Analysis planning
//!
//! Turns a question plus the active dataset schema into a list of validated
//! read-only SQL queries. Three sources feed the plan: keyword heuristics
//! (`heuristics`), a fixed library of parameterised templates (`patterns`),
//! and model-assisted planning (`hybrid`). The confidence grader (`grading`)
//! scores the executed plan afterwards.

pub mod grading;
pub mod helpers;
pub mod heuristics;
pub mod hybrid;
pub mod patterns;

pub use grading::grade_results;
pub use heuristics::build_heuristic_queries;
pub use hybrid::{HybridPlan, HybridPlanner};
pub use patterns::{PatternPlan, PatternQuery, plan_analyses};

/// A validated, ready-to-execute query with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    pub label: String,
    pub sql: String,
    /// Which planner produced it: a pattern name, `heuristic_*`, or
    /// `llm_dynamic`.
    pub pattern: String,
}
