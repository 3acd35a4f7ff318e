//! Planner trait and implementations
//!
//! A planner turns one analysis question into a declarative `Plan`.
//! Plans are data, never code, and are validated before execution.

use crate::calendar::Calendar;
use crate::models::Plan;
use crate::store::Dataset;
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub mod gemini;
pub mod period;
pub mod rules;

pub use gemini::GeminiPlanner;
pub use rules::RulePlanner;

/// What a planner may know about the session's data.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub categories: Vec<String>,
    pub calendar: Calendar,
}

impl PlanContext {
    pub fn from_dataset(dataset: &Dataset, reference: NaiveDate) -> Self {
        Self {
            categories: dataset.categories(),
            calendar: Calendar::new(reference, dataset.transactions.iter().map(|t| t.date)),
        }
    }
}

/// Trait for plan generation
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    /// Build a plan for one utterance. `AmbiguousQuery` carries the
    /// clarifying question to speak back.
    async fn plan(&self, utterance: &str, context: &PlanContext) -> Result<Plan>;

    fn name(&self) -> &'static str;
}
