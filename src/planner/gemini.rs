//! Gemini-powered planner
//!
//! Asks the model to translate a question into the plan JSON schema. The
//! model's output is parsed as data and validated; anything unusable falls
//! back to the rule planner.

use super::{PlanContext, QueryPlanner, RulePlanner};
use crate::error::AssistantError;
use crate::gemini::{strip_code_fence, GeminiClient};
use crate::models::Plan;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

const PLANNER_SYSTEM: &str = "You translate spoken budgeting questions into a JSON query plan. \
Return ONLY one JSON object. Never return code or explanations.";

pub struct GeminiPlanner {
    client: GeminiClient,
}

/// Either a plan or a question the model wants to ask back.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlannerResponse {
    Clarify { clarify: String },
    Plan(Plan),
}

impl GeminiPlanner {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    /// Build structured planning prompt
    fn build_prompt(utterance: &str, context: &PlanContext) -> String {
        let categories = if context.categories.is_empty() {
            "(none)".to_string()
        } else {
            context.categories.join(", ")
        };

        format!(
            r#"TODAY: {today}

CATEGORIES IN THE DATA:
{categories}

QUESTION:
{utterance}

Plan schema (omit fields you do not need):
{{
  "flow": "expenses" | "income" | "all",
  "category": "<category term>",
  "merchant": "<text found in the transaction description>",
  "period": {{"kind": "month", "month": 1-12, "year": <optional>}}
          | {{"kind": "year", "year": 2024}}
          | {{"kind": "range", "start": "YYYY-MM-DD", "end": "YYYY-MM-DD"}}
          | {{"kind": "last_days", "days": 30}}
          | {{"kind": "this_month"}} | {{"kind": "last_month"}}
          | {{"kind": "this_year"}} | {{"kind": "last_year"}},
  "metric": "total" | "average" | "count" | "largest" | "smallest" | "list" | "monthly_average" | "overview",
  "group_by": "category" | "month" | "merchant",
  "limit": 1-50
}}

Rules:
- Default flow is "expenses". Use "income" only for income, deposits, salary, refunds or credits (a credit card is not income). Use "all" for net, balance, cash flow or savings.
- Only group "total", "average", "count" or "monthly_average".
- If the question names two different periods without saying "between" or "from ... to", return {{"clarify": "<short question>"}} instead of a plan.
- If several categories could match, return {{"clarify": "<short question listing them>"}}."#,
            today = context.calendar.reference(),
            categories = categories,
            utterance = utterance.trim(),
        )
    }

    fn parse_response(text: &str) -> Result<Plan> {
        let response: PlannerResponse = serde_json::from_str(strip_code_fence(text))
            .map_err(|e| AssistantError::PlanningError(format!("unparseable plan: {}", e)))?;

        match response {
            PlannerResponse::Clarify { clarify } if !clarify.trim().is_empty() => {
                Err(AssistantError::AmbiguousQuery(clarify.trim().to_string()))
            }
            PlannerResponse::Clarify { .. } => {
                Err(AssistantError::PlanningError("empty clarification".to_string()))
            }
            PlannerResponse::Plan(plan) => {
                plan.validate()?;
                Ok(plan)
            }
        }
    }
}

#[async_trait]
impl QueryPlanner for GeminiPlanner {
    async fn plan(&self, utterance: &str, context: &PlanContext) -> Result<Plan> {
        if !self.client.is_configured() {
            return RulePlanner::plan_utterance(utterance, context);
        }

        let prompt = Self::build_prompt(utterance, context);
        let planned = match self.client.generate(PLANNER_SYSTEM, &prompt, true).await {
            Ok(text) => Self::parse_response(&text),
            Err(e) => Err(e),
        };

        match planned {
            Ok(plan) => {
                debug!(metric = ?plan.metric, category = ?plan.category, "Gemini plan accepted");
                Ok(plan)
            }
            Err(AssistantError::AmbiguousQuery(question)) => {
                Err(AssistantError::AmbiguousQuery(question))
            }
            Err(e) => {
                warn!("Gemini planning failed, using rule planner: {}", e);
                RulePlanner::plan_utterance(utterance, context)
            }
        }
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
