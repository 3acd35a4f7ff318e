//! Analysis router - one utterance in, one reply out
//!
//! CLASSIFY → PLAN → CACHE? → EXECUTE → STALE? → SUMMARIZE → RESPOND

pub mod summary;

use crate::classifier::{contains_phrase, normalize, Intent, UtteranceClassifier};
use crate::error::AssistantError;
use crate::execution::Evaluator;
use crate::models::{Reply, ReplyKind};
use crate::planner::{PlanContext, QueryPlanner, RulePlanner};
use crate::store::{Dataset, SessionContext};
use crate::Result;
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use summary::{format_currency, summarize};

pub const DEFAULT_EXECUTION_BUDGET: Duration = Duration::from_millis(5000);

const HELP_TEXT: &str = "I can answer questions about the transactions you uploaded. \
Ask for totals by category or month, your income, your biggest purchases, \
recent transactions, or your monthly averages to plan a budget.";

const OFF_TOPIC_TEXT: &str = "I can only help with your budget and the transactions you uploaded. \
Try asking how much you spent on groceries last month.";

const NO_DATASET_TEXT: &str = "I don't have any transactions yet. \
Upload a CSV file and ask me again.";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Upper bound on plan execution.
    pub execution_budget: Duration,
    /// Anchor for relative periods; today when unset.
    pub reference_date: Option<NaiveDate>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            execution_budget: DEFAULT_EXECUTION_BUDGET,
            reference_date: None,
        }
    }
}

/// Routes utterances for any session. Holds no per-session state.
pub struct AnalysisRouter {
    planner: Arc<dyn QueryPlanner>,
    config: RouterConfig,
}

impl AnalysisRouter {
    pub fn new(planner: Arc<dyn QueryPlanner>, config: RouterConfig) -> Self {
        Self { planner, config }
    }

    /// Router with the deterministic planner only.
    pub fn with_rules(config: RouterConfig) -> Self {
        Self::new(Arc::new(RulePlanner::new()), config)
    }

    fn reference_date(&self) -> NaiveDate {
        self.config
            .reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    /// Answer one utterance. Never fails: every error becomes a reply and
    /// the session continues.
    pub async fn respond(&self, session: &SessionContext, utterance: &str) -> Reply {
        let start_time = Instant::now();
        let categories = session.store().categories().await;
        let intent = UtteranceClassifier::classify(utterance, &categories);

        info!(
            session_id = %session.id,
            intent = intent.as_str(),
            "Router: utterance received"
        );

        let reply = match intent {
            Intent::Unclear => Reply::new(
                ReplyKind::Conversational,
                "Sorry, I didn't catch that. Could you say it again?",
            ),
            Intent::SmallTalk => Reply::new(ReplyKind::Conversational, small_talk_reply(utterance)),
            Intent::Help => Reply::new(ReplyKind::Conversational, HELP_TEXT),
            Intent::Repeat => {
                return session.last_reply().await.unwrap_or_else(|| {
                    Reply::new(ReplyKind::Conversational, "I haven't said anything yet.")
                });
            }
            Intent::OffTopic => Reply::new(ReplyKind::Conversational, OFF_TOPIC_TEXT),
            Intent::Analysis => match self.analyze(session, utterance).await {
                Ok(reply) => reply,
                Err(e) => reply_for_error(e),
            },
        };

        info!(
            session_id = %session.id,
            kind = %reply.kind,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Router: reply ready"
        );

        session.set_last_reply(&reply).await;
        reply
    }

    async fn analyze(&self, session: &SessionContext, utterance: &str) -> Result<Reply> {
        let snapshot = session.store().snapshot().await;
        if snapshot.is_empty() {
            return Ok(Reply::new(ReplyKind::NoData, NO_DATASET_TEXT));
        }

        let reference = self.reference_date();
        let context = PlanContext::from_dataset(&snapshot, reference);

        // === PLAN ===
        let plan = self.planner.plan(utterance, &context).await?;
        debug!(
            planner = self.planner.name(),
            plan = %plan.cache_key(),
            "Plan created"
        );

        // Relative periods depend on the reference date
        let key = format!("{}@{}", plan.cache_key(), reference);
        if let Some(cached) = session.cached_summary(&key, snapshot.version).await {
            debug!(session_id = %session.id, "Answered from summary cache");
            return Ok(Reply {
                kind: ReplyKind::Cached,
                ..cached
            });
        }

        // === EXECUTE ===
        let evaluation = {
            let plan = plan.clone();
            let dataset = snapshot.clone();
            let evaluator = Evaluator::new(reference);
            run_with_budget(self.config.execution_budget, move || {
                evaluator.evaluate(&plan, &dataset)
            })
            .await?
        };

        // === STALE? ===
        ensure_current(session, &snapshot).await?;

        // === SUMMARIZE ===
        let reply = summarize(&plan, &evaluation);
        if evaluation.result.is_reusable() {
            session
                .remember_summary(key, snapshot.version, reply.clone())
                .await;
        }

        Ok(reply)
    }

    pub fn planner_name(&self) -> &'static str {
        self.planner.name()
    }
}

/// Run a synchronous evaluation on the blocking pool under a time budget.
/// A timed-out evaluation keeps running but its output is dropped.
pub async fn run_with_budget<T, F>(budget: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(budget, handle).await {
        Err(_) => Err(AssistantError::ExecutionTimeout(budget)),
        Ok(Err(join_error)) => Err(AssistantError::ExecutionError(format!(
            "evaluation task failed: {}",
            join_error
        ))),
        Ok(Ok(result)) => result,
    }
}

/// Reject results computed from a dataset that has since been replaced.
pub async fn ensure_current(session: &SessionContext, snapshot: &Dataset) -> Result<()> {
    let current = session.store().version().await;
    if current == snapshot.version {
        Ok(())
    } else {
        warn!(
            session_id = %session.id,
            computed = snapshot.version,
            current,
            "Discarding result from replaced dataset"
        );
        Err(AssistantError::StaleDataset)
    }
}

fn small_talk_reply(utterance: &str) -> &'static str {
    let text = normalize(utterance);
    if ["thanks", "thank you", "cheers"].iter().any(|p| contains_phrase(&text, p)) {
        "You're welcome! Anything else about your spending?"
    } else if ["bye", "goodbye", "see you"].iter().any(|p| contains_phrase(&text, p)) {
        "Goodbye, and good luck with your budget!"
    } else if contains_phrase(&text, "how are you") {
        "I'm doing well, thanks. What would you like to know about your spending?"
    } else {
        "Hi! Ask me about your spending, like how much you spent on food last month."
    }
}

/// Map a failed analysis onto something worth saying.
fn reply_for_error(error: AssistantError) -> Reply {
    match error {
        AssistantError::AmbiguousQuery(question) => Reply::new(ReplyKind::Clarify, question),
        AssistantError::ExecutionTimeout(budget) => {
            warn!(?budget, "Analysis exceeded its budget");
            Reply::new(
                ReplyKind::Timeout,
                "That took too long to work out. Try a narrower question, like one category or one month.",
            )
        }
        AssistantError::StaleDataset => Reply::new(
            ReplyKind::Stale,
            "Your transactions were just replaced, so I dropped that answer. Please ask again.",
        ),
        AssistantError::InvalidPlan(reason) | AssistantError::PlanningError(reason) => {
            warn!(%reason, "Could not plan question");
            Reply::new(
                ReplyKind::Clarify,
                "I'm not sure how to answer that. Try asking about a category, a month, or your income.",
            )
        }
        other => {
            warn!(error = %other, "Analysis failed");
            Reply::new(
                ReplyKind::Conversational,
                "Sorry, something went wrong while I was working that out. Please try again.",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Flow, Metric, Plan, RawRecord};
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Returns the same plan for every question.
    struct StaticPlanner(Plan);

    #[async_trait]
    impl QueryPlanner for StaticPlanner {
        async fn plan(&self, _utterance: &str, _context: &PlanContext) -> Result<Plan> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &'static str {
            "static"
        }
    }

    fn router() -> AnalysisRouter {
        AnalysisRouter::with_rules(RouterConfig {
            execution_budget: DEFAULT_EXECUTION_BUDGET,
            reference_date: NaiveDate::from_ymd_opt(2024, 3, 15),
        })
    }

    async fn session_with(records: Vec<RawRecord>) -> SessionContext {
        let session = SessionContext::new(Uuid::new_v4());
        session.replace_dataset(records).await.unwrap();
        session
    }

    fn scenario() -> Vec<RawRecord> {
        vec![
            RawRecord::new("2024-01-05", "Coffee Shop", "-4.50", Some("Food")),
            RawRecord::new("2024-01-20", "Paycheck", "2000.00", Some("Income")),
        ]
    }

    #[tokio::test]
    async fn test_food_in_january() {
        let session = session_with(scenario()).await;
        let reply = router()
            .respond(&session, "How much did I spend on Food in January?")
            .await;
        assert_eq!(reply.kind, ReplyKind::Answer);
        assert!(reply.text.contains("$4.50"), "{}", reply.text);
    }

    #[tokio::test]
    async fn test_income_question() {
        let session = session_with(scenario()).await;
        let reply = router().respond(&session, "what's my income").await;
        assert_eq!(reply.kind, ReplyKind::Answer);
        assert!(reply.text.contains("$2,000.00"), "{}", reply.text);
    }

    #[tokio::test]
    async fn test_repeat_question_hits_cache_until_reupload() {
        let session = session_with(scenario()).await;
        let router = router();

        let first = router.respond(&session, "how much did I spend on food").await;
        let second = router.respond(&session, "how much did I spend on food").await;
        assert_eq!(first.kind, ReplyKind::Answer);
        assert_eq!(second.kind, ReplyKind::Cached);
        assert_eq!(first.text, second.text);

        session
            .replace_dataset(vec![RawRecord::new("2024-02-01", "Bakery", "-3.00", Some("Food"))])
            .await
            .unwrap();
        let third = router.respond(&session, "how much did I spend on food").await;
        assert_eq!(third.kind, ReplyKind::Answer);
        assert!(third.text.contains("$3.00"));
    }

    #[tokio::test]
    async fn test_unknown_category_is_zero_reply() {
        let session = session_with(scenario()).await;
        let reply = router().respond(&session, "how much did I spend on pets").await;
        assert_eq!(reply.kind, ReplyKind::NoData);
        assert!(reply.text.contains("$0.00"));
    }

    #[tokio::test]
    async fn test_ambiguous_category_asks_to_choose() {
        let session = session_with(vec![
            RawRecord::new("2024-01-05", "Burger", "-8.00", Some("Fast Food")),
            RawRecord::new("2024-01-06", "Courier", "-18.00", Some("Food Delivery")),
        ])
        .await;
        let reply = router().respond(&session, "how much did I spend on food").await;
        assert_eq!(reply.kind, ReplyKind::Clarify);
        assert!(reply.text.contains("Fast Food"));
        assert!(reply.text.contains("Food Delivery"));
    }

    #[tokio::test]
    async fn test_listing_twice_is_identical() {
        let session = session_with(scenario()).await;
        let router = router();
        let first = router.respond(&session, "show my recent transactions").await;
        let second = router.respond(&session, "show my recent transactions").await;
        assert_eq!(first.kind, ReplyKind::Answer);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_conversational_turns() {
        let session = session_with(scenario()).await;
        let router = router();

        let hello = router.respond(&session, "hello").await;
        assert_eq!(hello.kind, ReplyKind::Conversational);

        let answer = router.respond(&session, "what's my income").await;
        let repeat = router.respond(&session, "say that again").await;
        assert_eq!(repeat.text, answer.text);

        let off_topic = router.respond(&session, "what's the weather like").await;
        assert_eq!(off_topic.text, OFF_TOPIC_TEXT);
    }

    #[tokio::test]
    async fn test_no_dataset() {
        let session = SessionContext::new(Uuid::new_v4());
        let reply = router().respond(&session, "how much did I spend").await;
        assert_eq!(reply.kind, ReplyKind::NoData);
    }

    #[tokio::test]
    async fn test_two_periods_clarify() {
        let session = session_with(scenario()).await;
        let reply = router()
            .respond(&session, "how much did I spend in January February")
            .await;
        assert_eq!(reply.kind, ReplyKind::Clarify);
    }

    #[tokio::test]
    async fn test_run_with_budget_times_out() {
        let result = run_with_budget(Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AssistantError::ExecutionTimeout(_))));

        let fast = run_with_budget(Duration::from_secs(1), || Ok(7)).await.unwrap();
        assert_eq!(fast, 7);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_rejected() {
        let session = session_with(scenario()).await;
        let snapshot = session.store().snapshot().await;
        assert!(ensure_current(&session, &snapshot).await.is_ok());

        session.replace_dataset(scenario()).await.unwrap();
        let err = ensure_current(&session, &snapshot).await.unwrap_err();
        assert!(matches!(err, AssistantError::StaleDataset));
        assert_eq!(reply_for_error(err).kind, ReplyKind::Stale);
    }

    /// Replaces the session's dataset while the question is being planned.
    struct ReloadingPlanner {
        session: Arc<SessionContext>,
    }

    #[async_trait]
    impl QueryPlanner for ReloadingPlanner {
        async fn plan(&self, _utterance: &str, _context: &PlanContext) -> Result<Plan> {
            self.session
                .replace_dataset(vec![RawRecord::new("2024-02-01", "Bakery", "-3.00", Some("Food"))])
                .await?;
            Ok(Plan::total(Flow::Expenses))
        }

        fn name(&self) -> &'static str {
            "reloading"
        }
    }

    #[tokio::test]
    async fn test_reupload_during_analysis_is_stale() {
        let session = Arc::new(session_with(scenario()).await);
        let reloading_router = AnalysisRouter::new(
            Arc::new(ReloadingPlanner {
                session: Arc::clone(&session),
            }),
            RouterConfig::default(),
        );

        let reply = reloading_router.respond(&session, "how much did I spend").await;
        assert_eq!(reply.kind, ReplyKind::Stale);
        assert_eq!(session.cached_count().await, 0);

        // The next question runs against the new upload
        let reply = router().respond(&session, "how much did I spend on food").await;
        assert_eq!(reply.kind, ReplyKind::Answer);
        assert!(reply.text.contains("$3.00"), "{}", reply.text);
    }

    #[tokio::test]
    async fn test_static_planner() {
        let plan = Plan {
            flow: Flow::All,
            metric: Metric::Count,
            ..Plan::default()
        };
        let router = AnalysisRouter::new(Arc::new(StaticPlanner(plan)), RouterConfig::default());
        let session = session_with(scenario()).await;
        let reply = router.respond(&session, "how many transactions").await;
        assert_eq!(reply.text, "You have 2 transactions.");
        assert_eq!(router.planner_name(), "static");
    }
}
