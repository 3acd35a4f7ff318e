//! Deterministic keyword planner
//!
//! Always available. The Gemini planner falls back to it.

use super::period::{extract_period, is_time_word, join_alternatives, parse_count};
use super::{PlanContext, QueryPlanner};
use crate::classifier::{contains_phrase, normalize};
use crate::error::AssistantError;
use crate::models::{Flow, GroupBy, Metric, Plan, MAX_PLAN_LIMIT};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

const NET_PHRASES: &[&str] = &["net", "balance", "cash flow", "saved", "save", "savings", "left over", "leftover"];

const INCOME_WORDS: &[&str] = &[
    "income", "earn", "earned", "earning", "earnings", "credit", "credits",
    "credited", "deposit", "deposits", "deposited", "salary", "paycheck",
    "paychecks", "refund", "refunds", "refunded", "paid me", "received",
];

const OVERVIEW_PHRASES: &[&str] = &[
    "overview", "summary", "summarize", "what categories", "which categories do",
    "date range", "what data", "how far back", "what's in my",
];

const MONTHLY_AVERAGE_PHRASES: &[&str] = &[
    "monthly average", "average per month", "average a month", "average each month",
    "per month on average", "a month on average", "average monthly", "typical month",
    "budget",
];

const MONTH_GROUP_PHRASES: &[&str] = &[
    "by month", "each month", "per month", "every month", "month by month",
    "monthly breakdown",
];

const MERCHANT_GROUP_PHRASES: &[&str] = &[
    "by merchant", "per merchant", "each merchant", "which merchant", "which merchants",
    "top merchants", "by store", "by vendor", "where do i spend", "where did i spend",
];

const CATEGORY_GROUP_PHRASES: &[&str] = &[
    "by category", "per category", "each category", "which category", "categories",
    "breakdown", "break down", "broken down", "biggest category", "largest category",
    "top category", "spend the most on", "spent the most on", "spend most on",
    "spent most on", "budget",
];

/// Triggers that pick the single top group instead of a ranking.
const TOP_ONE_PHRASES: &[&str] = &[
    "the most on", "most on", "biggest category", "largest category", "top category",
    "which category", "which merchant",
];

const LARGEST_PHRASES: &[&str] = &["biggest", "largest", "most expensive", "highest", "maximum", "max"];
const SMALLEST_PHRASES: &[&str] = &["smallest", "cheapest", "lowest", "least expensive", "minimum", "min"];
const AVERAGE_PHRASES: &[&str] = &["average", "avg", "mean", "typical"];
const COUNT_PHRASES: &[&str] = &["how many", "number of", "count", "how often"];
const LIST_PHRASES: &[&str] = &["list", "show", "recent", "latest", "what did i buy", "what were my", "which transactions", "which purchases"];

const CATEGORY_TRIGGERS: &[&str] = &["on", "for", "towards", "toward", "category", "about", "into"];
const MERCHANT_TRIGGERS: &[&str] = &["at", "from"];

/// Words that end a term.
const TERM_STOPS: &[&str] = &[
    "in", "during", "between", "from", "since", "over", "at", "by", "per", "each",
    "and", "or", "so", "until", "to", "than", "compared", "vs", "versus", "with",
    "within", "on", "for", "next", "a", "an", "is", "was", "were", "are", "did",
    "do", "does", "i", "we", "me", "it", "that", "total", "altogether", "overall",
    "please", "now", "far", "this", "last",
];

/// Words skipped at the start of a term.
const TERM_LEADS: &[&str] = &["the", "my", "our", "all", "of"];

/// Collected terms that are not category or merchant names.
const NON_TERMS: &[&str] = &[
    "average", "everything", "anything", "something", "stuff", "things", "money",
    "purchases", "purchase", "transactions", "transaction", "expenses", "expense",
    "spending", "income", "them", "least", "most", "sure", "example", "instance",
    "me", "it", "you", "one",
];

const MAX_TERM_WORDS: usize = 4;

pub struct RulePlanner;

impl RulePlanner {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous planning entry point, also used as the LLM fallback.
    pub fn plan_utterance(utterance: &str, context: &PlanContext) -> Result<Plan> {
        let text = normalize(utterance);
        let words: Vec<&str> = text.split_whitespace().collect();

        let flow = detect_flow(&text);
        let (metric, group_by) = detect_metric(&text);
        let limit = detect_limit(&text, &words, metric, group_by);
        let period = extract_period(&words, &context.calendar)?;
        let category = detect_category(&text, &words, context, flow)?;
        let merchant = term_after(&words, MERCHANT_TRIGGERS);

        let plan = Plan {
            flow,
            category,
            merchant,
            period,
            metric,
            group_by,
            limit,
        };
        plan.validate()?;

        debug!(
            flow = %plan.flow,
            metric = ?plan.metric,
            group_by = ?plan.group_by,
            category = ?plan.category,
            merchant = ?plan.merchant,
            period = ?plan.period,
            "Rule plan built"
        );

        Ok(plan)
    }
}

impl Default for RulePlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryPlanner for RulePlanner {
    async fn plan(&self, utterance: &str, context: &PlanContext) -> Result<Plan> {
        Self::plan_utterance(utterance, context)
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

fn any_phrase(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(text, p))
}

fn detect_flow(text: &str) -> Flow {
    if any_phrase(text, NET_PHRASES) {
        return Flow::All;
    }

    // "credit card" is how expenses are paid, not income
    let without_cards = text
        .replace(" credit cards ", " cards ")
        .replace(" credit card ", " card ");
    if any_phrase(&without_cards, INCOME_WORDS) {
        Flow::Income
    } else {
        Flow::Expenses
    }
}

fn detect_group(text: &str) -> Option<GroupBy> {
    if any_phrase(text, MONTH_GROUP_PHRASES) {
        Some(GroupBy::Month)
    } else if any_phrase(text, MERCHANT_GROUP_PHRASES) {
        Some(GroupBy::Merchant)
    } else if any_phrase(text, CATEGORY_GROUP_PHRASES) {
        Some(GroupBy::Category)
    } else {
        None
    }
}

fn detect_metric(text: &str) -> (Metric, Option<GroupBy>) {
    if any_phrase(text, OVERVIEW_PHRASES) {
        return (Metric::Overview, None);
    }

    let group = detect_group(text);

    if any_phrase(text, MONTHLY_AVERAGE_PHRASES) {
        let group = group.filter(|g| *g != GroupBy::Month);
        return (Metric::MonthlyAverage, group);
    }
    if any_phrase(text, LARGEST_PHRASES) {
        return match group {
            Some(g) => (Metric::Total, Some(g)),
            None => (Metric::Largest, None),
        };
    }
    if any_phrase(text, SMALLEST_PHRASES) {
        return (Metric::Smallest, None);
    }
    if any_phrase(text, AVERAGE_PHRASES) {
        return (Metric::Average, group);
    }
    if any_phrase(text, COUNT_PHRASES) {
        return (Metric::Count, group);
    }
    if any_phrase(text, LIST_PHRASES) && group.is_none() {
        return (Metric::List, None);
    }

    (Metric::Total, group)
}

/// First number token that is not part of a time expression.
fn first_free_count(words: &[&str]) -> Option<u32> {
    words.iter().enumerate().find_map(|(i, w)| {
        if is_time_word(words, i) {
            return None;
        }
        let next = words.get(i + 1).copied().unwrap_or("");
        let is_period_unit = matches!(
            next,
            "day" | "days" | "week" | "weeks" | "month" | "months" | "year" | "years"
        );
        parse_count(w).filter(|_| !is_period_unit)
    })
}

fn detect_limit(text: &str, words: &[&str], metric: Metric, group_by: Option<GroupBy>) -> Option<usize> {
    let top_n = words
        .iter()
        .position(|w| *w == "top")
        .and_then(|i| words.get(i + 1))
        .and_then(|w| parse_count(w));

    let limit = match (metric, group_by) {
        (_, Some(_)) => top_n.or_else(|| {
            if any_phrase(text, TOP_ONE_PHRASES) {
                Some(1)
            } else if contains_phrase(text, "top") {
                Some(5)
            } else {
                None
            }
        }),
        (Metric::List, None) => top_n.or_else(|| first_free_count(words)),
        _ => None,
    };

    limit.map(|n| (n as usize).clamp(1, MAX_PLAN_LIMIT))
}

/// First usable term following any trigger word.
fn term_after(words: &[&str], triggers: &[&str]) -> Option<String> {
    words
        .iter()
        .enumerate()
        .filter(|(_, w)| triggers.contains(*w))
        .find_map(|(i, _)| collect_term(words, i + 1))
}

fn collect_term(words: &[&str], start: usize) -> Option<String> {
    let mut idx = start;
    while words.get(idx).is_some_and(|w| TERM_LEADS.contains(w)) {
        idx += 1;
    }

    let mut term = Vec::new();
    while let Some(word) = words.get(idx) {
        if TERM_STOPS.contains(word) || is_time_word(words, idx) || parse_count(word).is_some() {
            break;
        }
        term.push(*word);
        if term.len() == MAX_TERM_WORDS {
            break;
        }
        idx += 1;
    }

    match term.as_slice() {
        [] => None,
        [single] if NON_TERMS.contains(single) => None,
        _ => Some(term.join(" ")),
    }
}

fn detect_category(
    text: &str,
    words: &[&str],
    context: &PlanContext,
    flow: Flow,
) -> Result<Option<String>> {
    let mentioned: Vec<&String> = context
        .categories
        .iter()
        .filter(|c| !(flow == Flow::Income && c.eq_ignore_ascii_case("income")))
        .filter(|c| {
            let label = normalize(c);
            let label = label.trim();
            !label.is_empty() && contains_phrase(text, label)
        })
        .collect();

    // "Fast Food" mentioned also matches "Food"; keep the longer label
    let outermost: Vec<&String> = mentioned
        .iter()
        .filter(|c| {
            !mentioned.iter().any(|other| {
                other.len() > c.len() && other.to_lowercase().contains(&c.to_lowercase())
            })
        })
        .copied()
        .collect();

    match outermost.as_slice() {
        [one] => Ok(Some((*one).clone())),
        [] => Ok(term_after(words, CATEGORY_TRIGGERS)),
        many => {
            let names: Vec<String> = many.iter().map(|c| (*c).clone()).collect();
            Err(AssistantError::AmbiguousQuery(format!(
                "Which category did you mean: {}?",
                join_alternatives(&names)
            )))
        }
    }
}
