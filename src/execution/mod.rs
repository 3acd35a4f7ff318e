//! Plan evaluator
//!
//! Runs a validated `Plan` over one dataset snapshot. Only filtering,
//! grouping, aggregation and arithmetic happen here; there is nothing to
//! interpret. LLM is NOT allowed here.

use crate::calendar::{month_name, months_between, Calendar};
use crate::error::AssistantError;
use crate::models::{
    AnalysisResult, BreakdownRow, Flow, GroupBy, Metric, Plan, Transaction,
};
use crate::planner::period::join_alternatives;
use crate::store::Dataset;
use crate::Result;
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Rows spoken back for a listing when the plan sets no limit.
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// How a category term matched the dataset's labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryMatch {
    Exact(String),
    Unique(String),
    Ambiguous(Vec<String>),
    Unknown,
}

/// Exact case-insensitive label first, then substring in either direction.
pub fn resolve_category(term: &str, categories: &[String]) -> CategoryMatch {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return CategoryMatch::Unknown;
    }

    if let Some(exact) = categories.iter().find(|c| c.to_lowercase() == needle) {
        return CategoryMatch::Exact(exact.clone());
    }

    let candidates: Vec<String> = categories
        .iter()
        .filter(|c| {
            let label = c.to_lowercase();
            label.contains(&needle) || needle.contains(&label)
        })
        .cloned()
        .collect();

    match candidates.len() {
        0 => CategoryMatch::Unknown,
        1 => CategoryMatch::Unique(candidates.into_iter().next().unwrap_or_default()),
        _ => CategoryMatch::Ambiguous(candidates),
    }
}

/// What the evaluated rows covered, for the spoken summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryScope {
    Any,
    Resolved(String),
    /// The term matched no category; the result is zero.
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub result: AnalysisResult,
    pub flow: Flow,
    pub category: CategoryScope,
    pub merchant: Option<String>,
    /// "in January 2024", "last month"
    pub period: Option<String>,
    pub known_categories: Vec<String>,
}

/// Stateless evaluator bound to a reference date.
pub struct Evaluator {
    reference: NaiveDate,
}

impl Evaluator {
    pub fn new(reference: NaiveDate) -> Self {
        Self { reference }
    }

    pub fn evaluate(&self, plan: &Plan, dataset: &Dataset) -> Result<Evaluation> {
        plan.validate()?;

        let calendar = Calendar::new(self.reference, dataset.transactions.iter().map(|t| t.date));
        let known_categories = dataset.categories();

        let category = match &plan.category {
            None => CategoryScope::Any,
            Some(term) => match resolve_category(term, &known_categories) {
                CategoryMatch::Exact(label) | CategoryMatch::Unique(label) => {
                    CategoryScope::Resolved(label)
                }
                CategoryMatch::Ambiguous(candidates) => {
                    return Err(AssistantError::AmbiguousQuery(format!(
                        "I found more than one category like \"{}\": {}. Which one did you mean?",
                        term.trim(),
                        join_alternatives(&candidates)
                    )));
                }
                CategoryMatch::Unknown => CategoryScope::Unknown(term.trim().to_string()),
            },
        };

        let span = match &plan.period {
            Some(period) => Some(calendar.span(period).ok_or_else(|| {
                AssistantError::ExecutionError(format!("period {:?} is out of range", period))
            })?),
            None => None,
        };
        let period = plan.period.as_ref().map(|p| calendar.phrase(p));
        let merchant = plan.merchant.as_ref().map(|m| m.trim().to_lowercase());

        let rows: Vec<&Transaction> = match &category {
            CategoryScope::Unknown(_) => Vec::new(),
            _ => dataset
                .transactions
                .iter()
                .filter(|t| in_flow(t, plan.flow))
                .filter(|t| match &category {
                    CategoryScope::Resolved(label) => t.category == *label,
                    _ => true,
                })
                .filter(|t| {
                    merchant
                        .as_ref()
                        .map_or(true, |m| t.description.to_lowercase().contains(m.as_str()))
                })
                .filter(|t| span.map_or(true, |(start, end)| t.date >= start && t.date <= end))
                .collect(),
        };

        debug!(
            metric = ?plan.metric,
            matched = rows.len(),
            version = dataset.version,
            "Evaluating plan"
        );

        let months = match span {
            Some((start, end)) => months_between((start.year(), start.month()), (end.year(), end.month())),
            None => calendar.dataset_months(),
        };

        let result = match plan.group_by {
            Some(group) => AnalysisResult::Breakdown {
                rows: breakdown(&rows, plan, group, months),
            },
            None => aggregate(&rows, plan, months),
        };

        Ok(Evaluation {
            result,
            flow: plan.flow,
            category,
            merchant: plan.merchant.as_ref().map(|m| m.trim().to_string()),
            period,
            known_categories,
        })
    }
}

fn in_flow(t: &Transaction, flow: Flow) -> bool {
    match flow {
        Flow::Expenses => t.is_expense(),
        Flow::Income => t.is_income(),
        Flow::All => true,
    }
}

/// Expenses are reported as positive magnitudes; `All` stays signed.
fn reported(t: &Transaction, flow: Flow) -> f64 {
    match flow {
        Flow::Expenses => -t.amount,
        Flow::Income | Flow::All => t.amount,
    }
}

/// Rounded to cents, with negative zero folded to zero.
fn round_cents(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

fn aggregate(rows: &[&Transaction], plan: &Plan, months: usize) -> AnalysisResult {
    let flow = plan.flow;
    let total: f64 = rows.iter().map(|t| reported(t, flow)).sum();
    let count = rows.len();

    match plan.metric {
        Metric::Total => AnalysisResult::Total {
            amount: round_cents(total),
            count,
        },
        Metric::Average => AnalysisResult::Average {
            amount: if count == 0 { 0.0 } else { round_cents(total / count as f64) },
            count,
        },
        Metric::Count => AnalysisResult::Count { count },
        Metric::Largest | Metric::Smallest => {
            // For signed flows the extreme is by magnitude
            let key = |t: &&&Transaction| match flow {
                Flow::All => t.amount.abs(),
                _ => reported(t, flow),
            };
            let pick = if plan.metric == Metric::Largest {
                rows.iter().max_by(|a, b| key(a).total_cmp(&key(b)))
            } else {
                rows.iter().min_by(|a, b| key(a).total_cmp(&key(b)))
            };
            AnalysisResult::Extreme {
                transaction: pick.map(|t| (*t).clone()),
            }
        }
        Metric::List => {
            let mut listed: Vec<Transaction> = rows.iter().map(|t| (*t).clone()).collect();
            // Stable sort keeps upload order for same-day rows
            listed.sort_by(|a, b| b.date.cmp(&a.date));
            listed.truncate(plan.limit.unwrap_or(DEFAULT_LIST_LIMIT));
            AnalysisResult::Listing { transactions: listed }
        }
        Metric::MonthlyAverage => AnalysisResult::MonthlyAverage {
            amount: if months == 0 { 0.0 } else { round_cents(total / months as f64) },
            months,
        },
        Metric::Overview => AnalysisResult::Overview {
            count,
            first: rows.iter().map(|t| t.date).min(),
            last: rows.iter().map(|t| t.date).max(),
            categories: rows
                .iter()
                .map(|t| t.category.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        },
    }
}

/// Merchant label: the description up to the first run of digits or `#`,
/// so "STARBUCKS #1234" and "STARBUCKS #88" group together.
fn merchant_label(description: &str) -> String {
    let cut = description
        .find(|c: char| c.is_ascii_digit() || c == '#' || c == '*')
        .unwrap_or(description.len());
    let label = description[..cut].trim();
    if label.is_empty() {
        description.trim().to_string()
    } else {
        label.to_string()
    }
}

fn breakdown(rows: &[&Transaction], plan: &Plan, group: GroupBy, months: usize) -> Vec<BreakdownRow> {
    // Month keys sort chronologically; other labels by amount
    let mut by_month: BTreeMap<(i32, u32), (f64, usize)> = BTreeMap::new();
    let mut by_label: HashMap<String, (f64, usize)> = HashMap::new();

    for t in rows {
        let value = reported(t, plan.flow);
        let slot = match group {
            GroupBy::Month => by_month.entry((t.date.year(), t.date.month())).or_default(),
            GroupBy::Category => by_label.entry(t.category.clone()).or_default(),
            GroupBy::Merchant => by_label
                .entry(merchant_label(&t.description).to_uppercase())
                .or_default(),
        };
        slot.0 += value;
        slot.1 += 1;
    }

    let finish = |label: String, (sum, count): (f64, usize)| {
        let amount = match plan.metric {
            Metric::Average if count > 0 => sum / count as f64,
            Metric::MonthlyAverage if months > 0 => sum / months as f64,
            _ => sum,
        };
        BreakdownRow {
            label,
            amount: round_cents(amount),
            count,
        }
    };

    let mut rows: Vec<BreakdownRow> = if group == GroupBy::Month {
        by_month
            .into_iter()
            .map(|((year, month), agg)| {
                finish(format!("{} {}", month_name(month), year), agg)
            })
            .collect()
    } else {
        let mut rows: Vec<BreakdownRow> = by_label
            .into_iter()
            .map(|(label, agg)| finish(label, agg))
            .collect();
        rows.sort_by(|a, b| {
            let ordering = if plan.metric == Metric::Count {
                b.count.cmp(&a.count)
            } else {
                b.amount.total_cmp(&a.amount)
            };
            ordering.then_with(|| a.label.cmp(&b.label))
        });
        rows
    };

    if let Some(limit) = plan.limit {
        rows.truncate(limit);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Period, RawRecord};
    use crate::store::validate_records;

    fn dataset() -> Dataset {
        let records = vec![
            RawRecord::new("2024-01-05", "Coffee Shop", "-4.50", Some("Food")),
            RawRecord::new("2024-01-20", "Paycheck", "2000.00", Some("Income")),
            RawRecord::new("2024-01-22", "STARBUCKS #12", "-6.25", Some("Fast Food")),
            RawRecord::new("2024-02-03", "STARBUCKS #88", "-5.75", Some("Fast Food")),
            RawRecord::new("2024-02-10", "Grocer", "-61.10", Some("Groceries")),
        ];
        Dataset {
            version: 1,
            transactions: validate_records(&records).unwrap(),
        }
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
    }

    fn food_in_january() -> Plan {
        Plan {
            category: Some("Food".to_string()),
            period: Some(Period::Month { month: 1, year: None }),
            ..Plan::default()
        }
    }

    #[test]
    fn test_category_total_for_month() {
        let evaluation = evaluator().evaluate(&food_in_january(), &dataset()).unwrap();
        assert_eq!(evaluation.result, AnalysisResult::Total { amount: 4.5, count: 1 });
        assert_eq!(evaluation.category, CategoryScope::Resolved("Food".to_string()));
        assert_eq!(evaluation.period.as_deref(), Some("in January 2024"));
    }

    #[test]
    fn test_income_total() {
        let evaluation = evaluator().evaluate(&Plan::total(Flow::Income), &dataset()).unwrap();
        assert_eq!(evaluation.result, AnalysisResult::Total { amount: 2000.0, count: 1 });
    }

    #[test]
    fn test_net_flow_is_signed() {
        let evaluation = evaluator().evaluate(&Plan::total(Flow::All), &dataset()).unwrap();
        assert_eq!(evaluation.result, AnalysisResult::Total { amount: 1922.4, count: 5 });
    }

    #[test]
    fn test_substring_category_resolution() {
        let categories = vec!["Food".to_string(), "Fast Food".to_string(), "Groceries".to_string()];
        assert_eq!(resolve_category("food", &categories), CategoryMatch::Exact("Food".to_string()));
        assert_eq!(resolve_category("grocer", &categories), CategoryMatch::Unique("Groceries".to_string()));
        assert_eq!(resolve_category("pets", &categories), CategoryMatch::Unknown);

        let without_exact = vec!["Fast Food".to_string(), "Food Delivery".to_string()];
        assert_eq!(
            resolve_category("food", &without_exact),
            CategoryMatch::Ambiguous(without_exact.clone())
        );
    }

    #[test]
    fn test_ambiguous_category_asks_instead_of_guessing() {
        let plan = Plan {
            category: Some("oo".to_string()),
            ..Plan::default()
        };
        let err = evaluator().evaluate(&plan, &dataset()).unwrap_err();
        match err {
            AssistantError::AmbiguousQuery(q) => {
                assert!(q.contains("Fast Food"));
                assert!(q.contains("Food"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_category_is_zero() {
        let plan = Plan {
            category: Some("Travel".to_string()),
            ..Plan::default()
        };
        let evaluation = evaluator().evaluate(&plan, &dataset()).unwrap();
        assert_eq!(evaluation.result, AnalysisResult::Total { amount: 0.0, count: 0 });
        assert_eq!(evaluation.category, CategoryScope::Unknown("Travel".to_string()));
    }

    #[test]
    fn test_empty_period_is_zero() {
        let plan = Plan {
            period: Some(Period::Month { month: 7, year: Some(2023) }),
            ..Plan::default()
        };
        let evaluation = evaluator().evaluate(&plan, &dataset()).unwrap();
        assert_eq!(evaluation.result, AnalysisResult::Total { amount: 0.0, count: 0 });
    }

    #[test]
    fn test_category_breakdown_sorted_by_amount() {
        let plan = Plan {
            group_by: Some(GroupBy::Category),
            ..Plan::default()
        };
        let evaluation = evaluator().evaluate(&plan, &dataset()).unwrap();
        let AnalysisResult::Breakdown { rows } = evaluation.result else {
            panic!("expected breakdown");
        };
        let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Groceries", "Fast Food", "Food"]);
        assert_eq!(rows[1].amount, 12.0);
        assert_eq!(rows[1].count, 2);
    }

    #[test]
    fn test_merchant_breakdown_groups_store_numbers() {
        let plan = Plan {
            group_by: Some(GroupBy::Merchant),
            limit: Some(1),
            ..Plan::default()
        };
        let evaluation = evaluator().evaluate(&plan, &dataset()).unwrap();
        let AnalysisResult::Breakdown { rows } = evaluation.result else {
            panic!("expected breakdown");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "GROCER");

        assert_eq!(merchant_label("STARBUCKS #1234"), "STARBUCKS");
        assert_eq!(merchant_label("7-Eleven"), "7-Eleven");
    }

    #[test]
    fn test_monthly_average_over_dataset_months() {
        let plan = Plan {
            metric: Metric::MonthlyAverage,
            ..Plan::default()
        };
        let evaluation = evaluator().evaluate(&plan, &dataset()).unwrap();
        assert_eq!(
            evaluation.result,
            AnalysisResult::MonthlyAverage { amount: 38.8, months: 2 }
        );
    }

    #[test]
    fn test_month_breakdown_is_chronological() {
        let plan = Plan {
            group_by: Some(GroupBy::Month),
            ..Plan::default()
        };
        let evaluation = evaluator().evaluate(&plan, &dataset()).unwrap();
        let AnalysisResult::Breakdown { rows } = evaluation.result else {
            panic!("expected breakdown");
        };
        assert_eq!(rows[0].label, "January 2024");
        assert_eq!(rows[0].amount, 10.75);
        assert_eq!(rows[1].label, "February 2024");
    }

    #[test]
    fn test_listing_is_deterministic() {
        let plan = Plan {
            metric: Metric::List,
            limit: Some(2),
            ..Plan::default()
        };
        let first = evaluator().evaluate(&plan, &dataset()).unwrap();
        let second = evaluator().evaluate(&plan, &dataset()).unwrap();
        assert_eq!(first, second);

        let AnalysisResult::Listing { transactions } = first.result else {
            panic!("expected listing");
        };
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].description, "Grocer");
    }

    #[test]
    fn test_largest_and_smallest_expense() {
        let largest = Plan {
            metric: Metric::Largest,
            ..Plan::default()
        };
        let evaluation = evaluator().evaluate(&largest, &dataset()).unwrap();
        match evaluation.result {
            AnalysisResult::Extreme { transaction: Some(t) } => assert_eq!(t.description, "Grocer"),
            other => panic!("unexpected result: {:?}", other),
        }

        let smallest = Plan {
            metric: Metric::Smallest,
            ..Plan::default()
        };
        let evaluation = evaluator().evaluate(&smallest, &dataset()).unwrap();
        match evaluation.result {
            AnalysisResult::Extreme { transaction: Some(t) } => assert_eq!(t.description, "Coffee Shop"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_relative_period_uses_reference_date() {
        let plan = Plan {
            period: Some(Period::LastMonth),
            ..Plan::default()
        };
        let evaluation = evaluator().evaluate(&plan, &dataset()).unwrap();
        assert_eq!(evaluation.result, AnalysisResult::Total { amount: 66.85, count: 2 });
        assert_eq!(evaluation.period.as_deref(), Some("last month"));
    }

    #[test]
    fn test_empty_dataset() {
        let evaluation = evaluator()
            .evaluate(&Plan::total(Flow::Expenses), &Dataset::default())
            .unwrap();
        assert_eq!(evaluation.result, AnalysisResult::Total { amount: 0.0, count: 0 });
    }
}
