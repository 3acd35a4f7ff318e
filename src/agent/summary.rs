//! Spoken summaries
//!
//! One or two short sentences per result, written to be read aloud.

use crate::calendar::spoken_date;
use crate::execution::{CategoryScope, Evaluation};
use crate::models::{AnalysisResult, BreakdownRow, Flow, GroupBy, Metric, Plan, Reply, ReplyKind, Transaction};

/// Spoken lists stop after this many items.
const MAX_SPOKEN_ITEMS: usize = 5;

/// `$1,234.56`, with a leading minus for negative values.
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, digit) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

/// "a", "a and b", "a, b, and c"
pub fn join_and(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{} and {}", a, b),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("1 {}", word)
    } else if let Some(stem) = word.strip_suffix('y') {
        format!("{} {}ies", count, stem)
    } else {
        format!("{} {}s", count, word)
    }
}

fn flow_noun(flow: Flow) -> &'static str {
    match flow {
        Flow::Expenses => "expense",
        Flow::Income => "income",
        Flow::All => "transaction",
    }
}

/// " on Food at Starbucks in January 2024"
fn scope_suffix(evaluation: &Evaluation) -> String {
    let mut scope = String::new();
    if let CategoryScope::Resolved(label) = &evaluation.category {
        match evaluation.flow {
            Flow::Expenses => scope.push_str(&format!(" on {}", label)),
            _ => scope.push_str(&format!(" in {}", label)),
        }
    }
    if let Some(merchant) = &evaluation.merchant {
        scope.push_str(&format!(" at {}", merchant));
    }
    if let Some(period) = &evaluation.period {
        scope.push(' ');
        scope.push_str(period);
    }
    scope
}

fn spoken_items(items: Vec<String>) -> String {
    let extra = items.len().saturating_sub(MAX_SPOKEN_ITEMS);
    let mut spoken: Vec<String> = items.into_iter().take(MAX_SPOKEN_ITEMS).collect();
    if extra > 0 {
        spoken.push(format!("{} more", extra));
    }
    join_and(&spoken)
}

/// Turn an evaluation into the reply spoken back to the user.
pub fn summarize(plan: &Plan, evaluation: &Evaluation) -> Reply {
    let result = evaluation.result.clone();

    if let CategoryScope::Unknown(term) = &evaluation.category {
        let known = if evaluation.known_categories.is_empty() {
            String::new()
        } else {
            format!(" Your categories are {}.", join_and(&evaluation.known_categories))
        };
        return Reply::new(
            ReplyKind::NoData,
            format!(
                "I couldn't find a category called \"{}\", so that comes to {}.{}",
                term,
                format_currency(0.0),
                known
            ),
        )
        .with_result(result);
    }

    let scope = scope_suffix(evaluation);
    let (kind, text) = match &evaluation.result {
        AnalysisResult::Total { amount, count } => {
            let lead = match evaluation.flow {
                Flow::Expenses => format!("You spent {}{}", format_currency(*amount), scope),
                Flow::Income => format!("Your income{} came to {}", scope, format_currency(*amount)),
                Flow::All => format!("Your net cash flow{} was {}", scope, format_currency(*amount)),
            };
            if *count == 0 {
                (ReplyKind::NoData, format!("{}. I don't see any matching transactions.", lead))
            } else {
                (ReplyKind::Answer, format!("{} across {}.", lead, plural(*count, "transaction")))
            }
        }
        AnalysisResult::Average { amount, count } => {
            if *count == 0 {
                (
                    ReplyKind::NoData,
                    format!("I don't see any {}s{} to average, so that's {}.", flow_noun(evaluation.flow), scope, format_currency(0.0)),
                )
            } else {
                (
                    ReplyKind::Answer,
                    format!(
                        "Your average {}{} was {}, across {}.",
                        flow_noun(evaluation.flow),
                        scope,
                        format_currency(*amount),
                        plural(*count, "transaction")
                    ),
                )
            }
        }
        AnalysisResult::Count { count } => {
            let noun = match evaluation.flow {
                Flow::Expenses => "expense transaction",
                Flow::Income => "income transaction",
                Flow::All => "transaction",
            };
            let kind = if *count == 0 { ReplyKind::NoData } else { ReplyKind::Answer };
            (kind, format!("You have {}{}.", plural(*count, noun), scope))
        }
        AnalysisResult::Extreme { transaction } => {
            let which = if plan.metric == Metric::Smallest { "smallest" } else { "largest" };
            match transaction {
                Some(t) => (
                    ReplyKind::Answer,
                    format!(
                        "Your {} {}{} was {} at {} on {}, in {}.",
                        which,
                        flow_noun(evaluation.flow),
                        scope,
                        format_currency(spoken_amount(t, evaluation.flow)),
                        t.description,
                        spoken_date(t.date),
                        t.category
                    ),
                ),
                None => (
                    ReplyKind::NoData,
                    format!("I couldn't find any matching transactions{}.", scope),
                ),
            }
        }
        AnalysisResult::Breakdown { rows } => summarize_breakdown(plan, evaluation, rows, &scope),
        AnalysisResult::MonthlyAverage { amount, months } => {
            if *months == 0 {
                (ReplyKind::NoData, "I don't have enough months of data to average.".to_string())
            } else {
                let lead = match evaluation.flow {
                    Flow::Expenses => format!("You spend about {} a month", format_currency(*amount)),
                    Flow::Income => format!("Your income averages {} a month", format_currency(*amount)),
                    Flow::All => format!("Your net cash flow averages {} a month", format_currency(*amount)),
                };
                (
                    ReplyKind::Answer,
                    format!("{}{}, based on {}.", lead, scope, plural(*months, "month")),
                )
            }
        }
        AnalysisResult::Listing { transactions } => {
            if transactions.is_empty() {
                (
                    ReplyKind::NoData,
                    format!("I don't see any {}s{}.", flow_noun(evaluation.flow), scope),
                )
            } else {
                let items = transactions
                    .iter()
                    .map(|t| {
                        format!(
                            "{} for {} on {}",
                            t.description,
                            format_currency(spoken_amount(t, evaluation.flow)),
                            spoken_date(t.date)
                        )
                    })
                    .collect();
                (
                    ReplyKind::Answer,
                    format!(
                        "Here are your {} most recent{}: {}.",
                        plural(transactions.len(), flow_noun(evaluation.flow)),
                        scope,
                        spoken_items(items)
                    ),
                )
            }
        }
        AnalysisResult::Overview { count, first, last, categories } => match (first, last) {
            (Some(first), Some(last)) if *count > 0 => (
                ReplyKind::Answer,
                format!(
                    "You have {}{} from {} to {}, across {}: {}.",
                    plural(*count, "transaction"),
                    scope,
                    spoken_date(*first),
                    spoken_date(*last),
                    plural(categories.len(), "category"),
                    join_and(categories)
                ),
            ),
            _ => (ReplyKind::NoData, format!("There are no transactions{}.", scope)),
        },
    };

    Reply::new(kind, text).with_result(result)
}

/// Expenses read as positive amounts.
fn spoken_amount(t: &Transaction, flow: Flow) -> f64 {
    match flow {
        Flow::Expenses => -t.amount,
        _ => t.amount,
    }
}

fn summarize_breakdown(
    plan: &Plan,
    evaluation: &Evaluation,
    rows: &[BreakdownRow],
    scope: &str,
) -> (ReplyKind, String) {
    let group = match plan.group_by {
        Some(GroupBy::Month) => "month",
        Some(GroupBy::Merchant) => "merchant",
        _ => "category",
    };

    if rows.is_empty() {
        return (
            ReplyKind::NoData,
            format!("I don't see any {}s{} to break down by {}.", flow_noun(evaluation.flow), scope, group),
        );
    }

    let value = |row: &BreakdownRow| match plan.metric {
        Metric::Count => plural(row.count, "transaction"),
        _ => format_currency(row.amount),
    };

    let subject = match (plan.metric, evaluation.flow) {
        (Metric::Count, _) => "Transaction count".to_string(),
        (Metric::Average, flow) => format!("Average {}", flow_noun(flow)),
        (Metric::MonthlyAverage, Flow::Expenses) => "Monthly average spending".to_string(),
        (Metric::MonthlyAverage, Flow::Income) => "Monthly average income".to_string(),
        (Metric::MonthlyAverage, Flow::All) => "Monthly average cash flow".to_string(),
        (_, Flow::Expenses) => "Spending".to_string(),
        (_, Flow::Income) => "Income".to_string(),
        (_, Flow::All) => "Net cash flow".to_string(),
    };

    if plan.limit == Some(1) && group != "month" {
        let top = &rows[0];
        return (
            ReplyKind::Answer,
            format!(
                "{}{} is highest for {}, at {}.",
                subject,
                scope,
                top.label,
                value(top)
            ),
        );
    }

    let items = rows
        .iter()
        .map(|row| format!("{} {}", row.label, value(row)))
        .collect();
    (
        ReplyKind::Answer,
        format!("{} by {}{}: {}.", subject, group, scope, spoken_items(items)),
    )
}
