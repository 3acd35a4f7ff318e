//! Core data models for the budget assistant

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Transactions =================
//

/// One validated ledger line. Negative amounts are expenses.
///
/// Serializes with the upload wire names (`Date`, `Description`, `Amount`,
/// `Category`) so listings can be returned as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Amount")]
    pub amount: f64,
    #[serde(rename = "Category")]
    pub category: String,
}

impl Transaction {
    pub fn is_expense(&self) -> bool {
        self.amount < 0.0
    }

    pub fn is_income(&self) -> bool {
        self.amount > 0.0
    }
}

/// Unvalidated row as produced by ingest, before `TransactionStore::load`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawRecord {
    pub date: String,
    pub description: String,
    pub amount: String,
    pub category: Option<String>,
}

impl RawRecord {
    pub fn new(
        date: impl Into<String>,
        description: impl Into<String>,
        amount: impl Into<String>,
        category: Option<&str>,
    ) -> Self {
        Self {
            date: date.into(),
            description: description.into(),
            amount: amount.into(),
            category: category.map(str::to_string),
        }
    }
}

//
// ================= Plan =================
//

/// Which sign of transactions a plan reads.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    #[default]
    Expenses,
    Income,
    All,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Total,
    Average,
    Count,
    Largest,
    Smallest,
    List,
    MonthlyAverage,
    Overview,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Category,
    Month,
    Merchant,
}

/// Time window of a plan. Relative variants resolve against the router's
/// reference date at execution time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Period {
    Month {
        month: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        year: Option<i32>,
    },
    Year {
        year: i32,
    },
    Range {
        start: NaiveDate,
        end: NaiveDate,
    },
    LastDays {
        days: u32,
    },
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
}

pub const MAX_PLAN_LIMIT: usize = 50;
const MAX_TERM_LEN: usize = 64;
const MAX_LAST_DAYS: u32 = 3660;

/// Declarative query over the session's transactions.
///
/// Plans are pure data: the executor only knows how to filter, group and
/// aggregate, so anything a planner (including an LLM) emits is bounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Plan {
    #[serde(default)]
    pub flow: Flow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Plan {
    pub fn total(flow: Flow) -> Self {
        Self {
            flow,
            ..Self::default()
        }
    }

    /// Reject plans the executor cannot answer meaningfully.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::AssistantError::InvalidPlan;

        for (label, term) in [("category", &self.category), ("merchant", &self.merchant)] {
            if let Some(term) = term {
                let trimmed = term.trim();
                if trimmed.is_empty() {
                    return Err(InvalidPlan(format!("empty {} term", label)));
                }
                if trimmed.chars().count() > MAX_TERM_LEN {
                    return Err(InvalidPlan(format!("{} term too long", label)));
                }
            }
        }

        match &self.period {
            Some(Period::Month { month, .. }) if !(1..=12).contains(month) => {
                return Err(InvalidPlan(format!("month {} out of range", month)));
            }
            Some(Period::Range { start, end }) if start > end => {
                return Err(InvalidPlan(format!("range starts after it ends ({} > {})", start, end)));
            }
            Some(Period::LastDays { days }) if *days == 0 || *days > MAX_LAST_DAYS => {
                return Err(InvalidPlan(format!("last_days {} out of range", days)));
            }
            _ => {}
        }

        if let Some(limit) = self.limit {
            if limit == 0 || limit > MAX_PLAN_LIMIT {
                return Err(InvalidPlan(format!("limit {} out of range", limit)));
            }
        }

        if self.group_by.is_some()
            && !matches!(
                self.metric,
                Metric::Total | Metric::Average | Metric::Count | Metric::MonthlyAverage
            )
        {
            return Err(InvalidPlan(format!(
                "{:?} cannot be grouped",
                self.metric
            )));
        }

        Ok(())
    }

    /// Canonical key for the summary cache: terms are case-folded so
    /// "Food" and "food" share an entry.
    pub fn cache_key(&self) -> String {
        let mut canonical = self.clone();
        canonical.category = canonical.category.map(|c| c.trim().to_lowercase());
        canonical.merchant = canonical.merchant.map(|m| m.trim().to_lowercase());
        serde_json::to_string(&canonical).unwrap_or_default()
    }
}

//
// ================= Analysis Result =================
//

/// Output of executing a plan. Expense amounts are reported as positive
/// magnitudes; `All` flow totals stay signed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisResult {
    Total {
        amount: f64,
        count: usize,
    },
    Average {
        amount: f64,
        count: usize,
    },
    Count {
        count: usize,
    },
    Extreme {
        transaction: Option<Transaction>,
    },
    Breakdown {
        rows: Vec<BreakdownRow>,
    },
    MonthlyAverage {
        amount: f64,
        months: usize,
    },
    Listing {
        transactions: Vec<Transaction>,
    },
    Overview {
        count: usize,
        first: Option<NaiveDate>,
        last: Option<NaiveDate>,
        categories: Vec<String>,
    },
}

impl AnalysisResult {
    /// Whether a later identical question can reuse this result.
    pub fn is_reusable(&self) -> bool {
        !matches!(
            self,
            AnalysisResult::Listing { .. } | AnalysisResult::Extreme { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakdownRow {
    pub label: String,
    pub amount: f64,
    pub count: usize,
}

//
// ================= Reply =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Conversational,
    Answer,
    Cached,
    Clarify,
    NoData,
    Timeout,
    Stale,
    StillWorking,
    Cancelled,
}

/// What the router hands back for speech synthesis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply {
    pub text: String,
    pub kind: ReplyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
}

impl Reply {
    pub fn new(kind: ReplyKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind,
            result: None,
        }
    }

    pub fn with_result(mut self, result: AnalysisResult) -> Self {
        self.result = Some(result);
        self
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Flow::Expenses => "expenses",
            Flow::Income => "income",
            Flow::All => "all transactions",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplyKind::Conversational => "conversational",
            ReplyKind::Answer => "answer",
            ReplyKind::Cached => "cached",
            ReplyKind::Clarify => "clarify",
            ReplyKind::NoData => "no_data",
            ReplyKind::Timeout => "timeout",
            ReplyKind::Stale => "stale",
            ReplyKind::StillWorking => "still_working",
            ReplyKind::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_serializes_with_wire_names() {
        let txn = Transaction {
            date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            description: "Coffee Shop".to_string(),
            amount: -4.5,
            category: "Food".to_string(),
        };

        let value = serde_json::to_value(&txn).unwrap();
        assert_eq!(value["Date"], "2024-01-05");
        assert_eq!(value["Description"], "Coffee Shop");
        assert_eq!(value["Amount"], -4.5);
        assert_eq!(value["Category"], "Food");
    }

    #[test]
    fn test_plan_parses_from_llm_json() {
        let json = r#"{
            "flow": "expenses",
            "category": "Food",
            "period": {"kind": "month", "month": 1},
            "metric": "total"
        }"#;
        let plan: Plan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.category.as_deref(), Some("Food"));
        assert_eq!(plan.period, Some(Period::Month { month: 1, year: None }));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_plan_validation_rejects_bad_ranges() {
        let plan = Plan {
            period: Some(Period::Month { month: 13, year: None }),
            ..Plan::default()
        };
        assert!(plan.validate().is_err());

        let plan = Plan {
            metric: Metric::List,
            group_by: Some(GroupBy::Category),
            ..Plan::default()
        };
        assert!(plan.validate().is_err());

        let plan = Plan {
            limit: Some(500),
            ..Plan::default()
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_cache_key_is_case_insensitive() {
        let a = Plan {
            category: Some("Food".to_string()),
            ..Plan::default()
        };
        let b = Plan {
            category: Some(" food ".to_string()),
            ..Plan::default()
        };
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_unknown_plan_fields_default() {
        let plan: Plan = serde_json::from_str("{}").unwrap();
        assert_eq!(plan.flow, Flow::Expenses);
        assert_eq!(plan.metric, Metric::Total);
    }
}
