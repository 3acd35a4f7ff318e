//! Category assignment for rows that arrive without one.
//!
//! Keyword rules cover the bulk of statement lines. The Gemini categorizer
//! labels whatever it is given and falls back to the rules on any failure.

use crate::gemini::{strip_code_fence, GeminiClient};
use crate::models::RawRecord;
use crate::Result;
use async_trait::async_trait;
use tracing::{info, warn};

/// Fixed label set assigned during ingest.
pub const CATEGORIES: &[&str] = &[
    "Retail",
    "Travel",
    "Entertainment",
    "Food & Dining",
    "Utilities",
    "Health",
    "Income",
    "Transfer",
    "Other",
    "Groceries",
    "Education",
    "Subscription",
];

pub const FALLBACK_CATEGORY: &str = "Other";

/// Checked in order; earlier entries win ("whole foods" is groceries,
/// "uber eats" is dining before "uber" is travel).
const RULES: &[(&str, &[&str])] = &[
    ("Transfer", &["transfer", "zelle", "venmo", "paypal", "payment thank you", "autopay", "atm withdrawal"]),
    ("Groceries", &["grocery", "groceries", "whole foods", "trader joe", "safeway", "kroger", "aldi", "costco", "supermarket", "h-e-b", "market"]),
    ("Food & Dining", &["restaurant", "cafe", "coffee", "starbucks", "pizza", "burger", "doordash", "uber eats", "grubhub", "mcdonald", "chipotle", "diner", "bakery", "taco", "sushi", "bar & grill"]),
    ("Subscription", &["netflix", "spotify", "hulu", "subscription", "prime video", "disney+", "apple.com/bill", "youtube premium", "membership"]),
    ("Utilities", &["electric", "water bill", "internet", "comcast", "xfinity", "verizon", "at&t", "t-mobile", "utility", "energy", "power co"]),
    ("Health", &["pharmacy", "cvs", "walgreens", "doctor", "dental", "clinic", "hospital", "medical", "gym", "fitness"]),
    ("Education", &["tuition", "university", "college", "school", "coursera", "udemy", "bookstore"]),
    ("Travel", &["airline", "airlines", "hotel", "airbnb", "uber", "lyft", "parking", "transit", "amtrak", "expedia", "shell", "chevron", "exxon"]),
    ("Entertainment", &["cinema", "movie", "theatre", "theater", "ticketmaster", "steam", "concert", "bowling", "arcade"]),
    ("Retail", &["amazon", "target", "walmart", "best buy", "ikea", "store", "shop", "mall", "outlet"]),
];

const INCOME_HINTS: &[&str] = &["payroll", "paycheck", "salary", "direct dep", "deposit", "refund", "interest paid", "reimbursement"];

/// Deterministically categorize one statement line.
/// Priority: income hints on credits > keyword rules > `Other`.
pub fn categorize_description(description: &str, amount: Option<f64>) -> &'static str {
    let desc = description.to_lowercase();

    if amount.is_some_and(|a| a > 0.0) && INCOME_HINTS.iter().any(|h| desc.contains(*h)) {
        return "Income";
    }

    for (category, keywords) in RULES {
        if keywords.iter().any(|kw| desc.contains(*kw)) {
            return *category;
        }
    }

    if amount.is_some_and(|a| a > 0.0) {
        return "Income";
    }

    FALLBACK_CATEGORY
}

/// Map an arbitrary label onto the fixed list, case-insensitively.
pub fn normalize_category(label: &str) -> &'static str {
    let wanted = label.trim();
    CATEGORIES
        .iter()
        .find(|c| c.eq_ignore_ascii_case(wanted))
        .copied()
        .unwrap_or(FALLBACK_CATEGORY)
}

/// Assigns one category per record, in order.
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, records: &[RawRecord]) -> Result<Vec<String>>;
}

pub struct RuleCategorizer;

#[async_trait]
impl Categorizer for RuleCategorizer {
    async fn categorize(&self, records: &[RawRecord]) -> Result<Vec<String>> {
        Ok(records.iter().map(rule_label).collect())
    }
}

fn rule_label(record: &RawRecord) -> String {
    let amount = super::fields::parse_amount(&record.amount);
    categorize_description(&record.description, amount).to_string()
}

const CATEGORIZER_SYSTEM: &str = "You label bank statement lines. \
Answer with a JSON array of strings, one label per input line, in order. \
Use only the allowed labels.";

/// Larger batches are labelled by rules only; prompt size stays bounded.
const MAX_LLM_BATCH: usize = 200;

pub struct GeminiCategorizer {
    client: GeminiClient,
}

impl GeminiCategorizer {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }

    fn build_prompt(records: &[RawRecord]) -> String {
        let mut prompt = format!("Allowed labels: {}\n\nLines:\n", CATEGORIES.join(", "));
        for (i, record) in records.iter().enumerate() {
            prompt.push_str(&format!("{}. {} ({})\n", i + 1, record.description, record.amount));
        }
        prompt
    }

    fn parse_labels(text: &str, expected: usize) -> Result<Vec<String>> {
        let labels: Vec<String> = serde_json::from_str(strip_code_fence(text))?;
        if labels.len() != expected {
            return Err(crate::error::AssistantError::LlmError(format!(
                "expected {} labels, got {}",
                expected,
                labels.len()
            )));
        }
        Ok(labels
            .iter()
            .map(|l| normalize_category(l).to_string())
            .collect())
    }
}

#[async_trait]
impl Categorizer for GeminiCategorizer {
    async fn categorize(&self, records: &[RawRecord]) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        if !self.client.is_configured() || records.len() > MAX_LLM_BATCH {
            return RuleCategorizer.categorize(records).await;
        }

        let prompt = Self::build_prompt(records);
        let labels = match self.client.generate(CATEGORIZER_SYSTEM, &prompt, true).await {
            Ok(text) => Self::parse_labels(&text, records.len()),
            Err(e) => Err(e),
        };

        match labels {
            Ok(labels) => {
                info!(count = labels.len(), "Categorized rows with Gemini");
                Ok(labels)
            }
            Err(e) => {
                warn!("Gemini categorization failed, using keyword rules: {}", e);
                RuleCategorizer.categorize(records).await
            }
        }
    }
}
