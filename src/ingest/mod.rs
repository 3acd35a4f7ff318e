//! Statement ingest
//!
//! Turns uploaded CSV/TXT bytes into `RawRecord`s: finds the header, maps
//! bank-specific column names onto Date/Description/Amount (or Debit and
//! Credit) and Category, and fills in missing categories.
//! Validation of the values themselves happens in `TransactionStore::load`.

pub mod categorize;
pub mod fields;

pub use categorize::{Categorizer, GeminiCategorizer, RuleCategorizer, CATEGORIES};

use crate::error::ValidationError;
use crate::models::RawRecord;
use crate::Result;
use csv::StringRecord;
use tracing::{debug, info};

/// Upper bound on data rows accepted from one upload.
pub const MAX_ROWS: usize = 100_000;

const DATE_HEADERS: &[&str] = &["date", "transaction date", "trans. date", "trans date", "posted date", "posting date", "post date"];
const DESCRIPTION_HEADERS: &[&str] = &["description", "merchant", "payee", "name", "memo", "details", "transaction description"];
const AMOUNT_HEADERS: &[&str] = &["amount", "transaction amount", "amount (usd)", "value"];
const DEBIT_HEADERS: &[&str] = &["debit", "debits", "withdrawal", "withdrawals", "money out", "debit amount"];
const CREDIT_HEADERS: &[&str] = &["credit", "credits", "deposit", "deposits", "money in", "credit amount"];
const CATEGORY_HEADERS: &[&str] = &["category", "type of spend"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AmountColumns {
    Single(usize),
    DebitCredit { debit: usize, credit: usize },
}

/// Column positions of one statement layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    date: usize,
    description: usize,
    amount: AmountColumns,
    category: Option<usize>,
}

impl ColumnMap {
    fn from_header(record: &StringRecord) -> Option<Self> {
        let headers: Vec<String> = record.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h.as_str()));

        let date = find(DATE_HEADERS)?;
        let description = find(DESCRIPTION_HEADERS)?;
        let amount = match find(AMOUNT_HEADERS) {
            Some(idx) => AmountColumns::Single(idx),
            None => AmountColumns::DebitCredit {
                debit: find(DEBIT_HEADERS)?,
                credit: find(CREDIT_HEADERS)?,
            },
        };

        Some(Self {
            date,
            description,
            amount,
            category: find(CATEGORY_HEADERS),
        })
    }

    /// Headerless exports in Date, Description, Amount[, Category] order.
    fn positional(record: &StringRecord) -> Option<Self> {
        let looks_like_row = matches!(record.len(), 3 | 4)
            && record.get(0).and_then(fields::parse_date).is_some()
            && record.get(2).and_then(fields::parse_amount).is_some();

        looks_like_row.then_some(Self {
            date: 0,
            description: 1,
            amount: AmountColumns::Single(2),
            category: (record.len() == 4).then_some(3),
        })
    }

    fn extract(&self, record: &StringRecord) -> RawRecord {
        let get = |idx: usize| record.get(idx).unwrap_or("").trim().to_string();

        let amount = match self.amount {
            AmountColumns::Single(idx) => get(idx),
            AmountColumns::DebitCredit { debit, credit } => {
                combine_debit_credit(&get(debit), &get(credit))
            }
        };

        let category = self
            .category
            .map(get)
            .filter(|c| !c.is_empty());

        RawRecord {
            date: get(self.date),
            description: get(self.description),
            amount,
            category,
        }
    }
}

/// Debits count as expenses and credits as income, whatever sign the bank
/// printed. An unparseable side is passed through so validation reports it.
fn combine_debit_credit(debit: &str, credit: &str) -> String {
    match (debit.is_empty(), credit.is_empty()) {
        (false, _) => match fields::parse_amount(debit) {
            Some(value) if value != 0.0 || credit.is_empty() => format!("{}", -value.abs()),
            Some(_) => credit_amount(credit),
            None => debit.to_string(),
        },
        (true, false) => credit_amount(credit),
        (true, true) => String::new(),
    }
}

fn credit_amount(credit: &str) -> String {
    match fields::parse_amount(credit) {
        Some(value) => format!("{}", value.abs()),
        None => credit.to_string(),
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}

/// Parse statement text into raw records without touching categories.
pub fn parse_statement(content: &str) -> Result<Vec<RawRecord>> {
    let content = content.trim_start_matches('\u{feff}');

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(content.as_bytes());

    let mut map: Option<ColumnMap> = None;
    let mut records = Vec::new();

    for result in reader.records() {
        let record = result?;
        if is_blank(&record) {
            continue;
        }

        let columns = match map {
            Some(columns) => columns,
            None => {
                // First non-blank line: either a header or already data
                if let Some(columns) = ColumnMap::from_header(&record) {
                    debug!(?columns, "Detected statement header");
                    map = Some(columns);
                    continue;
                }
                let columns = ColumnMap::positional(&record).ok_or_else(|| {
                    ValidationError::file(
                        "could not find Date, Description and Amount columns",
                    )
                })?;
                debug!(?columns, "Headerless statement, using positional columns");
                map = Some(columns);
                columns
            }
        };

        if records.len() >= MAX_ROWS {
            return Err(ValidationError::file(format!(
                "upload exceeds the {} row limit",
                MAX_ROWS
            ))
            .into());
        }

        records.push(columns.extract(&record));
    }

    if map.is_none() {
        return Err(ValidationError::file("the file is empty").into());
    }
    if records.is_empty() {
        return Err(ValidationError::file("the file has no transactions").into());
    }

    Ok(records)
}

/// Parse statement text and assign categories to rows missing one.
pub async fn ingest(content: &str, categorizer: &dyn Categorizer) -> Result<Vec<RawRecord>> {
    let mut records = parse_statement(content)?;

    let missing: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.category.is_none())
        .map(|(i, _)| i)
        .collect();

    if !missing.is_empty() {
        let batch: Vec<RawRecord> = missing.iter().map(|&i| records[i].clone()).collect();
        let labels = categorizer.categorize(&batch).await?;

        for (idx, label) in missing.iter().zip(labels) {
            records[*idx].category = Some(label);
        }
    }

    info!(
        rows = records.len(),
        categorized = missing.len(),
        "Statement ingested"
    );

    Ok(records)
}
