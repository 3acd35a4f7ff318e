//! Transaction store
//!
//! Holds the validated transactions of one session. Each successful load
//! swaps in a new immutable `Dataset` with a higher version, so analyses that
//! started on the old snapshot can tell they are stale.

pub mod session;

pub use session::{SessionContext, SessionRegistry};

use crate::error::ValidationError;
use crate::ingest::{categorize::FALLBACK_CATEGORY, fields, MAX_ROWS};
use crate::models::{RawRecord, Transaction};
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Immutable snapshot of one upload.
#[derive(Debug, Default)]
pub struct Dataset {
    pub version: u64,
    pub transactions: Vec<Transaction>,
}

impl Dataset {
    pub fn expenses(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|t| t.is_expense())
    }

    pub fn income(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|t| t.is_income())
    }

    /// Distinct category labels, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.transactions
            .iter()
            .map(|t| t.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Validate raw rows into transactions, collecting every offending row.
pub fn validate_records(records: &[RawRecord]) -> std::result::Result<Vec<Transaction>, ValidationError> {
    if records.len() > MAX_ROWS {
        return Err(ValidationError::file(format!(
            "upload exceeds the {} row limit",
            MAX_ROWS
        )));
    }

    let mut errors = ValidationError::new();
    let mut transactions = Vec::with_capacity(records.len());

    for (idx, record) in records.iter().enumerate() {
        let row = idx + 1;
        let date = fields::parse_date(&record.date);
        let amount = fields::parse_amount(&record.amount);
        let description = record.description.trim();

        if date.is_none() {
            errors.push(row, format!("unparseable date '{}'", record.date.trim()));
        }
        if amount.is_none() {
            errors.push(row, format!("non-numeric amount '{}'", record.amount.trim()));
        }
        if description.is_empty() {
            errors.push(row, "missing description");
        }

        if let (Some(date), Some(amount), false) = (date, amount, description.is_empty()) {
            let category = record
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or(FALLBACK_CATEGORY);

            transactions.push(Transaction {
                date,
                description: description.to_string(),
                amount,
                category: category.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(transactions)
    } else {
        Err(errors)
    }
}

pub struct TransactionStore {
    current: RwLock<Arc<Dataset>>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Dataset::default())),
        }
    }

    /// Validate and replace the dataset. On failure the previous dataset is
    /// kept untouched.
    pub async fn load(&self, records: Vec<RawRecord>) -> Result<Vec<Transaction>> {
        let transactions = validate_records(&records)?;

        let mut current = self.current.write().await;
        let version = current.version + 1;
        *current = Arc::new(Dataset {
            version,
            transactions: transactions.clone(),
        });

        info!(version, rows = transactions.len(), "Dataset replaced");
        Ok(transactions)
    }

    pub async fn all(&self) -> Vec<Transaction> {
        self.current.read().await.transactions.clone()
    }

    pub async fn expenses(&self) -> Vec<Transaction> {
        self.current.read().await.expenses().cloned().collect()
    }

    pub async fn income(&self) -> Vec<Transaction> {
        self.current.read().await.income().cloned().collect()
    }

    pub async fn snapshot(&self) -> Arc<Dataset> {
        self.current.read().await.clone()
    }

    pub async fn version(&self) -> u64 {
        self.current.read().await.version
    }

    pub async fn categories(&self) -> Vec<String> {
        self.current.read().await.categories()
    }

    /// SHA-256 over the current transactions, hex encoded.
    pub async fn fingerprint(&self) -> String {
        compute_fingerprint(&self.current.read().await.transactions)
    }

    /// Drop the dataset. Counts as a replacement for staleness checks.
    pub async fn clear(&self) {
        let mut current = self.current.write().await;
        let version = current.version + 1;
        *current = Arc::new(Dataset {
            version,
            transactions: Vec::new(),
        });
    }
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Streams the JSON encoding straight into the hasher.
pub fn compute_fingerprint(transactions: &[Transaction]) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), transactions).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
