//! Error types for the budget voice assistant

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {

    // =============================
    // Upload / Store Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(ValidationError),

    #[error("Upload error: {0}")]
    UploadError(String),

    // =============================
    // Analysis Pipeline Errors
    // =============================

    /// Carries the clarifying question to put back to the user.
    #[error("Ambiguous query: {0}")]
    AmbiguousQuery(String),

    #[error("Execution exceeded its {0:?} budget")]
    ExecutionTimeout(Duration),

    #[error("Dataset changed while the analysis was running")]
    StaleDataset,

    #[error("Planning error: {0}")]
    PlanningError(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    // =============================
    // Collaborators
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Speech output error: {0}")]
    SpeechError(String),

    #[error("Voice session closed")]
    SessionClosed,

    // =============================
    // External Library Conversions
    // =============================

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Access token error: {0}")]
    TokenError(#[from] livekit_api::access_token::AccessTokenError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<ValidationError> for AssistantError {
    fn from(err: ValidationError) -> Self {
        AssistantError::Validation(err)
    }
}

/// One rejected upload row. `row` is the 1-based data row (header excluded).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub reason: String,
}

/// Every offending row of a rejected upload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    pub issues: Vec<RowIssue>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whole-file problem that is not tied to a single row.
    pub fn file(reason: impl Into<String>) -> Self {
        Self {
            issues: vec![RowIssue {
                row: 0,
                reason: reason.into(),
            }],
        }
    }

    pub fn push(&mut self, row: usize, reason: impl Into<String>) {
        self.issues.push(RowIssue {
            row,
            reason: reason.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.issues.iter().map(|i| i.row).filter(|r| *r > 0).collect();
        rows.dedup();
        rows
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 5;

        let rendered: Vec<String> = self
            .issues
            .iter()
            .take(SHOWN)
            .map(|issue| {
                if issue.row == 0 {
                    issue.reason.clone()
                } else {
                    format!("row {}: {}", issue.row, issue.reason)
                }
            })
            .collect();

        write!(f, "{}", rendered.join("; "))?;
        if self.issues.len() > SHOWN {
            write!(f, " (and {} more)", self.issues.len() - SHOWN)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}
