//! Budget Voice Assistant
//!
//! A voice-driven budgeting assistant that:
//! - Ingests a transaction CSV into a per-session store
//! - Classifies each utterance before any analysis runs
//! - Plans questions into a declarative query plan (LLM or rules)
//! - Executes plans deterministically under a time budget
//! - Speaks short natural-language summaries back through a voice session
//!
//! UNIFIED LOOP:
//! UTTERANCE → CLASSIFY → PLAN → EXECUTE → SUMMARIZE → SPEAK

pub mod agent;
pub mod api;
pub mod calendar;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod planner;
pub mod store;
pub mod voice;

pub use error::Result;

// Re-export common types
pub use agent::{AnalysisRouter, RouterConfig};
pub use classifier::{Intent, UtteranceClassifier};
pub use config::AppConfig;
pub use error::AssistantError;
pub use models::*;
pub use store::{SessionContext, SessionRegistry, TransactionStore};
pub use voice::{SpeechSink, TurnHandler, VoiceConfig, VoiceSession};
