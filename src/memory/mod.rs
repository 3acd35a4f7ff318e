//! Session Memory
//!
//! Cached conversational summaries used to answer follow-up questions
//! without recomputing them.

pub mod cache;

pub use cache::{CachedSummary, SummaryCache};
