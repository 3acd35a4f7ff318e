//! Utterance Classifier
//!
//! Classifies a recognized utterance as either:
//! - Conversational: greetings, help, "say that again", off-topic requests
//! - Analysis: questions that need a plan executed against the transactions
//!
//! Also detects interruption cues the voice adapter uses to cancel or
//! redirect an in-flight turn.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Nothing usable was recognized
    Unclear,
    SmallTalk,
    Help,
    Repeat,
    OffTopic,
    Analysis,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Unclear => "unclear",
            Intent::SmallTalk => "small_talk",
            Intent::Help => "help",
            Intent::Repeat => "repeat",
            Intent::OffTopic => "off_topic",
            Intent::Analysis => "analysis",
        }
    }
}

/// Static keyword lists
const FINANCE_KEYWORDS: &[&str] = &[
    // Spending
    "spend", "spent", "spending", "expense", "expenses", "cost", "costs",
    "pay", "paid", "payment", "payments", "purchase", "purchases", "bought",
    "buy", "charge", "charges", "bill", "bills",
    // Income
    "income", "earn", "earned", "earnings", "salary", "paycheck", "deposit",
    "deposits", "credit", "credits", "refund", "refunds",
    // Money words
    "money", "dollars", "cash", "budget", "saved", "save", "savings", "net",
    "balance",
    // Aggregates
    "total", "average", "biggest", "largest", "smallest", "breakdown",
    "how much", "how many", "top", "most",
    // Data browsing
    "transaction", "transactions", "category", "categories", "merchant",
    "merchants", "statement", "overview", "summary", "list", "recent",
];

const SMALL_TALK_PHRASES: &[&str] = &[
    "hi", "hello", "hey", "good morning", "good afternoon", "good evening",
    "thanks", "thank you", "cheers", "bye", "goodbye", "see you",
    "how are you", "nice",
];

const HELP_PHRASES: &[&str] = &[
    "help", "what can you do", "how does this work", "what do you do",
    "who are you",
];

const REPEAT_PHRASES: &[&str] = &[
    "repeat", "say that again", "come again", "what was that", "pardon",
    "one more time",
];

const CANCEL_CUES: &[&str] = &["never mind", "nevermind", "forget it", "forget that", "cancel", "stop"];
const REDIRECT_CUES: &[&str] = &["no wait", "hold on", "actually", "instead", "wait"];

/// Lowercase, punctuation folded to spaces (keeping `&` and `'`), padded
/// with spaces so phrases can be matched on word boundaries.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '&' || c == '\'' { c } else { ' ' })
        .collect();

    let words: Vec<&str> = folded.split_whitespace().collect();
    format!(" {} ", words.join(" "))
}

/// Whole-word phrase match against a `normalize`d haystack.
pub fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    normalized.contains(&format!(" {} ", phrase))
}

/// Utterance classifier
pub struct UtteranceClassifier;

impl UtteranceClassifier {
    /// Classify an utterance. `categories` are the labels present in the
    /// session's dataset so "what about groceries?" counts as analysis.
    pub fn classify(utterance: &str, categories: &[String]) -> Intent {
        let text = normalize(utterance);
        if text.trim().is_empty() {
            return Intent::Unclear;
        }

        let finance_score = FINANCE_KEYWORDS
            .iter()
            .filter(|kw| contains_phrase(&text, kw))
            .count()
            + categories
                .iter()
                .filter(|c| contains_phrase(&text, &c.to_lowercase()))
                .count();

        if finance_score > 0 {
            return Intent::Analysis;
        }

        let has_any = |phrases: &[&str]| phrases.iter().any(|p| contains_phrase(&text, p));

        if has_any(REPEAT_PHRASES) {
            Intent::Repeat
        } else if has_any(HELP_PHRASES) {
            Intent::Help
        } else if has_any(SMALL_TALK_PHRASES) {
            Intent::SmallTalk
        } else {
            Intent::OffTopic
        }
    }
}

/// An utterance that arrives while a turn is still being computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interruption {
    /// Abort the in-flight turn and acknowledge.
    Cancel,
    /// Abort the in-flight turn and answer this instead.
    Redirect(String),
}

/// Detect an explicit cancel or redirect cue at the start of an utterance.
/// Anything else is not an interruption and should queue.
pub fn detect_interruption(utterance: &str) -> Option<Interruption> {
    let trimmed = utterance.trim_start_matches(|c: char| !c.is_alphanumeric());

    // Cues are ASCII, so a matching head ends on a char boundary of `trimmed`
    let strip_cue = |cues: &[&str]| -> Option<String> {
        cues.iter().find_map(|cue| {
            let head = trimmed.get(..cue.len())?;
            if !head.eq_ignore_ascii_case(cue) {
                return None;
            }
            let rest = &trimmed[cue.len()..];
            let at_boundary = rest.chars().next().map_or(true, |c| !c.is_alphanumeric());
            if !at_boundary {
                return None;
            }
            Some(
                rest.trim_start_matches(|c: char| !c.is_alphanumeric())
                    .trim_end()
                    .to_string(),
            )
        })
    };

    let rest = strip_cue(CANCEL_CUES).or_else(|| strip_cue(REDIRECT_CUES))?;
    if rest.chars().any(|c| c.is_alphanumeric()) {
        Some(Interruption::Redirect(rest))
    } else {
        Some(Interruption::Cancel)
    }
}
