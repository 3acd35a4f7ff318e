//! Time expressions in spoken questions
//!
//! Recognizes month names (with or without a year), bare years, "this/last
//! month|year", "last N days|weeks|months" and "between X and Y".

use crate::calendar::Calendar;
use crate::error::AssistantError;
use crate::models::Period;
use crate::Result;

const MONTHS: &[(&str, u32)] = &[
    ("january", 1), ("jan", 1), ("february", 2), ("feb", 2), ("march", 3),
    ("april", 4), ("apr", 4), ("may", 5), ("june", 6), ("jun", 6),
    ("july", 7), ("jul", 7), ("august", 8), ("aug", 8), ("september", 9),
    ("sept", 9), ("sep", 9), ("october", 10), ("oct", 10), ("november", 11),
    ("nov", 11), ("december", 12), ("dec", 12),
];

const NUMBER_WORDS: &[(&str, u32)] = &[
    ("one", 1), ("two", 2), ("three", 3), ("four", 4), ("five", 5),
    ("six", 6), ("seven", 7), ("eight", 8), ("nine", 9), ("ten", 10),
    ("eleven", 11), ("twelve", 12), ("fourteen", 14), ("fifteen", 15),
    ("twenty", 20), ("thirty", 30), ("sixty", 60), ("ninety", 90),
];

/// Words in front of "may" that make it the month rather than the verb.
const MAY_LEADS: &[&str] = &["in", "of", "for", "during", "since", "between", "from", "to", "and", "through", "until"];

pub fn month_number(word: &str) -> Option<u32> {
    MONTHS.iter().find(|(name, _)| *name == word).map(|(_, m)| *m)
}

pub fn parse_count(word: &str) -> Option<u32> {
    word.parse::<u32>()
        .ok()
        .or_else(|| NUMBER_WORDS.iter().find(|(w, _)| *w == word).map(|(_, n)| *n))
}

fn parse_year(word: &str) -> Option<i32> {
    if word.len() != 4 {
        return None;
    }
    word.parse::<i32>().ok().filter(|y| (1900..=2100).contains(y))
}

/// Whether `words[idx]` is a time word, so term extraction stops there.
pub fn is_time_word(words: &[&str], idx: usize) -> bool {
    let Some(word) = words.get(idx) else {
        return false;
    };
    matches!(
        *word,
        "this" | "last" | "past" | "previous" | "today" | "month" | "year" | "week"
    ) || parse_year(word).is_some()
        || (month_number(word).is_some() && (*word != "may" || may_is_month(words, idx)))
}

fn may_is_month(words: &[&str], idx: usize) -> bool {
    let led = idx > 0 && MAY_LEADS.contains(&words[idx - 1]);
    let dated = words.get(idx + 1).and_then(|w| parse_year(w)).is_some();
    led || dated
}

/// Scan for every period mention, in order of appearance.
fn mentions(words: &[&str]) -> Vec<Period> {
    let mut found = Vec::new();
    let mut i = 0;

    while i < words.len() {
        let word = words[i];
        let next = words.get(i + 1).copied();

        match word {
            "this" => match next {
                Some("month") => {
                    found.push(Period::ThisMonth);
                    i += 1;
                }
                Some("year") => {
                    found.push(Period::ThisYear);
                    i += 1;
                }
                _ => {}
            },
            "last" | "past" | "previous" => match next {
                Some("month") => {
                    found.push(Period::LastMonth);
                    i += 1;
                }
                Some("year") => {
                    found.push(Period::LastYear);
                    i += 1;
                }
                Some("week") => {
                    found.push(Period::LastDays { days: 7 });
                    i += 1;
                }
                Some(n) => {
                    let unit = words.get(i + 2).copied();
                    let multiplier = match unit {
                        Some("day") | Some("days") => Some(1),
                        Some("week") | Some("weeks") => Some(7),
                        Some("month") | Some("months") => Some(30),
                        _ => None,
                    };
                    if let (Some(count), Some(multiplier)) = (parse_count(n), multiplier) {
                        found.push(Period::LastDays {
                            days: count.saturating_mul(multiplier),
                        });
                        i += 2;
                    }
                }
                None => {}
            },
            "today" => found.push(Period::LastDays { days: 1 }),
            _ if is_time_word(words, i) => {
                if let Some(month) = month_number(word) {
                    match next.and_then(parse_year) {
                        Some(year) => {
                            found.push(Period::Month { month, year: Some(year) });
                            i += 1;
                        }
                        None => found.push(Period::Month { month, year: None }),
                    }
                } else if let Some(year) = parse_year(word) {
                    found.push(Period::Year { year });
                }
            }
            _ => {}
        }
        i += 1;
    }

    let mut distinct: Vec<Period> = Vec::with_capacity(found.len());
    for period in found {
        if !distinct.contains(&period) {
            distinct.push(period);
        }
    }
    distinct
}

fn has_range_connector(words: &[&str]) -> bool {
    let has = |w: &str| words.contains(&w);
    (has("between") && has("and"))
        || (has("from") && (has("to") || has("through") || has("until") || has("till")))
}

/// Extract the single period a question refers to.
///
/// Two different periods are only accepted when joined by "between … and …"
/// or "from … to …"; otherwise the question is ambiguous.
pub fn extract_period(words: &[&str], calendar: &Calendar) -> Result<Option<Period>> {
    let periods = mentions(words);

    match periods.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(only.clone())),
        [first, second] if has_range_connector(words) => {
            let (Some(a), Some(b)) = (calendar.span(first), calendar.span(second)) else {
                return Err(AssistantError::AmbiguousQuery(
                    "I couldn't work out those dates. Which period did you mean?".to_string(),
                ));
            };
            Ok(Some(Period::Range {
                start: a.0.min(b.0),
                end: a.1.max(b.1),
            }))
        }
        many => {
            let labels: Vec<String> = many.iter().map(|p| calendar.label(p)).collect();
            Err(AssistantError::AmbiguousQuery(format!(
                "Did you mean {}? You can also ask for a range, like \"between {} and {}\".",
                join_alternatives(&labels),
                labels[0],
                labels[labels.len() - 1],
            )))
        }
    }
}

/// "a", "a or b", "a, b, or c"
pub fn join_alternatives(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{} or {}", a, b),
        [rest @ .., last] => format!("{}, or {}", rest.join(", "), last),
    }
}
