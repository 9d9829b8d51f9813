//! Salary extraction
//!
//! Regex extraction of currency figures with "k" suffix expansion and
//! range dashes. Emits (min, max) with min ≤ max; a single figure becomes
//! (v, v). Values are currency-agnostic integers.

use regex::Regex;
use std::sync::OnceLock;

/// Figures outside this window are not salaries (years, team sizes,
/// percentages, zip codes).
const MIN_PLAUSIBLE: i64 = 10_000;
const MAX_PLAUSIBLE: i64 = 2_000_000;

fn figure_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // optional currency sign, digits with separators, optional k suffix
    PATTERN.get_or_init(|| Regex::new(r"(?i)[$£€]?\s*(\d{1,3}(?:[,.]\d{3})*|\d+)\s*(k)?").unwrap())
}

/// Parse a raw salary string into (min, max).
pub fn parse_salary(raw: &str) -> (Option<i64>, Option<i64>) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (None, None);
    }

    // 401(k) mentions are retirement plans, not salaries
    let cleaned = raw.replace("401k", "").replace("401(k)", "");

    let mut figures: Vec<i64> = Vec::new();
    for capture in figure_pattern().captures_iter(&cleaned) {
        let digits: String = capture[1].chars().filter(|c| c.is_ascii_digit()).collect();
        let Ok(mut value) = digits.parse::<i64>() else {
            continue;
        };
        if capture.get(2).is_some() {
            value *= 1000;
        }
        if (MIN_PLAUSIBLE..=MAX_PLAUSIBLE).contains(&value) {
            figures.push(value);
        }
        if figures.len() == 2 {
            break;
        }
    }

    match figures.as_slice() {
        [] => (None, None),
        [single] => (Some(*single), Some(*single)),
        [a, b, ..] => (Some(*a.min(b)), Some(*a.max(b))),
    }
}
