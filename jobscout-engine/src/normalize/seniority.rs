//! Seniority detection
//!
//! Explicit level words only, scanning the title first and then the
//! description. No explicit level means no seniority.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::Seniority;

/// (level, patterns) checked in order, most senior first so that
/// "Senior Staff Engineer" resolves to staff, not senior.
const SENIORITY_RULES: &[(Seniority, &[&str])] = &[
    (
        Seniority::CLevel,
        &[r"\bceo\b", r"\bcto\b", r"\bcfo\b", r"\bcoo\b", r"\bchief\b", r"\bfounder\b"],
    ),
    (Seniority::Vp, &[r"\bvp\b", r"\bvice\s*president\b", r"\bsvp\b", r"\bevp\b"]),
    (Seniority::Director, &[r"\bdirector\b", r"\bhead\s+of\b"]),
    (Seniority::Principal, &[r"\bprincipal\b", r"\bdistinguished\b", r"\bfellow\b"]),
    (Seniority::Staff, &[r"\bstaff\b"]),
    (Seniority::Senior, &[r"\bsenior\b", r"\bsr\.?\b", r"\blead\b"]),
    (Seniority::Mid, &[r"\bmid-?level\b", r"\bintermediate\b"]),
    (
        Seniority::Junior,
        &[r"\bjunior\b", r"\bjr\.?\b", r"\bentry[\s-]*level\b", r"\bnew\s*grad\b", r"\bgraduate\b"],
    ),
    (Seniority::Intern, &[r"\bintern\b", r"\binternship\b", r"\bco-?op\b"]),
];

fn rules() -> &'static Vec<(Seniority, Vec<Regex>)> {
    static RULES: OnceLock<Vec<(Seniority, Vec<Regex>)>> = OnceLock::new();
    RULES.get_or_init(|| {
        SENIORITY_RULES
            .iter()
            .map(|(level, patterns)| {
                (
                    *level,
                    patterns.iter().map(|p| Regex::new(p).unwrap()).collect(),
                )
            })
            .collect()
    })
}

fn detect_in(text: &str) -> Option<Seniority> {
    let text = text.to_lowercase();
    rules()
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(&text)))
        .map(|(level, _)| *level)
}

/// Detect seniority from title, then description.
pub fn detect_seniority(title: &str, description: Option<&str>) -> Option<Seniority> {
    detect_in(title).or_else(|| description.and_then(detect_in))
}
