//! Location type detection and location normalization
//!
//! Tokens split on common separators run through a curated gazetteer;
//! anything that does not normalize is discarded.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::LocationType;

const REMOTE_PATTERNS: &[&str] = &[
    r"\bremote\b",
    r"\banywhere\b",
    r"\bwork\s*from\s*home\b",
    r"\bwfh\b",
    r"\bdistributed\b",
];

const HYBRID_PATTERNS: &[&str] = &[
    r"\bhybrid\b",
    r"\b\d+\s*days?\s*(in\s*)?office\b",
    r"\bremote.*office\b",
    r"\boffice.*remote\b",
];

const ONSITE_PATTERNS: &[&str] = &[
    r"\bon-?site\b",
    r"\bin-?office\b",
    r"\bin\s*person\b",
    r"\boffice\s*based\b",
    r"\bno\s*remote\b",
];

/// Curated gazetteer: recognized token → canonical location string.
const GAZETTEER: &[(&str, &str)] = &[
    ("san francisco", "San Francisco, CA"),
    ("sf", "San Francisco, CA"),
    ("bay area", "San Francisco Bay Area, CA"),
    ("new york", "New York, NY"),
    ("nyc", "New York, NY"),
    ("los angeles", "Los Angeles, CA"),
    ("seattle", "Seattle, WA"),
    ("austin", "Austin, TX"),
    ("boston", "Boston, MA"),
    ("chicago", "Chicago, IL"),
    ("denver", "Denver, CO"),
    ("miami", "Miami, FL"),
    ("atlanta", "Atlanta, GA"),
    ("washington", "Washington, DC"),
    ("london", "London, UK"),
    ("berlin", "Berlin, Germany"),
    ("munich", "Munich, Germany"),
    ("paris", "Paris, France"),
    ("amsterdam", "Amsterdam, Netherlands"),
    ("dublin", "Dublin, Ireland"),
    ("zurich", "Zurich, Switzerland"),
    ("stockholm", "Stockholm, Sweden"),
    ("toronto", "Toronto, Canada"),
    ("vancouver", "Vancouver, Canada"),
    ("sydney", "Sydney, Australia"),
    ("melbourne", "Melbourne, Australia"),
    ("singapore", "Singapore"),
    ("tokyo", "Tokyo, Japan"),
    ("bangalore", "Bangalore, India"),
    ("bengaluru", "Bangalore, India"),
    ("tel aviv", "Tel Aviv, Israel"),
    ("united states", "US"),
    ("usa", "US"),
    ("us", "US"),
    ("united kingdom", "UK"),
    ("uk", "UK"),
    ("germany", "Germany"),
    ("france", "France"),
    ("canada", "Canada"),
    ("australia", "Australia"),
    ("india", "India"),
    ("netherlands", "Netherlands"),
    ("ireland", "Ireland"),
    ("europe", "EU"),
    ("emea", "EU"),
];

struct Compiled {
    remote: Vec<Regex>,
    hybrid: Vec<Regex>,
    onsite: Vec<Regex>,
}

fn compiled() -> &'static Compiled {
    static COMPILED: OnceLock<Compiled> = OnceLock::new();
    COMPILED.get_or_init(|| {
        let build = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
                .collect()
        };
        Compiled {
            remote: build(REMOTE_PATTERNS),
            hybrid: build(HYBRID_PATTERNS),
            onsite: build(ONSITE_PATTERNS),
        }
    })
}

/// Normalize a raw location string into (location_type, locations).
pub fn normalize_location(raw: &str) -> (Option<LocationType>, Vec<String>) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (None, Vec::new());
    }

    (detect_type(raw), extract_locations(raw))
}

fn detect_type(text: &str) -> Option<LocationType> {
    let compiled = compiled();

    // Hybrid wording often contains "remote", so hybrid is checked inside
    // the remote branch before concluding remote.
    if compiled.remote.iter().any(|p| p.is_match(text)) {
        if compiled.hybrid.iter().any(|p| p.is_match(text)) {
            return Some(LocationType::Hybrid);
        }
        return Some(LocationType::Remote);
    }
    if compiled.hybrid.iter().any(|p| p.is_match(text)) {
        return Some(LocationType::Hybrid);
    }
    if compiled.onsite.iter().any(|p| p.is_match(text)) {
        return Some(LocationType::Onsite);
    }
    // A bare recognized place reads as an office location
    if !extract_locations(text).is_empty() {
        return Some(LocationType::Onsite);
    }

    None
}

fn extract_locations(text: &str) -> Vec<String> {
    let mut found = Vec::new();

    for token in text.split(&[',', ';', '/', '|', '&'][..]) {
        let token = token.trim().to_lowercase();
        if token.is_empty() {
            continue;
        }
        // Exact token match first, then containment for multi-word names
        let hit = GAZETTEER
            .iter()
            .find(|(key, _)| token == *key)
            .or_else(|| {
                GAZETTEER
                    .iter()
                    .filter(|(key, _)| key.len() > 3)
                    .find(|(key, _)| token.contains(key))
            });
        if let Some((_, canonical)) = hit {
            if !found.contains(&canonical.to_string()) {
                found.push(canonical.to_string());
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_keywords() {
        assert_eq!(normalize_location("Remote").0, Some(LocationType::Remote));
        assert_eq!(
            normalize_location("Work from home, anywhere").0,
            Some(LocationType::Remote)
        );
    }

    #[test]
    fn hybrid_beats_remote_wording() {
        assert_eq!(
            normalize_location("Hybrid remote - 2 days in office").0,
            Some(LocationType::Hybrid)
        );
    }

    #[test]
    fn bare_city_is_onsite() {
        let (kind, places) = normalize_location("San Francisco, CA");
        assert_eq!(kind, Some(LocationType::Onsite));
        assert_eq!(places, vec!["San Francisco, CA".to_string()]);
    }

    #[test]
    fn unknown_tokens_are_discarded() {
        let (kind, places) = normalize_location("Springfield; London");
        assert_eq!(places, vec!["London, UK".to_string()]);
        assert_eq!(kind, Some(LocationType::Onsite));
    }

    #[test]
    fn unrecognized_input_yields_nothing() {
        let (kind, places) = normalize_location("TBD");
        assert_eq!(kind, None);
        assert!(places.is_empty());
    }

    #[test]
    fn multiple_locations_dedupe() {
        let (_, places) = normalize_location("NYC / New York / Berlin");
        assert_eq!(
            places,
            vec!["New York, NY".to_string(), "Berlin, Germany".to_string()]
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(normalize_location(""), (None, Vec::new()));
    }
}
