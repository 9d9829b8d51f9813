//! Role family and specialization classification
//!
//! Ordered regex rules over the lowercased title; the first matching
//! family wins and unmatched titles land in `other`. The ordering is
//! load-bearing: `engineering_management` precedes `software_engineering`
//! so "Engineering Manager" does not classify as an engineer, and
//! `customer_success`/`marketing` precede it so "Support Engineer" and
//! "Developer Advocate" do not either.

use regex::Regex;
use std::sync::OnceLock;

use crate::types::RoleFamily;

/// (family, patterns) in evaluation order.
const ROLE_RULES: &[(RoleFamily, &[&str])] = &[
    (
        RoleFamily::EngineeringManagement,
        &[
            r"engineering\s*manager",
            r"eng\s*manager",
            r"technical\s*lead",
            r"tech\s*lead",
            r"team\s*lead",
            r"director.*engineering",
            r"vp.*engineering",
            r"head\s*of\s*engineering",
            r"\bcto\b",
        ],
    ),
    (
        RoleFamily::Data,
        &[
            r"data\s*engineer",
            r"data\s*scientist",
            r"machine\s*learning",
            r"\bml\s*engineer",
            r"\bai\s*engineer",
            r"data\s*analyst",
            r"analytics\s*engineer",
            r"business\s*intelligence",
        ],
    ),
    (
        RoleFamily::Infrastructure,
        &[
            r"devops",
            r"\bsre\b",
            r"site\s*reliability",
            r"infrastructure",
            r"cloud\s*engineer",
            r"systems?\s*engineer",
            r"network\s*engineer",
            r"security\s*engineer",
            r"solutions?\s*architect",
        ],
    ),
    (
        RoleFamily::Design,
        &[
            r"product\s*designer",
            r"ux\s*designer",
            r"ui\s*designer",
            r"ux/ui",
            r"user\s*experience",
            r"user\s*interface",
            r"ux\s*researcher",
            r"design\s*lead",
        ],
    ),
    (
        RoleFamily::Product,
        &[
            r"product\s*manager",
            r"program\s*manager",
            r"technical\s*program",
            r"project\s*manager",
            r"scrum\s*master",
        ],
    ),
    (
        RoleFamily::Sales,
        &[
            r"sales\s*engineer",
            r"solutions?\s*engineer",
            r"account\s*executive",
            r"sales\s*representative",
            r"business\s*development",
            r"sales\s*manager",
        ],
    ),
    (
        RoleFamily::Marketing,
        &[
            r"marketing",
            r"\bgrowth\b",
            r"content\s*writer",
            r"copywriter",
            r"developer\s*advocate",
            r"developer\s*relations",
            r"devrel",
        ],
    ),
    (
        RoleFamily::CustomerSuccess,
        &[
            r"customer\s*success",
            r"customer\s*support",
            r"support\s*engineer",
            r"technical\s*support",
        ],
    ),
    (
        RoleFamily::SoftwareEngineering,
        &[
            r"software\s*engineer",
            r"developer",
            r"programmer",
            r"front-?end",
            r"back-?end",
            r"full-?stack",
            r"mobile\s*engineer",
            r"\bios\s*engineer",
            r"android\s*engineer",
            r"web\s*engineer",
            r"platform\s*engineer",
            r"qa\s*engineer",
            r"quality\s*engineer",
            r"test\s*engineer",
            r"\bsdet\b",
        ],
    ),
    (
        RoleFamily::Operations,
        &[r"operations", r"ops\s*manager", r"business\s*operations", r"chief\s*of\s*staff"],
    ),
    (
        RoleFamily::People,
        &[
            r"recruiter",
            r"talent",
            r"\bhr\b",
            r"human\s*resources",
            r"people\s*(ops|operations|partner)",
        ],
    ),
    (
        RoleFamily::Finance,
        &[r"finance", r"accountant", r"financial", r"controller", r"\bcfo\b"],
    ),
    (
        RoleFamily::Legal,
        &[r"legal", r"counsel", r"attorney", r"lawyer", r"compliance"],
    ),
];

const SPECIALIZATION_RULES: &[(&str, &[&str])] = &[
    ("frontend", &[r"front-?end", r"front\s+end", r"\breact\b", r"\bvue\b", r"angular", r"ui\s*engineer"]),
    ("backend", &[r"back-?end", r"back\s+end", r"server-?side", r"\bapi\b"]),
    ("fullstack", &[r"full-?stack", r"full\s+stack"]),
    ("ios", &[r"\bios\b", r"\bswift\b", r"objective-c"]),
    ("android", &[r"android", r"\bkotlin\b"]),
    ("mobile", &[r"mobile", r"react\s*native", r"flutter"]),
    ("devops", &[r"devops", r"dev\s*ops"]),
    ("sre", &[r"\bsre\b", r"site\s*reliability"]),
    ("ml", &[r"machine\s*learning", r"\bml\b", r"deep\s*learning"]),
    ("data", &[r"data\s*engineer", r"data\s*pipeline", r"\betl\b"]),
    ("security", &[r"security", r"infosec", r"appsec", r"cybersecurity"]),
    ("cloud", &[r"\baws\b", r"azure", r"\bgcp\b", r"\bcloud\b"]),
    ("platform", &[r"platform"]),
];

struct CompiledRules {
    families: Vec<(RoleFamily, Vec<Regex>)>,
    specializations: Vec<(&'static str, Vec<Regex>)>,
}

fn rules() -> &'static CompiledRules {
    static RULES: OnceLock<CompiledRules> = OnceLock::new();
    RULES.get_or_init(|| CompiledRules {
        families: ROLE_RULES
            .iter()
            .map(|(family, patterns)| {
                (
                    *family,
                    patterns.iter().map(|p| Regex::new(p).unwrap()).collect(),
                )
            })
            .collect(),
        specializations: SPECIALIZATION_RULES
            .iter()
            .map(|(name, patterns)| {
                (
                    *name,
                    patterns.iter().map(|p| Regex::new(p).unwrap()).collect(),
                )
            })
            .collect(),
    })
}

/// Classify a title into (role_family, role_specialization).
pub fn classify_title(title: &str) -> (RoleFamily, Option<String>) {
    let title = title.to_lowercase();
    let rules = rules();

    let family = rules
        .families
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(&title)))
        .map(|(family, _)| *family)
        .unwrap_or(RoleFamily::Other);

    let specialization = rules
        .specializations
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(&title)))
        .map(|(name, _)| name.to_string());

    (family, specialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engineering_manager_is_not_software_engineering() {
        let (family, _) = classify_title("Engineering Manager, Payments");
        assert_eq!(family, RoleFamily::EngineeringManagement);
    }

    #[test]
    fn support_engineer_is_customer_success() {
        let (family, _) = classify_title("Senior Support Engineer");
        assert_eq!(family, RoleFamily::CustomerSuccess);
    }

    #[test]
    fn developer_advocate_is_marketing() {
        let (family, _) = classify_title("Developer Advocate");
        assert_eq!(family, RoleFamily::Marketing);
    }

    #[test]
    fn common_engineering_titles() {
        assert_eq!(
            classify_title("Senior Software Engineer").0,
            RoleFamily::SoftwareEngineering
        );
        assert_eq!(classify_title("Backend Developer").0, RoleFamily::SoftwareEngineering);
        assert_eq!(classify_title("Staff Data Engineer").0, RoleFamily::Data);
        assert_eq!(classify_title("DevOps Engineer").0, RoleFamily::Infrastructure);
        assert_eq!(classify_title("Product Designer").0, RoleFamily::Design);
        assert_eq!(classify_title("Product Manager").0, RoleFamily::Product);
    }

    #[test]
    fn unmatched_title_is_other() {
        assert_eq!(classify_title("Barista").0, RoleFamily::Other);
    }

    #[test]
    fn specialization_detected() {
        let (_, spec) = classify_title("Senior Frontend Engineer (React)");
        assert_eq!(spec.as_deref(), Some("frontend"));
        let (_, spec) = classify_title("Site Reliability Engineer");
        assert_eq!(spec.as_deref(), Some("sre"));
        let (_, spec) = classify_title("Accountant");
        assert!(spec.is_none());
    }
}
