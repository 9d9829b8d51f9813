//! Matcher: candidates × catalog under hard constraints and weighted
//! soft scoring
//!
//! Candidate set generation is one similarity query against the storage
//! layer (top-K cosine ≥ 0.5 over active jobs); hard filters run
//! post-retrieval; the soft score is a weighted sum clamped to [0, 1]
//! with a structured reason per contributing dimension.

use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::candidates::{self, CandidateProfile};
use crate::db::companies;
use crate::db::jobs::{self, Job};
use crate::db::matches;
use crate::types::{EmploymentType, RoleFamily, Seniority};

/// Default retrieval depth.
pub const DEFAULT_TOP_K: usize = 200;

/// Retrieval floor on cosine similarity.
pub const MIN_SIMILARITY: f32 = 0.5;

/// Default floor on the final weighted score.
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.4;

const WEIGHT_SEMANTIC: f64 = 0.40;
const WEIGHT_ROLE_FAMILY: f64 = 0.15;
const WEIGHT_SENIORITY: f64 = 0.15;
const WEIGHT_SKILLS: f64 = 0.15;
const WEIGHT_FRESHNESS: f64 = 0.10;
const WEIGHT_SALARY: f64 = 0.05;

/// Role families that read as neighbors for scoring purposes.
const ADJACENT_FAMILIES: &[(RoleFamily, RoleFamily)] = &[
    (RoleFamily::SoftwareEngineering, RoleFamily::Infrastructure),
    (RoleFamily::SoftwareEngineering, RoleFamily::Data),
    (RoleFamily::Infrastructure, RoleFamily::Data),
    (RoleFamily::SoftwareEngineering, RoleFamily::EngineeringManagement),
    (RoleFamily::Product, RoleFamily::Design),
    (RoleFamily::Sales, RoleFamily::CustomerSuccess),
    (RoleFamily::Sales, RoleFamily::Marketing),
];

fn families_adjacent(a: RoleFamily, b: RoleFamily) -> bool {
    ADJACENT_FAMILIES
        .iter()
        .any(|(x, y)| (*x == a && *y == b) || (*x == b && *y == a))
}

/// Why a match run produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchesReason {
    EmptyCatalog,
    NoVectorCandidates,
    AllFilteredHard,
    AllFilteredScore,
}

impl NoMatchesReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoMatchesReason::EmptyCatalog => "empty_catalog",
            NoMatchesReason::NoVectorCandidates => "no_vector_candidates",
            NoMatchesReason::AllFilteredHard => "all_filtered_hard",
            NoMatchesReason::AllFilteredScore => "all_filtered_score",
        }
    }
}

/// One scored candidate–job pair.
#[derive(Debug)]
pub struct ScoredMatch {
    pub job: Job,
    pub score: f64,
    pub hard_match: bool,
    pub reasons: Value,
}

/// Result of matching one candidate.
#[derive(Debug)]
pub struct MatchOutcome {
    pub matches: Vec<ScoredMatch>,
    pub no_matches_reason: Option<NoMatchesReason>,
    /// Supporting counts for the explanation.
    pub retrieved: usize,
    pub after_hard_filters: usize,
    pub after_score_filter: usize,
}

impl MatchOutcome {
    fn empty(reason: NoMatchesReason) -> Self {
        Self {
            matches: Vec::new(),
            no_matches_reason: Some(reason),
            retrieved: 0,
            after_hard_filters: 0,
            after_score_filter: 0,
        }
    }
}

/// Matching knobs.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    pub top_k: usize,
    pub score_threshold: f64,
    /// Keep hard-filter failures in the result set with hard_match=false.
    pub soft_inclusive: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            soft_inclusive: false,
        }
    }
}

/// Candidate role_type preferences map onto employment types.
fn role_type_to_employment(role_type: &str) -> Option<EmploymentType> {
    match role_type.to_lowercase().as_str() {
        "permanent" | "full_time" => Some(EmploymentType::FullTime),
        "contract" => Some(EmploymentType::Contract),
        "freelance" => Some(EmploymentType::Freelance),
        _ => None,
    }
}

/// Check every hard constraint; the first failure names the dimension.
pub fn hard_filter(
    candidate: &CandidateProfile,
    job: &Job,
    company_name: Option<&str>,
) -> Result<(), &'static str> {
    if !job.is_active {
        return Err("inactive");
    }

    if !candidate.role_families.is_empty() && !candidate.role_families.contains(&job.role_family) {
        return Err("role_family");
    }

    if let (Some(want), Some(have)) = (candidate.seniority, job.seniority) {
        if (want.rank() - have.rank()).abs() > 1 {
            return Err("seniority");
        }
    }

    if !candidate.location_types.is_empty() {
        if let Some(location_type) = job.location_type {
            if !candidate.location_types.contains(&location_type) {
                return Err("location_type");
            }
        }
    }

    if let (Some(min_wanted), Some(job_max)) = (candidate.min_salary, job.max_salary) {
        if job_max < min_wanted {
            return Err("salary");
        }
    }

    if !candidate.role_types.is_empty() {
        if let Some(employment) = job.employment_type {
            let accepted: Vec<EmploymentType> = candidate
                .role_types
                .iter()
                .filter_map(|rt| role_type_to_employment(rt))
                .collect();
            if !accepted.is_empty() && !accepted.contains(&employment) {
                return Err("employment_type");
            }
        }
    }

    if let Some(company_name) = company_name {
        let company_lower = company_name.to_lowercase();
        if candidate
            .exclusions
            .iter()
            .any(|excluded| excluded.to_lowercase() == company_lower)
        {
            return Err("excluded_company");
        }
    }

    Ok(())
}

fn seniority_signal(want: Option<Seniority>, have: Option<Seniority>) -> f64 {
    match (want, have) {
        (Some(want), Some(have)) => match (want.rank() - have.rank()).abs() {
            0 => 1.0,
            1 => 0.5,
            _ => 0.0,
        },
        _ => 0.5,
    }
}

fn role_family_signal(candidate: &CandidateProfile, job: &Job) -> f64 {
    // No preference: neutral
    let Some(primary) = candidate.role_families.first() else {
        return 0.5;
    };
    if job.role_family == *primary {
        return 1.0;
    }
    if candidate.role_families.contains(&job.role_family)
        || families_adjacent(*primary, job.role_family)
    {
        return 0.5;
    }
    0.0
}

fn skills_signal(candidate: &CandidateProfile, job: &Job) -> (f64, usize) {
    if job.skills.is_empty() {
        return (0.0, 0);
    }
    let candidate_skills: Vec<String> =
        candidate.skills.iter().map(|s| s.to_lowercase()).collect();
    let overlap = job
        .skills
        .iter()
        .filter(|skill| candidate_skills.contains(&skill.to_lowercase()))
        .count();
    (overlap as f64 / job.skills.len().max(1) as f64, overlap)
}

fn salary_signal(candidate: &CandidateProfile, job: &Job) -> f64 {
    match (candidate.min_salary, job.max_salary) {
        (Some(wanted), Some(job_max)) => {
            if job_max >= wanted {
                1.0
            } else {
                0.0
            }
        }
        // Either side unknown: neutral
        _ => 0.5,
    }
}

/// Score one candidate–job pair. Returns (score, reasons).
pub fn score_job(candidate: &CandidateProfile, job: &Job, similarity: f32) -> (f64, Value) {
    let semantic = f64::from(similarity).clamp(0.0, 1.0);
    let role = role_family_signal(candidate, job);
    let seniority = seniority_signal(candidate.seniority, job.seniority);
    let (skills, overlap_count) = skills_signal(candidate, job);
    let freshness = job.freshness_score.unwrap_or(0.5);
    let salary = salary_signal(candidate, job);

    let score = (WEIGHT_SEMANTIC * semantic
        + WEIGHT_ROLE_FAMILY * role
        + WEIGHT_SENIORITY * seniority
        + WEIGHT_SKILLS * skills
        + WEIGHT_FRESHNESS * freshness
        + WEIGHT_SALARY * salary)
        .clamp(0.0, 1.0);

    // Reasons carry only dimensions that contributed
    let mut reasons = serde_json::Map::new();
    if semantic > 0.0 {
        reasons.insert(
            "semantic".into(),
            json!({
                "signal": semantic,
                "text": "Your profile is a close semantic fit for this role"
            }),
        );
    }
    if role > 0.0 {
        let text = if role >= 1.0 {
            format!("Matches your {} preference", job.role_family)
        } else {
            format!("Close to your preferred role family ({})", job.role_family)
        };
        reasons.insert("role_family".into(), json!({"signal": role, "text": text}));
    }
    if seniority > 0.0 {
        if let Some(level) = job.seniority {
            reasons.insert(
                "seniority".into(),
                json!({
                    "signal": seniority,
                    "text": format!("{} level aligns with your experience", level)
                }),
            );
        }
    }
    if skills > 0.0 {
        reasons.insert(
            "skills".into(),
            json!({
                "signal": skills,
                "text": format!("Matches {overlap_count} of your skills")
            }),
        );
    }
    if freshness > 0.0 {
        reasons.insert(
            "freshness".into(),
            json!({
                "signal": freshness,
                "text": if freshness > 0.7 { "Posted recently" } else { "Still open" }
            }),
        );
    }
    if salary > 0.0 && candidate.min_salary.is_some() {
        reasons.insert(
            "salary".into(),
            json!({"signal": salary, "text": "Meets your salary requirement"}),
        );
    }

    (score, Value::Object(reasons))
}

/// Match one candidate against the catalog.
pub async fn match_candidate(
    pool: &SqlitePool,
    candidate: &CandidateProfile,
    options: &MatchOptions,
) -> anyhow::Result<MatchOutcome> {
    if jobs::count_active(pool).await? == 0 {
        return Ok(MatchOutcome::empty(NoMatchesReason::EmptyCatalog));
    }

    let Some(embedding) = &candidate.embedding else {
        return Ok(MatchOutcome::empty(NoMatchesReason::NoVectorCandidates));
    };

    let retrieval = jobs::vector_search(pool, embedding, options.top_k, MIN_SIMILARITY).await?;
    if retrieval.hits.is_empty() {
        return Ok(MatchOutcome::empty(NoMatchesReason::NoVectorCandidates));
    }

    let retrieved = retrieval.hits.len();
    let mut company_names: HashMap<Uuid, String> = HashMap::new();
    let mut scored: Vec<ScoredMatch> = Vec::new();
    let mut passed_hard = 0usize;

    for (job_id, similarity) in retrieval.hits {
        let Some(job) = jobs::load_job(pool, job_id).await? else {
            continue;
        };

        let company_name = match company_names.get(&job.company_id) {
            Some(name) => Some(name.clone()),
            None => {
                let name = companies::load_company(pool, job.company_id)
                    .await?
                    .map(|c| c.name);
                if let Some(name) = &name {
                    company_names.insert(job.company_id, name.clone());
                }
                name
            }
        };

        let hard_match = hard_filter(candidate, &job, company_name.as_deref()).is_ok();
        if hard_match {
            passed_hard += 1;
        } else if !options.soft_inclusive {
            continue;
        }

        let (score, reasons) = score_job(candidate, &job, similarity);
        scored.push(ScoredMatch {
            job,
            score,
            hard_match,
            reasons,
        });
    }

    if scored.is_empty() {
        return Ok(MatchOutcome {
            retrieved,
            ..MatchOutcome::empty(NoMatchesReason::AllFilteredHard)
        });
    }

    let before_score = scored.len();
    scored.retain(|m| m.score >= options.score_threshold);
    if scored.is_empty() {
        return Ok(MatchOutcome {
            retrieved,
            after_hard_filters: before_score,
            ..MatchOutcome::empty(NoMatchesReason::AllFilteredScore)
        });
    }

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let after_score = scored.len();
    Ok(MatchOutcome {
        matches: scored,
        no_matches_reason: None,
        retrieved,
        after_hard_filters: passed_hard,
        after_score_filter: after_score,
    })
}

/// Match and persist for one candidate; returns the outcome.
pub async fn run_matching_for_candidate(
    pool: &SqlitePool,
    candidate_id: Uuid,
    options: &MatchOptions,
) -> anyhow::Result<MatchOutcome> {
    let candidate = candidates::load_profile(pool, candidate_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("candidate not found: {candidate_id}"))?;

    let outcome = match_candidate(pool, &candidate, options).await?;

    for scored in &outcome.matches {
        matches::upsert_match(
            pool,
            candidate.id,
            scored.job.id,
            scored.score,
            scored.hard_match,
            &scored.reasons,
        )
        .await?;
    }
    candidates::touch_matched(pool, candidate.id).await?;

    tracing::info!(
        candidate = %candidate.email,
        retrieved = outcome.retrieved,
        matched = outcome.matches.len(),
        reason = outcome.no_matches_reason.map(|r| r.as_str()).unwrap_or("-"),
        "Matching complete"
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocationType;

    fn job(role: RoleFamily, seniority: Option<Seniority>) -> Job {
        Job {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            raw_job_id: None,
            title: "Job".into(),
            description: None,
            source_url: "https://x/1".into(),
            role_family: role,
            role_specialization: None,
            seniority,
            location_type: Some(LocationType::Remote),
            locations: vec![],
            skills: vec!["rust".into(), "sql".into()],
            min_salary: Some(100_000),
            max_salary: Some(150_000),
            employment_type: Some(EmploymentType::FullTime),
            posted_at: None,
            freshness_score: Some(1.0),
            embedding: None,
            is_active: true,
            last_verified_at: None,
            delisted_at: None,
            delist_reason: None,
            enrich_failed_at: None,
            created_at: None,
        }
    }

    fn candidate() -> CandidateProfile {
        let mut profile = CandidateProfile::new("dev@example.test".into());
        profile.role_families = vec![RoleFamily::SoftwareEngineering];
        profile.seniority = Some(Seniority::Senior);
        profile.location_types = vec![LocationType::Remote];
        profile.skills = vec!["rust".into()];
        profile.min_salary = Some(120_000);
        profile
    }

    #[test]
    fn hard_filter_passes_compatible_job() {
        let job = job(RoleFamily::SoftwareEngineering, Some(Seniority::Senior));
        assert!(hard_filter(&candidate(), &job, Some("Acme")).is_ok());
    }

    #[test]
    fn seniority_tolerance_is_one_step() {
        let candidate = candidate();
        let staff = job(RoleFamily::SoftwareEngineering, Some(Seniority::Staff));
        assert!(hard_filter(&candidate, &staff, None).is_ok());

        let junior = job(RoleFamily::SoftwareEngineering, Some(Seniority::Junior));
        assert_eq!(hard_filter(&candidate, &junior, None), Err("seniority"));
    }

    #[test]
    fn role_family_filter_applies_when_set() {
        let sales = job(RoleFamily::Sales, Some(Seniority::Senior));
        assert_eq!(hard_filter(&candidate(), &sales, None), Err("role_family"));

        let mut no_prefs = candidate();
        no_prefs.role_families = vec![];
        assert!(hard_filter(&no_prefs, &sales, None).is_ok());
    }

    #[test]
    fn salary_floor_applies() {
        let mut candidate = candidate();
        candidate.min_salary = Some(200_000);
        let job = job(RoleFamily::SoftwareEngineering, Some(Seniority::Senior));
        assert_eq!(hard_filter(&candidate, &job, None), Err("salary"));
    }

    #[test]
    fn exclusions_match_company_name() {
        let mut candidate = candidate();
        candidate.exclusions = vec!["Initech".into()];
        let job = job(RoleFamily::SoftwareEngineering, Some(Seniority::Senior));
        assert_eq!(
            hard_filter(&candidate, &job, Some("initech")),
            Err("excluded_company")
        );
        assert!(hard_filter(&candidate, &job, Some("Acme")).is_ok());
    }

    #[test]
    fn role_type_mapping() {
        let mut candidate = candidate();
        candidate.role_types = vec!["permanent".into()];
        let job = job(RoleFamily::SoftwareEngineering, Some(Seniority::Senior));
        assert!(hard_filter(&candidate, &job, None).is_ok());

        candidate.role_types = vec!["contract".into()];
        assert_eq!(hard_filter(&candidate, &job, None), Err("employment_type"));
    }

    #[test]
    fn score_is_bounded_and_weighted() {
        let candidate = candidate();
        let job = job(RoleFamily::SoftwareEngineering, Some(Seniority::Senior));
        let (score, reasons) = score_job(&candidate, &job, 0.9);

        assert!((0.0..=1.0).contains(&score));
        // perfect role (0.15) + perfect seniority (0.15) + half skills
        // (0.075) + freshness (0.10) + salary (0.05) + semantic 0.36
        assert!((score - 0.885).abs() < 1e-9);

        let reasons = reasons.as_object().unwrap();
        assert!(reasons.contains_key("semantic"));
        assert!(reasons.contains_key("role_family"));
        assert!(reasons.contains_key("skills"));
    }

    #[test]
    fn empty_role_preference_scores_neutral() {
        let mut candidate = candidate();
        candidate.role_families = vec![];
        let job = job(RoleFamily::Legal, Some(Seniority::Senior));
        let (_, reasons) = score_job(&candidate, &job, 0.6);
        let signal = reasons["role_family"]["signal"].as_f64().unwrap();
        assert!((signal - 0.5).abs() < 1e-9);
    }

    #[test]
    fn zero_contribution_dimensions_are_omitted() {
        let mut candidate = candidate();
        candidate.skills = vec![];
        let mut job = job(RoleFamily::Legal, None);
        job.skills = vec!["contracts".into()];
        let (_, reasons) = score_job(&candidate, &job, 0.6);
        let reasons = reasons.as_object().unwrap();
        // Legal is neither the primary family, listed, nor adjacent
        assert!(!reasons.contains_key("role_family"));
        // No overlap at all
        assert!(!reasons.contains_key("skills"));
        // Job carries no seniority
        assert!(!reasons.contains_key("seniority"));
    }
}
