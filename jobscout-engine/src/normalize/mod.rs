//! Normalizer: deterministic mapping of raw jobs to the canonical schema
//!
//! Pure and reproducible: the same raw record, vocabulary version and
//! reference time produce bit-identical canonical output. Failures here
//! are programming bugs (inputs are already-validated raw strings).

mod locations;
mod roles;
mod salary;
mod seniority;
mod skills;

pub use locations::normalize_location;
pub use roles::classify_title;
pub use salary::parse_salary;
pub use seniority::detect_seniority;
pub use skills::extract_skills;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::db::jobs::Job;
use crate::db::jobs_raw::RawJob;
use crate::types::EmploymentType;

/// Freshness half-life in days.
pub const FRESHNESS_HALF_LIFE_DAYS: f64 = 7.0;

/// Freshness assigned when the posted date is unknown.
pub const FRESHNESS_DEFAULT: f64 = 0.5;

/// Map a raw job to its canonical form.
///
/// `now` is passed in rather than read from the clock so the mapping is a
/// pure function.
pub fn normalize(raw: &RawJob, now: DateTime<Utc>) -> Job {
    let title = raw.title_raw.clone().unwrap_or_default();
    let description = raw
        .description_raw
        .clone()
        .filter(|d| !d.trim().is_empty());

    let (role_family, role_specialization) = classify_title(&title);
    let seniority = detect_seniority(&title, description.as_deref());
    let (location_type, locations) =
        normalize_location(raw.location_raw.as_deref().unwrap_or(""));
    let skills = extract_skills(&title, description.as_deref());
    let (min_salary, max_salary) = parse_salary(raw.salary_raw.as_deref().unwrap_or(""));
    let employment_type = normalize_employment_type(
        raw.employment_type_raw.as_deref(),
        &title,
    );
    let posted_at = raw.posted_at_raw.as_deref().and_then(parse_posted_at);
    let freshness_score = freshness(posted_at, now);

    Job {
        id: Uuid::new_v4(),
        company_id: raw.company_id,
        raw_job_id: Some(raw.id),
        title,
        description,
        source_url: raw.source_url.clone(),
        role_family,
        role_specialization,
        seniority,
        location_type,
        locations,
        skills,
        min_salary,
        max_salary,
        employment_type: Some(employment_type),
        posted_at,
        freshness_score: Some(freshness_score),
        embedding: None,
        is_active: true,
        last_verified_at: None,
        delisted_at: None,
        delist_reason: None,
        enrich_failed_at: None,
        created_at: None,
    }
}

/// Keyword mapping with a full_time default.
pub fn normalize_employment_type(raw: Option<&str>, title: &str) -> EmploymentType {
    let text = format!("{} {}", raw.unwrap_or(""), title).to_lowercase();

    if text.contains("intern") {
        EmploymentType::Internship
    } else if text.contains("freelance") {
        EmploymentType::Freelance
    } else if text.contains("contract") {
        EmploymentType::Contract
    } else if text.contains("part-time") || text.contains("part time") {
        EmploymentType::PartTime
    } else {
        EmploymentType::FullTime
    }
}

/// Exponential decay with a seven-day half-life; 0.5 when unknown.
pub fn freshness(posted_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match posted_at {
        Some(posted) => {
            let age_days = (now - posted).num_seconds().max(0) as f64 / 86_400.0;
            0.5f64.powf(age_days / FRESHNESS_HALF_LIFE_DAYS)
        }
        None => FRESHNESS_DEFAULT,
    }
}

/// Parse the formats ATS endpoints actually emit: RFC 3339, date-time
/// without zone, bare dates.
pub fn parse_posted_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    // Epoch milliseconds (Workday)
    if let Ok(millis) = raw.parse::<i64>() {
        if millis > 1_000_000_000_000 {
            return DateTime::from_timestamp_millis(millis);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn raw(title: &str) -> RawJob {
        let mut raw = RawJob::new(Uuid::new_v4(), "https://x/jobs/1".into());
        raw.title_raw = Some(title.to_string());
        raw
    }

    #[test]
    fn normalization_is_deterministic() {
        let now = Utc::now();
        let mut record = raw("Senior Backend Engineer");
        record.description_raw = Some("Rust and PostgreSQL. $150k-180k. Remote.".into());
        record.location_raw = Some("Remote - US".into());
        record.salary_raw = Some("$150k-180k".into());
        record.posted_at_raw = Some("2025-07-01".into());

        let a = normalize(&record, now);
        let b = normalize(&record, now);

        assert_eq!(a.title, b.title);
        assert_eq!(a.role_family, b.role_family);
        assert_eq!(a.seniority, b.seniority);
        assert_eq!(a.location_type, b.location_type);
        assert_eq!(a.locations, b.locations);
        assert_eq!(a.skills, b.skills);
        assert_eq!(a.min_salary, b.min_salary);
        assert_eq!(a.max_salary, b.max_salary);
        assert_eq!(a.posted_at, b.posted_at);
        assert_eq!(a.freshness_score, b.freshness_score);
    }

    #[test]
    fn salary_invariant_holds() {
        let now = Utc::now();
        let mut record = raw("Engineer");
        record.salary_raw = Some("180k - 150k".into());
        let job = normalize(&record, now);
        assert!(job.min_salary.unwrap() <= job.max_salary.unwrap());
    }

    #[test]
    fn freshness_follows_half_life() {
        let now = Utc::now();
        let week_old = freshness(Some(now - Duration::days(7)), now);
        assert!((week_old - 0.5).abs() < 1e-6);

        let two_weeks = freshness(Some(now - Duration::days(14)), now);
        assert!((two_weeks - 0.25).abs() < 1e-6);

        assert_eq!(freshness(None, now), 0.5);

        // Future-dated postings clamp to full freshness
        let future = freshness(Some(now + Duration::days(3)), now);
        assert!((future - 1.0).abs() < 1e-9);
    }

    #[test]
    fn employment_type_defaults_to_full_time() {
        assert_eq!(
            normalize_employment_type(None, "Software Engineer"),
            EmploymentType::FullTime
        );
        assert_eq!(
            normalize_employment_type(Some("Contract"), "Engineer"),
            EmploymentType::Contract
        );
        assert_eq!(
            normalize_employment_type(None, "Marketing Intern"),
            EmploymentType::Internship
        );
        assert_eq!(
            normalize_employment_type(Some("Part-time"), "Designer"),
            EmploymentType::PartTime
        );
    }

    #[test]
    fn posted_at_formats() {
        assert!(parse_posted_at("2025-07-01T12:00:00Z").is_some());
        assert!(parse_posted_at("2025-07-01T12:00:00+02:00").is_some());
        assert!(parse_posted_at("2025-07-01 12:00:00").is_some());
        assert!(parse_posted_at("2025-07-01").is_some());
        assert!(parse_posted_at("1720000000000").is_some());
        assert!(parse_posted_at("last Tuesday").is_none());
        assert!(parse_posted_at("").is_none());
    }

    #[test]
    fn full_record_maps_every_dimension() {
        let now = Utc::now();
        let mut record = raw("Senior Frontend Engineer");
        record.description_raw =
            Some("You know React and TypeScript. Salary $140,000 - $170,000.".into());
        record.location_raw = Some("New York, NY (hybrid)".into());
        record.employment_type_raw = Some("Full-time".into());
        record.salary_raw = Some("$140,000 - $170,000".into());

        let job = normalize(&record, now);
        assert_eq!(job.role_family, crate::types::RoleFamily::SoftwareEngineering);
        assert_eq!(job.role_specialization.as_deref(), Some("frontend"));
        assert_eq!(job.seniority, Some(crate::types::Seniority::Senior));
        assert_eq!(job.location_type, Some(crate::types::LocationType::Hybrid));
        assert_eq!(job.locations, vec!["New York, NY".to_string()]);
        assert!(job.skills.contains(&"react".to_string()));
        assert!(job.skills.contains(&"typescript".to_string()));
        assert_eq!(job.min_salary, Some(140_000));
        assert_eq!(job.max_salary, Some(170_000));
        assert_eq!(job.employment_type, Some(EmploymentType::FullTime));
    }
}
