//! Candidate profile persistence
//!
//! Profiles are created from waitlist records and updated through the
//! candidate API. Email is the natural key.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use super::{decode_embedding, list_from_db, list_to_db, ts_from_db, ts_to_db};
use crate::types::{LocationType, RoleFamily, Seniority};

/// Candidate profile record.
#[derive(Debug, Clone, Default)]
pub struct CandidateProfile {
    pub id: Uuid,
    pub waitlist_id: Option<Uuid>,
    pub email: String,
    pub name: Option<String>,
    pub role_families: Vec<RoleFamily>,
    pub seniority: Option<Seniority>,
    pub min_salary: Option<i64>,
    pub locations: Vec<String>,
    pub location_types: Vec<LocationType>,
    pub role_types: Vec<String>,
    pub skills: Vec<String>,
    pub exclusions: Vec<String>,
    pub profile_text: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub last_matched_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CandidateProfile {
    pub fn new(email: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            is_active: true,
            ..Default::default()
        }
    }
}

const SELECT_COLUMNS: &str = "id, waitlist_id, email, name, role_families, seniority, \
    min_salary, locations, location_types, role_types, skills, exclusions, profile_text, \
    embedding, last_matched_at, last_notified_at, is_active, created_at, updated_at";

fn from_row(row: &SqliteRow) -> Result<CandidateProfile> {
    let id: String = row.get("id");
    let waitlist_id: Option<String> = row.get("waitlist_id");
    let seniority: Option<String> = row.get("seniority");
    let embedding: Option<Vec<u8>> = row.get("embedding");

    Ok(CandidateProfile {
        id: Uuid::parse_str(&id)?,
        waitlist_id: waitlist_id.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
        email: row.get("email"),
        name: row.get("name"),
        role_families: list_from_db(row.get("role_families"))
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect(),
        seniority: seniority.as_deref().and_then(|s| s.parse().ok()),
        min_salary: row.get("min_salary"),
        locations: list_from_db(row.get("locations")),
        location_types: list_from_db(row.get("location_types"))
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect(),
        role_types: list_from_db(row.get("role_types")),
        skills: list_from_db(row.get("skills")),
        exclusions: list_from_db(row.get("exclusions")),
        profile_text: row.get("profile_text"),
        embedding: embedding.as_deref().map(decode_embedding),
        last_matched_at: ts_from_db(row.get("last_matched_at")),
        last_notified_at: ts_from_db(row.get("last_notified_at")),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: ts_from_db(row.get("created_at")),
        updated_at: ts_from_db(row.get("updated_at")),
    })
}

fn families_to_db(families: &[RoleFamily]) -> Option<String> {
    list_to_db(
        &families
            .iter()
            .map(|f| f.as_str().to_string())
            .collect::<Vec<_>>(),
    )
}

fn location_types_to_db(types: &[LocationType]) -> Option<String> {
    list_to_db(
        &types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect::<Vec<_>>(),
    )
}

/// Upsert a profile keyed by email (waitlist sync path). Preserves the
/// existing id and embedding; preference fields take the newer values.
pub async fn upsert_profile(pool: &SqlitePool, profile: &CandidateProfile) -> Result<Uuid> {
    sqlx::query(
        r#"
        INSERT INTO candidate_profiles (
            id, waitlist_id, email, name, role_families, seniority, min_salary,
            locations, location_types, role_types, skills, exclusions, profile_text,
            is_active, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
        ON CONFLICT(email) DO UPDATE SET
            waitlist_id = COALESCE(excluded.waitlist_id, candidate_profiles.waitlist_id),
            name = COALESCE(excluded.name, candidate_profiles.name),
            role_families = excluded.role_families,
            seniority = excluded.seniority,
            min_salary = excluded.min_salary,
            locations = excluded.locations,
            location_types = excluded.location_types,
            role_types = excluded.role_types,
            skills = excluded.skills,
            exclusions = excluded.exclusions,
            profile_text = COALESCE(excluded.profile_text, candidate_profiles.profile_text),
            embedding = CASE
                WHEN COALESCE(excluded.profile_text, '') != COALESCE(candidate_profiles.profile_text, '')
                  OR COALESCE(excluded.role_families, '') != COALESCE(candidate_profiles.role_families, '')
                  OR COALESCE(excluded.seniority, '') != COALESCE(candidate_profiles.seniority, '')
                  OR COALESCE(excluded.skills, '') != COALESCE(candidate_profiles.skills, '')
                THEN NULL
                ELSE candidate_profiles.embedding
            END,
            is_active = excluded.is_active,
            updated_at = datetime('now')
        "#,
    )
    .bind(profile.id.to_string())
    .bind(profile.waitlist_id.map(|id| id.to_string()))
    .bind(&profile.email)
    .bind(&profile.name)
    .bind(families_to_db(&profile.role_families))
    .bind(profile.seniority.map(|s| s.as_str()))
    .bind(profile.min_salary)
    .bind(list_to_db(&profile.locations))
    .bind(location_types_to_db(&profile.location_types))
    .bind(list_to_db(&profile.role_types))
    .bind(list_to_db(&profile.skills))
    .bind(list_to_db(&profile.exclusions))
    .bind(&profile.profile_text)
    .bind(profile.is_active as i64)
    .execute(pool)
    .await?;

    let id: String = sqlx::query_scalar("SELECT id FROM candidate_profiles WHERE email = ?")
        .bind(&profile.email)
        .fetch_one(pool)
        .await?;
    Ok(Uuid::parse_str(&id)?)
}

pub async fn load_profile(pool: &SqlitePool, id: Uuid) -> Result<Option<CandidateProfile>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM candidate_profiles WHERE id = ?"
    ))
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;
    row.map(|r| from_row(&r)).transpose()
}

/// Persist the full preference set of an already-loaded profile (PATCH
/// path: the handler mutates the struct, then saves it).
pub async fn save_preferences(pool: &SqlitePool, profile: &CandidateProfile) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE candidate_profiles SET
            embedding = CASE
                WHEN role_families IS NOT ? OR seniority IS NOT ?
                  OR skills IS NOT ? OR profile_text IS NOT ?
                THEN NULL
                ELSE embedding
            END,
            name = ?,
            role_families = ?,
            seniority = ?,
            min_salary = ?,
            locations = ?,
            location_types = ?,
            role_types = ?,
            skills = ?,
            exclusions = ?,
            profile_text = ?,
            updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(families_to_db(&profile.role_families))
    .bind(profile.seniority.map(|s| s.as_str()))
    .bind(list_to_db(&profile.skills))
    .bind(&profile.profile_text)
    .bind(&profile.name)
    .bind(families_to_db(&profile.role_families))
    .bind(profile.seniority.map(|s| s.as_str()))
    .bind(profile.min_salary)
    .bind(list_to_db(&profile.locations))
    .bind(location_types_to_db(&profile.location_types))
    .bind(list_to_db(&profile.role_types))
    .bind(list_to_db(&profile.skills))
    .bind(list_to_db(&profile.exclusions))
    .bind(&profile.profile_text)
    .bind(profile.id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_embedding(
    pool: &SqlitePool,
    id: Uuid,
    embedding: &[f32],
    model_version: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE candidate_profiles
         SET embedding = ?, embedding_model_version = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(super::encode_embedding(embedding))
    .bind(model_version)
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn touch_matched(pool: &SqlitePool, id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE candidate_profiles SET last_matched_at = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(ts_to_db(Utc::now()))
    .bind(id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Active profiles missing a vector for the current model version.
pub async fn profiles_missing_embedding(
    pool: &SqlitePool,
    model_version: &str,
    limit: i64,
) -> Result<Vec<CandidateProfile>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM candidate_profiles
         WHERE is_active = 1
           AND (embedding IS NULL OR embedding_model_version IS NOT ?)
         LIMIT ?"
    ))
    .bind(model_version)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;

    #[tokio::test]
    async fn email_is_the_natural_key() {
        let pool = init_memory_database().await.unwrap();

        let mut profile = CandidateProfile::new("dev@example.test".into());
        profile.role_families = vec![RoleFamily::SoftwareEngineering];
        profile.seniority = Some(Seniority::Senior);
        let first_id = upsert_profile(&pool, &profile).await.unwrap();

        let mut updated = CandidateProfile::new("dev@example.test".into());
        updated.seniority = Some(Seniority::Staff);
        let second_id = upsert_profile(&pool, &updated).await.unwrap();

        assert_eq!(first_id, second_id);
        let loaded = load_profile(&pool, first_id).await.unwrap().unwrap();
        assert_eq!(loaded.seniority, Some(Seniority::Staff));
    }

    #[tokio::test]
    async fn preference_lists_round_trip() {
        let pool = init_memory_database().await.unwrap();

        let mut profile = CandidateProfile::new("lists@example.test".into());
        profile.role_families = vec![RoleFamily::Data, RoleFamily::SoftwareEngineering];
        profile.location_types = vec![LocationType::Remote, LocationType::Hybrid];
        profile.skills = vec!["rust".into(), "python".into()];
        profile.exclusions = vec!["Initech".into()];
        let id = upsert_profile(&pool, &profile).await.unwrap();

        let loaded = load_profile(&pool, id).await.unwrap().unwrap();
        assert_eq!(loaded.role_families, profile.role_families);
        assert_eq!(loaded.location_types, profile.location_types);
        assert_eq!(loaded.skills, profile.skills);
        assert_eq!(loaded.exclusions, profile.exclusions);
    }
}
