// src/models/core.rs - Core record types shared across the pipeline

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One study record from the trial registry. Owned upstream; the core treats
/// it as read-only input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub registry_id: String,
    pub title: String,
    /// Raw overall-status string. Canonicalized to upper-case before
    /// classification, never rewritten in place.
    pub status: String,
    pub study_type: String,
    pub phase: String,
    pub start_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
    pub primary_completion_date: Option<NaiveDate>,
    pub enrollment: Option<u32>,
    pub sponsor: String,
    /// Comma-joined condition names as supplied by the registry.
    pub conditions: String,
    /// Comma-joined "type: name" intervention entries.
    pub interventions: String,
    pub last_update_date: Option<NaiveDate>,
}

/// One (trial, facility) pair. Immutable once ingested; ids are assigned by
/// the trial store at insert time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLocation {
    pub id: i64,
    pub trial_registry_id: String,
    pub facility: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip_code: String,
    /// Comma-joined investigator names.
    pub investigator: String,
}

/// A facility record as parsed from the registry, before the trial store has
/// assigned it an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationInput {
    pub facility: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip_code: String,
    pub investigator: String,
}

/// Lookup key for a canonical site. Exact-match on all three components;
/// fuzzy matching happens before a key is ever formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteKey {
    pub name: String,
    pub city: String,
    pub country: String,
}

/// The deduplicated, resolved identity for a physical research facility.
///
/// Aggregates are recomputed wholesale by the resolver on every run; the
/// derived scores stay `None` until the metrics engine fills them and survive
/// a re-aggregation untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalSite {
    pub name: String,
    pub city: String,
    pub country: String,

    /// Raw location ids merged into this identity.
    pub location_ids: Vec<i64>,

    pub total_studies: u32,
    pub completed_studies: u32,
    pub ongoing_studies: u32,
    pub terminated_studies: u32,
    pub withdrawn_studies: u32,

    /// Sorted distinct condition names, truncated to a bounded summary.
    pub therapeutic_areas: Vec<String>,
    /// Sorted distinct investigator names, same cap.
    pub investigators: Vec<String>,

    pub avg_phase: Option<f64>,
    pub avg_enrollment: Option<f64>,
    pub last_active_date: Option<NaiveDate>,

    pub completion_ratio: Option<f64>,
    pub data_quality_score: Option<f64>,
    pub experience_index: Option<u32>,

    pub updated_at: DateTime<Utc>,
}

impl CanonicalSite {
    pub fn key(&self) -> SiteKey {
        SiteKey {
            name: self.name.clone(),
            city: self.city.clone(),
            country: self.country.clone(),
        }
    }

    /// "Name (Country)" label used in ranked output.
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.name, self.country)
    }
}

/// Requirements of the study being placed, matched against site profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetProfile {
    pub conditions: Vec<String>,
    pub phase: String,
    pub country: Option<String>,
}
