// src/resolver/mod.rs - Collapse raw facility records into canonical sites
//
// Grouping is greedy and first-match-wins: each record is compared against
// the groups established by all prior records, in establishment order, and
// joins the first one whose key clears the similarity threshold. The output
// therefore depends on input order. That is the published contract: callers
// rely on reproducible groupings for a fixed input, not on a globally
// optimal clustering.

pub mod similarity;

use chrono::Utc;
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};

use crate::config::EngineConfig;
use crate::models::core::{CanonicalSite, RawLocation, Trial};
use crate::phase::phase_number;
use crate::store::{SiteStore, TrialStore};
use self::similarity::{build_site_key, normalize_key, similarity_ratio};

/// Cap on the stored therapeutic-area and investigator summaries.
pub const MAX_SUMMARY_VALUES: usize = 50;

const ONGOING_STATUSES: [&str; 4] = [
    "RECRUITING",
    "ACTIVE_NOT_RECRUITING",
    "ENROLLING_BY_INVITATION",
    "NOT_YET_RECRUITING",
];

/// One resolved group of raw locations sharing a site identity.
#[derive(Debug, Clone)]
pub struct SiteGroup {
    pub key: String,
    pub name: String,
    pub city: String,
    pub country: String,
    pub location_ids: Vec<i64>,
}

#[derive(Debug, Default)]
pub struct ResolutionStats {
    pub locations_seen: usize,
    pub locations_dropped: usize,
    pub groups_formed: usize,
    pub groups_skipped: usize,
    pub sites_inserted: usize,
    pub sites_updated: usize,
}

pub struct SiteResolver {
    fuzzy_threshold: f64,
}

impl SiteResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_threshold(config.fuzzy_threshold)
    }

    pub fn with_threshold(fuzzy_threshold: f64) -> Self {
        Self { fuzzy_threshold }
    }

    /// Group every raw location, aggregate each group's trial set, and upsert
    /// the resulting canonical sites.
    pub fn resolve(&self, trials: &TrialStore, sites: &mut SiteStore) -> ResolutionStats {
        let locations = trials.locations();
        let groups = self.group_locations(locations);
        info!("Resolved {} locations into {} site groups", locations.len(), groups.len());

        let mut stats = ResolutionStats {
            locations_seen: locations.len(),
            locations_dropped: locations.len()
                - groups.iter().map(|g| g.location_ids.len()).sum::<usize>(),
            groups_formed: groups.len(),
            ..Default::default()
        };

        let location_index: HashMap<i64, &RawLocation> =
            locations.iter().map(|loc| (loc.id, loc)).collect();

        for group in &groups {
            match aggregate_group(group, trials, &location_index) {
                Some(site) => {
                    if sites.upsert_aggregates(site) {
                        stats.sites_inserted += 1;
                    } else {
                        stats.sites_updated += 1;
                    }
                }
                None => {
                    debug!("Skipping group '{}': no resolvable trials", group.key);
                    stats.groups_skipped += 1;
                }
            }
        }

        info!(
            "Site aggregation complete: {} inserted, {} updated, {} skipped",
            stats.sites_inserted, stats.sites_updated, stats.groups_skipped
        );
        stats
    }

    /// The greedy grouping pass. Records missing a facility or country have
    /// no resolvable identity and are dropped up front.
    pub fn group_locations(&self, locations: &[RawLocation]) -> Vec<SiteGroup> {
        let mut groups: Vec<SiteGroup> = Vec::new();
        // Comparison forms of each established group key, same order as
        // `groups` so the first-match scan lines up.
        let mut group_keys: Vec<String> = Vec::new();

        for location in locations {
            let facility = location.facility.trim();
            let city = location.city.trim();
            let country = location.country.trim();

            if facility.is_empty() || country.is_empty() {
                debug!("Dropping location {}: missing facility or country", location.id);
                continue;
            }

            let site_key = build_site_key(facility, city, country);
            let normalized = normalize_key(&site_key);

            let mut matched = false;
            for (idx, existing) in group_keys.iter().enumerate() {
                if similarity_ratio(&normalized, existing) >= self.fuzzy_threshold {
                    groups[idx].location_ids.push(location.id);
                    matched = true;
                    break;
                }
            }

            if !matched {
                group_keys.push(normalized);
                groups.push(SiteGroup {
                    key: site_key,
                    name: facility.to_string(),
                    city: city.to_string(),
                    country: country.to_string(),
                    location_ids: vec![location.id],
                });
            }
        }

        groups
    }
}

/// Aggregate one group's trial set into a canonical site. Returns `None`
/// when no trial is reachable through the group's locations.
fn aggregate_group(
    group: &SiteGroup,
    trials: &TrialStore,
    location_index: &HashMap<i64, &RawLocation>,
) -> Option<CanonicalSite> {
    let group_locations: Vec<&RawLocation> = group
        .location_ids
        .iter()
        .filter_map(|id| location_index.get(id).copied())
        .collect();

    // Distinct trials reachable through the merged locations, in a stable
    // order so re-runs aggregate identically.
    let trial_ids: BTreeSet<&str> = group_locations
        .iter()
        .map(|loc| loc.trial_registry_id.as_str())
        .collect();
    let group_trials: Vec<&Trial> = trial_ids
        .iter()
        .filter_map(|id| trials.trial_by_registry_id(id))
        .collect();

    if group_trials.is_empty() {
        return None;
    }

    let total_studies = group_trials.len() as u32;
    let mut completed = 0u32;
    let mut ongoing = 0u32;
    let mut terminated = 0u32;
    let mut withdrawn = 0u32;
    for trial in &group_trials {
        let status = trial.status.to_uppercase();
        if status == "COMPLETED" {
            completed += 1;
        } else if ONGOING_STATUSES.contains(&status.as_str()) {
            ongoing += 1;
        } else if status == "TERMINATED" {
            terminated += 1;
        } else if status == "WITHDRAWN" {
            withdrawn += 1;
        }
    }

    let mut all_conditions: BTreeSet<String> = BTreeSet::new();
    for trial in &group_trials {
        all_conditions.extend(split_listing(&trial.conditions));
    }

    let mut investigators: BTreeSet<String> = BTreeSet::new();
    for location in &group_locations {
        investigators.extend(split_listing(&location.investigator));
    }

    let phases: Vec<f64> = group_trials
        .iter()
        .filter_map(|trial| phase_number(&trial.phase))
        .collect();
    let avg_phase = if phases.is_empty() {
        None
    } else {
        Some(phases.iter().sum::<f64>() / phases.len() as f64)
    };

    let enrollments: Vec<f64> = group_trials
        .iter()
        .filter_map(|trial| trial.enrollment.map(f64::from))
        .collect();
    let avg_enrollment = if enrollments.is_empty() {
        None
    } else {
        Some(enrollments.iter().sum::<f64>() / enrollments.len() as f64)
    };

    let last_active_date = group_trials
        .iter()
        .filter_map(|trial| trial.last_update_date)
        .max();

    Some(CanonicalSite {
        name: group.name.clone(),
        city: group.city.clone(),
        country: group.country.clone(),
        location_ids: group.location_ids.clone(),
        total_studies,
        completed_studies: completed,
        ongoing_studies: ongoing,
        terminated_studies: terminated,
        withdrawn_studies: withdrawn,
        therapeutic_areas: truncate_summary(all_conditions),
        investigators: truncate_summary(investigators),
        avg_phase,
        avg_enrollment,
        last_active_date,
        completion_ratio: None,
        data_quality_score: None,
        experience_index: None,
        updated_at: Utc::now(),
    })
}

/// Split a comma-joined listing into trimmed, non-empty values.
fn split_listing(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

/// First `MAX_SUMMARY_VALUES` entries of an already-sorted set.
fn truncate_summary(values: BTreeSet<String>) -> Vec<String> {
    values.into_iter().take(MAX_SUMMARY_VALUES).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::{LocationInput, Trial};
    use chrono::NaiveDate;

    fn trial(registry_id: &str, status: &str, phase: &str) -> Trial {
        Trial {
            registry_id: registry_id.to_string(),
            title: format!("Study {}", registry_id),
            status: status.to_string(),
            study_type: "Interventional".to_string(),
            phase: phase.to_string(),
            start_date: None,
            completion_date: None,
            primary_completion_date: None,
            enrollment: Some(50),
            sponsor: "Sponsor".to_string(),
            conditions: "Melanoma, Lung Cancer".to_string(),
            interventions: "Drug: X".to_string(),
            last_update_date: NaiveDate::from_ymd_opt(2024, 6, 1),
        }
    }

    fn location(facility: &str, city: &str, country: &str) -> LocationInput {
        LocationInput {
            facility: facility.to_string(),
            city: city.to_string(),
            state: String::new(),
            country: country.to_string(),
            zip_code: String::new(),
            investigator: "Dr. Smith".to_string(),
        }
    }

    fn resolver() -> SiteResolver {
        SiteResolver::with_threshold(85.0)
    }

    #[test]
    fn test_punctuation_variants_merge() {
        let mut store = TrialStore::new();
        store.upsert_study(
            trial("NCT001", "COMPLETED", "Phase 2"),
            vec![location("Mayo Clinic", "Rochester", "USA")],
        );
        store.upsert_study(
            trial("NCT002", "RECRUITING", "Phase 3"),
            vec![location("Mayo  Clinic.", "rochester", "USA")],
        );

        let groups = resolver().group_locations(store.locations());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].location_ids.len(), 2);
        // The first record establishes the group identity.
        assert_eq!(groups[0].name, "Mayo Clinic");
    }

    #[test]
    fn test_dissimilar_facilities_stay_apart() {
        let mut store = TrialStore::new();
        store.upsert_study(
            trial("NCT001", "COMPLETED", "Phase 2"),
            vec![location("Mayo Clinic", "Rochester", "USA")],
        );
        store.upsert_study(
            trial("NCT002", "COMPLETED", "Phase 2"),
            vec![location("Cleveland Clinic", "Cleveland", "USA")],
        );

        let groups = resolver().group_locations(store.locations());
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_unresolvable_records_are_dropped() {
        let mut store = TrialStore::new();
        store.upsert_study(
            trial("NCT001", "COMPLETED", "Phase 2"),
            vec![
                location("", "Rochester", "USA"),
                location("Mayo Clinic", "Rochester", ""),
                location("   ", "Rochester", "USA"),
                location("Mayo Clinic", "", "USA"),
            ],
        );

        let groups = resolver().group_locations(store.locations());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].location_ids.len(), 1);
    }

    #[test]
    fn test_grouping_is_deterministic_for_fixed_input() {
        let mut store = TrialStore::new();
        for (i, name) in ["Mayo Clinic", "Mayo Clinic.", "St. Jude", "Cleveland Clinic"]
            .iter()
            .enumerate()
        {
            store.upsert_study(
                trial(&format!("NCT{:03}", i), "COMPLETED", "Phase 2"),
                vec![location(name, "Somewhere", "USA")],
            );
        }

        let first = resolver().group_locations(store.locations());
        let second = resolver().group_locations(store.locations());
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.key, b.key);
            assert_eq!(a.location_ids, b.location_ids);
        }
    }

    #[test]
    fn test_aggregation_buckets_and_averages() {
        let mut store = TrialStore::new();
        store.upsert_study(
            trial("NCT001", "COMPLETED", "Phase 2"),
            vec![location("Mayo Clinic", "Rochester", "USA")],
        );
        store.upsert_study(
            trial("NCT002", "RECRUITING", "Phase 3"),
            vec![location("Mayo Clinic", "Rochester", "USA")],
        );
        store.upsert_study(
            trial("NCT003", "TERMINATED", "Not Applicable"),
            vec![location("Mayo Clinic", "Rochester", "USA")],
        );
        // Status outside every bucket still counts toward the total.
        store.upsert_study(
            trial("NCT004", "SUSPENDED", "Phase 1"),
            vec![location("Mayo Clinic", "Rochester", "USA")],
        );

        let mut sites = SiteStore::new();
        let stats = resolver().resolve(&store, &mut sites);
        assert_eq!(stats.sites_inserted, 1);

        let site = &sites.sites()[0];
        assert_eq!(site.total_studies, 4);
        assert_eq!(site.completed_studies, 1);
        assert_eq!(site.ongoing_studies, 1);
        assert_eq!(site.terminated_studies, 1);
        assert_eq!(site.withdrawn_studies, 0);
        // "Not Applicable" is excluded from the phase average, not zeroed.
        let avg_phase = site.avg_phase.unwrap();
        assert!((avg_phase - 2.0).abs() < 1e-9);
        assert_eq!(site.avg_enrollment, Some(50.0));
        assert_eq!(site.last_active_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert_eq!(
            site.therapeutic_areas,
            vec!["Lung Cancer".to_string(), "Melanoma".to_string()]
        );
    }

    #[test]
    fn test_summary_lists_are_capped() {
        let mut store = TrialStore::new();
        let conditions: Vec<String> = (0..60).map(|i| format!("Condition {:02}", i)).collect();
        let mut t = trial("NCT001", "COMPLETED", "Phase 2");
        t.conditions = conditions.join(", ");
        store.upsert_study(t, vec![location("Mayo Clinic", "Rochester", "USA")]);

        let mut sites = SiteStore::new();
        resolver().resolve(&store, &mut sites);
        let site = &sites.sites()[0];
        assert_eq!(site.therapeutic_areas.len(), MAX_SUMMARY_VALUES);
        assert_eq!(site.therapeutic_areas[0], "Condition 00");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut store = TrialStore::new();
        store.upsert_study(
            trial("NCT001", "COMPLETED", "Phase 2"),
            vec![location("Mayo Clinic", "Rochester", "USA")],
        );
        store.upsert_study(
            trial("NCT002", "WITHDRAWN", "Phase 2"),
            vec![location("Mayo Clinic", "Rochester", "USA")],
        );

        let mut sites = SiteStore::new();
        let first = resolver().resolve(&store, &mut sites);
        assert_eq!(first.sites_inserted, 1);
        let snapshot = sites.sites()[0].clone();

        let second = resolver().resolve(&store, &mut sites);
        assert_eq!(second.sites_inserted, 0);
        assert_eq!(second.sites_updated, 1);

        let again = &sites.sites()[0];
        assert_eq!(again.total_studies, snapshot.total_studies);
        assert_eq!(again.completed_studies, snapshot.completed_studies);
        assert_eq!(again.withdrawn_studies, snapshot.withdrawn_studies);
        assert_eq!(again.therapeutic_areas, snapshot.therapeutic_areas);
    }
}
