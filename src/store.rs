// src/store.rs - In-memory snapshot store
//
// The relational store is an external collaborator; this module carries just
// the create/read/update semantics the core consumes, plus JSON snapshots so
// separate CLI invocations compose into one pipeline.

use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::models::core::{CanonicalSite, LocationInput, RawLocation, SiteKey, Trial};

/// Trials and their raw locations, upserted by registry id.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TrialStore {
    trials: Vec<Trial>,
    locations: Vec<RawLocation>,
    next_location_id: i64,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl TrialStore {
    pub fn new() -> Self {
        Self {
            next_location_id: 1,
            ..Default::default()
        }
    }

    /// Insert or replace a study. On update the trial's location set is
    /// replaced wholesale; partial location patches would leave stale
    /// facility rows behind a renamed site. Returns true for a new study.
    pub fn upsert_study(&mut self, trial: Trial, locations: Vec<LocationInput>) -> bool {
        let registry_id = trial.registry_id.clone();
        let is_new = match self.index.get(&registry_id) {
            Some(&idx) => {
                self.trials[idx] = trial;
                self.locations
                    .retain(|loc| loc.trial_registry_id != registry_id);
                false
            }
            None => {
                self.index.insert(registry_id.clone(), self.trials.len());
                self.trials.push(trial);
                true
            }
        };

        for input in locations {
            let id = self.next_location_id;
            self.next_location_id += 1;
            self.locations.push(RawLocation {
                id,
                trial_registry_id: registry_id.clone(),
                facility: input.facility,
                city: input.city,
                state: input.state,
                country: input.country,
                zip_code: input.zip_code,
                investigator: input.investigator,
            });
        }

        is_new
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn locations(&self) -> &[RawLocation] {
        &self.locations
    }

    pub fn trial_by_registry_id(&self, registry_id: &str) -> Option<&Trial> {
        self.index.get(registry_id).map(|&idx| &self.trials[idx])
    }

    pub fn trial_count(&self) -> usize {
        self.trials.len()
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut store: Self = load_json(path)?;
        store.index = store
            .trials
            .iter()
            .enumerate()
            .map(|(idx, trial)| (trial.registry_id.clone(), idx))
            .collect();
        debug!(
            "Loaded trial store: {} trials, {} locations",
            store.trials.len(),
            store.locations.len()
        );
        Ok(store)
    }
}

/// Canonical sites, upserted by (name, city, country).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SiteStore {
    sites: Vec<CanonicalSite>,
    #[serde(skip)]
    index: HashMap<SiteKey, usize>,
}

impl SiteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new site, or overwrite an existing site's aggregates in
    /// place. Previously computed scores survive a re-aggregation; the
    /// metrics engine owns them. Returns true for an insert.
    pub fn upsert_aggregates(&mut self, incoming: CanonicalSite) -> bool {
        match self.index.get(&incoming.key()) {
            Some(&idx) => {
                let existing = &mut self.sites[idx];
                existing.location_ids = incoming.location_ids;
                existing.total_studies = incoming.total_studies;
                existing.completed_studies = incoming.completed_studies;
                existing.ongoing_studies = incoming.ongoing_studies;
                existing.terminated_studies = incoming.terminated_studies;
                existing.withdrawn_studies = incoming.withdrawn_studies;
                existing.therapeutic_areas = incoming.therapeutic_areas;
                existing.investigators = incoming.investigators;
                existing.avg_phase = incoming.avg_phase;
                existing.avg_enrollment = incoming.avg_enrollment;
                existing.last_active_date = incoming.last_active_date;
                existing.updated_at = Utc::now();
                false
            }
            None => {
                self.index.insert(incoming.key(), self.sites.len());
                self.sites.push(incoming);
                true
            }
        }
    }

    pub fn get(&self, key: &SiteKey) -> Option<&CanonicalSite> {
        self.index.get(key).map(|&idx| &self.sites[idx])
    }

    pub fn sites(&self) -> &[CanonicalSite] {
        &self.sites
    }

    pub fn sites_mut(&mut self) -> &mut [CanonicalSite] {
        &mut self.sites
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut store: Self = load_json(path)?;
        store.index = store
            .sites
            .iter()
            .enumerate()
            .map(|(idx, site)| (site.key(), idx))
            .collect();
        debug!("Loaded site store: {} sites", store.sites.len());
        Ok(store)
    }
}

fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialize snapshot")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}
