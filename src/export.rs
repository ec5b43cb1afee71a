// src/export.rs - JSON exports for the external reporting surface

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::metrics::narrative::{generate_strengths_weaknesses, SiteAssessment};
use crate::models::core::CanonicalSite;
use crate::store::{SiteStore, TrialStore};

/// A scored site flattened for the dashboard, narrative included.
#[derive(Debug, Serialize)]
pub struct SiteExport<'a> {
    pub site_name: &'a str,
    pub city: &'a str,
    pub country: &'a str,
    pub total_studies: u32,
    pub completed_studies: u32,
    pub ongoing_studies: u32,
    pub terminated_studies: u32,
    pub withdrawn_studies: u32,
    pub therapeutic_areas: &'a [String],
    pub investigators: &'a [String],
    pub avg_phase: Option<f64>,
    pub avg_enrollment: Option<f64>,
    pub last_active_date: Option<NaiveDate>,
    pub completion_ratio: Option<f64>,
    pub data_quality_score: Option<f64>,
    pub experience_index: Option<u32>,
    pub assessment: SiteAssessment,
}

fn site_export(site: &CanonicalSite, as_of: NaiveDate) -> SiteExport<'_> {
    SiteExport {
        site_name: &site.name,
        city: &site.city,
        country: &site.country,
        total_studies: site.total_studies,
        completed_studies: site.completed_studies,
        ongoing_studies: site.ongoing_studies,
        terminated_studies: site.terminated_studies,
        withdrawn_studies: site.withdrawn_studies,
        therapeutic_areas: &site.therapeutic_areas,
        investigators: &site.investigators,
        avg_phase: site.avg_phase,
        avg_enrollment: site.avg_enrollment,
        last_active_date: site.last_active_date,
        completion_ratio: site.completion_ratio,
        data_quality_score: site.data_quality_score,
        experience_index: site.experience_index,
        assessment: generate_strengths_weaknesses(site, as_of),
    }
}

/// Write trials, locations, and scored sites as separate JSON files under
/// `dir`.
pub fn export_all(
    trials: &TrialStore,
    sites: &SiteStore,
    dir: &Path,
    as_of: NaiveDate,
) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;

    write_json(&dir.join("export_trials.json"), trials.trials())?;
    info!("Exported {} trials", trials.trial_count());

    write_json(&dir.join("export_locations.json"), trials.locations())?;
    info!("Exported {} locations", trials.location_count());

    let site_rows: Vec<SiteExport> = sites
        .sites()
        .iter()
        .map(|site| site_export(site, as_of))
        .collect();
    write_json(&dir.join("export_sites.json"), &site_rows)?;
    info!("Exported {} sites", site_rows.len());

    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize export")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
