// src/acquisition/loader.rs - Fetch, normalize, and snapshot registry studies

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};

use super::registry_client::{parse_study, RegistryClient, StudyQuery};
use crate::store::TrialStore;

#[derive(Debug, Default)]
pub struct LoadStats {
    pub fetched: usize,
    pub loaded: usize,
    pub updated: usize,
    pub skipped: usize,
}

pub struct DataLoader {
    client: RegistryClient,
}

impl DataLoader {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    /// Fetch matching studies and upsert them into the trial store. Studies
    /// the parser rejects are counted and skipped, never fatal.
    pub async fn load_studies(
        &self,
        store: &mut TrialStore,
        query: &StudyQuery,
    ) -> Result<LoadStats> {
        let studies = self.client.fetch_studies(query).await?;

        let mut stats = LoadStats {
            fetched: studies.len(),
            ..Default::default()
        };

        let progress = ProgressBar::new(studies.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        progress.set_message("Processing studies");

        for study in &studies {
            match parse_study(study) {
                Some((trial, locations)) => {
                    if store.upsert_study(trial, locations) {
                        stats.loaded += 1;
                    } else {
                        stats.updated += 1;
                    }
                }
                None => {
                    warn!("Skipping study without a usable registry id");
                    stats.skipped += 1;
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        info!(
            "Loaded {} new studies, updated {}, skipped {}",
            stats.loaded, stats.updated, stats.skipped
        );
        Ok(stats)
    }
}
