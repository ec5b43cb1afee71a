// src/acquisition/registry_client.rs - Paginated registry fetch with retries
//
// Thin client for a ClinicalTrials.gov-style v2 API. Everything downstream
// consumes the parsed Trial/LocationInput records; registry JSON never leaks
// past this module.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::models::core::{LocationInput, Trial};

#[derive(Debug, Clone, Default)]
pub struct StudyQuery {
    pub condition: Option<String>,
    pub phase: Option<String>,
    pub status: Option<String>,
    pub country: Option<String>,
    pub max_pages: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudiesPage {
    #[serde(default)]
    studies: Vec<RegistryStudy>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStudy {
    protocol_section: Option<ProtocolSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ProtocolSection {
    #[serde(default)]
    identification_module: IdentificationModule,
    #[serde(default)]
    status_module: StatusModule,
    #[serde(default)]
    design_module: DesignModule,
    #[serde(default)]
    conditions_module: ConditionsModule,
    #[serde(default)]
    arms_interventions_module: ArmsInterventionsModule,
    #[serde(default)]
    sponsor_collaborators_module: SponsorModule,
    #[serde(default)]
    contacts_locations_module: ContactsLocationsModule,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct IdentificationModule {
    #[serde(default)]
    nct_id: String,
    #[serde(default)]
    brief_title: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StatusModule {
    #[serde(default)]
    overall_status: String,
    start_date_struct: Option<DateStruct>,
    completion_date_struct: Option<DateStruct>,
    primary_completion_date_struct: Option<DateStruct>,
    last_update_post_date_struct: Option<DateStruct>,
    enrollment_info: Option<EnrollmentInfo>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DateStruct {
    #[serde(default)]
    date: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct EnrollmentInfo {
    count: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DesignModule {
    #[serde(default)]
    study_type: String,
    #[serde(default)]
    phases: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConditionsModule {
    #[serde(default)]
    conditions: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ArmsInterventionsModule {
    #[serde(default)]
    interventions: Vec<InterventionEntry>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InterventionEntry {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SponsorModule {
    lead_sponsor: Option<LeadSponsor>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LeadSponsor {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ContactsLocationsModule {
    #[serde(default)]
    locations: Vec<LocationEntry>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LocationEntry {
    #[serde(default)]
    facility: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    zip: String,
    #[serde(default)]
    contacts: Vec<LocationContact>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LocationContact {
    #[serde(default)]
    name: String,
}

pub struct RegistryClient {
    base_url: String,
    max_retries: usize,
    retry_delay: Duration,
    page_size: usize,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base_url: config.registry_base_url.clone(),
            max_retries: config.api_max_retries.max(1),
            retry_delay: Duration::from_secs(config.api_retry_delay_secs),
            page_size: config.api_page_size,
            http: reqwest::Client::new(),
        }
    }

    /// Fetch every page of results for a query, up to the page bound.
    pub async fn fetch_studies(&self, query: &StudyQuery) -> Result<Vec<RegistryStudy>> {
        let url = format!("{}/studies", self.base_url);
        let mut all_studies = Vec::new();
        let mut page_token: Option<String> = None;
        let mut page_count = 0usize;

        loop {
            if let Some(max_pages) = query.max_pages {
                if page_count >= max_pages {
                    break;
                }
            }

            let mut params: Vec<(String, String)> = vec![
                ("format".to_string(), "json".to_string()),
                ("pageSize".to_string(), self.page_size.to_string()),
            ];

            let mut query_parts = Vec::new();
            if let Some(condition) = &query.condition {
                query_parts.push(format!("AREA[Condition]{}", condition));
            }
            if let Some(phase) = &query.phase {
                query_parts.push(format!("AREA[Phase]{}", phase));
            }
            if let Some(status) = &query.status {
                query_parts.push(format!("AREA[OverallStatus]{}", status));
            }
            if let Some(country) = &query.country {
                query_parts.push(format!("AREA[LocationCountry]{}", country));
            }
            if !query_parts.is_empty() {
                params.push(("query.cond".to_string(), query_parts.join(" AND ")));
            }
            if let Some(token) = &page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }

            let page = self.get_with_retry(&url, &params).await?;
            page_count += 1;
            info!("Fetched page {}: {} studies", page_count, page.studies.len());

            page_token = page.next_page_token.clone();
            let empty = page.studies.is_empty();
            all_studies.extend(page.studies);

            if empty || page_token.is_none() {
                break;
            }
        }

        info!("Total studies fetched: {}", all_studies.len());
        Ok(all_studies)
    }

    async fn get_with_retry(&self, url: &str, params: &[(String, String)]) -> Result<StudiesPage> {
        let mut last_error = anyhow!("no request attempted");
        for attempt in 1..=self.max_retries {
            let outcome = self
                .http
                .get(url)
                .query(params)
                .timeout(Duration::from_secs(30))
                .send()
                .await;

            match outcome {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => match response.json::<StudiesPage>().await {
                        Ok(page) => return Ok(page),
                        Err(err) => last_error = err.into(),
                    },
                    Err(err) => last_error = err.into(),
                },
                Err(err) => last_error = err.into(),
            }

            warn!(
                "Request failed (attempt {}/{}): {}",
                attempt, self.max_retries, last_error
            );
            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error).with_context(|| {
            format!("Failed to fetch {} after {} attempts", url, self.max_retries)
        })
    }
}

/// Normalize one registry study into core records. `None` when the study
/// carries no usable identity.
pub fn parse_study(study: &RegistryStudy) -> Option<(Trial, Vec<LocationInput>)> {
    let protocol = study.protocol_section.as_ref()?;
    let registry_id = protocol.identification_module.nct_id.trim();
    if registry_id.is_empty() {
        return None;
    }

    let status = &protocol.status_module;
    let trial = Trial {
        registry_id: registry_id.to_string(),
        title: protocol.identification_module.brief_title.clone(),
        status: status.overall_status.clone(),
        study_type: protocol.design_module.study_type.clone(),
        phase: render_phase_label(&protocol.design_module.phases),
        start_date: parse_partial_date(status.start_date_struct.as_ref()),
        completion_date: parse_partial_date(status.completion_date_struct.as_ref()),
        primary_completion_date: parse_partial_date(
            status.primary_completion_date_struct.as_ref(),
        ),
        enrollment: status.enrollment_info.as_ref().and_then(|info| info.count),
        sponsor: protocol
            .sponsor_collaborators_module
            .lead_sponsor
            .as_ref()
            .map(|sponsor| sponsor.name.clone())
            .unwrap_or_default(),
        conditions: protocol.conditions_module.conditions.join(", "),
        interventions: protocol
            .arms_interventions_module
            .interventions
            .iter()
            .map(|entry| format!("{}: {}", entry.kind, entry.name))
            .collect::<Vec<_>>()
            .join(", "),
        last_update_date: parse_partial_date(status.last_update_post_date_struct.as_ref()),
    };

    let locations = protocol
        .contacts_locations_module
        .locations
        .iter()
        .map(|entry| LocationInput {
            facility: entry.facility.clone(),
            city: entry.city.clone(),
            state: entry.state.clone(),
            country: entry.country.clone(),
            zip_code: entry.zip.clone(),
            investigator: entry
                .contacts
                .iter()
                .map(|contact| contact.name.as_str())
                .filter(|name| !name.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();

    Some((trial, locations))
}

/// Registry phase enum codes rendered to the display labels the phase scale
/// understands; multi-phase studies join as "Phase 1/Phase 2".
fn render_phase_label(codes: &[String]) -> String {
    codes
        .iter()
        .filter_map(|code| match code.as_str() {
            "EARLY_PHASE1" => Some("Early Phase 1"),
            "PHASE1" => Some("Phase 1"),
            "PHASE2" => Some("Phase 2"),
            "PHASE3" => Some("Phase 3"),
            "PHASE4" => Some("Phase 4"),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Registry dates arrive as "YYYY-MM-DD" or the partial "YYYY-MM"; partial
/// dates resolve to the first of the month.
fn parse_partial_date(date_struct: Option<&DateStruct>) -> Option<NaiveDate> {
    let raw = date_struct.map(|d| d.date.trim())?;
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn study_json(nct_id: &str) -> RegistryStudy {
        let raw = serde_json::json!({
            "protocolSection": {
                "identificationModule": {
                    "nctId": nct_id,
                    "briefTitle": "A Study of X"
                },
                "statusModule": {
                    "overallStatus": "RECRUITING",
                    "lastUpdatePostDateStruct": { "date": "2024-03" },
                    "startDateStruct": { "date": "2021-06-15" },
                    "enrollmentInfo": { "count": 120 }
                },
                "designModule": {
                    "studyType": "INTERVENTIONAL",
                    "phases": ["PHASE1", "PHASE2"]
                },
                "conditionsModule": {
                    "conditions": ["Melanoma", "Lung Cancer"]
                },
                "armsInterventionsModule": {
                    "interventions": [{ "type": "DRUG", "name": "Compound X" }]
                },
                "sponsorCollaboratorsModule": {
                    "leadSponsor": { "name": "Acme Pharma" }
                },
                "contactsLocationsModule": {
                    "locations": [{
                        "facility": "Mayo Clinic",
                        "city": "Rochester",
                        "state": "Minnesota",
                        "country": "United States",
                        "zip": "55905",
                        "contacts": [{ "name": "Jane Doe, MD" }, { "name": "" }]
                    }]
                }
            }
        });
        serde_json::from_value(raw).expect("valid study json")
    }

    #[test]
    fn test_parse_study_maps_core_fields() {
        let (trial, locations) = parse_study(&study_json("NCT01234567")).unwrap();
        assert_eq!(trial.registry_id, "NCT01234567");
        assert_eq!(trial.status, "RECRUITING");
        assert_eq!(trial.phase, "Phase 1/Phase 2");
        assert_eq!(trial.enrollment, Some(120));
        assert_eq!(trial.conditions, "Melanoma, Lung Cancer");
        assert_eq!(trial.interventions, "DRUG: Compound X");
        assert_eq!(trial.sponsor, "Acme Pharma");
        assert_eq!(
            trial.start_date,
            NaiveDate::from_ymd_opt(2021, 6, 15)
        );
        // Partial month-only date resolves to the first.
        assert_eq!(
            trial.last_update_date,
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );

        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].facility, "Mayo Clinic");
        assert_eq!(locations[0].investigator, "Jane Doe, MD");
    }

    #[test]
    fn test_parse_study_without_identity_is_rejected() {
        assert!(parse_study(&study_json("  ")).is_none());
    }

    #[test]
    fn test_phase_label_rendering() {
        let codes = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(render_phase_label(&codes(&["PHASE3"])), "Phase 3");
        assert_eq!(
            render_phase_label(&codes(&["PHASE2", "PHASE3"])),
            "Phase 2/Phase 3"
        );
        assert_eq!(render_phase_label(&codes(&["EARLY_PHASE1"])), "Early Phase 1");
        assert_eq!(render_phase_label(&codes(&["NA"])), "");
    }

    #[test]
    fn test_partial_date_parsing() {
        let date = |raw: &str| {
            parse_partial_date(Some(&DateStruct {
                date: raw.to_string(),
            }))
        };
        assert_eq!(date("2024-03-15"), NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(date("2024-03"), NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(date(""), None);
        assert_eq!(date("March 2024"), None);
    }
}
