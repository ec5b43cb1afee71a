// src/lib.rs

pub mod acquisition;
pub mod clustering;
pub mod config;
pub mod export;
pub mod metrics;
pub mod models;
pub mod phase;
pub mod recommend;
pub mod resolver;
pub mod store;

pub use crate::config::EngineConfig;
pub use crate::models::core::{CanonicalSite, RawLocation, TargetProfile, Trial};
pub use crate::store::{SiteStore, TrialStore};
