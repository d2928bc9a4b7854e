//! Read-only access to warehouse tax rate records.
//!
//! The warehouse export is an NDJSON file with one [`TaxRateRecord`] per line.
//! It is re-read on every query so a refreshed export is picked up by the
//! next update cycle without restarting the service.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read tax rate records from {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed tax rate record at {path}:{line}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// The jurisdiction level a rate applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaxLevel {
    State,
    County,
    SpecialDistrict,
    City,
}

impl TaxLevel {
    pub const ALL: [TaxLevel; 4] = [Self::State, Self::County, Self::SpecialDistrict, Self::City];

    /// Suffix used in the remote tax ID for local levels.
    pub fn id_suffix(self) -> &'static str {
        match self {
            Self::State => "State",
            Self::County => "County",
            Self::SpecialDistrict => "SD",
            Self::City => "City",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxType {
    Sales,
    Use,
}

impl TaxType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "Sales",
            Self::Use => "Use",
        }
    }
}

/// One warehouse row: a jurisdiction's rates for a single tax type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxRateRecord {
    pub z2t_id: String,
    pub state: String,
    pub tax_type: TaxType,
    #[serde(default)]
    pub rate_state: f64,
    #[serde(default)]
    pub rate_county: f64,
    #[serde(default)]
    pub rate_special_district: f64,
    #[serde(default)]
    pub rate_city: f64,
    #[serde(default)]
    pub state_updated: Option<NaiveDateTime>,
    #[serde(default)]
    pub county_updated: Option<NaiveDateTime>,
    #[serde(default)]
    pub sd_updated: Option<NaiveDateTime>,
    #[serde(default)]
    pub city_updated: Option<NaiveDateTime>,
}

impl TaxRateRecord {
    pub fn rate(&self, level: TaxLevel) -> f64 {
        match level {
            TaxLevel::State => self.rate_state,
            TaxLevel::County => self.rate_county,
            TaxLevel::SpecialDistrict => self.rate_special_district,
            TaxLevel::City => self.rate_city,
        }
    }

    pub fn updated_at(&self, level: TaxLevel) -> Option<NaiveDateTime> {
        match level {
            TaxLevel::State => self.state_updated,
            TaxLevel::County => self.county_updated,
            TaxLevel::SpecialDistrict => self.sd_updated,
            TaxLevel::City => self.city_updated,
        }
    }

    /// True when the level's rate changed strictly after `cutoff`.
    pub fn updated_after(&self, level: TaxLevel, cutoff: NaiveDateTime) -> bool {
        self.updated_at(level).is_some_and(|updated| updated > cutoff)
    }
}

/// Source of tax rate records, queried once per level per update cycle.
#[async_trait]
pub trait TaxRateStore: Send + Sync {
    /// Records whose `level` timestamp is strictly after `cutoff`, in
    /// storage order.
    async fn records_updated_after(
        &self,
        level: TaxLevel,
        cutoff: NaiveDateTime,
    ) -> Result<Vec<TaxRateRecord>, StoreError>;
}

pub struct NdjsonTaxRateStore {
    path: PathBuf,
}

impl NdjsonTaxRateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<Vec<TaxRateRecord>, StoreError> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                line: index + 1,
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl TaxRateStore for NdjsonTaxRateStore {
    async fn records_updated_after(
        &self,
        level: TaxLevel,
        cutoff: NaiveDateTime,
    ) -> Result<Vec<TaxRateRecord>, StoreError> {
        let records: Vec<_> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|record| record.updated_after(level, cutoff))
            .collect();

        tracing::debug!(
            path = %self.path.display(),
            ?level,
            count = records.len(),
            "queried tax rate records"
        );
        Ok(records)
    }
}
