//! Data models for `fdp.yaml` and the per-dataset `metadata.yaml` files.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A date or a full timestamp, whichever the YAML file provides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateOrDateTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl DateOrDateTime {
    /// Normalises to a UTC timestamp (midnight for plain dates).
    pub fn as_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FdpContactPoint {
    pub data_access_body: String,
    pub name: Option<String>,
    pub homepage: Option<String>,
    pub email: Option<String>,
}

/// One catalog, loaded from the `catalogs` block of `fdp.yaml`.
/// Catalogs are immutable and live for the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FdpCatalog {
    pub title: String,
    pub description: String,
    pub since: Option<DateOrDateTime>,
}

/// Data model of `fdp.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FdpConfig {
    pub title: String,
    pub description: Option<String>,
    pub theme: Option<String>,
    pub theme_taxonomy: Option<String>,
    pub language: Option<String>,
    pub legislation: String,
    pub license: String,
    pub access_right: String,
    pub user_portal_datasets: Option<String>,
    pub since: DateOrDateTime,
    pub contact_point: FdpContactPoint,
    pub keywords: Option<Vec<String>>,
    pub catalogs: BTreeMap<String, FdpCatalog>,
}

/// Data model of a dataset's `metadata.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FdpDataset {
    pub title: String,
    pub description: String,
    pub catalog_id: String,
    pub keywords: Option<Vec<String>>,
    pub since: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub min_age: Option<u32>,
    pub max_age: Option<u32>,
    pub individual_count: Option<u64>,
    pub record_count: u64,
    pub data_provider_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = "\
title: Test dataset
description: A dataset used in tests
catalog_id: cat-1
since: 2023-06-01T10:00:00Z
updated: 2024-02-20T08:30:00Z
record_count: 120
data_provider_name: Test Biobank
";

    #[test]
    fn test_metadata_parses() {
        let dataset: FdpDataset = serde_yaml::from_str(METADATA).unwrap();
        assert_eq!(dataset.catalog_id, "cat-1");
        assert_eq!(dataset.record_count, 120);
        assert!(dataset.keywords.is_none());
    }

    #[test]
    fn test_metadata_rejects_unknown_keys() {
        let broken = format!("{METADATA}something_else: true\n");
        assert!(serde_yaml::from_str::<FdpDataset>(&broken).is_err());
    }

    #[test]
    fn test_date_or_datetime() {
        let date: DateOrDateTime = serde_yaml::from_str("2024-01-15").unwrap();
        assert_eq!(date.as_datetime().to_rfc3339(), "2024-01-15T00:00:00+00:00");

        let stamp: DateOrDateTime = serde_yaml::from_str("2024-01-15T12:30:00Z").unwrap();
        assert_eq!(stamp.as_datetime().to_rfc3339(), "2024-01-15T12:30:00+00:00");
    }
}
