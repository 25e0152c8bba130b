//! Data models for `beacon-common.yaml`, `beacon-aggregated.yaml` and
//! `beacon-sensitive.yaml`. All models are strict: unknown keys reject the
//! file and fail the startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::beacon::model::Granularity;

/// Environment options according to the Beacon specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconEnvironment {
    Prod,
    Test,
    Dev,
    Staging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionStatus {
    DEV,
    TEST,
    PROD,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    PUBLIC,
    REGISTERED,
    CONTROLLED,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BeaconInfoConfig {
    pub id: String,
    pub name: String,
    pub version: String,
    pub environment: BeaconEnvironment,
    pub description: Option<String>,
    pub alternative_url: Option<String>,
    pub documentation_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BeaconOrganisationConfig {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub welcome_url: String,
    pub contact_url: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconOidcConfig {
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub required_visas: Option<Vec<BTreeMap<String, String>>>,
}

impl BeaconOidcConfig {
    pub fn is_effective(&self) -> bool {
        self.issuer.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconBasicAuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BeaconBasicAuthConfig {
    pub fn is_effective(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconConfigurationConfig {
    #[serde(rename = "productionStatus")]
    pub production_status: ProductionStatus,
    #[serde(rename = "securityLevel")]
    pub security_level: SecurityLevel,
    pub granularity: Granularity,
    #[serde(rename = "hideLowerCounts", default = "default_hide_lower_counts")]
    pub hide_lower_counts: u64,
    pub oidc: Option<BeaconOidcConfig>,
    pub basic: Option<Vec<BeaconBasicAuthConfig>>,
}

fn default_hide_lower_counts() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconSchemaConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BeaconComplianceConfig {
    pub specification: String,
    pub schema_base_url: String,
    pub schema_version_tag: String,
    pub schemas: Vec<BeaconSchemaConfig>,
}

impl BeaconComplianceConfig {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}{path}", self.schema_base_url, self.schema_version_tag)
    }

    pub fn get_schema(&self, entity_id: &str) -> Result<&BeaconSchemaConfig> {
        self.schemas
            .iter()
            .find(|schema| schema.id == entity_id)
            .ok_or_else(|| anyhow!("[configuration] schema [{entity_id}] not found"))
    }

    pub fn get_schema_url(&self, entity_id: &str) -> Result<String> {
        Ok(self.url(&self.get_schema(entity_id)?.path))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconOntologyTermConfig {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BeaconEntryTypesConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub openapi: String,
    pub schema_id: String,
    pub main_path: String,
    pub item_path: Option<String>,
    pub ontology_term: BeaconOntologyTermConfig,
}

/// Metadata model for `beacon-aggregated.yaml` and `beacon-sensitive.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeaconConfig {
    pub base_path: String,
    pub info: BeaconInfoConfig,
    pub configuration: BeaconConfigurationConfig,
}

/// Metadata model for `beacon-common.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BeaconCommonConfig {
    pub organisation: BeaconOrganisationConfig,
    pub compliance: BeaconComplianceConfig,
    pub entry_types: Vec<BeaconEntryTypesConfig>,
}

/// Combines common and personality-specific Beacon configuration.
#[derive(Debug, Clone)]
pub struct BeaconContext {
    pub common: Arc<BeaconCommonConfig>,
    pub service: BeaconConfig,
    pub aggregated: bool,
}

impl BeaconContext {
    pub fn new(common: Arc<BeaconCommonConfig>, service: BeaconConfig, aggregated: bool) -> Self {
        Self { common, service, aggregated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_defaults() {
        let config: BeaconConfigurationConfig = serde_yaml::from_str(
            "productionStatus: TEST\nsecurityLevel: REGISTERED\ngranularity: count\n",
        )
        .unwrap();
        assert_eq!(config.hide_lower_counts, 1);
        assert!(config.oidc.is_none());
    }

    #[test]
    fn test_oidc_effectiveness() {
        let incomplete: BeaconOidcConfig =
            serde_yaml::from_str("issuer: https://op.example.org\n").unwrap();
        assert!(!incomplete.is_effective());

        let complete: BeaconOidcConfig = serde_yaml::from_str(
            "issuer: https://op.example.org\nclient_id: c\nclient_secret: s\n",
        )
        .unwrap();
        assert!(complete.is_effective());
    }

    #[test]
    fn test_compliance_urls() {
        let compliance: BeaconComplianceConfig = serde_yaml::from_str(
            "specification: Beacon v2.0\n\
             schemaBaseUrl: https://raw.example.org/beacon-v2/\n\
             schemaVersionTag: v2.0.0\n\
             schemas:\n\
               - {id: dataset, name: Dataset, description: d, path: /models/json/beacon-v2-default-model/datasets/defaultSchema.json}\n",
        )
        .unwrap();

        assert!(compliance.get_schema("dataset").is_ok());
        assert!(compliance.get_schema("missing").is_err());
        assert_eq!(
            compliance.get_schema_url("dataset").unwrap(),
            "https://raw.example.org/beacon-v2/v2.0.0/models/json/beacon-v2-default-model/datasets/defaultSchema.json"
        );
    }
}
