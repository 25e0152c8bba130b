//! Prepared payloads for the Beacon Framework API: info, service-info,
//! configuration, entry types, endpoint map and filtering terms. All are
//! pure derivations of the configuration files, built once per personality.

use std::collections::HashMap;

use anyhow::{Context as _, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::beacon::config::{
    BeaconCommonConfig, BeaconComplianceConfig, BeaconContext, BeaconEnvironment, ProductionStatus,
    SecurityLevel,
};
use crate::beacon::model::{EntityType, Granularity, SchemaPerEntity};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconInfoOrganization {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconInfo {
    pub id: String,
    pub name: String,
    pub api_version: String,
    pub environment: BeaconEnvironment,
    pub organization: BeaconInfoOrganization,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfoType {
    pub artifact: String,
    pub group: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeaconServiceInfoOrganization {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceInfoType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub organization: BeaconServiceInfoOrganization,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<BeaconEnvironment>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceToSchema {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub reference_to_schema_definition: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OntologyTerm {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryType {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub part_of_specification: String,
    pub default_schema: ReferenceToSchema,
    pub ontology_term_for_this_type: OntologyTerm,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryTypes {
    pub entry_types: HashMap<String, EntryType>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub entry_type: EntityType,
    #[serde(rename = "openAPIEndpointsDefinition")]
    pub open_api_endpoints_definition: String,
    pub root_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_entry_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeaconMap {
    #[serde(rename = "$schema")]
    pub schema_url: String,
    #[serde(rename = "endpointSets")]
    pub endpoint_sets: HashMap<String, Endpoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaturityAttributes {
    pub production_status: ProductionStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_granularity: Option<Granularity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_levels: Option<Vec<SecurityLevel>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconConfiguration {
    #[serde(rename = "$schema")]
    pub schema_url: String,
    pub entry_types: HashMap<String, EntryType>,
    pub maturity_attributes: MaturityAttributes,
    pub security_attributes: SecurityAttributes,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_space_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iri_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteringTermInResponse {
    #[serde(rename = "type")]
    pub term_type: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilteringTerms {
    pub resources: Vec<Resource>,
    pub filtering_terms: Vec<FilteringTermInResponse>,
}

// ---------------------------------------------------------------- //
// Builders over the configuration files
// ---------------------------------------------------------------- //

pub fn create_beacon_info(context: &BeaconContext, base_url: &str, app_version: &str) -> BeaconInfo {
    let info = &context.service.info;
    let organisation = &context.common.organisation;

    BeaconInfo {
        id: info.id.clone(),
        name: info.name.clone(),
        api_version: context.common.compliance.schema_version_tag.clone(),
        environment: info.environment,
        organization: BeaconInfoOrganization {
            id: organisation.id.clone(),
            name: organisation.name.clone(),
            description: organisation.description.clone(),
            address: organisation.address.clone(),
            welcome_url: Some(organisation.welcome_url.clone()),
            contact_url: organisation.contact_url.clone(),
            logo_url: organisation.logo_url.clone(),
        },
        description: info.description.clone(),
        version: Some(format!("v{app_version}")),
        welcome_url: Some(base_url.to_owned()),
        alternative_url: info.alternative_url.clone(),
        create_date_time: info.created_at,
        update_date_time: info.updated_at,
        info: info.info.clone(),
    }
}

pub fn create_service_info(context: &BeaconContext, app_version: &str) -> ServiceInfo {
    let info = &context.service.info;
    let organisation = &context.common.organisation;

    ServiceInfo {
        id: info.id.clone(),
        name: info.name.clone(),
        service_type: ServiceInfoType {
            artifact: "beacon".to_owned(),
            group: "org.ga4gh".to_owned(),
            version: context.common.compliance.schema_version_tag.clone(),
        },
        description: info.description.clone(),
        organization: BeaconServiceInfoOrganization {
            name: organisation.name.clone(),
            url: organisation.welcome_url.clone(),
        },
        contact_url: organisation.contact_url.clone(),
        documentation_url: info.documentation_url.clone(),
        created_at: info.created_at,
        updated_at: info.updated_at,
        environment: Some(info.environment),
        version: format!("v{app_version}"),
    }
}

pub fn get_schema_ref(config: &BeaconCommonConfig, entity_id: &str) -> Result<ReferenceToSchema> {
    let schema = config.compliance.get_schema(entity_id)?;
    Ok(ReferenceToSchema {
        id: schema.id.clone(),
        name: schema.name.clone(),
        description: Some(schema.description.clone()),
        reference_to_schema_definition: config.compliance.url(&schema.path),
    })
}

/// Schemas per entity type, checked for completeness: every supported
/// [`EntityType`] must have its schema declared in the configuration.
pub fn get_schemas(config: &BeaconComplianceConfig) -> Result<HashMap<EntityType, SchemaPerEntity>> {
    let mut result = HashMap::new();
    for schema in &config.schemas {
        let Some(entity) = EntityType::from_id(&schema.id) else {
            continue;
        };
        result.insert(
            entity,
            SchemaPerEntity {
                entity_type: schema.id.clone(),
                schema_url: config.url(&schema.path),
            },
        );
    }

    for entity in EntityType::ALL {
        if !result.contains_key(&entity) {
            return Err(anyhow!("[configuration] Schema missing for {}", entity.as_str()));
        }
    }

    Ok(result)
}

pub fn create_endpoint_map(
    config: &BeaconCommonConfig,
    permitted_entry_type_ids: &[EntityType],
    base_url: &str,
) -> Result<BeaconMap> {
    let mut endpoints = HashMap::new();
    for entry in &config.entry_types {
        let Some(entity) = EntityType::from_id(&entry.id) else {
            continue;
        };
        if !permitted_entry_type_ids.contains(&entity) {
            continue;
        }

        let root_url = join_url(base_url, &entry.main_path);
        let single_entry_url = entry.item_path.as_deref().map(|path| join_url(base_url, path));

        endpoints.insert(
            entry.id.clone(),
            Endpoint {
                entry_type: entity,
                open_api_endpoints_definition: config.compliance.url(&entry.openapi),
                root_url,
                single_entry_url,
            },
        );
    }

    Ok(BeaconMap {
        schema_url: config.compliance.get_schema_url(EntityType::Map.as_str())?,
        endpoint_sets: endpoints,
    })
}

pub fn create_entry_types(
    config: &BeaconCommonConfig,
    permitted_entry_type_ids: &[EntityType],
) -> Result<EntryTypes> {
    let mut result = HashMap::new();
    for entry_type in &config.entry_types {
        let Some(entity) = EntityType::from_id(&entry_type.id) else {
            continue;
        };
        if !permitted_entry_type_ids.contains(&entity) {
            continue;
        }

        result.insert(
            entry_type.id.clone(),
            EntryType {
                id: entry_type.id.clone(),
                name: entry_type.name.clone(),
                description: Some(entry_type.description.clone()),
                part_of_specification: config.compliance.specification.clone(),
                default_schema: get_schema_ref(config, &entry_type.schema_id)
                    .with_context(|| format!("entry type [{}]", entry_type.id))?,
                ontology_term_for_this_type: OntologyTerm {
                    id: entry_type.ontology_term.id.clone(),
                    label: Some(entry_type.ontology_term.label.clone()),
                },
            },
        );
    }
    Ok(EntryTypes { entry_types: result })
}

pub fn create_configuration(
    context: &BeaconContext,
    entry_types: &EntryTypes,
) -> Result<BeaconConfiguration> {
    let params = &context.service.configuration;
    Ok(BeaconConfiguration {
        schema_url: context
            .common
            .compliance
            .get_schema_url(EntityType::Configuration.as_str())?,
        maturity_attributes: MaturityAttributes {
            production_status: params.production_status,
        },
        security_attributes: SecurityAttributes {
            // We stick to one security level only.
            security_levels: Some(vec![params.security_level]),
            default_granularity: Some(params.granularity),
        },
        entry_types: entry_types.entry_types.clone(),
    })
}

pub fn create_filtering_terms() -> FilteringTerms {
    // Currently filtering terms are not implemented/supported.
    FilteringTerms {
        resources: Vec::new(),
        filtering_terms: Vec::new(),
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common_config() -> BeaconCommonConfig {
        let schemas = EntityType::ALL
            .into_iter()
            .map(|entity| {
                format!(
                    "  - {{id: {id}, name: N, description: D, path: /models/{id}.json}}",
                    id = entity.as_str()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        serde_yaml::from_str(&format!(
            "organisation:\n  id: org\n  name: Org\n  welcomeUrl: https://org.example.org\n\
             compliance:\n  specification: Beacon v2.0\n  schemaBaseUrl: https://schemas.example.org/\n\
             \x20 schemaVersionTag: v2.0.0\n  schemas:\n{schemas}\n\
             entryTypes:\n\
             \x20 - id: dataset\n    name: Dataset\n    description: D\n    openapi: /d.yaml\n\
             \x20   schemaId: dataset\n    mainPath: /datasets\n    itemPath: /datasets/{{id}}\n\
             \x20   ontologyTerm: {{id: 'NCIT:C47824', label: Data set}}\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_schemas_completeness() {
        let config = common_config();
        let schemas = get_schemas(&config.compliance).unwrap();
        assert_eq!(schemas.len(), EntityType::ALL.len());
    }

    #[test]
    fn test_schemas_missing_entity_is_an_error() {
        let mut config = common_config();
        config.compliance.schemas.retain(|schema| schema.id != "individual");
        assert!(get_schemas(&config.compliance).is_err());
    }

    #[test]
    fn test_endpoint_map_respects_permitted_entries() {
        let config = common_config();
        let map = create_endpoint_map(
            &config,
            &[EntityType::Dataset, EntityType::GenomicVariant],
            "http://localhost:8080",
        )
        .unwrap();
        assert!(map.endpoint_sets.contains_key("dataset"));
        assert_eq!(
            map.endpoint_sets["dataset"].root_url,
            "http://localhost:8080/datasets"
        );

        let empty = create_endpoint_map(&config, &[EntityType::Individual], "http://localhost")
            .unwrap();
        assert!(empty.endpoint_sets.is_empty());
    }
}
