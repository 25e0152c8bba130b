//! The Beacon v2 request/response data model shared by both personalities.
//!
//! Serialisation mirrors the upstream framework JSON: camelCase keys and
//! absent (not null) optional fields.

use serde::{Deserialize, Deserializer, Serialize};

/// Beacon entities that are expected to be configured in
/// `beacon-common.yaml`. Not all entities are included, just the ones that
/// are supported; a new entry in the configuration file needs its entity id
/// added here as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "configuration")]
    Configuration,
    #[serde(rename = "entryTypes")]
    EntryTypes,
    #[serde(rename = "map")]
    Map,
    #[serde(rename = "filteringTerm")]
    FilteringTerm,
    #[serde(rename = "dataset")]
    Dataset,
    #[serde(rename = "genomicVariant")]
    GenomicVariant,
    #[serde(rename = "individual")]
    Individual,
}

impl EntityType {
    pub const ALL: [Self; 8] = [
        Self::Info,
        Self::Configuration,
        Self::EntryTypes,
        Self::Map,
        Self::FilteringTerm,
        Self::Dataset,
        Self::GenomicVariant,
        Self::Individual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Configuration => "configuration",
            Self::EntryTypes => "entryTypes",
            Self::Map => "map",
            Self::FilteringTerm => "filteringTerm",
            Self::Dataset => "dataset",
            Self::GenomicVariant => "genomicVariant",
            Self::Individual => "individual",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|entity| entity.as_str() == id)
    }
}

/// Beacon response granularity options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Boolean,
    Count,
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncludeResponses {
    ALL,
    HIT,
    MISS,
    NONE,
}

impl IncludeResponses {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ALL" => Some(Self::ALL),
            "HIT" => Some(Self::HIT),
            "MISS" => Some(Self::MISS),
            "NONE" => Some(Self::NONE),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!")]
    NotEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFilter {
    pub id: String,
    #[serde(rename = "includeDescendantTerms", default = "default_true")]
    pub include_descendant_terms: bool,
    // Accepted for compatibility; not used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<FilterOperator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl QueryFilter {
    pub fn with_id(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            include_descendant_terms: true,
            similarity: None,
            operator: None,
            value: None,
            scope: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_page: Option<String>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: Some(10),
            skip: Some(0),
            current_page: None,
            next_page: None,
            previous_page: None,
        }
    }
}

/// `start`/`end` accept one or two comma-separated non-negative integers in
/// the query string and a JSON array in a POST body.
fn deserialize_position_range<'de, D>(deserializer: D) -> Result<Option<Vec<u64>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawRange {
        Numbers(Vec<u64>),
        Text(String),
    }

    let raw: Option<RawRange> = Option::deserialize(deserializer)?;
    let positions = match raw {
        None => return Ok(None),
        Some(RawRange::Numbers(numbers)) => numbers,
        Some(RawRange::Text(text)) => {
            let mut positions = Vec::new();
            for item in text.split(',') {
                let trimmed = item.trim();
                if trimmed.is_empty() {
                    continue;
                }
                positions.push(trimmed.parse::<u64>().map_err(|_| {
                    D::Error::custom("expected one or two (comma-separated) non-negative integers")
                })?);
            }
            positions
        }
    };

    if positions.is_empty() || positions.len() > 2 {
        return Err(D::Error::custom(
            "expected one or two (comma-separated) non-negative integers",
        ));
    }
    Ok(Some(positions))
}

const SEQUENCE_CHARS: &str = "ACGTUNRYSWKMBDHV.-";

fn is_sequence_string(value: &str) -> bool {
    value.chars().all(|c| SEQUENCE_CHARS.contains(c))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariantQueryParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gene_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mate_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aminoacid_change: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genomic_allele_short_form: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_bases: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_bases: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_position_range")]
    pub start: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_position_range")]
    pub end: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_min_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_max_length: Option<u64>,
}

impl VariantQueryParameters {
    /// Value-level validation performed after deserialisation; violations
    /// turn into 422 responses.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("referenceBases", &self.reference_bases),
            ("alternateBases", &self.alternate_bases),
        ] {
            if let Some(bases) = value
                && !is_sequence_string(bases)
            {
                return Err(format!("{field} is not a valid sequence string"));
            }
        }
        if self.variant_max_length == Some(0) {
            return Err("variantMaxLength must be positive".to_owned());
        }
        Ok(())
    }

    pub fn has_values(&self) -> bool {
        self.assembly_id.is_some()
            || self.gene_id.is_some()
            || self.mate_name.is_some()
            || self.aminoacid_change.is_some()
            || self.genomic_allele_short_form.is_some()
            || self.reference_name.is_some()
            || self.reference_bases.is_some()
            || self.alternate_bases.is_some()
            || self.start.is_some()
            || self.end.is_some()
            || self.variant_type.is_some()
            || self.variant_min_length.is_some()
            || self.variant_max_length.is_some()
    }

    /// Parameters we accept for validation but cannot serve; their presence
    /// yields an empty result set. An out-of-set assembly makes the
    /// parameters insufficient instead.
    pub fn has_unsupported_values(&self) -> bool {
        self.gene_id.is_some()
            || self.mate_name.is_some()
            || self.aminoacid_change.is_some()
            || self.genomic_allele_short_form.is_some()
            || self.variant_min_length.is_some()
            || self.variant_max_length.is_some()
    }

    pub fn has_sufficient_values(&self) -> bool {
        self.assembly()
            .is_some()
            && self.reference_name.is_some()
            && self.reference_bases.is_some()
            && self.alternate_bases.is_some()
            && self.start.as_ref().is_some_and(|start| !start.is_empty())
    }

    pub fn is_not_sufficient(&self) -> bool {
        self.has_unsupported_values() || !self.has_sufficient_values()
    }

    pub fn assembly(&self) -> Option<crate::registry::BeaconAssembly> {
        self.assembly_id.as_deref().and_then(|id| id.parse().ok())
    }

    pub fn start0(&self) -> Option<u64> {
        self.start.as_ref().and_then(|start| start.first()).copied()
    }
}

/// The sensitive personality's client sends variant parameters as a
/// single-element list; both shapes are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestParams {
    One(VariantQueryParameters),
    Many(Vec<VariantQueryParameters>),
}

impl RequestParams {
    pub fn first(&self) -> Option<&VariantQueryParameters> {
        match self {
            Self::One(params) => Some(params),
            Self::Many(list) => list.first(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_parameters: Option<RequestParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<QueryFilter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_resultset_responses: Option<IncludeResponses>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_granularity: Option<Granularity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_mode: Option<bool>,
}

impl BeaconQuery {
    /// Effective `(skip, limit)` with the documented defaults.
    pub fn page(&self) -> (u64, u64) {
        let pagination = self.pagination.as_ref();
        let skip = pagination.and_then(|p| p.skip).unwrap_or(0);
        let limit = pagination.and_then(|p| p.limit).unwrap_or(10);
        (skip, limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaPerEntity {
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "schema")]
    pub schema_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestMeta {
    pub api_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_schemas: Option<Vec<SchemaPerEntity>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconRequest {
    pub meta: RequestMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<BeaconQuery>,
}

impl BeaconRequest {
    pub fn query(&self) -> BeaconQuery {
        self.query.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedRequestSummary {
    pub api_version: String,
    pub requested_schemas: Vec<SchemaPerEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<QueryFilter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_parameters: Option<RequestParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_resultset_responses: Option<IncludeResponses>,
    pub pagination: Pagination,
    pub requested_granularity: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_mode: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub beacon_id: String,
    pub api_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_request_summary: Option<ReceivedRequestSummary>,
    pub returned_schemas: Vec<SchemaPerEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_granularity: Option<Granularity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_mode: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconError {
    pub error_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconQueryResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_total_results: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    pub id: String,
    pub set_type: String,
    pub exists: bool,
    pub results_count: u64,
    pub results: Vec<serde_json::Value>,
}

impl ResultSet {
    pub fn counted(id: &str, count: u64) -> Self {
        Self {
            id: id.to_owned(),
            set_type: "dataset".to_owned(),
            exists: true,
            results_count: count,
            results: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSets {
    pub result_sets: Vec<ResultSet>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionsList {
    pub collections: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeaconResponse {
    pub meta: ResponseMeta,
    #[serde(rename = "responseSummary", skip_serializing_if = "Option::is_none")]
    pub response_summary: Option<BeaconQueryResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BeaconError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_range_from_string() {
        let params: VariantQueryParameters =
            serde_json::from_str(r#"{"start": "12344"}"#).unwrap();
        assert_eq!(params.start, Some(vec![12344]));

        let params: VariantQueryParameters =
            serde_json::from_str(r#"{"start": "100,200"}"#).unwrap();
        assert_eq!(params.start, Some(vec![100, 200]));

        assert!(serde_json::from_str::<VariantQueryParameters>(r#"{"start": "a,b"}"#).is_err());
        assert!(serde_json::from_str::<VariantQueryParameters>(r#"{"start": "1,2,3"}"#).is_err());
    }

    #[test]
    fn test_position_range_from_array() {
        let params: VariantQueryParameters =
            serde_json::from_str(r#"{"start": [12344]}"#).unwrap();
        assert_eq!(params.start0(), Some(12344));
    }

    #[test]
    fn test_sequence_string_validation() {
        let valid: VariantQueryParameters =
            serde_json::from_str(r#"{"referenceBases": "ACGT", "alternateBases": "N-"}"#).unwrap();
        assert!(valid.validate().is_ok());

        let invalid: VariantQueryParameters =
            serde_json::from_str(r#"{"referenceBases": "AXGT"}"#).unwrap();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_sufficiency_rules() {
        let params: VariantQueryParameters = serde_json::from_str(
            r#"{"assemblyId": "GRCh37", "referenceName": "1", "referenceBases": "A",
                "alternateBases": "G", "start": [12344]}"#,
        )
        .unwrap();
        assert!(params.has_sufficient_values());
        assert!(!params.is_not_sufficient());

        // An unknown assembly makes the parameters insufficient, not unsupported:
        let params: VariantQueryParameters = serde_json::from_str(
            r#"{"assemblyId": "hg19", "referenceName": "1", "referenceBases": "A",
                "alternateBases": "G", "start": [12344]}"#,
        )
        .unwrap();
        assert!(!params.has_unsupported_values());
        assert!(params.is_not_sufficient());

        // geneId is accepted but unsupported:
        let params: VariantQueryParameters =
            serde_json::from_str(r#"{"geneId": "BRCA1"}"#).unwrap();
        assert!(params.has_unsupported_values());
    }

    #[test]
    fn test_request_params_list_shape() {
        let query: BeaconQuery = serde_json::from_str(
            r#"{"requestParameters": [{"assemblyId": "GRCh38"}]}"#,
        )
        .unwrap();
        let params = query.request_parameters.unwrap();
        assert_eq!(params.first().unwrap().assembly_id.as_deref(), Some("GRCh38"));
    }

    #[test]
    fn test_optional_fields_are_absent_in_json() {
        let response = BeaconQueryResponse { exists: false, num_total_results: None };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"exists":false}"#);
    }
}
