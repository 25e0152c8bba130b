//! Per-personality Beacon state: prepared framework payloads, response
//! shaping (granularity, counts, records), request summaries and the
//! authentication gate.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{Context as _, Result, bail};

use crate::beacon::config::BeaconContext;
use crate::beacon::framework::{
    BeaconConfiguration, BeaconInfo, BeaconMap, EntryTypes, FilteringTerms, ServiceInfo,
    create_beacon_info, create_configuration, create_endpoint_map, create_entry_types,
    create_filtering_terms, create_service_info, get_schemas,
};
use crate::beacon::model::{
    BeaconQuery, BeaconQueryResponse, BeaconRequest, BeaconResponse, CollectionsList, EntityType,
    Granularity, ReceivedRequestSummary, RequestMeta, ResponseMeta, ResultSets, SchemaPerEntity,
};
use crate::config::encode_basic_credential;
use crate::oidc::OidcVerifier;

/// General Beacon helper that aligns API data with the configuration values.
pub struct BeaconSetup {
    context: BeaconContext,
    base_path: String,
    app_version: String,
    service_info: ServiceInfo,
    entry_types: EntryTypes,
    configuration: BeaconConfiguration,
    filtering_terms: FilteringTerms,
    response_schemas: HashMap<EntityType, SchemaPerEntity>,
    visible_entries: Vec<EntityType>,
    hide_lower_counts: u64,
    oidc_verifier: Option<OidcVerifier>,
    basic_headers: Option<HashSet<String>>,
    info_cache: Mutex<HashMap<String, BeaconInfo>>,
    map_cache: Mutex<HashMap<String, BeaconMap>>,
}

impl BeaconSetup {
    /// Builds the personality state, including the OIDC verifier when one is
    /// configured. Configuring both OIDC and Basic authentication is a fatal
    /// configuration error.
    pub async fn new(context: BeaconContext, app_version: &str) -> Result<Self> {
        let visible_entries = if context.aggregated {
            // The aggregated Beacon exposes only /datasets and /g_variants:
            vec![EntityType::Dataset, EntityType::GenomicVariant]
        } else {
            // The individual-based Beacon exposes only /individuals:
            vec![EntityType::Individual]
        };

        let base_path = context.service.base_path.clone();
        let service_info = create_service_info(&context, app_version);
        let entry_types = create_entry_types(&context.common, &visible_entries)?;
        let configuration = create_configuration(&context, &entry_types)?;
        let response_schemas = get_schemas(&context.common.compliance)?;

        // Validate the endpoint map derivation once, at startup:
        create_endpoint_map(&context.common, &visible_entries, "http://localhost")
            .context("Cannot derive the Beacon endpoint map")?;

        let mut oidc_verifier = None;
        if let Some(oidc) = context.service.configuration.oidc.as_ref().filter(|c| c.is_effective())
        {
            let issuer = oidc.issuer.as_deref().unwrap_or_default();
            let client_id = oidc.client_id.as_deref().unwrap_or_default();
            oidc_verifier =
                Some(OidcVerifier::init(issuer, client_id, oidc.required_visas.clone()).await?);
            tracing::info!("[{base_path}] OIDC authentication is enforced.");
        }

        let mut basic_headers = None;
        if let Some(basic) = &context.service.configuration.basic
            && !basic.is_empty()
        {
            let credentials: HashSet<String> = basic
                .iter()
                .filter(|item| item.is_effective())
                .map(|item| {
                    encode_basic_credential(
                        item.username.as_deref().unwrap_or_default(),
                        item.password.as_deref().unwrap_or_default(),
                    )
                })
                .collect();

            if credentials.is_empty() {
                basic_headers = None;
            } else {
                tracing::info!("[{base_path}] Basic authentication is enforced.");
                basic_headers = Some(credentials);
            }
        }

        if oidc_verifier.is_some() && basic_headers.is_some() {
            bail!("[{base_path}] Cannot use both OIDC and Basic auth - configure just one of them");
        }
        if oidc_verifier.is_none() && basic_headers.is_none() {
            tracing::info!("[{base_path}] No user-authentication is enforced.");
        }

        Ok(Self {
            hide_lower_counts: context.service.configuration.hide_lower_counts,
            context,
            base_path,
            app_version: app_version.to_owned(),
            service_info,
            entry_types,
            configuration,
            filtering_terms: create_filtering_terms(),
            response_schemas,
            visible_entries,
            oidc_verifier,
            basic_headers,
            info_cache: Mutex::new(HashMap::new()),
            map_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn is_aggregated(&self) -> bool {
        self.context.aggregated
    }

    pub fn hide_lower_counts(&self) -> u64 {
        self.hide_lower_counts
    }

    pub fn service_info(&self) -> &ServiceInfo {
        &self.service_info
    }

    pub fn entry_types(&self) -> &EntryTypes {
        &self.entry_types
    }

    pub fn configuration(&self) -> &BeaconConfiguration {
        &self.configuration
    }

    pub fn filtering_terms(&self) -> &FilteringTerms {
        &self.filtering_terms
    }

    fn url_with_path(&self, base_url: &str) -> String {
        let mut url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.base_path.trim_start_matches('/')
        );
        if !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    /// BeaconInfo for the personality, cached per incoming base URL.
    pub fn beacon_info(&self, base_url: &str) -> BeaconInfo {
        let url = self.url_with_path(base_url);
        if let Ok(mut cache) = self.info_cache.lock() {
            return cache
                .entry(url.clone())
                .or_insert_with(|| create_beacon_info(&self.context, &url, &self.app_version))
                .clone();
        }
        create_beacon_info(&self.context, &url, &self.app_version)
    }

    /// Endpoint map for the personality, cached per incoming base URL.
    pub fn map(&self, base_url: &str) -> Result<BeaconMap> {
        let url = self.url_with_path(base_url);
        if let Ok(cache) = self.map_cache.lock()
            && let Some(map) = cache.get(&url)
        {
            return Ok(map.clone());
        }

        let map = create_endpoint_map(&self.context.common, &self.visible_entries, &url)?;
        if let Ok(mut cache) = self.map_cache.lock() {
            cache.insert(url, map.clone());
        }
        Ok(map)
    }

    /// Creates the implicit request (with meta defaults) for GET requests.
    pub fn request_for_query(&self, query: BeaconQuery, schema: Option<EntityType>) -> BeaconRequest {
        let requested_schemas = schema
            .and_then(|entity| self.response_schemas.get(&entity))
            .map(|schema| vec![schema.clone()]);
        BeaconRequest {
            meta: RequestMeta {
                api_version: self.service_info.service_type.version.clone(),
                requested_schemas,
            },
            query: Some(query),
        }
    }

    pub fn info_response_meta(&self, entity_type: EntityType) -> ResponseMeta {
        let schemas = self
            .response_schemas
            .get(&entity_type)
            .map(|schema| vec![schema.clone()])
            .unwrap_or_default();
        ResponseMeta {
            beacon_id: self.service_info.id.clone(),
            api_version: self.service_info.service_type.version.clone(),
            received_request_summary: None,
            returned_schemas: schemas,
            returned_granularity: None,
            test_mode: None,
        }
    }

    pub fn query_response_meta(
        &self,
        request: &BeaconRequest,
        entity_type: Option<EntityType>,
    ) -> ResponseMeta {
        let schemas = entity_type
            .and_then(|entity| self.response_schemas.get(&entity))
            .map(|schema| vec![schema.clone()])
            .unwrap_or_default();
        let query = request.query();

        ResponseMeta {
            beacon_id: self.service_info.id.clone(),
            api_version: self.service_info.service_type.version.clone(),
            received_request_summary: Some(self.request_summary(request)),
            returned_schemas: schemas,
            returned_granularity: Some(self.granularity(request)),
            test_mode: query.test_mode,
        }
    }

    fn request_summary(&self, request: &BeaconRequest) -> ReceivedRequestSummary {
        let query = request.query();
        ReceivedRequestSummary {
            api_version: request.meta.api_version.clone(),
            requested_schemas: request.meta.requested_schemas.clone().unwrap_or_default(),
            filters: query.filters.clone(),
            request_parameters: query.request_parameters.clone(),
            include_resultset_responses: query.include_resultset_responses,
            pagination: query.pagination.clone().unwrap_or_default(),
            requested_granularity: self.granularity(request),
            test_mode: query.test_mode,
        }
    }

    /// Resolved granularity: the requested one, falling back to the
    /// configured default, falling back to boolean.
    pub fn granularity(&self, request: &BeaconRequest) -> Granularity {
        request
            .query()
            .requested_granularity
            .or(self.configuration.security_attributes.default_granularity)
            .unwrap_or(Granularity::Boolean)
    }

    fn count_value(&self, request: &BeaconRequest, count: u64) -> Option<u64> {
        (self.granularity(request) != Granularity::Boolean).then_some(count)
    }

    pub fn is_show_records(&self, request: &BeaconRequest) -> bool {
        self.granularity(request) == Granularity::Record
    }

    /// Shapes a result-set response according to the resolved granularity.
    pub fn response(
        &self,
        request: &BeaconRequest,
        result_sets: ResultSets,
        entity_type: EntityType,
    ) -> BeaconResponse {
        let count = result_sets.result_sets.len() as u64;
        let summary = BeaconQueryResponse {
            exists: count > 0,
            num_total_results: self.count_value(request, count),
        };

        let response = self
            .is_show_records(request)
            .then(|| serde_json::to_value(&result_sets).unwrap_or_default());

        BeaconResponse {
            meta: self.query_response_meta(request, Some(entity_type)),
            response_summary: Some(summary),
            response,
            error: None,
        }
    }

    /// Shapes a collection response (datasets listing).
    pub fn collection_response(
        &self,
        request: &BeaconRequest,
        results: Vec<serde_json::Value>,
        entity_type: EntityType,
    ) -> BeaconResponse {
        let count = results.len() as u64;
        let summary = BeaconQueryResponse {
            exists: count > 0,
            num_total_results: self.count_value(request, count),
        };

        let response = self.is_show_records(request).then(|| {
            serde_json::to_value(CollectionsList { collections: results }).unwrap_or_default()
        });

        BeaconResponse {
            meta: self.query_response_meta(request, Some(entity_type)),
            response_summary: Some(summary),
            response,
            error: None,
        }
    }

    /// Authenticates the `Authorization` header value. Returns the required
    /// authentication scheme (`"Basic"` / `"Bearer"`) when the header was
    /// not accepted, `None` on success.
    pub async fn authenticate(&self, authorization_header: Option<&str>) -> Option<&'static str> {
        let header = authorization_header.unwrap_or("");

        if let Some(verifier) = &self.oidc_verifier {
            let mut valid = false;
            if let Some(token) = header.strip_prefix("Bearer ") {
                valid = verifier.verify(token.trim()).await;
            } else {
                tracing::debug!(
                    "[{}] Authorization header is missing from the request or it does not begin \
                     with 'Bearer '.",
                    self.base_path
                );
            }
            if !valid {
                return Some("Bearer");
            }
        }

        if let Some(basic_headers) = &self.basic_headers {
            if !header.starts_with("Basic ") {
                tracing::debug!(
                    "[{}] Authorization header is missing from the request or it does not begin \
                     with 'Basic '.",
                    self.base_path
                );
            }

            let valid = basic_headers.contains(header);
            tracing::debug!("[{}] Basic authentication valid: {valid}", self.base_path);
            if !valid {
                return Some("Basic");
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::config::{BeaconCommonConfig, BeaconConfig};
    use crate::beacon::model::ResultSet;
    use std::sync::Arc;

    fn common_yaml() -> String {
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

        format!(
            "organisation:\n  id: org\n  name: Org\n  welcomeUrl: https://org.example.org\n\
             compliance:\n  specification: Beacon v2.0\n  schemaBaseUrl: https://schemas.example.org/\n\
             \x20 schemaVersionTag: v2.0.0\n  schemas:\n{schemas}\n\
             entryTypes:\n\
             \x20 - id: dataset\n    name: Dataset\n    description: D\n    openapi: /d.yaml\n\
             \x20   schemaId: dataset\n    mainPath: /datasets\n\
             \x20   ontologyTerm: {{id: 'NCIT:C47824', label: Data set}}\n\
             \x20 - id: genomicVariant\n    name: Variants\n    description: D\n    openapi: /g.yaml\n\
             \x20   schemaId: genomicVariant\n    mainPath: /g_variants\n\
             \x20   ontologyTerm: {{id: 'ENSGLOSSARY:0000092', label: Variant}}\n\
             \x20 - id: individual\n    name: Individuals\n    description: D\n    openapi: /i.yaml\n\
             \x20   schemaId: individual\n    mainPath: /individuals\n\
             \x20   ontologyTerm: {{id: 'NCIT:C25190', label: Person}}\n"
        )
    }

    fn service_yaml(granularity: &str) -> String {
        format!(
            "base_path: /api/beacon\n\
             info:\n  id: org.example.beacon\n  name: Test Beacon\n  version: v2.0.0\n\
             \x20 environment: test\n\
             configuration:\n  productionStatus: TEST\n  securityLevel: REGISTERED\n\
             \x20 granularity: {granularity}\n"
        )
    }

    async fn setup(granularity: &str, aggregated: bool) -> BeaconSetup {
        let common: BeaconCommonConfig = serde_yaml::from_str(&common_yaml()).unwrap();
        let service: BeaconConfig = serde_yaml::from_str(&service_yaml(granularity)).unwrap();
        let context = BeaconContext::new(Arc::new(common), service, aggregated);
        BeaconSetup::new(context, "0.4.1").await.unwrap()
    }

    fn result_sets(counts: &[u64]) -> ResultSets {
        ResultSets {
            result_sets: counts
                .iter()
                .enumerate()
                .map(|(index, count)| ResultSet::counted(&format!("ds-{index}"), *count))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_boolean_granularity_hides_count_and_records() {
        let setup = setup("boolean", false).await;
        let request = setup.request_for_query(BeaconQuery::default(), None);
        let response = setup.response(&request, result_sets(&[4]), EntityType::Individual);

        let summary = response.response_summary.unwrap();
        assert!(summary.exists);
        assert!(summary.num_total_results.is_none());
        assert!(response.response.is_none());
    }

    #[tokio::test]
    async fn test_count_granularity_hides_records() {
        let setup = setup("count", false).await;
        let request = setup.request_for_query(BeaconQuery::default(), None);
        let response = setup.response(&request, result_sets(&[4, 5]), EntityType::Individual);

        let summary = response.response_summary.unwrap();
        assert_eq!(summary.num_total_results, Some(2));
        assert!(response.response.is_none());
    }

    #[tokio::test]
    async fn test_record_granularity_shows_all() {
        let setup = setup("record", false).await;
        let request = setup.request_for_query(BeaconQuery::default(), None);
        let response = setup.response(&request, result_sets(&[4]), EntityType::Individual);

        assert_eq!(response.response_summary.unwrap().num_total_results, Some(1));
        let records = response.response.unwrap();
        assert_eq!(records["resultSets"][0]["resultsCount"], 4);
    }

    #[tokio::test]
    async fn test_requested_granularity_overrides_default() {
        let setup = setup("boolean", false).await;
        let query = BeaconQuery {
            requested_granularity: Some(Granularity::Count),
            ..Default::default()
        };
        let request = setup.request_for_query(query, None);
        assert_eq!(setup.granularity(&request), Granularity::Count);
    }

    #[tokio::test]
    async fn test_request_summary_fills_defaults() {
        let setup = setup("count", true).await;
        let request = setup.request_for_query(BeaconQuery::default(), None);
        let meta = setup.query_response_meta(&request, Some(EntityType::Dataset));

        let summary = meta.received_request_summary.unwrap();
        assert_eq!(summary.pagination.skip, Some(0));
        assert_eq!(summary.pagination.limit, Some(10));
        assert!(summary.requested_schemas.is_empty());
    }

    #[tokio::test]
    async fn test_no_auth_configured_accepts_everything() {
        let setup = setup("count", true).await;
        assert!(setup.authenticate(None).await.is_none());
        assert!(setup.authenticate(Some("Bearer junk")).await.is_none());
    }

    #[tokio::test]
    async fn test_basic_auth_gate() {
        let common: BeaconCommonConfig = serde_yaml::from_str(&common_yaml()).unwrap();
        let service_yaml = format!(
            "{}  basic:\n    - {{username: user, password: pass}}\n",
            service_yaml("count")
        );
        let service: BeaconConfig = serde_yaml::from_str(&service_yaml).unwrap();
        let context = BeaconContext::new(Arc::new(common), service, true);
        let setup = BeaconSetup::new(context, "0.4.1").await.unwrap();

        assert_eq!(setup.authenticate(None).await, Some("Basic"));
        assert_eq!(setup.authenticate(Some("Basic bogus")).await, Some("Basic"));
        let valid = encode_basic_credential("user", "pass");
        assert!(setup.authenticate(Some(&valid)).await.is_none());
    }
}
