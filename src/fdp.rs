//! FAIR Data Point endpoint family.
//!
//! Publishes the same corpus as RDF metadata: the service description, the
//! catalog listing, per-catalog and per-dataset records, metadata profiles
//! and their SHACL shapes. Responses are rendered from the embedded
//! templates (`templates.yaml`) against the live registry state.

pub mod config;
pub mod graph;
pub mod router;
pub mod shacl;
pub mod template;

use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_yaml::Value;

use crate::fdp::config::{DateOrDateTime, FdpConfig};
use crate::fdp::graph::Graph;
use crate::fdp::template::{GraphGenerator, ParamMap};
use crate::registry::DataRegistry;

pub use router::{FdpState, fdp_router};

const DCT_CONFORMS_TO: &str = "http://purl.org/dc/terms/conformsTo";

pub struct FdpSetup {
    pub config: FdpConfig,
    generator: GraphGenerator,
}

impl FdpSetup {
    pub fn new(config: FdpConfig) -> Result<Self> {
        let generator = GraphGenerator::new(&config)?;
        Ok(Self { config, generator })
    }

    /// The URL path the FDP endpoints are mounted under.
    pub fn base_path(&self) -> &str {
        self.generator.base_path()
    }

    fn id_to_url(&self, base_url: &str, tmpl_id: &str, ids: &[String]) -> Value {
        Value::Sequence(
            ids.iter()
                .map(|id| Value::String(self.generator.item_url(base_url, tmpl_id, Some(id))))
                .collect(),
        )
    }

    /// The latest dataset state update time across all catalogs.
    fn last_modified(&self, registry: &DataRegistry) -> DateTime<Utc> {
        let mut max_modified = self.config.since.as_datetime();
        for dataset in registry.fdp.datasets.values() {
            if dataset.updated > max_modified {
                max_modified = dataset.updated;
            }
        }
        max_modified
    }

    /// The FDP service description (the fairdp and catalogs templates
    /// rendered into one graph).
    pub fn get_service_info(
        &self,
        registry: &Arc<RwLock<DataRegistry>>,
        base_url: &str,
    ) -> Result<Graph> {
        let Ok(guard) = registry.read() else {
            return self.generator.render("fairdp", base_url, &ParamMap::new(), None);
        };

        let catalog_ids: Vec<String> = guard.fdp.catalogs.keys().cloned().collect();
        let mut params = ParamMap::new();
        params.insert("catalogs".to_owned(), self.id_to_url(base_url, "catalog", &catalog_ids));
        params.insert("updated".to_owned(), datetime_value(self.last_modified(&guard)));
        drop(guard);

        let graph = self.generator.render("fairdp", base_url, &params, None)?;
        self.generator.render("catalogs", base_url, &params, Some(graph))
    }

    /// The catalog listing.
    pub fn get_catalogs(
        &self,
        registry: &Arc<RwLock<DataRegistry>>,
        base_url: &str,
    ) -> Result<Graph> {
        let mut params = ParamMap::new();
        if let Ok(guard) = registry.read() {
            let catalog_ids: Vec<String> = guard.fdp.catalogs.keys().cloned().collect();
            params
                .insert("catalogs".to_owned(), self.id_to_url(base_url, "catalog", &catalog_ids));
            params.insert("updated".to_owned(), datetime_value(self.last_modified(&guard)));
        }
        self.generator.render("catalogs", base_url, &params, None)
    }

    /// One catalog record, or `None` when the id is not configured.
    pub fn get_catalog(
        &self,
        registry: &Arc<RwLock<DataRegistry>>,
        base_url: &str,
        catalog_id: &str,
    ) -> Result<Option<Graph>> {
        let Ok(guard) = registry.read() else {
            return Ok(None);
        };
        let Some(catalog) = guard.fdp.catalogs.get(catalog_id) else {
            return Ok(None);
        };

        let dataset_ids = guard
            .fdp
            .catalog_datasets
            .get(catalog_id)
            .cloned()
            .unwrap_or_default();

        // The modification time is the maximum of the catalog baseline and
        // every member dataset's update time:
        let mut latest_update = catalog
            .since
            .map(|since| since.as_datetime())
            .unwrap_or_else(|| self.config.since.as_datetime());
        for dataset_id in &dataset_ids {
            if let Some(dataset) = guard.fdp.datasets.get(dataset_id)
                && dataset.updated > latest_update
            {
                latest_update = dataset.updated;
            }
        }

        let mut params = ParamMap::new();
        params.insert("id".to_owned(), Value::String(catalog_id.to_owned()));
        params.insert("title".to_owned(), Value::String(catalog.title.clone()));
        params.insert("description".to_owned(), Value::String(catalog.description.clone()));
        if let Some(since) = catalog.since {
            params.insert("since".to_owned(), date_or_datetime_value(since));
        }
        params.insert("updated".to_owned(), datetime_value(latest_update));
        params.insert("datasets".to_owned(), self.id_to_url(base_url, "dataset", &dataset_ids));
        drop(guard);

        self.generator.render("catalog", base_url, &params, None).map(Some)
    }

    /// One dataset record, or `None` when unknown (a dataset whose catalog
    /// is not configured stays hidden).
    pub fn get_dataset(
        &self,
        registry: &Arc<RwLock<DataRegistry>>,
        base_url: &str,
        dataset_id: &str,
    ) -> Result<Option<Graph>> {
        let Ok(guard) = registry.read() else {
            return Ok(None);
        };
        let Some(dataset) = guard.fdp.datasets.get(dataset_id) else {
            return Ok(None);
        };
        if !guard.fdp.catalogs.contains_key(&dataset.catalog_id) {
            return Ok(None);
        }

        let mut params = ParamMap::new();
        params.insert("id".to_owned(), Value::String(dataset_id.to_owned()));
        params.insert("title".to_owned(), Value::String(dataset.title.clone()));
        params.insert("description".to_owned(), Value::String(dataset.description.clone()));
        if let Some(keywords) = &dataset.keywords {
            params.insert(
                "keywords".to_owned(),
                Value::Sequence(keywords.iter().cloned().map(Value::String).collect()),
            );
        }
        params.insert("since".to_owned(), datetime_value(dataset.since));
        params.insert("updated".to_owned(), datetime_value(dataset.updated));
        if let Some(min_age) = dataset.min_age {
            params.insert("min_age".to_owned(), Value::Number(min_age.into()));
        }
        if let Some(max_age) = dataset.max_age {
            params.insert("max_age".to_owned(), Value::Number(max_age.into()));
        }
        if let Some(individual_count) = dataset.individual_count {
            params.insert("individual_count".to_owned(), Value::Number(individual_count.into()));
        }
        params.insert("record_count".to_owned(), Value::Number(dataset.record_count.into()));
        params.insert(
            "data_provider_name".to_owned(),
            Value::String(dataset.data_provider_name.clone()),
        );
        drop(guard);

        self.generator.render("dataset", base_url, &params, None).map(Some)
    }

    /// One metadata profile, or `None` when no shape document carries the
    /// id.
    pub fn get_profile(&self, base_url: &str, profile_id: &str) -> Result<Option<Graph>> {
        if !shacl::has_shacl(profile_id) {
            return Ok(None);
        }
        let shacl_url =
            self.generator.item_url(base_url, "fairdp", Some(&format!("shacl/{profile_id}")));

        let mut params = ParamMap::new();
        params.insert("id".to_owned(), Value::String(profile_id.to_owned()));
        params.insert("shacl_url".to_owned(), Value::String(shacl_url));
        self.generator.render("profile", base_url, &params, None).map(Some)
    }

    /// Validates a rendered graph. The shape is either named explicitly or
    /// derived from the graph's `dct:conformsTo` value (its last path
    /// segment).
    pub fn validate_graph(
        &self,
        graph: &Graph,
        request_url: &str,
        shacl_id: Option<&str>,
    ) -> String {
        let shacl_id = match shacl_id {
            Some(id) => id.to_owned(),
            None => {
                let conforms_to = graph
                    .objects_of_predicate(DCT_CONFORMS_TO)
                    .next()
                    .and_then(graph::Term::as_iri);
                match conforms_to {
                    Some(iri) => iri.rsplit('/').next().unwrap_or(iri).to_owned(),
                    None => return "dct:conformsTo was not found in the graph".to_owned(),
                }
            }
        };

        match shacl::shacl_graph(request_url, &shacl_id) {
            Some(shapes) => shacl::validate(graph, &shapes),
            None => format!("Unknown SHACL profile [{shacl_id}]"),
        }
    }
}

fn datetime_value(value: DateTime<Utc>) -> Value {
    Value::String(value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn date_or_datetime_value(value: DateOrDateTime) -> Value {
    match value {
        DateOrDateTime::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
        DateOrDateTime::DateTime(stamp) => datetime_value(stamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fdp_setup() -> FdpSetup {
        let config: FdpConfig = serde_yaml::from_str(
            "title: Example FDP\n\
             legislation: http://data.europa.eu/eli/reg/2016/679/oj\n\
             license: https://creativecommons.org/licenses/by/4.0/\n\
             access_right: http://publications.europa.eu/resource/authority/access-right/PUBLIC\n\
             since: 2023-05-01T00:00:00Z\n\
             contact_point:\n  data_access_body: Example DAB\n  email: data@example.org\n\
             catalogs:\n  main: {title: Main catalog, description: All datasets, since: 2023-06-01}\n",
        )
        .unwrap();
        FdpSetup::new(config).unwrap()
    }

    fn registry_with_dataset() -> Arc<RwLock<DataRegistry>> {
        let setup = fdp_setup();
        let mut registry = DataRegistry::new(setup.config.catalogs.clone());
        let meta = serde_yaml::from_str(
            "title: DS One\ndescription: First dataset\ncatalog_id: main\n\
             since: 2023-07-01T00:00:00Z\nupdated: 2024-02-20T08:30:00Z\n\
             record_count: 120\ndata_provider_name: Example Biobank\n",
        )
        .unwrap();
        registry.add_dataset("ds-one", meta);
        Arc::new(RwLock::new(registry))
    }

    #[test]
    fn test_catalog_graph_contains_datasets_and_modified() {
        let setup = fdp_setup();
        let registry = registry_with_dataset();

        let graph = setup
            .get_catalog(&registry, "http://localhost:8080", "main")
            .unwrap()
            .unwrap();
        let turtle = graph.to_turtle();

        assert!(turtle.contains("<http://localhost:8080/fairdp/catalog/main>"));
        assert!(turtle.contains("<http://localhost:8080/fairdp/dataset/ds-one>"));
        // dct:modified is the max of catalog.since and dataset.updated:
        assert!(turtle.contains("dct:modified \"2024-02-20T08:30:00Z\"^^xsd:dateTime"));
    }

    #[test]
    fn test_unknown_catalog_is_none() {
        let setup = fdp_setup();
        let registry = registry_with_dataset();
        assert!(setup.get_catalog(&registry, "http://localhost", "nope").unwrap().is_none());
    }

    #[test]
    fn test_dataset_hidden_when_catalog_unknown() {
        let setup = fdp_setup();
        let registry = registry_with_dataset();
        {
            let mut guard = registry.write().unwrap();
            let meta = serde_yaml::from_str(
                "title: Orphan\ndescription: d\ncatalog_id: missing\n\
                 since: 2023-07-01T00:00:00Z\nupdated: 2023-07-01T00:00:00Z\n\
                 record_count: 1\ndata_provider_name: p\n",
            )
            .unwrap();
            guard.add_dataset("orphan", meta);
        }

        assert!(setup.get_dataset(&registry, "http://localhost", "orphan").unwrap().is_none());
        assert!(setup.get_dataset(&registry, "http://localhost", "ds-one").unwrap().is_some());
    }

    #[test]
    fn test_service_info_renders_both_templates() {
        let setup = fdp_setup();
        let registry = registry_with_dataset();
        let graph = setup.get_service_info(&registry, "http://localhost").unwrap();
        let turtle = graph.to_turtle();

        assert!(turtle.contains("<http://localhost/fairdp>"));
        assert!(turtle.contains("<http://localhost/fairdp/catalog>"));
        assert!(turtle.contains("ldp:contains"));
    }

    #[test]
    fn test_profile_and_validation_wiring() {
        let setup = fdp_setup();
        let registry = registry_with_dataset();

        let profile = setup.get_profile("http://localhost", "catalog").unwrap().unwrap();
        assert!(profile.to_turtle().contains("/fairdp/shacl/catalog"));
        assert!(setup.get_profile("http://localhost", "bogus").unwrap().is_none());

        let catalog = setup
            .get_catalog(&registry, "http://localhost", "main")
            .unwrap()
            .unwrap();
        let report = setup.validate_graph(&catalog, "http://localhost/fairdp/catalog/main", None);
        assert!(report.contains("Conforms"), "report was: {report}");
    }

    #[test]
    fn test_validate_graph_requires_conforms_to() {
        let setup = fdp_setup();
        let graph = Graph::default();
        let report = setup.validate_graph(&graph, "http://localhost", None);
        assert_eq!(report, "dct:conformsTo was not found in the graph");
    }

    #[test]
    fn test_last_modified_tracks_datasets() {
        let setup = fdp_setup();
        let registry = registry_with_dataset();
        let guard = registry.read().unwrap();
        assert_eq!(
            setup.last_modified(&guard).to_rfc3339_opts(SecondsFormat::Secs, true),
            "2024-02-20T08:30:00Z"
        );

        let empty = DataRegistry::new(BTreeMap::new());
        assert_eq!(
            setup.last_modified(&empty).to_rfc3339_opts(SecondsFormat::Secs, true),
            "2023-05-01T00:00:00Z"
        );
    }
}
