//! Dataset listing for the aggregated Beacon (`/datasets`).
//!
//! Returns the dataset records visible in the aggregated Beacon; the
//! human-readable property values are cross-referenced from the FAIR Data
//! Point metadata. Only `skip` and `limit` are supported.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::beacon::model::BeaconRequest;
use crate::registry::DataRegistry;

/// Based on <https://docs.genomebeacons.org/schemas-md/datasets_defaultSchema/>.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconDatasetRecord {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_date_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_date_time: Option<DateTime<Utc>>,
}

pub fn get_datasets(
    registry: &Arc<RwLock<DataRegistry>>,
    request: &BeaconRequest,
) -> Vec<BeaconDatasetRecord> {
    let Ok(guard) = registry.read() else {
        return Vec::new();
    };

    let mut dataset_ids = guard.aggregated_beacon.get_dataset_ids();
    let (skip, limit) = request.query().page();

    if skip as usize >= dataset_ids.len() {
        return Vec::new();
    }
    if skip > 0 {
        dataset_ids.drain(..skip as usize);
    }

    let mut results = Vec::new();
    for dataset_id in dataset_ids {
        let Some(props) = guard.fdp.datasets.get(&dataset_id) else {
            continue;
        };

        results.push(BeaconDatasetRecord {
            id: dataset_id,
            name: props.title.clone(),
            description: Some(props.description.clone()),
            create_date_time: Some(props.since),
            update_date_time: Some(props.updated),
        });

        if results.len() as u64 >= limit {
            break;
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::model::{BeaconQuery, Pagination};
    use crate::registry::BeaconAssembly;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn registry_with_datasets(ids: &[&str]) -> Arc<RwLock<DataRegistry>> {
        let mut registry = DataRegistry::new(BTreeMap::new());
        for id in ids {
            let meta = serde_yaml::from_str(&format!(
                "title: {id} title\ndescription: d\ncatalog_id: c\n\
                 since: 2023-01-01T00:00:00Z\nupdated: 2023-06-01T00:00:00Z\n\
                 record_count: 1\ndata_provider_name: p\n"
            ))
            .unwrap();
            registry.add_dataset(id, meta);
            registry.add_parquet(
                id,
                BeaconAssembly::GRCh38,
                Path::new(&format!("/data/{id}/GRCh38/allele-freq-chr1.0.parquet")),
            );
        }
        Arc::new(RwLock::new(registry))
    }

    fn paged_request(skip: u64, limit: u64) -> BeaconRequest {
        BeaconRequest {
            query: Some(BeaconQuery {
                pagination: Some(Pagination {
                    skip: Some(skip),
                    limit: Some(limit),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_datasets_cross_reference_fdp_metadata() {
        let registry = registry_with_datasets(&["ds-a", "ds-b"]);
        let results = get_datasets(&registry, &BeaconRequest::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "ds-a");
        assert_eq!(results[0].name, "ds-a title");
    }

    #[test]
    fn test_datasets_pagination() {
        let registry = registry_with_datasets(&["ds-a", "ds-b", "ds-c"]);

        let page = get_datasets(&registry, &paged_request(1, 1));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "ds-b");

        let beyond = get_datasets(&registry, &paged_request(10, 10));
        assert!(beyond.is_empty());
    }

    #[test]
    fn test_dataset_without_fdp_metadata_is_skipped() {
        let registry = registry_with_datasets(&["ds-a"]);
        registry.write().unwrap().remove_dataset("ds-a", false);

        let results = get_datasets(&registry, &BeaconRequest::default());
        assert!(results.is_empty());
    }
}
