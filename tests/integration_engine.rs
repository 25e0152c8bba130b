//! Integration tests for the query engine over a generated data directory.
//!
//! These tests build a realistic corpus in a temp directory (metadata plus
//! parquet fixtures written with polars), scan it into a registry and drive
//! the engine the way the HTTP handlers do.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use polars::prelude::*;
use varpoint::beacon::allele_freq::find_datasets_allele_frequencies;
use varpoint::beacon::individuals::get_individuals_count;
use varpoint::beacon::model::{BeaconQuery, BeaconRequest, QueryFilter, RequestParams};
use varpoint::registry::{DataRegistry, scan_data_directory};

const METADATA: &str = "\
title: Integration dataset
description: Fixture dataset for engine tests
catalog_id: example-catalog
since: 2023-06-01T10:00:00Z
updated: 2024-02-20T08:30:00Z
record_count: 7
data_provider_name: Example Biobank
";

fn write_parquet(path: &Path, mut frame: DataFrame) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = std::fs::File::create(path).unwrap();
    ParquetWriter::new(file).finish(&mut frame).unwrap();
}

fn allele_freq_frame() -> DataFrame {
    df!(
        "POS" => [12344i32],
        "REF" => ["A"],
        "ALT" => ["G"],
        "VT" => ["SNP"],
        "POPULATION" => ["FI"],
        "AF" => [0.1f64],
        "AC" => [1i32],
        "AC_HET" => [1i32],
        "AC_HOM" => [0i32],
        "AC_HEMI" => [0i32],
        "AN" => [10i32],
    )
    .unwrap()
}

fn variant_individuals_frame() -> DataFrame {
    df!(
        "POS" => [999i32],
        "REF" => ["A"],
        "ALT" => ["G"],
        "VT" => ["SNP"],
        "INDIVIDUALS" => ["2,5-7,9"],
    )
    .unwrap()
}

fn individuals_frame() -> DataFrame {
    df!(
        "INDEX" => [2i32, 3, 4, 5, 6, 7, 9],
        "SEX" => ["F", "M", "F", "F", "F", "M", "F"],
        "AGE" => ["P42Y", "P35Y", "P61Y2M", "P28Y", "P55Y", "P47Y", "P33Y6M"],
    )
    .unwrap()
}

/// A data directory with one dataset carrying all three file kinds.
fn build_corpus(dir: &Path) {
    let dataset = dir.join("ds-main");
    std::fs::create_dir_all(&dataset).unwrap();
    std::fs::write(dataset.join("metadata.yaml"), METADATA).unwrap();

    write_parquet(
        &dataset.join("GRCh37/allele-freq-chr1.0.parquet"),
        allele_freq_frame(),
    );
    write_parquet(
        &dataset.join("GRCh37/individuals-chr1.0.parquet"),
        variant_individuals_frame(),
    );
    write_parquet(&dataset.join("GRCh37/individuals.parquet"), individuals_frame());
}

fn scanned_registry(dir: &Path) -> Arc<RwLock<DataRegistry>> {
    let mut registry = DataRegistry::new(BTreeMap::new());
    scan_data_directory(&mut registry, dir);
    Arc::new(RwLock::new(registry))
}

fn variant_request(json: &str) -> BeaconRequest {
    let params = serde_json::from_str(json).unwrap();
    BeaconRequest {
        query: Some(BeaconQuery {
            request_parameters: Some(RequestParams::One(params)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[test]
fn test_scan_indexes_all_personalities() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    let guard = registry.read().unwrap();
    assert_eq!(guard.aggregated_beacon.get_dataset_ids(), ["ds-main"]);
    assert_eq!(guard.sensitive_beacon.get_dataset_ids(), ["ds-main"]);
    assert_eq!(guard.fdp.datasets.len(), 1);
    assert!(guard.problematic_files().is_empty());
}

#[test]
fn test_allele_frequency_hit() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    let request = variant_request(
        r#"{"assemblyId": "GRCh37", "referenceName": "1", "start": [12344],
            "referenceBases": "A", "alternateBases": "G"}"#,
    );
    let results = find_datasets_allele_frequencies(&registry, &request);

    assert_eq!(results.len(), 1, "one dataset must match");
    let result = &results["ds-main"];
    assert_eq!(result.identifiers.genomic_hgvs_id, "NC_000001.10:g.12345A>G");

    let frequencies = &result.frequency_in_populations[0];
    assert_eq!(frequencies.number_of_populations, 1);
    let population = &frequencies.populations[0];
    assert_eq!(population.population, "FI");
    assert!((population.allele_frequency - 0.1).abs() < f64::EPSILON);
    assert_eq!(population.allele_number, Some(10));
}

#[test]
fn test_allele_frequency_miss_on_other_alternate() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    let request = variant_request(
        r#"{"assemblyId": "GRCh37", "referenceName": "1", "start": [12344],
            "referenceBases": "A", "alternateBases": "C"}"#,
    );
    let results = find_datasets_allele_frequencies(&registry, &request);
    assert!(results.is_empty());
}

#[test]
fn test_unsupported_variant_field_yields_empty() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    let request = variant_request(
        r#"{"assemblyId": "GRCh37", "referenceName": "1", "start": [12344],
            "referenceBases": "A", "alternateBases": "G", "geneId": "BRCA1"}"#,
    );
    assert!(find_datasets_allele_frequencies(&registry, &request).is_empty());
}

fn sex_filter(value: &str) -> QueryFilter {
    let mut filter = QueryFilter::with_id("sex");
    filter.value = Some(value.to_owned());
    filter.scope = Some("individual".to_owned());
    filter
}

fn individuals_request(filters: Option<Vec<QueryFilter>>, with_variant: bool) -> BeaconRequest {
    let request_parameters = with_variant.then(|| {
        let params = serde_json::from_str(
            r#"{"assemblyId": "GRCh37", "referenceName": "1", "start": [999],
                "referenceBases": "A", "alternateBases": "G"}"#,
        )
        .unwrap();
        RequestParams::Many(vec![params])
    });

    BeaconRequest {
        query: Some(BeaconQuery {
            request_parameters,
            filters,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[test]
fn test_individuals_count_with_variant_and_sex_filter() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    // Variant row selects individuals {2, 5, 6, 7, 9}; of those, 2, 5, 6
    // and 9 are female.
    let request = individuals_request(Some(vec![sex_filter("NCIT:C16576")]), true);
    let results = get_individuals_count(&registry, &request, 1);

    assert_eq!(results.result_sets.len(), 1);
    assert_eq!(results.result_sets[0].id, "ds-main");
    assert_eq!(results.result_sets[0].results_count, 4);
    assert!(results.result_sets[0].results.is_empty());
}

#[test]
fn test_individuals_count_censoring() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    let request = individuals_request(Some(vec![sex_filter("NCIT:C16576")]), true);
    let results = get_individuals_count(&registry, &request, 5);
    assert!(
        results.result_sets.is_empty(),
        "counts below the censor threshold must be suppressed"
    );
}

#[test]
fn test_individuals_count_without_variant_counts_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    let request = individuals_request(Some(vec![sex_filter("NCIT:C20197")]), false);
    let results = get_individuals_count(&registry, &request, 1);
    assert_eq!(results.result_sets.len(), 1);
    assert_eq!(results.result_sets[0].results_count, 2, "two males in the file");
}

#[test]
fn test_individuals_unknown_filter_yields_empty() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    let mut filter = QueryFilter::with_id("diseases.icd10");
    filter.scope = Some("individual".to_owned());
    let request = individuals_request(Some(vec![filter]), false);
    assert!(get_individuals_count(&registry, &request, 1).result_sets.is_empty());
}

#[test]
fn test_individuals_test_mode_yields_empty() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    let mut request = individuals_request(None, false);
    if let Some(query) = request.query.as_mut() {
        query.test_mode = Some(true);
    }
    assert!(get_individuals_count(&registry, &request, 1).result_sets.is_empty());
}

#[test]
fn test_individuals_age_filter() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    // Onset below forty years: P35Y, P28Y and P33Y6M match.
    let mut age = QueryFilter::with_id("diseases.ageOfOnset.iso8601duration");
    age.operator = Some(varpoint::beacon::model::FilterOperator::Greater);
    age.value = Some("P40Y".to_owned());
    age.scope = Some("individual".to_owned());

    let request = individuals_request(Some(vec![age]), false);
    let results = get_individuals_count(&registry, &request, 1);
    assert_eq!(results.result_sets.len(), 1);
    assert_eq!(results.result_sets[0].results_count, 3);
}

#[test]
fn test_removed_parquet_unindexes_dataset() {
    let dir = tempfile::tempdir().unwrap();
    build_corpus(dir.path());
    let registry = scanned_registry(dir.path());

    {
        let mut guard = registry.write().unwrap();
        let path = dir.path().join("ds-main/GRCh37/allele-freq-chr1.0.parquet");
        guard.remove_parquet("ds-main", &path);
    }

    let request = variant_request(
        r#"{"assemblyId": "GRCh37", "referenceName": "1", "start": [12344],
            "referenceBases": "A", "alternateBases": "G"}"#,
    );
    assert!(find_datasets_allele_frequencies(&registry, &request).is_empty());
}
