//! Individuals count for the sensitive Beacon (`/individuals`).
//!
//! The client makes a record-level request to obtain result sets and reads
//! the count from `resultSets[].resultsCount`, so record-level responses are
//! supported but always carry an empty `results` array.
//!
//! Two filters are supported, both with scope `individual`:
//! * `sex` - the ontology value for male (NCIT:C20197) and female
//!   (NCIT:C16576); anything else matches the `UNKNOWN` sentinel.
//! * `diseases.ageOfOnset.iso8601duration` - an ISO 8601 duration plus a
//!   comparator operator.
//!
//! Any other filter id or scope, or a malformed duration, yields an empty
//! result set. A per-query censor threshold suppresses counts below the
//! configured minimum.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};

use polars::prelude::*;

use crate::beacon::duration::IsoDuration;
use crate::beacon::model::{
    BeaconRequest, FilterOperator, IncludeResponses, ResultSet, ResultSets,
    VariantQueryParameters,
};
use crate::beacon::parquet::{read_filtered, str_column, variant_predicate};
use crate::registry::DataRegistry;

const SUPPORTED_SCOPE: &str = "individual";
const AGE_FILTER_ID: &str = "diseases.ageOfOnset.iso8601duration";

/// Filter for the phenotypic properties of individuals.
///
/// An instance is created even when no filters were provided; in that case
/// [`IndividualFilter::matches_all`] returns true.
#[derive(Debug, Clone, Default)]
pub struct IndividualFilter {
    sex: Option<String>,
    age: Option<(IsoDuration, FilterOperator)>,
}

impl IndividualFilter {
    fn new(sex: Option<&str>, age: Option<(IsoDuration, FilterOperator)>) -> Self {
        Self {
            sex: convert_from_ontology_key(sex),
            age,
        }
    }

    pub fn matches_all(&self) -> bool {
        self.sex.is_none() && self.age.is_none()
    }

    pub fn has_age_filter(&self) -> bool {
        self.age.is_some()
    }

    pub fn sex(&self) -> Option<&str> {
        self.sex.as_deref()
    }

    /// Whether the stored ISO 8601 duration satisfies the age comparator.
    pub fn matches_age(&self, file_age: Option<&str>) -> bool {
        let Some((filter_age, operator)) = &self.age else {
            return true;
        };

        let Some(file_age) = file_age.filter(|age| age.starts_with('P')) else {
            return false;
        };

        match IsoDuration::parse(file_age) {
            Ok(value) => filter_age.matches(*operator, &value),
            Err(e) => {
                tracing::warn!(
                    "Invalid ISO 8601 Period [{file_age}] encountered in individuals.parquet \
                     file: {e}"
                );
                false
            }
        }
    }
}

fn convert_from_ontology_key(provided_value: Option<&str>) -> Option<String> {
    match provided_value {
        None | Some("") => None,
        Some("NCIT:C20197") => Some("M".to_owned()),
        Some("NCIT:C16576") => Some("F".to_owned()),
        Some(_) => Some("UNKNOWN".to_owned()),
    }
}

/// Computes the per-dataset individual counts for the request.
pub fn get_individuals_count(
    registry: &Arc<RwLock<DataRegistry>>,
    request: &BeaconRequest,
    hide_lower_counts: u64,
) -> ResultSets {
    let query = request.query();

    // No data for testMode requests:
    if query.test_mode == Some(true) {
        tracing::info!("Returning empty results due to request.query.testMode=true");
        return ResultSets::default();
    }

    // To make sure that we don't support any other result-set mode than HIT:
    if let Some(mode) = query.include_resultset_responses
        && mode != IncludeResponses::HIT
    {
        tracing::info!(
            "Returning empty results due to request.query.includeResultsetResponses={mode:?}"
        );
        return ResultSets::default();
    }

    // Variant parameters count only when any were actually provided:
    let mut params = query
        .request_parameters
        .as_ref()
        .and_then(|p| p.first())
        .filter(|p| p.has_values());
    if params.is_some_and(|p| !p.has_sufficient_values()) {
        params = None;
    }
    if let Some(p) = params
        && p.has_unsupported_values()
    {
        tracing::warn!("Returning empty results due to unsupported request parameters");
        return ResultSets::default();
    }

    // Filters object is present only when there are no validation issues:
    let Some(filters) = resolve_filters(request) else {
        tracing::info!("Returning empty results due to issues in request.query.filters");
        return ResultSets::default();
    };

    let (skip, limit) = query.page();

    let results = match params {
        // Filter the variants file only when variant parameters were provided.
        Some(params) => {
            get_results_from_variants(registry, params, &filters, skip, limit, hide_lower_counts)
        }
        None => get_results_from_individuals_parquet(registry, &filters, skip, limit),
    };

    tracing::info!(
        "Individual variant results contains {} datasets",
        results.result_sets.len()
    );
    results
}

/// Resolves individual-level filtering parameters. Filters are optional:
/// even with no filters provided this returns a filter instance. `None` is
/// returned only on validation failure.
pub fn resolve_filters(request: &BeaconRequest) -> Option<IndividualFilter> {
    let query = request.query();

    let mut sex = None;
    let mut age = None;

    if let Some(filters) = &query.filters {
        for item in filters {
            if item.id != "sex" && item.id != AGE_FILTER_ID {
                tracing::warn!("Unsupported filter [{}]", item.id);
                return None;
            }

            if item.scope.as_deref() != Some(SUPPORTED_SCOPE) {
                tracing::warn!(
                    "Unexpected scope [{:?}] for filter [{}]",
                    item.scope,
                    item.id
                );
                return None;
            }

            if item.id == "sex" {
                sex = item.value.clone();
            } else {
                let Some(operator) = item.operator else {
                    tracing::warn!("Age filter is missing its comparator operator");
                    return None;
                };
                let value = item.value.as_deref().unwrap_or("");
                match IsoDuration::parse(value) {
                    Ok(duration) => age = Some((duration, operator)),
                    Err(e) => {
                        let mut shortened = value.to_owned();
                        if shortened.len() > 40 {
                            shortened = format!("{}... (length={})", &shortened[..40], value.len());
                        }
                        tracing::warn!(
                            "Incoming '{AGE_FILTER_ID}' value '{shortened}' could not be parsed \
                             into ISO 8601 duration: {e}"
                        );
                        // No results will be returned due to this error:
                        return None;
                    }
                }
            }
        }
    }

    Some(IndividualFilter::new(sex.as_deref(), age))
}

/// The search over `individuals.parquet` files only, used when the variant
/// filter was omitted. Datasets with zero matches are not counted towards
/// pagination.
fn get_results_from_individuals_parquet(
    registry: &Arc<RwLock<DataRegistry>>,
    filters: &IndividualFilter,
    skip: u64,
    limit: u64,
) -> ResultSets {
    tracing::info!("Retrieving individuals where (sex={:?})", filters.sex);

    let dataset_files = match registry.read() {
        Ok(guard) => guard.sensitive_beacon.get_dataset_individuals(None, None, None),
        Err(_) => return ResultSets::default(),
    };

    let mut dataset_ids: Vec<&String> = dataset_files.keys().collect();
    dataset_ids.sort();

    let mut results = ResultSets::default();
    let mut dataset_match_count: u64 = 0;

    for dataset_id in dataset_ids {
        let (individuals_file, _) = &dataset_files[dataset_id];
        let Some(count) = filter_individuals(registry, individuals_file, &HashSet::new(), filters)
        else {
            continue;
        };

        dataset_match_count += 1;
        if dataset_match_count <= skip {
            continue;
        }

        results.result_sets.push(ResultSet::counted(dataset_id, count));
        if results.result_sets.len() as u64 >= limit {
            break;
        }
    }

    results
}

/// The two-stage search per dataset, used when variant parameters were
/// provided: find matching individuals by variant position, then filter the
/// individual properties (sex, age). Counts below the censor threshold are
/// suppressed.
fn get_results_from_variants(
    registry: &Arc<RwLock<DataRegistry>>,
    params: &VariantQueryParameters,
    filters: &IndividualFilter,
    skip: u64,
    limit: u64,
    hide_lower_counts: u64,
) -> ResultSets {
    let (Some(assembly), Some(chrom), Some(pos)) =
        (params.assembly(), params.reference_name.as_deref(), params.start0())
    else {
        return ResultSets::default();
    };

    let dataset_files = match registry.read() {
        Ok(guard) => guard.sensitive_beacon.get_dataset_individuals(
            Some(assembly),
            Some(chrom),
            Some(pos),
        ),
        Err(_) => return ResultSets::default(),
    };

    let mut dataset_ids: Vec<&String> = dataset_files.keys().collect();
    dataset_ids.sort();

    let mut results = ResultSets::default();
    let mut dataset_match_count: u64 = 0;

    for dataset_id in dataset_ids {
        let (individuals_file, group_file) = &dataset_files[dataset_id];
        let Some(group_file) = group_file else {
            continue;
        };

        let count =
            filter_individuals_by_variant(registry, params, filters, group_file, individuals_file);

        // Censoring filters out results with rare variants. The default
        // threshold is 1, which essentially does not censor.
        let Some(count) = count.filter(|count| *count >= hide_lower_counts) else {
            continue;
        };

        dataset_match_count += 1;
        if dataset_match_count <= skip {
            continue;
        }

        results.result_sets.push(ResultSet::counted(dataset_id, count));
        if results.result_sets.len() as u64 >= limit {
            break;
        }
    }

    results
}

/// Counts individuals matching the variant in the per-chr-group file, then
/// applies the property filters over the individuals file. Returns `None` on
/// no matches and on failures.
fn filter_individuals_by_variant(
    registry: &Arc<RwLock<DataRegistry>>,
    params: &VariantQueryParameters,
    filters: &IndividualFilter,
    variants_parquet_file: &Path,
    individuals_parquet_file: &Path,
) -> Option<u64> {
    let frame = read_filtered(
        registry,
        variants_parquet_file,
        Some(variant_predicate(params)),
        Some(&["INDIVIDUALS"]),
    )?;

    if frame.height() == 0 {
        return None;
    }

    // We just expect one matching row here.
    let individuals = str_column(&frame, "INDIVIDUALS").ok()?;
    let encoded = individuals.first().copied().flatten()?;
    let indices = match parse_range(encoded) {
        Ok(indices) => indices,
        Err(e) => {
            if let Ok(guard) = registry.read() {
                guard.record_issue(variants_parquet_file, &e.to_string());
            }
            return None;
        }
    };

    filter_individuals(registry, individuals_parquet_file, &indices, filters)
}

/// Parses the INDIVIDUALS column value: comma-delimited numbers and
/// inclusive `a-b` ranges, e.g. `2,7-9,20`.
pub fn parse_range(ranges_str: &str) -> anyhow::Result<HashSet<u32>> {
    let mut results = HashSet::new();
    for item in ranges_str.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        match item.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.trim().parse()?;
                let end: u32 = end.trim().parse()?;
                for index in start..=end {
                    results.insert(index);
                }
            }
            None => {
                results.insert(item.parse()?);
            }
        }
    }
    Ok(results)
}

/// Formats a set of indices back into the INDIVIDUALS encoding, contracting
/// runs into inclusive ranges.
pub fn format_range(indices: &HashSet<u32>) -> String {
    let mut sorted: Vec<u32> = indices.iter().copied().collect();
    sorted.sort_unstable();

    let mut parts: Vec<String> = Vec::new();
    let mut run: Option<(u32, u32)> = None;

    for index in sorted {
        run = match run {
            Some((start, end)) if index == end + 1 => Some((start, index)),
            Some((start, end)) => {
                parts.push(encode_run(start, end));
                Some((index, index))
            }
            None => Some((index, index)),
        };
    }
    if let Some((start, end)) = run {
        parts.push(encode_run(start, end));
    }

    parts.join(",")
}

fn encode_run(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// Returns the number of individuals matching the filter criteria, or `None`
/// when nothing matched (or the file could not be read).
///
/// `individual_indices` restricts the matched individuals (values of the
/// INDEX column); an empty set includes everyone in the file.
pub fn filter_individuals(
    registry: &Arc<RwLock<DataRegistry>>,
    parquet_file: &Path,
    individual_indices: &HashSet<u32>,
    filters: &IndividualFilter,
) -> Option<u64> {
    // The count is already known from the selected individuals when the
    // filter includes everyone:
    if filters.matches_all() && !individual_indices.is_empty() {
        tracing::debug!(
            "Returning individuals count as len(INDIVIDUALS): {}",
            individual_indices.len()
        );
        return Some(individual_indices.len() as u64);
    }

    let mut predicate: Option<Expr> = None;
    if !individual_indices.is_empty() {
        let mut indices: Vec<i32> = individual_indices.iter().map(|v| *v as i32).collect();
        indices.sort_unstable();
        let matcher = col("INDEX").is_in(lit(Series::new("indices".into(), indices)));
        predicate = Some(matcher);
    }
    if let Some(sex) = filters.sex() {
        let matcher = col("SEX").eq(lit(sex.to_owned()));
        predicate = Some(match predicate {
            Some(existing) => existing.and(matcher),
            None => matcher,
        });
    }

    let frame = read_filtered(registry, parquet_file, predicate, Some(&["AGE"]))?;
    if frame.height() == 0 {
        return None;
    }

    let match_count = if filters.has_age_filter() {
        // AGE holds an ISO 8601 duration string that needs parsing and
        // comparing against the filter value.
        let ages = str_column(&frame, "AGE").ok()?;
        ages.iter().filter(|age| filters.matches_age(**age)).count() as u64
    } else {
        frame.height() as u64
    };

    tracing::debug!("Matched individuals: {match_count}");
    (match_count > 0).then_some(match_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::model::QueryFilter;

    fn filter_request(filters: Vec<QueryFilter>) -> BeaconRequest {
        BeaconRequest {
            query: Some(crate::beacon::model::BeaconQuery {
                filters: Some(filters),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn scoped(id: &str, operator: Option<FilterOperator>, value: &str) -> QueryFilter {
        let mut filter = QueryFilter::with_id(id);
        filter.operator = operator;
        filter.value = Some(value.to_owned());
        filter.scope = Some("individual".to_owned());
        filter
    }

    #[test]
    fn test_parse_range_numbers_and_runs() {
        let parsed = parse_range("2,5-7,9").unwrap();
        assert_eq!(parsed, HashSet::from([2, 5, 6, 7, 9]));
    }

    #[test]
    fn test_range_round_trip() {
        let original = HashSet::from([0, 1, 2, 7, 9, 10, 11, 40]);
        let encoded = format_range(&original);
        assert_eq!(encoded, "0-2,7,9-11,40");
        assert_eq!(parse_range(&encoded).unwrap(), original);
    }

    #[test]
    fn test_parse_range_rejects_garbage() {
        assert!(parse_range("1,two,3").is_err());
    }

    #[test]
    fn test_sex_ontology_mapping() {
        assert_eq!(convert_from_ontology_key(Some("NCIT:C20197")).as_deref(), Some("M"));
        assert_eq!(convert_from_ontology_key(Some("NCIT:C16576")).as_deref(), Some("F"));
        assert_eq!(
            convert_from_ontology_key(Some("NCIT:C124294")).as_deref(),
            Some("UNKNOWN")
        );
        assert_eq!(convert_from_ontology_key(None), None);
    }

    #[test]
    fn test_resolve_filters_accepts_supported_set() {
        let request = filter_request(vec![
            scoped("sex", None, "NCIT:C16576"),
            scoped(AGE_FILTER_ID, Some(FilterOperator::Greater), "P40Y"),
        ]);
        let filters = resolve_filters(&request).unwrap();
        assert_eq!(filters.sex(), Some("F"));
        assert!(filters.has_age_filter());
    }

    #[test]
    fn test_resolve_filters_rejects_unknown_id_and_scope() {
        let request = filter_request(vec![scoped("diseases.icd10", None, "C50")]);
        assert!(resolve_filters(&request).is_none());

        let mut bad_scope = scoped("sex", None, "NCIT:C16576");
        bad_scope.scope = Some("cohort".to_owned());
        let request = filter_request(vec![bad_scope]);
        assert!(resolve_filters(&request).is_none());
    }

    #[test]
    fn test_resolve_filters_rejects_malformed_duration() {
        let request = filter_request(vec![scoped(
            AGE_FILTER_ID,
            Some(FilterOperator::Greater),
            "40 years",
        )]);
        assert!(resolve_filters(&request).is_none());
    }

    #[test]
    fn test_no_filters_matches_all() {
        let filters = resolve_filters(&BeaconRequest::default()).unwrap();
        assert!(filters.matches_all());
        assert!(filters.matches_age(Some("P10Y")));
    }

    #[test]
    fn test_age_matching_requires_duration_shape() {
        let filters = IndividualFilter::new(
            None,
            Some((IsoDuration::parse("P40Y").unwrap(), FilterOperator::Greater)),
        );
        assert!(filters.matches_age(Some("P25Y")));
        assert!(!filters.matches_age(Some("P60Y")));
        assert!(!filters.matches_age(Some("25 years")));
        assert!(!filters.matches_age(None));
    }
}
