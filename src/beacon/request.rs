//! Query-string parsing for the Beacon GET endpoints.
//!
//! GET endpoints accept the same fields as the POST body, flattened into URL
//! parameters. `filters` is a comma-separated list of `id` or `id<op>value`
//! items where an underscore in the id portion preceding the operator maps
//! to `:`, so colon-bearing ontology ids stay expressible in URLs.

use std::collections::HashMap;

use crate::beacon::model::{
    BeaconQuery, FilterOperator, Granularity, IncludeResponses, Pagination, QueryFilter,
    RequestParams, VariantQueryParameters,
};

/// Builds a [`BeaconQuery`] from URL query parameters. `parse_variants`
/// controls whether variant parameters are collected (they are only
/// meaningful for the `/g_variants` endpoint).
pub fn query_from_params(
    params: &HashMap<String, String>,
    parse_variants: bool,
) -> Result<BeaconQuery, String> {
    let request_parameters = if parse_variants {
        parse_variant_params(params)?.map(RequestParams::One)
    } else {
        None
    };

    Ok(BeaconQuery {
        request_parameters,
        filters: parse_filters(params.get("filters").map(String::as_str)),
        include_resultset_responses: params
            .get("includeResultsetResponses")
            .and_then(|value| IncludeResponses::parse(value)),
        pagination: parse_pagination(params)?,
        requested_granularity: parse_granularity(params),
        test_mode: parse_test_mode(params),
    })
}

fn parse_granularity(params: &HashMap<String, String>) -> Option<Granularity> {
    let value = params
        .get("requestedGranularity")
        .or_else(|| params.get("granularity"))?;
    match value.as_str() {
        "boolean" => Some(Granularity::Boolean),
        "count" => Some(Granularity::Count),
        "record" => Some(Granularity::Record),
        _ => None,
    }
}

fn parse_test_mode(params: &HashMap<String, String>) -> Option<bool> {
    match params.get("testMode").map(String::as_str) {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    }
}

fn parse_pagination(params: &HashMap<String, String>) -> Result<Option<Pagination>, String> {
    let skip = params.get("skip").filter(|value| !value.is_empty());
    let limit = params.get("limit").filter(|value| !value.is_empty());
    if skip.is_none() && limit.is_none() {
        return Ok(None);
    }

    let parse = |name: &str, value: Option<&String>| -> Result<Option<u64>, String> {
        match value {
            None => Ok(None),
            Some(raw) => raw
                .parse::<u64>()
                .map(Some)
                .map_err(|_| format!("{name} must be a non-negative integer")),
        }
    };

    Ok(Some(Pagination {
        skip: parse("skip", skip)?,
        limit: parse("limit", limit)?,
        ..Default::default()
    }))
}

/// Parses the `filters` URL parameter.
pub fn parse_filters(value: Option<&str>) -> Option<Vec<QueryFilter>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }

    let mut filters = Vec::new();
    for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        match split_on_operator(item) {
            Some((id_part, operator, filter_value)) => {
                let id = id_part.trim_end_matches(':').replace('_', ":");
                let mut filter = QueryFilter::with_id(&id);
                filter.operator = Some(operator);
                filter.value = Some(filter_value.trim_start().to_owned());
                filters.push(filter);
            }
            // Only an ID without a comparison operator:
            None => filters.push(QueryFilter::with_id(item)),
        }
    }

    Some(filters)
}

/// Finds the first comparison operator past position 1 and splits the item
/// around it. `<` and `>` extend to `<=`/`>=` when followed by `=`.
fn split_on_operator(item: &str) -> Option<(&str, FilterOperator, &str)> {
    for (position, c) in item.char_indices() {
        if position <= 1 {
            continue;
        }
        let (operator, width) = match c {
            '<' if item[position + 1..].starts_with('=') => (FilterOperator::LessOrEqual, 2),
            '>' if item[position + 1..].starts_with('=') => (FilterOperator::GreaterOrEqual, 2),
            '<' => (FilterOperator::Less, 1),
            '>' => (FilterOperator::Greater, 1),
            '=' => (FilterOperator::Equal, 1),
            '!' => (FilterOperator::NotEqual, 1),
            _ => continue,
        };
        return Some((&item[..position], operator, &item[position + width..]));
    }
    None
}

fn parse_variant_params(
    params: &HashMap<String, String>,
) -> Result<Option<VariantQueryParameters>, String> {
    const FIELDS: [&str; 13] = [
        "assemblyId",
        "geneId",
        "mateName",
        "aminoacidChange",
        "genomicAlleleShortForm",
        "referenceName",
        "referenceBases",
        "alternateBases",
        "start",
        "end",
        "variantType",
        "variantMinLength",
        "variantMaxLength",
    ];

    let mut collected = serde_json::Map::new();
    for field in FIELDS {
        if let Some(value) = params.get(field) {
            collected.insert(field.to_owned(), serde_json::Value::String(value.clone()));
        }
    }
    if collected.is_empty() {
        return Ok(None);
    }

    // Numeric fields arrive as strings from the query string:
    for field in ["variantMinLength", "variantMaxLength"] {
        if let Some(serde_json::Value::String(raw)) = collected.get(field) {
            let number = raw
                .parse::<u64>()
                .map_err(|_| format!("{field} must be a non-negative integer"))?;
            collected.insert(field.to_owned(), serde_json::Value::Number(number.into()));
        }
    }

    let parsed: VariantQueryParameters =
        serde_json::from_value(serde_json::Value::Object(collected))
            .map_err(|e| e.to_string())?;
    parsed.validate()?;
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_filter_underscore_maps_to_colon_before_operator() {
        // "age_of_onset:>P40Y" (the > arrives URL-decoded)
        let filters = parse_filters(Some("age_of_onset:>P40Y")).unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].id, "age:of:onset");
        assert_eq!(filters[0].operator, Some(FilterOperator::Greater));
        assert_eq!(filters[0].value.as_deref(), Some("P40Y"));
    }

    #[test]
    fn test_filter_two_char_operators() {
        let filters = parse_filters(Some("weight<=70,height>=150")).unwrap();
        assert_eq!(filters[0].operator, Some(FilterOperator::LessOrEqual));
        assert_eq!(filters[0].value.as_deref(), Some("70"));
        assert_eq!(filters[1].operator, Some(FilterOperator::GreaterOrEqual));
        assert_eq!(filters[1].value.as_deref(), Some("150"));
    }

    #[test]
    fn test_filter_plain_ids() {
        let filters = parse_filters(Some("NCIT:C20197, OBI:0000066")).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].id, "NCIT:C20197");
        assert!(filters[0].operator.is_none());
    }

    #[test]
    fn test_filters_empty_value_is_none() {
        assert!(parse_filters(Some("  ")).is_none());
        assert!(parse_filters(None).is_none());
    }

    #[test]
    fn test_variant_params_from_query_string() {
        let query = query_from_params(
            &params(&[
                ("assemblyId", "GRCh37"),
                ("referenceName", "1"),
                ("start", "12344"),
                ("referenceBases", "A"),
                ("alternateBases", "G"),
            ]),
            true,
        )
        .unwrap();

        let variant = query.request_parameters.unwrap();
        let variant = variant.first().unwrap();
        assert_eq!(variant.start0(), Some(12344));
        assert!(variant.has_sufficient_values());
    }

    #[test]
    fn test_invalid_start_is_a_validation_error() {
        let result = query_from_params(&params(&[("start", "abc")]), true);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_pagination_is_a_validation_error() {
        let result = query_from_params(&params(&[("skip", "-2")]), false);
        assert!(result.is_err());
    }

    #[test]
    fn test_granularity_aliases() {
        let query = query_from_params(&params(&[("granularity", "record")]), false).unwrap();
        assert_eq!(query.requested_granularity, Some(Granularity::Record));

        let query =
            query_from_params(&params(&[("requestedGranularity", "count")]), false).unwrap();
        assert_eq!(query.requested_granularity, Some(Granularity::Count));
    }
}
