//! The HTTP routes of one Beacon personality.
//!
//! Info/metadata endpoints are pure configuration derivations. The query
//! endpoints (POST and their GET counterparts) run through a shared flow:
//! parse, validate (422 on violations), authenticate (401 with the matching
//! `WWW-Authenticate` scheme) and hand off to the engine on a blocking
//! worker thread.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, HOST, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse as _, Response};
use axum::routing::{get, post};

use crate::beacon::allele_freq::find_datasets_allele_frequencies;
use crate::beacon::datasets::get_datasets;
use crate::beacon::error::{INTERNAL_ERROR_MESSAGE, beacon_error_response};
use crate::beacon::individuals::get_individuals_count;
use crate::beacon::model::{
    BeaconRequest, BeaconResponse, EntityType, ResultSet, ResultSets,
};
use crate::beacon::request::query_from_params;
use crate::beacon::setup::BeaconSetup;
use crate::registry::DataRegistry;

#[derive(Clone)]
pub struct BeaconState {
    pub setup: Arc<BeaconSetup>,
    pub registry: Arc<RwLock<DataRegistry>>,
}

/// Builds the router for one personality; the caller nests it under the
/// personality's base path.
pub fn beacon_router(state: BeaconState) -> Router {
    let mut router = Router::new()
        .route("/", get(info))
        .route("/info", get(info))
        .route("/service-info", get(service_info))
        .route("/configuration", get(configuration))
        .route("/entry_types", get(entry_types))
        .route("/map", get(endpoint_map))
        .route("/filtering_terms", get(filtering_terms));

    if state.setup.is_aggregated() {
        router = router
            .route("/g_variants", post(search_variants).get(search_variants_get))
            .route("/datasets", post(search_datasets).get(search_datasets_get));
    } else {
        router = router
            .route("/individuals", post(search_individuals).get(search_individuals_get));
    }

    router.fallback(beacon_not_found).with_state(state)
}

async fn beacon_not_found(State(state): State<BeaconState>) -> Response {
    beacon_error_response(
        &state.setup,
        &BeaconRequest::default(),
        StatusCode::NOT_FOUND,
        "Not Found",
    )
}

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

// ---------------------------------------------------------------- //
// Info and metadata endpoints
// ---------------------------------------------------------------- //

async fn info(State(state): State<BeaconState>, headers: HeaderMap) -> Response {
    let response = BeaconResponse {
        meta: state.setup.info_response_meta(EntityType::Info),
        response_summary: None,
        response: serde_json::to_value(state.setup.beacon_info(&base_url(&headers))).ok(),
        error: None,
    };
    axum::Json(response).into_response()
}

async fn service_info(State(state): State<BeaconState>) -> Response {
    axum::Json(state.setup.service_info().clone()).into_response()
}

async fn configuration(State(state): State<BeaconState>) -> Response {
    let response = BeaconResponse {
        meta: state.setup.info_response_meta(EntityType::Configuration),
        response_summary: None,
        response: serde_json::to_value(state.setup.configuration()).ok(),
        error: None,
    };
    axum::Json(response).into_response()
}

async fn entry_types(State(state): State<BeaconState>) -> Response {
    let response = BeaconResponse {
        meta: state.setup.info_response_meta(EntityType::EntryTypes),
        response_summary: None,
        response: serde_json::to_value(state.setup.entry_types()).ok(),
        error: None,
    };
    axum::Json(response).into_response()
}

async fn endpoint_map(State(state): State<BeaconState>, headers: HeaderMap) -> Response {
    match state.setup.map(&base_url(&headers)) {
        Ok(map) => {
            let response = BeaconResponse {
                meta: state.setup.info_response_meta(EntityType::Map),
                response_summary: None,
                response: serde_json::to_value(map).ok(),
                error: None,
            };
            axum::Json(response).into_response()
        }
        Err(e) => {
            tracing::error!("Cannot derive the Beacon endpoint map: {e:#}");
            internal_error(&state, &BeaconRequest::default())
        }
    }
}

async fn filtering_terms(State(state): State<BeaconState>) -> Response {
    let response = BeaconResponse {
        meta: state.setup.info_response_meta(EntityType::FilteringTerm),
        response_summary: None,
        response: serde_json::to_value(state.setup.filtering_terms()).ok(),
        error: None,
    };
    axum::Json(response).into_response()
}

// ---------------------------------------------------------------- //
// Query endpoints
// ---------------------------------------------------------------- //

/// Parses a POST body into a [`BeaconRequest`], or answers 422 in the
/// Beacon error shape.
fn parse_body(state: &BeaconState, body: &Bytes) -> Result<BeaconRequest, Response> {
    let request: BeaconRequest = serde_json::from_slice(body).map_err(|e| {
        beacon_error_response(
            &state.setup,
            &BeaconRequest::default(),
            StatusCode::UNPROCESSABLE_ENTITY,
            &e.to_string(),
        )
    })?;

    if let Some(params) = request.query().request_parameters.as_ref().and_then(|p| p.first())
        && let Err(message) = params.validate()
    {
        return Err(beacon_error_response(
            &state.setup,
            &request,
            StatusCode::UNPROCESSABLE_ENTITY,
            &message,
        ));
    }

    Ok(request)
}

/// Builds a [`BeaconRequest`] from GET query parameters, or answers 422.
fn parse_query(
    state: &BeaconState,
    params: &HashMap<String, String>,
    parse_variants: bool,
) -> Result<BeaconRequest, Response> {
    match query_from_params(params, parse_variants) {
        Ok(query) => Ok(state.setup.request_for_query(query, None)),
        Err(message) => Err(beacon_error_response(
            &state.setup,
            &BeaconRequest::default(),
            StatusCode::UNPROCESSABLE_ENTITY,
            &message,
        )),
    }
}

/// Verifies access; on failure produces the 401 with the configured
/// authentication scheme.
async fn authenticate(state: &BeaconState, headers: &HeaderMap) -> Result<(), Response> {
    let authorization = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    match state.setup.authenticate(authorization).await {
        None => Ok(()),
        Some(scheme) => Err((
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, scheme)],
            format!("This resource requires {scheme} authentication."),
        )
            .into_response()),
    }
}

fn internal_error(state: &BeaconState, request: &BeaconRequest) -> Response {
    beacon_error_response(
        &state.setup,
        request,
        StatusCode::INTERNAL_SERVER_ERROR,
        INTERNAL_ERROR_MESSAGE,
    )
}

/// Runs an engine computation on a blocking worker and shapes the outcome.
async fn run_query<F>(state: BeaconState, request: BeaconRequest, handler: F) -> Response
where
    F: FnOnce(&BeaconState, &BeaconRequest) -> BeaconResponse + Send + 'static,
{
    let worker_state = state.clone();
    let worker_request = request.clone();
    let result =
        tokio::task::spawn_blocking(move || handler(&worker_state, &worker_request)).await;

    match result {
        Ok(response) => axum::Json(response).into_response(),
        Err(e) => {
            tracing::error!("Query handler failed: {e}");
            internal_error(&state, &request)
        }
    }
}

fn handle_af_lookup(state: &BeaconState, request: &BeaconRequest) -> BeaconResponse {
    let frequencies = find_datasets_allele_frequencies(&state.registry, request);

    let mut dataset_ids: Vec<&String> = frequencies.keys().collect();
    dataset_ids.sort();

    let result_sets = ResultSets {
        result_sets: dataset_ids
            .into_iter()
            .map(|dataset_id| {
                let mut set = ResultSet::counted(dataset_id, 1);
                set.results = serde_json::to_value(&frequencies[dataset_id])
                    .map(|value| vec![value])
                    .unwrap_or_default();
                set
            })
            .collect(),
    };

    state.setup.response(request, result_sets, EntityType::GenomicVariant)
}

fn handle_datasets(state: &BeaconState, request: &BeaconRequest) -> BeaconResponse {
    let datasets = get_datasets(&state.registry, request);
    let collections = datasets
        .into_iter()
        .filter_map(|dataset| serde_json::to_value(dataset).ok())
        .collect();
    state.setup.collection_response(request, collections, EntityType::Dataset)
}

fn handle_individuals(state: &BeaconState, request: &BeaconRequest) -> BeaconResponse {
    let result_sets =
        get_individuals_count(&state.registry, request, state.setup.hide_lower_counts());
    state.setup.response(request, result_sets, EntityType::Individual)
}

async fn search_variants(
    State(state): State<BeaconState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match parse_body(&state, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = authenticate(&state, &headers).await {
        return response;
    }
    run_query(state, request, handle_af_lookup).await
}

async fn search_variants_get(
    State(state): State<BeaconState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let request = match parse_query(&state, &params, true) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = authenticate(&state, &headers).await {
        return response;
    }
    run_query(state, request, handle_af_lookup).await
}

async fn search_datasets(
    State(state): State<BeaconState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match parse_body(&state, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = authenticate(&state, &headers).await {
        return response;
    }
    run_query(state, request, handle_datasets).await
}

async fn search_datasets_get(
    State(state): State<BeaconState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let request = match parse_query(&state, &params, false) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = authenticate(&state, &headers).await {
        return response;
    }
    run_query(state, request, handle_datasets).await
}

async fn search_individuals(
    State(state): State<BeaconState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match parse_body(&state, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = authenticate(&state, &headers).await {
        return response;
    }
    run_query(state, request, handle_individuals).await
}

async fn search_individuals_get(
    State(state): State<BeaconState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let request = match parse_query(&state, &params, false) {
        Ok(request) => request,
        Err(response) => return response,
    };
    if let Err(response) = authenticate(&state, &headers).await {
        return response;
    }
    run_query(state, request, handle_individuals).await
}
