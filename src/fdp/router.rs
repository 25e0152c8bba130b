//! The HTTP routes of the FAIR Data Point.
//!
//! Graph endpoints return `text/turtle` by default and JSON-LD when the
//! `Accept` header asks for `application/ld+json`. Sibling `/valid`
//! endpoints run the SHACL validator over the freshly rendered graph and
//! return the textual report. Unknown ids answer 404 in plain text.

use std::sync::{Arc, RwLock};

use axum::Router;
use axum::extract::{OriginalUri, Path, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse as _, Response};
use axum::routing::get;

use crate::fdp::FdpSetup;
use crate::fdp::graph::Graph;
use crate::fdp::shacl;
use crate::registry::DataRegistry;

const NOT_FOUND_TEXT: &str = "Sorry, this URL path is not supported";

#[derive(Clone)]
pub struct FdpState {
    pub setup: Arc<FdpSetup>,
    pub registry: Arc<RwLock<DataRegistry>>,
}

/// Builds the FDP router; the caller nests it under the FDP base path.
pub fn fdp_router(state: FdpState) -> Router {
    Router::new()
        .route("/", get(fairdp_info))
        .route("/valid", get(fairdp_info_report))
        .route("/catalog", get(catalogs))
        .route("/catalog/valid", get(catalogs_report))
        .route("/catalog/{catalog_id}", get(catalog))
        .route("/catalog/{catalog_id}/valid", get(catalog_report))
        .route("/dataset/{dataset_id}", get(dataset))
        .route("/dataset/{dataset_id}/valid", get(dataset_report))
        .route("/profile/{profile_id}", get(profile))
        .route("/profile/{profile_id}/valid", get(profile_report))
        .route("/shacl/{shacl_id}", get(shacl_document))
        .fallback(|| async { not_found() })
        .with_state(state)
}

/// Base URL (without path) of the service.
fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

fn request_url(headers: &HeaderMap, uri: &OriginalUri) -> String {
    format!("{}{}", base_url(headers), uri.path())
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, NOT_FOUND_TEXT).into_response()
}

fn internal_error(e: &anyhow::Error) -> Response {
    tracing::error!("FDP rendering failed: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to serve the request due to technical error",
    )
        .into_response()
}

fn wants_jsonld(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept == "application/ld+json")
}

/// Converts the graph into an RDF Turtle or JSON-LD response, or a 404 when
/// the graph is missing.
fn to_response(headers: &HeaderMap, graph: Option<Graph>) -> Response {
    let Some(graph) = graph else {
        return not_found();
    };

    if wants_jsonld(headers) {
        let body = graph.to_jsonld().to_string();
        ([(CONTENT_TYPE, "application/ld+json")], body).into_response()
    } else {
        ([(CONTENT_TYPE, "text/turtle")], graph.to_turtle()).into_response()
    }
}

fn id_is_valid(id: &str) -> bool {
    !id.is_empty() && id.len() <= 40
}

// ---------------------------------------------------------------- //
// Handlers
// ---------------------------------------------------------------- //

async fn fairdp_info(State(state): State<FdpState>, headers: HeaderMap) -> Response {
    match state.setup.get_service_info(&state.registry, &base_url(&headers)) {
        Ok(graph) => to_response(&headers, Some(graph)),
        Err(e) => internal_error(&e),
    }
}

async fn fairdp_info_report(
    State(state): State<FdpState>,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Response {
    match state.setup.get_service_info(&state.registry, &base_url(&headers)) {
        Ok(graph) => {
            let report = state.setup.validate_graph(&graph, &request_url(&headers, &uri), None);
            report.into_response()
        }
        Err(e) => internal_error(&e),
    }
}

async fn catalogs(State(state): State<FdpState>, headers: HeaderMap) -> Response {
    match state.setup.get_catalogs(&state.registry, &base_url(&headers)) {
        Ok(graph) => to_response(&headers, Some(graph)),
        Err(e) => internal_error(&e),
    }
}

async fn catalogs_report(
    State(state): State<FdpState>,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Response {
    match state.setup.get_catalogs(&state.registry, &base_url(&headers)) {
        Ok(graph) => state
            .setup
            .validate_graph(&graph, &request_url(&headers, &uri), Some("catalogs"))
            .into_response(),
        Err(e) => internal_error(&e),
    }
}

async fn catalog(
    State(state): State<FdpState>,
    Path(catalog_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !id_is_valid(&catalog_id) {
        return not_found();
    }
    match state.setup.get_catalog(&state.registry, &base_url(&headers), &catalog_id) {
        Ok(graph) => to_response(&headers, graph),
        Err(e) => internal_error(&e),
    }
}

async fn catalog_report(
    State(state): State<FdpState>,
    Path(catalog_id): Path<String>,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Response {
    match state.setup.get_catalog(&state.registry, &base_url(&headers), &catalog_id) {
        Ok(Some(graph)) => state
            .setup
            .validate_graph(&graph, &request_url(&headers, &uri), None)
            .into_response(),
        Ok(None) => not_found(),
        Err(e) => internal_error(&e),
    }
}

async fn dataset(
    State(state): State<FdpState>,
    Path(dataset_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !id_is_valid(&dataset_id) {
        return not_found();
    }
    match state.setup.get_dataset(&state.registry, &base_url(&headers), &dataset_id) {
        Ok(graph) => to_response(&headers, graph),
        Err(e) => internal_error(&e),
    }
}

async fn dataset_report(
    State(state): State<FdpState>,
    Path(dataset_id): Path<String>,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Response {
    match state.setup.get_dataset(&state.registry, &base_url(&headers), &dataset_id) {
        Ok(Some(graph)) => state
            .setup
            .validate_graph(&graph, &request_url(&headers, &uri), None)
            .into_response(),
        Ok(None) => not_found(),
        Err(e) => internal_error(&e),
    }
}

async fn profile(
    State(state): State<FdpState>,
    Path(profile_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !id_is_valid(&profile_id) {
        return not_found();
    }
    match state.setup.get_profile(&base_url(&headers), &profile_id) {
        Ok(graph) => to_response(&headers, graph),
        Err(e) => internal_error(&e),
    }
}

async fn profile_report(
    State(state): State<FdpState>,
    Path(profile_id): Path<String>,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Response {
    match state.setup.get_profile(&base_url(&headers), &profile_id) {
        Ok(Some(graph)) => state
            .setup
            .validate_graph(&graph, &request_url(&headers, &uri), None)
            .into_response(),
        Ok(None) => not_found(),
        Err(e) => internal_error(&e),
    }
}

async fn shacl_document(
    State(_state): State<FdpState>,
    Path(shacl_id): Path<String>,
    headers: HeaderMap,
    uri: OriginalUri,
) -> Response {
    if !id_is_valid(&shacl_id) {
        return not_found();
    }
    let resource_url = request_url(&headers, &uri);

    if wants_jsonld(&headers) {
        return to_response(&headers, shacl::shacl_graph(&resource_url, &shacl_id));
    }
    match shacl::shacl_source(&resource_url, &shacl_id) {
        Some(source) => ([(CONTENT_TYPE, "text/turtle")], source).into_response(),
        None => not_found(),
    }
}
