//! Router assembly and the node-level endpoints.
//!
//! `GET /` is a plaintext status page (routes, catalogs, Beacon file trees,
//! problematic files), optionally protected by Basic authentication.
//! `GET /health` answers a minimal liveness JSON. Unmatched paths fall back
//! to the error shape owned by the path: Beacon error under a Beacon base
//! path, plain text under the FDP, JSON elsewhere.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::Router;
use axum::extract::{OriginalUri, State};
use axum::http::header::{AUTHORIZATION, HOST, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse as _, Response};
use axum::routing::get;
use chrono::{SecondsFormat, Utc};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::beacon::error::ErrorShaper;
use crate::beacon::{BeaconState, beacon_router};
use crate::context::ServiceContext;
use crate::fdp::{FdpState, fdp_router};
use crate::registry::BeaconData;

/// Upper bound for one request. Generous, as a passport validation may
/// retry its JWKS fetches before giving up.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(90);

#[derive(Clone)]
struct ApiState {
    ctx: Arc<ServiceContext>,
    routes: Arc<Vec<(&'static str, String)>>,
    shaper: ErrorShaper,
    fdp_base: Option<String>,
}

/// Assembles the complete application router from the enabled modules.
pub fn build_router(ctx: Arc<ServiceContext>) -> Router {
    let mut routes: Vec<(&'static str, String)> =
        vec![("GET", "/".to_owned()), ("GET", "/health".to_owned())];

    let mut router = Router::new();

    for setup in [&ctx.aggregated, &ctx.sensitive].into_iter().flatten() {
        let base = setup.base_path().trim_end_matches('/').to_owned();
        for path in ["", "/info", "/service-info", "/configuration", "/entry_types", "/map", "/filtering_terms"] {
            routes.push(("GET", format!("{base}{path}")));
        }
        if setup.is_aggregated() {
            routes.push(("POST", format!("{base}/g_variants")));
            routes.push(("POST", format!("{base}/datasets")));
        } else {
            routes.push(("POST", format!("{base}/individuals")));
        }

        let state = BeaconState {
            setup: Arc::clone(setup),
            registry: Arc::clone(&ctx.registry),
        };
        router = router.nest_service(&base, beacon_router(state));
    }

    let mut fdp_base = None;
    if let Some(setup) = &ctx.fdp {
        let base = setup.base_path().trim_end_matches('/').to_owned();
        for path in [
            "",
            "/valid",
            "/catalog",
            "/catalog/{id}",
            "/dataset/{id}",
            "/profile/{id}",
            "/shacl/{id}",
        ] {
            routes.push(("GET", format!("{base}{path}")));
        }
        let state = FdpState {
            setup: Arc::clone(setup),
            registry: Arc::clone(&ctx.registry),
        };
        router = router.nest_service(&base, fdp_router(state));
        fdp_base = Some(base);
    }

    routes.sort_by(|a, b| a.1.cmp(&b.1));

    let state = ApiState {
        shaper: ErrorShaper {
            aggregated: ctx.aggregated.clone(),
            sensitive: ctx.sensitive.clone(),
        },
        fdp_base,
        routes: Arc::new(routes),
        ctx,
    };

    router
        .route("/", get(get_status))
        .route("/health", get(get_health))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

async fn get_health(State(state): State<ApiState>) -> Response {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    axum::Json(serde_json::json!({
        "timestamp": timestamp,
        "version": state.ctx.version,
        "healthy": true,
    }))
    .into_response()
}

async fn not_found(State(state): State<ApiState>, uri: OriginalUri) -> Response {
    let path = uri.path();
    if let Some(fdp_base) = &state.fdp_base
        && path.starts_with(fdp_base.as_str())
    {
        return (StatusCode::NOT_FOUND, "Sorry, this URL path is not supported").into_response();
    }
    state.shaper.shape(path, None, StatusCode::NOT_FOUND, "Not Found")
}

// ---------------------------------------------------------------- //
// The status page
// ---------------------------------------------------------------- //

async fn get_status(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if let Some(expected) = &state.ctx.info_page_credentials {
        let provided = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
        if provided != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, "Basic")],
                "This resource requires BASIC authentication.",
            )
                .into_response();
        }
    }

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let base_url = format!("http://{host}");

    let Ok(registry) = state.ctx.registry.read() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "registry unavailable").into_response();
    };

    let mut content = String::from("Federated Data Node\n===================\n");

    let problematic = registry.problematic_files();
    if !problematic.is_empty() {
        content.push_str("\nProblematic Files\n-----------------\n\n");
        for (file_path, issue) in &problematic {
            let _ = writeln!(content, "* [{file_path}]\n  {issue}");
        }
        content.push('\n');
    }

    content.push_str("\nEndpoints\n---------\n\n");
    for (method, path) in state.routes.iter() {
        let _ = writeln!(content, "* {method:4} {base_url}{path}");
    }

    content.push_str("\n\n\nFAIR Data Point\n===============\n\nCatalogs\n--------\n\n");
    for (catalog_id, catalog) in &registry.fdp.catalogs {
        let _ = writeln!(content, "* [{catalog_id}] {}", catalog.title);
        if let Some(dataset_ids) = registry.fdp.catalog_datasets.get(catalog_id) {
            for dataset_id in dataset_ids {
                if let Some(dataset) = registry.fdp.datasets.get(dataset_id) {
                    let _ = writeln!(content, "  - [{dataset_id}] {}", dataset.title);
                }
            }
        }
    }

    // Datasets referencing a catalog that is not configured are hidden from
    // the FDP; surface them here so the operator notices.
    let mut hidden: Vec<(&String, &String, &String)> = Vec::new();
    for (dataset_id, props) in &registry.fdp.datasets {
        if !registry.fdp.catalogs.contains_key(&props.catalog_id) {
            hidden.push((&props.catalog_id, dataset_id, &props.title));
        }
    }
    if !hidden.is_empty() {
        hidden.sort();
        content.push_str(
            "\n\nHidden Datasets (bad catalog_id value)\n--------------------------------------\n\n",
        );
        let mut last_catalog: Option<&str> = None;
        for (catalog_id, dataset_id, title) in hidden {
            if last_catalog != Some(catalog_id.as_str()) {
                let _ = writeln!(content, "* [{catalog_id}]");
                last_catalog = Some(catalog_id.as_str());
            }
            let _ = writeln!(content, "  - [{dataset_id}] {title}");
        }
    }

    content.push_str(&beacon_data_as_str(&registry.aggregated_beacon, "Aggregated"));
    content.push_str(&beacon_data_as_str(&registry.sensitive_beacon, "Sensitive"));

    content.into_response()
}

fn beacon_data_as_str(data: &BeaconData, title: &str) -> String {
    let heading = format!("GA4GH Beacon ({title})");
    let mut content = format!("\n\n\n{heading}\n{}\n\n", "=".repeat(heading.len()));

    for (assembly, datasets) in &data.assemblies {
        let name = assembly.to_string();
        let _ = writeln!(content, "{name}\n{}\n", "-".repeat(name.len()));
        for dataset in datasets {
            let _ = writeln!(content, "* [{}]", dataset.dataset_id);
            if let Some(individuals) = &dataset.individuals_parquet {
                let _ = writeln!(content, "  - [{}]", individuals.display());
            }
            let mut groups: Vec<&String> = dataset.chr_group_files.keys().collect();
            groups.sort_by_key(|group| file_sort_key(group));
            for group in groups {
                let _ = writeln!(content, "  - [{}]", dataset.chr_group_files[group].display());
            }
        }
    }

    content
}

/// Orders chr-group keys numerically with X, Y and M after chromosome 22.
fn file_sort_key(chr_group: &str) -> u64 {
    let Some((chromosome, group)) = chr_group.split_once('.') else {
        return 0;
    };
    let key: u64 = group.parse().unwrap_or(0);
    match chromosome {
        "X" => key + 25_000,
        "Y" => key + 26_000,
        "M" => key + 27_000,
        number => key + number.parse::<u64>().unwrap_or(0) * 1_000,
    }
}
