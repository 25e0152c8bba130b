//! Error-to-response shaping.
//!
//! Requests under a Beacon base path receive Beacon error responses (meta +
//! `error` block); everything else receives a plain `{status_code, message}`
//! JSON. Internal errors are logged in full but answered with a fixed
//! message.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse as _, Response};

use crate::beacon::model::{BeaconError, BeaconRequest, BeaconResponse};
use crate::beacon::setup::BeaconSetup;

pub const INTERNAL_ERROR_MESSAGE: &str = "Failed to serve the request due to technical error";

/// A Beacon-shaped error response for the given personality.
pub fn beacon_error_response(
    setup: &BeaconSetup,
    request: &BeaconRequest,
    status: StatusCode,
    message: &str,
) -> Response {
    let response = BeaconResponse {
        meta: setup.query_response_meta(request, None),
        response_summary: None,
        response: None,
        error: Some(BeaconError {
            error_code: status.as_u16(),
            error_message: Some(message.to_owned()),
        }),
    };
    (status, axum::Json(response)).into_response()
}

/// The simple JSON error used outside the Beacon base paths.
pub fn default_error_response(status: StatusCode, message: &str) -> Response {
    let payload = serde_json::json!({
        "status_code": status.as_u16(),
        "message": message,
    });
    (status, axum::Json(payload)).into_response()
}

/// Routes an error to the Beacon personality owning the request path, or to
/// the plain JSON shape when neither personality matches.
#[derive(Clone, Default)]
pub struct ErrorShaper {
    pub aggregated: Option<Arc<BeaconSetup>>,
    pub sensitive: Option<Arc<BeaconSetup>>,
}

impl ErrorShaper {
    pub fn shape(
        &self,
        path: &str,
        request: Option<&BeaconRequest>,
        status: StatusCode,
        message: &str,
    ) -> Response {
        let setup = [&self.aggregated, &self.sensitive]
            .into_iter()
            .flatten()
            .find(|setup| path.starts_with(setup.base_path()));

        match setup {
            Some(setup) => {
                let fallback = BeaconRequest::default();
                beacon_error_response(setup, request.unwrap_or(&fallback), status, message)
            }
            None => default_error_response(status, message),
        }
    }
}
