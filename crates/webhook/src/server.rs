//! HTTP surface of the admission service.

use axum::{http::StatusCode, response::Json, routing::get, routing::post, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::mutate;
use crate::review::{AdmissionResponse, AdmissionReview, Status};

/// Build the router: `/mutate` for admission reviews, `/health` for probes.
pub fn build_router() -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Decide one admission review. The response always echoes the request UID;
/// a review without a request is itself a malformed write and gets rejected.
async fn mutate_handler(
    Json(review): Json<AdmissionReview>,
) -> Result<Json<AdmissionReview>, StatusCode> {
    let Some(request) = &review.request else {
        error!("admission review carried no request");
        return Err(StatusCode::BAD_REQUEST);
    };

    let decision = mutate::decide(&request.kind.kind, request.object.clone());
    info!(
        uid = %request.uid,
        kind = %request.kind.kind,
        allowed = decision.allowed,
        patched = decision.patch.is_some(),
        "admission decision"
    );

    let mut response = AdmissionResponse {
        uid: request.uid.clone(),
        allowed: decision.allowed,
        status: decision.error.map(|message| Status { message }),
        patch: None,
        patch_type: None,
    };
    if let Some(patch) = decision.patch {
        let encoded = serde_json::to_vec(&patch).map_err(|e| {
            error!(error = %e, "failed to encode patch");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        response.patch = Some(BASE64.encode(encoded));
        response.patch_type = Some("JSONPatch".to_string());
    }

    Ok(Json(AdmissionReview::response_for(&review, response)))
}
