//! ValidatingAdmissionWebhook endpoint for Extension resources

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{Json, Router, routing::post};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::policies::{ValidationContext, validate_all};
use crate::crd::Extension;

/// HTTP status reported with a denial
const DENIED_CODE: u16 = 403;

/// Errors that can occur when running the webhook server
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    #[error("Webhook server error: {0}")]
    Server(String),
}

pub fn create_webhook_router() -> Router {
    Router::new().route("/validate-extension", post(validate_extension))
}

async fn validate_extension(
    Json(review): Json<AdmissionReview<Extension>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Extension> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Rejecting malformed AdmissionReview");
            return Json(AdmissionResponse::invalid(e).into_review());
        }
    };
    Json(review_request(&request).into_review())
}

/// Decide a single admission request against the Extension policies
pub fn review_request(request: &AdmissionRequest<Extension>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    debug!(
        uid = %request.uid,
        operation = ?request.operation,
        name = %request.name,
        "Reviewing Extension admission request"
    );

    let Some(extension) = request.object.as_ref() else {
        // DELETE carries only the old object
        if request.operation == Operation::Delete {
            return response;
        }
        return response.deny("request carries no Extension object");
    };

    let result = validate_all(&ValidationContext::new(
        extension,
        request.old_object.as_ref(),
    ));
    if result.allowed {
        return response;
    }

    let reason = result.reason.unwrap_or_else(|| "ValidationFailed".to_string());
    let message = result.message.unwrap_or_else(|| "validation failed".to_string());
    warn!(uid = %request.uid, name = %request.name, reason = %reason, message = %message, "Denied Extension");

    let mut response = response.deny(message);
    response.result.reason = reason;
    response.result.code = DENIED_CODE;
    response
}

/// Serve `/validate-extension` over TLS with the PEM pair at the given paths
pub async fn run_webhook_server(
    cert_path: &str,
    key_path: &str,
    port: u16,
) -> Result<(), WebhookError> {
    let tls = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "Admission webhook listening");

    axum_server::bind_rustls(addr, tls)
        .serve(create_webhook_router().into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))
}
