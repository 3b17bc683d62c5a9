//! Admission webhooks for Extension validation
//!
//! This module implements a ValidatingAdmissionWebhook that rejects
//! malformed Extensions and changes to immutable fields before they are
//! persisted.

pub mod policies;
mod server;

pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
pub use policies::{ValidationContext, ValidationResult};
pub use server::{WebhookError, create_webhook_router, review_request, run_webhook_server};
