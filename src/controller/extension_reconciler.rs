//! Reconciler for Extension resources
//!
//! Wraps a [`ReconcilePass`] with everything that touches the Extension
//! object: the finalizer, the resolved-reference write-back and the status
//! patch. Errors from the pass are returned to the controller runtime so
//! that `error_policy` schedules the retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::pass::{PassAction, PassOutcome, ReconcilePass};
use crate::controller::resolver::ResolvedTarget;
use crate::controller::status::{conditions_for, update_status};
use crate::crd::Extension;

/// Finalizer guarding the extension drop
pub const FINALIZER: &str = "extension.postgres-operator.smoketurner.com/finalizer";

/// Field manager for patches issued by the operator
const FIELD_MANAGER: &str = "postgres-extension-operator";

/// Reconcile an Extension resource
#[instrument(skip(ext, ctx), fields(name = %ext.name_any()))]
pub async fn reconcile(ext: Arc<Extension>, ctx: Arc<Context>) -> Result<Action> {
    let name = ext.name_any();
    let api: Api<Extension> = Api::all(ctx.client.clone());
    let deleting = ext.metadata.deletion_timestamp.is_some();

    if !has_finalizer(&ext) {
        if deleting {
            // Nothing of ours left to clean up
            return Ok(Action::await_change());
        }
        add_finalizer(&api, &ext).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    debug!("Reconciling Extension");
    let started = Instant::now();
    let outcome = ReconcilePass::new(ctx.lookup.as_ref(), ctx.factory.as_ref())
        .run_with_deadline(&ext, ctx.config.pass_timeout)
        .await;
    record_metrics(&ctx, &name, &outcome, started);

    if let Some(target) = outcome.target.as_ref().filter(|t| t.write_back)
        && !deleting
    {
        write_back_reference(&api, &ext, target).await?;
    }

    if outcome.release_finalizer {
        remove_finalizer(&api, &ext).await?;
        ctx.retries.reset(&name);
        if let Some(health) = &ctx.health_state {
            health.metrics.forget(&name);
        }
        info!(action = ?outcome.action, "Extension deleted, finalizer removed");
        return Ok(Action::await_change());
    }

    let conditions = conditions_for(&ext, &outcome);
    if update_status(&api, &ext, conditions).await? {
        debug!("Updated Extension status");
    }

    match outcome.error {
        Some(e) => Err(e),
        None => {
            ctx.retries.reset(&name);
            if let Some(health) = &ctx.health_state {
                health.touch_last_reconcile();
            }
            Ok(Action::requeue(ctx.config.poll_interval))
        }
    }
}

fn record_metrics(ctx: &Context, name: &str, outcome: &PassOutcome, started: Instant) {
    let Some(health) = &ctx.health_state else {
        return;
    };
    let metrics = &health.metrics;
    metrics.record_reconcile(name, started.elapsed().as_secs_f64());
    if let Some(e) = &outcome.error {
        metrics.record_error(name, e.reason());
    }
    match outcome.action {
        PassAction::Created => metrics.record_action("create"),
        PassAction::Updated => metrics.record_action("update"),
        PassAction::Dropped => metrics.record_action("drop"),
        PassAction::None | PassAction::Orphaned => {}
    }
    metrics.set_ready(name, outcome.is_available());
}

/// Persist a resolved database reference into `spec.forProvider`
async fn write_back_reference(
    api: &Api<Extension>,
    ext: &Extension,
    target: &ResolvedTarget,
) -> Result<()> {
    api.patch(
        &ext.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&target.write_back_patch()),
    )
    .await?;
    info!(database = %target.database, source = ?target.source, "Recorded resolved database reference");
    Ok(())
}

pub(crate) fn has_finalizer(ext: &Extension) -> bool {
    ext.finalizers().iter().any(|f| f == FINALIZER)
}

/// Finalizer list with ours appended
pub(crate) fn with_finalizer(ext: &Extension) -> Vec<String> {
    let mut finalizers = ext.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }
    finalizers
}

/// Finalizer list with ours removed
pub(crate) fn without_finalizer(ext: &Extension) -> Vec<String> {
    ext.finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect()
}

async fn add_finalizer(api: &Api<Extension>, ext: &Extension) -> Result<()> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": with_finalizer(ext)
        }
    });

    api.patch(
        &ext.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}

async fn remove_finalizer(api: &Api<Extension>, ext: &Extension) -> Result<()> {
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": without_finalizer(ext)
        }
    });

    match api
        .patch(
            &ext.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
    {
        Ok(_) => Ok(()),
        // Already gone
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Error policy for the Extension controller
///
/// Backs off exponentially per Extension; provider configuration failures
/// wait for the longer credentials ceiling.
pub fn error_policy(ext: Arc<Extension>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = ext.name_any();
    let (attempt, delay) = ctx.retries.next_delay(&name, error, &ctx.config.backoff);

    if error.is_retryable() {
        warn!(
            name = %name,
            error = %error,
            attempt = attempt + 1,
            requeue_in = ?delay,
            "Retryable error reconciling Extension"
        );
    } else {
        error!(
            name = %name,
            error = %error,
            attempt = attempt + 1,
            requeue_in = ?delay,
            "Non-retryable error reconciling Extension, waiting for a spec or credentials change"
        );
    }

    Action::requeue(delay)
}
