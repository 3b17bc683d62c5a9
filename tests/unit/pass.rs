//! Unit tests for the reconcile pass against in-memory collaborators

use std::sync::Arc;
use std::time::Duration;

use postgres_extension_operator::controller::status::{
    condition_reasons, condition_status, condition_types,
};
use postgres_extension_operator::controller::{
    Error, ExtensionState, PassAction, PassOutcome, ReconcilePass, TargetSource, conditions_for,
};
use postgres_extension_operator::crd::{
    Conditioned, Database, Extension, ExtensionStatus, ResourceStatus,
};

use crate::common::*;

fn fixture(
    client: FakeClient,
    databases: Vec<Database>,
) -> (Arc<FakeClient>, FakeFactory, FakeLookup) {
    let client = Arc::new(client);
    let factory = FakeFactory::new(client.clone());
    (client, factory, FakeLookup::new(databases))
}

/// Apply the conditions from a pass to the Extension, as the status patch would
fn with_status(mut ext: Extension, outcome: &PassOutcome) -> Extension {
    let conditions = conditions_for(&ext, outcome);
    ext.status = Some(ExtensionStatus {
        resource: ResourceStatus { conditions },
    });
    ext
}

// =============================================================================
// Creation
// =============================================================================

#[tokio::test]
async fn test_pgcrypto_scenario_creates_once_and_becomes_ready() {
    let ext = ExtensionBuilder::new("pgcrypto-db-a", "pgcrypto")
        .with_version("1.3")
        .with_database_ref("db-a")
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new(), vec![database("db-a", &[])]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(outcome.is_success(), "unexpected error: {:?}", outcome.error);
    assert_eq!(outcome.action, PassAction::Created);
    assert_eq!(
        client.create_calls(),
        vec![(
            "db-a".to_string(),
            "pgcrypto".to_string(),
            Some("1.3".to_string())
        )]
    );
    assert_eq!(outcome.state, Some(ExtensionState::PresentSynced));

    let ext = with_status(ext, &outcome);
    let ready = ext.condition(condition_types::READY).unwrap();
    let synced = ext.condition(condition_types::SYNCED).unwrap();
    assert_eq!(ready.status, condition_status::TRUE);
    assert_eq!(ready.reason, condition_reasons::AVAILABLE);
    assert_eq!(synced.status, condition_status::TRUE);
    assert_eq!(synced.reason, condition_reasons::RECONCILE_SUCCESS);
}

#[tokio::test]
async fn test_missing_extension_is_observed_synced_after_create() {
    let ext = ExtensionBuilder::new("hstore-orders", "hstore")
        .with_database("orders")
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new(), vec![]);
    let pass = ReconcilePass::new(&lookup, &factory);

    let first = pass.run(&ext).await;
    assert_eq!(first.action, PassAction::Created);
    assert_eq!(client.creates(), 1);

    let second = pass.run(&ext).await;
    let observation = second.observation.unwrap();
    assert!(observation.exists);
    assert!(observation.up_to_date);
    assert_eq!(client.creates(), 1);
}

#[tokio::test]
async fn test_synced_extension_issues_no_mutations() {
    let ext = ExtensionBuilder::new("pgcrypto-orders", "pgcrypto")
        .with_version("1.3")
        .with_database("orders")
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new(), vec![]);
    let pass = ReconcilePass::new(&lookup, &factory);

    pass.run(&ext).await;
    let mutations_after_first = client.mutations();

    let second = pass.run(&ext).await;
    assert!(second.is_success());
    assert_eq!(second.action, PassAction::None);
    assert_eq!(second.state, Some(ExtensionState::PresentSynced));
    assert_eq!(client.mutations(), mutations_after_first);
}

#[tokio::test]
async fn test_create_failure_is_reported() {
    let ext = ExtensionBuilder::new("postgis-orders", "postgis")
        .with_database("orders")
        .build();
    let (client, factory, lookup) = fixture(
        FakeClient::new().failing_create("extension \"postgis\" is not available"),
        vec![],
    );

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(matches!(outcome.error, Some(Error::ExtensionCreateError(_))));
    assert_eq!(outcome.state, Some(ExtensionState::Missing));
    assert_eq!(client.creates(), 1);
    assert!(!outcome.is_available());
}

// =============================================================================
// Drift
// =============================================================================

#[tokio::test]
async fn test_drifted_version_is_updated() {
    let ext = ExtensionBuilder::new("pgcrypto-orders", "pgcrypto")
        .with_version("1.3")
        .with_database("orders")
        .build();
    let (client, factory, lookup) =
        fixture(FakeClient::new().with_installed("orders", "pgcrypto", "1.2"), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.action, PassAction::Updated);
    assert_eq!(client.updates(), 1);
    assert_eq!(client.creates(), 0);
    assert_eq!(client.installed_version("orders", "pgcrypto").as_deref(), Some("1.3"));
    assert!(outcome.is_available());
}

#[tokio::test]
async fn test_unpinned_version_accepts_any_installed_version() {
    let ext = ExtensionBuilder::new("hstore-orders", "hstore")
        .with_database("orders")
        .build();
    let (client, factory, lookup) =
        fixture(FakeClient::new().with_installed("orders", "hstore", "1.8"), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert_eq!(outcome.action, PassAction::None);
    assert_eq!(client.mutations(), 0);
    assert!(outcome.is_available());
}

// =============================================================================
// Fail-fast paths
// =============================================================================

#[tokio::test]
async fn test_missing_target_fails_without_client_calls() {
    let ext = ExtensionBuilder::new("pgcrypto", "pgcrypto").build();
    let (client, factory, lookup) = fixture(FakeClient::new(), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(matches!(outcome.error, Some(Error::ValidationError(_))));
    assert_eq!(client.total_calls(), 0);
    assert_eq!(factory.connects(), 0);
    assert_eq!(lookup.calls(), 0);

    let ext = with_status(ext, &outcome);
    let ready = ext.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::FALSE);
    assert_eq!(ready.reason, condition_reasons::VALIDATION_ERROR);
    let synced = ext.condition(condition_types::SYNCED).unwrap();
    assert_eq!(synced.status, condition_status::FALSE);
    assert_eq!(synced.reason, "ValidationError");
}

#[tokio::test]
async fn test_unknown_provider_config_fails_before_observe() {
    let ext = ExtensionBuilder::new("pgcrypto-orders", "pgcrypto")
        .with_database("orders")
        .with_provider_config("staging")
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new(), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(matches!(outcome.error, Some(Error::ProviderConfigError(_))));
    assert_eq!(client.total_calls(), 0);
    assert_eq!(outcome.target.as_ref().unwrap().database, "orders");

    let ext = with_status(ext, &outcome);
    let ready = ext.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::UNKNOWN);
    let synced = ext.condition(condition_types::SYNCED).unwrap();
    assert_eq!(synced.reason, "ProviderConfigError");
}

#[tokio::test]
async fn test_missing_database_reports_not_found() {
    let ext = ExtensionBuilder::new("pgcrypto-gone", "pgcrypto")
        .with_database("gone")
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new().without_database("gone"), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(matches!(outcome.error, Some(Error::NotFoundError(_))));
    assert_eq!(client.creates(), 0);

    let ext = with_status(ext, &outcome);
    let ready = ext.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::FALSE);
    assert_eq!(ready.reason, condition_reasons::UNAVAILABLE);
}

#[tokio::test]
async fn test_unresolvable_selector_leaves_ready_false() {
    let ext = ExtensionBuilder::new("pgcrypto-sel", "pgcrypto")
        .with_selector(&[("app", "orders")])
        .build();
    let (client, factory, lookup) = fixture(
        FakeClient::new(),
        vec![database("db-x", &[("app", "billing")])],
    );

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(outcome.error.as_ref().is_some_and(|e| e.is_persistent()));
    assert_eq!(client.total_calls(), 0);

    let ext = with_status(ext, &outcome);
    let ready = ext.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::FALSE);
    assert_eq!(ready.reason, condition_reasons::REFERENCE_NOT_FOUND);
}

#[tokio::test]
async fn test_selector_resolution_requests_write_back() {
    let ext = ExtensionBuilder::new("pgcrypto-sel", "pgcrypto")
        .with_selector(&[("app", "orders")])
        .build();
    let (client, factory, lookup) = fixture(
        FakeClient::new(),
        vec![
            database("orders-b", &[("app", "orders")]),
            database("orders-a", &[("app", "orders")]),
        ],
    );

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    let target = outcome.target.unwrap();
    assert_eq!(target.database, "orders-a");
    assert_eq!(target.source, TargetSource::Selector);
    assert!(target.write_back);
    assert_eq!(client.create_calls()[0].0, "orders-a");
}

// =============================================================================
// Deletion
// =============================================================================

#[tokio::test]
async fn test_deletion_drops_and_releases_finalizer() {
    let ext = ExtensionBuilder::new("pgcrypto-orders", "pgcrypto")
        .with_database("orders")
        .deleting()
        .build();
    let (client, factory, lookup) =
        fixture(FakeClient::new().with_installed("orders", "pgcrypto", "1.3"), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.action, PassAction::Dropped);
    assert!(outcome.release_finalizer);
    assert_eq!(outcome.state, Some(ExtensionState::Deleting));
    assert!(client.installed_version("orders", "pgcrypto").is_none());
}

#[tokio::test]
async fn test_deleting_absent_extension_twice_succeeds() {
    let ext = ExtensionBuilder::new("pgcrypto-orders", "pgcrypto")
        .with_database("orders")
        .deleting()
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new(), vec![]);
    let pass = ReconcilePass::new(&lookup, &factory);

    let first = pass.run(&ext).await;
    let second = pass.run(&ext).await;

    assert!(first.is_success());
    assert!(second.is_success());
    assert!(second.release_finalizer);
    assert_eq!(client.deletes(), 2);
}

#[tokio::test]
async fn test_orphan_policy_leaves_extension_installed() {
    let ext = ExtensionBuilder::new("pgcrypto-orders", "pgcrypto")
        .with_database("orders")
        .orphan_on_delete()
        .deleting()
        .build();
    let (client, factory, lookup) =
        fixture(FakeClient::new().with_installed("orders", "pgcrypto", "1.3"), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert_eq!(outcome.action, PassAction::Orphaned);
    assert!(outcome.release_finalizer);
    assert_eq!(client.total_calls(), 0);
    assert_eq!(client.installed_version("orders", "pgcrypto").as_deref(), Some("1.3"));
}

#[tokio::test]
async fn test_deletion_with_vanished_database_releases_finalizer() {
    let ext = ExtensionBuilder::new("pgcrypto-gone", "pgcrypto")
        .with_database("gone")
        .deleting()
        .build();
    let (_client, factory, lookup) = fixture(FakeClient::new().without_database("gone"), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(outcome.is_success());
    assert!(outcome.release_finalizer);
    assert_eq!(outcome.action, PassAction::None);
}

#[tokio::test]
async fn test_deletion_without_resolvable_target_skips_drop() {
    let ext = ExtensionBuilder::new("pgcrypto-sel", "pgcrypto")
        .with_selector(&[("app", "orders")])
        .deleting()
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new(), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(outcome.is_success());
    assert!(outcome.release_finalizer);
    assert_eq!(client.deletes(), 0);
}

#[tokio::test]
async fn test_deletion_keeps_finalizer_when_lookup_is_unreachable() {
    let ext = ExtensionBuilder::new("pgcrypto-sel", "pgcrypto")
        .with_selector(&[("app", "orders")])
        .deleting()
        .build();
    let client = Arc::new(FakeClient::new());
    let factory = FakeFactory::new(client.clone());
    let lookup = FakeLookup::unreachable("connection refused");

    let outcome = ReconcilePass::new(&lookup, &factory).run(&ext).await;

    assert!(!outcome.release_finalizer);
    assert!(matches!(
        outcome.error,
        Some(Error::ReferenceResolutionError { .. })
    ));
    assert_eq!(client.deletes(), 0);

    let ext = with_status(ext, &outcome);
    let ready = ext.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::FALSE);
    assert_eq!(ready.reason, condition_reasons::DELETING);
}

// =============================================================================
// Deadline
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stalled_server_times_out_as_retryable() {
    let ext = ExtensionBuilder::new("pgcrypto-db-a", "pgcrypto")
        .with_database_ref("db-a")
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new().unresponsive(), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory)
        .run_with_deadline(&ext, Duration::from_secs(30))
        .await;

    assert!(matches!(outcome.error, Some(Error::Timeout(d)) if d == Duration::from_secs(30)));
    assert!(outcome.error.as_ref().unwrap().is_retryable());
    assert_eq!(client.observes(), 1);
    assert_eq!(client.mutations(), 0);

    let ext = with_status(ext, &outcome);
    let synced = ext.condition(condition_types::SYNCED).unwrap();
    assert_eq!(synced.status, condition_status::FALSE);
    assert_eq!(synced.reason, "Timeout");
    let ready = ext.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::UNKNOWN);
    assert_eq!(ready.reason, condition_reasons::UNAVAILABLE);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_drop_keeps_finalizer() {
    let ext = ExtensionBuilder::new("pgcrypto-db-a", "pgcrypto")
        .with_database_ref("db-a")
        .deleting()
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new().unresponsive(), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory)
        .run_with_deadline(&ext, Duration::from_secs(30))
        .await;

    assert!(matches!(outcome.error, Some(Error::Timeout(_))));
    assert!(!outcome.release_finalizer);
    assert_eq!(client.deletes(), 1);
    let ext = with_status(ext, &outcome);
    let ready = ext.condition(condition_types::READY).unwrap();
    assert_eq!(ready.status, condition_status::FALSE);
    assert_eq!(ready.reason, condition_reasons::DELETING);
}

#[tokio::test]
async fn test_pass_within_deadline_is_unaffected() {
    let ext = ExtensionBuilder::new("pgcrypto-db-a", "pgcrypto")
        .with_database_ref("db-a")
        .build();
    let (client, factory, lookup) = fixture(FakeClient::new(), vec![]);

    let outcome = ReconcilePass::new(&lookup, &factory)
        .run_with_deadline(&ext, Duration::from_secs(30))
        .await;

    assert!(outcome.is_success(), "unexpected error: {:?}", outcome.error);
    assert_eq!(outcome.action, PassAction::Created);
    assert_eq!(client.creates(), 1);
}
