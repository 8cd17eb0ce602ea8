use std::collections::HashMap;

use fedfhir_db_memory::InMemoryStorage;
use fedfhir_engine::references::{
    ReferenceResolver, ResolveError, Resolution, apply_resolution, locate,
};
use fedfhir_storage::{FhirStorage, StoredResource};
use serde_json::{Value, json};
use tokio_test::assert_ok;

const LOCAL_BASE: &str = "https://dic.example.org/fhir";

fn organization(identifier: &str) -> Value {
    json!({
        "resourceType": "Organization",
        "identifier": [{"system": "http://highmed.org/sid/organization-identifier", "value": identifier}],
        "active": true
    })
}

fn task_with(field: &str, reference: Value) -> Value {
    let mut task = json!({"resourceType": "Task", "status": "requested", "intent": "order"});
    task[field] = reference;
    task
}

async fn storage_with_organizations(identifiers: &[&str]) -> (InMemoryStorage, Vec<StoredResource>) {
    let storage = InMemoryStorage::new();
    let mut stored = Vec::new();
    for identifier in identifiers {
        stored.push(storage.create(&organization(identifier)).await.unwrap());
    }
    (storage, stored)
}

async fn resolve(storage: &InMemoryStorage, resource: &Value) -> Result<Value, ResolveError> {
    let tx = storage.begin_transaction().await.unwrap();
    let resolved = ReferenceResolver::new(LOCAL_BASE)
        .resolve_references(resource, tx.as_ref(), &HashMap::new())
        .await;
    tx.rollback().await.unwrap();
    resolved.map(|r| r.resource)
}

#[tokio::test]
async fn literal_internal_reference_is_unchanged() {
    let (storage, stored) = storage_with_organizations(&["dic"]).await;
    let task = task_with("owner", json!({"reference": format!("Organization/{}", stored[0].id)}));

    let tx = storage.begin_transaction().await.unwrap();
    let resolved = ReferenceResolver::new(LOCAL_BASE)
        .resolve_references(&task, tx.as_ref(), &HashMap::new())
        .await
        .unwrap();
    assert!(!resolved.mutated);
    assert_eq!(resolved.resource, task);

    let absolute = task_with(
        "owner",
        json!({"reference": format!("{LOCAL_BASE}/Organization/{}", stored[0].id)}),
    );
    assert_eq!(resolve(&storage, &absolute).await.unwrap(), absolute);
}

#[tokio::test]
async fn literal_internal_reference_to_missing_version_fails() {
    let (storage, stored) = storage_with_organizations(&["dic"]).await;
    let task = task_with(
        "owner",
        json!({"reference": format!("Organization/{}/_history/7", stored[0].id)}),
    );

    let err = resolve(&storage, &task).await.unwrap_err();
    match err {
        ResolveError::ReferenceTargetNotFoundLocally { location, reference } => {
            assert_eq!(location, "Task.owner");
            assert_eq!(reference, format!("Organization/{}/_history/7", stored[0].id));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn literal_reference_sees_writes_of_the_same_transaction() {
    let storage = InMemoryStorage::new();
    let mut tx = storage.begin_transaction().await.unwrap();
    let created = tx.create(&organization("dic")).await.unwrap();

    let task = task_with("owner", json!({"reference": created.relative_url()}));
    let resolution = assert_ok!(
        ReferenceResolver::new(LOCAL_BASE)
            .resolve_references(&task, tx.as_ref(), &HashMap::new())
            .await
    );
    assert!(!resolution.mutated);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn conditional_reference_is_rewritten_to_the_single_match() {
    let (storage, stored) = storage_with_organizations(&["dic", "cos"]).await;
    let task = task_with(
        "owner",
        json!({
            "reference": "Organization?identifier=http://highmed.org/sid/organization-identifier|cos&_sort=name&_count=10"
        }),
    );

    let resolved = resolve(&storage, &task).await.unwrap();
    assert_eq!(
        resolved["owner"]["reference"],
        format!("Organization/{}", stored[1].id)
    );
}

#[tokio::test]
async fn conditional_reference_without_match_fails() {
    let (storage, _) = storage_with_organizations(&["dic"]).await;
    let task = task_with(
        "owner",
        json!({"reference": "Organization?identifier=http://highmed.org/sid/organization-identifier|hrp"}),
    );

    let err = resolve(&storage, &task).await.unwrap_err();
    assert!(matches!(
        err,
        ResolveError::ReferenceTargetNotFoundLocallyByCondition { .. }
    ));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn conditional_reference_with_many_matches_fails() {
    let (storage, _) = storage_with_organizations(&["dic", "dic"]).await;
    let task = task_with(
        "owner",
        json!({"reference": "Organization?identifier=http://highmed.org/sid/organization-identifier|dic"}),
    );

    let err = resolve(&storage, &task).await.unwrap_err();
    match err {
        ResolveError::ReferenceTargetMultipleMatchesLocallyByCondition { count, .. } => {
            assert_eq!(count, 2)
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn conditional_reference_with_unsupported_parameter_is_bad() {
    let (storage, _) = storage_with_organizations(&["dic"]).await;
    let task = task_with("owner", json!({"reference": "Organization?partof=Organization/1"}));

    let err = resolve(&storage, &task).await.unwrap_err();
    assert!(matches!(err, ResolveError::BadConditionalReference { .. }));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn logical_reference_is_rewritten_and_keeps_identifier() {
    let (storage, stored) = storage_with_organizations(&["dic"]).await;
    let task = task_with(
        "requester",
        json!({
            "type": "Organization",
            "identifier": {"system": "http://highmed.org/sid/organization-identifier", "value": "dic"}
        }),
    );

    let resolved = resolve(&storage, &task).await.unwrap();
    assert_eq!(
        resolved["requester"]["reference"],
        format!("Organization/{}", stored[0].id)
    );
    assert_eq!(resolved["requester"]["identifier"]["value"], "dic");
}

#[tokio::test]
async fn logical_reference_with_multiple_matches_fails() {
    let (storage, _) = storage_with_organizations(&["dic", "dic"]).await;
    let task = task_with(
        "requester",
        json!({
            "type": "Organization",
            "identifier": {"system": "http://highmed.org/sid/organization-identifier", "value": "dic"}
        }),
    );

    let err = resolve(&storage, &task).await.unwrap_err();
    match err {
        ResolveError::ReferenceTargetMultipleMatchesLocallyByIdentifier {
            ref resource_type,
            ref identifier,
            count,
            ..
        } => {
            assert_eq!(resource_type, "Organization");
            assert_eq!(identifier, "http://highmed.org/sid/organization-identifier|dic");
            assert_eq!(count, 2);
        }
        ref other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_multiple_matches());
}

#[tokio::test]
async fn logical_reference_without_match_fails() {
    let (storage, _) = storage_with_organizations(&["dic"]).await;
    let task = task_with(
        "requester",
        json!({
            "type": "Organization",
            "identifier": {"system": "http://highmed.org/sid/organization-identifier", "value": "ttp"}
        }),
    );

    let err = resolve(&storage, &task).await.unwrap_err();
    match err {
        ResolveError::ReferenceTargetNotFoundLocallyByIdentifier {
            resource_type,
            identifier,
            ..
        } => {
            assert_eq!(resource_type, "Organization");
            assert_eq!(identifier, "http://highmed.org/sid/organization-identifier|ttp");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn target_type_not_allowed_by_the_element_fails_before_lookup() {
    let (storage, _) = storage_with_organizations(&["dic"]).await;
    let task = task_with("owner", json!({"reference": "Location?name=Lab"}));

    let err = resolve(&storage, &task).await.unwrap_err();
    match err {
        ResolveError::ReferenceTargetTypeNotSupportedByResource {
            resource_type,
            allowed,
            ..
        } => {
            assert_eq!(resource_type, "Location");
            assert!(allowed.iter().any(|t| t == "Organization"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn target_type_not_supported_by_the_store_fails() {
    let storage = InMemoryStorage::with_supported_types(["Organization", "Task"]);
    let task = task_with("for", json!({"reference": "Patient/p1"}));

    let err = resolve(&storage, &task).await.unwrap_err();
    assert!(matches!(
        err,
        ResolveError::UnsupportedReferenceTargetType { ref resource_type, .. } if resource_type == "Patient"
    ));
}

#[tokio::test]
async fn temporary_reference_uses_the_bundle_translation() {
    let storage = InMemoryStorage::new();
    let task = task_with(
        "owner",
        json!({"reference": "urn:uuid:11111111-1111-1111-1111-111111111111"}),
    );
    let translation = HashMap::from([(
        "urn:uuid:11111111-1111-1111-1111-111111111111".to_string(),
        "Organization/o1".to_string(),
    )]);

    let tx = storage.begin_transaction().await.unwrap();
    let resolver = ReferenceResolver::new(LOCAL_BASE);
    let resolved = resolver
        .resolve_references(&task, tx.as_ref(), &translation)
        .await
        .unwrap();
    assert!(resolved.mutated);
    assert_eq!(resolved.resource["owner"]["reference"], "Organization/o1");

    let err = resolver
        .resolve_references(&task, tx.as_ref(), &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::UnknownReference { .. }));
}

#[tokio::test]
async fn external_reference_without_checker_is_skipped() {
    let storage = InMemoryStorage::new();
    let task = task_with(
        "owner",
        json!({"reference": "https://cos.example.org/fhir/Organization/o1"}),
    );

    let occurrences = locate(&task);
    assert_eq!(occurrences.len(), 1);

    let tx = storage.begin_transaction().await.unwrap();
    let resolution = ReferenceResolver::new(LOCAL_BASE)
        .resolve(&task, &occurrences[0], tx.as_ref(), &HashMap::new())
        .await
        .unwrap();
    assert_eq!(resolution, Resolution::Skipped);
    assert_eq!(apply_resolution(&task, &occurrences[0], &resolution), task);
}
