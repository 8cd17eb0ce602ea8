use std::time::Duration;

use fedfhir_core::FhirReference;
use fedfhir_engine::references::{
    HttpRemoteReferenceChecker, RemoteCheckerConfig, RemoteReferenceChecker, ResolveError,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn checker(server: &MockServer, max_retries: u32) -> HttpRemoteReferenceChecker {
    let config = RemoteCheckerConfig::new()
        .with_endpoint(format!("{}/fhir/", server.uri()))
        .with_max_retries(max_retries)
        .with_retry_delay(Duration::from_millis(10))
        .with_request_timeout(Duration::from_secs(5));
    HttpRemoteReferenceChecker::new(config).unwrap()
}

fn remote_reference(server: &MockServer, id: &str) -> FhirReference {
    FhirReference {
        base: Some(format!("{}/fhir", server.uri())),
        ..FhirReference::new("Organization", id)
    }
}

#[tokio::test]
async fn existing_remote_resource_passes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Organization/org-1"))
        .and(header("Accept", "application/fhir+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "resourceType": "Organization",
            "id": "org-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    checker(&server, 0)
        .check("Task.owner", &remote_reference(&server, "org-1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn versioned_reference_reads_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Organization/org-1/_history/2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let reference = FhirReference {
        base: Some(format!("{}/fhir", server.uri())),
        ..FhirReference::with_version("Organization", "org-1", "2")
    };
    checker(&server, 0).check("Task.owner", &reference).await.unwrap();
}

#[tokio::test]
async fn missing_remote_resource_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = checker(&server, 3)
        .check("Task.owner", &remote_reference(&server, "gone"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::ReferenceTargetNotFoundRemotely { ref location, .. } if location == "Task.owner"
    ));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn server_errors_are_retried_then_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let err = checker(&server, 1)
        .check("Task.owner", &remote_reference(&server, "org-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::Remote { .. }));
}

#[tokio::test]
async fn unknown_server_base_has_no_endpoint() {
    let server = MockServer::start().await;
    let reference = FhirReference {
        base: Some("https://elsewhere.example.org/fhir".to_string()),
        ..FhirReference::new("Organization", "org-1")
    };

    let err = checker(&server, 0)
        .check("Task.owner", &reference)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResolveError::NoEndpointForServerBase { ref server_base, .. }
            if server_base == "https://elsewhere.example.org/fhir"
    ));
}
