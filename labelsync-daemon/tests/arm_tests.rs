//! ARM compute collaborator against a mock Resource Manager.

use std::sync::Arc;
use std::time::Duration;

use labelsync_core::{ResourceId, ResourceKind, TagMap};
use labelsync_daemon::{ArmCompute, ManagedIdentity, StaticToken, TokenSource};
use labelsync_sync::testing::{map, vm_id, SUBSCRIPTION};
use labelsync_sync::{ClientError, ComputeProvider, ComputeResource};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn compute(server: &MockServer) -> ArmCompute {
    ArmCompute::new(
        reqwest::Client::new(),
        server.uri(),
        Arc::new(StaticToken::new("test-token")),
    )
    .with_poll_interval(Duration::from_millis(10))
}

fn scale_set() -> ResourceId {
    ResourceId {
        subscription_id: SUBSCRIPTION.to_owned(),
        resource_group: "MC_rg_cluster_westus2".to_owned(),
        kind: ResourceKind::VirtualMachineScaleSet,
        name: "aks-nodepool1-vmss".to_owned(),
    }
}

#[tokio::test]
async fn fetch_reads_tags_with_bearer_token() {
    let server = MockServer::start().await;
    let id = vm_id("rg", "vm-0");
    Mock::given(method("GET"))
        .and(path(id.arm_path()))
        .and(query_param("api-version", "2019-03-01"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": id.arm_path(),
            "tags": { "env": "test", "dept": "hr" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resource = compute(&server).fetch(&id).await.expect("fetch");
    assert_eq!(resource.id(), &id);
    assert_eq!(resource.tags(), &map(&[("env", "test"), ("dept", "hr")]));
}

#[tokio::test]
async fn fetch_scale_set_uses_scale_set_path() {
    let server = MockServer::start().await;
    let id = scale_set();
    Mock::given(method("GET"))
        .and(path(id.arm_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": id.name })))
        .expect(1)
        .mount(&server)
        .await;

    let resource = compute(&server).fetch(&id).await.expect("fetch");
    assert!(resource.tags().is_empty());
}

#[tokio::test]
async fn fetch_missing_resource_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "ResourceNotFound" }
        })))
        .mount(&server)
        .await;

    let err = match compute(&server).fetch(&vm_id("rg", "gone")).await {
        Ok(_) => panic!("expected NotFound"),
        Err(err) => err,
    };
    assert!(matches!(err, ClientError::NotFound { .. }), "got: {err}");
}

#[tokio::test]
async fn fetch_server_error_carries_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = match compute(&server).fetch(&vm_id("rg", "vm-0")).await {
        Ok(_) => panic!("expected failure"),
        Err(err) => err,
    };
    assert!(matches!(err, ClientError::Api { .. }));
    assert!(err.to_string().contains("upstream unavailable"), "got: {err}");
}

#[tokio::test]
async fn commit_patches_the_full_tag_set() {
    let server = MockServer::start().await;
    let id = vm_id("rg", "vm-0");
    Mock::given(method("GET"))
        .and(path(id.arm_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tags": { "env": "test" } })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(id.arm_path()))
        .and(body_json(json!({ "tags": { "env": "test", "node.labels/zone": "1" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let mut resource = compute(&server).fetch(&id).await.expect("fetch");
    let mut tags: TagMap = resource.tags().clone();
    tags.insert("node.labels/zone".into(), "1".into());
    resource.replace_tags(tags);
    resource.commit().await.expect("commit");
}

#[tokio::test]
async fn commit_follows_async_operation_until_succeeded() {
    let server = MockServer::start().await;
    let id = vm_id("rg", "vm-0");
    let operation = format!("{}/operations/op-1", server.uri());
    Mock::given(method("GET"))
        .and(path(id.arm_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tags": {} })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(id.arm_path()))
        .respond_with(
            ResponseTemplate::new(202).insert_header("Azure-AsyncOperation", operation.as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/op-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "InProgress" })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/op-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Succeeded" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut resource = compute(&server).fetch(&id).await.expect("fetch");
    resource.replace_tags(map(&[("env", "test")]));
    resource.commit().await.expect("commit");
}

#[tokio::test]
async fn commit_reports_failed_operation() {
    let server = MockServer::start().await;
    let id = vm_id("rg", "vm-0");
    let operation = format!("{}/operations/op-2", server.uri());
    Mock::given(method("GET"))
        .and(path(id.arm_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tags": {} })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(
            ResponseTemplate::new(201).insert_header("Azure-AsyncOperation", operation.as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/op-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Failed",
            "error": { "code": "OperationNotAllowed" }
        })))
        .mount(&server)
        .await;

    let mut resource = compute(&server).fetch(&id).await.expect("fetch");
    resource.replace_tags(map(&[("env", "test")]));
    let err = resource.commit().await.unwrap_err();
    assert!(err.to_string().contains("failed"), "got: {err}");
    assert!(err.to_string().contains("OperationNotAllowed"), "got: {err}");
}

#[tokio::test]
async fn commit_follows_location_until_done() {
    let server = MockServer::start().await;
    let id = scale_set();
    let location = format!("{}/locations/op-3", server.uri());
    Mock::given(method("GET"))
        .and(path(id.arm_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tags": {} })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("Location", location.as_str())
                .insert_header("Retry-After", "0"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/locations/op-3"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/locations/op-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let mut resource = compute(&server).fetch(&id).await.expect("fetch");
    resource.replace_tags(map(&[("env", "test")]));
    resource.commit().await.expect("commit");
}

#[tokio::test]
async fn managed_identity_token_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata/identity/oauth2/token"))
        .and(header("metadata", "true"))
        .and(query_param("resource", "https://management.azure.com/"))
        .and(query_param("client_id", "identity-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "imds-token",
            "expires_in": "3599"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = ManagedIdentity::new(reqwest::Client::new(), "https://management.azure.com/")
        .with_client_id(Some("identity-1".into()))
        .with_token_url(format!("{}/metadata/identity/oauth2/token", server.uri()));

    assert_eq!(identity.token().await.expect("token"), "imds-token");
    assert_eq!(identity.token().await.expect("cached"), "imds-token");
}

#[tokio::test]
async fn managed_identity_failure_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_string("identity not found"))
        .mount(&server)
        .await;

    let identity = ManagedIdentity::new(reqwest::Client::new(), "https://management.azure.com/")
        .with_token_url(format!("{}/token", server.uri()));
    let err = identity.token().await.unwrap_err();
    assert!(err.to_string().contains("identity not found"), "got: {err}");
}
