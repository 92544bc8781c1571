use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param_contains};
use wiremock::{Mock, MockServer, ResponseTemplate};

use preflight_azure::{
    ArmClient, CloudAccess, CloudError, CloudReads, RetryPolicy, StaticTokenCredential,
};

fn access(server: &MockServer) -> CloudAccess {
    let client = ArmClient::builder(Arc::new(StaticTokenCredential::new("test-token")))
        .with_base_url(format!("{}/", server.uri()))
        .with_retry_policy(RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(5),
            factor: 2.0,
            jitter: 0.0,
        })
        .with_cancellation(CancellationToken::new())
        .build()
        .expect("client builds");
    CloudAccess::new(client)
}

const MACHINES_PATH: &str =
    "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Migrate/migrateProjects/wave1/machines";

fn machines_body() -> serde_json::Value {
    json!({
        "value": [
            {
                "id": "machines/web01",
                "name": "machine-web01",
                "properties": {
                    "displayName": "web01",
                    "fqdn": "web01.corp.local",
                    "ipAddresses": ["10.1.0.4"],
                }
            },
            {
                "id": "machines/db01",
                "name": "machine-db01",
                "properties": {
                    "displayName": "db01",
                    "ipAddresses": ["10.1.0.5"],
                    "replicationStatus": "replicating",
                }
            }
        ]
    })
}

#[tokio::test]
async fn discovery_list_is_single_flight_across_workers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MACHINES_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(machines_body())
                // Hold the response long enough for every worker to miss.
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let access = Arc::new(access(&server));
    let mut handles = Vec::new();
    for _ in 0..12 {
        let access = access.clone();
        handles.push(tokio::spawn(async move {
            access.list_discovered_machines("sub-1", "rg-a", "wave1").await
        }));
    }
    for handle in handles {
        let machines = handle.await.unwrap().unwrap();
        assert_eq!(machines.len(), 2);
    }
}

#[tokio::test]
async fn search_uses_cached_discovery_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MACHINES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(machines_body()))
        .expect(1)
        .mount(&server)
        .await;

    let access = access(&server);
    let hits = access
        .search_discovered_by_name("sub-1", "rg-a", "wave1", "WEB01")
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "web01");

    // Second search must be served from the run cache.
    let hits = access
        .search_discovered_by_name("sub-1", "rg-a", "wave1", "db")
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].replication_state.as_deref(), Some("replicating"));
}

#[tokio::test]
async fn subnet_lookup_reads_embedded_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-1/resourceGroups/rg-b/providers/Microsoft.Network/virtualNetworks/vnet-1",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "vnet-1",
            "properties": {
                "subnets": [
                    {
                        "name": "default",
                        "properties": {
                            "addressPrefix": "10.1.0.0/24",
                            "delegations": [],
                            "ipConfigurations": [{"id": "a"}, {"id": "b"}],
                        }
                    },
                    {
                        "name": "delegated",
                        "properties": {
                            "addressPrefix": "10.1.1.0/26",
                            "delegations": [
                                {"name": "aci", "properties": {"serviceName": "Microsoft.ContainerInstance/containerGroups"}}
                            ],
                        }
                    }
                ]
            }
        })))
        .mount(&server)
        .await;

    let access = access(&server);
    let subnet = access.get_subnet("sub-1", "rg-b", "vnet-1", "default").await.unwrap();
    assert_eq!(subnet.address_prefix, "10.1.0.0/24");
    assert_eq!(subnet.used_ip_count, 2);
    assert!(subnet.delegations.is_empty());

    let delegated = access.get_subnet("sub-1", "rg-b", "vnet-1", "delegated").await.unwrap();
    assert_eq!(
        delegated.delegations,
        vec!["Microsoft.ContainerInstance/containerGroups"]
    );

    let missing = access.get_subnet("sub-1", "rg-b", "vnet-1", "absent").await.unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn vcpu_usage_picks_requested_family() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-1/providers/Microsoft.Compute/locations/eastus/usages",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"name": {"value": "availabilitySets"}, "currentValue": 1, "limit": 2500},
                {"name": {"value": "cores"}, "currentValue": 100, "limit": 200},
            ]
        })))
        .mount(&server)
        .await;

    let access = access(&server);
    let usage = access.get_vcpu_usage("sub-1", "eastus", "cores").await.unwrap();
    assert_eq!(usage.current, 100);
    assert_eq!(usage.limit, 200);
    assert_eq!(usage.available(), 100);

    let err = access.get_vcpu_usage("sub-1", "eastus", "bogusFamily").await.unwrap_err();
    assert!(matches!(err, CloudError::Malformed { .. }));
}

#[tokio::test]
async fn appliance_listing_falls_back_to_graph_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Migrate/migrateProjects/wave1/appliances",
        ))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/providers/Microsoft.ResourceGraph/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "name": "appl-1",
                    "applianceType": "VMware",
                    "lastHeartbeatUtc": "2026-07-31T12:00:00Z",
                    "healthStatus": "Healthy",
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let access = access(&server);
    let appliances = access.list_appliances("sub-1", "rg-a", "wave1").await.unwrap();
    assert_eq!(appliances.len(), 1);
    assert_eq!(appliances[0].name, "appl-1");
    assert_eq!(appliances[0].kind, Some(preflight_core::ApplianceKind::Vmware));

    // The fallback result is cached like the direct one.
    let again = access.list_appliances("sub-1", "rg-a", "wave1").await.unwrap();
    assert_eq!(again.len(), 1);
}

#[tokio::test]
async fn role_assignments_collect_definition_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-1/providers/Microsoft.Authorization/roleAssignments",
        ))
        .and(query_param_contains("$filter", "assignedTo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"properties": {"roleDefinitionId": "/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions/b24988ac-6180-42a0-ab88-20f7382dd24c"}},
                {"properties": {"roleDefinitionId": "/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions/acdd72a7-3385-48ef-bd42-f606fba81ae7"}},
            ]
        })))
        .mount(&server)
        .await;

    let access = access(&server);
    let roles = access
        .list_role_assignments("/subscriptions/sub-1", "principal-1")
        .await
        .unwrap();
    assert_eq!(roles.len(), 2);
    assert!(roles
        .iter()
        .any(|r| r.ends_with("b24988ac-6180-42a0-ab88-20f7382dd24c")));
}

#[tokio::test]
async fn locations_are_cached_for_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/subscriptions/sub-1/locations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"name": "eastus", "displayName": "East US"},
                {"name": "westus2", "displayName": "West US 2"},
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let access = access(&server);
    let first = access.list_locations("sub-1").await.unwrap();
    let second = access.list_locations("sub-1").await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn storage_create_issues_put_with_standard_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(
            "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Storage/storageAccounts/cache1",
        ))
        .and(wiremock::matchers::body_partial_json(json!({
            "location": "eastus",
            "kind": "StorageV2",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "cache1",
            "location": "eastus",
            "kind": "StorageV2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let access = access(&server);
    let account = access
        .create_storage_account("sub-1", "rg-a", "cache1", "eastus")
        .await
        .unwrap();
    assert_eq!(account.name, "cache1");
    assert_eq!(account.location, "eastus");
}
