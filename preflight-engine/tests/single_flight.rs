//! Parallel-safety scenario: concurrent machine scopes sharing one
//! project must produce exactly one upstream discovery listing.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use preflight_azure::{ArmClient, CloudAccess, StaticTokenCredential};
use preflight_config::ConfigDocument;
use preflight_core::{
    ApplianceKind, CheckId, DiskType, MachineDecl, ProjectDecl, ProjectKey, Severity,
};
use preflight_engine::{Engine, RunOptions};

fn project_decl() -> ProjectDecl {
    ProjectDecl {
        subscription_id: "sub-1".into(),
        resource_group: "rg-a".into(),
        project_name: "wave1".into(),
        region: "eastus".into(),
        appliance_name: "appl-1".into(),
        appliance_kind: ApplianceKind::Vmware,
        cache_storage_account: "cache1".into(),
        cache_storage_resource_group: "rg-a".into(),
        recovery_vault_name: None,
    }
}

fn machine_decl(name: &str) -> MachineDecl {
    MachineDecl {
        source_name: Some(name.into()),
        target_name: name.into(),
        target_region: "eastus".into(),
        target_subscription: "sub-1".into(),
        target_resource_group: "rg-b".into(),
        target_vnet: "vnet-1".into(),
        target_subnet: "default".into(),
        target_sku: "Standard_D2s_v5".into(),
        target_disk_type: DiskType::PremiumLrs,
        project_key: Some(ProjectKey::new("sub-1", "rg-a", "wave1")),
    }
}

/// Configuration running only the discovery check, so the mock needs just
/// the one route.
fn discovery_only_overrides() -> Vec<(String, serde_json::Value)> {
    [
        "access.rbac.migrate_project",
        "appliance.health",
        "storage.cache",
        "quota.vcpu",
        "server.region",
        "server.resource_group",
        "server.vnet_subnet",
        "server.sku",
        "server.disk_type",
        "server.rbac.rg",
    ]
    .iter()
    .map(|id| (format!("{id}.enabled"), serde_json::Value::Bool(false)))
    .collect()
}

#[tokio::test]
async fn s6_concurrent_machines_share_one_discovery_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Migrate/migrateProjects/wave1/machines",
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "value": [
                        {
                            "id": "machines/web01",
                            "name": "web01",
                            "properties": { "displayName": "web01", "ipAddresses": [] }
                        },
                        {
                            "id": "machines/web02",
                            "name": "web02",
                            "properties": { "displayName": "web02", "ipAddresses": [] }
                        }
                    ]
                }))
                // Keep the first fetch in flight while both scopes miss.
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ArmClient::builder(Arc::new(StaticTokenCredential::new("test-token")))
        .with_base_url(format!("{}/", server.uri()))
        .build()
        .expect("client builds");
    let cloud = Arc::new(CloudAccess::new(client));

    let config = ConfigDocument::default()
        .resolve(None, &discovery_only_overrides())
        .expect("overrides resolve");

    let run = Engine::new(cloud, config)
        .with_options(RunOptions::new("principal-1"))
        .run(
            vec![project_decl()],
            vec![machine_decl("web01"), machine_decl("web02")],
        )
        .await;

    // Tier 1 ran zero enabled checks, so the landing zone is clean.
    let project = &run.projects[&ProjectKey::new("sub-1", "rg-a", "wave1")];
    assert_eq!(project.rolled_up, Severity::Ok);
    assert!(project.outcomes.is_empty());

    assert_eq!(run.machines.len(), 2);
    for machine in &run.machines {
        assert_eq!(machine.outcomes.len(), 1);
        assert_eq!(machine.outcomes[0].check_id, CheckId::ServerDiscovery);
        assert_eq!(machine.outcomes[0].severity, Severity::Ok, "{:?}", machine.outcomes);
    }
    // The mock's expect(1) verifies the single upstream call on drop.
}
