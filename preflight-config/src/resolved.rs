use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use preflight_core::{CheckId, DiskType};

use crate::document::ConfigDocument;
use crate::error::ConfigError;

/// Flags that shape orchestration rather than individual checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSettings {
    /// Short-circuit a scope after a `critical` outcome.
    pub fail_fast: bool,
    /// Run project and machine scopes on a bounded worker pool.
    pub parallel_execution: bool,
    /// Wall-clock budget per scope, in seconds.
    pub timeout_seconds: u64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self { fail_fast: true, parallel_execution: true, timeout_seconds: 300 }
    }
}

/// Enablement for a check with no parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckToggle {
    pub enabled: bool,
}

impl Default for CheckToggle {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRbacSettings {
    pub enabled: bool,
    /// Role names or role-definition ids, any of which satisfies the check.
    pub required_roles: Vec<String>,
}

impl Default for ProjectRbacSettings {
    fn default() -> Self {
        Self { enabled: true, required_roles: vec!["Contributor".to_string()] }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplianceHealthSettings {
    pub enabled: bool,
    /// Heartbeats at or beyond this age degrade the outcome to a warning.
    pub max_heartbeat_age_hours: i64,
}

impl Default for ApplianceHealthSettings {
    fn default() -> Self {
        Self { enabled: true, max_heartbeat_age_hours: 24 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStorageSettings {
    pub enabled: bool,
    /// Create the cache storage account when it is missing. The only write
    /// the engine ever performs, and only when this is set.
    pub auto_create: bool,
}

impl Default for CacheStorageSettings {
    fn default() -> Self {
        Self { enabled: true, auto_create: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VcpuQuotaSettings {
    pub enabled: bool,
    /// Projected usage at or above this percentage is a warning; at or
    /// above 100% it is a failure.
    pub warn_threshold_percent: u8,
}

impl Default for VcpuQuotaSettings {
    fn default() -> Self {
        Self { enabled: true, warn_threshold_percent: 80 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskTypeSettings {
    pub enabled: bool,
    /// Replacement disk-support table (SKU family prefix to accepted disk
    /// kinds). `None` means the check library's built-in table.
    pub supported: Option<BTreeMap<String, Vec<DiskType>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RgRbacSettings {
    pub enabled: bool,
    pub required_roles: Vec<String>,
}

impl Default for RgRbacSettings {
    fn default() -> Self {
        Self { enabled: true, required_roles: vec!["Contributor".to_string()] }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tier1Settings {
    pub project_rbac: ProjectRbacSettings,
    pub appliance_health: ApplianceHealthSettings,
    pub cache_storage: CacheStorageSettings,
    pub vcpu_quota: VcpuQuotaSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tier2Settings {
    pub region: CheckToggle,
    pub resource_group: CheckToggle,
    pub vnet_subnet: CheckToggle,
    pub sku: CheckToggle,
    pub disk_type: DiskTypeSettings,
    pub discovery: CheckToggle,
    pub rg_rbac: RgRbacSettings,
}

impl Default for Tier2Settings {
    fn default() -> Self {
        Self {
            region: CheckToggle::default(),
            resource_group: CheckToggle::default(),
            vnet_subnet: CheckToggle::default(),
            sku: CheckToggle::default(),
            disk_type: DiskTypeSettings { enabled: true, supported: None },
            discovery: CheckToggle::default(),
            rg_rbac: RgRbacSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
struct Settings {
    global: GlobalSettings,
    tier1: Tier1Settings,
    tier2: Tier2Settings,
}

/// The frozen validation configuration for one run.
///
/// Construction goes through [`ConfigDocument::resolve`]; afterwards the
/// snapshot is immutable, cheap to clone, and safe to share across worker
/// tasks without locking.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    settings: Settings,
    fingerprint: String,
}

impl ResolvedConfig {
    pub(crate) fn resolve(
        doc: &ConfigDocument,
        profile: Option<&str>,
        overrides: &[(String, serde_json::Value)],
    ) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        apply_document(&mut settings, doc);

        let active = profile.or(doc.active_profile.as_deref());
        if let Some(name) = active {
            let profile_doc = doc
                .profiles
                .get(name)
                .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))?;
            for (path, value) in &profile_doc.overrides {
                apply_override(&mut settings, path, value)?;
            }
        }

        for (path, value) in overrides {
            apply_override(&mut settings, path, value)?;
        }

        let fingerprint = fingerprint(&settings)?;
        Ok(Self { settings, fingerprint })
    }

    /// Default configuration: every check enabled, fail-fast on.
    pub fn defaults() -> Self {
        let settings = Settings::default();
        let fingerprint = fingerprint(&settings).expect("default settings always serialize");
        Self { settings, fingerprint }
    }

    /// Whether the given check should run. Synthetic ids are always
    /// "enabled": they never correspond to scheduled work.
    pub fn is_enabled(&self, check: CheckId) -> bool {
        match check {
            CheckId::MigrateProjectRbac => self.settings.tier1.project_rbac.enabled,
            CheckId::ApplianceHealth => self.settings.tier1.appliance_health.enabled,
            CheckId::CacheStorage => self.settings.tier1.cache_storage.enabled,
            CheckId::VcpuQuota => self.settings.tier1.vcpu_quota.enabled,
            CheckId::ServerRegion => self.settings.tier2.region.enabled,
            CheckId::ServerResourceGroup => self.settings.tier2.resource_group.enabled,
            CheckId::ServerVnetSubnet => self.settings.tier2.vnet_subnet.enabled,
            CheckId::ServerSku => self.settings.tier2.sku.enabled,
            CheckId::ServerDiskType => self.settings.tier2.disk_type.enabled,
            CheckId::ServerDiscovery => self.settings.tier2.discovery.enabled,
            CheckId::ServerResourceGroupRbac => self.settings.tier2.rg_rbac.enabled,
            CheckId::InputDeclaration | CheckId::Skipped => true,
        }
    }

    pub fn global(&self) -> &GlobalSettings {
        &self.settings.global
    }

    pub fn tier1(&self) -> &Tier1Settings {
        &self.settings.tier1
    }

    pub fn tier2(&self) -> &Tier2Settings {
        &self.settings.tier2
    }

    /// Hex SHA-256 of the canonicalized snapshot.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn fingerprint(settings: &Settings) -> Result<String, ConfigError> {
    // Struct field order is fixed and the disk table is a BTreeMap, so the
    // serialized form is canonical without further sorting.
    let canonical = serde_json::to_vec(settings)?;
    let digest = Sha256::digest(&canonical);
    Ok(hex::encode(digest))
}

fn apply_document(settings: &mut Settings, doc: &ConfigDocument) {
    let g = &doc.global;
    if let Some(v) = g.fail_fast {
        settings.global.fail_fast = v;
    }
    if let Some(v) = g.parallel_execution {
        settings.global.parallel_execution = v;
    }
    if let Some(v) = g.timeout_seconds {
        settings.global.timeout_seconds = v;
    }

    let t1 = &doc.tier1;
    if let Some(v) = t1.project_rbac.enabled {
        settings.tier1.project_rbac.enabled = v;
    }
    if let Some(v) = &t1.project_rbac.required_roles {
        settings.tier1.project_rbac.required_roles = v.clone();
    }
    if let Some(v) = t1.appliance_health.enabled {
        settings.tier1.appliance_health.enabled = v;
    }
    if let Some(v) = t1.appliance_health.max_heartbeat_age_hours {
        settings.tier1.appliance_health.max_heartbeat_age_hours = v;
    }
    if let Some(v) = t1.cache_storage.enabled {
        settings.tier1.cache_storage.enabled = v;
    }
    if let Some(v) = t1.cache_storage.auto_create {
        settings.tier1.cache_storage.auto_create = v;
    }
    if let Some(v) = t1.vcpu_quota.enabled {
        settings.tier1.vcpu_quota.enabled = v;
    }
    if let Some(v) = t1.vcpu_quota.warn_threshold_percent {
        settings.tier1.vcpu_quota.warn_threshold_percent = v;
    }

    let t2 = &doc.tier2;
    if let Some(v) = t2.region.enabled {
        settings.tier2.region.enabled = v;
    }
    if let Some(v) = t2.resource_group.enabled {
        settings.tier2.resource_group.enabled = v;
    }
    if let Some(v) = t2.vnet_subnet.enabled {
        settings.tier2.vnet_subnet.enabled = v;
    }
    if let Some(v) = t2.sku.enabled {
        settings.tier2.sku.enabled = v;
    }
    if let Some(v) = t2.disk_type.enabled {
        settings.tier2.disk_type.enabled = v;
    }
    if let Some(v) = &t2.disk_type.supported {
        settings.tier2.disk_type.supported = Some(v.clone());
    }
    if let Some(v) = t2.discovery.enabled {
        settings.tier2.discovery.enabled = v;
    }
    if let Some(v) = t2.rg_rbac.enabled {
        settings.tier2.rg_rbac.enabled = v;
    }
    if let Some(v) = &t2.rg_rbac.required_roles {
        settings.tier2.rg_rbac.required_roles = v.clone();
    }
}

/// Applies one dotted-path override
/// (`global.fail_fast`, `<check id>.enabled`, `quota.vcpu.warn_threshold_percent`, ...).
fn apply_override(
    settings: &mut Settings,
    path: &str,
    value: &serde_json::Value,
) -> Result<(), ConfigError> {
    if let Some(field) = path.strip_prefix("global.") {
        return match field {
            "fail_fast" => {
                settings.global.fail_fast = expect_bool(path, value)?;
                Ok(())
            }
            "parallel_execution" => {
                settings.global.parallel_execution = expect_bool(path, value)?;
                Ok(())
            }
            "timeout_seconds" => {
                settings.global.timeout_seconds = expect_u64(path, value)?;
                Ok(())
            }
            _ => Err(ConfigError::UnknownKey(path.to_string())),
        };
    }

    let (check_path, field) = path
        .rsplit_once('.')
        .ok_or_else(|| ConfigError::UnknownKey(path.to_string()))?;
    let check: CheckId = check_path
        .parse()
        .map_err(|_| ConfigError::UnknownKey(path.to_string()))?;

    match (check, field) {
        (CheckId::MigrateProjectRbac, "enabled") => {
            settings.tier1.project_rbac.enabled = expect_bool(path, value)?;
        }
        (CheckId::MigrateProjectRbac, "required_roles") => {
            settings.tier1.project_rbac.required_roles = expect_roles(path, value)?;
        }
        (CheckId::ApplianceHealth, "enabled") => {
            settings.tier1.appliance_health.enabled = expect_bool(path, value)?;
        }
        (CheckId::ApplianceHealth, "max_heartbeat_age_hours") => {
            settings.tier1.appliance_health.max_heartbeat_age_hours =
                expect_u64(path, value)? as i64;
        }
        (CheckId::CacheStorage, "enabled") => {
            settings.tier1.cache_storage.enabled = expect_bool(path, value)?;
        }
        (CheckId::CacheStorage, "auto_create") => {
            settings.tier1.cache_storage.auto_create = expect_bool(path, value)?;
        }
        (CheckId::VcpuQuota, "enabled") => {
            settings.tier1.vcpu_quota.enabled = expect_bool(path, value)?;
        }
        (CheckId::VcpuQuota, "warn_threshold_percent") => {
            let raw = expect_u64(path, value)?;
            settings.tier1.vcpu_quota.warn_threshold_percent =
                u8::try_from(raw).map_err(|_| ConfigError::InvalidValue {
                    path: path.to_string(),
                    expected: "percentage 0-100",
                })?;
        }
        (CheckId::ServerRegion, "enabled") => {
            settings.tier2.region.enabled = expect_bool(path, value)?;
        }
        (CheckId::ServerResourceGroup, "enabled") => {
            settings.tier2.resource_group.enabled = expect_bool(path, value)?;
        }
        (CheckId::ServerVnetSubnet, "enabled") => {
            settings.tier2.vnet_subnet.enabled = expect_bool(path, value)?;
        }
        (CheckId::ServerSku, "enabled") => {
            settings.tier2.sku.enabled = expect_bool(path, value)?;
        }
        (CheckId::ServerDiskType, "enabled") => {
            settings.tier2.disk_type.enabled = expect_bool(path, value)?;
        }
        (CheckId::ServerDiskType, "supported") => {
            let table = serde_json::from_value(value.clone()).map_err(|_| {
                ConfigError::InvalidValue {
                    path: path.to_string(),
                    expected: "map of SKU family prefix to disk type list",
                }
            })?;
            settings.tier2.disk_type.supported = Some(table);
        }
        (CheckId::ServerDiscovery, "enabled") => {
            settings.tier2.discovery.enabled = expect_bool(path, value)?;
        }
        (CheckId::ServerResourceGroupRbac, "enabled") => {
            settings.tier2.rg_rbac.enabled = expect_bool(path, value)?;
        }
        (CheckId::ServerResourceGroupRbac, "required_roles") => {
            settings.tier2.rg_rbac.required_roles = expect_roles(path, value)?;
        }
        _ => return Err(ConfigError::UnknownKey(path.to_string())),
    }
    Ok(())
}

fn expect_bool(path: &str, value: &serde_json::Value) -> Result<bool, ConfigError> {
    value.as_bool().ok_or(ConfigError::InvalidValue {
        path: path.to_string(),
        expected: "boolean",
    })
}

fn expect_u64(path: &str, value: &serde_json::Value) -> Result<u64, ConfigError> {
    value.as_u64().ok_or(ConfigError::InvalidValue {
        path: path.to_string(),
        expected: "non-negative integer",
    })
}

fn expect_roles(path: &str, value: &serde_json::Value) -> Result<Vec<String>, ConfigError> {
    let items = value.as_array().ok_or(ConfigError::InvalidValue {
        path: path.to_string(),
        expected: "list of role names",
    })?;
    items
        .iter()
        .map(|v| {
            v.as_str().map(str::to_string).ok_or(ConfigError::InvalidValue {
                path: path.to_string(),
                expected: "list of role names",
            })
        })
        .collect()
}
