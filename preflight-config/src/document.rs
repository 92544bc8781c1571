use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use preflight_core::DiskType;

use crate::error::ConfigError;
use crate::resolved::ResolvedConfig;

/// Parsed form of the user's configuration document.
///
/// Every section and field is optional; anything not present falls back to
/// the built-in defaults during [`ConfigDocument::resolve`]. Unknown keys
/// are rejected at parse time so a typo'd check name cannot silently
/// disable nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub global: GlobalDoc,
    #[serde(default)]
    pub tier1: Tier1Doc,
    #[serde(default)]
    pub tier2: Tier2Doc,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, ProfileDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_execution: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tier1Doc {
    #[serde(default, rename = "access.rbac.migrate_project")]
    pub project_rbac: RbacDoc,
    #[serde(default, rename = "appliance.health")]
    pub appliance_health: ApplianceDoc,
    #[serde(default, rename = "storage.cache")]
    pub cache_storage: StorageDoc,
    #[serde(default, rename = "quota.vcpu")]
    pub vcpu_quota: QuotaDoc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tier2Doc {
    #[serde(default, rename = "server.region")]
    pub region: ToggleDoc,
    #[serde(default, rename = "server.resource_group")]
    pub resource_group: ToggleDoc,
    #[serde(default, rename = "server.vnet_subnet")]
    pub vnet_subnet: ToggleDoc,
    #[serde(default, rename = "server.sku")]
    pub sku: ToggleDoc,
    #[serde(default, rename = "server.disk_type")]
    pub disk_type: DiskTypeDoc,
    #[serde(default, rename = "server.discovery")]
    pub discovery: ToggleDoc,
    #[serde(default, rename = "server.rbac.rg")]
    pub rg_rbac: RbacDoc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RbacDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_roles: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplianceDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heartbeat_age_hours: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_create: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_threshold_percent: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskTypeDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Replacement disk-support table: SKU family prefix to the disk kinds
    /// it accepts. When absent, the check library's built-in table applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported: Option<BTreeMap<String, Vec<DiskType>>>,
}

/// A named set of dotted-path overrides
/// (e.g. `"server.rbac.rg.enabled": false`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileDoc {
    #[serde(default)]
    pub overrides: BTreeMap<String, serde_json::Value>,
}

impl ConfigDocument {
    /// Parses a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Parses a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a document from disk, dispatching on the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            Some("json") => Self::from_json(&text),
            _ => Err(ConfigError::UnknownFormat(path.to_path_buf())),
        }
    }

    /// Resolves this document into an immutable snapshot.
    ///
    /// `profile` overrides the document's `active_profile`; `overrides`
    /// are dotted-path assignments that win over everything else.
    pub fn resolve(
        &self,
        profile: Option<&str>,
        overrides: &[(String, serde_json::Value)],
    ) -> Result<ResolvedConfig, ConfigError> {
        ResolvedConfig::resolve(self, profile, overrides)
    }
}
