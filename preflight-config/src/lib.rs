//! Configuration-driven validation graph for Migrate Preflight.
//!
//! A [`ConfigDocument`] is the parsed form of the user's configuration file
//! (YAML or JSON). Resolving it against an active profile and explicit
//! overrides yields a [`ResolvedConfig`]: a frozen, fully-typed snapshot
//! the orchestrators query for the whole run. The snapshot's canonical
//! JSON is SHA-256-hashed into the run's `config_fingerprint`, so two runs
//! with the same fingerprint evaluated the same validation graph.

mod document;
mod error;
mod resolved;

pub use document::{
    ApplianceDoc, ConfigDocument, DiskTypeDoc, GlobalDoc, ProfileDoc, QuotaDoc, RbacDoc,
    StorageDoc, Tier1Doc, Tier2Doc, ToggleDoc,
};
pub use error::ConfigError;
pub use resolved::{
    ApplianceHealthSettings, CacheStorageSettings, CheckToggle, DiskTypeSettings, GlobalSettings,
    ProjectRbacSettings, ResolvedConfig, RgRbacSettings, Tier1Settings, Tier2Settings,
    VcpuQuotaSettings,
};
