//! Azure Resource Manager access layer for Migrate Preflight.
//!
//! Everything the validation engine knows about the cloud goes through
//! this crate:
//!
//! - [`ArmClient`] — one authenticated HTTP client per run, with retry,
//!   jittered backoff, pagination, and cancellation baked in
//! - [`CloudReads`] — the typed read surface consumed by checks and the
//!   matcher; implement it to substitute a test double
//! - [`CloudAccess`] — the production [`CloudReads`] implementation with a
//!   per-run single-flight response cache for hot lookups
//! - [`CloudError`] — the closed failure taxonomy produced by every
//!   operation
//!
//! The engine is read-only by contract; the single exception is
//! [`CloudReads::create_storage_account`], which callers gate behind
//! explicit configuration.

mod access;
mod cache;
mod client;
mod credential;
mod error;
#[cfg(feature = "fake")]
mod fake;
mod models;

pub use access::{CloudAccess, CloudReads};
#[cfg(feature = "fake")]
pub use fake::{fake_key, FakeCloud};
pub use client::{ArmClient, ArmClientBuilder, RetryPolicy, ARM_PUBLIC_CLOUD};
pub use credential::{AccessToken, StaticTokenCredential, TokenCredential};
pub use error::CloudError;
pub use models::{
    Appliance, ApplianceHealth, DiscoveredMachine, Location, MigrateProject, ResourceGroup,
    SkuCapability, SkuRestriction, SkuRestrictionInfo, StorageAccount, SubnetInfo, Subscription,
    VcpuUsage, VmSku,
};
