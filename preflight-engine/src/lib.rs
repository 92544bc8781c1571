//! Two-tier validation engine for Migrate Preflight.
//!
//! [`Engine::run`] takes the declared projects and machines, queries the
//! cloud control plane through a [`preflight_azure::CloudReads`] handle,
//! and produces a [`preflight_core::Run`]:
//!
//! 1. project declarations are deduped by [`preflight_core::ProjectKey`]
//!    (conflicting duplicates get a warning outcome)
//! 2. machines without a project association are matched to the best
//!    candidate project by discovery name, region and subnet evidence
//! 3. Tier 1 (landing zone) runs per unique project, in parallel up to a
//!    bound, fail-fast within each scope
//! 4. Tier 2 (servers) runs per machine, gated on its project's verdict
//!
//! The engine never mutates cloud state (except the explicitly enabled
//! cache-storage create, which lives in the check library) and always
//! returns a `Run`; the only fatal error is an unresolvable configuration.

mod driver;
mod matcher;
mod telemetry;
mod tier1;
mod tier2;

pub use driver::{run, Engine, RunOptions};
pub use telemetry::init_tracing;
