use chrono::{DateTime, Utc};

use preflight_azure::CloudReads;
use preflight_config::ResolvedConfig;
use preflight_core::{MachineDecl, ProjectDecl};

/// Everything a Tier-1 check may look at.
///
/// Borrowed for the duration of one project scope; checks share the cloud
/// handle (and its response cache) but own nothing.
pub struct ProjectCheckContext<'a> {
    pub decl: &'a ProjectDecl,
    /// Machines associated with this project, for quota projection.
    pub machines: &'a [MachineDecl],
    /// Object id of the principal the run authenticates as.
    pub principal_id: &'a str,
    pub cloud: &'a dyn CloudReads,
    pub config: &'a ResolvedConfig,
    /// Reference instant for heartbeat-age arithmetic, fixed at run start
    /// so every scope judges staleness against the same clock.
    pub now: DateTime<Utc>,
}

/// Everything a Tier-2 check may look at. Only built for machines whose
/// project association resolved and passed Tier 1.
pub struct MachineCheckContext<'a> {
    pub decl: &'a MachineDecl,
    pub project: &'a ProjectDecl,
    pub principal_id: &'a str,
    pub cloud: &'a dyn CloudReads,
    pub config: &'a ResolvedConfig,
}
