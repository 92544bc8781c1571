//! Engine driver: dedup, matching, scheduling, and run assembly.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use preflight_azure::{ArmClient, CloudAccess, CloudReads, TokenCredential};
use preflight_config::{ConfigDocument, ConfigError, ResolvedConfig};
use preflight_core::{
    CheckId, CheckOutcome, MachineDecl, MachineReadiness, ProjectDecl, ProjectKey,
    ProjectReadiness, Run,
};

use crate::matcher;
use crate::tier1::{validate_project, ProjectScope};
use crate::tier2::{validate_machine, MachineScope};

/// Default worker-pool bound: twice the cores, capped at eight.
fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
        .min(8)
}

/// Per-run knobs that are not part of the validation configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Object id of the principal the credential authenticates as; RBAC
    /// checks verify this principal's role assignments.
    pub principal_id: String,
    /// Bound on concurrently validated projects.
    pub project_parallelism: usize,
    /// Bound on concurrently validated machines.
    pub machine_parallelism: usize,
    /// Run the intelligent matcher over machines without a project
    /// association before validation.
    pub match_unassigned: bool,
    /// External cancellation signal; the engine also derives its own
    /// deadline-driven child from this token.
    pub cancellation: CancellationToken,
    /// Overall run deadline. Defaults to the per-scope budget multiplied
    /// by the number of scheduling waves.
    pub run_timeout: Option<Duration>,
}

impl RunOptions {
    pub fn new(principal_id: impl Into<String>) -> Self {
        Self { principal_id: principal_id.into(), ..Default::default() }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            principal_id: String::new(),
            project_parallelism: default_pool_size(),
            machine_parallelism: default_pool_size(),
            match_unassigned: true,
            cancellation: CancellationToken::new(),
            run_timeout: None,
        }
    }
}

/// The validation engine. Holds the run-scoped collaborators and produces
/// one [`Run`] per invocation; there is no process-wide state.
pub struct Engine {
    cloud: Arc<dyn CloudReads>,
    config: Arc<ResolvedConfig>,
    options: RunOptions,
}

impl Engine {
    pub fn new(cloud: Arc<dyn CloudReads>, config: ResolvedConfig) -> Self {
        Self { cloud, config: Arc::new(config), options: RunOptions::default() }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates every declared project and machine and assembles the run
    /// report. Never fails: provider and input problems become outcomes.
    pub async fn run(&self, projects: Vec<ProjectDecl>, machines: Vec<MachineDecl>) -> Run {
        let started_at = Utc::now();
        let cancel = self.options.cancellation.child_token();

        // Dedup declarations; conflicting duplicates keep the first
        // declaration and get flagged on the surviving scope.
        let mut decls: BTreeMap<ProjectKey, ProjectDecl> = BTreeMap::new();
        let mut conflicted: BTreeSet<ProjectKey> = BTreeSet::new();
        for decl in projects {
            match decls.entry(decl.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(decl);
                }
                Entry::Occupied(existing) => {
                    if existing.get().conflicts_with(&decl) {
                        conflicted.insert(existing.key().clone());
                    }
                }
            }
        }

        let mut machines = machines;
        if self.options.match_unassigned {
            matcher::assign_projects(&mut machines, &decls, self.cloud.as_ref()).await;
        }

        // Declarations that fail input validation become terminal scopes
        // without scheduling any checks.
        let mut project_results: BTreeMap<ProjectKey, ProjectReadiness> = BTreeMap::new();
        let mut runnable: Vec<ProjectDecl> = Vec::new();
        for (key, decl) in &decls {
            match decl.validate() {
                Ok(()) => runnable.push(decl.clone()),
                Err(err) => {
                    let outcome = CheckOutcome::critical(
                        CheckId::InputDeclaration,
                        "project declaration is incomplete",
                    )
                    .with_detail(err.to_string());
                    project_results.insert(
                        key.clone(),
                        ProjectReadiness::from_outcomes(key.clone(), vec![outcome], false),
                    );
                }
            }
        }

        let mut machines_by_project: HashMap<ProjectKey, Vec<MachineDecl>> = HashMap::new();
        for machine in &machines {
            if let Some(key) = &machine.project_key {
                machines_by_project.entry(key.clone()).or_default().push(machine.clone());
            }
        }

        let global = self.config.global();
        let scope_budget = Duration::from_secs(global.timeout_seconds.max(1));
        let project_pool =
            if global.parallel_execution { self.options.project_parallelism.max(1) } else { 1 };
        let machine_pool =
            if global.parallel_execution { self.options.machine_parallelism.max(1) } else { 1 };

        let total_scopes = runnable.len() + machines.len();
        let run_timeout = self.options.run_timeout.unwrap_or_else(|| {
            let waves = total_scopes.div_ceil(project_pool.max(machine_pool)).max(1);
            scope_budget * waves as u32
        });
        let deadline_guard = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(run_timeout).await;
                tracing::warn!("run deadline reached, cancelling remaining scopes");
                cancel.cancel();
            }
        });

        tracing::info!(
            projects = runnable.len(),
            machines = machines.len(),
            project_pool,
            machine_pool,
            fingerprint = self.config.fingerprint(),
            "starting validation run"
        );

        // Tier 1: landing zones.
        let semaphore = Arc::new(Semaphore::new(project_pool));
        let mut join: JoinSet<(ProjectKey, ProjectReadiness)> = JoinSet::new();
        for decl in runnable {
            let key = decl.key();
            let preamble = if conflicted.contains(&key) {
                vec![
                    CheckOutcome::warning(
                        CheckId::InputDeclaration,
                        "Conflicting project declaration",
                    )
                    .with_detail("duplicate declarations of this project disagree on some fields"),
                ]
            } else {
                Vec::new()
            };
            let scope = ProjectScope {
                machines: machines_by_project.get(&key).cloned().unwrap_or_default(),
                decl,
                preamble,
                cloud: self.cloud.clone(),
                config: self.config.clone(),
                principal_id: self.options.principal_id.clone(),
                now: started_at,
                cancel: cancel.clone(),
                budget: scope_budget,
            };
            let semaphore = semaphore.clone();
            join.spawn(async move {
                let _permit =
                    semaphore.acquire_owned().await.expect("semaphore is never closed");
                let key = scope.decl.key();
                (key, validate_project(scope).await)
            });
        }
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((key, readiness)) => {
                    project_results.insert(key, readiness);
                }
                Err(err) => tracing::error!(error = %err, "project scope task failed"),
            }
        }

        // Tier 2: servers, gated on their landing zone.
        let semaphore = Arc::new(Semaphore::new(machine_pool));
        let mut join: JoinSet<(usize, MachineReadiness)> = JoinSet::new();
        for (index, decl) in machines.iter().enumerate() {
            let project = decl.project_key.as_ref().and_then(|key| {
                let project_decl = decls.get(key)?;
                let verdict = project_results.get(key)?.rolled_up;
                Some((project_decl.clone(), verdict))
            });
            let scope = MachineScope {
                decl: decl.clone(),
                project,
                cloud: self.cloud.clone(),
                config: self.config.clone(),
                principal_id: self.options.principal_id.clone(),
                cancel: cancel.clone(),
                budget: scope_budget,
            };
            let semaphore = semaphore.clone();
            join.spawn(async move {
                let _permit =
                    semaphore.acquire_owned().await.expect("semaphore is never closed");
                (index, validate_machine(scope).await)
            });
        }
        let mut machine_results: Vec<Option<MachineReadiness>> =
            machines.iter().map(|_| None).collect();
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((index, readiness)) => machine_results[index] = Some(readiness),
                Err(err) => tracing::error!(error = %err, "machine scope task failed"),
            }
        }
        let machines_out: Vec<MachineReadiness> = machine_results
            .into_iter()
            .zip(&machines)
            .map(|(result, decl)| {
                result.unwrap_or_else(|| {
                    MachineReadiness::from_outcomes(
                        decl.target_name.clone(),
                        decl.project_key.clone(),
                        vec![CheckOutcome::failure(
                            CheckId::InputDeclaration,
                            "validation aborted unexpectedly",
                        )],
                    )
                })
            })
            .collect();

        deadline_guard.abort();

        let run = Run {
            projects: project_results,
            machines: machines_out,
            started_at,
            finished_at: Utc::now(),
            config_fingerprint: self.config.fingerprint().to_string(),
        };
        tracing::info!(worst = %run.worst_severity(), "validation run finished");
        run
    }
}

/// Single entry point: resolves the configuration, builds the cloud access
/// layer from the supplied credential, and runs the engine.
///
/// A configuration problem is the only fatal error; everything else is
/// reported inside the returned [`Run`].
pub async fn run(
    projects: Vec<ProjectDecl>,
    machines: Vec<MachineDecl>,
    document: &ConfigDocument,
    active_profile: Option<&str>,
    overrides: &[(String, serde_json::Value)],
    credential: Arc<dyn TokenCredential>,
    options: RunOptions,
) -> Result<Run, ConfigError> {
    let config = document.resolve(active_profile, overrides)?;
    let client = ArmClient::builder(credential)
        .with_cancellation(options.cancellation.clone())
        .build()
        .expect("default ARM endpoint is a valid URL");
    let cloud = Arc::new(CloudAccess::new(client));
    let engine = Engine::new(cloud, config).with_options(options);
    Ok(engine.run(projects, machines).await)
}
