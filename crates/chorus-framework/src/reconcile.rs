//! Publication of exposed aliases to external command registries.
//!
//! Backends with a push-style registry (Discord slash commands) need their
//! per-target command lists kept in step with what the scope tree would
//! resolve for that target. Every listener with an exposed alias is published
//! once, under the first exposed alias it holds. A [`ReconciliationJob`] does
//! this for one backend:
//!
//! ```text
//!            every interval, on target join, after invalidate()
//!                              │
//!                              ▼
//!  registry.targets() ──► resolve(network, guild=target) ──► desired listings
//!                                                               │
//!                              published listings ◄── diff ─────┘
//!                                     │
//!                   upsert changed ───┴─── delete removed
//! ```
//!
//! A target counts as synchronized only once every push for it succeeded;
//! failed targets are retried on the next run. Running the job again against
//! an unchanged tree makes no external calls.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use chorus_core::{BoxedBackend, CommandArgument, CommandListing, CommandRegistry};
use chorus_resources::{SharedTimer, TimerHandle};

use crate::resolver::ContextResolver;
use crate::scope::ScopeContext;

/// Default delay between two runs.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum length of a published description, in characters.
pub const DESCRIPTION_LIMIT: usize = 100;

/// Description used when neither the installation nor the plugin has help.
pub const FALLBACK_HELP: &str = "No help available.";

/// Name of the single free-form argument of every published command.
pub const ARGUMENT_NAME: &str = "args";

/// Description of that argument.
pub const ARGUMENT_DESCRIPTION: &str = "Arguments for this command.";

const ELLIPSIS: &str = "...";

// =============================================================================
// SyncHandle
// =============================================================================

/// Requests a full re-publication from every job sharing the handle.
#[derive(Debug, Clone, Default)]
pub struct SyncHandle {
    generation: Arc<AtomicU64>,
}

impl SyncHandle {
    /// Creates a handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every target of every job as out of date.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Current generation; bumped by [`invalidate`](Self::invalidate).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Outcome of one [`ReconciliationJob::run_once`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Targets the registry reported.
    pub targets: usize,
    /// Targets that were pushed to during this run.
    pub synced: usize,
    /// Commands created or replaced.
    pub upserts: usize,
    /// Commands removed.
    pub deletes: usize,
    /// Failed pushes.
    pub failures: usize,
}

impl ReconcileReport {
    /// Whether the run made any external call.
    pub fn is_noop(&self) -> bool {
        self.upserts == 0 && self.deletes == 0 && self.failures == 0
    }

    fn absorb(&mut self, other: ReconcileReport) {
        self.synced += other.synced;
        self.upserts += other.upserts;
        self.deletes += other.deletes;
        self.failures += other.failures;
    }
}

#[derive(Debug, Default)]
struct TargetState {
    synchronized: bool,
    published: BTreeMap<String, CommandListing>,
}

#[derive(Debug, Default)]
struct JobState {
    targets: HashMap<String, TargetState>,
    generation: u64,
    tree_version: u64,
}

impl JobState {
    fn invalidate_all(&mut self) {
        for state in self.targets.values_mut() {
            state.synchronized = false;
        }
    }
}

/// Keeps one backend's external command registry in step with the scope tree.
pub struct ReconciliationJob {
    network: String,
    registry: Arc<dyn CommandRegistry>,
    resolver: ContextResolver,
    sync: SyncHandle,
    state: Mutex<JobState>,
}

impl ReconciliationJob {
    /// Creates a job for the given registry.
    pub fn new(
        network: impl Into<String>,
        registry: Arc<dyn CommandRegistry>,
        resolver: ContextResolver,
        sync: SyncHandle,
    ) -> Self {
        let state = JobState {
            generation: sync.generation(),
            tree_version: resolver.version(),
            ..Default::default()
        };
        Self {
            network: network.into(),
            registry,
            resolver,
            sync,
            state: Mutex::new(state),
        }
    }

    /// Creates a job for `backend`, if it has an external registry.
    pub fn for_backend(
        backend: &BoxedBackend,
        resolver: ContextResolver,
        sync: SyncHandle,
    ) -> Option<Self> {
        let registry = backend.command_registry()?;
        Some(Self::new(backend.network(), registry, resolver, sync))
    }

    /// Network served by the job.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Runs one reconciliation pass over every target of the registry.
    pub async fn run_once(&self) -> ReconcileReport {
        let mut state = self.state.lock().await;
        self.apply_invalidation(&mut state);

        let targets = match self.registry.targets().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(network = %self.network, error = %e, "Failed to list command targets");
                return ReconcileReport::default();
            }
        };

        let current: HashSet<&str> = targets.iter().map(String::as_str).collect();
        state.targets.retain(|target, _| {
            let keep = current.contains(target.as_str());
            if !keep {
                debug!(network = %self.network, target = %target, "Target gone, forgetting");
            }
            keep
        });

        let mut report = ReconcileReport {
            targets: targets.len(),
            ..Default::default()
        };
        for target in &targets {
            let entry = state.targets.entry(target.clone()).or_default();
            if entry.synchronized {
                continue;
            }
            report.absorb(self.sync_target(target, entry).await);
        }

        if !report.is_noop() {
            info!(
                network = %self.network,
                targets = report.targets,
                upserts = report.upserts,
                deletes = report.deletes,
                failures = report.failures,
                "Command registry reconciled"
            );
        }
        report
    }

    /// Publishes commands to a newly joined target right away.
    pub async fn target_joined(&self, target: &str) -> ReconcileReport {
        let mut state = self.state.lock().await;
        self.apply_invalidation(&mut state);
        info!(network = %self.network, target = %target, "Target joined, publishing commands");
        let entry = state.targets.entry(target.to_string()).or_default();
        entry.synchronized = false;
        let mut report = ReconcileReport {
            targets: 1,
            ..Default::default()
        };
        report.absorb(self.sync_target(target, entry).await);
        report
    }

    /// Forgets everything about a target the bot left. No external calls.
    pub async fn target_left(&self, target: &str) {
        if self.state.lock().await.targets.remove(target).is_some() {
            info!(network = %self.network, target = %target, "Target left, state dropped");
        }
    }

    /// Marks every target as out of date. Published listings are kept, so the
    /// next run only pushes differences.
    pub async fn invalidate(&self) {
        self.state.lock().await.invalidate_all();
    }

    /// Listings last published to `target`.
    pub async fn published(&self, target: &str) -> Option<BTreeMap<String, CommandListing>> {
        self.state
            .lock()
            .await
            .targets
            .get(target)
            .map(|s| s.published.clone())
    }

    /// Whether `target` is known and synchronized.
    pub async fn is_synchronized(&self, target: &str) -> bool {
        self.state
            .lock()
            .await
            .targets
            .get(target)
            .is_some_and(|s| s.synchronized)
    }

    /// Schedules [`run_once`](Self::run_once) on `timer`: immediately, then
    /// `interval` after each run.
    pub fn spawn(self: Arc<Self>, timer: &SharedTimer, interval: Duration) -> TimerHandle {
        debug!(network = %self.network, interval = ?interval, "Reconciliation scheduled");
        timer.schedule_with_fixed_delay(Duration::ZERO, interval, move || {
            let job = Arc::clone(&self);
            async move {
                job.run_once().await;
            }
        })
    }

    fn apply_invalidation(&self, state: &mut JobState) {
        let generation = self.sync.generation();
        let version = self.resolver.version();
        if state.generation != generation || state.tree_version != version {
            debug!(network = %self.network, generation, version, "Command listings invalidated");
            state.generation = generation;
            state.tree_version = version;
            state.invalidate_all();
        }
    }

    /// One listing per resolved listener, named after the first exposed alias
    /// it actually holds in this context.
    async fn desired(&self, target: &str) -> BTreeMap<String, CommandListing> {
        let ctx = ScopeContext::network(self.network.as_str()).with_guild(target);
        let resolved = self.resolver.resolve(&ctx);

        let mut listings = BTreeMap::new();
        for listener in resolved.listeners() {
            let Some(alias) = listener.aliases().exposed().find(|alias| {
                resolved
                    .alias(&alias.name)
                    .is_some_and(|entry| Arc::ptr_eq(&entry.listener, listener))
            }) else {
                continue;
            };

            let help = listener
                .help_text(&ctx)
                .await
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_HELP.to_string());
            listings.insert(
                alias.name.clone(),
                CommandListing {
                    name: alias.name.clone(),
                    description: abbreviate(&help, DESCRIPTION_LIMIT),
                    argument: Some(CommandArgument {
                        name: ARGUMENT_NAME.to_string(),
                        description: ARGUMENT_DESCRIPTION.to_string(),
                    }),
                },
            );
        }
        listings
    }

    async fn sync_target(&self, target: &str, state: &mut TargetState) -> ReconcileReport {
        let desired = self.desired(target).await;
        let mut report = ReconcileReport {
            synced: 1,
            ..Default::default()
        };

        for (name, listing) in &desired {
            if state.published.get(name) == Some(listing) {
                continue;
            }
            match self.registry.upsert_command(target, listing).await {
                Ok(()) => {
                    report.upserts += 1;
                    state.published.insert(name.clone(), listing.clone());
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(network = %self.network, target = %target, command = %name, error = %e, "Failed to publish command");
                }
            }
        }

        let stale: Vec<String> = state
            .published
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            match self.registry.delete_command(target, &name).await {
                Ok(()) => {
                    report.deletes += 1;
                    state.published.remove(&name);
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(network = %self.network, target = %target, command = %name, error = %e, "Failed to remove command");
                }
            }
        }

        state.synchronized = report.failures == 0;
        report
    }
}

impl fmt::Debug for ReconciliationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationJob")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// Shortens `text` to at most `limit` characters, ending in `...` if cut.
pub fn abbreviate(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testing::{MockRegistry, load};
    use serde_json::json;

    fn resolver() -> ContextResolver {
        ContextResolver::new(load(json!({
            "children": [{ "match": { "network": "discord" },
                "listeners": [
                    { "plugin": "echo", "name": "ping", "aliases": ["ping", { "name": "p", "exposed": false }],
                      "help": "Replies with pong." },
                    { "plugin": "echo", "name": "timer", "aliases": ["timer", "remind"],
                      "config": { "help": "Sets a timer." } }
                ],
                "children": [{ "match": { "guild": "g2" },
                    "listeners": [{ "plugin": "echo", "name": "quiet", "aliases": ["quiet"] }]
                }]
            }]
        })))
    }

    fn job(registry: &Arc<MockRegistry>, resolver: ContextResolver) -> ReconciliationJob {
        ReconciliationJob::new(
            "discord",
            Arc::clone(registry) as Arc<dyn CommandRegistry>,
            resolver,
            SyncHandle::new(),
        )
    }

    #[tokio::test]
    async fn test_publishes_one_command_per_listener() {
        let registry = MockRegistry::with_targets(&["g1", "g2"]);
        let job = job(&registry, resolver());

        let report = job.run_once().await;
        assert_eq!(report.targets, 2);
        assert_eq!(report.failures, 0);

        // timer is published under its first alias only
        assert_eq!(registry.names("g1"), ["ping", "timer"]);
        assert_eq!(registry.names("g2"), ["ping", "quiet", "timer"]);

        let published = job.published("g1").await.unwrap();
        assert_eq!(published["ping"].description, "Replies with pong.");
        assert_eq!(published["timer"].description, "Sets a timer.");
        let g2 = job.published("g2").await.unwrap();
        assert_eq!(g2["quiet"].description, FALLBACK_HELP);
        assert_eq!(
            published["ping"].argument.as_ref().map(|a| a.name.as_str()),
            Some(ARGUMENT_NAME)
        );
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let registry = MockRegistry::with_targets(&["g1"]);
        let job = job(&registry, resolver());

        job.run_once().await;
        let calls = registry.calls();
        let report = job.run_once().await;
        assert!(report.is_noop());
        assert_eq!(registry.calls(), calls);

        // invalidation re-examines targets but pushes nothing when unchanged
        job.invalidate().await;
        assert!(job.run_once().await.is_noop());
        assert_eq!(registry.calls(), calls);
    }

    #[tokio::test]
    async fn test_tree_swap_pushes_only_differences() {
        let registry = MockRegistry::with_targets(&["g1"]);
        let resolver = resolver();
        let job = job(&registry, resolver.clone());
        job.run_once().await;

        resolver.swap(Arc::new(load(json!({
            "children": [{ "match": { "network": "discord" },
                "listeners": [
                    { "plugin": "echo", "name": "ping", "aliases": ["ping"], "help": "Replies with pong." },
                    { "plugin": "echo", "name": "dice", "aliases": ["dice"] }
                ]
            }]
        }))));

        let report = job.run_once().await;
        assert_eq!(report.upserts, 1);
        assert_eq!(report.deletes, 1);
        assert_eq!(registry.names("g1"), ["dice", "ping"]);
    }

    #[tokio::test]
    async fn test_failed_target_is_retried() {
        let registry = MockRegistry::with_targets(&["g1", "g2"]);
        registry.failing.lock().insert("g2".to_string());
        let job = job(&registry, resolver());

        let report = job.run_once().await;
        assert!(report.failures > 0);
        assert!(job.is_synchronized("g1").await);
        assert!(!job.is_synchronized("g2").await);

        registry.failing.lock().clear();
        let report = job.run_once().await;
        assert_eq!(report.synced, 1);
        assert_eq!(report.failures, 0);
        assert!(job.is_synchronized("g2").await);
        assert_eq!(registry.names("g2"), ["ping", "quiet", "timer"]);
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_skipped() {
        let registry = MockRegistry::with_targets(&["g1"]);
        *registry.unreachable.lock() = true;
        let job = job(&registry, resolver());
        assert_eq!(job.run_once().await, ReconcileReport::default());
        assert_eq!(registry.calls(), 0);
    }

    #[tokio::test]
    async fn test_target_join_and_leave() {
        let registry = MockRegistry::with_targets(&[]);
        let job = job(&registry, resolver());

        let report = job.target_joined("g9").await;
        assert_eq!(report.upserts, 2);
        assert!(job.is_synchronized("g9").await);

        job.target_left("g9").await;
        assert!(job.published("g9").await.is_none());
        assert_eq!(registry.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_vanished_target_is_forgotten() {
        let registry = MockRegistry::with_targets(&["g1"]);
        let job = job(&registry, resolver());
        job.run_once().await;
        registry.targets.lock().clear();
        job.run_once().await;
        assert!(job.published("g1").await.is_none());
    }

    #[tokio::test]
    async fn test_sync_handle_invalidates() {
        let registry = MockRegistry::with_targets(&["g1"]);
        let sync = SyncHandle::new();
        let job = ReconciliationJob::new(
            "discord",
            Arc::clone(&registry) as Arc<dyn CommandRegistry>,
            resolver(),
            sync.clone(),
        );
        job.run_once().await;
        let before = registry.calls();

        registry.listings.lock().clear();
        sync.invalidate();
        // published state is kept, so a wiped remote is not noticed
        assert!(job.run_once().await.is_noop());
        assert_eq!(registry.calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_job_runs_immediately() {
        let registry = MockRegistry::with_targets(&["g1"]);
        let timer = SharedTimer::new();
        let handle = Arc::new(job(&registry, resolver())).spawn(&timer, DEFAULT_INTERVAL);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.names("g1").len(), 2);

        handle.cancel();
        timer.shutdown().await;
    }

    #[tokio::test]
    async fn test_first_alias_taken_elsewhere_uses_next() {
        let registry = MockRegistry::with_targets(&["g1"]);
        let job = job(
            &registry,
            ContextResolver::new(load(json!({
                "listeners": [{ "plugin": "echo", "name": "timer", "aliases": ["t", "timer"] }],
                "children": [{ "match": { "guild": "g1" },
                    "listeners": [{ "plugin": "echo", "name": "tea", "aliases": ["t"] }]
                }]
            }))),
        );
        job.run_once().await;
        assert_eq!(registry.names("g1"), ["t", "timer"]);
        let published = job.published("g1").await.unwrap();
        assert_eq!(published["timer"].description, FALLBACK_HELP);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_help_does_not_stop_the_schedule() {
        let registry = MockRegistry::with_targets(&["g1"]);
        let timer = SharedTimer::new();
        let job = Arc::new(job(
            &registry,
            ContextResolver::new(load(json!({
                "listeners": [
                    { "plugin": "echo", "name": "boom", "aliases": ["boom"], "config": { "panic_help": true } },
                    { "plugin": "echo", "name": "ping", "aliases": ["ping"] }
                ]
            }))),
        ));
        let handle = Arc::clone(&job).spawn(&timer, DEFAULT_INTERVAL);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.names("g1"), ["boom", "ping"]);
        assert_eq!(job.published("g1").await.unwrap()["boom"].description, FALLBACK_HELP);

        // later runs still happen and pick up new targets
        registry.targets.lock().push("g2".to_string());
        tokio::time::sleep(DEFAULT_INTERVAL * 2).await;
        assert_eq!(registry.names("g2"), ["boom", "ping"]);
        assert_eq!(timer.pending(), 1);
        assert!(!handle.is_cancelled());

        handle.cancel();
        timer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_join_and_periodic_run_publish_once() {
        let registry = MockRegistry::with_targets(&["g1"]);
        *registry.latency.lock() = Duration::from_millis(5);
        let job = job(&registry, resolver());

        let (periodic, joined) = tokio::join!(job.run_once(), job.target_joined("g1"));
        assert_eq!(periodic.failures + joined.failures, 0);
        assert_eq!(registry.upserts.load(Ordering::SeqCst), 2);
        assert_eq!(periodic.upserts + joined.upserts, 2);
        assert_eq!(registry.names("g1"), ["ping", "timer"]);
        assert!(job.is_synchronized("g1").await);
    }

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("short", 100), "short");
        let long = "x".repeat(150);
        let cut = abbreviate(&long, DESCRIPTION_LIMIT);
        assert_eq!(cut.chars().count(), DESCRIPTION_LIMIT);
        assert!(cut.ends_with("..."));
        assert_eq!(abbreviate("ääää", 3), "...");
    }
}
