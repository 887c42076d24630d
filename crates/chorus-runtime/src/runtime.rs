//! Main runtime orchestration.
//!
//! [`ChorusRuntime`] wires the configured scope tree, the registered backends
//! and the shared resources together:
//!
//! ```text
//! Backend ─▶ BackendSink ─▶ bounded queue ─▶ workers ─┬─▶ Dispatcher ─▶ listener tasks
//!                                                     └─▶ ReconciliationJob (target joined / left)
//! SharedTimer ─▶ ReconciliationJob::run_once (every `reconcile_interval`)
//! ```
//!
//! Shutdown runs in a fixed order: backends stop delivering, the queue is
//! closed and drained by the workers, running listeners are cancelled and
//! given `shutdown_grace` to finish, reconciliation stops, listeners are
//! stopped in reverse declaration order and the shared resources are
//! released last.
//!
//! ```rust,ignore
//! use chorus_runtime::ChorusRuntime;
//!
//! let runtime = ChorusRuntime::builder()
//!     .config_file("chorus.toml")
//!     .registry(plugins)
//!     .build()?;
//! runtime.register_backend(irc_backend)?;
//! runtime.run().await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use chorus_core::{BackendEvent, BackendSink, BoxedBackend, Envelope};
use chorus_framework::{
    AdminList, ContextResolver, Dispatcher, InitReport, PluginManager, PluginRegistry,
    ReconciliationJob, ScopeConfig, ScopeTree, SyncHandle,
};
use chorus_resources::{SharedResources, TimerHandle};

use crate::config::{ChorusConfig, ConfigLoader, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

type Jobs = Arc<HashMap<String, Arc<ReconciliationJob>>>;

/// Everything that exists only while the runtime is started.
struct Running {
    resources: Arc<SharedResources>,
    resolver: ContextResolver,
    sync: SyncHandle,
    manager: PluginManager,
    dispatcher: Dispatcher,
    jobs: Jobs,
    timers: Vec<TimerHandle>,
    backends: Vec<BoxedBackend>,
    tx: mpsc::Sender<Envelope>,
    workers: JoinSet<()>,
    stop_workers: CancellationToken,
}

/// The Chorus runtime.
pub struct ChorusRuntime {
    config: ChorusConfig,
    registry: PluginRegistry,
    backends: parking_lot::RwLock<Vec<BoxedBackend>>,
    state: Mutex<Option<Running>>,
}

impl ChorusRuntime {
    /// Creates a runtime builder that loads configuration through
    /// [`ConfigLoader`].
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration and initializes
    /// logging from it.
    pub fn from_config(config: ChorusConfig, registry: PluginRegistry) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            workers = config.runtime.workers,
            plugins = registry.plugin_types().count(),
            "Runtime initialized from configuration"
        );

        Self {
            config,
            registry,
            backends: parking_lot::RwLock::new(Vec::new()),
            state: Mutex::new(None),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &ChorusConfig {
        &self.config
    }

    /// The plugin types scope trees may install.
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Registers a backend. Backends are started by [`start`](Self::start),
    /// so they must be registered before it.
    pub fn register_backend(&self, backend: BoxedBackend) -> RuntimeResult<()> {
        if self.state.try_lock().map_or(true, |state| state.is_some()) {
            return Err(RuntimeError::AlreadyRunning);
        }
        let mut backends = self.backends.write();
        let network = backend.network().to_string();
        if backends.iter().any(|b| b.network() == network) {
            return Err(RuntimeError::DuplicateNetwork(network));
        }
        info!(network = %network, kind = %backend.kind(), "Registered backend");
        backends.push(backend);
        Ok(())
    }

    /// Number of registered backends.
    pub fn backend_count(&self) -> usize {
        self.backends.read().len()
    }

    /// Whether the runtime is started.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// The resolver over the current scope tree, while running.
    pub async fn resolver(&self) -> Option<ContextResolver> {
        self.state.lock().await.as_ref().map(|r| r.resolver.clone())
    }

    /// The dispatcher, while running.
    pub async fn dispatcher(&self) -> Option<Dispatcher> {
        self.state.lock().await.as_ref().map(|r| r.dispatcher.clone())
    }

    /// The reconciliation job of `network`, if its backend has a command
    /// registry and the runtime is running.
    pub async fn reconciliation_job(&self, network: &str) -> Option<Arc<ReconciliationJob>> {
        self.state
            .lock()
            .await
            .as_ref()
            .and_then(|r| r.jobs.get(network).cloned())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Loads and initialises the scope tree, acquires shared resources and
    /// starts the worker pool, reconciliation jobs and backends.
    ///
    /// Listeners whose `init` fails are reported, not fatal. A backend that
    /// fails to start is logged and left idle.
    pub async fn start(&self) -> RuntimeResult<InitReport> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(RuntimeError::AlreadyRunning);
        }
        info!("Starting Chorus runtime");

        let admins = AdminList::new(self.config.admins.clone())?;
        let tree = ScopeTree::load(&self.config.scope, &self.registry, self.config.dispatch.case)?;
        let resources = SharedResources::start(&self.config.resources).await?;

        let resolver =
            ContextResolver::with_cache_capacity(tree, self.config.runtime.resolution_cache);
        let sync = SyncHandle::new();
        let manager = PluginManager::new(Arc::clone(&resources), resolver.clone(), sync.clone());
        let report = manager.init_tree(&resolver.tree()).await;

        let dispatcher = Dispatcher::builder(resolver.clone())
            .config(self.config.dispatcher_config())
            .admin(Arc::new(admins))
            .build();

        let backends = self.backends.read().clone();
        let mut jobs = HashMap::new();
        let mut timers = Vec::new();
        for backend in &backends {
            if let Some(job) = ReconciliationJob::for_backend(backend, resolver.clone(), sync.clone())
            {
                let job = Arc::new(job);
                timers.push(
                    Arc::clone(&job).spawn(resources.timer(), self.config.runtime.reconcile_interval()),
                );
                jobs.insert(backend.network().to_string(), job);
            }
        }
        let jobs: Jobs = Arc::new(jobs);

        let (tx, rx) = mpsc::channel(self.config.runtime.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let stop_workers = CancellationToken::new();
        let mut workers = JoinSet::new();
        for id in 0..self.config.runtime.workers {
            workers.spawn(worker(
                id,
                Arc::clone(&rx),
                dispatcher.clone(),
                Arc::clone(&jobs),
                stop_workers.clone(),
            ));
        }
        debug!(workers = self.config.runtime.workers, capacity = self.config.runtime.queue_capacity, "Inbound queue ready");

        for backend in &backends {
            let sink = BackendSink::new(Arc::clone(backend), tx.clone());
            match Arc::clone(backend).start(sink).await {
                Ok(()) => info!(network = %backend.network(), kind = %backend.kind(), "Backend started"),
                Err(e) => error!(network = %backend.network(), error = %e, "Failed to start backend"),
            }
        }

        info!(
            tree = resolver.version(),
            active = report.active.len(),
            failed = report.failed.len(),
            backends = backends.len(),
            "Runtime started"
        );

        *state = Some(Running {
            resources,
            resolver,
            sync,
            manager,
            dispatcher,
            jobs,
            timers,
            backends,
            tx,
            workers,
            stop_workers,
        });
        Ok(report)
    }

    /// Replaces the scope tree.
    ///
    /// The new tree is built and initialised first; a tree that fails to
    /// load leaves the running one untouched. After the swap, command
    /// listings are invalidated and republished, and the old tree's
    /// listeners are stopped.
    pub async fn reload(&self, scope: &ScopeConfig) -> RuntimeResult<InitReport> {
        let state = self.state.lock().await;
        let running = state.as_ref().ok_or(RuntimeError::NotRunning)?;

        let tree = Arc::new(ScopeTree::load(scope, &self.registry, self.config.dispatch.case)?);
        let report = running.manager.init_tree(&tree).await;

        let old = running.resolver.swap(tree);
        running.sync.invalidate();
        for job in running.jobs.values() {
            let job = Arc::clone(job);
            running.resources.timer().schedule(Duration::ZERO, async move {
                job.run_once().await;
            });
        }
        info!(
            old = old.version(),
            new = running.resolver.version(),
            active = report.active.len(),
            failed = report.failed.len(),
            "Scope tree reloaded"
        );

        running.manager.stop_tree(&old).await;
        Ok(report)
    }

    /// Stops the runtime. See the module docs for the order of steps.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        let Some(mut running) = self.state.lock().await.take() else {
            return Err(RuntimeError::NotRunning);
        };
        info!("Stopping Chorus runtime");

        for backend in &running.backends {
            if let Err(e) = backend.shutdown().await {
                error!(network = %backend.network(), error = %e, "Error during backend shutdown");
            }
        }

        drop(running.tx);
        running.stop_workers.cancel();
        while let Some(joined) = running.workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }
        debug!("Inbound queue drained");

        running.dispatcher.cancel_all();
        let grace = self.config.runtime.shutdown_grace();
        if !running.dispatcher.drain_timeout(grace).await {
            warn!(
                in_flight = running.dispatcher.in_flight(),
                grace = ?grace,
                "Listeners still running after the grace period"
            );
        }

        for timer in &running.timers {
            timer.cancel();
        }

        running.manager.stop_tree(&running.resolver.tree()).await;
        running.resources.stop().await;

        info!("Runtime stopped");
        Ok(())
    }

    /// Starts the runtime and runs it until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Starts the runtime and runs it until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        info!("Chorus runtime is now running");
        shutdown.await;
        self.shutdown().await
    }
}

impl fmt::Debug for ChorusRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChorusRuntime")
            .field("backends", &self.backends.read().len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Consumes the inbound queue until it is closed and empty.
async fn worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    dispatcher: Dispatcher,
    jobs: Jobs,
    stop: CancellationToken,
) {
    trace!(worker = id, "Worker started");
    loop {
        let envelope = {
            let mut rx = rx.lock().await;
            let received = tokio::select! {
                biased;
                () = stop.cancelled() => None,
                envelope = rx.recv() => Some(envelope),
            };
            match received {
                Some(envelope) => envelope,
                None => {
                    // Closing keeps buffered events readable.
                    rx.close();
                    rx.recv().await
                }
            }
        };
        let Some(Envelope { backend, event }) = envelope else {
            break;
        };

        match event {
            BackendEvent::Message(message) => {
                let outcome = dispatcher.dispatch(backend, message);
                trace!(worker = id, outcome = ?outcome, "Message handled");
            }
            BackendEvent::TargetJoined { target } => match jobs.get(backend.network()) {
                Some(job) => {
                    job.target_joined(&target).await;
                }
                None => debug!(
                    network = %backend.network(),
                    target = %target,
                    "Target joined on a backend without command registry"
                ),
            },
            BackendEvent::TargetLeft { target } => {
                if let Some(job) = jobs.get(backend.network()) {
                    job.target_left(&target).await;
                }
            }
        }
    }
    trace!(worker = id, "Worker stopped");
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = signal::ctrl_c() => on_ctrl_c(result),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, waiting for Ctrl+C only");
                on_ctrl_c(signal::ctrl_c().await);
            }
        }
    }

    #[cfg(not(unix))]
    on_ctrl_c(signal::ctrl_c().await);
}

fn on_ctrl_c(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`ChorusRuntime`] whose configuration comes from files and
/// the environment.
///
/// ```rust,ignore
/// let runtime = ChorusRuntime::builder()
///     .config_file("config/chorus.toml")
///     .profile("production")
///     .registry(plugins)
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    registry: PluginRegistry,
}

impl RuntimeBuilder {
    /// Creates a builder with the built-in plugins registered.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            registry: PluginRegistry::with_builtins(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration programmatically.
    pub fn merge(mut self, config: ChorusConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Replaces the plugin registry.
    pub fn registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Loads and validates the configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<ChorusRuntime> {
        let config = self.config_loader.load()?;
        validate_config(&config)?;
        Ok(ChorusRuntime::from_config(config, self.registry))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
