//! Reload supervisor.
//!
//! # Responsibilities
//! - Build the initial generation before traffic starts
//! - Rebuild on source changes or forced reloads, off the request path
//! - Validate and publish new generations with one atomic swap
//! - Keep the previous generation serving when a rebuild fails
//!
//! # Design Decisions
//! - Triggers are a `Notify` permit: any number of triggers during a build
//!   leave at most one rebuild pending
//! - Status is published on a watch channel so the admin API and tests can
//!   observe state without locking

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use notify::RecommendedWatcher;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Notify};

use crate::config::ReloadConfig;
use crate::observability::metrics;
use crate::reload::watcher::TemplateWatcher;
use crate::templates::{BuildError, Compiler, TemplateSet};

/// Supervisor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadState {
    Idle,
    Building,
    Validating,
    Publishing,
    Failed,
}

/// Observable supervisor status.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: ReloadState,
    /// Generation currently serving.
    pub generation: u64,
    /// Error of the most recent failed rebuild, cleared on success.
    pub last_error: Option<String>,
    /// Successful rebuilds since startup (the initial build excluded).
    pub reloads: u64,
    pub failures: u64,
    /// Rebuilds begun, including one still in flight.
    pub started: u64,
}

impl SupervisorStatus {
    /// Rebuilds finished, successful or not.
    pub fn attempts(&self) -> u64 {
        self.reloads + self.failures
    }
}

/// Cloneable control surface of a running supervisor.
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    trigger: Arc<Notify>,
    status: watch::Receiver<SupervisorStatus>,
    current: Arc<ArcSwap<TemplateSet>>,
}

impl ReloadHandle {
    /// Request a rebuild without waiting for it.
    pub fn force_reload(&self) {
        self.trigger.notify_one();
    }

    /// Request a rebuild and wait until one that began after this call
    /// finishes. A rebuild already in flight does not count.
    pub async fn reload(&self) -> SupervisorStatus {
        let mut rx = self.status.clone();
        let begun = rx.borrow_and_update().started;
        self.force_reload();
        // Rebuilds run one at a time, so attempt `begun + 1` is the first
        // one that can see changes made before this call.
        if rx
            .wait_for(|s| s.attempts() > begun && s.state == ReloadState::Idle)
            .await
            .is_err()
        {
            tracing::warn!("Reload supervisor stopped before the reload finished");
        }
        let status = rx.borrow().clone();
        status
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    /// Generation serving right now.
    pub fn current(&self) -> Arc<TemplateSet> {
        self.current.load_full()
    }

    /// The publication cell shared with the dispatcher.
    pub fn cell(&self) -> Arc<ArcSwap<TemplateSet>> {
        self.current.clone()
    }
}

/// Owns template set construction and publication.
pub struct ReloadSupervisor {
    compiler: Arc<Compiler>,
    current: Arc<ArcSwap<TemplateSet>>,
    trigger: Arc<Notify>,
    status: watch::Sender<SupervisorStatus>,
    config: ReloadConfig,
}

impl ReloadSupervisor {
    /// Build generation 1 synchronously. Any error is fatal to startup.
    pub fn start(compiler: Compiler, config: &ReloadConfig) -> Result<(Self, ReloadHandle), BuildError> {
        let started = Instant::now();
        let initial = compiler.compile(1)?;
        initial.validate()?;

        tracing::info!(
            generation = 1,
            templates = initial.templates().len(),
            routes = initial.routes().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Initial template set built"
        );
        metrics::record_generation(1);

        let current = Arc::new(ArcSwap::from_pointee(initial));
        let trigger = Arc::new(Notify::new());
        let (status, status_rx) = watch::channel(SupervisorStatus {
            state: ReloadState::Idle,
            generation: 1,
            last_error: None,
            reloads: 0,
            failures: 0,
            started: 0,
        });

        let handle = ReloadHandle {
            trigger: trigger.clone(),
            status: status_rx,
            current: current.clone(),
        };
        let supervisor = Self {
            compiler: Arc::new(compiler),
            current,
            trigger,
            status,
            config: config.clone(),
        };
        Ok((supervisor, handle))
    }

    fn start_watcher(&self) -> Option<RecommendedWatcher> {
        if !self.config.watch {
            return None;
        }
        match TemplateWatcher::new(self.compiler.root(), self.trigger.clone()).run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::error!(error = %e, root = ?self.compiler.root(), "Failed to watch template root; only forced reloads will apply");
                None
            }
        }
    }

    /// Serve reload triggers until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let _watcher = self.start_watcher();
        let debounce = Duration::from_millis(self.config.debounce_ms);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Reload supervisor stopping");
                    break;
                }
                _ = self.trigger.notified() => {
                    if !debounce.is_zero() {
                        tokio::time::sleep(debounce).await;
                    }
                    self.rebuild().await;
                }
            }
        }
    }

    fn set_state(&self, state: ReloadState) {
        self.status.send_modify(|s| s.state = state);
    }

    async fn rebuild(&self) {
        let generation = self.current.load().generation() + 1;
        let started = Instant::now();
        self.status.send_modify(|s| {
            s.state = ReloadState::Building;
            s.started += 1;
        });

        let compiler = self.compiler.clone();
        let built = tokio::task::spawn_blocking(move || compiler.compile(generation))
            .await
            .unwrap_or(Err(BuildError::Panicked));

        let validated = built.and_then(|set| {
            self.set_state(ReloadState::Validating);
            set.validate().map(|_| set)
        });

        match validated {
            Ok(set) => {
                self.set_state(ReloadState::Publishing);
                let routes = set.routes().len();
                self.current.store(Arc::new(set));

                self.status.send_modify(|s| {
                    s.state = ReloadState::Idle;
                    s.generation = generation;
                    s.last_error = None;
                    s.reloads += 1;
                });
                metrics::record_reload("success");
                metrics::record_generation(generation);
                tracing::info!(
                    generation,
                    routes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Template set published"
                );
            }
            Err(e) => {
                self.status.send_modify(|s| {
                    s.state = ReloadState::Failed;
                    s.last_error = Some(e.to_string());
                    s.failures += 1;
                });
                metrics::record_reload("failure");
                tracing::error!(
                    error = %e,
                    file = e.file().unwrap_or("-"),
                    serving = self.current.load().generation(),
                    "Template rebuild failed; keeping current generation"
                );
                self.set_state(ReloadState::Idle);
            }
        }
    }
}
