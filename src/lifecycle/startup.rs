//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Initialize subsystems in dependency order
//! - Start background tasks (reload supervisor, signals)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error, including the first template build, is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::loader::ConfigError;
use crate::config::validation::validate_config;
use crate::config::ServerConfig;
use crate::funcs::{FuncError, FunctionLibrary};
use crate::http::{AppState, Dispatcher, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::query::{self, QueryError};
use crate::reload::{ReloadHandle, ReloadSupervisor};
use crate::templates::{BuildError, Compiler};

/// Fatal startup failures.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("function library: {0}")]
    Library(#[from] FuncError),

    #[error("initial template build failed: {0}")]
    Build(#[from] BuildError),

    #[error("database: {0}")]
    Database(#[from] QueryError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Fully initialized application, not yet accepting traffic.
pub struct App {
    state: AppState,
    supervisor: ReloadSupervisor,
    shutdown: Shutdown,
}

impl App {
    /// Build every subsystem from `config`.
    pub fn build(config: ServerConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let library = Arc::new(FunctionLibrary::standard()?);
        let compiler = Compiler::new(config.templates.clone(), library)?;
        let (supervisor, reload) = ReloadSupervisor::start(compiler, &config.reload)?;

        let source = config.database.as_ref().map(query::connect).transpose()?;
        let dispatcher = Dispatcher::new(reload.cell(), source, &config);

        Ok(Self {
            state: AppState {
                dispatcher: Arc::new(dispatcher),
                reload,
                config: Arc::new(config),
            },
            supervisor,
            shutdown: Shutdown::new(),
        })
    }

    pub fn reload_handle(&self) -> ReloadHandle {
        self.state.reload.clone()
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, StartupError> {
        let address = self.state.config.listener.bind_address.clone();
        TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })
    }

    /// Start background tasks and serve on `listener`.
    ///
    /// OS signals are only translated when `handle_signals` is set, so
    /// embedded servers (tests) leave process signals alone.
    pub fn serve(self, listener: TcpListener, handle_signals: bool) -> Result<Running, StartupError> {
        let local_addr = listener.local_addr()?;
        let reload = self.state.reload.clone();

        tokio::spawn(self.supervisor.run(self.shutdown.subscribe()));
        if handle_signals {
            tokio::spawn(signals::run(self.shutdown.clone(), reload.clone()));
        }

        let server = HttpServer::new(self.state);
        let server = tokio::spawn(server.run(listener, self.shutdown.subscribe()));

        tracing::info!(address = %local_addr, "Listening for connections");
        Ok(Running {
            local_addr,
            reload,
            shutdown: self.shutdown,
            server,
        })
    }
}

/// A serving application.
pub struct Running {
    pub local_addr: SocketAddr,
    pub reload: ReloadHandle,
    shutdown: Shutdown,
    server: JoinHandle<Result<(), std::io::Error>>,
}

impl Running {
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for the HTTP server to finish draining.
    pub async fn wait(self) -> Result<(), StartupError> {
        match self.server.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(StartupError::Serve(std::io::Error::other(e))),
        }
    }
}
