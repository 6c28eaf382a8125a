//! Template application server.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌───────────────────────────────────────────────┐
//!                        │                TEMPLATE SERVER                │
//!                        │                                               │
//!   Client Request       │  ┌─────────┐   ┌────────────┐   ┌──────────┐  │
//!   ─────────────────────┼─▶│  http   │──▶│ dispatcher │──▶│ routing  │  │
//!                        │  │ server  │   │            │   │  table   │  │
//!                        │  └─────────┘   └─────┬──────┘   └──────────┘  │
//!                        │                      │                        │
//!                        │                      ▼                        │
//!   Client Response      │               ┌────────────┐   ┌──────────┐   │
//!   ◀────────────────────┼───────────────│ TemplateSet│◀──│  reload  │◀──┼── template root
//!                        │               │ generation │   │supervisor│   │   (notify)
//!                        │               └─────┬──────┘   └──────────┘   │
//!                        │                     │                         │
//!                        │            ┌────────┴────────┐                │
//!                        │            ▼                 ▼                │
//!                        │       ┌─────────┐      ┌──────────┐           │
//!                        │       │  funcs  │      │  query   │──────────┼── SQLite
//!                        │       └─────────┘      └──────────┘           │
//!                        └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use template_server::config::loader::load_config;
use template_server::config::DatabaseConfig;
use template_server::observability::{logging, metrics};
use template_server::{App, ServerConfig};

#[derive(Parser)]
#[command(name = "template-server")]
#[command(about = "Serve a directory of templates as a hot-reloading web application", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Template root directory
    #[arg(short, long)]
    templates: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Database connection string (e.g. sqlite:app.db)
    #[arg(short, long)]
    database: Option<String>,
}

impl Cli {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(root) = self.templates {
            config.templates.root = root;
        }
        if let Some(listen) = self.listen {
            config.listener.bind_address = listen;
        }
        if let Some(url) = self.database {
            let database = config.database.get_or_insert_with(DatabaseConfig::default);
            database.url = url;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    let config = cli.apply(config);

    logging::init(&config.observability.log_filter);
    tracing::info!("template-server v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        templates = ?config.templates.root,
        output = ?config.render.output,
        database = config.database.is_some(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let app = App::build(config)?;
    let listener = app.bind().await?;
    let running = app.serve(listener, true)?;
    running.wait().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
