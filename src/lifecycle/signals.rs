//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP forces a template rebuild, not a shutdown

use crate::lifecycle::Shutdown;
use crate::reload::ReloadHandle;

/// Translate signals until shutdown is triggered.
pub async fn run(shutdown: Shutdown, reload: ReloadHandle) {
    let mut stop = shutdown.subscribe();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(term), Ok(hup)) => (term, hup),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to install signal handlers; falling back to Ctrl+C");
                wait_ctrl_c(&shutdown, &mut stop).await;
                return;
            }
        };

        loop {
            tokio::select! {
                _ = stop.recv() => return,
                _ = tokio::signal::ctrl_c() => break,
                _ = term.recv() => break,
                _ = hup.recv() => {
                    tracing::info!("SIGHUP received, forcing template reload");
                    reload.force_reload();
                }
            }
        }
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    }

    #[cfg(not(unix))]
    {
        let _ = reload;
        wait_ctrl_c(&shutdown, &mut stop).await;
    }
}

async fn wait_ctrl_c(shutdown: &Shutdown, stop: &mut tokio::sync::broadcast::Receiver<()>) {
    tokio::select! {
        _ = stop.recv() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            tracing::info!("Shutdown signal received");
            shutdown.trigger();
        }
    }
}
