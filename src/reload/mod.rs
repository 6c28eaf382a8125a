//! Hot reload subsystem.
//!
//! # Data Flow
//! ```text
//! notify event / SIGHUP / POST /_admin/reload / ReloadHandle::force_reload
//!     → Notify permit (coalesced)
//!     → supervisor.rs (debounce, compile on blocking pool, validate)
//!     → ArcSwap<TemplateSet>::store (atomic publish)
//!     → next request's load_full() sees the new generation
//! ```

pub mod supervisor;
pub mod watcher;

pub use supervisor::{ReloadHandle, ReloadState, ReloadSupervisor, SupervisorStatus};
