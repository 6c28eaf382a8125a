//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (per template generation):
//!     file paths + `<METHOD> <pattern>` definitions
//!     → router.rs (parse names, detect duplicates)
//!     → matcher.rs (compile patterns into segments)
//!     → Freeze as immutable RouteTable
//!
//! Incoming Request (method, path)
//!     → matcher.rs (split and percent-decode components)
//!     → router.rs (literal lookup, then dynamic scan)
//!     → matcher.rs (segment match, parameter capture)
//!     → Return: Found, MethodNotAllowed, NotFound or BadPath
//! ```
//!
//! # Design Decisions
//! - Routes compiled with their template set, immutable at runtime
//! - No regex in hot path (segment comparison only)
//! - Deterministic: same input always matches same route
//! - Most specific match wins

pub mod matcher;
pub mod router;

pub use matcher::{decode_path, ParamSet, PathDecodeError, PathPattern, PatternError};
pub use router::{parse_route_name, Route, RouteError, RouteMatch, RouteSource, RouteSummary, RouteTable};
