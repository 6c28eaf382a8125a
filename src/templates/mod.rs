//! Template set compilation.
//!
//! # Data Flow
//! ```text
//! Template root
//!     → compiler.rs (discover files, sorted)
//!     → sections.rs (split out named definitions)
//!     → minijinja Environment (parse every template)
//!     → routing (implicit + explicit routes, duplicate check)
//!     → set.rs (immutable TemplateSet generation)
//! ```

pub mod compiler;
pub mod sections;
pub mod set;

pub use compiler::{BuildError, Compiler};
pub use set::{TemplateInfo, TemplateSet};
