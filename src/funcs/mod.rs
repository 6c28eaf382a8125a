//! Template function library.
//!
//! # Data Flow
//! ```text
//! LibraryBuilder::standard()
//!     → BoundFunc per helper (signature validated at registration)
//!     → FunctionLibrary (immutable, shared via Arc)
//!     → install() into every template generation's Environment
//!
//! Template call `name(args...)`
//!     → invoke.rs (bind args, call, check outputs)
//!     → value, or a render error carrying FuncError as its source
//!
//! Template call `try(name, args...)`
//!     → invoke.rs (contract check, call)
//!     → TryResult { value, error, ok }
//! ```
//!
//! # Design Decisions
//! - One registry for every helper; `try` works with all of them
//! - Errors cross the engine boundary as `minijinja::Error` with the
//!   `FuncError` attached as source, so the dispatcher can recover
//!   `httpError` status codes
//! - The library is built once at startup and shared by all generations

pub mod frontmatter;
pub mod humanize;
pub mod invoke;
pub mod ksuid;
pub mod markdown;
pub mod sanitize;
pub mod trust;

use std::sync::Arc;

use axum::http::StatusCode;
use indexmap::IndexMap;
use minijinja::value::Value;
use minijinja::{Environment, ErrorKind};

use crate::query::QueryError;
pub use invoke::{BoundFunc, OutputKind, ParamKind, Signature, TryResult};
use trust::TrustContext;

/// Failure raised by a bound function.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FuncError {
    #[error("{0}")]
    Failed(String),

    #[error("http error {}", .0.as_u16())]
    Http(StatusCode),

    #[error("{func}: argument {position} must be {expected}, got {got}")]
    ArgumentType {
        func: String,
        position: usize,
        expected: &'static str,
        got: String,
    },

    #[error("{func}: takes {expected} arguments, got {got}")]
    TooManyArguments {
        func: String,
        expected: usize,
        got: usize,
    },

    #[error("{0}")]
    Contract(String),

    #[error(transparent)]
    Query(Arc<QueryError>),
}

impl From<QueryError> for FuncError {
    fn from(err: QueryError) -> Self {
        FuncError::Query(Arc::new(err))
    }
}

impl From<FuncError> for minijinja::Error {
    fn from(err: FuncError) -> Self {
        minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string()).with_source(err)
    }
}

/// Immutable registry of bound functions.
#[derive(Debug, Default)]
pub struct FunctionLibrary {
    funcs: IndexMap<String, BoundFunc>,
}

impl FunctionLibrary {
    pub fn builder() -> LibraryBuilder {
        LibraryBuilder::default()
    }

    /// The standard helper set.
    pub fn standard() -> Result<Self, FuncError> {
        Ok(LibraryBuilder::standard()?.build())
    }

    pub fn get(&self, name: &str) -> Option<&BoundFunc> {
        self.funcs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }

    /// Register every function, `try`, the escape filters and HTML
    /// autoescaping with `env`.
    pub fn install(&self, env: &mut Environment<'static>) {
        for (name, func) in &self.funcs {
            env.add_global(name.clone(), Value::from_object(func.clone()));
        }
        env.add_function("try", invoke::try_call);
        env.add_filter("attr", trust::attr_filter);
        env.add_filter("js", trust::js_filter);
        env.add_filter("jsstr", trust::jsstr_filter);
        env.add_filter("srcset", trust::srcset_filter);
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::Html);
    }
}

/// Collects functions before freezing them into a library.
#[derive(Debug, Default)]
pub struct LibraryBuilder {
    funcs: IndexMap<String, BoundFunc>,
}

fn str_arg(args: &[Value], i: usize) -> &str {
    args.get(i).and_then(|v| v.as_str()).unwrap_or_default()
}

impl LibraryBuilder {
    pub fn register(mut self, func: BoundFunc) -> Self {
        self.funcs.insert(func.name().to_string(), func);
        self
    }

    /// Register a closure under `name`.
    pub fn function<F>(self, name: &str, signature: Signature, imp: F) -> Result<Self, FuncError>
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, FuncError> + Send + Sync + 'static,
    {
        Ok(self.register(BoundFunc::new(name, signature, imp)?))
    }

    pub fn build(self) -> FunctionLibrary {
        FunctionLibrary { funcs: self.funcs }
    }

    /// Builder preloaded with the standard helpers.
    pub fn standard() -> Result<Self, FuncError> {
        use ParamKind::{Any, Int, String as Str};

        let policies = Arc::new(sanitize::Policies::standard());

        let mut builder = Self::default()
            .function("sanitizeHtml", Signature::new([Str, Str]).fallible(), move |args| {
                let clean = policies.sanitize(str_arg(args, 0), str_arg(args, 1))?;
                Ok(vec![trust::mark(TrustContext::Html, clean)])
            })?
            .function("markdown", Signature::new([Str]).fallible(), |args| {
                let html = markdown::render_markdown(str_arg(args, 0))?;
                Ok(vec![trust::mark(TrustContext::Html, html)])
            })?
            .function("splitFrontMatter", Signature::new([Str]).fallible(), |args| {
                let doc = frontmatter::split_front_matter(str_arg(args, 0))?;
                Ok(vec![Value::from_serialize(&doc)])
            })?
            .function("httpError", Signature::new([Int]).fallible(), |args| {
                let code = args.first().and_then(|v| v.as_i64()).unwrap_or_default();
                let status = u16::try_from(code)
                    .ok()
                    .filter(|c| (400..=599).contains(c))
                    .and_then(|c| StatusCode::from_u16(c).ok())
                    .ok_or_else(|| FuncError::Failed(format!("httpError: {} is not an error status", code)))?;
                Err(FuncError::Http(status))
            })?
            .function("humanize", Signature::new([Str, Str]).fallible(), |args| {
                let out = humanize::humanize(str_arg(args, 0), str_arg(args, 1))?;
                Ok(vec![Value::from(out)])
            })?
            .function("idx", Signature::new([Int, Any]).fallible(), |args| {
                let i = args.first().and_then(|v| v.as_i64()).unwrap_or_default();
                let seq = args.get(1).cloned().unwrap_or_default();
                Ok(vec![invoke::index_value(i, &seq)?])
            })?
            .function("ksuid", Signature::new(Vec::new()).infallible(), |_| {
                Ok(vec![Value::from(ksuid::Ksuid::new().to_string())])
            })?;

        let markers = [
            ("trustHtml", TrustContext::Html),
            ("trustAttr", TrustContext::Attr),
            ("trustJS", TrustContext::Js),
            ("trustJSStr", TrustContext::JsStr),
            ("trustSrcSet", TrustContext::SrcSet),
        ];
        for (name, context) in markers {
            builder = builder.function(name, Signature::new([Str]).infallible(), move |args| {
                Ok(vec![trust::mark(context, str_arg(args, 0).to_string())])
            })?;
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    fn env() -> Environment<'static> {
        let mut env = Environment::new();
        FunctionLibrary::standard().unwrap().install(&mut env);
        env
    }

    fn render(source: &str) -> Result<String, minijinja::Error> {
        env().render_str(source, context! { items => vec!["a", "b", "c"] })
    }

    #[test]
    fn test_direct_calls() {
        assert_eq!(render("{{ humanize('size', 1048576) }}").unwrap(), "1.0 MB");
        assert_eq!(render("{{ idx(1, items) }}").unwrap(), "b");
        assert_eq!(render("{{ ksuid() | length }}").unwrap(), "27");
        assert_eq!(
            render("{{ sanitizeHtml('strict', '<script>alert(1)</script><b>ok</b>') }}").unwrap(),
            "<b>ok</b>"
        );
        assert_eq!(render("{{ trustHtml('<i>x</i>') }}").unwrap(), "<i>x</i>");
    }

    #[test]
    fn test_try_in_templates() {
        let out = render(
            "{% set r = try(humanize, 'bogus', 'x') %}{{ r.ok }}|{{ r.error }}|{{ r.value is none }}",
        )
        .unwrap();
        assert_eq!(out, "false|humanize: unknown format `bogus`|true");

        let out = render("{% set r = try(idx, 0, items) %}{{ r.ok }} {{ r.value }}").unwrap();
        assert_eq!(out, "true a");

        let err = render("{{ try(ksuid) }}").unwrap_err();
        assert!(err.to_string().contains("not an error"));
    }

    #[test]
    fn test_function_errors_surface_as_render_errors() {
        let err = render("{{ sanitizeHtml('nope', 'x') }}").unwrap_err();
        assert!(err.to_string().contains("'nope'"));

        let err = render("{{ httpError(404) }}").unwrap_err();
        let source = std::error::Error::source(&err)
            .and_then(|s| s.downcast_ref::<FuncError>())
            .cloned();
        assert!(matches!(source, Some(FuncError::Http(StatusCode::NOT_FOUND))));
    }

    #[test]
    fn test_http_error_validates_code() {
        let err = render("{{ httpError(200) }}").unwrap_err();
        assert!(err.to_string().contains("not an error status"));
    }

    #[test]
    fn test_front_matter_in_templates() {
        let out = env()
            .render_str(
                "{% set doc = splitFrontMatter(src) %}{{ doc.meta.title }}:{{ doc.body }}",
                context! { src => "---\ntitle: Hi\n---\nbody" },
            )
            .unwrap();
        assert_eq!(out, "Hi:body");
    }
}
