//! Template tree compiler.
//!
//! # Responsibilities
//! - Discover template files under the configured root
//! - Extract named definitions and compile every template
//! - Derive implicit and explicit routes
//! - Fail the whole build on the first error
//!
//! # Design Decisions
//! - Discovery is sorted so identical trees build identical sets
//! - Compiled into a fresh `Environment` per generation; nothing is shared
//!   with the previous generation except the function library

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minijinja::syntax::SyntaxConfig;
use minijinja::Environment;
use walkdir::{DirEntry, WalkDir};

use crate::config::TemplateConfig;
use crate::funcs::FunctionLibrary;
use crate::routing::{parse_route_name, PathPattern, Route, RouteError, RouteSource, RouteTable};
use crate::templates::sections::{DefineScanner, SectionError};
use crate::templates::set::{TemplateInfo, TemplateSet};

/// Reserved leading marker for files that are never routed.
pub const PRIVATE_MARKER: char = '_';

/// Template build failures. Any one of them aborts the build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk template root: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("{file}: {source}")]
    Definition {
        file: String,
        #[source]
        source: SectionError,
    },

    #[error("{file}:{line}: template `{template}`: {message}")]
    Parse {
        file: String,
        template: String,
        line: usize,
        message: String,
    },

    #[error("template `{name}` is defined in both {first} and {second}")]
    DuplicateTemplate {
        name: String,
        first: String,
        second: String,
    },

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("route {method} {pattern} targets missing template `{template}`")]
    MissingTemplate {
        method: String,
        pattern: String,
        template: String,
    },

    #[error("invalid template syntax configuration: {0}")]
    Syntax(String),

    #[error("template build panicked")]
    Panicked,
}

impl BuildError {
    /// The offending file, when the error is tied to one.
    pub fn file(&self) -> Option<&str> {
        match self {
            BuildError::Definition { file, .. } | BuildError::Parse { file, .. } => Some(file),
            BuildError::DuplicateTemplate { second, .. } => Some(second),
            BuildError::Route(RouteError::Duplicate { second, .. }) => Some(second),
            BuildError::Route(RouteError::InvalidPattern { file, .. }) => Some(file),
            _ => None,
        }
    }
}

/// Compiles a template root into `TemplateSet` generations.
#[derive(Debug, Clone)]
pub struct Compiler {
    config: TemplateConfig,
    library: Arc<FunctionLibrary>,
    scanner: DefineScanner,
}

impl Compiler {
    pub fn new(config: TemplateConfig, library: Arc<FunctionLibrary>) -> Result<Self, BuildError> {
        let scanner = DefineScanner::new(&config.delimiters).map_err(|e| BuildError::Syntax(e.to_string()))?;
        Ok(Self { config, library, scanner })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn environment(&self) -> Result<Environment<'static>, BuildError> {
        let d = &self.config.delimiters;
        let syntax = SyntaxConfig::builder()
            .block_delimiters(d.block_start.clone(), d.block_end.clone())
            .variable_delimiters(d.variable_start.clone(), d.variable_end.clone())
            .comment_delimiters(d.comment_start.clone(), d.comment_end.clone())
            .build()
            .map_err(|e| BuildError::Syntax(e.to_string()))?;

        let mut env = Environment::new();
        env.set_syntax(syntax);
        self.library.install(&mut env);
        Ok(env)
    }

    fn is_template(&self, entry: &DirEntry) -> bool {
        entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(self.config.extension.as_str())
    }

    /// Template files under the root, sorted.
    fn discover(&self) -> Result<Vec<PathBuf>, BuildError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.config.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
        for entry in walker {
            let entry = entry?;
            if self.is_template(&entry) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Build generation `generation` from the current tree.
    pub fn compile(&self, generation: u64) -> Result<TemplateSet, BuildError> {
        let mut env = self.environment()?;
        let mut origins: HashMap<String, String> = HashMap::new();
        let mut templates = Vec::new();
        let mut routes = Vec::new();

        for path in self.discover()? {
            let source = std::fs::read_to_string(&path).map_err(|source| BuildError::Io {
                path: path.clone(),
                source,
            })?;
            let file = relative_name(&self.config.root, &path);

            let split = self.scanner.split(&source).map_err(|source| BuildError::Definition {
                file: file.clone(),
                source,
            })?;

            let mut register = |name: String, body: String, first_line: usize| -> Result<(), BuildError> {
                if let Some(first) = origins.get(&name) {
                    return Err(BuildError::DuplicateTemplate {
                        name,
                        first: first.clone(),
                        second: file.clone(),
                    });
                }
                env.add_template_owned(name.clone(), body).map_err(|e| BuildError::Parse {
                    file: file.clone(),
                    template: name.clone(),
                    line: e.line().map(|l| l + first_line - 1).unwrap_or(first_line),
                    message: e.detail().map(str::to_string).unwrap_or_else(|| e.kind().to_string()),
                })?;
                origins.insert(name.clone(), file.clone());
                templates.push(TemplateInfo { name, file: file.clone() });
                Ok(())
            };

            register(file.clone(), split.body, 1)?;
            for def in &split.definitions {
                register(def.name.clone(), def.body.clone(), def.line)?;
            }

            if let Some(base) = self.implicit_path(&file) {
                routes.extend(implicit_routes(&file, &base));
            }
            for def in split.definitions {
                if let Some(parsed) = parse_route_name(&def.name) {
                    let (method, pattern) = parsed.map_err(|source| RouteError::InvalidPattern {
                        template: def.name.clone(),
                        file: file.clone(),
                        source,
                    })?;
                    routes.push(Route {
                        method,
                        pattern,
                        template: def.name,
                        file: file.clone(),
                        source: RouteSource::Explicit,
                    });
                }
            }
        }

        let routes = RouteTable::build(routes)?;
        tracing::debug!(
            generation,
            templates = templates.len(),
            routes = routes.len(),
            "Template set compiled"
        );
        Ok(TemplateSet::new(generation, env, routes, templates))
    }

    /// Request path for a routable file, `None` for private files.
    fn implicit_path(&self, file: &str) -> Option<String> {
        let (dir, base) = file.rsplit_once('/').unwrap_or(("", file));
        if base.starts_with(PRIVATE_MARKER) {
            return None;
        }
        let stem = base
            .strip_suffix(self.config.extension.as_str())
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or(base);
        Some(format!("{}/{}", dir, stem))
    }
}

fn implicit_routes(file: &str, path: &str) -> Vec<Route> {
    let route = |p: &str| Route {
        method: axum::http::Method::GET,
        pattern: PathPattern::literal(p),
        template: file.to_string(),
        file: file.to_string(),
        source: RouteSource::Implicit,
    };

    let mut out = vec![route(path)];
    if let Some(dir) = path.strip_suffix("index") {
        if dir.ends_with('/') {
            out.push(route(dir));
        }
    }
    out
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|s| s.starts_with('.'))
}

/// `/`-prefixed, forward-slash path of `path` relative to `root`.
fn relative_name(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use minijinja::context;
    use pretty_assertions::assert_eq;
    use crate::config::DelimiterConfig;
    use crate::routing::RouteMatch;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn compiler(root: &Path) -> Compiler {
        let config = TemplateConfig {
            root: root.to_path_buf(),
            ..Default::default()
        };
        Compiler::new(config, Arc::new(FunctionLibrary::standard().unwrap())).unwrap()
    }

    fn summary(set: &TemplateSet) -> Vec<String> {
        let mut routes: Vec<String> = set
            .routes()
            .routes()
            .iter()
            .map(|r| format!("{} {} -> {}", r.method, r.pattern, r.template))
            .collect();
        routes.sort();
        routes
    }

    #[test]
    fn test_implicit_and_explicit_routes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "home");
        write(dir.path(), "about.html", "about");
        write(dir.path(), "blog/index.html", "blog");
        write(dir.path(), "_layout.html", "layout");
        write(dir.path(), "notes.txt", "ignored");
        write(dir.path(), ".hidden/x.html", "ignored");
        write(
            dir.path(),
            "_routes.html",
            "{% define \"GET /contact/:id\" %}contact {{ params.id }}{% enddefine %}\n\
             {% define \"POST /contact/:id\" %}saved{% enddefine %}",
        );

        let set = compiler(dir.path()).compile(1).unwrap();
        assert_eq!(
            summary(&set),
            vec![
                "GET / -> /index.html",
                "GET /about -> /about.html",
                "GET /blog/ -> /blog/index.html",
                "GET /blog/index -> /blog/index.html",
                "GET /contact/:id -> GET /contact/:id",
                "GET /index -> /index.html",
                "POST /contact/:id -> POST /contact/:id",
            ]
        );
        assert!(set.contains("/_layout.html"));
        assert!(!set.contains("/notes.txt"));
        set.validate().unwrap();

        match set.routes().match_route(&Method::GET, "/contact/42") {
            RouteMatch::Found { route, params } => {
                let out = set.render(&route.template, context! { params => params }).unwrap();
                assert_eq!(out, "contact 42");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_templates_invoke_each_other_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "_partials.html", "{% define \"greeting\" %}hi {{ who }}{% enddefine %}");
        write(dir.path(), "page.html", "{% set who = 'ann' %}{% include \"greeting\" %}!");

        let set = compiler(dir.path()).compile(1).unwrap();
        assert_eq!(set.render("/page.html", context! {}).unwrap(), "hi ann!");
    }

    #[test]
    fn test_parse_error_names_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.html", "ok");
        write(
            dir.path(),
            "bad.html",
            "line one\n{% define \"part\" %}\nfine\n{{ broken( }}\n{% enddefine %}",
        );

        let err = compiler(dir.path()).compile(1).unwrap_err();
        match &err {
            BuildError::Parse { file, template, line, .. } => {
                assert_eq!(file, "/bad.html");
                assert_eq!(template, "part");
                assert_eq!(*line, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.file(), Some("/bad.html"));
    }

    #[test]
    fn test_duplicates_fail() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.html", "{% define \"x\" %}1{% enddefine %}");
        write(dir.path(), "b.html", "{% define \"x\" %}2{% enddefine %}");
        let err = compiler(dir.path()).compile(1).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateTemplate { ref first, ref second, .. }
            if first == "/a.html" && second == "/b.html"));

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.html", "{% define \"GET /x/:id\" %}1{% enddefine %}");
        write(dir.path(), "b.html", "{% define \"GET /x/:name\" %}2{% enddefine %}");
        let err = compiler(dir.path()).compile(1).unwrap_err();
        assert!(matches!(err, BuildError::Route(RouteError::Duplicate { .. })));

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "about.html", "implicit");
        write(dir.path(), "_r.html", "{% define \"GET /about\" %}explicit{% enddefine %}");
        let err = compiler(dir.path()).compile(1).unwrap_err();
        assert!(matches!(err, BuildError::Route(RouteError::Duplicate { .. })));
    }

    #[test]
    fn test_invalid_explicit_pattern() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "_r.html", "{% define \"GET /a/*rest/b\" %}x{% enddefine %}");
        let err = compiler(dir.path()).compile(1).unwrap_err();
        assert!(matches!(err, BuildError::Route(RouteError::InvalidPattern { .. })));
    }

    #[test]
    fn test_custom_delimiters() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "page.html", "[[ define \"part\" ]]<<x>>[[ enddefine ]][[ include \"part\" ]] {{ raw }}");

        let config = TemplateConfig {
            root: dir.path().to_path_buf(),
            extension: "html".to_string(),
            delimiters: DelimiterConfig {
                block_start: "[[".to_string(),
                block_end: "]]".to_string(),
                variable_start: "<<".to_string(),
                variable_end: ">>".to_string(),
                comment_start: "[#".to_string(),
                comment_end: "#]".to_string(),
            },
        };
        let set = Compiler::new(config, Arc::new(FunctionLibrary::standard().unwrap()))
            .unwrap()
            .compile(3)
            .unwrap();
        assert_eq!(set.generation(), 3);
        assert_eq!(set.render("/page.html", context! { x => "y" }).unwrap(), "y {{ raw }}");
    }
}
