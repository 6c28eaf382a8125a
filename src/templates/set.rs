//! One immutable generation of compiled templates.

use std::io::Write;

use chrono::{DateTime, Utc};
use minijinja::value::Value;
use minijinja::Environment;
use serde::Serialize;

use crate::routing::RouteTable;
use crate::templates::BuildError;

/// A compiled template and the file it came from.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub name: String,
    pub file: String,
}

/// Compiled templates plus the routes derived from them.
///
/// Never mutated after construction; requests hold an `Arc` to the
/// generation they started with.
#[derive(Debug)]
pub struct TemplateSet {
    generation: u64,
    built_at: DateTime<Utc>,
    env: Environment<'static>,
    routes: RouteTable,
    templates: Vec<TemplateInfo>,
}

impl TemplateSet {
    pub(crate) fn new(
        generation: u64,
        env: Environment<'static>,
        routes: RouteTable,
        templates: Vec<TemplateInfo>,
    ) -> Self {
        Self {
            generation,
            built_at: Utc::now(),
            env,
            routes,
            templates,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn templates(&self) -> &[TemplateInfo] {
        &self.templates
    }

    pub fn contains(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }

    /// Render `name` to a string.
    pub fn render(&self, name: &str, ctx: Value) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(ctx)
    }

    /// Render `name` directly into `out`.
    pub fn render_to_write<W: Write>(&self, name: &str, ctx: Value, out: W) -> Result<(), minijinja::Error> {
        self.env.get_template(name)?.render_to_write(ctx, out)?;
        Ok(())
    }

    /// Check that every route target resolves to a compiled template.
    pub fn validate(&self) -> Result<(), BuildError> {
        for route in self.routes.routes() {
            if !self.contains(&route.template) {
                return Err(BuildError::MissingTemplate {
                    method: route.method.to_string(),
                    pattern: route.pattern.to_string(),
                    template: route.template.clone(),
                });
            }
        }
        Ok(())
    }
}
