//! Named HTML sanitization policies.
//!
//! # Policies
//! - `strict`: inline formatting only, no attributes, script/style content dropped
//! - `ugc`: the sanitizer's default policy for user-generated content
//! - `externalugc`: `ugc` with relative URLs rejected and links opened in a
//!   new, unprivileged browsing context
//!
//! # Design Decisions
//! - The registry is fixed and built once; lookups never build a policy
//! - An unknown name is an error naming the policy, never a fallback

use std::collections::{HashMap, HashSet};
use ammonia::{Builder, UrlRelative};

use crate::funcs::FuncError;

/// Fixed registry of sanitization policies.
pub struct Policies {
    policies: HashMap<&'static str, Builder<'static>>,
}

impl std::fmt::Debug for Policies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.policies.keys().collect();
        names.sort();
        f.debug_struct("Policies").field("names", &names).finish()
    }
}

impl Policies {
    pub fn standard() -> Self {
        let mut policies = HashMap::new();
        policies.insert("strict", strict());
        policies.insert("ugc", Builder::default());
        policies.insert("externalugc", external_ugc());
        Self { policies }
    }

    /// Clean `html` with the named policy.
    pub fn sanitize(&self, policy: &str, html: &str) -> Result<String, FuncError> {
        let builder = self
            .policies
            .get(policy)
            .ok_or_else(|| FuncError::Failed(format!("failed to find policy name '{}'", policy)))?;
        Ok(builder.clean(html).to_string())
    }
}

fn strict() -> Builder<'static> {
    let mut builder = Builder::empty();
    builder
        .tags(HashSet::from(["b", "i", "em", "strong", "u", "s", "code", "br"]))
        .clean_content_tags(HashSet::from(["script", "style"]));
    builder
}

fn external_ugc() -> Builder<'static> {
    let mut builder = Builder::default();
    builder
        .url_relative(UrlRelative::Deny)
        .link_rel(Some("nofollow noopener noreferrer"))
        .set_tag_attribute_value("a", "target", "_blank");
    builder
}
