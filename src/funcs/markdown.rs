//! Markdown rendering.
//!
//! # Responsibilities
//! - CommonMark plus tables, strikethrough, footnotes and task lists
//! - Automatic heading ids (slug of the heading text, de-duplicated)
//! - Bare `http(s)://` URLs in text become links
//! - Fenced code in a known language is highlighted with CSS classes
//!
//! Raw HTML in the input passes through unchanged; untrusted input must be
//! sanitized by the caller.

use std::collections::HashSet;
use std::sync::OnceLock;

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, LinkType, Options, Parser, Tag, TagEnd};
use syntect::html::{ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use crate::funcs::FuncError;

fn syntax_set() -> &'static SyntaxSet {
    static SYNTAXES: OnceLock<SyntaxSet> = OnceLock::new();
    SYNTAXES.get_or_init(SyntaxSet::load_defaults_newlines)
}

/// Byte ranges of bare `http(s)://` URLs in `text`.
fn find_urls(text: &str) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(offset) = text[from..].find("http") {
        let start = from + offset;
        let rest = &text[start..];
        let scheme = if rest.starts_with("https://") {
            8
        } else if rest.starts_with("http://") {
            7
        } else {
            from = start + 4;
            continue;
        };
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '"'))
            .unwrap_or(rest.len());
        let url = rest[..len].trim_end_matches(['.', ',', ':', ';', '!', '?', ')', '\'']);
        if url.len() > scheme && (start == 0 || !text[..start].ends_with(|c: char| c.is_alphanumeric())) {
            found.push((start, start + url.len()));
        }
        from = start + len.max(scheme);
    }
    found
}

fn find_syntax(lang: &str) -> Option<&'static SyntaxReference> {
    if lang.is_empty() {
        return None;
    }
    let set = syntax_set();
    set.find_syntax_by_token(lang)
}

/// Convert text to a URL-safe slug for heading ids.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Default)]
struct HeadingIds {
    used: HashSet<String>,
}

impl HeadingIds {
    fn claim(&mut self, base: String) -> String {
        let base = if base.is_empty() { "heading".to_string() } else { base };
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}-{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn highlight(lang: &str, syntax: &SyntaxReference, code: &str) -> Result<String, FuncError> {
    let mut generator = ClassedHTMLGenerator::new_with_class_style(syntax, syntax_set(), ClassStyle::Spaced);
    for line in LinesWithEndings::from(code) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .map_err(|e| FuncError::Failed(format!("markdown: highlighting {} failed: {}", lang, e)))?;
    }
    Ok(format!(
        "<pre class=\"code\"><code class=\"language-{}\">{}</code></pre>\n",
        lang,
        generator.finalize()
    ))
}

/// Split plain text around bare URLs, emitting link events for each.
fn push_autolinked<'a>(text: CowStr<'a>, events: &mut Vec<Event<'a>>) {
    let urls = find_urls(&text);
    if urls.is_empty() {
        events.push(Event::Text(text));
        return;
    }

    let mut last = 0;
    for (start, end) in urls {
        let url = &text[start..end];
        if start > last {
            events.push(Event::Text(text[last..start].to_string().into()));
        }
        events.push(Event::Start(Tag::Link {
            link_type: LinkType::Autolink,
            dest_url: url.to_string().into(),
            title: CowStr::from(""),
            id: CowStr::from(""),
        }));
        events.push(Event::Text(url.to_string().into()));
        events.push(Event::End(TagEnd::Link));
        last = end;
    }
    if last < text.len() {
        events.push(Event::Text(text[last..].to_string().into()));
    }
}

/// Render markdown to HTML.
pub fn render_markdown(input: &str) -> Result<String, FuncError> {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_HEADING_ATTRIBUTES;

    let mut events: Vec<Event> = Vec::new();
    let mut ids = HeadingIds::default();
    // (index of the heading start event, collected heading text)
    let mut heading: Option<(usize, String)> = None;
    // (language, syntax, collected code) of a block being highlighted
    let mut highlighted: Option<(String, &'static SyntaxReference, String)> = None;
    let mut in_plain_code = false;
    let mut link_depth = 0usize;

    for event in Parser::new_ext(input, options) {
        if let Some((lang, syntax, code)) = highlighted.as_mut() {
            match event {
                Event::Text(text) => code.push_str(&text),
                Event::End(TagEnd::CodeBlock) => {
                    events.push(Event::Html(highlight(lang, syntax, code)?.into()));
                    highlighted = None;
                }
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(Tag::Heading { .. }) => {
                heading = Some((events.len(), String::new()));
                events.push(event);
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((start, text)) = heading.take() {
                    if let Event::Start(Tag::Heading { id, .. }) = &mut events[start] {
                        let claimed = match id.take() {
                            Some(explicit) => ids.claim(explicit.to_string()),
                            None => ids.claim(slugify(&text)),
                        };
                        *id = Some(claimed.into());
                    }
                }
                events.push(event);
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let lang = match &kind {
                    CodeBlockKind::Fenced(info) => info.split_whitespace().next().unwrap_or_default().to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                match find_syntax(&lang) {
                    Some(syntax) => highlighted = Some((lang, syntax, String::new())),
                    None => {
                        in_plain_code = true;
                        events.push(Event::Start(Tag::CodeBlock(kind)));
                    }
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                in_plain_code = false;
                events.push(event);
            }
            Event::Start(Tag::Link { .. }) | Event::Start(Tag::Image { .. }) => {
                link_depth += 1;
                events.push(event);
            }
            Event::End(TagEnd::Link) | Event::End(TagEnd::Image) => {
                link_depth = link_depth.saturating_sub(1);
                events.push(event);
            }
            Event::Text(text) => {
                if let Some((_, heading_text)) = heading.as_mut() {
                    heading_text.push_str(&text);
                }
                if link_depth == 0 && !in_plain_code {
                    push_autolinked(text, &mut events);
                } else {
                    events.push(Event::Text(text));
                }
            }
            Event::Code(text) => {
                if let Some((_, heading_text)) = heading.as_mut() {
                    heading_text.push_str(&text);
                }
                events.push(Event::Code(text));
            }
            other => events.push(other),
        }
    }

    let mut out = String::with_capacity(input.len() * 3 / 2);
    html::push_html(&mut out, events.into_iter());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_ids_deduplicated() {
        let out = render_markdown("# Hello World\n\n## Hello World\n\n## Custom {#mine}\n").unwrap();
        assert!(out.contains("<h1 id=\"hello-world\">Hello World</h1>"));
        assert!(out.contains("<h2 id=\"hello-world-1\">Hello World</h2>"));
        assert!(out.contains("<h2 id=\"mine\">Custom</h2>"));
    }

    #[test]
    fn test_gfm_extensions() {
        let out = render_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~gone~~ and a note[^1]\n\n[^1]: here\n").unwrap();
        assert!(out.contains("<table>"));
        assert!(out.contains("<del>gone</del>"));
        assert!(out.contains("footnote"));
    }

    #[test]
    fn test_bare_urls_become_links() {
        let out = render_markdown("see https://example.com/docs. and [x](https://other.org)").unwrap();
        assert!(out.contains("<a href=\"https://example.com/docs\">https://example.com/docs</a>."));
        assert_eq!(out.matches("<a ").count(), 2);
    }

    #[test]
    fn test_code_highlighting() {
        let out = render_markdown("```rust\nfn main() {}\n```\n").unwrap();
        assert!(out.contains("<code class=\"language-rust\">"));
        assert!(out.contains("<span class=\""));

        let plain = render_markdown("```nosuchlang\n<x> https://a.b\n```\n").unwrap();
        assert!(plain.contains("&lt;x&gt;"));
        assert!(!plain.contains("<a "));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rust  2024 "), "rust-2024");
    }
}
