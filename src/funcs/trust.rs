//! Trust markers and contextual escape filters.
//!
//! The engine escapes every interpolation for HTML body text. Other output
//! positions go through an explicit filter (`attr`, `js`, `jsstr`,
//! `srcset`). A value marked trusted for one context passes through that
//! context raw and is escaped like ordinary text everywhere else.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::HtmlEscape;

/// Output position a value was approved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustContext {
    Html,
    Attr,
    Js,
    JsStr,
    SrcSet,
}

/// Replacement for URLs rejected in a srcset.
pub const UNSAFE_URL: &str = "#ZgotmplZ";

/// A string pre-approved for a single non-HTML output context.
#[derive(Debug, Clone)]
pub struct Trusted {
    context: TrustContext,
    text: String,
}

impl Object for Trusted {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Mark `text` as trusted for `context`.
///
/// HTML trust uses the engine's own safe-string marker, so it interoperates
/// with autoescaping and the built-in `safe` filter.
pub fn mark(context: TrustContext, text: String) -> Value {
    match context {
        TrustContext::Html => Value::from_safe_string(text),
        other => Value::from_object(Trusted { context: other, text }),
    }
}

fn trusted_for(value: &Value, context: TrustContext) -> Option<&str> {
    value
        .downcast_object_ref::<Trusted>()
        .filter(|t| t.context == context)
        .map(|t| t.text.as_str())
}

/// Escape text for HTML body and quoted attribute positions, exactly as
/// the engine's auto-escaping does.
pub fn escape_html(input: &str) -> String {
    HtmlEscape(input).to_string()
}

fn escape_js_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '<' | '>' | '&' | '`' | '\u{2028}' | '\u{2029}' => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            _ => out.push(c),
        }
    }
    out
}

fn is_safe_url(url: &str) -> bool {
    match url.split_once(':') {
        Some((scheme, _)) if !scheme.contains('/') => {
            let scheme = scheme.to_ascii_lowercase();
            scheme == "http" || scheme == "https" || scheme == "mailto"
        }
        _ => true,
    }
}

/// `{{ value | attr }}`
pub fn attr_filter(value: Value) -> Value {
    match trusted_for(&value, TrustContext::Attr) {
        Some(raw) => Value::from_safe_string(raw.to_string()),
        None => Value::from_safe_string(escape_html(&value.to_string())),
    }
}

/// `{{ value | js }}`: the value as a script literal.
pub fn js_filter(value: Value) -> Value {
    if let Some(raw) = trusted_for(&value, TrustContext::Js) {
        return Value::from_safe_string(raw.to_string());
    }
    let literal = if value.downcast_object_ref::<Trusted>().is_some() {
        serde_json::to_string(&value.to_string())
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "null".to_string());
    let escaped = literal
        .replace('<', "\\u003C")
        .replace('>', "\\u003E")
        .replace('&', "\\u0026");
    Value::from_safe_string(escaped)
}

/// `{{ value | jsstr }}`: the value inside a quoted script string.
pub fn jsstr_filter(value: Value) -> Value {
    match trusted_for(&value, TrustContext::JsStr) {
        Some(raw) => Value::from_safe_string(raw.to_string()),
        None => Value::from_safe_string(escape_js_string(&value.to_string())),
    }
}

/// `{{ value | srcset }}`: each candidate URL is checked, unsafe ones are
/// replaced by a marker.
pub fn srcset_filter(value: Value) -> Value {
    if let Some(raw) = trusted_for(&value, TrustContext::SrcSet) {
        return Value::from_safe_string(raw.to_string());
    }
    let text = value.to_string();
    let candidates: Vec<String> = text
        .split(',')
        .map(|candidate| {
            let candidate = candidate.trim();
            let url = candidate.split_whitespace().next().unwrap_or_default();
            if is_safe_url(url) {
                escape_html(candidate)
            } else {
                UNSAFE_URL.to_string()
            }
        })
        .collect();
    Value::from_safe_string(candidates.join(", "))
}
