//! Front matter extraction.
//!
//! Supported fences, opened on the first line of the input:
//!
//! | Format | Open  | Close        |
//! |--------|-------|--------------|
//! | YAML   | `---` | `---`, `...` |
//! | TOML   | `+++` | `+++`        |
//! | JSON   | `{`   | `}`          |
//!
//! The body is everything after the closing fence line, byte-for-byte.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::funcs::FuncError;

/// A document split into metadata and body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrontMatter {
    pub meta: Map<String, JsonValue>,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Yaml,
    Toml,
    Json,
}

impl Format {
    fn detect(first_line: &str) -> Option<Self> {
        match first_line {
            "---" => Some(Format::Yaml),
            "+++" => Some(Format::Toml),
            "{" => Some(Format::Json),
            _ => None,
        }
    }

    fn closing_fences(self) -> &'static [&'static str] {
        match self {
            Format::Yaml => &["---", "..."],
            Format::Toml => &["+++"],
            Format::Json => &["}"],
        }
    }

    fn parse(self, block: &str) -> Result<Map<String, JsonValue>, FuncError> {
        let parsed: JsonValue = match self {
            Format::Yaml => serde_yaml::from_str::<Option<JsonValue>>(block)
                .map_err(|e| FuncError::Failed(format!("front matter: invalid YAML: {}", e)))?
                .unwrap_or(JsonValue::Null),
            Format::Toml => {
                let table: toml::Table = toml::from_str(block)
                    .map_err(|e| FuncError::Failed(format!("front matter: invalid TOML: {}", e)))?;
                serde_json::to_value(table)
                    .map_err(|e| FuncError::Failed(format!("front matter: {}", e)))?
            }
            Format::Json => serde_json::from_str(&format!("{{{}}}", block))
                .map_err(|e| FuncError::Failed(format!("front matter: invalid JSON: {}", e)))?,
        };

        match parsed {
            JsonValue::Object(map) => Ok(map),
            JsonValue::Null => Ok(Map::new()),
            other => Err(FuncError::Failed(format!(
                "front matter must be a key/value mapping, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}

/// Offset just past the line starting at `start` (past its `\n`, or the end).
fn line_end(input: &str, start: usize) -> (usize, usize) {
    match input[start..].find('\n') {
        Some(i) => (start + i, start + i + 1),
        None => (input.len(), input.len()),
    }
}

/// Split `input` into front matter and body.
pub fn split_front_matter(input: &str) -> Result<FrontMatter, FuncError> {
    let (first_end, block_start) = line_end(input, 0);
    let format = match Format::detect(input[..first_end].trim()) {
        Some(format) => format,
        None => {
            return Ok(FrontMatter { meta: Map::new(), body: input.to_string() });
        }
    };

    let mut line_start = block_start;
    while line_start < input.len() {
        let (content_end, next) = line_end(input, line_start);
        let line = input[line_start..content_end].trim_end_matches('\r');
        if format.closing_fences().contains(&line) {
            let meta = format.parse(&input[block_start..line_start])?;
            return Ok(FrontMatter { meta, body: input[next..].to_string() });
        }
        line_start = next;
    }

    Err(FuncError::Failed("unterminated front matter".to_string()))
}
