//! Named definition extraction.
//!
//! A template file may contain any number of
//! `{% define "NAME" %} ... {% enddefine %}` blocks (using the configured
//! block delimiters). Each block becomes its own template named `NAME`, and
//! its text is removed from the file body. Removed text is replaced by the
//! same number of newlines, so line numbers reported for the file body stay
//! accurate. Markers inside `{% raw %} ... {% endraw %}` are plain text.

use std::ops::Range;

use regex::{Captures, Match, Regex};
use crate::config::DelimiterConfig;

/// A definition found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    pub body: String,
    /// 1-based line of the first body character within the file.
    pub line: usize,
}

/// Result of splitting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitFile {
    /// File body with definitions blanked out.
    pub body: String,
    pub definitions: Vec<Definition>,
}

/// A malformed definition marker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct SectionError {
    pub line: usize,
    pub message: String,
}

/// Finds definition markers for one delimiter configuration.
#[derive(Debug, Clone)]
pub struct DefineScanner {
    open: Regex,
    close: Regex,
    raw_open: Regex,
    raw_close: Regex,
}

impl DefineScanner {
    pub fn new(delimiters: &DelimiterConfig) -> Result<Self, regex::Error> {
        let start = regex::escape(&delimiters.block_start);
        let end = regex::escape(&delimiters.block_end);
        Ok(Self {
            open: Regex::new(&format!(r#"{start}-?\s*define\s+"([^"]*)"\s*-?{end}"#))?,
            close: Regex::new(&format!(r"{start}-?\s*enddefine\s*-?{end}"))?,
            raw_open: Regex::new(&format!(r"{start}-?\s*raw\s*-?{end}"))?,
            raw_close: Regex::new(&format!(r"{start}-?\s*endraw\s*-?{end}"))?,
        })
    }

    /// Byte ranges of raw blocks. An unclosed raw block runs to the end.
    fn raw_spans(&self, source: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut pos = 0;
        while let Some(open) = self.raw_open.find_at(source, pos) {
            let end = self
                .raw_close
                .find_at(source, open.end())
                .map_or(source.len(), |m| m.end());
            spans.push(open.start()..end);
            pos = end;
        }
        spans
    }

    fn open_at<'s>(&self, source: &'s str, mut pos: usize, raw: &[Range<usize>]) -> Option<Captures<'s>> {
        loop {
            let captures = self.open.captures_at(source, pos)?;
            let start = captures.get(0)?.start();
            match raw.iter().find(|span| span.contains(&start)) {
                Some(span) => pos = span.end,
                None => return Some(captures),
            }
        }
    }

    fn close_at<'s>(&self, source: &'s str, mut pos: usize, raw: &[Range<usize>]) -> Option<Match<'s>> {
        loop {
            let found = self.close.find_at(source, pos)?;
            match raw.iter().find(|span| span.contains(&found.start())) {
                Some(span) => pos = span.end,
                None => return Some(found),
            }
        }
    }

    /// Split `source` into the remaining body and its definitions.
    pub fn split(&self, source: &str) -> Result<SplitFile, SectionError> {
        let mut body = String::with_capacity(source.len());
        let mut definitions = Vec::new();
        let mut pos = 0;
        let raw = self.raw_spans(source);

        loop {
            let next_open = self.open_at(source, pos, &raw);
            let next_close = self.close_at(source, pos, &raw);

            let open = match next_open {
                Some(open) => open,
                None => {
                    if let Some(close) = next_close {
                        return Err(SectionError {
                            line: line_of(source, close.start()),
                            message: "`enddefine` without a matching `define`".to_string(),
                        });
                    }
                    break;
                }
            };

            let whole = open.get(0).map(|m| m.range()).unwrap_or(pos..pos);
            if let Some(close) = next_close {
                if close.start() < whole.start {
                    return Err(SectionError {
                        line: line_of(source, close.start()),
                        message: "`enddefine` without a matching `define`".to_string(),
                    });
                }
            }

            let name = open.get(1).map(|m| m.as_str()).unwrap_or_default();
            if name.is_empty() {
                return Err(SectionError {
                    line: line_of(source, whole.start),
                    message: "`define` needs a non-empty name".to_string(),
                });
            }

            let close = self.close_at(source, whole.end, &raw).ok_or_else(|| SectionError {
                line: line_of(source, whole.start),
                message: format!("definition `{}` is never closed", name),
            })?;

            if let Some(nested) = self.open_at(source, whole.end, &raw).and_then(|c| c.get(0)) {
                if nested.start() < close.start() {
                    return Err(SectionError {
                        line: line_of(source, nested.start()),
                        message: format!("definitions cannot nest (inside `{}`)", name),
                    });
                }
            }

            body.push_str(&source[pos..whole.start]);
            let removed = &source[whole.start..close.end()];
            body.extend(std::iter::repeat('\n').take(removed.matches('\n').count()));

            definitions.push(Definition {
                name: name.to_string(),
                body: source[whole.end..close.start()].to_string(),
                line: line_of(source, whole.end),
            });

            pos = close.end();
        }

        body.push_str(&source[pos..]);
        Ok(SplitFile { body, definitions })
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}
