//! Parsing of free-form role responses into keyed fields.
//!
//! Models answer either with a JSON object (optionally wrapped in
//! `<json_output>` tags or a ```` ```json ```` fence) or with Markdown where
//! each field is a `#`-headed section. [`ParsedFormat::detect`] picks the
//! parser from the first non-whitespace characters; both paths enforce the
//! required keys of a [`Schema`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

static JSON_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<json_output>(.*?)</json_output>").unwrap());
// Only a fence wrapping the whole response; fences inside string values are content.
static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").unwrap());
static JSON_OBJECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#+\s+").unwrap());
static FENCED_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```\w*\n(.*?)\n```$").unwrap());
static CODE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:python|py)?\s+(.*?)```").unwrap());

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),
    #[error("missing required keys in output: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
}

/// Wire format of a role response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedFormat {
    Json,
    Markdown,
}

impl ParsedFormat {
    pub fn detect(text: &str) -> Self {
        let head = text.trim_start();
        if head.starts_with('{') || head.starts_with("```json") {
            Self::Json
        } else {
            Self::Markdown
        }
    }
}

/// How a Markdown section value should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    List,
}

/// Ordered required keys of a role response.
#[derive(Debug, Clone, Copy)]
pub struct Schema(pub &'static [(&'static str, FieldKind)]);

impl Schema {
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.iter().map(|(key, _)| *key)
    }

    fn missing(&self, present: impl Fn(&str) -> bool) -> Vec<String> {
        self.keys()
            .filter(|key| !present(*key))
            .map(str::to_string)
            .collect()
    }
}

/// Parse a role response in whichever format it was written.
pub fn parse_response(text: &str, schema: &Schema) -> Result<Map<String, Value>, ParseError> {
    match ParsedFormat::detect(text) {
        ParsedFormat::Json => {
            let object = parse_json_object(text)?;
            let missing = schema.missing(|key| object.contains_key(key));
            if missing.is_empty() {
                Ok(object)
            } else {
                Err(ParseError::MissingKeys(missing))
            }
        }
        ParsedFormat::Markdown => parse_markdown(text, schema),
    }
}

/// Extract the JSON object embedded in `text`.
pub fn parse_json_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    match serde_json::from_str::<Value>(json_candidate(text))? {
        Value::Object(map) => Ok(map),
        other => Err(ParseError::NotAnObject(json_kind(&other))),
    }
}

fn json_candidate(text: &str) -> &str {
    if let Some(inner) = JSON_TAG_RE.captures(text).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }
    let unfenced = JSON_FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str());
    JSON_OBJECT_RE
        .find(unfenced)
        .map_or(unfenced.trim(), |m| m.as_str())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse `#`-headed Markdown sections into the keys of `schema`.
///
/// Headers inside fenced code are content. Keys not in `schema` are dropped.
pub fn parse_markdown(text: &str, schema: &Schema) -> Result<Map<String, Value>, ParseError> {
    let sections = split_sections(text);
    let missing = schema.missing(|key| sections.iter().any(|(k, _)| k == key));
    if !missing.is_empty() {
        return Err(ParseError::MissingKeys(missing));
    }

    let mut result = Map::new();
    for (key, kind) in schema.0 {
        // Later duplicates of a header win.
        let Some((_, content)) = sections.iter().rev().find(|(k, _)| k == key) else {
            continue;
        };
        result.insert((*key).to_string(), section_value(key, content, *kind));
    }
    Ok(result)
}

fn split_sections(text: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    let mut in_code = false;

    for line in text.trim().lines() {
        let stripped = line.trim();
        if stripped.starts_with("```") {
            in_code = !in_code;
        }
        if !in_code && HEADER_RE.is_match(stripped) {
            if let Some((key, body)) = current.take() {
                sections.push((key, body.join("\n").trim().to_string()));
            }
            let header = HEADER_RE.replace(stripped, "");
            let key = header.trim().to_lowercase().replace(' ', "_");
            current = Some((key, Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((key, body)) = current {
        sections.push((key, body.join("\n").trim().to_string()));
    }
    sections
}

fn section_value(key: &str, content: &str, kind: FieldKind) -> Value {
    if let Some(inner) = FENCED_VALUE_RE.captures(content).and_then(|c| c.get(1)) {
        return Value::String(inner.as_str().trim().to_string());
    }
    let looks_like_list = content.starts_with('[') && content.ends_with(']');
    if kind == FieldKind::List || looks_like_list {
        let lowered = content.to_ascii_lowercase();
        if lowered == "none" || lowered == "null" {
            return Value::Array(Vec::new());
        }
        match serde_json::from_str::<Value>(content) {
            Ok(list @ Value::Array(_)) => return list,
            Ok(_) => debug!(key, "list field holds a non-list value; keeping text"),
            Err(err) => debug!(key, error = %err, "list field is not valid JSON; keeping text"),
        }
    }
    Value::String(content.to_string())
}

/// Code inside the first ```` ```python ```` (or bare) fence, else the trimmed text.
pub fn extract_code(text: &str) -> String {
    CODE_BLOCK_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str())
        .trim()
        .to_string()
}
