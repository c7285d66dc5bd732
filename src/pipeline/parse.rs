//! Parsing model output into typed records.
//!
//! Models asked for "ONLY a JSON object" still wrap it in ```json fences or
//! add a sentence before it often enough that a plain `serde_json::from_str`
//! is not usable. [`extract_json`] finds the object; the two schema
//! functions then decide what counts as a valid record:
//!
//! * [`parse_page`] is strict. A page record without `statement`,
//!   `response`, `domain`, `level` or `isContinuation` is rejected, never
//!   filled in. Only `title` and `confidenceScore` may be absent.
//! * [`parse_merged`] is lenient. Any field may be missing; the combiner and
//!   validator complete it deterministically.

use crate::output::ExerciseAnalysis;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").unwrap());

/// Locate and parse the JSON object in a model reply.
///
/// Tried in order: the whole reply, the first fenced block, then the first
/// `{` that starts a complete non-empty JSON object. Text after that object
/// is ignored, and braces in leading prose (LaTeX such as `$x^{2}$` or
/// `\frac{1}{2}`) are skipped.
pub fn extract_json(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty reply".into());
    }

    let mut candidates: Vec<&str> = vec![trimmed];
    if let Some(caps) = RE_FENCED.captures(trimmed) {
        if let Some(m) = caps.get(1) {
            candidates.push(m.as_str().trim());
        }
    }

    let mut last_err = String::from("no JSON object found");
    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value @ Value::Object(_)) => return Ok(value),
            Ok(other) => last_err = format!("expected a JSON object, got {}", type_name(&other)),
            Err(e) => last_err = e.to_string(),
        }
    }

    first_embedded_object(trimmed).ok_or(last_err)
}

/// Scan `{` positions left to right and return the first one that begins a
/// well-formed, non-empty object.
fn first_embedded_object(text: &str) -> Option<Value> {
    text.match_indices('{').find_map(|(pos, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[pos..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) if !map.is_empty() => Some(Value::Object(map)),
            _ => None,
        }
    })
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Deserialize)]
struct PageWire {
    #[serde(default)]
    title: Option<String>,
    statement: String,
    response: String,
    domain: String,
    level: String,
    #[serde(default, rename = "confidenceScore", alias = "confidence_score")]
    confidence_score: Option<f64>,
    #[serde(rename = "isContinuation", alias = "is_continuation")]
    is_continuation: bool,
}

#[derive(Debug, Default, Deserialize)]
struct MergedWire {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    statement: Option<String>,
    #[serde(default, alias = "solution")]
    response: Option<String>,
    #[serde(default, alias = "category")]
    domain: Option<String>,
    #[serde(default)]
    level: Option<String>,
}

/// Parse a structuring reply into a page record.
pub fn parse_page(text: &str) -> Result<ExerciseAnalysis, String> {
    page_from_value(extract_json(text)?)
}

/// Convert an already-extracted JSON object into a page record.
pub fn page_from_value(value: Value) -> Result<ExerciseAnalysis, String> {
    let wire: PageWire = serde_json::from_value(value).map_err(|e| e.to_string())?;

    if let Some(score) = wire.confidence_score {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(format!("confidenceScore {score} is outside [0, 1]"));
        }
    }

    Ok(ExerciseAnalysis {
        title: non_blank(wire.title),
        statement: Some(wire.statement),
        response: Some(wire.response),
        domain: Some(wire.domain),
        level: Some(wire.level),
        confidence_score: wire.confidence_score,
        is_continuation: wire.is_continuation,
    })
}

/// Parse a merge reply. The model's confidence is not read; the combiner
/// computes it.
pub fn parse_merged(text: &str) -> Result<ExerciseAnalysis, String> {
    merged_from_value(extract_json(text)?)
}

/// Convert an already-extracted JSON object into a merged record.
pub fn merged_from_value(value: Value) -> Result<ExerciseAnalysis, String> {
    let wire: MergedWire = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok(ExerciseAnalysis {
        title: non_blank(wire.title),
        statement: non_blank(wire.statement),
        response: non_blank(wire.response),
        domain: non_blank(wire.domain),
        level: non_blank(wire.level),
        confidence_score: None,
        is_continuation: false,
    })
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}
