//! Turns raw model text into an `AnalysisResult`.
//!
//! Models wrap JSON in fences, prepend prose, leave trailing commas and emit
//! empty values (`"email": ,`). Parsing strips fences, extracts the outermost
//! object, repairs the common breakage, validates the shape and, when all of
//! that fails, produces a deterministic fallback marked for manual review.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::models::{AnalysisResult, ExtractedData, HrDecision, SkillsMatch};
use crate::llm_client::strip_json_fences;

/// Substrings the upload path writes into `cv_text` when PDF extraction fails.
pub const EXTRACTION_FAILED_MARKERS: [&str; 2] = ["[CV_EXTRACTION_FAILED]", "Error extracting text"];

/// CV text shorter than this is treated as a failed extraction.
pub const MIN_CV_TEXT_CHARS: usize = 20;

/// Score given to readable CVs whose analysis could not be parsed.
pub const UNPARSED_SCORE: u8 = 25;

static OUTER_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid outer object regex"));

static EMPTY_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r":\s*,").expect("valid empty value regex"));

static REPEATED_COMMAS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*,)+").expect("valid repeated comma regex"));

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("valid trailing comma regex"));

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

/// Parse model output, falling back to a review-flagged result when the text
/// holds no usable analysis.
pub fn parse_analysis(raw: &str, cv_text: &str) -> AnalysisResult {
    match try_parse(raw) {
        Some(result) => result,
        None => {
            warn!(
                "Could not parse analysis response ({} chars), using fallback result",
                raw.len()
            );
            fallback_result(cv_text, raw)
        }
    }
}

fn try_parse(raw: &str) -> Option<AnalysisResult> {
    let block = extract_json_block(strip_json_fences(raw))?;
    let repaired = repair_json(block);
    let value: Value = serde_json::from_str(&repaired).ok()?;
    validate(&value)
}

/// Span from the first `{` to the last `}`.
pub fn extract_json_block(text: &str) -> Option<&str> {
    OUTER_OBJECT.find(text).map(|m| m.as_str())
}

/// Textual repairs for the malformations models commonly produce. Applying it
/// to its own output changes nothing.
pub fn repair_json(text: &str) -> String {
    let filled = EMPTY_VALUE.replace_all(text, ": null,");
    let collapsed = REPEATED_COMMAS.replace_all(&filled, ",");
    TRAILING_COMMA.replace_all(&collapsed, "$1").into_owned()
}

/// First address-shaped substring; otherwise the input with leading
/// punctuation stripped.
pub fn clean_email(raw: &str) -> Option<String> {
    if let Some(found) = EMAIL.find(raw) {
        return Some(found.as_str().to_string());
    }
    let stripped = raw.trim().trim_start_matches(|c: char| !c.is_alphanumeric());
    (!stripped.is_empty()).then(|| stripped.to_string())
}

pub fn is_extraction_failure(cv_text: &str) -> bool {
    let trimmed = cv_text.trim();
    trimmed.chars().count() < MIN_CV_TEXT_CHARS
        || EXTRACTION_FAILED_MARKERS.iter().any(|m| trimmed.contains(m))
}

/// Deterministic result used when model output is unusable.
pub fn fallback_result(cv_text: &str, raw_response: &str) -> AnalysisResult {
    let (score, summary, reasoning) = if is_extraction_failure(cv_text) {
        (
            0,
            "The CV text could not be extracted, so no automatic analysis was possible.",
            "Re-upload the CV as a text-based PDF or review the original document by hand.",
        )
    } else {
        (
            UNPARSED_SCORE,
            "The automatic analysis returned an unreadable response.",
            "The model response could not be parsed. Review the CV manually.",
        )
    };

    AnalysisResult {
        score,
        summary: summary.to_string(),
        recommendations: vec!["Review this candidate manually".to_string()],
        hr_decision: HrDecision {
            recommendation: "manual_review".to_string(),
            confidence: 0,
            reasoning: reasoning.to_string(),
            priority: "low".to_string(),
        },
        needs_review: true,
        raw_response: Some(raw_response.to_string()),
        ..Default::default()
    }
}

fn validate(value: &Value) -> Option<AnalysisResult> {
    let obj = value.as_object()?;
    let score = obj.get("score").and_then(percentage)?;

    Some(AnalysisResult {
        score,
        summary: text(obj.get("summary")).unwrap_or_default(),
        strengths: string_list(obj.get("strengths")),
        weaknesses: string_list(obj.get("weaknesses")),
        recommendations: string_list(obj.get("recommendations")),
        hr_decision: obj.get("hrDecision").map(hr_decision).unwrap_or_default(),
        skills_match: obj.get("skillsMatch").map(skills_match).unwrap_or_default(),
        risks: string_list(obj.get("risks")),
        extracted_data: obj
            .get("extractedData")
            .map(extracted_data)
            .unwrap_or_default(),
        model: None,
        needs_review: false,
        raw_response: None,
    })
}

fn hr_decision(value: &Value) -> HrDecision {
    HrDecision {
        recommendation: text(value.get("recommendation")).unwrap_or_default(),
        confidence: value.get("confidence").and_then(percentage).unwrap_or(0),
        reasoning: text(value.get("reasoning")).unwrap_or_default(),
        priority: text(value.get("priority")).unwrap_or_else(|| "medium".to_string()),
    }
}

fn skills_match(value: &Value) -> SkillsMatch {
    let dim = |name: &str| value.get(name).and_then(percentage).unwrap_or(0);
    SkillsMatch {
        technical: dim("technical"),
        experience: dim("experience"),
        cultural: dim("cultural"),
        overall: dim("overall"),
    }
}

fn extracted_data(value: &Value) -> ExtractedData {
    ExtractedData {
        name: text(value.get("name")),
        email: text(value.get("email")).and_then(|e| clean_email(&e)),
        phone: text(value.get("phone")),
        experience: text(value.get("experience")),
        skills: string_list(value.get("skills")),
        education: string_list(value.get("education")),
        seniority: text(value.get("seniority")),
    }
}

/// Number or numeric string, rounded and clamped to 0 – 100.
fn percentage(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    Some(n.round().clamp(0.0, 100.0) as u8)
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|i| text(Some(i))).collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}
