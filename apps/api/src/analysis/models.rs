use serde::{Deserialize, Serialize};

/// What the invoker needs to score one candidate against one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub cv_text: String,
    pub job_description: String,
    /// Replaces the built-in recruiter persona when set.
    pub custom_prompt: Option<String>,
}

/// Validated analysis of one CV. Produced either from model output or from the
/// deterministic fallback when that output cannot be parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// 0 – 100
    pub score: u8,
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub hr_decision: HrDecision,
    pub skills_match: SkillsMatch,
    pub risks: Vec<String>,
    pub extracted_data: ExtractedData,
    /// Model that produced the response.
    pub model: Option<String>,
    /// True for fallback results that a human has to look at.
    pub needs_review: bool,
    /// Raw model text, kept only when parsing fell back.
    pub raw_response: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HrDecision {
    pub recommendation: String,
    /// 0 – 100
    pub confidence: u8,
    pub reasoning: String,
    pub priority: String,
}

/// Per-dimension match percentages (0 – 100).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillsMatch {
    pub technical: u8,
    pub experience: u8,
    pub cultural: u8,
    pub overall: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub experience: Option<String>,
    pub skills: Vec<String>,
    pub education: Vec<String>,
    pub seniority: Option<String>,
}
