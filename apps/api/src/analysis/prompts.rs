// Prompts for CV analysis.
// Callers may replace the persona (project-level custom prompt); the response
// schema is always appended so the parser sees the same shape.

/// CV text beyond this many characters is cut before it reaches the model.
pub const MAX_CV_CHARS: usize = 12_000;

pub const RECRUITER_SYSTEM: &str = "You are a senior technical recruiter with fifteen years of \
    experience screening candidates. You assess CVs strictly against the job description you \
    are given, reward demonstrated impact over keyword lists, and flag gaps and risks plainly.";

pub const RESPONSE_SCHEMA: &str = r#"{
  "score": <integer 0-100>,
  "summary": "<two or three sentences>",
  "strengths": ["..."],
  "weaknesses": ["..."],
  "recommendations": ["..."],
  "hrDecision": {
    "recommendation": "<hire | interview | maybe | reject>",
    "confidence": <integer 0-100>,
    "reasoning": "...",
    "priority": "<high | medium | low>"
  },
  "skillsMatch": {
    "technical": <integer 0-100>,
    "experience": <integer 0-100>,
    "cultural": <integer 0-100>,
    "overall": <integer 0-100>
  },
  "risks": ["..."],
  "extractedData": {
    "name": "...",
    "email": "...",
    "phone": "...",
    "experience": "<years or short description>",
    "skills": ["..."],
    "education": ["..."],
    "seniority": "<junior | mid | senior | lead>"
  }
}"#;

pub const ANALYSIS_PROMPT_TEMPLATE: &str = r#"Evaluate the candidate below for this position.

JOB DESCRIPTION:
{job_description}

CANDIDATE CV:
{cv_text}

Return exactly one JSON object with this structure and nothing else:
{response_schema}"#;
