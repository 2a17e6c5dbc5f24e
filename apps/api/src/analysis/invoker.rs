use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::model_resolver::ModelResolver;
use super::models::{AnalysisInput, AnalysisResult};
use super::prompts::{ANALYSIS_PROMPT_TEMPLATE, MAX_CV_CHARS, RECRUITER_SYSTEM, RESPONSE_SCHEMA};
use super::{parser, AnalysisError, CandidateAnalyzer};
use crate::credentials::{Credential, KeyPool};
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{ChatMessage, ChatRequest, GatewayResponse, LlmGateway};

const MAX_TOKENS: u32 = 2000;
const TEMPERATURE: f32 = 0.3;
const TOP_P: f32 = 0.9;

/// Remaining-requests hint at or below which a credential is reported as nearly spent.
pub const LOW_RATE_LIMIT_REMAINING: u32 = 5;

/// Runs one analysis on one credential, walking its model list until a model answers.
pub struct AnalysisInvoker {
    pool: Arc<KeyPool>,
    resolver: ModelResolver,
    gateway: Arc<dyn LlmGateway>,
}

impl AnalysisInvoker {
    pub fn new(pool: Arc<KeyPool>, resolver: ModelResolver, gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            pool,
            resolver,
            gateway,
        }
    }

    fn build_request(&self, model: &str, input: &AnalysisInput) -> ChatRequest {
        let persona = input
            .custom_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(RECRUITER_SYSTEM);

        let prompt = ANALYSIS_PROMPT_TEMPLATE
            .replace("{job_description}", input.job_description.trim())
            .replace("{response_schema}", RESPONSE_SCHEMA)
            .replace("{cv_text}", truncate_chars(input.cv_text.trim(), MAX_CV_CHARS));

        ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage::system(format!("{persona}\n\n{JSON_ONLY_SYSTEM}")),
                ChatMessage::user(prompt),
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            top_p: TOP_P,
        }
    }

    /// Company work takes the least-used key of its scope; unscoped work
    /// rotates round-robin over the whole pool.
    async fn pick_credential(
        &self,
        scope: Option<Uuid>,
    ) -> Result<Option<Credential>, AnalysisError> {
        match scope {
            Some(_) => Ok(self.pool.list_usable(scope).await?.into_iter().next()),
            None => {
                self.pool.refresh().await?;
                Ok(self.pool.next_available())
            }
        }
    }

    fn record_success(&self, credential: &Credential, response: &GatewayResponse) {
        self.pool.mark_used(credential.id);

        if let Some(remaining) = response.rate_limit_remaining {
            self.pool.note_rate_limit(credential.id, remaining);
            if remaining <= LOW_RATE_LIMIT_REMAINING {
                warn!(
                    "Credential {} is close to its provider rate limit ({} requests remaining)",
                    credential.id, remaining
                );
            }
        }

        let store = self.pool.store();
        let credential_id = credential.id;
        tokio::spawn(async move {
            if let Err(e) = store.increment_usage(credential_id).await {
                warn!("Failed to record usage for credential {credential_id}: {e:#}");
            }
        });
    }
}

#[async_trait]
impl CandidateAnalyzer for AnalysisInvoker {
    async fn analyze(
        &self,
        input: &AnalysisInput,
        scope: Option<Uuid>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let credential = self
            .pick_credential(scope)
            .await?
            .ok_or(AnalysisError::NoCredentials { scope })?;

        let models = self.resolver.resolve(credential.id).await;
        let last = models.len().saturating_sub(1);

        for (index, model) in models.iter().enumerate() {
            let request = self.build_request(model, input);
            match self
                .gateway
                .complete(&credential.key, &credential.provider, &request)
                .await
            {
                Ok(response) => {
                    self.record_success(&credential, &response);
                    let mut result = parser::parse_analysis(&response.text, &input.cv_text);
                    result.model = Some(model.clone());
                    info!(
                        "Analysis completed with model {} on credential {} (score {})",
                        model, credential.id, result.score
                    );
                    return Ok(result);
                }
                Err(err) => {
                    if err.is_credential_failure() {
                        if let Some(status) = err.status() {
                            self.pool.mark_failed(credential.id, status);
                        }
                    }
                    if index == last {
                        error!(
                            "All {} models failed for credential {}; last error from {}: {}",
                            models.len(),
                            credential.id,
                            model,
                            err
                        );
                        return Err(AnalysisError::Transport {
                            model: model.clone(),
                            source: err,
                        });
                    }
                    warn!(
                        "Model {} failed ({}), falling back to {}",
                        model,
                        err,
                        models[index + 1]
                    );
                }
            }
        }

        Err(AnalysisError::NoModels(credential.id))
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::analysis::model_resolver::testing::FixedModelConfig;
    use crate::analysis::parser::UNPARSED_SCORE;
    use crate::credentials::testing::{record, StaticCredentialStore};
    use crate::credentials::pool::DEFAULT_COOLDOWN;
    use crate::llm_client::LlmError;

    const ANALYSIS_JSON: &str = r#"{"score": 78, "summary": "Solid backend profile",
        "hrDecision": {"recommendation": "interview", "confidence": 80, "reasoning": "Good match", "priority": "high"}}"#;

    enum Reply {
        Text(&'static str),
        Status(u16),
    }

    /// Answers per model name; records every call.
    #[derive(Default)]
    struct ScriptedGateway {
        replies: HashMap<&'static str, Reply>,
        rate_limit_remaining: Option<u32>,
        calls: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedGateway {
        fn with(replies: Vec<(&'static str, Reply)>) -> Self {
            Self {
                replies: replies.into_iter().collect(),
                ..Default::default()
            }
        }

        fn models_called(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.model.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LlmGateway for ScriptedGateway {
        async fn complete(
            &self,
            _api_key: &str,
            _provider: &str,
            request: &ChatRequest,
        ) -> Result<GatewayResponse, LlmError> {
            self.calls.lock().unwrap().push(request.clone());
            match self.replies.get(request.model.as_str()) {
                Some(Reply::Text(text)) => Ok(GatewayResponse {
                    text: text.to_string(),
                    rate_limit_remaining: self.rate_limit_remaining,
                    usage: None,
                }),
                Some(Reply::Status(status)) => Err(LlmError::Api {
                    status: *status,
                    message: "scripted failure".to_string(),
                }),
                None => Err(LlmError::EmptyContent),
            }
        }
    }

    struct Harness {
        invoker: AnalysisInvoker,
        pool: Arc<KeyPool>,
        store: Arc<StaticCredentialStore>,
        gateway: Arc<ScriptedGateway>,
    }

    fn harness(store: StaticCredentialStore, gateway: ScriptedGateway) -> Harness {
        let store = Arc::new(store);
        let gateway = Arc::new(gateway);
        let pool = Arc::new(KeyPool::new(store.clone(), DEFAULT_COOLDOWN));
        let resolver = ModelResolver::new(Arc::new(FixedModelConfig::models(
            "model-a",
            &["model-b", "model-c"],
        )));
        Harness {
            invoker: AnalysisInvoker::new(pool.clone(), resolver, gateway.clone()),
            pool,
            store,
            gateway,
        }
    }

    fn input() -> AnalysisInput {
        AnalysisInput {
            cv_text: "Jane Doe. Eight years building payment systems in Rust and Go.".to_string(),
            job_description: "Senior backend engineer, Rust".to_string(),
            custom_prompt: None,
        }
    }

    #[tokio::test]
    async fn test_first_model_success() {
        let h = harness(
            StaticCredentialStore::new(vec![record(None, 10)]),
            ScriptedGateway::with(vec![("model-a", Reply::Text(ANALYSIS_JSON))]),
        );

        let result = h.invoker.analyze(&input(), None).await.unwrap();

        assert_eq!(result.score, 78);
        assert_eq!(result.model.as_deref(), Some("model-a"));
        assert_eq!(result.hr_decision.priority, "high");
        assert_eq!(h.gateway.models_called(), vec!["model-a"]);
        let usable = h.pool.list_usable(None).await.unwrap();
        assert_eq!(usable[0].request_count, 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_model_in_order() {
        let h = harness(
            StaticCredentialStore::new(vec![record(None, 10)]),
            ScriptedGateway::with(vec![
                ("model-a", Reply::Status(500)),
                ("model-b", Reply::Text(ANALYSIS_JSON)),
            ]),
        );

        let result = h.invoker.analyze(&input(), None).await.unwrap();

        assert_eq!(result.model.as_deref(), Some("model-b"));
        assert_eq!(h.gateway.models_called(), vec!["model-a", "model-b"]);
    }

    #[tokio::test]
    async fn test_all_models_failing_reports_last_model() {
        let h = harness(
            StaticCredentialStore::new(vec![record(None, 10)]),
            ScriptedGateway::with(vec![
                ("model-a", Reply::Status(500)),
                ("model-b", Reply::Status(502)),
                ("model-c", Reply::Status(503)),
            ]),
        );

        let err = h.invoker.analyze(&input(), None).await.unwrap_err();

        assert_eq!(
            h.gateway.models_called(),
            vec!["model-a", "model-b", "model-c"]
        );
        match err {
            AnalysisError::Transport { model, source } => {
                assert_eq!(model, "model-c");
                assert_eq!(source.status(), Some(503));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_deactivates_credential_and_falls_back() {
        let h = harness(
            StaticCredentialStore::new(vec![record(None, 10)]),
            ScriptedGateway::with(vec![
                ("model-a", Reply::Status(429)),
                ("model-b", Reply::Text(ANALYSIS_JSON)),
            ]),
        );

        let result = h.invoker.analyze(&input(), None).await.unwrap();
        assert_eq!(result.model.as_deref(), Some("model-b"));

        // Deactivated at the 429; the later success does not reactivate it.
        assert!(h.pool.list_usable(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_keeps_credential_active() {
        let h = harness(
            StaticCredentialStore::new(vec![record(None, 10)]),
            ScriptedGateway::with(vec![
                ("model-a", Reply::Status(500)),
                ("model-b", Reply::Status(503)),
                ("model-c", Reply::Status(502)),
            ]),
        );

        assert!(h.invoker.analyze(&input(), None).await.is_err());
        assert_eq!(h.pool.count_usable(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unscoped_work_rotates_across_keys() {
        let (a, b) = (record(None, 10), record(None, 10));
        let h = harness(
            StaticCredentialStore::new(vec![a.clone(), b.clone()]),
            ScriptedGateway::with(vec![("model-a", Reply::Text(ANALYSIS_JSON))]),
        );

        for _ in 0..4 {
            h.invoker.analyze(&input(), None).await.unwrap();
        }

        let usable = h.pool.list_usable(None).await.unwrap();
        assert!(usable.iter().all(|c| c.request_count == 2));
    }

    #[tokio::test]
    async fn test_no_usable_credentials_is_exhaustion() {
        let company = Uuid::new_v4();
        let h = harness(
            StaticCredentialStore::new(vec![]),
            ScriptedGateway::with(vec![("model-a", Reply::Text(ANALYSIS_JSON))]),
        );

        let err = h.invoker.analyze(&input(), Some(company)).await.unwrap_err();

        assert!(matches!(err, AnalysisError::NoCredentials { scope } if scope == Some(company)));
        assert!(h.gateway.models_called().is_empty());
    }

    #[tokio::test]
    async fn test_credential_store_failure_is_lookup_error() {
        let store = StaticCredentialStore {
            fail_lookups: true,
            ..StaticCredentialStore::new(vec![record(None, 10)])
        };
        let h = harness(store, ScriptedGateway::default());

        let err = h.invoker.analyze(&input(), None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::CredentialLookup(_)));
    }

    #[tokio::test]
    async fn test_unparseable_reply_returns_fallback() {
        let h = harness(
            StaticCredentialStore::new(vec![record(None, 10)]),
            ScriptedGateway::with(vec![("model-a", Reply::Text("Sorry, I can't help."))]),
        );

        let result = h.invoker.analyze(&input(), None).await.unwrap();

        assert!(result.needs_review);
        assert_eq!(result.score, UNPARSED_SCORE);
        assert_eq!(result.model.as_deref(), Some("model-a"));
        assert_eq!(result.raw_response.as_deref(), Some("Sorry, I can't help."));
    }

    #[tokio::test]
    async fn test_usage_is_reported_to_store() {
        let credential = record(None, 10);
        let id = credential.id;
        let h = harness(
            StaticCredentialStore::new(vec![credential]),
            ScriptedGateway::with(vec![("model-a", Reply::Text(ANALYSIS_JSON))]),
        );

        h.invoker.analyze(&input(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(h.store.increments(), vec![id]);
    }

    #[tokio::test]
    async fn test_usage_report_failure_is_swallowed() {
        let store = StaticCredentialStore {
            fail_increments: true,
            ..StaticCredentialStore::new(vec![record(None, 10)])
        };
        let h = harness(
            store,
            ScriptedGateway::with(vec![("model-a", Reply::Text(ANALYSIS_JSON))]),
        );

        assert!(h.invoker.analyze(&input(), None).await.is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.store.increments().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_hint_is_recorded() {
        let mut gateway = ScriptedGateway::with(vec![("model-a", Reply::Text(ANALYSIS_JSON))]);
        gateway.rate_limit_remaining = Some(3);
        let h = harness(StaticCredentialStore::new(vec![record(None, 10)]), gateway);

        h.invoker.analyze(&input(), None).await.unwrap();

        let usable = h.pool.list_usable(None).await.unwrap();
        assert_eq!(usable[0].rate_limit_remaining, Some(3));
    }

    #[tokio::test]
    async fn test_custom_prompt_replaces_persona() {
        let h = harness(
            StaticCredentialStore::new(vec![record(None, 10)]),
            ScriptedGateway::with(vec![("model-a", Reply::Text(ANALYSIS_JSON))]),
        );
        let mut custom = input();
        custom.custom_prompt = Some("You hire for a seed-stage fintech.".to_string());

        h.invoker.analyze(&custom, None).await.unwrap();

        let calls = h.gateway.calls.lock().unwrap();
        let system = &calls[0].messages[0].content;
        assert!(system.starts_with("You hire for a seed-stage fintech."));
        assert!(!system.contains(RECRUITER_SYSTEM));
        assert!(system.contains(JSON_ONLY_SYSTEM));
        let user = &calls[0].messages[1].content;
        assert!(user.contains("Senior backend engineer, Rust"));
        assert!(user.contains("\"skillsMatch\""));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
