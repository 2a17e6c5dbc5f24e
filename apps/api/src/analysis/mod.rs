/// Analysis: scores one CV against one job description through the LLM gateway.
///
/// `invoker` owns credential selection and model fallback for a single call,
/// `parser` turns whatever the model returned into a typed `AnalysisResult`.
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::credentials::CredentialError;
use crate::llm_client::LlmError;

pub mod invoker;
pub mod model_resolver;
pub mod models;
pub mod parser;
pub mod prompts;

pub use invoker::AnalysisInvoker;
pub use models::{AnalysisInput, AnalysisResult};

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Every credential for the scope is inactive or at its ceiling.
    #[error("No usable API credentials for {}", describe_scope(.scope))]
    NoCredentials { scope: Option<Uuid> },

    #[error(transparent)]
    CredentialLookup(#[from] CredentialError),

    /// The last model in the fallback list failed.
    #[error("Model {model} failed: {source}")]
    Transport {
        model: String,
        #[source]
        source: LlmError,
    },

    #[error("No models configured for credential {0}")]
    NoModels(Uuid),
}

fn describe_scope(scope: &Option<Uuid>) -> String {
    match scope {
        Some(company_id) => format!("company {company_id}"),
        None => "the global pool".to_string(),
    }
}

/// Seam between the queue workers and the invoker. Tests script it.
#[async_trait]
pub trait CandidateAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        input: &AnalysisInput,
        scope: Option<Uuid>,
    ) -> Result<AnalysisResult, AnalysisError>;
}
