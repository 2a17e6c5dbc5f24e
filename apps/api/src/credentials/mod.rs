//! Credentials: LLM gateway API keys, their company scope, and the in-memory rotation pool.
//!
//! The store (Postgres in production) is the source of truth for which keys exist.
//! Request counters, activation flags and the rotation cursor live in `KeyPool`.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod pool;

pub use pool::KeyPool;

/// Which slice of the credential table a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScope {
    Company(Uuid),
    /// Keys with no owning company.
    Global,
    /// Every active key regardless of owner.
    All,
}

/// A credential as the store reports it.
#[derive(Clone)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub key: String,
    pub company_id: Option<Uuid>,
    pub provider: String,
    pub max_requests: u32,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("key", &"[REDACTED]")
            .field("company_id", &self.company_id)
            .field("provider", &self.provider)
            .field("max_requests", &self.max_requests)
            .finish()
    }
}

/// A credential together with its in-memory usage state.
#[derive(Clone)]
pub struct Credential {
    pub id: Uuid,
    pub key: String,
    pub company_id: Option<Uuid>,
    pub provider: String,
    pub is_active: bool,
    pub request_count: u32,
    pub max_requests: u32,
    pub last_used: Option<DateTime<Utc>>,
    /// Last remaining-requests hint seen in the provider's rate-limit headers.
    pub rate_limit_remaining: Option<u32>,
}

impl Credential {
    fn from_record(record: &CredentialRecord) -> Self {
        Self {
            id: record.id,
            key: record.key.clone(),
            company_id: record.company_id,
            provider: record.provider.clone(),
            is_active: true,
            request_count: 0,
            max_requests: record.max_requests,
            last_used: None,
            rate_limit_remaining: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.is_active && self.request_count < self.max_requests
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("key", &"[REDACTED]")
            .field("company_id", &self.company_id)
            .field("provider", &self.provider)
            .field("is_active", &self.is_active)
            .field("request_count", &self.request_count)
            .field("max_requests", &self.max_requests)
            .field("last_used", &self.last_used)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// External credential store. Postgres adapter: `persistence::PgCredentialStore`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn list_active(&self, scope: CredentialScope) -> anyhow::Result<Vec<CredentialRecord>>;

    /// Reports one successful request against the key's persisted usage counter.
    async fn increment_usage(&self, credential_id: Uuid) -> anyhow::Result<()>;
}
