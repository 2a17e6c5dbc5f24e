//! Key Pool: rotation, per-key request ceilings, deactivation and cooldown.
//!
//! All state sits behind one synchronous mutex that is never held across an `.await`,
//! so every check-then-update (counter vs ceiling, cursor advance) is atomic even when
//! workers run on several runtime threads. The rotation cursor is advanced by
//! `next_available`, which therefore is a mutation, not a peek.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Credential, CredentialError, CredentialRecord, CredentialScope, CredentialStore};

/// Default cooldown before an exhausted or failed key is retried.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
struct PoolState {
    credentials: Vec<Credential>,
    /// Index the next round-robin scan starts from.
    cursor: usize,
}

impl PoolState {
    /// Adds new store records and refreshes static fields of known ones.
    /// Counters and activation flags of known credentials are left untouched.
    fn merge(&mut self, records: &[CredentialRecord]) {
        for record in records {
            match self.credentials.iter_mut().find(|c| c.id == record.id) {
                Some(existing) => {
                    existing.key = record.key.clone();
                    existing.company_id = record.company_id;
                    existing.provider = record.provider.clone();
                    existing.max_requests = record.max_requests;
                }
                None => self.credentials.push(Credential::from_record(record)),
            }
        }
    }

    fn next_available(&mut self) -> Option<Credential> {
        let len = self.credentials.len();
        for offset in 0..len {
            let idx = (self.cursor + offset) % len;
            if self.credentials[idx].is_usable() {
                self.cursor = (idx + 1) % len;
                return Some(self.credentials[idx].clone());
            }
        }
        None
    }

    fn reactivate_cooled_down(&mut self, cooldown: chrono::Duration) -> usize {
        let now = Utc::now();
        let mut reactivated = 0;
        for credential in self.credentials.iter_mut().filter(|c| !c.is_usable()) {
            let cooled = credential
                .last_used
                .map_or(true, |last| now - last >= cooldown);
            if cooled {
                credential.request_count = 0;
                credential.is_active = true;
                reactivated += 1;
            }
        }
        reactivated
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut Credential> {
        self.credentials.iter_mut().find(|c| c.id == id)
    }
}

/// In-memory credential pool backed by an external `CredentialStore`.
pub struct KeyPool {
    store: Arc<dyn CredentialStore>,
    state: Mutex<PoolState>,
    cooldown: chrono::Duration,
}

impl KeyPool {
    pub fn new(store: Arc<dyn CredentialStore>, cooldown: Duration) -> Self {
        Self {
            store,
            state: Mutex::new(PoolState::default()),
            cooldown: chrono::Duration::from_std(cooldown)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }

    pub fn store(&self) -> Arc<dyn CredentialStore> {
        Arc::clone(&self.store)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads every active key from the store into the pool and forgets keys the
    /// store no longer lists. Returns the pool size.
    pub async fn refresh(&self) -> Result<usize, CredentialError> {
        let records = self.store.list_active(CredentialScope::All).await?;
        let ids: HashSet<Uuid> = records.iter().map(|r| r.id).collect();
        let mut state = self.lock();
        state.merge(&records);
        let before = state.credentials.len();
        state.credentials.retain(|c| ids.contains(&c.id));
        let dropped = before - state.credentials.len();
        if dropped > 0 {
            debug!("Dropped {dropped} credentials no longer active in the store");
        }
        Ok(state.credentials.len())
    }

    /// Usable credentials for a company, ordered least-used first.
    ///
    /// Company keys win; a company without keys falls back to global keys; no
    /// company at all means every active key, with the round-robin pick in front.
    pub async fn list_usable(&self, scope: Option<Uuid>) -> Result<Vec<Credential>, CredentialError> {
        self.usable(scope, true).await
    }

    /// How many credentials `list_usable` would return. Leaves the rotation cursor alone.
    pub async fn count_usable(&self, scope: Option<Uuid>) -> Result<usize, CredentialError> {
        Ok(self.usable(scope, false).await?.len())
    }

    async fn usable(
        &self,
        scope: Option<Uuid>,
        rotate: bool,
    ) -> Result<Vec<Credential>, CredentialError> {
        let records = match scope {
            Some(company_id) => {
                let own = self
                    .store
                    .list_active(CredentialScope::Company(company_id))
                    .await?;
                if own.is_empty() {
                    debug!("Company {company_id} has no API keys, using global keys");
                    self.store.list_active(CredentialScope::Global).await?
                } else {
                    own
                }
            }
            None => self.store.list_active(CredentialScope::All).await?,
        };

        let ids: HashSet<Uuid> = records.iter().map(|r| r.id).collect();
        let mut state = self.lock();
        state.merge(&records);

        let collect_usable = |state: &PoolState| -> Vec<Credential> {
            state
                .credentials
                .iter()
                .filter(|c| ids.contains(&c.id) && c.is_usable())
                .cloned()
                .collect()
        };

        let mut usable = collect_usable(&state);
        if usable.is_empty() && !ids.is_empty() {
            let reactivated = state.reactivate_cooled_down(self.cooldown);
            if reactivated > 0 {
                info!("Reactivated {reactivated} credentials after cooldown");
                usable = collect_usable(&state);
            }
        }

        usable.sort_by(|a, b| {
            a.request_count
                .cmp(&b.request_count)
                .then(a.last_used.cmp(&b.last_used))
        });

        if rotate && scope.is_none() {
            if let Some(next) = state.next_available() {
                if let Some(pos) = usable.iter().position(|c| c.id == next.id) {
                    let picked = usable.remove(pos);
                    usable.insert(0, picked);
                }
            }
        }

        Ok(usable)
    }

    /// Round-robin pick over the whole pool, starting after the last returned key.
    /// A fruitless full rotation runs one cooldown reactivation pass and retries.
    pub fn next_available(&self) -> Option<Credential> {
        let mut state = self.lock();
        if let Some(credential) = state.next_available() {
            return Some(credential);
        }

        let reactivated = state.reactivate_cooled_down(self.cooldown);
        if reactivated > 0 {
            info!("Reactivated {reactivated} credentials after cooldown");
        }
        let retry = state.next_available();
        if retry.is_none() {
            warn!(
                "Credential pool exhausted: {} keys, none usable",
                state.credentials.len()
            );
        }
        retry
    }

    /// Counts one request against the key. Returns the new counter value.
    pub fn mark_used(&self, id: Uuid) -> Option<u32> {
        let mut state = self.lock();
        let credential = state.get_mut(id)?;
        credential.request_count += 1;
        credential.last_used = Some(Utc::now());
        if credential.request_count >= credential.max_requests {
            credential.is_active = false;
            info!(
                "Credential {} reached its ceiling ({}/{}), deactivated until cooldown",
                id, credential.request_count, credential.max_requests
            );
        }
        Some(credential.request_count)
    }

    /// Deactivates the key on 429/402. Returns whether it was deactivated.
    pub fn mark_failed(&self, id: Uuid, status: u16) -> bool {
        if !matches!(status, 429 | 402) {
            return false;
        }
        let mut state = self.lock();
        match state.get_mut(id) {
            Some(credential) => {
                credential.is_active = false;
                credential.last_used = Some(Utc::now());
                warn!("Credential {id} deactivated after HTTP {status}");
                true
            }
            None => false,
        }
    }

    pub fn note_rate_limit(&self, id: Uuid, remaining: u32) {
        if let Some(credential) = self.lock().get_mut(id) {
            credential.rate_limit_remaining = Some(remaining);
        }
    }

    /// Resets and reactivates every unusable key whose cooldown has elapsed.
    pub fn reactivate_cooled_down(&self) -> usize {
        self.lock().reactivate_cooled_down(self.cooldown)
    }
}
