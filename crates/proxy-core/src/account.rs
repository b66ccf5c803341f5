//! Account and credential data model.
//!
//! The on-disk account-store *format* is out of scope; this
//! module only defines the shape the rest of the core needs and a trait
//! boundary, [`AccountRepository`], that a concrete store implements.
//! [`JsonFileAccountRepository`] is the one adapter this repo owns — a
//! minimal reference implementation of a trait whose real backends live
//! outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

/// Safety margin subtracted from a token's `expires_at` before comparing to
/// "now" — `TokenPair` invariant.
pub const EXPIRY_SAFETY_MARGIN_SECS: i64 = 300;

/// `~/.config/upstream-proxy/accounts.json`, used when no `account_store`
/// path is configured.
pub fn default_account_store_path() -> std::path::PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("upstream-proxy")
        .join("accounts.json")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    /// True when `now + safety margin >= expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(EXPIRY_SAFETY_MARGIN_SECS) >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub tokens: TokenPair,
    /// Opaque per-account fingerprint-isolation payload forwarded verbatim
    /// to Upstream; this proxy never inspects it.
    #[serde(default)]
    pub device_profile: Option<Value>,
}

#[derive(Debug, Error)]
pub enum AccountRepositoryError {
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Abstracts the out-of-scope account store. `load_all` is used once at
/// startup to seed the [`LoadBalancer`](crate::balancer::LoadBalancer);
/// `save_tokens` persists a refreshed [`TokenPair`].
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Account>, AccountRepositoryError>;
    async fn save_tokens(
        &self,
        account_id: &str,
        tokens: TokenPair,
    ) -> Result<(), AccountRepositoryError>;
}

/// An `AccountRepository` backed by a single JSON file of account records,
/// rewritten in full on every `save_tokens` call (no partial writes).
pub struct JsonFileAccountRepository {
    path: std::path::PathBuf,
    cache: RwLock<HashMap<String, Account>>,
}

impl JsonFileAccountRepository {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn read_file(&self) -> Result<Vec<Account>, AccountRepositoryError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn write_file(&self, accounts: &[Account]) -> Result<(), AccountRepositoryError> {
        let data = serde_json::to_string_pretty(accounts)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}

#[async_trait]
impl AccountRepository for JsonFileAccountRepository {
    async fn load_all(&self) -> Result<Vec<Account>, AccountRepositoryError> {
        let accounts = self.read_file()?;
        let mut cache = self.cache.write().unwrap();
        cache.clear();
        for account in &accounts {
            cache.insert(account.id.clone(), account.clone());
        }
        Ok(accounts)
    }

    async fn save_tokens(
        &self,
        account_id: &str,
        tokens: TokenPair,
    ) -> Result<(), AccountRepositoryError> {
        let mut accounts = self.read_file()?;
        let account = accounts
            .iter_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| AccountRepositoryError::NotFound(account_id.to_string()))?;
        account.tokens = tokens.clone();
        self.write_file(&accounts)?;

        let mut cache = self.cache.write().unwrap();
        if let Some(entry) = cache.get_mut(account_id) {
            entry.tokens = tokens;
        }
        Ok(())
    }
}

/// In-memory repository for tests.
#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryAccountRepository {
    pub fn new(accounts: Vec<Account>) -> Self {
        let map = accounts.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self {
            accounts: RwLock::new(map),
        }
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn load_all(&self) -> Result<Vec<Account>, AccountRepositoryError> {
        Ok(self.accounts.read().unwrap().values().cloned().collect())
    }

    async fn save_tokens(
        &self,
        account_id: &str,
        tokens: TokenPair,
    ) -> Result<(), AccountRepositoryError> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| AccountRepositoryError::NotFound(account_id.to_string()))?;
        account.tokens = tokens;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(expires_in_secs: i64) -> TokenPair {
        TokenPair {
            access: "a".into(),
            refresh: "r".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn expiry_honors_safety_margin() {
        assert!(!pair(600).is_expired());
        assert!(pair(60).is_expired());
        assert!(pair(-10).is_expired());
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let repo = InMemoryAccountRepository::new(vec![Account {
            id: "a1".into(),
            email: "a@example.com".into(),
            tokens: pair(600),
            device_profile: None,
        }]);
        let new_tokens = pair(3600);
        repo.save_tokens("a1", new_tokens.clone()).await.unwrap();
        let accounts = repo.load_all().await.unwrap();
        assert_eq!(accounts[0].tokens.access, new_tokens.access);
    }
}
