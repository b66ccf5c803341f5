//! Multi-account load balancer.

use crate::account::Account;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// `roundRobin` or `fillFirst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    FillFirst,
}

#[derive(Debug, Clone)]
pub struct AccountStatus {
    pub account_id: String,
    pub is_rate_limited: bool,
    pub rate_limit_expiry: Option<DateTime<Utc>>,
    pub is_quota_exceeded: bool,
    pub request_count: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl AccountStatus {
    fn new(account_id: String) -> Self {
        Self {
            account_id,
            is_rate_limited: false,
            rate_limit_expiry: None,
            is_quota_exceeded: false,
            request_count: 0,
            last_used: None,
        }
    }

    /// `available ⇔ ¬rateLimited ∧ ¬quotaExceeded`.
    pub fn available(&self) -> bool {
        !self.is_rate_limited && !self.is_quota_exceeded
    }
}

struct Inner {
    accounts: Vec<Account>,
    statuses: HashMap<String, AccountStatus>,
    cursor: usize,
}

/// Holds the account pool plus an availability map. Internally serialized by
/// one mutex around the status map and round-robin cursor.
pub struct LoadBalancer {
    strategy: Strategy,
    default_rate_limit: chrono::Duration,
    inner: Mutex<Inner>,
}

impl LoadBalancer {
    pub fn new(accounts: Vec<Account>, strategy: Strategy, default_rate_limit_secs: i64) -> Self {
        let statuses = accounts
            .iter()
            .map(|a| (a.id.clone(), AccountStatus::new(a.id.clone())))
            .collect();
        Self {
            strategy,
            default_rate_limit: chrono::Duration::seconds(default_rate_limit_secs),
            inner: Mutex::new(Inner {
                accounts,
                statuses,
                cursor: 0,
            }),
        }
    }

    /// Select the next account according to the configured strategy. Clears
    /// any rate limits whose expiry has passed before selecting.
    pub fn get_next_account(&self) -> Option<Account> {
        let mut inner = self.inner.lock().unwrap();
        Self::clear_expired_rate_limits(&mut inner.statuses);

        if inner.accounts.is_empty() {
            return None;
        }

        let pick_index = match self.strategy {
            Strategy::RoundRobin => {
                let n = inner.accounts.len();
                let mut chosen = None;
                for offset in 0..n {
                    let idx = (inner.cursor + offset) % n;
                    let id = &inner.accounts[idx].id;
                    if inner.statuses.get(id).map(|s| s.available()).unwrap_or(false) {
                        chosen = Some(idx);
                        break;
                    }
                }
                chosen
            }
            Strategy::FillFirst => inner
                .accounts
                .iter()
                .position(|a| inner.statuses.get(&a.id).map(|s| s.available()).unwrap_or(false)),
        }?;

        let account = inner.accounts[pick_index].clone();
        let now = Utc::now();
        if let Some(status) = inner.statuses.get_mut(&account.id) {
            status.request_count += 1;
            status.last_used = Some(now);
        }
        if self.strategy == Strategy::RoundRobin {
            inner.cursor = (pick_index + 1) % inner.accounts.len();
        }
        Some(account)
    }

    fn clear_expired_rate_limits(statuses: &mut HashMap<String, AccountStatus>) {
        let now = Utc::now();
        for status in statuses.values_mut() {
            if status.is_rate_limited {
                if let Some(expiry) = status.rate_limit_expiry {
                    if now >= expiry {
                        status.is_rate_limited = false;
                        status.rate_limit_expiry = None;
                    }
                }
            }
        }
    }

    /// Marks `account_id` rate-limited until `now + retry_after` (default
    /// one minute).
    pub fn mark_rate_limited(&self, account_id: &str, retry_after: Option<chrono::Duration>) {
        let mut inner = self.inner.lock().unwrap();
        let duration = retry_after.unwrap_or(self.default_rate_limit);
        let expiry = Utc::now() + duration;
        if let Some(status) = inner.statuses.get_mut(account_id) {
            status.is_rate_limited = true;
            status.rate_limit_expiry = Some(expiry);
        }
    }

    /// Marks `account_id` quota-exceeded. Sticky until an external reset —
    /// this never auto-clears on its own.
    pub fn mark_quota_exceeded(&self, account_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(status) = inner.statuses.get_mut(account_id) {
            status.is_quota_exceeded = true;
        }
    }

    pub fn status_of(&self, account_id: &str) -> Option<AccountStatus> {
        self.inner.lock().unwrap().statuses.get(account_id).cloned()
    }

    pub fn any_available(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        Self::clear_expired_rate_limits(&mut inner.statuses);
        inner.statuses.values().any(|s| s.available())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
