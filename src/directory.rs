// src/directory.rs

//! A user store guarded by a circuit breaker.
//!
//! Every method makes one round trip to a [`Backend`] before touching the
//! in-memory table, and each applies the policy that suits it:
//!
//! - reads fall back to placeholder or cached data,
//! - `save` has no fallback so the caller sees the failure,
//! - `delete_by_id` is idempotent, an already missing user is not an error,
//! - `is_healthy` normalises everything to a `bool`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::breaker::Breaker;
use crate::error::{CallFailure, GuardResult};
use crate::simulation::{Backend, BackendError};

/// A stored user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Zero asks `save` to assign the next free id
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            email: email.into(),
            additional_info: None,
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    /// Domain part of the email address
    pub fn email_domain(&self) -> Option<&str> {
        self.email.split_once('@').map(|(_, domain)| domain)
    }

    /// Stand-in returned when a user cannot be loaded
    pub fn placeholder(id: u64) -> Self {
        Self {
            id,
            name: "User temporarily unavailable".to_string(),
            email: "unavailable@system.local".to_string(),
            additional_info: Some(
                "User data is temporarily unavailable, please retry in a few minutes".to_string(),
            ),
        }
    }

    /// Cached entry shown when the user list cannot be loaded
    pub fn system_fallback() -> Self {
        Self {
            id: 1,
            name: "System user".to_string(),
            email: "system@fallback.local".to_string(),
            additional_info: Some("Showing cached data while the database recovers".to_string()),
        }
    }
}

/// Directory operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("User {0} not found")]
    NotFound(u64),

    #[error("Database error: {0}")]
    Backend(#[from] BackendError),
}

/// Summary of the stored users
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryStats {
    /// "available", or "unavailable" when served by the fallback
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_users: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_domains: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl DirectoryStats {
    fn unavailable() -> Self {
        Self {
            status: "unavailable".to_string(),
            total_users: None,
            email_domains: None,
            message: Some("Database temporarily unavailable".to_string()),
            last_update: Utc::now(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == "available"
    }
}

/// In-memory user table behind a breaker-guarded backend
#[derive(Debug)]
pub struct UserDirectory {
    breaker: Arc<Breaker>,
    backend: Arc<dyn Backend>,
    users: RwLock<BTreeMap<u64, User>>,
}

impl UserDirectory {
    /// Directory seeded with a handful of sample users
    pub fn new(breaker: Arc<Breaker>, backend: Arc<dyn Backend>) -> Self {
        let directory = Self::empty(breaker, backend);
        {
            let mut users = directory.write();
            for (id, name, email, info) in [
                (1, "Ivan Petrov", "ivan.petrov@example.com", "System administrator"),
                (2, "Maria Sidorova", "maria.sidorova@company.ru", "Project manager"),
                (3, "Alexey Ivanov", "alexey.ivanov@company.ru", "Lead developer"),
                (4, "Elena Kozlova", "elena.kozlova@gmail.com", "Data analyst"),
            ] {
                let user = User {
                    id,
                    ..User::new(name, email).with_info(info)
                };
                users.insert(id, user);
            }
            info!(users = users.len(), "Seeded user directory");
        }
        directory
    }

    pub fn empty(breaker: Arc<Breaker>, backend: Arc<dyn Backend>) -> Self {
        Self {
            breaker,
            backend,
            users: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn breaker(&self) -> &Arc<Breaker> {
        &self.breaker
    }

    /// Look a user up; a placeholder is returned while the database is failing
    pub async fn find_by_id(&self, id: u64) -> GuardResult<Option<User>, DirectoryError> {
        debug!(id, "Looking up user");
        self.breaker
            .guard_with_fallback(
                || self.load_user(id),
                |reason: &CallFailure<DirectoryError>| {
                    warn!(id, %reason, "Serving placeholder user");
                    async move { Ok(Some(User::placeholder(id))) }
                },
            )
            .await
    }

    /// All users ordered by id; a cached list is returned while failing
    pub async fn find_all(&self) -> GuardResult<Vec<User>, DirectoryError> {
        self.breaker
            .guard_with_fallback(
                || self.load_all(),
                |reason: &CallFailure<DirectoryError>| {
                    warn!(%reason, "Serving cached user list");
                    async { Ok(vec![User::system_fallback()]) }
                },
            )
            .await
    }

    /// Users whose email is in `domain`; empty while failing
    pub async fn find_by_email_domain(&self, domain: &str) -> GuardResult<Vec<User>, DirectoryError> {
        self.breaker
            .guard_with_fallback(
                || self.load_by_domain(domain),
                |reason: &CallFailure<DirectoryError>| {
                    warn!(domain, %reason, "Serving empty domain search");
                    async { Ok(Vec::new()) }
                },
            )
            .await
    }

    /// Insert or replace a user. An id of zero assigns the next free id.
    ///
    /// Writes have no fallback: a rejected or failed save is an error the
    /// caller may retry.
    pub async fn save(&self, user: User) -> GuardResult<User, DirectoryError> {
        let name = user.name.clone();
        let result = self.breaker.guard(|| self.store(user)).await;
        if let Err(err) = &result {
            error!(user = %name, error = %err, "Failed to save user");
        }
        result
    }

    /// Delete a user.
    ///
    /// Returns `true` if a user was removed and `false` if it was already
    /// gone. A delete that was rejected or failed is always an error.
    pub async fn delete_by_id(&self, id: u64) -> GuardResult<bool, DirectoryError> {
        let result = self
            .breaker
            .guard_idempotent(
                || self.remove(id),
                |err| match err {
                    DirectoryError::NotFound(_) => Some(false),
                    _ => None,
                },
            )
            .await;
        if let Err(err) = &result {
            error!(id, error = %err, "Failed to delete user");
        }
        result
    }

    /// Whether the database answers through the breaker
    pub async fn is_healthy(&self) -> bool {
        match self.breaker.guard(|| self.ping()).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "Database health check failed");
                false
            }
        }
    }

    /// User and domain counts; "unavailable" while failing
    pub async fn stats(&self) -> GuardResult<DirectoryStats, DirectoryError> {
        self.breaker
            .guard_with_fallback(
                || self.collect_stats(),
                |reason: &CallFailure<DirectoryError>| {
                    warn!(%reason, "Serving unavailable stats");
                    async { Ok(DirectoryStats::unavailable()) }
                },
            )
            .await
    }

    async fn load_user(&self, id: u64) -> Result<Option<User>, DirectoryError> {
        self.backend.invoke("find_by_id").await?;
        let user = self.read().get(&id).cloned();
        debug!(id, found = user.is_some(), "User lookup finished");
        Ok(user)
    }

    async fn load_all(&self) -> Result<Vec<User>, DirectoryError> {
        self.backend.invoke("find_all").await?;
        let users: Vec<User> = self.read().values().cloned().collect();
        Ok(users)
    }

    async fn load_by_domain(&self, domain: &str) -> Result<Vec<User>, DirectoryError> {
        self.backend.invoke("find_by_email_domain").await?;
        let users: Vec<User> = self
            .read()
            .values()
            .filter(|user| user.email_domain() == Some(domain))
            .cloned()
            .collect();
        Ok(users)
    }

    async fn store(&self, mut user: User) -> Result<User, DirectoryError> {
        self.backend.invoke("save").await?;
        let mut users = self.write();
        if user.id == 0 {
            user.id = users.keys().next_back().map_or(1, |last| last + 1);
        }
        users.insert(user.id, user.clone());
        info!(id = user.id, "User saved");
        Ok(user)
    }

    async fn remove(&self, id: u64) -> Result<bool, DirectoryError> {
        self.backend.invoke("delete_by_id").await?;
        let removed = self.write().remove(&id);
        match removed {
            Some(user) => {
                info!(id, name = %user.name, "User deleted");
                Ok(true)
            }
            None => Err(DirectoryError::NotFound(id)),
        }
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        self.backend.invoke("health_check").await?;
        Ok(())
    }

    async fn collect_stats(&self) -> Result<DirectoryStats, DirectoryError> {
        self.backend.invoke("stats").await?;
        let stats = {
            let users = self.read();
            let domains: BTreeSet<&str> = users.values().filter_map(User::email_domain).collect();
            DirectoryStats {
                status: "available".to_string(),
                total_users: Some(users.len()),
                email_domains: Some(domains.len()),
                message: None,
                last_update: Utc::now(),
            }
        };
        Ok(stats)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<u64, User>> {
        self.users.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<u64, User>> {
        self.users.write().unwrap_or_else(PoisonError::into_inner)
    }
}
