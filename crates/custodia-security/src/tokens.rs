// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Zero-trust capability tokens.
//
// A token is a bearer credential for exactly one permission and lives for a
// fixed TTL.  Expiry is evaluated lazily on every check and sweep; there is
// no background timer.  Any failed check evicts the token, so a caller that
// asks with the wrong permission has to re-authenticate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use custodia_core::clock::{Clock, elapsed_between};
use custodia_core::config::SecurityConfig;
use custodia_core::types::{TokenId, TokenRejection};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// What an active token grants.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TokenGrant {
    permission: String,
    issued_at: DateTime<Utc>,
}

/// Issues and validates short-lived, permission-scoped tokens.
///
/// All operations serialize on a single lock, so two threads validating the
/// same token can never both observe it as live after one of them evicted it.
#[derive(Debug)]
pub struct TokenAuthorizer {
    active: Mutex<HashMap<TokenId, TokenGrant>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenAuthorizer {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn from_config(config: &SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.token_ttl(), clock)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a new token bound to `permission` and the current time.
    pub fn request_token(&self, permission: impl Into<String>) -> TokenId {
        let permission = permission.into();
        let id = TokenId::new();
        let grant = TokenGrant {
            permission,
            issued_at: self.clock.now(),
        };
        debug!(token = %id, permission = %grant.permission, "token issued");
        self.active.lock().insert(id, grant);
        id
    }

    /// Check `token` against `required_permission`, evicting it on any failure.
    pub fn check_token(
        &self,
        token: &TokenId,
        required_permission: &str,
    ) -> Result<(), TokenRejection> {
        let now = self.clock.now();
        let mut active = self.active.lock();

        let Some(grant) = active.get(token) else {
            debug!(%token, "unknown token presented");
            return Err(TokenRejection::Unknown);
        };

        let rejection = if elapsed_between(grant.issued_at, now) >= self.ttl {
            Some(TokenRejection::Expired)
        } else if grant.permission != required_permission {
            Some(TokenRejection::PermissionMismatch)
        } else {
            None
        };

        match rejection {
            None => Ok(()),
            Some(reason) => {
                active.remove(token);
                warn!(%token, required_permission, %reason, "token rejected and evicted");
                Err(reason)
            }
        }
    }

    /// Boolean form of [`check_token`](Self::check_token).
    pub fn validate_token(&self, token: &TokenId, required_permission: &str) -> bool {
        self.check_token(token, required_permission).is_ok()
    }

    /// Drop every token whose TTL has run out.
    pub fn clear_expired_tokens(&self) {
        let now = self.clock.now();
        let mut active = self.active.lock();
        let before = active.len();
        active.retain(|_, grant| elapsed_between(grant.issued_at, now) < self.ttl);
        let swept = before - active.len();
        if swept > 0 {
            info!(swept, remaining = active.len(), "expired tokens cleared");
        }
    }

    /// Time left before `token` expires; zero for unknown or expired tokens.
    pub fn token_remaining_time(&self, token: &TokenId) -> Duration {
        let now = self.clock.now();
        self.active
            .lock()
            .get(token)
            .map(|grant| self.ttl.saturating_sub(elapsed_between(grant.issued_at, now)))
            .unwrap_or(Duration::ZERO)
    }

    /// Explicitly retire a token (e.g. on logout).  Returns whether it existed.
    pub fn revoke_token(&self, token: &TokenId) -> bool {
        self.active.lock().remove(token).is_some()
    }

    /// Number of tokens in the table, including expired ones not yet swept.
    pub fn active_tokens(&self) -> usize {
        self.active.lock().len()
    }
}
