// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub bridge for desktop/CI builds where native mobile APIs are unavailable.
//
// Secrets live in process memory only, so an encrypted store opened through
// this bridge is unreadable after a restart.  Good enough for tests and the
// desktop self-check; never for a shipped mobile build.

use std::collections::HashMap;

use custodia_core::error::{CustodiaError, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::traits::*;

/// In-process bridge returned on non-mobile platforms.
#[derive(Debug)]
pub struct StubBridge {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
    auth_outcome: Mutex<AuthOutcome>,
    trust: Mutex<DeviceTrust>,
    keychain_available: bool,
    delete_failure: Mutex<Option<String>>,
}

impl StubBridge {
    /// Working keychain, authenticator that asks for the PIN fallback, and a
    /// clean device report.
    pub fn new() -> Self {
        Self {
            secrets: Mutex::new(HashMap::new()),
            auth_outcome: Mutex::new(AuthOutcome::FallbackRequested),
            trust: Mutex::new(DeviceTrust::all_clear()),
            keychain_available: true,
            delete_failure: Mutex::new(None),
        }
    }

    /// A bridge whose keychain always fails, forcing the plain fallback store.
    pub fn without_keychain() -> Self {
        Self {
            keychain_available: false,
            ..Self::new()
        }
    }

    /// Decide what the next `authenticate` calls return.
    pub fn set_auth_outcome(&self, outcome: AuthOutcome) {
        *self.auth_outcome.lock() = outcome;
    }

    pub fn set_device_trust(&self, trust: DeviceTrust) {
        *self.trust.lock() = trust;
    }

    /// Make every later `delete_secret` fail with `reason`, leaving the
    /// secret in place.
    pub fn fail_keychain_deletes(&self, reason: impl Into<String>) {
        *self.delete_failure.lock() = Some(reason.into());
    }

    /// Number of secrets currently held.
    pub fn secret_count(&self) -> usize {
        self.secrets.lock().len()
    }
}

impl Default for StubBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformBridge for StubBridge {
    fn platform_name(&self) -> &str {
        "Desktop (stub)"
    }
}

impl NativeKeychain for StubBridge {
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        if !self.keychain_available {
            warn!(key, "NativeKeychain::store_secret called on unavailable stub keychain");
            return Err(CustodiaError::PlatformUnavailable);
        }
        self.secrets.lock().insert(key.to_owned(), value.to_vec());
        debug!(key, "secret stored in process memory");
        Ok(())
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.keychain_available {
            return Err(CustodiaError::PlatformUnavailable);
        }
        Ok(self.secrets.lock().get(key).cloned())
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        if !self.keychain_available {
            return Err(CustodiaError::PlatformUnavailable);
        }
        if let Some(reason) = self.delete_failure.lock().clone() {
            warn!(key, %reason, "stub keychain refusing delete");
            return Err(CustodiaError::Keychain(reason));
        }
        self.secrets.lock().remove(key);
        Ok(())
    }
}

impl NativeAuthenticator for StubBridge {
    fn authenticate(&self, prompt: &AuthPrompt) -> Result<AuthOutcome> {
        let outcome = *self.auth_outcome.lock();
        debug!(title = %prompt.title, ?outcome, "stub authenticator answered");
        Ok(outcome)
    }
}

impl NativeDeviceIntegrity for StubBridge {
    fn device_trust(&self) -> Result<DeviceTrust> {
        Ok(*self.trust.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keychain_round_trip() {
        let bridge = StubBridge::new();
        bridge.store_secret("master", b"k1").unwrap();
        assert_eq!(bridge.load_secret("master").unwrap(), Some(b"k1".to_vec()));
        bridge.delete_secret("master").unwrap();
        assert_eq!(bridge.load_secret("master").unwrap(), None);
        // Deleting again is fine.
        bridge.delete_secret("master").unwrap();
    }

    #[test]
    fn unavailable_keychain_errors() {
        let bridge = StubBridge::without_keychain();
        assert!(matches!(
            bridge.store_secret("k", b"v"),
            Err(CustodiaError::PlatformUnavailable)
        ));
        assert!(bridge.load_secret("k").is_err());
    }

    #[test]
    fn scripted_delete_failure_keeps_secret() {
        let bridge = StubBridge::new();
        bridge.store_secret("master", b"k1").unwrap();
        bridge.fail_keychain_deletes("keystore busy");

        match bridge.delete_secret("master") {
            Err(CustodiaError::Keychain(reason)) => assert_eq!(reason, "keystore busy"),
            other => panic!("expected keychain error, got {other:?}"),
        }
        assert_eq!(bridge.secret_count(), 1);
    }

    #[test]
    fn authenticator_outcome_is_configurable() {
        let bridge = StubBridge::new();
        let prompt = AuthPrompt::new("Authentication required", "Confirm your identity");
        assert_eq!(
            bridge.authenticate(&prompt).unwrap(),
            AuthOutcome::FallbackRequested
        );
        bridge.set_auth_outcome(AuthOutcome::Success);
        assert_eq!(bridge.authenticate(&prompt).unwrap(), AuthOutcome::Success);
    }
}
