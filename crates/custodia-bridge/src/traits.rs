// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for native capabilities.

use custodia_core::error::Result;
use serde::{Deserialize, Serialize};

/// Unified bridge that groups every native capability the core consumes.
pub trait PlatformBridge:
    NativeKeychain + NativeAuthenticator + NativeDeviceIntegrity + Send + Sync
{
    /// Human-readable platform name (e.g. "iOS 17", "Android 14").
    fn platform_name(&self) -> &str;
}

/// Secret storage in the platform keychain / keystore.
///
/// Holds the master key of the encrypted store.  Implementations must keep
/// the secret out of the application's own data directory.
pub trait NativeKeychain: Send + Sync {
    /// Store a secret under the given key, replacing any previous value.
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret by key. Returns None if not found.
    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret by key.  Deleting a missing key is not an error.
    fn delete_secret(&self, key: &str) -> Result<()>;
}

/// What the user is being asked to re-prove identity for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPrompt {
    pub title: String,
    pub subtitle: String,
}

impl AuthPrompt {
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: subtitle.into(),
        }
    }
}

/// Result of an interactive authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthOutcome {
    /// The user re-proved identity.
    Success,
    /// The attempt was rejected or cancelled.
    Failure,
    /// Biometrics unavailable or declined; the host should offer its PIN flow.
    FallbackRequested,
}

/// Biometric / device-credential prompt.
///
/// Implementations may block until the user responds; callers on an async
/// runtime run this on a blocking thread.
pub trait NativeAuthenticator: Send + Sync {
    fn authenticate(&self, prompt: &AuthPrompt) -> Result<AuthOutcome>;
}

/// Environment signals gathered by the host at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTrust {
    pub emulator: bool,
    pub debugger_attached: bool,
    pub usb_debugging: bool,
    /// The installed package is signed by the expected certificate.
    pub signature_trusted: bool,
}

impl DeviceTrust {
    /// A report with no risk signals.
    pub fn all_clear() -> Self {
        Self {
            emulator: false,
            debugger_attached: false,
            usb_debugging: false,
            signature_trusted: true,
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.signature_trusted && !self.emulator && !self.debugger_attached && !self.usb_debugging
    }

    /// Names of the signals that made this device untrusted.
    pub fn risk_signals(&self) -> Vec<&'static str> {
        let mut signals = Vec::new();
        if self.emulator {
            signals.push("emulator");
        }
        if self.debugger_attached {
            signals.push("debugger");
        }
        if self.usb_debugging {
            signals.push("usb-debugging");
        }
        if !self.signature_trusted {
            signals.push("untrusted-signature");
        }
        signals
    }
}

/// Root / emulator / debugger / signature checks.
pub trait NativeDeviceIntegrity: Send + Sync {
    fn device_trust(&self) -> Result<DeviceTrust>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_clear_is_trusted() {
        let trust = DeviceTrust::all_clear();
        assert!(trust.is_trusted());
        assert!(trust.risk_signals().is_empty());
    }

    #[test]
    fn any_signal_breaks_trust() {
        let trust = DeviceTrust {
            debugger_attached: true,
            signature_trusted: false,
            ..DeviceTrust::all_clear()
        };
        assert!(!trust.is_trusted());
        assert_eq!(trust.risk_signals(), vec!["debugger", "untrusted-signature"]);
    }
}
