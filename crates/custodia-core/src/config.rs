// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Signature scheme used for signed audit exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningScheme {
    /// RSA-2048, PKCS#1 v1.5 padding, SHA-256 digest.
    Rsa2048Sha256,
    /// ECDSA over P-256 with SHA-256, ASN.1 DER signatures.
    EcdsaP256Sha256,
}

/// Persistent security settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Lifetime of a capability token, in seconds.
    pub token_ttl_secs: u64,
    /// Length of the sliding window used by the rate anomaly detector.
    pub anomaly_window_secs: u64,
    /// Events allowed per user inside one window before an anomaly is flagged.
    pub anomaly_max_requests: usize,
    /// Days between master key rotations.
    pub rotation_interval_days: u64,
    /// Maximum number of lines retained in the access log.
    pub access_log_capacity: usize,
    /// PBKDF2-HMAC-SHA256 iteration count for user key derivation.
    pub pbkdf2_iterations: u32,
    /// Refuse to return values whose HMAC no longer matches.
    ///
    /// Off by default: tampered reads are logged but still returned.
    pub strict_integrity: bool,
    /// Scheme for the long-lived audit export signing key.
    pub signing_scheme: SigningScheme,
    /// Refuse to start unless the platform reports a trusted device.
    pub require_trusted_device: bool,
}

impl SecurityConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn anomaly_window(&self) -> Duration {
        Duration::from_secs(self.anomaly_window_secs)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_days * 24 * 60 * 60)
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 5 * 60,
            anomaly_window_secs: 60,
            anomaly_max_requests: 5,
            rotation_interval_days: 30,
            access_log_capacity: 100,
            pbkdf2_iterations: 10_000,
            strict_integrity: false,
            signing_scheme: SigningScheme::Rsa2048Sha256,
            require_trusted_device: true,
        }
    }
}
