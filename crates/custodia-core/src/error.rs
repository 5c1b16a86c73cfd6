// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Custodia.

use thiserror::Error;

use crate::types::TokenRejection;

/// Top-level error type for all Custodia operations.
#[derive(Debug, Error)]
pub enum CustodiaError {
    // -- Authorization --
    #[error("authorization failed: {0}")]
    Authorization(TokenRejection),

    #[error("user authentication failed")]
    AuthenticationFailed,

    #[error("device is not trusted: {0}")]
    DeviceUntrusted(String),

    // -- Integrity --
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    // -- Cryptography --
    #[error("encrypted store setup failed: {0}")]
    CryptoInit(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("signing failed: {0}")]
    Signing(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Platform bridge --
    #[error("keychain error: {0}")]
    Keychain(String),

    #[error("feature not available on this platform")]
    PlatformUnavailable,

    // -- Caller errors --
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl CustodiaError {
    /// Whether this error means durable state could not be written or read.
    ///
    /// Persistence failures are always propagated to the caller; they are
    /// never absorbed into a boolean or an empty value.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Io(_) | Self::Serialization(_)
        )
    }
}

impl From<TokenRejection> for CustodiaError {
    fn from(rejection: TokenRejection) -> Self {
        Self::Authorization(rejection)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CustodiaError>;
