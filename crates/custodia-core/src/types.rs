// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Custodia security core.
//
// These are the data structures exchanged with the caller layer and written
// to disk or exported; their serde field names are the wire format.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `strftime` pattern shared by the access log, audit events, and reports.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a timestamp the way every log line and report does.
pub fn format_log_timestamp(at: DateTime<Utc>) -> String {
    at.format(LOG_TIMESTAMP_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// Capability tokens
// ---------------------------------------------------------------------------

/// Opaque bearer identifier for a capability token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub Uuid);

impl TokenId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Why a token failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenRejection {
    /// Never issued, already swept, or evicted by an earlier failed check.
    Unknown,
    /// Older than the token TTL.
    Expired,
    /// Issued for a different permission.
    PermissionMismatch,
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown token"),
            Self::Expired => write!(f, "token expired"),
            Self::PermissionMismatch => {
                write!(f, "token does not grant the requested permission")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Forensic chain
// ---------------------------------------------------------------------------

/// Sentinel `previous_hash` of the first entry in a forensic chain.
pub const GENESIS_HASH: &str = "GENESIS";

/// One immutable, hash-linked record in the forensic chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForensicEntry {
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
    pub user_id: String,
    pub action: String,
    pub details: String,
    pub previous_hash: String,
    pub hash: String,
}

impl ForensicEntry {
    /// The exact byte string that `hash` commits to.
    pub fn hash_preimage(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.timestamp, self.user_id, self.action, self.details, self.previous_hash
        )
    }
}

/// Actions performed by one data subject, in chain order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActions {
    pub user_id: String,
    pub actions: Vec<String>,
}

/// GDPR/CCPA-style activity report grouped by user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub generated_at: String,
    pub users: Vec<UserActions>,
}

// ---------------------------------------------------------------------------
// Audit ledger
// ---------------------------------------------------------------------------

/// Event type emitted by the rate anomaly detector.
pub const ANOMALOUS_BEHAVIOR: &str = "ANOMALOUS_BEHAVIOR";

/// Event type recorded when an export could not be signed.
pub const SIGNING_FAILURE: &str = "SIGNING_FAILURE";

/// A single entry in the in-memory audit ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub user: String,
    pub event: String,
    pub details: String,
}

/// Exported ledger contents plus a base64 signature over the serialized logs.
///
/// `signature` is empty when signing failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAuditExport {
    pub logs: Vec<AuditEvent>,
    pub signature: String,
}

impl SignedAuditExport {
    /// Bytes covered by the signature: the compact JSON encoding of `logs`.
    pub fn signed_payload(logs: &[AuditEvent]) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(logs)
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Four-space indented JSON document.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        // serde_json only ever writes valid UTF-8.
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Encrypted storage
// ---------------------------------------------------------------------------

/// Which backing store the crypto store ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMode {
    /// Values encrypted at rest under the keychain-held master key.
    Encrypted,
    /// Encryption setup failed; values are stored in plain form.
    Fallback,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypted => write!(f, "encrypted"),
            Self::Fallback => write!(f, "fallback (unencrypted)"),
        }
    }
}
