// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Custodia security core.
//
// Four independent subsystems composed by the caller:
//   tokens        short-lived, permission-scoped capability tokens
//   forensic      tamper-evident SHA-256 hash chain persisted as JSON
//   ledger        in-memory audit log with rate anomaly detection and signed export
//   crypto_store  encrypted key-value storage with HMAC tags and key rotation
//
// plus the anonymization helpers, which operate on data before or after it
// reaches any of them.  No subsystem calls another.

pub mod access_log;
pub mod anonymizer;
pub mod crypto_store;
pub mod forensic;
pub mod integrity;
pub mod ledger;
pub mod signing;
pub mod store;
pub mod tokens;

pub use access_log::AccessLog;
pub use crypto_store::{CryptoStore, ProtectionSummary};
pub use forensic::{ChainVerification, EntryVerdict, ForensicChain, verify_entries};
pub use integrity::{hash_bytes, hmac_sha256, verify_hmac};
pub use ledger::{AuditLedger, SignedExport};
pub use signing::{EcdsaLogSigner, LogSigner, RsaLogSigner, verify_signature};
pub use store::{EncryptedSqliteStore, PlainSqliteStore, SecureKeyValueStore, StoreLocation};
pub use tokens::TokenAuthorizer;
