// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Crypto store: encrypted key-value storage with per-value HMAC tags,
// password-based key derivation, periodic lossy key rotation, and a capped
// access log.
//
// Every value `v` stored under `k` is written together with a sibling record
// `"{k}_hmac"` = HMAC-SHA256(v) keyed with `k` itself.  Using the key name as
// the MAC secret only detects accidental or naive tampering: anyone who can
// rewrite the value can also recompute the tag.  The store keeps this scheme
// so existing records stay verifiable.
//
// Reads are permissive by default: a tampered value is logged and returned.
// `SecurityConfig::strict_integrity` turns that into an error.
//
// Rotation metadata and the access log live in a separate plain database
// (`security_meta.db`) so they survive rotation of the encrypted store.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use custodia_bridge::NativeKeychain;
use custodia_core::clock::{Clock, elapsed_between};
use custodia_core::config::SecurityConfig;
use custodia_core::error::{CustodiaError, Result};
use custodia_core::types::StoreMode;
use parking_lot::Mutex;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::access_log::AccessLog;
use crate::integrity::{hmac_sha256, verify_hmac};
use crate::store::{
    EncryptedSqliteStore, PlainSqliteStore, SecureKeyValueStore, StoreLocation, db_err,
};

/// Plain database holding the access log and rotation metadata.
pub const META_DB_FILE: &str = "security_meta.db";

/// Access-log categories.
pub const DATA_STORAGE: &str = "DATA_STORAGE";
pub const DATA_ACCESS: &str = "DATA_ACCESS";
pub const KEY_ROTATION: &str = "KEY_ROTATION";
pub const DATA_MANAGEMENT: &str = "DATA_MANAGEMENT";
pub const CRYPTO_INIT: &str = "CRYPTO_INIT";

/// Suffix of the sibling record holding a value's HMAC tag.
pub const HMAC_SUFFIX: &str = "_hmac";

/// Length in bytes of a per-user PBKDF2 salt.
pub const SALT_LEN: usize = 16;

/// Length in bytes of a derived user key.
pub const DERIVED_KEY_LEN: usize = 32;

const LAST_ROTATION: &str = "last_key_rotation";
const LAST_CLEANUP: &str = "last_cleanup";

/// Key of the sibling HMAC record for `key`.
pub fn hmac_key(key: &str) -> String {
    format!("{key}{HMAC_SUFFIX}")
}

/// Key of the stored PBKDF2 salt for `user_id`.
pub fn salt_key(user_id: &str) -> String {
    format!("salt_{user_id}")
}

/// Snapshot of the store's protection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionSummary {
    pub mode: StoreMode,
    pub cipher: String,
    pub access_log_entries: usize,
    pub last_rotation: Option<DateTime<Utc>>,
    pub last_cleanup: Option<DateTime<Utc>>,
}

enum Backend {
    Encrypted(EncryptedSqliteStore),
    Fallback(PlainSqliteStore),
}

impl Backend {
    fn kv(&self) -> &dyn SecureKeyValueStore {
        match self {
            Self::Encrypted(store) => store,
            Self::Fallback(store) => store,
        }
    }
}

/// Named millisecond timestamps in the meta database.
struct MetaTable {
    conn: Connection,
}

impl MetaTable {
    fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS store_meta (
                name  TEXT    PRIMARY KEY,
                value INTEGER NOT NULL
             );",
        )
        .map_err(db_err)?;
        Ok(Self { conn })
    }

    fn get(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM store_meta WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(millis.and_then(DateTime::<Utc>::from_timestamp_millis))
    }

    fn set(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO store_meta (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                params![name, at.timestamp_millis()],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

struct Inner {
    /// `None` only if reopening failed part-way through a rotation.
    backend: Option<Backend>,
    access_log: AccessLog,
    meta: MetaTable,
}

impl Inner {
    fn kv(&self) -> Result<&dyn SecureKeyValueStore> {
        self.backend
            .as_ref()
            .map(Backend::kv)
            .ok_or_else(|| CustodiaError::CryptoInit("secure store unavailable".into()))
    }
}

/// Encrypted, integrity-tagged key-value store.
pub struct CryptoStore {
    inner: Mutex<Inner>,
    location: StoreLocation,
    keychain: Arc<dyn NativeKeychain>,
    pbkdf2_iterations: u32,
    rotation_interval: Duration,
    strict_integrity: bool,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
}

impl CryptoStore {
    /// Open the store and run the rotation check.
    ///
    /// If the encrypted store cannot be set up the plain fallback is used
    /// instead, with a `CRYPTO_INIT` access-log line naming the cause;
    /// [`mode`](Self::mode) reports which.  A failed rotation is logged and
    /// startup continues.  Failure to open the fallback or the meta database
    /// is returned.
    #[instrument(skip_all, fields(location = ?location))]
    pub fn initialize(
        location: StoreLocation,
        keychain: Arc<dyn NativeKeychain>,
        config: &SecurityConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (backend, fallback_cause) = open_backend(&location, &keychain)?;
        let access_log = AccessLog::new(location.open(META_DB_FILE)?, config.access_log_capacity)?;
        let meta = MetaTable::new(location.open(META_DB_FILE)?)?;

        let store = Self {
            inner: Mutex::new(Inner {
                backend: Some(backend),
                access_log,
                meta,
            }),
            location,
            keychain,
            pbkdf2_iterations: config.pbkdf2_iterations,
            rotation_interval: config.rotation_interval(),
            strict_integrity: config.strict_integrity,
            clock,
            rng: SystemRandom::new(),
        };

        if let Some(cause) = fallback_cause {
            store.log_access(CRYPTO_INIT, &fallback_line(&cause))?;
        }
        if let Err(e) = store.rotate_encryption_key() {
            warn!(error = %e, "continuing after failed key rotation");
        }
        info!(mode = %store.mode(), "crypto store initialised");
        Ok(store)
    }

    /// Whether values are currently encrypted at rest.
    pub fn mode(&self) -> StoreMode {
        self.inner
            .lock()
            .backend
            .as_ref()
            .map_or(StoreMode::Fallback, |b| b.kv().mode())
    }

    /// Store `value` under `key` together with its HMAC tag, atomically.
    #[instrument(skip(self, value), fields(value_len = value.len()))]
    pub fn store_secure_data(&self, key: &str, value: &str) -> Result<()> {
        let tag = hmac_sha256(value.as_bytes(), key.as_bytes());
        let tag_key = hmac_key(key);

        let inner = self.inner.lock();
        inner
            .kv()?
            .put_all(&[(key, value), (tag_key.as_str(), tag.as_str())])?;
        self.append_log(&inner, DATA_STORAGE, &format!("stored securely: {key}"))?;
        debug!("secure value stored");
        Ok(())
    }

    /// Read the value under `key`, checking its HMAC tag.
    ///
    /// A failed check is logged; the value is still returned unless strict
    /// integrity is enabled.
    #[instrument(skip(self))]
    pub fn get_secure_data(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock();
        let kv = inner.kv()?;
        let Some(value) = kv.get(key)? else {
            return Ok(None);
        };

        if integrity_holds(kv, key, &value)? {
            self.append_log(&inner, DATA_ACCESS, &format!("read {key} (integrity verified)"))?;
            return Ok(Some(value));
        }

        warn!(key, "stored value failed integrity verification");
        self.append_log(&inner, DATA_ACCESS, &format!("integrity compromised: {key}"))?;
        if self.strict_integrity {
            return Err(CustodiaError::IntegrityViolation(format!(
                "value under {key} does not match its HMAC"
            )));
        }
        Ok(Some(value))
    }

    /// Recompute the HMAC of the value under `key` and compare it with the
    /// stored tag.  False when either record is missing.
    pub fn verify_data_integrity(&self, key: &str) -> Result<bool> {
        let inner = self.inner.lock();
        let kv = inner.kv()?;
        match kv.get(key)? {
            Some(value) => integrity_holds(kv, key, &value),
            None => Ok(false),
        }
    }

    /// Derive a 256-bit key from `password` with PBKDF2-HMAC-SHA256.
    ///
    /// The salt is generated on the first call for `user_id` and reused after.
    #[instrument(skip(self, password))]
    pub fn derive_user_key(&self, user_id: &str, password: &str) -> Result<[u8; DERIVED_KEY_LEN]> {
        let iterations = NonZeroU32::new(self.pbkdf2_iterations)
            .ok_or_else(|| CustodiaError::KeyDerivation("iteration count is zero".into()))?;
        let salt = self.user_salt(user_id)?;

        let mut key = [0u8; DERIVED_KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            &salt,
            password.as_bytes(),
            &mut key,
        );
        debug!("user key derived");
        Ok(key)
    }

    /// Replace the master key once the rotation interval has passed.
    ///
    /// Rotation destroys the encrypted store; values written under the old
    /// key are discarded, not migrated.  The first call on a fresh install
    /// only records the baseline.  Returns whether a rotation happened.
    #[instrument(skip_all)]
    pub fn rotate_encryption_key(&self) -> Result<bool> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let Some(last) = inner.meta.get(LAST_ROTATION)? else {
            inner.meta.set(LAST_ROTATION, now)?;
            debug!("rotation baseline recorded");
            return Ok(false);
        };
        if elapsed_between(last, now) < self.rotation_interval {
            return Ok(false);
        }

        match self.replace_backend(&mut inner) {
            Ok(()) => {
                inner.meta.set(LAST_ROTATION, now)?;
                self.append_log(&inner, KEY_ROTATION, "master key rotated automatically")?;
                info!(mode = ?inner.backend.as_ref().map(|b| b.kv().mode()), "master key rotated");
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "key rotation failed");
                // The old store is already gone; restart the interval here.
                if let Err(meta_err) = inner.meta.set(LAST_ROTATION, now) {
                    warn!(error = %meta_err, "could not record failed rotation time");
                }
                if let Err(log_err) =
                    self.append_log(&inner, KEY_ROTATION, &format!("key rotation failed: {e}"))
                {
                    warn!(error = %log_err, "could not record rotation failure");
                }
                Err(e)
            }
        }
    }

    /// Wipe every stored value and the access log.
    ///
    /// The wipe itself is logged afterwards, so the log is left holding
    /// exactly that one line.
    #[instrument(skip_all)]
    pub fn clear_all_data(&self) -> Result<()> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        inner.kv()?.clear()?;
        inner.access_log.clear()?;
        inner.meta.set(LAST_CLEANUP, now)?;
        self.append_log(&inner, DATA_MANAGEMENT, "all data securely erased")?;
        info!("all secure data erased");
        Ok(())
    }

    /// Append a line to the access log.
    pub fn log_access(&self, category: &str, action: &str) -> Result<()> {
        let inner = self.inner.lock();
        self.append_log(&inner, category, action)
    }

    /// Access-log lines, newest first.
    pub fn get_access_logs(&self) -> Result<Vec<String>> {
        self.inner.lock().access_log.lines_newest_first()
    }

    pub fn protection_summary(&self) -> Result<ProtectionSummary> {
        let inner = self.inner.lock();
        let mode = inner
            .backend
            .as_ref()
            .map_or(StoreMode::Fallback, |b| b.kv().mode());
        let cipher = match mode {
            StoreMode::Encrypted => "age X25519 / ChaCha20-Poly1305",
            StoreMode::Fallback => "none",
        };
        Ok(ProtectionSummary {
            mode,
            cipher: cipher.to_owned(),
            access_log_entries: inner.access_log.len()?,
            last_rotation: inner.meta.get(LAST_ROTATION)?,
            last_cleanup: inner.meta.get(LAST_CLEANUP)?,
        })
    }

    fn append_log(&self, inner: &Inner, category: &str, action: &str) -> Result<()> {
        inner.access_log.append(self.clock.now(), category, action)
    }

    fn user_salt(&self, user_id: &str) -> Result<Vec<u8>> {
        let key = salt_key(user_id);
        let inner = self.inner.lock();
        let kv = inner.kv()?;

        if let Some(encoded) = kv.get(&key)? {
            return BASE64
                .decode(encoded)
                .map_err(|e| CustodiaError::KeyDerivation(format!("stored salt unreadable: {e}")));
        }

        let mut salt = vec![0u8; SALT_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| CustodiaError::KeyDerivation("system RNG failure".into()))?;
        kv.put(&key, &BASE64.encode(&salt))?;
        debug!(user_id, "salt generated");
        Ok(salt)
    }

    /// Destroy the current backend and open a fresh one in its place.
    fn replace_backend(&self, inner: &mut Inner) -> Result<()> {
        let destroyed = match inner.backend.take() {
            Some(Backend::Encrypted(store)) => store.destroy(),
            Some(Backend::Fallback(store)) => store.clear(),
            None => Ok(()),
        };
        let (backend, fallback_cause) = open_backend(&self.location, &self.keychain)?;
        inner.backend = Some(backend);
        if let Some(cause) = fallback_cause {
            self.append_log(inner, CRYPTO_INIT, &fallback_line(&cause))?;
        }
        destroyed
    }
}

/// The encrypted backend, or the fallback plus the reason encryption was
/// unavailable.
fn open_backend(
    location: &StoreLocation,
    keychain: &Arc<dyn NativeKeychain>,
) -> Result<(Backend, Option<CustodiaError>)> {
    match EncryptedSqliteStore::open(location.clone(), Arc::clone(keychain)) {
        Ok(store) => Ok((Backend::Encrypted(store), None)),
        Err(e) => {
            warn!(error = %e, "encrypted store unavailable, falling back to plain storage");
            let fallback = PlainSqliteStore::open(location)?;
            Ok((Backend::Fallback(fallback), Some(e)))
        }
    }
}

fn fallback_line(cause: &CustodiaError) -> String {
    format!("encrypted store unavailable, using fallback: {cause}")
}

fn integrity_holds(kv: &dyn SecureKeyValueStore, key: &str, value: &str) -> Result<bool> {
    Ok(kv
        .get(&hmac_key(key))?
        .is_some_and(|tag| verify_hmac(value.as_bytes(), key.as_bytes(), &tag)))
}
