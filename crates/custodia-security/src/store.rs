// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Key-value persistence behind the crypto store.
//
// Schema (encrypted):
//   secure_kv(
//     key_tag TEXT PRIMARY KEY,   -- HMAC of the key name, base64
//     value   BLOB NOT NULL       -- age (X25519) ciphertext of the value
//   )
//
// Schema (fallback):
//   plain_kv(
//     key   TEXT PRIMARY KEY,
//     value TEXT NOT NULL
//   )
//
// The encrypted store's X25519 identity is the master key.  It never touches
// the data directory; it lives in the platform keychain and is deleted when
// the store is destroyed, which makes every existing ciphertext unreadable.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use age::secrecy::ExposeSecret;
use age::x25519;
use custodia_bridge::NativeKeychain;
use custodia_core::error::{CustodiaError, Result};
use custodia_core::types::StoreMode;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::integrity::hmac_sha256;

/// Keychain entry holding the encrypted store's age identity.
pub const MASTER_KEY_NAME: &str = "custodia.master_key";

/// Database file for the encrypted store.
pub const ENCRYPTED_DB_FILE: &str = "secure_prefs.db";

/// Database file for the unencrypted fallback store.
pub const FALLBACK_DB_FILE: &str = "fallback_prefs.db";

/// Convert a `rusqlite::Error` into a `CustodiaError::Database`.
pub(crate) fn db_err(e: rusqlite::Error) -> CustodiaError {
    CustodiaError::Database(e.to_string())
}

/// Where the stores keep their SQLite databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// One database file per store inside this directory.
    Directory(PathBuf),
    /// Private in-memory databases (tests, ephemeral sessions).
    InMemory,
}

impl StoreLocation {
    /// Open the database named `file_name` at this location.
    pub fn open(&self, file_name: &str) -> Result<Connection> {
        match self {
            Self::Directory(dir) => {
                std::fs::create_dir_all(dir)?;
                Connection::open(dir.join(file_name)).map_err(db_err)
            }
            Self::InMemory => Connection::open_in_memory().map_err(db_err),
        }
    }

    fn file_path(&self, file_name: &str) -> Option<PathBuf> {
        match self {
            Self::Directory(dir) => Some(dir.join(file_name)),
            Self::InMemory => None,
        }
    }
}

/// String key-value storage with an atomic batch write.
///
/// Methods take `&self`; implementations are used from behind a lock and only
/// need to be `Send`.
pub trait SecureKeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Write every pair or none of them.
    fn put_all(&self, entries: &[(&str, &str)]) -> Result<()>;

    /// Remove `key`.  Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry.
    fn clear(&self) -> Result<()>;

    fn mode(&self) -> StoreMode;
}

// ---------------------------------------------------------------------------
// Encrypted store
// ---------------------------------------------------------------------------

/// SQLite store whose values are age-encrypted to a keychain-held identity.
pub struct EncryptedSqliteStore {
    conn: Connection,
    identity: x25519::Identity,
    recipient: x25519::Recipient,
    /// Secret for the keyed key-name tags, derived from the identity.
    tag_secret: [u8; 32],
    keychain: Arc<dyn NativeKeychain>,
    location: StoreLocation,
}

impl EncryptedSqliteStore {
    /// Open the encrypted store, creating a master key on first use.
    ///
    /// Any failure here is a crypto-initialisation failure; callers fall back
    /// to [`PlainSqliteStore`].
    #[instrument(skip_all, fields(location = ?location))]
    pub fn open(location: StoreLocation, keychain: Arc<dyn NativeKeychain>) -> Result<Self> {
        let identity = load_or_create_identity(keychain.as_ref())?;
        let recipient = identity.to_public();
        let tag_secret = derive_tag_secret(&identity);

        let conn = location
            .open(ENCRYPTED_DB_FILE)
            .map_err(|e| CustodiaError::CryptoInit(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA secure_delete = ON;
             CREATE TABLE IF NOT EXISTS secure_kv (
                key_tag TEXT PRIMARY KEY,
                value   BLOB NOT NULL
             );",
        )
        .map_err(|e| CustodiaError::CryptoInit(e.to_string()))?;

        debug!("encrypted store opened");
        Ok(Self {
            conn,
            identity,
            recipient,
            tag_secret,
            keychain,
            location,
        })
    }

    /// Delete the database and the master key.
    ///
    /// Nothing written under the old key can be recovered afterwards.
    #[instrument(skip_all)]
    pub fn destroy(self) -> Result<()> {
        let Self {
            conn,
            keychain,
            location,
            ..
        } = self;

        conn.execute_batch("DROP TABLE IF EXISTS secure_kv;")
            .map_err(db_err)?;
        conn.close().map_err(|(_, e)| db_err(e))?;

        if let Some(path) = location.file_path(ENCRYPTED_DB_FILE) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        keychain.delete_secret(MASTER_KEY_NAME)?;

        info!("encrypted store destroyed");
        Ok(())
    }

    /// The age public key values are encrypted to.
    pub fn recipient(&self) -> String {
        self.recipient.to_string()
    }

    fn tag(&self, key: &str) -> String {
        hmac_sha256(key.as_bytes(), &self.tag_secret)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let encryptor =
            age::Encryptor::with_recipients(std::iter::once(&self.recipient as &dyn age::Recipient))
                .map_err(|e| CustodiaError::Encryption(e.to_string()))?;
        let mut ciphertext = Vec::new();

        let mut writer = encryptor
            .wrap_output(&mut ciphertext)
            .map_err(|e| CustodiaError::Encryption(e.to_string()))?;
        writer
            .write_all(plaintext)
            .map_err(|e| CustodiaError::Encryption(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| CustodiaError::Encryption(e.to_string()))?;

        Ok(ciphertext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<String> {
        let decryptor = age::Decryptor::new(ciphertext)
            .map_err(|e| CustodiaError::Decryption(e.to_string()))?;

        let mut reader = decryptor
            .decrypt(std::iter::once(&self.identity as &dyn age::Identity))
            .map_err(|e| CustodiaError::Decryption(e.to_string()))?;

        let mut plaintext = String::new();
        reader
            .read_to_string(&mut plaintext)
            .map_err(|e| CustodiaError::Decryption(e.to_string()))?;
        Ok(plaintext)
    }

    fn upsert(conn: &Connection, tag: &str, ciphertext: &[u8]) -> Result<()> {
        conn.execute(
            "INSERT INTO secure_kv (key_tag, value) VALUES (?1, ?2)
             ON CONFLICT(key_tag) DO UPDATE SET value = excluded.value",
            params![tag, ciphertext],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl SecureKeyValueStore for EncryptedSqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let ciphertext: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT value FROM secure_kv WHERE key_tag = ?1",
                params![self.tag(key)],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        ciphertext.map(|c| self.decrypt(&c)).transpose()
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let ciphertext = self.encrypt(value.as_bytes())?;
        Self::upsert(&self.conn, &self.tag(key), &ciphertext)
    }

    fn put_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        // Encrypt everything before the transaction opens.
        let sealed = entries
            .iter()
            .map(|(k, v)| Ok((self.tag(k), self.encrypt(v.as_bytes())?)))
            .collect::<Result<Vec<_>>>()?;

        let tx = self.conn.unchecked_transaction().map_err(db_err)?;
        for (tag, ciphertext) in &sealed {
            Self::upsert(&tx, tag, ciphertext)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM secure_kv WHERE key_tag = ?1", params![self.tag(key)])
            .map_err(db_err)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM secure_kv", [])
            .map_err(db_err)?;
        Ok(())
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Encrypted
    }
}

fn load_or_create_identity(keychain: &dyn NativeKeychain) -> Result<x25519::Identity> {
    let existing = keychain
        .load_secret(MASTER_KEY_NAME)
        .map_err(|e| CustodiaError::CryptoInit(format!("master key unavailable: {e}")))?;

    if let Some(bytes) = existing {
        let encoded = String::from_utf8(bytes)
            .map_err(|_| CustodiaError::CryptoInit("master key is not UTF-8".into()))?;
        return x25519::Identity::from_str(encoded.trim())
            .map_err(|e| CustodiaError::CryptoInit(format!("master key unreadable: {e}")));
    }

    let identity = x25519::Identity::generate();
    keychain
        .store_secret(MASTER_KEY_NAME, identity.to_string().expose_secret().as_bytes())
        .map_err(|e| CustodiaError::CryptoInit(format!("cannot persist master key: {e}")))?;
    info!("new master key generated");
    Ok(identity)
}

fn derive_tag_secret(identity: &x25519::Identity) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"custodia key-name tag\0");
    hasher.update(identity.to_string().expose_secret().as_bytes());
    hasher.finalize().into()
}

// ---------------------------------------------------------------------------
// Fallback store
// ---------------------------------------------------------------------------

/// Unencrypted SQLite store used when the encrypted one cannot be set up.
pub struct PlainSqliteStore {
    conn: Connection,
}

impl PlainSqliteStore {
    #[instrument(skip_all, fields(location = ?location))]
    pub fn open(location: &StoreLocation) -> Result<Self> {
        let conn = location.open(FALLBACK_DB_FILE)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS plain_kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
             );",
        )
        .map_err(db_err)?;

        warn!("using unencrypted fallback store");
        Ok(Self { conn })
    }

    fn upsert(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO plain_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl SecureKeyValueStore for PlainSqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM plain_kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        Self::upsert(&self.conn, key, value)
    }

    fn put_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        let tx = self.conn.unchecked_transaction().map_err(db_err)?;
        for (key, value) in entries {
            Self::upsert(&tx, key, value)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM plain_kv WHERE key = ?1", params![key])
            .map_err(db_err)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM plain_kv", [])
            .map_err(db_err)?;
        Ok(())
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Fallback
    }
}
