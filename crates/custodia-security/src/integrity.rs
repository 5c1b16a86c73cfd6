// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Integrity primitives: SHA-256 fingerprints for the forensic chain and
// HMAC-SHA256 tags for stored values.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::hmac;
use sha2::{Digest, Sha256};

/// SHA-256 of `data` as padded standard base64 (44 characters).
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    BASE64.encode(hasher.finalize())
}

/// HMAC-SHA256 of `data` under `secret`, base64 encoded.
pub fn hmac_sha256(data: &[u8], secret: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    BASE64.encode(hmac::sign(&key, data).as_ref())
}

/// Constant-time check of a base64 HMAC tag produced by [`hmac_sha256`].
///
/// A tag that is not valid base64 simply fails verification.
pub fn verify_hmac(data: &[u8], secret: &[u8], tag_b64: &str) -> bool {
    let Ok(tag) = BASE64.decode(tag_b64) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, data, &tag).is_ok()
}
